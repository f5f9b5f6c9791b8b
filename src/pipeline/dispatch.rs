//! Dispatch coordinator — fire now, collect at the transaction boundary.
//!
//! `submit` spawns a record's whole pipeline run as a task and keeps the
//! handle; `drain` joins every handle in submission order, then starts over
//! empty. A shared semaphore caps how many completion calls are in flight.
//! Records the gate rejects never take a permit.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::llm::TokenUsage;
use crate::pipeline::processor::{Completed, ThreadEnricher};
use crate::pipeline::types::{EnrichmentResult, ThreadRecord};

/// The two capabilities a host runtime needs from the pipeline.
#[async_trait]
pub trait TransactionHandler: Send {
    /// Accept one record. Returns immediately; output arrives on flush.
    fn accept(&mut self, record: ThreadRecord);

    /// Wait for every accepted record and return results in acceptance order.
    async fn flush(&mut self) -> Result<Vec<EnrichmentResult>, PipelineError>;

    /// Abandon every accepted record without producing results.
    fn abort(&mut self);
}

type Pending = JoinHandle<Result<Completed, PipelineError>>;

/// Owns in-flight work between transaction boundaries.
///
/// `submit` must be called from within a tokio runtime.
pub struct DispatchCoordinator {
    enricher: Arc<ThreadEnricher>,
    limiter: Arc<Semaphore>,
    max_concurrency: usize,
    pending: Vec<Pending>,
}

impl DispatchCoordinator {
    pub fn new(enricher: Arc<ThreadEnricher>, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            enricher,
            limiter: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            pending: Vec::new(),
        }
    }

    /// Number of submitted records not yet drained.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Completion calls currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_concurrency
            .saturating_sub(self.limiter.available_permits())
    }

    /// Schedule a record's pipeline run. Never blocks.
    pub fn submit(&mut self, record: ThreadRecord) {
        let enricher = Arc::clone(&self.enricher);
        let limiter = Arc::clone(&self.limiter);

        debug!(
            id = %record.id,
            pending = self.pending.len() + 1,
            in_flight = self.in_flight(),
            "Submitting thread"
        );

        let handle = tokio::spawn(async move {
            let prepared = enricher.prepare(&record);
            if !prepared.eligibility.is_eligible() {
                return Ok(enricher.skip(prepared));
            }

            let _permit = limiter
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::TaskFailed(format!("limiter closed: {e}")))?;
            enricher.complete(prepared).await
        });

        self.pending.push(handle);
    }

    /// Cancel all pending work of the open transaction.
    pub fn abort(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return;
        }
        let aborted = pending.len();
        for handle in pending {
            handle.abort();
        }
        warn!(aborted, in_flight = self.in_flight(), "Transaction aborted");
    }

    /// Join all pending work in submission order and reset.
    ///
    /// On the first failure the remaining tasks of the transaction are
    /// aborted and the error is returned; the coordinator is empty either way.
    pub async fn drain(&mut self) -> Result<Vec<EnrichmentResult>, PipelineError> {
        let pending = std::mem::take(&mut self.pending);
        let total = pending.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(total);
        let mut usage = TokenUsage::default();
        let mut handles = pending.into_iter();

        while let Some(handle) = handles.next() {
            let joined = handle
                .await
                .unwrap_or_else(|e| Err(PipelineError::TaskFailed(e.to_string())));

            match joined {
                Ok(done) => {
                    usage.input_tokens += done.usage.input_tokens;
                    usage.output_tokens += done.usage.output_tokens;
                    results.push(done.result);
                }
                Err(e) => {
                    let aborted = handles.len();
                    for rest in handles {
                        rest.abort();
                    }
                    error!(
                        error = %e,
                        completed = results.len(),
                        aborted,
                        total,
                        in_flight = self.in_flight(),
                        "Drain failed, transaction abandoned"
                    );
                    return Err(e);
                }
            }
        }

        let mut by_outcome: BTreeMap<&'static str, usize> = BTreeMap::new();
        for result in &results {
            *by_outcome.entry(result.outcome.label()).or_default() += 1;
        }
        let cost = usage.cost(self.enricher.llm().cost_per_token());

        info!(
            total,
            enriched = by_outcome.get("enriched").copied().unwrap_or(0),
            unparsable = by_outcome.get("unparsable").copied().unwrap_or(0),
            skipped = by_outcome.get("skipped").copied().unwrap_or(0),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            estimated_cost = %cost,
            "Transaction drained"
        );

        Ok(results)
    }
}

#[async_trait]
impl TransactionHandler for DispatchCoordinator {
    fn accept(&mut self, record: ThreadRecord) {
        self.submit(record);
    }

    async fn flush(&mut self) -> Result<Vec<EnrichmentResult>, PipelineError> {
        self.drain().await
    }

    fn abort(&mut self) {
        DispatchCoordinator::abort(self);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rust_decimal::Decimal;
    use tokio::sync::Notify;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::LlmError;
    use crate::llm::{
        FinishReason, LlmProvider, ToolCall, ToolCompletionRequest, ToolCompletionResponse,
    };
    use crate::pipeline::processor::tests::{VALID_ARGS, record};
    use crate::pipeline::schema::FUNCTION_NAME;
    use crate::pipeline::types::{Outcome, SkipReason};

    /// Provider scripted per thread marker.
    ///
    /// Gated markers hold their completion until the test releases them;
    /// the rest yield a few times so concurrent calls interleave.
    #[derive(Default)]
    struct ScriptedLlm {
        gates: HashMap<String, Notify>,
        fail_on: Option<String>,
        panic_on: Option<String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        started: Mutex<Vec<String>>,
        finished: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn gated<S: AsRef<str>>(markers: &[S]) -> Self {
            Self {
                gates: markers
                    .iter()
                    .map(|m| (m.as_ref().to_string(), Notify::new()))
                    .collect(),
                ..Default::default()
            }
        }

        fn release(&self, marker: &str) {
            if let Some(gate) = self.gates.get(marker) {
                gate.notify_one();
            }
        }

        fn has_finished(&self, marker: &str) -> bool {
            self.finished.lock().unwrap().iter().any(|m| m == marker)
        }
    }

    fn marker_of(request: &ToolCompletionRequest) -> String {
        let content = &request.messages[1].content;
        let start = content.find("marker:").map(|i| i + 7).unwrap_or(content.len());
        content[start..]
            .chars()
            .take_while(|c| c.is_alphanumeric())
            .collect()
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete_with_tools(
            &self,
            request: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            let marker = marker_of(&request);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.started.lock().unwrap().push(marker.clone());

            match self.gates.get(&marker) {
                Some(gate) => gate.notified().await,
                None => {
                    for _ in 0..3 {
                        tokio::task::yield_now().await;
                    }
                }
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.finished.lock().unwrap().push(marker.clone());

            if self.panic_on.as_deref() == Some(marker.as_str()) {
                panic!("scripted panic for {marker}");
            }
            if self.fail_on.as_deref() == Some(marker.as_str()) {
                return Err(LlmError::ServerError {
                    provider: "scripted".into(),
                    status: 500,
                    body: "boom".into(),
                });
            }

            Ok(ToolCompletionResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: marker,
                    name: FUNCTION_NAME.into(),
                    arguments: VALID_ARGS.into(),
                }],
                input_tokens: 10,
                output_tokens: 5,
                finish_reason: FinishReason::ToolUse,
                response_id: None,
            })
        }
    }

    fn coordinator(llm: Arc<ScriptedLlm>, config: PipelineConfig) -> DispatchCoordinator {
        let max = config.max_concurrency;
        let enricher = Arc::new(ThreadEnricher::new(llm, &config));
        DispatchCoordinator::new(enricher, max)
    }

    fn marked(id: &str) -> ThreadRecord {
        record(id, "Re: Hello", &format!("Body text marker:{id} end"))
    }

    fn ids(results: &[EnrichmentResult]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        while !cond() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn drain_with_nothing_pending_is_empty() {
        let mut coord = coordinator(Arc::new(ScriptedLlm::default()), PipelineConfig::default());
        assert!(coord.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_drain_is_empty() {
        let mut coord = coordinator(Arc::new(ScriptedLlm::default()), PipelineConfig::default());
        coord.submit(marked("a"));
        coord.submit(marked("b"));
        assert_eq!(coord.pending(), 2);

        assert_eq!(coord.drain().await.unwrap().len(), 2);
        assert_eq!(coord.pending(), 0);
        assert!(coord.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn results_follow_submission_order_not_completion_order() {
        let llm = Arc::new(ScriptedLlm::gated(&["r1", "r3"]));
        let mut coord = coordinator(Arc::clone(&llm), PipelineConfig::default());
        coord.submit(marked("r1"));
        coord.submit(marked("r2"));
        coord.submit(marked("r3"));

        let releaser = {
            let llm = Arc::clone(&llm);
            tokio::spawn(async move {
                wait_for(|| llm.has_finished("r2")).await;
                llm.release("r3");
                wait_for(|| llm.has_finished("r3")).await;
                llm.release("r1");
            })
        };

        let results = coord.drain().await.unwrap();
        releaser.await.unwrap();

        assert_eq!(ids(&results), vec!["r1", "r2", "r3"]);
        assert_eq!(*llm.finished.lock().unwrap(), vec!["r2", "r3", "r1"]);
    }

    #[tokio::test]
    async fn ceiling_bounds_concurrent_completions() {
        let markers: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();
        let llm = Arc::new(ScriptedLlm::gated(&markers));
        let mut coord = coordinator(Arc::clone(&llm), PipelineConfig::default());
        for id in &markers {
            coord.submit(marked(id));
        }

        let releaser = {
            let llm = Arc::clone(&llm);
            let markers = markers.clone();
            tokio::spawn(async move {
                wait_for(|| llm.in_flight.load(Ordering::SeqCst) == 3).await;
                let started_at_ceiling = llm.started.lock().unwrap().len();
                for id in &markers {
                    llm.release(id);
                }
                started_at_ceiling
            })
        };

        let results = coord.drain().await.unwrap();
        assert_eq!(releaser.await.unwrap(), 3);
        assert_eq!(results.len(), 10);
        assert_eq!(llm.max_in_flight.load(Ordering::SeqCst), 3);
        assert_eq!(coord.in_flight(), 0);
    }

    #[tokio::test]
    async fn admission_follows_submission_order() {
        let llm = Arc::new(ScriptedLlm::default());
        let config = PipelineConfig {
            max_concurrency: 1,
            ..Default::default()
        };
        let mut coord = coordinator(Arc::clone(&llm), config);
        let order = ["q1", "q2", "q3", "q4"];
        for id in order {
            coord.submit(marked(id));
        }
        coord.drain().await.unwrap();

        assert_eq!(*llm.started.lock().unwrap(), order);
        assert_eq!(llm.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn skipped_records_keep_their_slot() {
        let llm = Arc::new(ScriptedLlm::default());
        let config = PipelineConfig {
            token_threshold: 100,
            ..Default::default()
        };
        let mut coord = coordinator(Arc::clone(&llm), config);
        coord.submit(marked("s1"));
        coord.submit(record("long", "Re: Big", &"x".repeat(2000)));
        coord.submit(marked("s2"));

        let results = coord.drain().await.unwrap();
        assert_eq!(ids(&results), vec!["s1", "long", "s2"]);
        assert_eq!(
            results[1].outcome,
            Outcome::Skipped {
                skip: SkipReason::TooLong
            }
        );
        assert_eq!(llm.started.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn provider_failure_fails_drain_and_resets() {
        let llm = Arc::new(ScriptedLlm {
            fail_on: Some("bad".to_string()),
            ..Default::default()
        });
        let mut coord = coordinator(Arc::clone(&llm), PipelineConfig::default());
        coord.submit(marked("ok1"));
        coord.submit(marked("bad"));
        coord.submit(marked("ok2"));

        let err = coord.drain().await.unwrap_err();
        assert!(matches!(err, PipelineError::Completion { ref id, .. } if id == "bad"));
        assert_eq!(coord.pending(), 0);

        coord.submit(marked("next"));
        let results = coord.drain().await.unwrap();
        assert_eq!(ids(&results), vec!["next"]);
    }

    #[tokio::test]
    async fn failed_drain_aborts_running_work() {
        let llm = Arc::new(ScriptedLlm {
            fail_on: Some("bad".to_string()),
            ..ScriptedLlm::gated(&["slow"])
        });
        let mut coord = coordinator(Arc::clone(&llm), PipelineConfig::default());
        coord.submit(marked("bad"));
        coord.submit(marked("slow"));

        let err = coord.drain().await.unwrap_err();
        assert!(matches!(err, PipelineError::Completion { ref id, .. } if id == "bad"));
        assert!(llm.started.lock().unwrap().iter().any(|m| m == "slow"));

        // Releasing the gate after the abort must not revive the call.
        llm.release("slow");
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!llm.has_finished("slow"));
        assert_eq!(coord.pending(), 0);
    }

    #[tokio::test]
    async fn panicked_unit_fails_drain_as_task_failure() {
        let llm = Arc::new(ScriptedLlm {
            panic_on: Some("boom".to_string()),
            ..Default::default()
        });
        let mut coord = coordinator(Arc::clone(&llm), PipelineConfig::default());
        coord.submit(marked("fine"));
        coord.submit(marked("boom"));

        let err = coord.drain().await.unwrap_err();
        assert!(matches!(err, PipelineError::TaskFailed(_)));
        assert_eq!(coord.pending(), 0);

        coord.submit(marked("after"));
        assert_eq!(ids(&coord.drain().await.unwrap()), vec!["after"]);
    }

    #[tokio::test]
    async fn abort_discards_open_transaction() {
        let llm = Arc::new(ScriptedLlm::gated(&["held"]));
        let mut coord = coordinator(Arc::clone(&llm), PipelineConfig::default());
        coord.submit(marked("held"));
        wait_for(|| !llm.started.lock().unwrap().is_empty()).await;

        coord.abort();
        assert_eq!(coord.pending(), 0);
        llm.release("held");
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!llm.has_finished("held"));

        coord.submit(marked("fresh"));
        assert_eq!(ids(&coord.drain().await.unwrap()), vec!["fresh"]);
    }

    #[tokio::test]
    async fn works_through_transaction_handler() {
        let llm = Arc::new(ScriptedLlm::default());
        let mut handler: Box<dyn TransactionHandler> =
            Box::new(coordinator(llm, PipelineConfig::default()));
        handler.accept(marked("h1"));
        handler.accept(marked("h2"));
        let results = handler.flush().await.unwrap();
        assert_eq!(ids(&results), vec!["h1", "h2"]);
        assert!(handler.flush().await.unwrap().is_empty());
    }
}
