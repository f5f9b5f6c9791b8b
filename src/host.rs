//! Line-oriented host runtime.
//!
//! Reads newline-delimited JSON thread records. A blank line closes the
//! current transaction, and so does end of input. At each boundary the
//! handler is flushed and its results are written as JSON lines. Unreadable
//! input aborts the open transaction before the error is returned.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::pipeline::dispatch::TransactionHandler;
use crate::pipeline::types::ThreadRecord;

/// Counters for one host run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub records: usize,
    pub transactions: usize,
    pub results: usize,
}

/// Drive `handler` from `input` until EOF, writing results to `output`.
pub async fn run<R, W, H>(input: R, mut output: W, handler: &mut H) -> Result<HostStats, PipelineError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    H: TransactionHandler + ?Sized,
{
    let mut stats = HostStats::default();
    let mut lines = input.lines();
    let mut line_no = 0;
    let mut open = 0;

    loop {
        let line = lines.next_line().await.map_err(|e| {
            abandon(
                &mut *handler,
                PipelineError::Input {
                    line: line_no + 1,
                    reason: e.to_string(),
                },
            )
        })?;
        let Some(line) = line else { break };
        line_no += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            if open > 0 {
                stats.results += commit(handler, &mut output).await?;
                stats.transactions += 1;
                open = 0;
            }
            continue;
        }

        let record: ThreadRecord = serde_json::from_str(trimmed).map_err(|e| {
            abandon(
                &mut *handler,
                PipelineError::Input {
                    line: line_no,
                    reason: e.to_string(),
                },
            )
        })?;
        debug!(line = line_no, id = %record.id, "Accepted record");
        handler.accept(record);
        stats.records += 1;
        open += 1;
    }

    if open > 0 {
        stats.results += commit(handler, &mut output).await?;
        stats.transactions += 1;
    }

    info!(
        records = stats.records,
        transactions = stats.transactions,
        results = stats.results,
        "Input exhausted"
    );
    Ok(stats)
}

fn abandon<H>(handler: &mut H, err: PipelineError) -> PipelineError
where
    H: TransactionHandler + ?Sized,
{
    warn!(error = %err, "Abandoning open transaction");
    handler.abort();
    err
}

async fn commit<W, H>(handler: &mut H, output: &mut W) -> Result<usize, PipelineError>
where
    W: AsyncWrite + Unpin,
    H: TransactionHandler + ?Sized,
{
    let results = handler.flush().await?;
    for result in &results {
        let mut line =
            serde_json::to_string(result).map_err(|e| PipelineError::Output(e.to_string()))?;
        line.push('\n');
        output
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PipelineError::Output(e.to_string()))?;
    }
    output
        .flush()
        .await
        .map_err(|e| PipelineError::Output(e.to_string()))?;
    Ok(results.len())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use std::sync::Arc;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::dispatch::DispatchCoordinator;
    use crate::pipeline::processor::ThreadEnricher;
    use crate::pipeline::processor::tests::{MockLlm, VALID_ARGS};
    use crate::pipeline::types::{EnrichmentResult, Outcome, SkipReason};

    /// Handler that echoes accepted ids back as skipped results.
    #[derive(Default)]
    struct EchoHandler {
        accepted: Vec<String>,
        flushes: usize,
        aborts: usize,
    }

    #[async_trait]
    impl TransactionHandler for EchoHandler {
        fn accept(&mut self, record: ThreadRecord) {
            self.accepted.push(record.id);
        }

        async fn flush(&mut self) -> Result<Vec<EnrichmentResult>, PipelineError> {
            self.flushes += 1;
            Ok(self
                .accepted
                .drain(..)
                .map(|id| EnrichmentResult {
                    id,
                    subject: None,
                    companies: None,
                    outcome: Outcome::Skipped {
                        skip: SkipReason::TooLong,
                    },
                })
                .collect())
        }

        fn abort(&mut self) {
            self.aborts += 1;
            self.accepted.clear();
        }
    }

    #[tokio::test]
    async fn blank_lines_delimit_transactions() {
        let input = b"{\"id\":\"a\"}\n{\"id\":\"b\"}\n\n\n{\"id\":\"c\"}\n" as &[u8];
        let mut output = Vec::new();
        let mut handler = EchoHandler::default();

        let stats = run(input, &mut output, &mut handler).await.unwrap();

        assert_eq!(
            stats,
            HostStats {
                records: 3,
                transactions: 2,
                results: 3,
            }
        );
        assert_eq!(handler.flushes, 2);
        let text = String::from_utf8(output).unwrap();
        let ids: Vec<String> = text
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn empty_input_flushes_nothing() {
        let mut output = Vec::new();
        let mut handler = EchoHandler::default();
        let stats = run(b"\n\n" as &[u8], &mut output, &mut handler).await.unwrap();
        assert_eq!(stats, HostStats::default());
        assert_eq!(handler.flushes, 0);
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn invalid_record_reports_line() {
        let mut output = Vec::new();
        let mut handler = EchoHandler::default();
        let err = run(b"{\"id\":\"a\"}\nnot json\n" as &[u8], &mut output, &mut handler)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Input { line: 2, .. }));
        assert_eq!(handler.aborts, 1);
        assert!(handler.accepted.is_empty());
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn failed_transaction_does_not_leak_into_next_run() {
        let llm = Arc::new(MockLlm::returning(Some(VALID_ARGS)));
        let enricher = Arc::new(ThreadEnricher::new(llm, &PipelineConfig::default()));
        let mut coord = DispatchCoordinator::new(enricher, 3);

        let mut output = Vec::new();
        let err = run(b"{\"id\":\"a\"}\nnot json\n" as &[u8], &mut output, &mut coord)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Input { line: 2, .. }));
        assert_eq!(coord.pending(), 0);
        assert!(output.is_empty());

        let stats = run(b"{\"id\":\"b\"}\n" as &[u8], &mut output, &mut coord)
            .await
            .unwrap();
        assert_eq!(stats.results, 1);
        let text = String::from_utf8(output).unwrap();
        let ids: Vec<String> = text
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["b"]);
    }
}
