//! Thread enricher — runs one record through the pipeline.
//!
//! Flow:
//! 1. Transcript builder (pure)
//! 2. Eligibility gate → may short-circuit with `skip: too_long`
//! 3. One forced function call to the completion provider
//! 4. Result interpreter → enriched or unparsable
//!
//! Subject and company summary are computed for every outcome.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::llm::{ChatMessage, LlmProvider, TokenUsage, ToolChoice, ToolCompletionRequest, ToolDefinition};
use crate::pipeline::gate::{CharsPerToken, Eligibility, EligibilityGate};
use crate::pipeline::interpreter::interpret;
use crate::pipeline::schema::{self, FUNCTION_NAME};
use crate::pipeline::transcript::build_transcript;
use crate::pipeline::types::{EnrichmentResult, Outcome, SkipReason, ThreadRecord};

/// Default sampling temperature (favours repeatable output).
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

static REPLY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:re:\s*)+").expect("reply prefix pattern is a valid constant regex")
});

/// A record after the synchronous stages, ready for completion or skip.
#[derive(Debug, Clone)]
pub struct PreparedThread {
    pub id: String,
    pub subject: Option<String>,
    pub companies: Option<String>,
    pub transcript: String,
    pub eligibility: Eligibility,
}

/// A finished unit of work.
#[derive(Debug, Clone)]
pub struct Completed {
    pub result: EnrichmentResult,
    pub usage: TokenUsage,
}

/// Runs records through transcript → gate → completion → interpretation.
pub struct ThreadEnricher {
    llm: Arc<dyn LlmProvider>,
    gate: EligibilityGate,
    system_prompt: String,
    tool: ToolDefinition,
    temperature: f32,
}

impl ThreadEnricher {
    pub fn new(llm: Arc<dyn LlmProvider>, config: &PipelineConfig) -> Self {
        Self {
            llm,
            gate: EligibilityGate::new(
                Box::new(CharsPerToken(config.chars_per_token)),
                config.token_threshold,
            ),
            system_prompt: schema::build_system_prompt(config.company_name.as_deref()),
            tool: schema::conversation_info_tool(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_gate(mut self, gate: EligibilityGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Synchronous stages: transcript, gate, subject and company summary.
    pub fn prepare(&self, record: &ThreadRecord) -> PreparedThread {
        let transcript = build_transcript(record);
        let eligibility = self.gate.check(&transcript);

        PreparedThread {
            id: record.id.clone(),
            subject: normalized_subject(record),
            companies: company_summary(record),
            transcript,
            eligibility,
        }
    }

    /// Result for a thread the gate rejected.
    pub fn skip(&self, prepared: PreparedThread) -> Completed {
        info!(
            id = %prepared.id,
            estimate = prepared.eligibility.estimate(),
            threshold = self.gate.threshold(),
            "Transcript over budget, skipping completion"
        );
        Completed {
            result: EnrichmentResult {
                id: prepared.id,
                subject: prepared.subject,
                companies: prepared.companies,
                outcome: Outcome::Skipped {
                    skip: SkipReason::TooLong,
                },
            },
            usage: TokenUsage::default(),
        }
    }

    /// Request the structured completion and interpret it.
    ///
    /// Provider failures propagate; malformed output does not.
    pub async fn complete(&self, prepared: PreparedThread) -> Result<Completed, PipelineError> {
        let request = ToolCompletionRequest::new(
            vec![
                ChatMessage::system(self.system_prompt.as_str()),
                ChatMessage::user(schema::build_user_prompt(&prepared.transcript)),
            ],
            vec![self.tool.clone()],
        )
        .with_tool_choice(ToolChoice::Function(FUNCTION_NAME.to_string()))
        .with_temperature(self.temperature);

        let response = self
            .llm
            .complete_with_tools(request)
            .await
            .map_err(|source| PipelineError::Completion {
                id: prepared.id.clone(),
                source,
            })?;

        let outcome = interpret(response.arguments_for(FUNCTION_NAME));
        let has_helpful_info = match &outcome {
            Outcome::Enriched { enrichments } => enrichments.helpful_info().is_some(),
            _ => false,
        };
        debug!(
            id = %prepared.id,
            outcome = outcome.label(),
            has_helpful_info,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Completion interpreted"
        );

        let mut usage = TokenUsage::default();
        usage.add(response.input_tokens, response.output_tokens);

        Ok(Completed {
            result: EnrichmentResult {
                id: prepared.id,
                subject: prepared.subject,
                companies: prepared.companies,
                outcome,
            },
            usage,
        })
    }

    /// Run every stage for one record with no concurrency limit.
    pub async fn enrich(&self, record: &ThreadRecord) -> Result<Completed, PipelineError> {
        let prepared = self.prepare(record);
        if prepared.eligibility.is_eligible() {
            self.complete(prepared).await
        } else {
            Ok(self.skip(prepared))
        }
    }

    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }
}

/// Subject of the newest message, lower-cased, reply prefixes removed.
pub fn normalized_subject(record: &ThreadRecord) -> Option<String> {
    let subject = record.messages.first()?.properties.subject.as_deref()?;
    let lowered = subject.to_lowercase();
    Some(REPLY_PREFIX.replace(&lowered, "").into_owned())
}

/// Organization names joined with `", "`; unnamed organizations contribute "".
pub fn company_summary(record: &ThreadRecord) -> Option<String> {
    if record.organizations.is_empty() {
        return None;
    }
    Some(
        record
            .organizations
            .iter()
            .map(|org| org.name().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(", "),
    )
}
