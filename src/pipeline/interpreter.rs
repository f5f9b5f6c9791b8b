//! Turns raw function-call arguments into a typed outcome.
//!
//! Malformed model output never becomes an error: it is carried forward
//! verbatim in an `unparsable` marker for later review.

use tracing::warn;

use crate::pipeline::types::{Enrichment, Outcome};

/// Interpret the raw arguments of the forced function call.
///
/// `None` means the model made no call at all; it is reported as
/// unparsable with empty text.
pub fn interpret(raw: Option<&str>) -> Outcome {
    let Some(raw) = raw else {
        warn!("Completion carried no function call");
        return Outcome::unparsable("");
    };

    match parse_enrichment(raw) {
        Ok(enrichments) => Outcome::Enriched { enrichments },
        Err(e) => {
            warn!(error = %e, raw_len = raw.len(), "Function arguments did not match schema");
            Outcome::unparsable(raw)
        }
    }
}

fn parse_enrichment(raw: &str) -> Result<Enrichment, serde_json::Error> {
    serde_json::from_str(&extract_json_object(raw))
}

/// Extract a JSON object from model output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    trimmed.to_string()
}
