//! Shared types for the enrichment pipeline.

use serde::{Deserialize, Serialize};

// ── Input record ────────────────────────────────────────────────────

/// One conversation thread with its participating organizations.
///
/// Mirrors the CRM export shape: every message and company wraps its
/// attributes in a `properties` object and any attribute may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: String,
    /// Messages in the order the source supplies them (newest first).
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Message>,
    #[serde(default, rename = "companies", deserialize_with = "null_as_default")]
    pub organizations: Vec<Organization>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: MessageProperties,
}

/// Email attributes of a single message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageProperties {
    #[serde(default, rename = "hs_email_from_firstname")]
    pub from_first_name: Option<String>,
    #[serde(default, rename = "hs_email_from_lastname")]
    pub from_last_name: Option<String>,
    #[serde(default, rename = "hs_email_from_email")]
    pub from_email: Option<String>,
    #[serde(default, rename = "hs_email_to_firstname")]
    pub to_first_name: Option<String>,
    #[serde(default, rename = "hs_email_to_lastname")]
    pub to_last_name: Option<String>,
    #[serde(default, rename = "hs_email_to_email")]
    pub to_email: Option<String>,
    #[serde(default, rename = "hs_createdate")]
    pub created_at: Option<String>,
    #[serde(default, rename = "hs_email_text")]
    pub text: Option<String>,
    #[serde(default, rename = "hs_email_subject")]
    pub subject: Option<String>,
}

/// A participating company. Attributes are free-form; only a known subset
/// ends up in the transcript.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Organization {
    /// Attribute rendered as plain text. `null` and nested values count as absent.
    pub fn attribute(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<String> {
        self.attribute("name")
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Structured enrichment ───────────────────────────────────────────

/// Likelihood scale used for both closing and churn estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Likelihood {
    Never,
    ProbablyNot,
    Possibly,
    Likely,
    AlmostCertain,
    #[serde(alias = "not applicable")]
    NotApplicable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    #[serde(rename = "very negative")]
    VeryNegative,
    #[serde(rename = "negative")]
    Negative,
    #[serde(rename = "neutral")]
    Neutral,
    #[serde(rename = "positive")]
    Positive,
    #[serde(rename = "very positive")]
    VeryPositive,
}

/// Sales-funnel position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStage {
    ReachedOut,
    HeardBack,
    MeetingScheduled,
    IntentToClose,
    Closed,
    #[default]
    Unknown,
}

/// Structured facts the completion service extracts from a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    /// Conversation is directly with a sales prospect.
    pub is_relevant: bool,
    pub probability_to_close: Likelihood,
    pub probability_to_churn: Likelihood,
    pub overview: String,
    /// Free text, or the literal `none`.
    pub helpful_info: String,
    pub sentiment: Sentiment,
    #[serde(default)]
    pub customer_stage: CustomerStage,
}

impl Enrichment {
    /// Helpful info, treating the `none` sentinel as absent.
    pub fn helpful_info(&self) -> Option<&str> {
        let info = self.helpful_info.trim();
        if info.is_empty() || info.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(info)
        }
    }
}

// ── Output record ───────────────────────────────────────────────────

/// Why a thread was not sent for completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TooLong,
}

/// Raw completion output that did not match the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnparsableMarker {
    pub unparsable: String,
}

/// The one populated outcome of enriching a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    Enriched { enrichments: Enrichment },
    Unparsable { enrichments: UnparsableMarker },
    Skipped { skip: SkipReason },
}

impl Outcome {
    pub fn unparsable(raw: impl Into<String>) -> Self {
        Self::Unparsable {
            enrichments: UnparsableMarker {
                unparsable: raw.into(),
            },
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Enriched { .. } => "enriched",
            Self::Unparsable { .. } => "unparsable",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Result of running one thread through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Comma-joined organization names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companies: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
}
