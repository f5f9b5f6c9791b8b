//! Renders a thread record as the plain-text transcript sent for completion.
//!
//! Layout:
//!
//! ```text
//! Participant Organizations:
//! - name: "Acme", city: "Berlin"
//!
//! Conversation History:
//! 1: From: Ada Lovelace <ada@example.com>
//! 1: To: Bob Smith <bob@example.com>
//! 1: Date: 2023-06-01T10:00:00Z
//! 1: 	Hello Bob,
//!
//! 2: From: ...
//! ```
//!
//! Messages run oldest first; every line of a message carries that
//! message's 1-based position. Quoted replies are stripped from bodies.

use crate::pipeline::types::{Message, Organization, ThreadRecord};

/// Organization attributes worth showing, in render order.
pub const ORGANIZATION_FIELDS: [&str; 7] = [
    "name",
    "description",
    "address",
    "city",
    "country",
    "domain",
    "founded_year",
];

const ORGANIZATIONS_HEADER: &str = "Participant Organizations:";
const HISTORY_HEADER: &str = "Conversation History:";

/// Build the transcript for a thread. Never fails; absent fields render empty.
pub fn build_transcript(record: &ThreadRecord) -> String {
    let mut out = String::new();

    if !record.organizations.is_empty() {
        out.push_str(ORGANIZATIONS_HEADER);
        out.push('\n');
        for org in &record.organizations {
            out.push_str("- ");
            out.push_str(&describe_organization(org));
            out.push('\n');
        }
        out.push('\n');
    }

    out.push_str(HISTORY_HEADER);
    out.push('\n');

    // Source order is newest first.
    let history: Vec<String> = record
        .messages
        .iter()
        .rev()
        .enumerate()
        .map(|(idx, message)| number_lines(idx + 1, &render_message(message)))
        .collect();
    out.push_str(&history.join("\n\n"));

    out
}

/// `key: "value"` pairs for the recognized attributes that are present.
pub fn describe_organization(org: &Organization) -> String {
    ORGANIZATION_FIELDS
        .iter()
        .filter_map(|key| org.attribute(key).map(|value| format!("{key}: \"{value}\"")))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_message(message: &Message) -> String {
    let p = &message.properties;
    let text = normalize_line_endings(p.text.as_deref().unwrap_or_default());
    let body = strip_quoted_reply(&text)
        .into_iter()
        .map(|line| format!("\t{line}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "From: {} {} <{}>\nTo: {} {} <{}>\nDate: {}\n{}",
        opt(&p.from_first_name),
        opt(&p.from_last_name),
        opt(&p.from_email),
        opt(&p.to_first_name),
        opt(&p.to_last_name),
        opt(&p.to_email),
        opt(&p.created_at),
        body,
    )
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or_default()
}

/// Carriage returns become newlines, blank-line runs collapse, ends are trimmed.
fn normalize_line_endings(text: &str) -> String {
    text.replace('\r', "\n")
        .split('\n')
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// `On <date>, <someone> wrote:` introduces the quoted previous message.
fn is_quote_header(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("On ") && line.ends_with("wrote:")
}

/// Body lines with the quoted tail and `>` lines removed.
///
/// A quote header on the very first line is not a truncation point; the
/// message is kept whole apart from `>` lines.
fn strip_quoted_reply(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();

    if let Some(idx) = lines.iter().position(|line| is_quote_header(line))
        && idx > 0
    {
        lines.truncate(idx);
    }

    lines.retain(|line| !line.trim().starts_with('>'));
    lines
}

fn number_lines(position: usize, block: &str) -> String {
    block
        .split('\n')
        .map(|line| format!("{position}: {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
