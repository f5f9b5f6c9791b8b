//! Thread enrichment — structured sales insight from email conversations.

pub mod config;
pub mod error;
pub mod host;
pub mod llm;
pub mod pipeline;
