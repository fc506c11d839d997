pub mod config;
pub mod models;
pub mod error;
pub mod language;
pub mod provider;
pub mod api;
pub mod local;
pub mod stub;
pub mod prompts;
pub mod parser;
pub mod analyzer;
pub mod enrichment;
pub mod database;

#[cfg(test)]
mod test_server;

pub use config::Config;
pub use models::*;
pub use error::{EnrichmentError, FailureReason, ProviderError};
pub use provider::{GenerationOptions, GenerationProvider, ProviderChain};
pub use parser::ParseQuality;
pub use analyzer::{FeedbackEngine, Generated};
pub use enrichment::{BatchSummary, EnrichmentManager, EnrichmentStore, VocabularyLookup};
pub use database::DatabaseManager;
