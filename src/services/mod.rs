// PhishLens Core Services

pub mod patterns;
pub mod text_processor;
pub mod redaction;
pub mod config_store;
pub mod providers;
pub mod vectorizer;
pub mod classifier;
pub mod html_extract;
pub mod detection;
pub mod analyzer;

pub use text_processor::*;
pub use redaction::*;
pub use config_store::*;
pub use providers::*;
pub use vectorizer::*;
pub use classifier::*;
pub use html_extract::*;
pub use analyzer::*;

// Re-export detection module functions
pub use detection::{
    derive_base_decision,
    fuzzy_reverse_lookup,
    merge_domain_votes,
    refine,
    vote,
    AttributionAggregator,
    ExplainerCache,
};
