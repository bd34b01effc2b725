// PhishLens Data Models
// Shared request-scoped and process-wide types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============ Model Handles ============

/// Attribution and input family of a classification model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Linear,
    Tree,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::Tree => "tree",
        }
    }
}

/// Physical form of the feature vector a model consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputForm {
    #[default]
    Sparse,
    Dense,
}

// ============ Ensemble ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleResult {
    pub probability: f64,
    pub per_model: BTreeMap<String, f64>,
    pub vote_score: f64,
    pub total_weight: f64,
}

impl EnsembleResult {
    pub fn from_parts(per_model: BTreeMap<String, f64>, vote_score: f64, total_weight: f64) -> Self {
        let probability = if total_weight > 0.0 {
            vote_score / total_weight
        } else {
            0.0
        };
        Self {
            probability,
            per_model,
            vote_score,
            total_weight,
        }
    }

    /// Merge two domains by summing their raw scores and weights.
    /// A model name present in both maps keeps the value from `other`.
    pub fn merge(mut self, other: EnsembleResult) -> Self {
        self.per_model.extend(other.per_model);
        Self::from_parts(
            self.per_model,
            self.vote_score + other.vote_score,
            self.total_weight + other.total_weight,
        )
    }
}

// ============ Explanation ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionToken {
    pub word: String,
    pub impact: f64,
}

impl AttributionToken {
    pub fn new(word: impl Into<String>, impact: f64) -> Self {
        Self {
            word: word.into(),
            impact: round4(impact),
        }
    }
}

// ============ Decision ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub is_phishing: bool,
    pub confidence: f64,
    pub explanation: Vec<AttributionToken>,
}

// ============ Analysis Response ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub is_phishing: bool,
    pub confidence: f64,
    pub language: String,
    pub explanation: Vec<AttributionToken>,
}

impl AnalysisResponse {
    pub fn from_decision(decision: Decision, language: impl Into<String>) -> Self {
        Self {
            is_phishing: decision.is_phishing,
            confidence: round4(decision.confidence),
            language: language.into(),
            explanation: decision.explanation,
        }
    }
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
