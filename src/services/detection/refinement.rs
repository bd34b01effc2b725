// Decision Refinement
// Downgrade-only heuristics applied to the ensemble's base decision.
// Each stage may turn a positive into a negative, never the reverse.

use std::collections::BTreeMap;
use tracing::info;

use crate::models::AttributionToken;
use crate::services::config_store::DecisionConfig;

/// Per-model probability at or above which a model counts as agreeing
const MODEL_AGREEMENT: f64 = 0.5;
/// Explanation tokens inspected by the money-only rule
const MONEY_TOP_N: usize = 3;

/// Near the threshold, require at least `min_models` individual models to agree.
pub fn consensus_adjustment(
    decision: bool,
    probability: f64,
    per_model: &BTreeMap<String, f64>,
    threshold: f64,
    band: f64,
    min_models: usize,
) -> bool {
    if !decision {
        return false;
    }
    let in_band = probability >= threshold - band && probability <= threshold + band;
    if !in_band {
        return true;
    }
    let agreeing = per_model.values().filter(|p| **p >= MODEL_AGREEMENT).count();
    if agreeing < min_models {
        info!(probability, agreeing, min_models, "[REFINE] consensus not reached, downgraded");
        return false;
    }
    true
}

/// Moderate probabilities without any high-risk vocabulary are downgraded.
pub fn apply_gray_band_rule(
    decision: bool,
    probability: f64,
    text: &str,
    keywords: &[String],
    low: f64,
    high: f64,
) -> bool {
    if !decision || probability < low || probability >= high {
        return decision;
    }
    let lowered = text.to_lowercase();
    let has_risk_word = keywords.iter().any(|k| lowered.contains(&k.to_lowercase()));
    if !has_risk_word {
        info!(probability, "[REFINE] gray band without risk keywords, downgraded");
        return false;
    }
    true
}

pub fn is_money_token(word: &str, money_words: &[String], money_prefixes: &[String]) -> bool {
    let w = word.to_lowercase();
    money_words.iter().any(|m| m.to_lowercase() == w)
        || money_prefixes.iter().any(|p| w.starts_with(&p.to_lowercase()))
}

/// A decision carried only by currency mentions needs high confidence.
pub fn apply_money_only_rule(
    decision: bool,
    probability: f64,
    explanation: &[AttributionToken],
    money_words: &[String],
    money_prefixes: &[String],
    ceiling: f64,
) -> bool {
    if !decision || explanation.is_empty() || probability >= ceiling {
        return decision;
    }
    let money_only = explanation
        .iter()
        .take(MONEY_TOP_N)
        .all(|t| is_money_token(&t.word, money_words, money_prefixes));
    if money_only {
        info!(probability, "[REFINE] explanation is money-only, downgraded");
        return false;
    }
    true
}

/// Run the cascade in order: consensus, gray band, money-only.
pub fn refine(
    base_decision: bool,
    probability: f64,
    per_model: &BTreeMap<String, f64>,
    cleaned_text: &str,
    explanation: &[AttributionToken],
    config: &DecisionConfig,
) -> bool {
    let decision = consensus_adjustment(
        base_decision,
        probability,
        per_model,
        config.threshold,
        config.consensus_band,
        config.min_consensus_models,
    );
    let decision = apply_gray_band_rule(
        decision,
        probability,
        cleaned_text,
        &config.high_risk_keywords,
        config.gray_band_low,
        config.gray_band_high,
    );
    apply_money_only_rule(
        decision,
        probability,
        explanation,
        &config.money_words,
        &config.money_prefixes,
        config.money_only_ceiling,
    )
}
