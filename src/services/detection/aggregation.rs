// Aggregation Logic
// Merges text and link ensembles and derives the base decision

use crate::models::EnsembleResult;

/// Combine the text vote with the optional link vote. Raw scores and weights
/// are summed before dividing, so the heavier domain counts for more.
pub fn merge_domain_votes(text: EnsembleResult, link: Option<EnsembleResult>) -> EnsembleResult {
    match link {
        Some(link) => text.merge(link),
        None => text,
    }
}

/// Positive when the weighted score reaches `threshold` of the total weight.
/// Zero total weight is always negative.
pub fn derive_base_decision(result: &EnsembleResult, threshold: f64) -> bool {
    result.total_weight > 0.0 && result.vote_score >= threshold * result.total_weight
}
