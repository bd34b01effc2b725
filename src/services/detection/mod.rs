// Detection Module
// Decision core organized into specialized submodules:
// - ensemble: Weighted soft vote over classification models
// - aggregation: Merges text/link votes and derives the base decision
// - refinement: Downgrade-only heuristic cascade
// - explainer: Per-model attribution strategies and their cache
// - attribution: Averages attributions into the final explanation

pub mod ensemble;
pub mod aggregation;
pub mod refinement;
pub mod explainer;
pub mod attribution;

pub use ensemble::{model_input, positive_probability, vote};
pub use aggregation::{derive_base_decision, merge_domain_votes};
pub use refinement::{
    apply_gray_band_rule,
    apply_money_only_rule,
    consensus_adjustment,
    is_money_token,
    refine,
};
pub use explainer::{
    AttributionError,
    AttributionOutput,
    Explainer,
    ExplainerCache,
    ExplainerKey,
    LinearExplainer,
    MaskingExplainer,
};
pub use attribution::{
    filter_sensitive,
    fuzzy_reverse_lookup,
    rank_features,
    AttributionAggregator,
    ReverseMapping,
    NO_ATTRIBUTION,
    NO_MEANINGFUL_WORDS,
};
