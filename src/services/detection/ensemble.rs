// Ensemble Voting
// Weighted vote over classification models for one feature batch

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::models::{EnsembleResult, InputForm};
use crate::services::classifier::{ModelError, ModelHandle};
use crate::services::vectorizer::{FeatureBatch, ModelInput};

/// Row `row` of the batch in the form this model consumes
pub fn model_input<'a>(handle: &ModelHandle, batch: &'a FeatureBatch, row: usize) -> Option<ModelInput<'a>> {
    match handle.input {
        InputForm::Sparse => batch.sparse_row(row).map(ModelInput::Sparse),
        InputForm::Dense => batch.dense_row(row).map(ModelInput::Dense),
    }
}

/// P(positive) for one model, read from the first row. A link batch holds one
/// row per link in document order, so the first link decides.
pub fn positive_probability(handle: &ModelHandle, batch: &FeatureBatch) -> Result<f64, ModelError> {
    let input = model_input(handle, batch, 0)
        .ok_or_else(|| ModelError::InvalidModel("empty feature batch".to_string()))?;
    Ok(handle.model.predict_proba(input)?[1])
}

/// Weighted soft vote. Models that fail to predict are left out of both the
/// score and the weight. An empty set yields probability 0.0.
pub fn vote(models: &[ModelHandle], batch: &FeatureBatch) -> EnsembleResult {
    let mut per_model = BTreeMap::new();
    let mut vote_score = 0.0;
    let mut total_weight = 0.0;

    for handle in models {
        match positive_probability(handle, batch) {
            Ok(p) => {
                debug!(model = %handle.name, probability = p, weight = handle.weight, "[ENSEMBLE] model vote");
                vote_score += p * handle.weight;
                total_weight += handle.weight;
                per_model.insert(handle.name.clone(), p);
            }
            Err(e) => {
                warn!(model = %handle.name, error = %e, "[ENSEMBLE] prediction failed, model skipped");
            }
        }
    }

    EnsembleResult::from_parts(per_model, vote_score, total_weight)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ModelKind;
    use crate::services::classifier::Classifier;
    use crate::services::vectorizer::SparseVector;
    use ndarray::Array2;
    use std::sync::Arc;

    /// Returns a fixed probability regardless of input
    pub(crate) struct FixedModel {
        pub p: f64,
        pub dim: usize,
    }

    impl Classifier for FixedModel {
        fn kind(&self) -> ModelKind {
            ModelKind::Tree
        }

        fn n_features(&self) -> usize {
            self.dim
        }

        fn predict_proba(&self, input: ModelInput<'_>) -> Result<[f64; 2], ModelError> {
            if input.dim() != self.dim {
                return Err(ModelError::DimensionMismatch { expected: self.dim, found: input.dim() });
            }
            Ok([1.0 - self.p, self.p])
        }
    }

    /// P(positive) equals the first feature
    struct FirstFeature;

    impl Classifier for FirstFeature {
        fn kind(&self) -> ModelKind {
            ModelKind::Tree
        }

        fn n_features(&self) -> usize {
            2
        }

        fn predict_proba(&self, input: ModelInput<'_>) -> Result<[f64; 2], ModelError> {
            let p = input.get(0);
            Ok([1.0 - p, p])
        }
    }

    pub(crate) fn fixed(name: &str, p: f64, weight: f64) -> ModelHandle {
        ModelHandle::new(name, weight, InputForm::Sparse, Arc::new(FixedModel { p, dim: 2 }))
    }

    pub(crate) fn batch() -> FeatureBatch {
        FeatureBatch::from_sparse(2, vec![SparseVector::from_pairs(2, vec![(0, 1.0)])])
    }

    #[test]
    fn test_weighted_vote() {
        let result = vote(&[fixed("a", 0.9, 1.0), fixed("b", 0.95, 2.0)], &batch());
        assert!((result.probability - 2.8 / 3.0).abs() < 1e-12);
        assert!((result.vote_score - 2.8).abs() < 1e-12);
        assert_eq!(result.total_weight, 3.0);
        assert_eq!(result.per_model["b"], 0.95);
    }

    #[test]
    fn test_empty_model_set() {
        let result = vote(&[], &batch());
        assert_eq!(result.probability, 0.0);
        assert!(result.per_model.is_empty());
    }

    #[test]
    fn test_vote_is_order_independent() {
        let models = vec![fixed("a", 0.2, 1.5), fixed("b", 0.7, 2.5), fixed("c", 0.4, 1.0)];
        let mut reversed = models.clone();
        reversed.reverse();
        let x = vote(&models, &batch());
        let y = vote(&reversed, &batch());
        assert!((x.probability - y.probability).abs() < 1e-12);
        assert_eq!(x.per_model, y.per_model);
    }

    #[test]
    fn test_failing_model_is_skipped() {
        let broken = ModelHandle::new("broken", 5.0, InputForm::Sparse, Arc::new(FixedModel { p: 1.0, dim: 7 }));
        let result = vote(&[fixed("a", 0.3, 1.0), broken], &batch());
        assert_eq!(result.total_weight, 1.0);
        assert!(!result.per_model.contains_key("broken"));
    }

    #[test]
    fn test_dense_input_form_reads_first_row() {
        let dense = Array2::from_shape_vec((3, 2), vec![0.1, 0.0, 0.9, 1.0, 0.5, 0.0]).unwrap();
        let links = FeatureBatch::from_dense(dense);
        let handle = ModelHandle::new("first", 1.0, InputForm::Dense, Arc::new(FirstFeature));
        assert!((positive_probability(&handle, &links).unwrap() - 0.1).abs() < 1e-12);
        assert!((vote(&[handle], &links).probability - 0.1).abs() < 1e-12);
    }
}
