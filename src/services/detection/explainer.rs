// Attribution Explainers
// Per-model feature attributions: closed form for linear pipelines,
// permutation masking against a background sample for trees.

use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::models::ModelKind;
use crate::services::classifier::{Classifier, LinearPipeline, ModelError, ModelHandle};
use crate::services::vectorizer::ModelInput;

#[derive(Error, Debug)]
pub enum AttributionError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("attribution dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("background sample is empty")]
    EmptyBackground,
    #[error("model '{0}' is tagged linear but has no linear stage")]
    NotLinear(String),
}

/// Raw explainer output: one value per feature, or features x classes.
#[derive(Debug, Clone)]
pub enum AttributionOutput {
    PerFeature(Array1<f64>),
    PerClass(Array2<f64>),
}

impl AttributionOutput {
    /// Attribution toward the positive class
    pub fn positive_class(self) -> Array1<f64> {
        match self {
            AttributionOutput::PerFeature(row) => row,
            AttributionOutput::PerClass(matrix) => {
                let col = if matrix.ncols() > 1 { 1 } else { 0 };
                matrix.column(col).to_owned()
            }
        }
    }
}

// ============ Linear ============

/// phi_i = coef_i * (t(x)_i - mean_i), with t the preprocessing pipeline and
/// mean taken over the transformed background.
#[derive(Debug, Clone)]
pub struct LinearExplainer {
    pipeline: LinearPipeline,
    background_mean: Array1<f64>,
}

impl LinearExplainer {
    pub fn new(pipeline: &LinearPipeline, background: &Array2<f64>) -> Result<Self, AttributionError> {
        let transformed = pipeline.transform_rows(background)?;
        let background_mean = transformed
            .mean_axis(Axis(0))
            .ok_or(AttributionError::EmptyBackground)?;
        Ok(Self {
            pipeline: pipeline.clone(),
            background_mean,
        })
    }

    pub fn explain(&self, x: ArrayView1<f64>) -> Result<AttributionOutput, AttributionError> {
        let transformed = self.pipeline.transform(x)?;
        let phi = &self.pipeline.coefficients() * &(&transformed - &self.background_mean);
        Ok(AttributionOutput::PerFeature(phi))
    }
}

// ============ Masking ============

/// Model-agnostic attribution: for each background row, features are switched
/// from background to sample value one at a time (forward, then reverse
/// order) and each switch is credited with the change in prediction.
pub struct MaskingExplainer {
    model: Arc<dyn Classifier>,
    background: Array2<f64>,
}

impl MaskingExplainer {
    pub fn new(model: Arc<dyn Classifier>, background: &Array2<f64>, max_rows: usize) -> Result<Self, AttributionError> {
        let rows = background.nrows().min(max_rows.max(1));
        if rows == 0 {
            return Err(AttributionError::EmptyBackground);
        }
        Ok(Self {
            model,
            background: background.slice(s![..rows, ..]).to_owned(),
        })
    }

    fn predict(&self, z: &Array1<f64>) -> Result<[f64; 2], ModelError> {
        self.model.predict_proba(ModelInput::Dense(z.view()))
    }

    fn walk(
        &self,
        base: ArrayView1<f64>,
        x: ArrayView1<f64>,
        order: impl Iterator<Item = usize>,
        phi: &mut Array2<f64>,
    ) -> Result<(), ModelError> {
        let mut z = base.to_owned();
        let mut prev = self.predict(&z)?;
        for i in order {
            z[i] = x[i];
            let next = self.predict(&z)?;
            phi[[i, 0]] += next[0] - prev[0];
            phi[[i, 1]] += next[1] - prev[1];
            prev = next;
        }
        Ok(())
    }

    pub fn explain(&self, x: ArrayView1<f64>) -> Result<AttributionOutput, AttributionError> {
        let dim = self.background.ncols();
        if x.len() != dim {
            return Err(AttributionError::DimensionMismatch { expected: dim, found: x.len() });
        }

        let mut phi = Array2::zeros((dim, 2));
        for base in self.background.rows() {
            let changed: Vec<usize> = (0..dim).filter(|&i| base[i] != x[i]).collect();
            self.walk(base, x, changed.iter().copied(), &mut phi)?;
            self.walk(base, x, changed.iter().rev().copied(), &mut phi)?;
        }
        phi /= (2 * self.background.nrows()) as f64;
        Ok(AttributionOutput::PerClass(phi))
    }
}

// ============ Dispatch & Cache ============

pub enum Explainer {
    Linear(LinearExplainer),
    Masking(MaskingExplainer),
}

impl Explainer {
    /// Strategy follows the handle's kind tag
    pub fn build(handle: &ModelHandle, background: &Array2<f64>, max_rows: usize) -> Result<Self, AttributionError> {
        let expected = handle.model.n_features();
        if background.ncols() != expected {
            return Err(AttributionError::DimensionMismatch { expected, found: background.ncols() });
        }
        match handle.kind {
            ModelKind::Linear => {
                let pipeline = handle
                    .model
                    .linear_stage()
                    .ok_or_else(|| AttributionError::NotLinear(handle.name.clone()))?;
                Ok(Explainer::Linear(LinearExplainer::new(pipeline, background)?))
            }
            ModelKind::Tree => Ok(Explainer::Masking(MaskingExplainer::new(
                handle.model.clone(),
                background,
                max_rows,
            )?)),
        }
    }

    pub fn explain(&self, x: ArrayView1<f64>) -> Result<AttributionOutput, AttributionError> {
        match self {
            Explainer::Linear(e) => e.explain(x),
            Explainer::Masking(e) => e.explain(x),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExplainerKey {
    pub kind: ModelKind,
    pub model: String,
    /// Background width; only linear explainers depend on it
    pub dimension: Option<usize>,
}

impl ExplainerKey {
    pub fn for_model(handle: &ModelHandle, background: &Array2<f64>) -> Self {
        let dimension = match handle.kind {
            ModelKind::Linear => Some(background.ncols()),
            ModelKind::Tree => None,
        };
        Self {
            kind: handle.kind,
            model: handle.name.clone(),
            dimension,
        }
    }
}

type Slot = Arc<OnceCell<Arc<Explainer>>>;

/// Process-wide, append-only explainer cache. Each key is built at most once;
/// concurrent callers for the same key wait on that key only.
#[derive(Default)]
pub struct ExplainerCache {
    slots: Mutex<HashMap<ExplainerKey, Slot>>,
}

impl ExplainerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &self,
        handle: &ModelHandle,
        background: &Array2<f64>,
        max_rows: usize,
    ) -> Result<Arc<Explainer>, AttributionError> {
        let key = ExplainerKey::for_model(handle, background);
        let slot = self.slots.lock().entry(key).or_default().clone();
        slot.get_or_try_init(|| {
            debug!(model = %handle.name, kind = handle.kind.as_str(), "[ATTRIBUTION] building explainer");
            Explainer::build(handle, background, max_rows).map(Arc::new)
        })
        .map(Arc::clone)
    }

    /// Number of explainers built so far
    pub fn len(&self) -> usize {
        self.slots.lock().values().filter(|slot| slot.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InputForm;
    use crate::services::classifier::{LogisticRegression, Tree, TreeEnsemble, TreeOutput};
    use ndarray::array;

    fn linear_handle() -> ModelHandle {
        let model = LinearPipeline {
            steps: Vec::new(),
            estimator: LogisticRegression { coef: vec![2.0, -1.0, 0.5], intercept: 0.0 },
        };
        ModelHandle::new("lr", 1.0, InputForm::Sparse, Arc::new(model))
    }

    fn tree_handle() -> ModelHandle {
        // P = 0.9 when feature 1 > 0.5, else 0.1
        let tree = Tree {
            children_left: vec![1, -1, -1],
            children_right: vec![2, -1, -1],
            feature: vec![1, -2, -2],
            threshold: vec![0.5, 0.0, 0.0],
            value: vec![0.0, 0.1, 0.9],
        };
        let model = TreeEnsemble { n_features: 3, trees: vec![tree], output: TreeOutput::Average };
        ModelHandle::new("rf", 1.0, InputForm::Sparse, Arc::new(model))
    }

    fn background() -> Array2<f64> {
        array![[0.0, 0.0, 0.0], [1.0, 0.0, 2.0]]
    }

    #[test]
    fn test_linear_attribution_closed_form() {
        let explainer = Explainer::build(&linear_handle(), &background(), 100).unwrap();
        let phi = explainer.explain(array![1.0, 1.0, 1.0].view()).unwrap().positive_class();
        // mean = [0.5, 0, 1]
        assert_eq!(phi.to_vec(), vec![1.0, -1.0, 0.0]);
    }

    #[test]
    fn test_masking_credits_the_deciding_feature() {
        let explainer = Explainer::build(&tree_handle(), &background(), 100).unwrap();
        let out = explainer.explain(array![0.0, 1.0, 0.0].view()).unwrap();
        let phi = out.positive_class();
        assert!((phi[1] - 0.8).abs() < 1e-12);
        assert!(phi[0].abs() < 1e-12);
        assert!(phi[2].abs() < 1e-12);
    }

    #[test]
    fn test_masking_sums_to_prediction_gap() {
        let explainer = Explainer::build(&tree_handle(), &background(), 100).unwrap();
        let AttributionOutput::PerClass(phi) = explainer.explain(array![1.0, 1.0, 3.0].view()).unwrap() else {
            panic!("masking explainer returns per-class output");
        };
        assert!((phi.column(1).sum() - 0.8).abs() < 1e-12);
        assert!((phi.column(0).sum() + 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_positive_class_slice() {
        let two = AttributionOutput::PerClass(array![[0.1, 0.9], [0.2, 0.8]]);
        assert_eq!(two.positive_class().to_vec(), vec![0.9, 0.8]);
        let one = AttributionOutput::PerClass(array![[0.3], [0.4]]);
        assert_eq!(one.positive_class().to_vec(), vec![0.3, 0.4]);
    }

    #[test]
    fn test_build_rejects_wrong_width() {
        let narrow = array![[0.0, 1.0]];
        assert!(matches!(
            Explainer::build(&linear_handle(), &narrow, 100),
            Err(AttributionError::DimensionMismatch { expected: 3, found: 2 })
        ));
    }

    #[test]
    fn test_cache_builds_once_per_key() {
        let cache = ExplainerCache::new();
        let bg = background();
        let handle = linear_handle();
        let a = cache.get_or_build(&handle, &bg, 100).unwrap();
        let b = cache.get_or_build(&handle, &bg, 100).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        cache.get_or_build(&tree_handle(), &bg, 100).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cache_concurrent_first_use() {
        let cache = Arc::new(ExplainerCache::new());
        let bg = Arc::new(background());
        let handle = tree_handle();
        let built: Vec<Arc<Explainer>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    let (cache, bg, handle) = (cache.clone(), bg.clone(), handle.clone());
                    scope.spawn(move || cache.get_or_build(&handle, &bg, 100).unwrap())
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        assert!(built.iter().all(|e| Arc::ptr_eq(e, &built[0])));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let cache = ExplainerCache::new();
        let narrow = array![[0.0, 1.0]];
        assert!(cache.get_or_build(&linear_handle(), &narrow, 100).is_err());
        assert!(cache.is_empty());
    }
}
