// Classification Models
// JSON-backed linear pipelines and tree ensembles, plus the registry loader.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::config_store::ModelEntry;
use super::vectorizer::ModelInput;
use crate::models::{InputForm, ModelKind};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to read model {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse model: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("feature dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("invalid model: {0}")]
    InvalidModel(String),
}

pub trait Classifier: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn n_features(&self) -> usize;

    /// `[P(negative), P(positive)]` for one row
    fn predict_proba(&self, input: ModelInput<'_>) -> Result<[f64; 2], ModelError>;

    /// The preprocessing pipeline and linear estimator, for linear models
    fn linear_stage(&self) -> Option<&LinearPipeline> {
        None
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn check_dim(expected: usize, found: usize) -> Result<(), ModelError> {
    if expected != found {
        return Err(ModelError::DimensionMismatch { expected, found });
    }
    Ok(())
}

// ============ Linear ============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineStep {
    StandardScaler { mean: Vec<f64>, scale: Vec<f64> },
    MaxAbsScaler { scale: Vec<f64> },
}

impl PipelineStep {
    fn width(&self) -> usize {
        match self {
            PipelineStep::StandardScaler { scale, .. } | PipelineStep::MaxAbsScaler { scale } => {
                scale.len()
            }
        }
    }

    fn apply(&self, x: &mut Array1<f64>) {
        let divide = |v: f64, s: f64| if s == 0.0 { v } else { v / s };
        match self {
            PipelineStep::StandardScaler { mean, scale } => {
                for (i, v) in x.iter_mut().enumerate() {
                    *v = divide(*v - mean[i], scale[i]);
                }
            }
            PipelineStep::MaxAbsScaler { scale } => {
                for (i, v) in x.iter_mut().enumerate() {
                    *v = divide(*v, scale[i]);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub coef: Vec<f64>,
    pub intercept: f64,
}

/// Preprocessing stages followed by a logistic estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearPipeline {
    #[serde(default)]
    pub steps: Vec<PipelineStep>,
    pub estimator: LogisticRegression,
}

impl LinearPipeline {
    fn validate(&self) -> Result<(), ModelError> {
        let dim = self.estimator.coef.len();
        if dim == 0 {
            return Err(ModelError::InvalidModel("linear model has no coefficients".to_string()));
        }
        for step in &self.steps {
            if let PipelineStep::StandardScaler { mean, scale } = step {
                check_dim(scale.len(), mean.len())?;
            }
            check_dim(dim, step.width())?;
        }
        Ok(())
    }

    pub fn coefficients(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(self.estimator.coef.as_slice())
    }

    /// Run one row through every preprocessing stage
    pub fn transform(&self, x: ArrayView1<f64>) -> Result<Array1<f64>, ModelError> {
        check_dim(self.estimator.coef.len(), x.len())?;
        let mut out = x.to_owned();
        for step in &self.steps {
            step.apply(&mut out);
        }
        Ok(out)
    }

    pub fn transform_rows(&self, rows: &Array2<f64>) -> Result<Array2<f64>, ModelError> {
        let mut out = Array2::zeros(rows.raw_dim());
        for (src, mut dst) in rows.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
            dst.assign(&self.transform(src)?);
        }
        Ok(out)
    }

    pub fn decision_function(&self, input: ModelInput<'_>) -> Result<f64, ModelError> {
        let coef = &self.estimator.coef;
        check_dim(coef.len(), input.dim())?;
        let dot = match input {
            // No preprocessing: only the stored entries contribute
            ModelInput::Sparse(v) if self.steps.is_empty() => {
                v.iter().map(|(i, val)| coef[i] * val).sum()
            }
            _ => {
                let x = self.transform(input.to_dense().view())?;
                self.coefficients().dot(&x)
            }
        };
        Ok(dot + self.estimator.intercept)
    }
}

impl Classifier for LinearPipeline {
    fn kind(&self) -> ModelKind {
        ModelKind::Linear
    }

    fn n_features(&self) -> usize {
        self.estimator.coef.len()
    }

    fn predict_proba(&self, input: ModelInput<'_>) -> Result<[f64; 2], ModelError> {
        let p = sigmoid(self.decision_function(input)?);
        Ok([1.0 - p, p])
    }

    fn linear_stage(&self) -> Option<&LinearPipeline> {
        Some(self)
    }
}

// ============ Trees ============

/// One decision tree in flat array form. `children_left[n] == -1` marks a leaf;
/// `value[n]` is the leaf output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub value: Vec<f64>,
}

impl Tree {
    fn validate(&self, n_features: usize) -> Result<(), ModelError> {
        let n = self.children_left.len();
        if n == 0 {
            return Err(ModelError::InvalidModel("empty tree".to_string()));
        }
        if [self.children_right.len(), self.feature.len(), self.threshold.len(), self.value.len()]
            .iter()
            .any(|&len| len != n)
        {
            return Err(ModelError::InvalidModel("tree arrays differ in length".to_string()));
        }
        for node in 0..n {
            if self.children_left[node] < 0 {
                continue;
            }
            let in_range = |c: i64| c > node as i64 && (c as usize) < n;
            if !in_range(self.children_left[node]) || !in_range(self.children_right[node]) {
                return Err(ModelError::InvalidModel(format!("bad children at node {}", node)));
            }
            let f = self.feature[node];
            if f < 0 || f as usize >= n_features {
                return Err(ModelError::InvalidModel(format!("bad feature {} at node {}", f, node)));
            }
        }
        Ok(())
    }

    /// Children always have larger indices than their parent, so descent terminates.
    pub fn leaf_value(&self, input: &ModelInput<'_>) -> f64 {
        let mut node = 0usize;
        while self.children_left[node] >= 0 {
            let x = input.get(self.feature[node] as usize);
            node = if x <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        self.value[node]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeOutput {
    /// Leaves hold P(positive); the forest averages them
    #[default]
    Average,
    /// Leaves hold raw scores; P(positive) = sigmoid(baseline + sum)
    Logistic { baseline: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeEnsemble {
    pub n_features: usize,
    pub trees: Vec<Tree>,
    #[serde(default)]
    pub output: TreeOutput,
}

impl TreeEnsemble {
    fn validate(&self) -> Result<(), ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::InvalidModel("ensemble has no trees".to_string()));
        }
        self.trees.iter().try_for_each(|t| t.validate(self.n_features))
    }
}

impl Classifier for TreeEnsemble {
    fn kind(&self) -> ModelKind {
        ModelKind::Tree
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, input: ModelInput<'_>) -> Result<[f64; 2], ModelError> {
        check_dim(self.n_features, input.dim())?;
        let total: f64 = self.trees.iter().map(|t| t.leaf_value(&input)).sum();
        let p = match self.output {
            TreeOutput::Average => (total / self.trees.len() as f64).clamp(0.0, 1.0),
            TreeOutput::Logistic { baseline } => sigmoid(baseline + total),
        };
        Ok([1.0 - p, p])
    }
}

// ============ Artifacts & Registry ============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelArtifact {
    Linear(LinearPipeline),
    Tree(TreeEnsemble),
}

impl ModelArtifact {
    pub fn into_classifier(self) -> Result<Arc<dyn Classifier>, ModelError> {
        match self {
            ModelArtifact::Linear(model) => {
                model.validate()?;
                Ok(Arc::new(model))
            }
            ModelArtifact::Tree(model) => {
                model.validate()?;
                Ok(Arc::new(model))
            }
        }
    }
}

pub fn load_model(path: &Path) -> Result<Arc<dyn Classifier>, ModelError> {
    let content = fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let artifact: ModelArtifact = serde_json::from_str(&content)?;
    artifact.into_classifier()
}

/// A loaded model with its ensemble metadata. Kind and input form are fixed
/// here and never re-derived.
#[derive(Clone)]
pub struct ModelHandle {
    pub name: String,
    pub kind: ModelKind,
    pub input: InputForm,
    pub weight: f64,
    pub model: Arc<dyn Classifier>,
}

impl ModelHandle {
    pub fn new(name: impl Into<String>, weight: f64, input: InputForm, model: Arc<dyn Classifier>) -> Self {
        Self {
            name: name.into(),
            kind: model.kind(),
            input,
            weight: weight.max(0.0),
            model,
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("input", &self.input)
            .field("weight", &self.weight)
            .finish()
    }
}

/// Load every registry entry that exists and parses; the rest are skipped.
pub fn load_models(registry: &BTreeMap<String, ModelEntry>, model_dir: &Path) -> Vec<ModelHandle> {
    let mut handles = Vec::with_capacity(registry.len());
    for (name, entry) in registry {
        let path = model_dir.join(&entry.path);
        if !path.exists() {
            warn!(model = %name, path = %path.display(), "[MODELS] model file missing, skipping");
            continue;
        }
        match load_model(&path) {
            Ok(model) => {
                if entry.weight < 0.0 {
                    warn!(model = %name, weight = entry.weight, "[MODELS] negative weight clamped to 0");
                }
                let handle = ModelHandle::new(name.clone(), entry.weight, entry.input, model);
                info!(
                    model = %name,
                    kind = handle.kind.as_str(),
                    weight = handle.weight,
                    features = handle.model.n_features(),
                    "[MODELS] loaded"
                );
                handles.push(handle);
            }
            Err(e) => {
                warn!(model = %name, path = %path.display(), error = %e, "[MODELS] failed to load, skipping");
            }
        }
    }
    handles
}
