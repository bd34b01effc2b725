// Feature Vectorization
// Sparse/dense feature batches plus the text (TF-IDF) and link vectorizers.

use ndarray::{Array1, Array2, ArrayView1};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorizeError {
    #[error("failed to read vectorizer {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse vectorizer: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid vectorizer artifact: {0}")]
    InvalidArtifact(String),
    #[error("no documents to vectorize")]
    EmptyInput,
}

// ============ Feature Vectors ============

/// Sparse row with strictly increasing column indices.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseVector {
    dim: usize,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl SparseVector {
    /// Build from (column, value) pairs; zeros are dropped, duplicates summed.
    pub fn from_pairs(dim: usize, pairs: impl IntoIterator<Item = (usize, f64)>) -> Self {
        let mut acc: BTreeMap<usize, f64> = BTreeMap::new();
        for (idx, val) in pairs {
            if idx < dim {
                *acc.entry(idx).or_insert(0.0) += val;
            }
        }
        let (indices, values) = acc.into_iter().filter(|(_, v)| *v != 0.0).unzip();
        Self { dim, indices, values }
    }

    pub fn from_dense(row: ArrayView1<f64>) -> Self {
        Self::from_pairs(row.len(), row.iter().copied().enumerate())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn get(&self, idx: usize) -> f64 {
        match self.indices.binary_search(&idx) {
            Ok(pos) => self.values[pos],
            Err(_) => 0.0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    pub fn to_dense(&self) -> Array1<f64> {
        let mut out = Array1::zeros(self.dim);
        for (idx, val) in self.iter() {
            out[idx] = val;
        }
        out
    }
}

/// One feature row in the form a model asked for.
#[derive(Debug, Clone, Copy)]
pub enum ModelInput<'a> {
    Sparse(&'a SparseVector),
    Dense(ArrayView1<'a, f64>),
}

impl ModelInput<'_> {
    pub fn dim(&self) -> usize {
        match self {
            ModelInput::Sparse(v) => v.dim(),
            ModelInput::Dense(v) => v.len(),
        }
    }

    pub fn get(&self, idx: usize) -> f64 {
        match self {
            ModelInput::Sparse(v) => v.get(idx),
            ModelInput::Dense(v) => v.get(idx).copied().unwrap_or(0.0),
        }
    }

    pub fn to_dense(&self) -> Array1<f64> {
        match self {
            ModelInput::Sparse(v) => v.to_dense(),
            ModelInput::Dense(v) => v.to_owned(),
        }
    }
}

/// The same logical rows held both sparse (model-native) and dense
/// (attribution-native).
#[derive(Debug, Clone)]
pub struct FeatureBatch {
    sparse: Vec<SparseVector>,
    dense: Array2<f64>,
}

impl FeatureBatch {
    pub fn from_sparse(dim: usize, rows: Vec<SparseVector>) -> Self {
        let mut dense = Array2::zeros((rows.len(), dim));
        for (r, row) in rows.iter().enumerate() {
            for (idx, val) in row.iter() {
                dense[[r, idx]] = val;
            }
        }
        Self { sparse: rows, dense }
    }

    pub fn from_dense(dense: Array2<f64>) -> Self {
        let sparse = dense.rows().into_iter().map(SparseVector::from_dense).collect();
        Self { sparse, dense }
    }

    pub fn n_rows(&self) -> usize {
        self.sparse.len()
    }

    pub fn n_features(&self) -> usize {
        self.dense.ncols()
    }

    pub fn dense(&self) -> &Array2<f64> {
        &self.dense
    }

    pub fn sparse_row(&self, row: usize) -> Option<&SparseVector> {
        self.sparse.get(row)
    }

    pub fn dense_row(&self, row: usize) -> Option<ArrayView1<'_, f64>> {
        (row < self.dense.nrows()).then(|| self.dense.row(row))
    }
}

// ============ Vectorizers ============

pub trait Vectorizer: Send + Sync {
    fn transform(&self, texts: &[&str]) -> Result<FeatureBatch, VectorizeError>;

    /// Column names aligned index-for-index with the vectors
    fn feature_names(&self) -> &[String];
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w\w+\b").expect("token regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Norm {
    #[default]
    L2,
    None,
}

/// On-disk TF-IDF artifact: fixed vocabulary and idf weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TfidfArtifact {
    pub vocabulary: HashMap<String, usize>,
    pub idf: Vec<f64>,
    #[serde(default = "default_ngram_range")]
    pub ngram_range: (usize, usize),
    #[serde(default)]
    pub sublinear_tf: bool,
    #[serde(default)]
    pub norm: Norm,
}

fn default_ngram_range() -> (usize, usize) {
    (1, 1)
}

#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
    ngram_range: (usize, usize),
    sublinear_tf: bool,
    norm: Norm,
    feature_names: Vec<String>,
}

impl TfidfVectorizer {
    pub fn load(path: &Path) -> Result<Self, VectorizeError> {
        let content = fs::read_to_string(path).map_err(|source| VectorizeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_artifact(serde_json::from_str(&content)?)
    }

    pub fn from_artifact(artifact: TfidfArtifact) -> Result<Self, VectorizeError> {
        let dim = artifact.idf.len();
        if dim == 0 {
            return Err(VectorizeError::InvalidArtifact("empty vocabulary".to_string()));
        }
        if artifact.vocabulary.len() != dim {
            return Err(VectorizeError::InvalidArtifact(format!(
                "vocabulary has {} terms but idf has {} entries",
                artifact.vocabulary.len(),
                dim
            )));
        }
        let (lo, hi) = artifact.ngram_range;
        if lo == 0 || hi < lo {
            return Err(VectorizeError::InvalidArtifact(format!(
                "bad ngram range ({}, {})",
                lo, hi
            )));
        }

        let mut feature_names = vec![String::new(); dim];
        for (term, &idx) in &artifact.vocabulary {
            let slot = feature_names.get_mut(idx).ok_or_else(|| {
                VectorizeError::InvalidArtifact(format!("column {} out of range for '{}'", idx, term))
            })?;
            if !slot.is_empty() {
                return Err(VectorizeError::InvalidArtifact(format!("column {} assigned twice", idx)));
            }
            *slot = term.clone();
        }

        Ok(Self {
            vocabulary: artifact.vocabulary,
            idf: artifact.idf,
            ngram_range: artifact.ngram_range,
            sublinear_tf: artifact.sublinear_tf,
            norm: artifact.norm,
            feature_names,
        })
    }

    fn analyze(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = token_re().find_iter(&lowered).map(|m| m.as_str()).collect();
        let (lo, hi) = self.ngram_range;
        let mut terms = Vec::new();
        for n in lo..=hi {
            if n > words.len() {
                break;
            }
            for window in words.windows(n) {
                terms.push(window.join(" "));
            }
        }
        terms
    }

    fn vectorize_one(&self, text: &str) -> SparseVector {
        let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
        for term in self.analyze(text) {
            if let Some(&idx) = self.vocabulary.get(&term) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }

        let mut weighted: Vec<(usize, f64)> = counts
            .into_iter()
            .map(|(idx, tf)| {
                let tf = if self.sublinear_tf { tf.ln() + 1.0 } else { tf };
                (idx, tf * self.idf[idx])
            })
            .collect();

        if self.norm == Norm::L2 {
            let norm = weighted.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                for (_, v) in weighted.iter_mut() {
                    *v /= norm;
                }
            }
        }

        SparseVector::from_pairs(self.idf.len(), weighted)
    }
}

impl Vectorizer for TfidfVectorizer {
    fn transform(&self, texts: &[&str]) -> Result<FeatureBatch, VectorizeError> {
        if texts.is_empty() {
            return Err(VectorizeError::EmptyInput);
        }
        let rows = texts.iter().map(|t| self.vectorize_one(t)).collect();
        Ok(FeatureBatch::from_sparse(self.idf.len(), rows))
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }
}

// ============ Link Features ============

/// Columns in sorted-name order
pub const LINK_FEATURE_NAMES: [&str; 6] = [
    "domain_length",
    "is_https",
    "num_digits",
    "num_special",
    "path_length",
    "url_length",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UrlFeatures {
    pub url_length: usize,
    pub domain_length: usize,
    pub path_length: usize,
    pub num_digits: usize,
    pub num_special: usize,
    pub is_https: bool,
}

/// Raw URL components, sliced from the input without any normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UrlParts<'a> {
    pub scheme: &'a str,
    pub netloc: &'a str,
    pub path: &'a str,
}

impl<'a> UrlParts<'a> {
    /// `scheme:` only when the prefix is a valid scheme; `//netloc` runs up to
    /// the first `/`, `?` or `#`; path stops at the query or fragment.
    pub fn split(raw: &'a str) -> Self {
        let (scheme, rest) = match raw.find(':') {
            Some(i) if is_scheme(&raw[..i]) => (&raw[..i], &raw[i + 1..]),
            _ => ("", raw),
        };
        let (netloc, rest) = match rest.strip_prefix("//") {
            Some(after) => {
                let end = after.find(['/', '?', '#']).unwrap_or(after.len());
                (&after[..end], &after[end..])
            }
            None => ("", rest),
        };
        let path_end = rest.find(['?', '#']).unwrap_or(rest.len());
        Self {
            scheme,
            netloc,
            path: &rest[..path_end],
        }
    }
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    chars.next().map_or(false, |c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

impl UrlFeatures {
    pub fn extract(raw: &str) -> Self {
        let parts = UrlParts::split(raw);
        Self {
            url_length: raw.chars().count(),
            domain_length: parts.netloc.chars().count(),
            path_length: parts.path.chars().count(),
            num_digits: raw.chars().filter(|c| c.is_numeric()).count(),
            num_special: raw.chars().filter(|c| !c.is_alphanumeric()).count(),
            is_https: parts.scheme.eq_ignore_ascii_case("https"),
        }
    }

    fn as_row(&self) -> [f64; 6] {
        [
            self.domain_length as f64,
            if self.is_https { 1.0 } else { 0.0 },
            self.num_digits as f64,
            self.num_special as f64,
            self.path_length as f64,
            self.url_length as f64,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct LinkVectorizer {
    feature_names: Vec<String>,
}

impl Default for LinkVectorizer {
    fn default() -> Self {
        Self {
            feature_names: LINK_FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Vectorizer for LinkVectorizer {
    fn transform(&self, urls: &[&str]) -> Result<FeatureBatch, VectorizeError> {
        if urls.is_empty() {
            return Err(VectorizeError::EmptyInput);
        }
        let mut dense = Array2::zeros((urls.len(), LINK_FEATURE_NAMES.len()));
        for (r, url) in urls.iter().enumerate() {
            for (c, val) in UrlFeatures::extract(url).as_row().into_iter().enumerate() {
                dense[[r, c]] = val;
            }
        }
        Ok(FeatureBatch::from_dense(dense))
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> TfidfArtifact {
        TfidfArtifact {
            vocabulary: HashMap::from([
                ("account".to_string(), 0),
                ("click".to_string(), 1),
                ("money".to_string(), 2),
                ("verify".to_string(), 3),
                ("verify account".to_string(), 4),
            ]),
            idf: vec![1.0, 2.0, 1.5, 1.0, 3.0],
            ngram_range: (1, 2),
            sublinear_tf: false,
            norm: Norm::L2,
        }
    }

    #[test]
    fn test_sparse_and_dense_agree() {
        let v = SparseVector::from_pairs(5, vec![(3, 2.0), (1, 0.5), (3, 1.0), (2, 0.0)]);
        assert_eq!(v.nnz(), 2);
        assert_eq!(v.get(3), 3.0);
        assert_eq!(v.get(2), 0.0);
        let batch = FeatureBatch::from_sparse(5, vec![v.clone()]);
        assert_eq!(batch.dense_row(0).unwrap().to_vec(), v.to_dense().to_vec());
        assert_eq!(SparseVector::from_dense(batch.dense_row(0).unwrap()), v);
    }

    #[test]
    fn test_feature_names_follow_columns() {
        let vec = TfidfVectorizer::from_artifact(artifact()).unwrap();
        assert_eq!(vec.feature_names()[1], "click");
        assert_eq!(vec.feature_names()[4], "verify account");
    }

    #[test]
    fn test_transform_counts_ngrams_and_normalizes() {
        let vec = TfidfVectorizer::from_artifact(artifact()).unwrap();
        let batch = vec.transform(&["Verify account <MONEY>"]).unwrap();
        let row = batch.sparse_row(0).unwrap();
        assert_eq!(row.nnz(), 4);
        let norm: f64 = row.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
        assert!(row.get(4) > row.get(0));
        assert_eq!(row.get(1), 0.0);
    }

    #[test]
    fn test_rejects_inconsistent_artifact() {
        let mut bad = artifact();
        bad.idf.pop();
        assert!(TfidfVectorizer::from_artifact(bad).is_err());
    }

    #[test]
    fn test_empty_input_is_error() {
        let vec = TfidfVectorizer::from_artifact(artifact()).unwrap();
        assert!(matches!(vec.transform(&[]), Err(VectorizeError::EmptyInput)));
    }

    #[test]
    fn test_url_features() {
        let f = UrlFeatures::extract("https://example.com/path123");
        assert_eq!(f.url_length, 27);
        assert_eq!(f.domain_length, 11);
        assert_eq!(f.path_length, 8);
        assert_eq!(f.num_digits, 3);
        assert!(f.is_https);

        let upper = UrlFeatures::extract("HTTPS://UPPERCASE.com");
        assert!(upper.is_https);
        assert!(!UrlFeatures::extract("http://lowercase.com").is_https);
    }

    #[test]
    fn test_url_features_keep_port_and_handle_empty() {
        let f = UrlFeatures::extract("http://host.test:8080/a");
        assert_eq!(f.domain_length, "host.test:8080".len());
        assert_eq!(UrlFeatures::extract(""), UrlFeatures::default());
    }

    #[test]
    fn test_url_features_use_raw_components() {
        let bare = UrlFeatures::extract("https://example.com");
        assert_eq!(bare.domain_length, 11);
        assert_eq!(bare.path_length, 0);

        let f = UrlFeatures::extract("https://Example.com:443/a b");
        assert_eq!(f.domain_length, "Example.com:443".len());
        assert_eq!(f.path_length, "/a b".len());
        assert!(f.is_https);

        let q = UrlFeatures::extract("http://user@host.test/p?x=1#frag");
        assert_eq!(q.domain_length, "user@host.test".len());
        assert_eq!(q.path_length, 2);
    }

    #[test]
    fn test_url_parts_without_scheme() {
        assert_eq!(
            UrlParts::split("example.com/login?next=1"),
            UrlParts { scheme: "", netloc: "", path: "example.com/login" }
        );
        assert_eq!(
            UrlParts::split("//cdn.test/x"),
            UrlParts { scheme: "", netloc: "cdn.test", path: "/x" }
        );
        assert_eq!(UrlParts::split("1http://x").scheme, "");
    }

    #[test]
    fn test_link_vectorizer_rows() {
        let batch = LinkVectorizer::default()
            .transform(&["https://a.io/x", "http://b.io"])
            .unwrap();
        assert_eq!(batch.n_rows(), 2);
        assert_eq!(batch.n_features(), 6);
        assert_eq!(batch.dense()[[0, 1]], 1.0);
        assert_eq!(batch.dense()[[1, 1]], 0.0);
    }
}
