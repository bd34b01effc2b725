// Attribution Aggregation
// Averages per-model attributions, picks the top contributors, maps them back
// to the source language and filters sensitive tokens.

use ndarray::{Array1, Array2, ArrayView1};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::explainer::{AttributionError, ExplainerCache};
use crate::models::AttributionToken;
use crate::services::classifier::ModelHandle;
use crate::services::config_store::ExplanationConfig;
use crate::services::providers::Translator;

/// Returned when no model produced an attribution
pub const NO_ATTRIBUTION: &str = "[no attribution]";
/// Returned when the document has no nonzero features
pub const NO_MEANINGFUL_WORDS: &str = "[no meaningful words]";

/// Recover the source-language word behind a model-space token.
///
/// The manual table is consulted before the translator. The guess is then
/// fuzzy-matched against the whitespace tokens of `source_text`; the best
/// match at or above `cutoff` wins, otherwise the guess itself is returned.
/// A failed translation returns `token` unchanged.
pub fn fuzzy_reverse_lookup(
    token: &str,
    source_text: &str,
    translator: &dyn Translator,
    native: &str,
    source_lang: &str,
    manual: &BTreeMap<String, String>,
    cutoff: f64,
) -> String {
    let guess = match manual.get(&token.to_lowercase()) {
        Some(word) => word.clone(),
        None => match translator.translate(token, native, source_lang) {
            Ok(translated) => translated,
            Err(e) => {
                debug!(token, error = %e, "[ATTRIBUTION] reverse translation failed");
                return token.to_string();
            }
        },
    };
    let guess = guess.trim().to_lowercase();
    if guess.is_empty() {
        return token.to_string();
    }

    let mut best: Option<(f64, String)> = None;
    for word in source_text.split_whitespace() {
        let candidate = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if candidate.is_empty() {
            continue;
        }
        let score = strsim::normalized_levenshtein(&guess, &candidate);
        if score >= cutoff && best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, candidate));
        }
    }

    best.map(|(_, word)| word).unwrap_or(guess)
}

/// Context for mapping tokens back into the document's own language
pub struct ReverseMapping<'a> {
    pub translator: &'a dyn Translator,
    pub source_text: &'a str,
    pub detected_language: &'a str,
    pub native_language: &'a str,
}

impl ReverseMapping<'_> {
    fn applies(&self) -> bool {
        !self.source_text.trim().is_empty()
            && self.detected_language != self.native_language
            && self.detected_language != "unknown"
    }
}

/// Drop tokens containing a sensitive substring, unless that would drop them all.
pub fn filter_sensitive(tokens: Vec<AttributionToken>, sensitive: &[String]) -> Vec<AttributionToken> {
    let kept: Vec<AttributionToken> = tokens
        .iter()
        .filter(|t| {
            let w = t.word.to_lowercase();
            !sensitive.iter().any(|s| w.contains(&s.to_lowercase()))
        })
        .cloned()
        .collect();
    if kept.is_empty() {
        tokens
    } else {
        kept
    }
}

/// Column indices with a nonzero sample value, by descending |impact|
pub fn rank_features(sample: ArrayView1<f64>, impacts: &Array1<f64>, top_k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..sample.len()).filter(|&i| sample[i] != 0.0).collect();
    idx.sort_by(|&a, &b| impacts[b].abs().total_cmp(&impacts[a].abs()).then(a.cmp(&b)));
    idx.truncate(top_k);
    idx
}

pub struct AttributionAggregator {
    cache: ExplainerCache,
    background: Array2<f64>,
    config: ExplanationConfig,
}

impl AttributionAggregator {
    pub fn new(background: Array2<f64>, config: ExplanationConfig) -> Self {
        Self {
            cache: ExplainerCache::new(),
            background,
            config,
        }
    }

    pub fn cache(&self) -> &ExplainerCache {
        &self.cache
    }

    fn attribution_row(&self, handle: &ModelHandle, sample: ArrayView1<f64>) -> Result<Array1<f64>, AttributionError> {
        let explainer = self
            .cache
            .get_or_build(handle, &self.background, self.config.max_background_rows)?;
        let row = explainer.explain(sample)?.positive_class();
        if row.len() != sample.len() {
            return Err(AttributionError::DimensionMismatch {
                expected: sample.len(),
                found: row.len(),
            });
        }
        Ok(row)
    }

    /// Ranked explanation for one dense sample row.
    pub fn explain(
        &self,
        sample: ArrayView1<f64>,
        feature_names: &[String],
        models: &[ModelHandle],
        reverse: Option<&ReverseMapping<'_>>,
    ) -> Vec<AttributionToken> {
        let mut sum = Array1::<f64>::zeros(sample.len());
        let mut succeeded = 0usize;
        for handle in models {
            match self.attribution_row(handle, sample) {
                Ok(row) => {
                    sum += &row;
                    succeeded += 1;
                }
                Err(e) => {
                    warn!(model = %handle.name, error = %e, "[ATTRIBUTION] model skipped");
                }
            }
        }

        if succeeded == 0 {
            return vec![AttributionToken::new(NO_ATTRIBUTION, 0.0)];
        }
        let mean = sum / succeeded as f64;

        let top = rank_features(sample, &mean, self.config.top_k);
        if top.is_empty() {
            return vec![AttributionToken::new(NO_MEANINGFUL_WORDS, 0.0)];
        }

        let mapping = reverse.filter(|r| r.applies());
        let tokens: Vec<AttributionToken> = top
            .into_iter()
            .map(|i| {
                let name = feature_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("feature_{}", i));
                let word = match mapping {
                    Some(r) => fuzzy_reverse_lookup(
                        &name,
                        r.source_text,
                        r.translator,
                        r.native_language,
                        r.detected_language,
                        &self.config.manual_translations,
                        self.config.fuzzy_cutoff,
                    ),
                    None => name,
                };
                AttributionToken::new(word, mean[i])
            })
            .collect();

        info!(models = succeeded, tokens = tokens.len(), "[ATTRIBUTION] explanation ready");
        filter_sensitive(tokens, &self.config.sensitive_substrings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InputForm;
    use crate::services::classifier::{LinearPipeline, LogisticRegression};
    use crate::services::detection::ensemble::tests::FixedModel;
    use crate::services::providers::{ServiceError, Unavailable};
    use ndarray::Array2;
    use std::sync::Arc;

    struct Dictionary(BTreeMap<&'static str, &'static str>);

    impl Translator for Dictionary {
        fn translate(&self, text: &str, _source: &str, _target: &str) -> Result<String, ServiceError> {
            self.0
                .get(text)
                .map(|s| s.to_string())
                .ok_or_else(|| ServiceError::TranslationUnavailable(format!("no entry for {}", text)))
        }
    }

    fn linear(dim: usize) -> ModelHandle {
        let coef = (0..dim).map(|i| (i + 1) as f64 * if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let model = LinearPipeline {
            steps: Vec::new(),
            estimator: LogisticRegression { coef, intercept: 0.0 },
        };
        ModelHandle::new("lr", 1.0, InputForm::Sparse, Arc::new(model))
    }

    fn names(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn aggregator(dim: usize) -> AttributionAggregator {
        AttributionAggregator::new(Array2::zeros((2, dim)), ExplanationConfig::default())
    }

    #[test]
    fn test_top_ten_cap() {
        let dim = 15;
        let sample = Array1::from_elem(dim, 1.0);
        let feature_names: Vec<String> = (0..dim).map(|i| format!("word{}", i)).collect();
        let out = aggregator(dim).explain(sample.view(), &feature_names, &[linear(dim)], None);
        assert_eq!(out.len(), 10);
        assert_eq!(out[0].word, "word14");
        assert!(out.windows(2).all(|w| w[0].impact.abs() >= w[1].impact.abs()));
    }

    #[test]
    fn test_zero_features_sentinel() {
        let sample = Array1::zeros(3);
        let out = aggregator(3).explain(sample.view(), &names(&["a", "b", "c"]), &[linear(3)], None);
        assert_eq!(out, vec![AttributionToken::new(NO_MEANINGFUL_WORDS, 0.0)]);
    }

    #[test]
    fn test_no_successful_model_sentinel() {
        let broken = ModelHandle::new("broken", 1.0, InputForm::Sparse, Arc::new(FixedModel { p: 0.5, dim: 9 }));
        let sample = Array1::from_elem(3, 1.0);
        let out = aggregator(3).explain(sample.view(), &names(&["a", "b", "c"]), &[broken], None);
        assert_eq!(out, vec![AttributionToken::new(NO_ATTRIBUTION, 0.0)]);
    }

    #[test]
    fn test_failed_model_does_not_block_others() {
        let broken = ModelHandle::new("broken", 1.0, InputForm::Sparse, Arc::new(FixedModel { p: 0.5, dim: 9 }));
        let sample = ndarray::array![1.0, 0.0, 1.0];
        let out = aggregator(3).explain(sample.view(), &names(&["verify", "b", "account"]), &[broken, linear(3)], None);
        let words: Vec<&str> = out.iter().map(|t| t.word.as_str()).collect();
        assert_eq!(words, vec!["account", "verify"]);
        assert_eq!(out[0].impact, 3.0);
    }

    #[test]
    fn test_sensitive_filter_falls_back_to_unfiltered() {
        let sensitive = names(&["gmail", "http"]);
        let all_bad = vec![AttributionToken::new("gmail", 0.5), AttributionToken::new("https", 0.2)];
        assert_eq!(filter_sensitive(all_bad.clone(), &sensitive), all_bad);

        let mixed = vec![AttributionToken::new("gmail", 0.5), AttributionToken::new("verify", 0.2)];
        let kept = filter_sensitive(mixed, &sensitive);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].word, "verify");
    }

    #[test]
    fn test_reverse_lookup_prefers_manual_table() {
        let manual = ExplanationConfig::default().manual_translations;
        let word = fuzzy_reverse_lookup("account", "Votre compte est bloqué.", &Unavailable, "en", "fr", &manual, 0.85);
        assert_eq!(word, "compte");
    }

    #[test]
    fn test_reverse_lookup_fuzzy_matches_source() {
        let translator = Dictionary(BTreeMap::from([("suspended", "suspendu")]));
        let word = fuzzy_reverse_lookup(
            "suspended",
            "Votre compte a été SUSPENDUE!",
            &translator,
            "en",
            "fr",
            &BTreeMap::new(),
            0.85,
        );
        assert_eq!(word, "suspendue");
    }

    #[test]
    fn test_reverse_lookup_keeps_guess_or_token() {
        let translator = Dictionary(BTreeMap::from([("urgent", "pressant")]));
        let none = BTreeMap::new();
        assert_eq!(fuzzy_reverse_lookup("urgent", "rien ici", &translator, "en", "fr", &none, 0.85), "pressant");
        assert_eq!(fuzzy_reverse_lookup("bank", "rien ici", &translator, "en", "fr", &none, 0.85), "bank");
    }

    #[test]
    fn test_explain_maps_tokens_back() {
        let translator = Dictionary(BTreeMap::from([("verify", "vérifier")]));
        let mapping = ReverseMapping {
            translator: &translator,
            source_text: "Merci de vérifier votre compte",
            detected_language: "fr",
            native_language: "en",
        };
        let sample = ndarray::array![1.0, 0.0, 1.0];
        let out = aggregator(3).explain(sample.view(), &names(&["verify", "b", "account"]), &[linear(3)], Some(&mapping));
        let words: Vec<&str> = out.iter().map(|t| t.word.as_str()).collect();
        assert_eq!(words, vec!["compte", "vérifier"]);
    }
}
