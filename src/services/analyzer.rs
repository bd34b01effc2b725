// Phishing Analyzer
// End-to-end pipeline: redact, detect language, strip banners, translate,
// clean, vectorize, vote, explain, refine.

use ndarray::Array2;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use super::classifier::{load_models, ModelHandle};
use super::config_store::AppConfig;
use super::detection::aggregation::{derive_base_decision, merge_domain_votes};
use super::detection::attribution::{AttributionAggregator, ReverseMapping, NO_ATTRIBUTION};
use super::detection::ensemble::vote;
use super::detection::refinement::refine;
use super::html_extract::extract_document;
use super::providers::{
    HeuristicLanguageDetector, LanguageDetector, LibreTranslateClient, ProviderError, Translator,
    Unavailable,
};
use super::redaction::redact_contacts;
use super::text_processor::TextNormalizer;
use super::vectorizer::{LinkVectorizer, TfidfVectorizer, VectorizeError, Vectorizer};
use crate::models::{AnalysisResponse, AttributionToken, Decision};

const UNKNOWN_LANGUAGE: &str = "unknown";

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("vectorization failed: {0}")]
    Vectorize(#[from] VectorizeError),
    #[error("no text models could be loaded")]
    NoTextModels,
    #[error("invalid banner pattern: {0}")]
    BannerPattern(#[from] regex::Error),
    #[error("language service setup failed: {0}")]
    Provider(#[from] ProviderError),
}

pub struct PhishingAnalyzer {
    config: AppConfig,
    normalizer: TextNormalizer,
    text_vectorizer: Box<dyn Vectorizer>,
    link_vectorizer: LinkVectorizer,
    text_models: Vec<ModelHandle>,
    link_models: Vec<ModelHandle>,
    attribution: AttributionAggregator,
    translator: Arc<dyn Translator>,
    detector: Arc<dyn LanguageDetector>,
}

impl PhishingAnalyzer {
    /// Load vectorizer and model registries from `config.models.modelDir`.
    /// The language services come from `config.language`; without an endpoint
    /// translation is disabled and detection uses the local heuristic.
    pub fn from_config(config: AppConfig) -> Result<Self, AnalyzeError> {
        let model_dir = config.models.model_dir.clone();
        let text_vectorizer = TfidfVectorizer::load(&model_dir.join(&config.models.text_vectorizer))?;
        let text_models = load_models(&config.models.text, &model_dir);
        let link_models = load_models(&config.models.link, &model_dir);

        let (translator, detector): (Arc<dyn Translator>, Arc<dyn LanguageDetector>) =
            match LibreTranslateClient::from_config(&config.language)? {
                Some(client) => {
                    let client = Arc::new(client);
                    let translator: Arc<dyn Translator> = client.clone();
                    let detector: Arc<dyn LanguageDetector> = client;
                    (translator, detector)
                }
                None => {
                    info!("[ANALYZER] no translation endpoint configured, using local language heuristic");
                    let translator: Arc<dyn Translator> = Arc::new(Unavailable);
                    let detector: Arc<dyn LanguageDetector> = Arc::new(HeuristicLanguageDetector);
                    (translator, detector)
                }
            };

        Ok(Self::new(config, Box::new(text_vectorizer), text_models, link_models)?
            .with_language_services(translator, detector))
    }

    /// Assemble from already-loaded parts. Fails only when no text model is
    /// available or the background sample cannot be vectorized.
    pub fn new(
        config: AppConfig,
        text_vectorizer: Box<dyn Vectorizer>,
        text_models: Vec<ModelHandle>,
        link_models: Vec<ModelHandle>,
    ) -> Result<Self, AnalyzeError> {
        if text_models.is_empty() {
            return Err(AnalyzeError::NoTextModels);
        }
        let normalizer = TextNormalizer::from_config(&config.text)?;
        let background = build_background(&config, &normalizer, text_vectorizer.as_ref())?;
        info!(
            text_models = text_models.len(),
            link_models = link_models.len(),
            features = text_vectorizer.feature_names().len(),
            background_rows = background.nrows(),
            "[ANALYZER] ready"
        );

        Ok(Self {
            attribution: AttributionAggregator::new(background, config.explanation.clone()),
            config,
            normalizer,
            text_vectorizer,
            link_vectorizer: LinkVectorizer::default(),
            text_models,
            link_models,
            translator: Arc::new(Unavailable),
            detector: Arc::new(HeuristicLanguageDetector),
        })
    }

    pub fn with_language_services(
        mut self,
        translator: Arc<dyn Translator>,
        detector: Arc<dyn LanguageDetector>,
    ) -> Self {
        self.translator = translator;
        self.detector = detector;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn analyze_html(&self, html: &str) -> Result<AnalysisResponse, AnalyzeError> {
        let document = extract_document(html);
        self.analyze_document(&document.text, &document.links)
    }

    pub fn analyze_document(&self, text: &str, links: &[String]) -> Result<AnalysisResponse, AnalyzeError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("analyze", request_id = %request_id);
        let _enter = span.enter();

        let redacted = redact_contacts(text);
        let language = self.detect_language(&redacted);
        let stripped = self.normalizer.strip_banners(&redacted);
        let native = self.config.language.native.as_str();
        let model_text = self.to_native(&stripped, &language);
        let cleaned = self.normalizer.clean(&model_text);

        let text_batch = self.text_vectorizer.transform(&[cleaned.as_str()])?;
        let text_vote = vote(&self.text_models, &text_batch);
        let link_vote = if links.is_empty() || self.link_models.is_empty() {
            None
        } else {
            let urls: Vec<&str> = links.iter().map(String::as_str).collect();
            Some(vote(&self.link_models, &self.link_vectorizer.transform(&urls)?))
        };
        let ensemble = merge_domain_votes(text_vote, link_vote);
        let base_decision = derive_base_decision(&ensemble, self.config.decision.threshold);

        let mapping = ReverseMapping {
            translator: self.translator.as_ref(),
            source_text: &stripped,
            detected_language: &language,
            native_language: native,
        };
        let explanation = match text_batch.dense_row(0) {
            Some(sample) => self.attribution.explain(
                sample,
                self.text_vectorizer.feature_names(),
                &self.text_models,
                Some(&mapping),
            ),
            None => vec![AttributionToken::new(NO_ATTRIBUTION, 0.0)],
        };

        let is_phishing = refine(
            base_decision,
            ensemble.probability,
            &ensemble.per_model,
            &cleaned,
            &explanation,
            &self.config.decision,
        );

        info!(
            language = %language,
            links = links.len(),
            probability = ensemble.probability,
            base_decision,
            is_phishing,
            "[ANALYZER] document classified"
        );

        let decision = Decision {
            is_phishing,
            confidence: ensemble.probability,
            explanation,
        };
        Ok(AnalysisResponse::from_decision(decision, language))
    }

    fn detect_language(&self, redacted: &str) -> String {
        match self.detector.detect(redacted) {
            Ok(lang) => lang.trim().to_lowercase(),
            Err(e) => {
                warn!(error = %e, "[LANG] detection failed, treating language as unknown");
                UNKNOWN_LANGUAGE.to_string()
            }
        }
    }

    /// Translate into the models' language; on failure keep the original.
    fn to_native(&self, text: &str, language: &str) -> String {
        let native = self.config.language.native.as_str();
        if language == native || language == UNKNOWN_LANGUAGE || text.trim().is_empty() {
            return text.to_string();
        }
        match self.translator.translate(text, language, native) {
            Ok(translated) => translated,
            Err(e) => {
                warn!(error = %e, from = language, to = native, "[LANG] translation failed, using source text");
                text.to_string()
            }
        }
    }
}

/// Dense background sample for attribution, from the configured seed texts
fn build_background(
    config: &AppConfig,
    normalizer: &TextNormalizer,
    vectorizer: &dyn Vectorizer,
) -> Result<Array2<f64>, AnalyzeError> {
    let dim = vectorizer.feature_names().len();
    let texts: Vec<String> = config
        .explanation
        .background_texts
        .iter()
        .map(|t| normalizer.clean(t))
        .collect();
    if texts.is_empty() {
        return Ok(Array2::zeros((1, dim)));
    }
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    Ok(vectorizer.transform(&refs)?.dense().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InputForm;
    use crate::services::detection::ensemble::tests::FixedModel;
    use crate::services::providers::ServiceError;
    use crate::services::vectorizer::{FeatureBatch, Norm, TfidfArtifact};
    use std::collections::HashMap;
    use std::fs;

    const TERMS: [&str; 6] = ["account", "click", "suspended", "verify", "here", "compte"];

    fn vectorizer() -> TfidfVectorizer {
        let vocabulary: HashMap<String, usize> =
            TERMS.iter().enumerate().map(|(i, t)| (t.to_string(), i)).collect();
        TfidfVectorizer::from_artifact(TfidfArtifact {
            vocabulary,
            idf: vec![1.0; TERMS.len()],
            ngram_range: (1, 1),
            sublinear_tf: false,
            norm: Norm::L2,
        })
        .unwrap()
    }

    fn fixed(name: &str, p: f64, weight: f64) -> ModelHandle {
        ModelHandle::new(name, weight, InputForm::Sparse, Arc::new(FixedModel { p, dim: TERMS.len() }))
    }

    fn analyzer(models: Vec<ModelHandle>) -> PhishingAnalyzer {
        PhishingAnalyzer::new(AppConfig::default(), Box::new(vectorizer()), models, Vec::new()).unwrap()
    }

    struct EchoTranslator;

    impl Translator for EchoTranslator {
        fn translate(&self, _text: &str, _source: &str, _target: &str) -> Result<String, ServiceError> {
            Ok("your account has been suspended click here to verify".to_string())
        }
    }

    struct FailingVectorizer(Vec<String>);

    impl Vectorizer for FailingVectorizer {
        fn transform(&self, texts: &[&str]) -> Result<FeatureBatch, VectorizeError> {
            if texts.len() > 1 {
                return vectorizer().transform(texts);
            }
            Err(VectorizeError::InvalidArtifact("broken".to_string()))
        }

        fn feature_names(&self) -> &[String] {
            &self.0
        }
    }

    #[test]
    fn test_end_to_end_weighted_phishing() {
        let a = analyzer(vec![fixed("m1", 0.9, 1.0), fixed("m2", 0.95, 2.0)]);
        let resp = a
            .analyze_document("your account has been suspended, click here to verify", &[])
            .unwrap();
        assert!(resp.is_phishing);
        assert_eq!(resp.confidence, 0.9333);
        assert_eq!(resp.language, "en");
        assert!(!resp.explanation.is_empty());
    }

    #[test]
    fn test_low_probability_is_legitimate() {
        let a = analyzer(vec![fixed("m1", 0.1, 1.0), fixed("m2", 0.2, 1.0)]);
        let resp = a.analyze_document("thank you for your purchase", &[]).unwrap();
        assert!(!resp.is_phishing);
        assert_eq!(resp.confidence, 0.15);
    }

    #[test]
    fn test_links_merge_into_vote() {
        let link = ModelHandle::new("link", 2.0, InputForm::Dense, Arc::new(FixedModel { p: 0.0, dim: 6 }));
        let a = PhishingAnalyzer::new(
            AppConfig::default(),
            Box::new(vectorizer()),
            vec![fixed("m1", 0.9, 2.0)],
            vec![link],
        )
        .unwrap();
        let resp = a
            .analyze_document("verify your account", &["https://evil.example/login".to_string()])
            .unwrap();
        assert_eq!(resp.confidence, 0.45);
        assert!(!resp.is_phishing);
    }

    #[test]
    fn test_translation_and_detection_failures_degrade() {
        let a = analyzer(vec![fixed("m1", 0.9, 1.0)])
            .with_language_services(Arc::new(Unavailable), Arc::new(Unavailable));
        let resp = a.analyze_document("Votre compte est suspendu", &[]).unwrap();
        assert_eq!(resp.language, "unknown");

        let a = analyzer(vec![fixed("m1", 0.9, 1.0)]);
        let resp = a
            .analyze_document("Votre compte est suspendu, merci de cliquer sur le lien", &[])
            .unwrap();
        assert_eq!(resp.language, "fr");
        assert_eq!(resp.confidence, 0.9);
    }

    #[test]
    fn test_french_document_is_translated() {
        let a = analyzer(vec![fixed("m1", 0.9, 1.0)])
            .with_language_services(Arc::new(EchoTranslator), Arc::new(HeuristicLanguageDetector));
        let resp = a
            .analyze_document("Votre compte est suspendu, merci de cliquer sur le lien pour vérifier", &[])
            .unwrap();
        assert_eq!(resp.language, "fr");
        assert!(resp.is_phishing);
    }

    #[test]
    fn test_vectorizer_failure_is_request_error() {
        let names = TERMS.iter().map(|t| t.to_string()).collect();
        let a = PhishingAnalyzer::new(
            AppConfig::default(),
            Box::new(FailingVectorizer(names)),
            vec![fixed("m1", 0.9, 1.0)],
            Vec::new(),
        )
        .unwrap();
        assert!(matches!(
            a.analyze_document("anything", &[]),
            Err(AnalyzeError::Vectorize(_))
        ));
    }

    #[test]
    fn test_requires_text_models() {
        let result = PhishingAnalyzer::new(AppConfig::default(), Box::new(vectorizer()), Vec::new(), Vec::new());
        assert!(matches!(result, Err(AnalyzeError::NoTextModels)));
    }

    #[test]
    fn test_from_config_loads_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = serde_json::json!({
            "vocabulary": {"account": 0, "verify": 1},
            "idf": [1.0, 1.0]
        });
        fs::write(dir.path().join("email_vectorizer.json"), artifact.to_string()).unwrap();
        fs::write(
            dir.path().join("logistic_regression.json"),
            r#"{"type":"linear","estimator":{"coef":[3.0,3.0],"intercept":-1.0}}"#,
        )
        .unwrap();

        let mut config = AppConfig::default();
        config.models.model_dir = dir.path().to_path_buf();
        config.language.translate_url = None;
        let a = PhishingAnalyzer::from_config(config).unwrap();
        let resp = a
            .analyze_html("<html><body><p>Please verify your account</p><a href=\"https://x.test\">go</a></body></html>")
            .unwrap();
        assert!(resp.confidence > 0.5);
        assert_eq!(resp.explanation.len(), 2);
    }
}
