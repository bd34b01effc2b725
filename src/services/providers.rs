// External Language Services
// Translation and language detection behind traits, with a LibreTranslate
// client and a local heuristic detector.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use super::config_store::LanguageConfig;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Missing content in response")]
    MissingContent,
    #[error("JSON parse error: {0}")]
    JsonError(String),
    #[error("service not configured")]
    NotConfigured,
}

/// Best-effort failures surfaced to the pipeline, kept distinct for logging.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("translation unavailable: {0}")]
    TranslationUnavailable(String),
    #[error("language detection unavailable: {0}")]
    DetectionUnavailable(String),
}

pub trait Translator: Send + Sync {
    fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, ServiceError>;
}

pub trait LanguageDetector: Send + Sync {
    /// ISO 639-1 code of the dominant language
    fn detect(&self, text: &str) -> Result<String, ServiceError>;
}

/// Stand-in when no service is configured; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

impl Translator for Unavailable {
    fn translate(&self, _text: &str, _source: &str, _target: &str) -> Result<String, ServiceError> {
        Err(ServiceError::TranslationUnavailable(ProviderError::NotConfigured.to_string()))
    }
}

impl LanguageDetector for Unavailable {
    fn detect(&self, _text: &str) -> Result<String, ServiceError> {
        Err(ServiceError::DetectionUnavailable(ProviderError::NotConfigured.to_string()))
    }
}

// ============ LibreTranslate ============

#[derive(Debug, Clone, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    translated_text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct DetectRequest<'a> {
    q: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct DetectCandidate {
    language: String,
    #[serde(default)]
    confidence: f64,
}

pub struct LibreTranslateClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl LibreTranslateClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Build from config; `PHISHLENS_TRANSLATE_URL` / `PHISHLENS_TRANSLATE_API_KEY`
    /// override the file values. Returns `None` when no endpoint is known.
    pub fn from_config(config: &LanguageConfig) -> Result<Option<Self>, ProviderError> {
        let url = env::var("PHISHLENS_TRANSLATE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| config.translate_url.clone());
        let Some(url) = url else {
            return Ok(None);
        };
        let api_key = env::var("PHISHLENS_TRANSLATE_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| config.api_key.clone());

        Self::new(&url, api_key, Duration::from_secs(config.timeout_secs)).map(Some)
    }

    fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let start = Instant::now();

        let response = self.client.post(&url).json(body).send()?;
        let status = response.status();
        debug!(
            url = %url,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as i64,
            "[LANG_SERVICE] response"
        );

        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .map_err(|e| ProviderError::JsonError(e.to_string()))
    }

    pub fn translate_text(&self, text: &str, source: &str, target: &str) -> Result<String, ProviderError> {
        let request = TranslateRequest {
            q: text,
            source,
            target,
            format: "text",
            api_key: self.api_key.as_deref(),
        };
        let data: TranslateResponse = self.post("/translate", &request)?;
        data.translated_text.ok_or(ProviderError::MissingContent)
    }

    pub fn detect_language(&self, text: &str) -> Result<String, ProviderError> {
        let request = DetectRequest {
            q: text,
            api_key: self.api_key.as_deref(),
        };
        let candidates: Vec<DetectCandidate> = self.post("/detect", &request)?;
        best_candidate(candidates).ok_or(ProviderError::MissingContent)
    }
}

fn best_candidate(candidates: Vec<DetectCandidate>) -> Option<String> {
    candidates
        .into_iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .map(|c| c.language)
}

impl Translator for LibreTranslateClient {
    fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, ServiceError> {
        self.translate_text(text, source, target)
            .map_err(|e| ServiceError::TranslationUnavailable(e.to_string()))
    }
}

impl LanguageDetector for LibreTranslateClient {
    fn detect(&self, text: &str) -> Result<String, ServiceError> {
        self.detect_language(text)
            .map_err(|e| ServiceError::DetectionUnavailable(e.to_string()))
    }
}

// ============ Local heuristic ============

const FRENCH_MARKERS: &[&str] = &[
    "le", "la", "les", "des", "une", "est", "et", "pour", "vous", "votre", "vos", "dans", "avec",
    "sur", "pas", "qui", "que", "au", "aux", "du", "nous", "ce", "cette", "merci",
];

const ENGLISH_MARKERS: &[&str] = &[
    "the", "and", "is", "are", "you", "your", "for", "with", "this", "that", "to", "of", "in",
    "on", "we", "our", "please", "have", "has", "be", "not", "from", "here",
];

/// Function-word vote between French and English. Fails on text with no
/// recognisable words so the caller falls back to "unknown".
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicLanguageDetector;

impl LanguageDetector for HeuristicLanguageDetector {
    fn detect(&self, text: &str) -> Result<String, ServiceError> {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphabetic())
            .filter(|w| !w.is_empty())
            .collect();

        let french = words.iter().filter(|w| FRENCH_MARKERS.contains(*w)).count();
        let english = words.iter().filter(|w| ENGLISH_MARKERS.contains(*w)).count();
        let accented = lowered.chars().filter(|c| "àâçéèêëîïôûùüÿœ".contains(*c)).count();

        let french_score = french as f64 + accented as f64 * 0.5;
        let english_score = english as f64;

        if french_score == 0.0 && english_score == 0.0 {
            return Err(ServiceError::DetectionUnavailable(
                "no language markers found".to_string(),
            ));
        }
        if french_score > english_score {
            Ok("fr".to_string())
        } else {
            Ok("en".to_string())
        }
    }
}
