// Configuration Storage Service
// Handles config file read/write and version backup

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::InputForm;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub text: TextConfig,
    #[serde(default)]
    pub explanation: ExplanationConfig,
    #[serde(default)]
    pub language: LanguageConfig,
    #[serde(default)]
    pub models: ModelsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            decision: DecisionConfig::default(),
            text: TextConfig::default(),
            explanation: ExplanationConfig::default(),
            language: LanguageConfig::default(),
            models: ModelsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_consensus_band")]
    pub consensus_band: f64,
    #[serde(default = "default_min_consensus")]
    pub min_consensus_models: usize,
    #[serde(default = "default_gray_low")]
    pub gray_band_low: f64,
    #[serde(default = "default_gray_high")]
    pub gray_band_high: f64,
    #[serde(default = "default_money_ceiling")]
    pub money_only_ceiling: f64,
    #[serde(default = "default_high_risk_keywords")]
    pub high_risk_keywords: Vec<String>,
    #[serde(default = "default_money_words")]
    pub money_words: Vec<String>,
    #[serde(default = "default_money_prefixes")]
    pub money_prefixes: Vec<String>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            consensus_band: default_consensus_band(),
            min_consensus_models: default_min_consensus(),
            gray_band_low: default_gray_low(),
            gray_band_high: default_gray_high(),
            money_only_ceiling: default_money_ceiling(),
            high_risk_keywords: default_high_risk_keywords(),
            money_words: default_money_words(),
            money_prefixes: default_money_prefixes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextConfig {
    #[serde(default = "default_banner_patterns")]
    pub banner_patterns: Vec<String>,
    #[serde(default = "default_single_letter_whitelist")]
    pub single_letter_whitelist: Vec<String>,
    #[serde(default)]
    pub stopwords: Vec<String>,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            banner_patterns: default_banner_patterns(),
            single_letter_whitelist: default_single_letter_whitelist(),
            stopwords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_fuzzy_cutoff")]
    pub fuzzy_cutoff: f64,
    #[serde(default = "default_sensitive_substrings")]
    pub sensitive_substrings: Vec<String>,
    #[serde(default = "default_manual_translations")]
    pub manual_translations: BTreeMap<String, String>,
    #[serde(default = "default_background_texts")]
    pub background_texts: Vec<String>,
    #[serde(default = "default_max_background_rows")]
    pub max_background_rows: usize,
}

impl Default for ExplanationConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            fuzzy_cutoff: default_fuzzy_cutoff(),
            sensitive_substrings: default_sensitive_substrings(),
            manual_translations: default_manual_translations(),
            background_texts: default_background_texts(),
            max_background_rows: default_max_background_rows(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageConfig {
    /// Language the models and vectorizer were trained on
    #[serde(default = "default_native_language")]
    pub native: String,
    /// Second supported language (banners, reverse mapping)
    #[serde(default = "default_source_language")]
    pub source: String,
    #[serde(default)]
    pub translate_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            native: default_native_language(),
            source: default_source_language(),
            translate_url: None,
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    pub path: PathBuf,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub input: InputForm,
}

impl ModelEntry {
    fn new(path: &str, weight: f64, input: InputForm) -> Self {
        Self {
            path: PathBuf::from(path),
            weight,
            input,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsConfig {
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    #[serde(default = "default_text_vectorizer")]
    pub text_vectorizer: PathBuf,
    #[serde(default = "default_text_models")]
    pub text: BTreeMap<String, ModelEntry>,
    #[serde(default = "default_link_models")]
    pub link: BTreeMap<String, ModelEntry>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            text_vectorizer: default_text_vectorizer(),
            text: default_text_models(),
            link: default_link_models(),
        }
    }
}

fn default_version() -> String { env!("CARGO_PKG_VERSION").to_string() }
fn default_threshold() -> f64 { 0.5 }
fn default_consensus_band() -> f64 { 0.05 }
fn default_min_consensus() -> usize { 2 }
fn default_gray_low() -> f64 { 0.5 }
fn default_gray_high() -> f64 { 0.7 }
fn default_money_ceiling() -> f64 { 0.75 }
fn default_top_k() -> usize { 10 }
fn default_fuzzy_cutoff() -> f64 { 0.85 }
fn default_max_background_rows() -> usize { 100 }
fn default_native_language() -> String { "en".to_string() }
fn default_source_language() -> String { "fr".to_string() }
fn default_timeout_secs() -> u64 { 10 }
fn default_weight() -> f64 { 1.0 }
fn default_model_dir() -> PathBuf { PathBuf::from("models") }
fn default_text_vectorizer() -> PathBuf { PathBuf::from("email_vectorizer.json") }

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_high_risk_keywords() -> Vec<String> {
    strings(&[
        "password", "verify", "verification", "suspended", "suspend", "login", "log in",
        "account", "urgent", "immediately", "confirm", "bank", "credential", "security alert",
        "unlock", "invoice", "mot de passe", "compte", "vérifier", "connexion", "urgence",
        "suspendu", "banque", "identifiant",
    ])
}

fn default_money_words() -> Vec<String> {
    strings(&["money", "<money>"])
}

fn default_money_prefixes() -> Vec<String> {
    strings(&["argent"])
}

fn default_banner_patterns() -> Vec<String> {
    strings(&[
        r"^avis:\s*courriel externe\.\s*soyez vigilant\.*",
        r"^attention:\s*external email.*?\.\s*",
    ])
}

fn default_single_letter_whitelist() -> Vec<String> {
    strings(&["a", "à", "e", "y", "i", "o"])
}

fn default_sensitive_substrings() -> Vec<String> {
    strings(&[
        "gmail", "hotmail", "outlook", "tel", "phone", "email", "courriel", "www", "http", "https",
    ])
}

fn default_manual_translations() -> BTreeMap<String, String> {
    [
        ("click", "cliquer"),
        ("account", "compte"),
        ("password", "mot de passe"),
        ("login", "connexion"),
        ("email", "courriel"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_background_texts() -> Vec<String> {
    strings(&[
        "dear customer your account has been suspended",
        "click here to verify your identity",
        "bank update required immediately",
        "this is a safe and verified email",
        "reset your password now",
        "thank you for your purchase",
        "please confirm your address",
    ])
}

fn default_text_models() -> BTreeMap<String, ModelEntry> {
    BTreeMap::from([
        ("random_forest".to_string(), ModelEntry::new("random_forest.json", 2.0, InputForm::Sparse)),
        ("random_forest_tuned".to_string(), ModelEntry::new("random_forest_tuned.json", 1.0, InputForm::Sparse)),
        ("logistic_regression".to_string(), ModelEntry::new("logistic_regression.json", 1.5, InputForm::Sparse)),
        ("hist_gradient_boosting".to_string(), ModelEntry::new("hist_gradient_boosting.json", 2.5, InputForm::Dense)),
    ])
}

fn default_link_models() -> BTreeMap<String, ModelEntry> {
    BTreeMap::from([
        ("link_random_forest".to_string(), ModelEntry::new("link_random_forest.json", 2.0, InputForm::Sparse)),
        ("link_logistic_regression".to_string(), ModelEntry::new("link_logistic_regression.json", 1.5, InputForm::Sparse)),
        ("link_hist_gradient_boosting".to_string(), ModelEntry::new("link_hist_gradient_boosting.json", 2.5, InputForm::Dense)),
    ])
}

pub struct ConfigStore {
    config_dir: PathBuf,
    config_file: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_file = config_dir.join("config.json");
        Self { config_dir, config_file }
    }

    /// Store backed by an explicit file (backups go next to it)
    pub fn with_file(config_file: PathBuf) -> Self {
        let config_dir = config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self { config_dir, config_file }
    }

    /// Get default config directory
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("phishlens"))
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Ensure config directory exists
    pub fn ensure_dir(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.config_dir).map_err(|e| ConfigError::io(&self.config_dir, e))
    }

    /// Load configuration from file, falling back to defaults when absent
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        if !self.config_file.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_file)
            .map_err(|e| ConfigError::io(&self.config_file, e))?;

        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to file
    pub fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        self.ensure_dir()?;

        if self.config_file.exists() {
            self.create_backup()?;
        }

        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_file, content).map_err(|e| ConfigError::io(&self.config_file, e))
    }

    fn create_backup(&self) -> Result<(), ConfigError> {
        let backup_dir = self.config_dir.join("backups");
        fs::create_dir_all(&backup_dir).map_err(|e| ConfigError::io(&backup_dir, e))?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%3f");
        let backup_file = backup_dir.join(format!("config_{}.json", timestamp));

        fs::copy(&self.config_file, &backup_file).map_err(|e| ConfigError::io(&backup_file, e))?;

        self.cleanup_old_backups(&backup_dir, 10)
    }

    /// Remove old backups, keeping only the most recent N
    fn cleanup_old_backups(&self, backup_dir: &Path, keep: usize) -> Result<(), ConfigError> {
        let mut entries: Vec<_> = fs::read_dir(backup_dir)
            .map_err(|e| ConfigError::io(backup_dir, e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "json"))
            .collect();

        if entries.len() <= keep {
            return Ok(());
        }

        entries.sort_by_key(|e| {
            e.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        });

        let remove_count = entries.len() - keep;
        for entry in entries.iter().take(remove_count) {
            let _ = fs::remove_file(entry.path());
        }

        Ok(())
    }
}
