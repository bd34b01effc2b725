use anyhow::{bail, Context};
use phishlens_lib::services::{ConfigStore, PhishingAnalyzer};
use std::path::{Path, PathBuf};
use tracing::info;

fn parse_arg_value(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

fn is_html_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
}

/// `--config`, then `PHISHLENS_CONFIG`, then the user config directory
fn config_store(args: &[String]) -> anyhow::Result<ConfigStore> {
    if let Some(path) = parse_arg_value(args, "--config") {
        return Ok(ConfigStore::with_file(PathBuf::from(path)));
    }
    if let Ok(path) = std::env::var("PHISHLENS_CONFIG") {
        if !path.trim().is_empty() {
            return Ok(ConfigStore::with_file(PathBuf::from(path)));
        }
    }
    let dir = ConfigStore::default_config_dir().context("no config directory available")?;
    Ok(ConfigStore::new(dir))
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args[1].starts_with("--") {
        eprintln!(
            "Usage:\n  analyze_email <path> [--html] [--config <path>] [--out <json_path>]\n\nNotes:\n  - `.html`/`.htm` files are parsed as HTML; `--html` forces it for other names.\n  - PHISHLENS_CONFIG points at a config file when `--config` is absent."
        );
        return Ok(());
    }

    phishlens_lib::init_logging();

    let path = PathBuf::from(&args[1]);
    let as_html = has_flag(&args, "--html") || is_html_path(&path);
    let out_path = parse_arg_value(&args, "--out");

    let store = config_store(&args)?;
    let config = store
        .load()
        .with_context(|| format!("loading config from {}", store.config_file().display()))?;
    info!(config = %store.config_file().display(), "[CLI] configuration loaded");

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    if content.trim().is_empty() {
        bail!("{} is empty", path.display());
    }

    let analyzer = PhishingAnalyzer::from_config(config).context("initializing analyzer")?;
    let response = if as_html {
        analyzer.analyze_html(&content)?
    } else {
        analyzer.analyze_document(&content, &[])?
    };

    let json = serde_json::to_string_pretty(&response)?;
    println!("{}", json);

    if let Some(out_path) = out_path {
        std::fs::write(&out_path, &json).with_context(|| format!("writing {}", out_path))?;
        info!(path = %out_path, "[CLI] wrote JSON");
    }

    Ok(())
}
