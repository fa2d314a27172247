use anyhow::{Context, Result};
use po_intake_core::classify::KeywordSet;
use po_intake_core::sniff::DocumentKind;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailboxConfig {
    pub provider: String,
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub gmail: Option<GmailConfig>,
    #[serde(default)]
    pub maildir: Option<MaildirConfig>,
}

fn default_label() -> String {
    "INBOX".to_string()
}
fn default_max_results() -> u32 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct GmailConfig {
    /// JSON file holding the OAuth token record.
    pub token_path: PathBuf,
    #[serde(default = "default_client_id_env")]
    pub client_id_env: String,
    #[serde(default = "default_client_secret_env")]
    pub client_secret_env: String,
    #[serde(default = "default_gmail_api_base")]
    pub api_base: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

fn default_client_id_env() -> String {
    "GMAIL_CLIENT_ID".to_string()
}
fn default_client_secret_env() -> String {
    "GMAIL_CLIENT_SECRET".to_string()
}
fn default_gmail_api_base() -> String {
    "https://gmail.googleapis.com/gmail/v1".to_string()
}
fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MaildirConfig {
    /// Directory scanned (non-recursively) for `.eml` files.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub document_kind: DocumentKind,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_bytes: default_max_bytes(),
            timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
            document_kind: DocumentKind::default(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./received_files")
}
fn default_max_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_fetch_timeout_secs() -> u64 {
    60
}
fn default_user_agent() -> String {
    format!("po-intake/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            autostart: default_autostart(),
        }
    }
}

/// Longest accepted poll interval, and so the longest default ingest window.
pub const MAX_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

fn default_interval_secs() -> u64 {
    300
}
fn default_autostart() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractorConfig {
    #[serde(default = "default_extractor_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_extractor_api_base")]
    pub api_base: String,
    #[serde(default = "default_extractor_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            provider: default_extractor_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            api_base: default_extractor_api_base(),
            timeout_secs: default_extractor_timeout_secs(),
        }
    }
}

fn default_extractor_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-2.5-pro".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_extractor_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_extractor_timeout_secs() -> u64 {
    300
}

/// Optional replacements for the built-in classifier keyword lists.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub strong_phrases: Option<Vec<String>>,
    #[serde(default)]
    pub medium_keywords: Option<Vec<String>>,
    #[serde(default)]
    pub sender_patterns: Option<Vec<String>>,
}

impl ClassifierConfig {
    /// Built-in lists with any configured list swapped in.
    pub fn keyword_set(&self) -> KeywordSet {
        let defaults = KeywordSet::default();
        KeywordSet {
            strong_phrases: self.strong_phrases.clone().unwrap_or(defaults.strong_phrases),
            medium_keywords: self.medium_keywords.clone().unwrap_or(defaults.medium_keywords),
            sender_patterns: self.sender_patterns.clone().unwrap_or(defaults.sender_patterns),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parses and validates a TOML config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.fetch.max_bytes == 0 {
        anyhow::bail!("fetch.max_bytes must be > 0");
    }

    if config.scheduler.interval_secs == 0 {
        anyhow::bail!("scheduler.interval_secs must be > 0");
    }

    if config.scheduler.interval_secs > MAX_INTERVAL_SECS {
        anyhow::bail!(
            "scheduler.interval_secs must be <= {} (30 days)",
            MAX_INTERVAL_SECS
        );
    }

    if config.mailbox.max_results == 0 {
        anyhow::bail!("mailbox.max_results must be > 0");
    }

    match config.mailbox.provider.as_str() {
        "gmail" => {
            if config.mailbox.gmail.is_none() {
                anyhow::bail!("mailbox.provider = 'gmail' requires a [mailbox.gmail] section");
            }
        }
        "maildir" => {
            if config.mailbox.maildir.is_none() {
                anyhow::bail!("mailbox.provider = 'maildir' requires a [mailbox.maildir] section");
            }
        }
        other => anyhow::bail!(
            "Unknown mailbox provider: '{}'. Must be gmail or maildir.",
            other
        ),
    }

    match config.extractor.provider.as_str() {
        "gemini" => {}
        other => anyhow::bail!("Unknown extractor provider: '{}'. Must be gemini.", other),
    }

    Ok(config)
}
