use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::{
    DEFAULT_DAYS_THRESHOLD, DEFAULT_DRAFT_MAX_TOKENS, DEFAULT_DRAFT_SCAN_LIMIT,
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_LOOKBACK_DAYS, DEFAULT_MAX_EMAILS_PER_SCAN,
    DEFAULT_SCAN_INTERVAL_MINUTES,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub triage: TriageConfig,
    /// Completion API and composer selection
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Microsoft Graph application credentials and scan folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Mailbox owner (UPN). App-only tokens cannot use `/me`.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Mark the original as read once its draft exists
    #[serde(default)]
    pub mark_as_read: bool,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            tenant_id: None,
            client_id: None,
            client_secret: None,
            user: None,
            folder: default_folder(),
            mark_as_read: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Only emails at most this many days old get a draft (0 = today only)
    #[serde(default = "default_days_threshold")]
    pub days_threshold: i64,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    /// Comma-separated sender domains. Empty accepts every sender.
    #[serde(default)]
    pub allowed_domains: String,
    #[serde(default = "default_max_emails")]
    pub max_emails: usize,
    #[serde(default = "default_draft_scan_limit")]
    pub draft_scan_limit: usize,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            days_threshold: default_days_threshold(),
            lookback_days: default_lookback_days(),
            allowed_domains: String::new(),
            max_emails: default_max_emails(),
            draft_scan_limit: default_draft_scan_limit(),
        }
    }
}

impl TriageConfig {
    /// Parsed allow-list, blanks removed
    pub fn allowed_domains(&self) -> Vec<String> {
        self.allowed_domains
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(String::from)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComposerKind {
    /// Fixed instructions, no training data
    Default,
    /// Examples and templates from the training store
    #[default]
    Trained,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// API key (required)
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    /// Model used for drafting
    #[serde(default = "default_ai_model")]
    pub model: String,
    /// Model used for email-type classification
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub composer: ComposerKind,
    #[serde(default = "default_tone")]
    pub default_tone: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            classifier_model: default_classifier_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            composer: ComposerKind::default(),
            default_tone: default_tone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// `training_data.json` and `response_templates.json`
    #[default]
    Json,
    /// `training.db`
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Directory holding training data (default: data dir)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
        }
    }
}

fn default_folder() -> String {
    "Inbox".to_string()
}

fn default_days_threshold() -> i64 {
    DEFAULT_DAYS_THRESHOLD
}

fn default_lookback_days() -> i64 {
    DEFAULT_LOOKBACK_DAYS
}

fn default_max_emails() -> usize {
    DEFAULT_MAX_EMAILS_PER_SCAN
}

fn default_draft_scan_limit() -> usize {
    DEFAULT_DRAFT_SCAN_LIMIT
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_model() -> String {
    "gpt-4".to_string()
}

fn default_classifier_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_DRAFT_MAX_TOKENS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_tone() -> String {
    "professional".to_string()
}

fn default_interval_minutes() -> u64 {
    DEFAULT_SCAN_INTERVAL_MINUTES
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("redraft");
        Ok(dir)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn data_dir() -> Result<PathBuf> {
        let dir = dirs::data_local_dir()
            .context("Could not find data directory")?
            .join("redraft");
        Ok(dir)
    }

    /// Directory for training data files
    pub fn training_dir(&self) -> Result<PathBuf> {
        match &self.training.dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::data_dir(),
        }
    }

    /// Load the config file (if any) and apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Config::default()
        };

        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Override settings from environment variables.
    ///
    /// `lookup` is injected so tests don't touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CLIENT_ID") {
            self.mailbox.client_id = Some(v);
        }
        if let Some(v) = get("CLIENT_SECRET") {
            self.mailbox.client_secret = Some(v);
        }
        if let Some(v) = get("TENANT_ID") {
            self.mailbox.tenant_id = Some(v);
        }
        if let Some(v) = get("MAILBOX_USER") {
            self.mailbox.user = Some(v);
        }
        if let Some(v) = get("EMAIL_FOLDER") {
            self.mailbox.folder = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.ai.api_key = Some(v);
        }
        if let Some(v) = get("ALLOWED_DOMAINS") {
            self.triage.allowed_domains = v;
        }
        if let Some(v) = get("DAYS_THRESHOLD") {
            self.triage.days_threshold = parse_env("DAYS_THRESHOLD", &v)?;
        }
        if let Some(v) = get("MAX_EMAILS_PER_SCAN") {
            self.triage.max_emails = parse_env("MAX_EMAILS_PER_SCAN", &v)?;
        }
        if let Some(v) = get("SCAN_INTERVAL_MINUTES") {
            self.schedule.interval_minutes = parse_env("SCAN_INTERVAL_MINUTES", &v)?;
        }
        Ok(())
    }

    /// Names of required secrets that are not configured
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let unset = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());

        if unset(&self.mailbox.client_id) {
            missing.push("CLIENT_ID");
        }
        if unset(&self.mailbox.client_secret) {
            missing.push("CLIENT_SECRET");
        }
        if unset(&self.mailbox.tenant_id) {
            missing.push("TENANT_ID");
        }
        if unset(&self.ai.api_key) {
            missing.push("OPENAI_API_KEY");
        }
        missing
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(Self::config_dir()?)?;
        fs::create_dir_all(Self::data_dir()?)?;
        fs::create_dir_all(self.training_dir()?)?;
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", key, value, e))
}
