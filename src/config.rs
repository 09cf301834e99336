//! TOML configuration.
//!
//! Loaded once at startup by [`load_config`], which parses and validates
//! every section. Credentials are never stored in the file: each source
//! names the environment variables holding them, and the
//! `resolve_*_credentials` helpers read those variables when a sync
//! starts. Missing values surface as [`IngestError::Configuration`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use kb_ingest_core::error::IngestError;
use kb_ingest_core::keyword::{harvest_keywords, Vocabulary};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub keywords: KeywordsConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub docs: Option<DocsConfig>,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
    #[serde(default)]
    pub lock_path: Option<PathBuf>,
    #[serde(default = "default_stale_lock_minutes")]
    pub stale_lock_minutes: i64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            lock_path: None,
            stale_lock_minutes: default_stale_lock_minutes(),
        }
    }
}

fn default_window_hours() -> i64 {
    24
}
fn default_stale_lock_minutes() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KeywordsConfig {
    #[serde(default)]
    pub vocabulary: Vec<String>,
    #[serde(default)]
    pub readme_paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_token_env")]
    pub token_env: String,
    #[serde(default = "default_chat_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub include_channels: Vec<String>,
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            token_env: default_chat_token_env(),
            api_base: default_chat_api_base(),
            include_channels: Vec::new(),
            history_limit: default_history_limit(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_chat_token_env() -> String {
    "SLACK_BOT_TOKEN".to_string()
}
fn default_chat_api_base() -> String {
    "https://slack.com/api".to_string()
}
fn default_history_limit() -> u32 {
    200
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    pub base_url: String,
    pub space_key: String,
    #[serde(default = "default_docs_email_env")]
    pub email_env: String,
    #[serde(default = "default_docs_token_env")]
    pub token_env: String,
    #[serde(default = "default_docs_limit")]
    pub limit: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_docs_email_env() -> String {
    "CONFLUENCE_EMAIL".to_string()
}
fn default_docs_token_env() -> String {
    "CONFLUENCE_API_TOKEN".to_string()
}
fn default_docs_limit() -> u32 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizerConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_openai_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            api_base: default_openai_base(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl SummarizerConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_openai_base() -> String {
    "https://api.openai.com".to_string()
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}

impl Config {
    /// Lock file path: configured, or `kbi.lock` next to the database.
    pub fn lock_path(&self) -> PathBuf {
        match &self.run.lock_path {
            Some(p) => p.clone(),
            None => self
                .db
                .path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("kbi.lock"),
        }
    }

    /// Build the keyword vocabulary: configured entries first, then
    /// entries harvested from each readme, in order.
    ///
    /// An unreadable readme is a configuration error.
    pub fn vocabulary(&self) -> Result<Vocabulary, IngestError> {
        let mut raw = self.keywords.vocabulary.clone();
        for path in &self.keywords.readme_paths {
            let content = std::fs::read_to_string(path).map_err(|e| {
                IngestError::Configuration(format!(
                    "cannot read keyword readme {}: {}",
                    path.display(),
                    e
                ))
            })?;
            raw.extend(harvest_keywords(&content));
        }
        let vocabulary = Vocabulary::new(&raw);
        if vocabulary.is_empty() {
            return Err(IngestError::Configuration(
                "keyword vocabulary is empty; set [keywords] vocabulary or readme_paths"
                    .to_string(),
            ));
        }
        Ok(vocabulary)
    }
}

/// Credentials for the chat API.
#[derive(Debug, Clone)]
pub struct ChatCredentials {
    pub token: String,
}

/// Credentials for the wiki API.
#[derive(Debug, Clone)]
pub struct DocsCredentials {
    pub email: String,
    pub token: String,
}

fn read_env(name: &str, missing: &mut Vec<String>) -> String {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => {
            missing.push(name.to_string());
            String::new()
        }
    }
}

pub fn resolve_chat_credentials(config: &ChatConfig) -> Result<ChatCredentials, IngestError> {
    let mut missing = Vec::new();
    let token = read_env(&config.token_env, &mut missing);
    if !missing.is_empty() {
        return Err(IngestError::Configuration(format!(
            "missing environment variables: {}",
            missing.join(", ")
        )));
    }
    Ok(ChatCredentials { token })
}

pub fn resolve_docs_credentials(config: &DocsConfig) -> Result<DocsCredentials, IngestError> {
    let mut missing = Vec::new();
    let email = read_env(&config.email_env, &mut missing);
    let token = read_env(&config.token_env, &mut missing);
    if !missing.is_empty() {
        return Err(IngestError::Configuration(format!(
            "missing environment variables: {}",
            missing.join(", ")
        )));
    }
    Ok(DocsCredentials { email, token })
}

/// The summarizer API key, or `None` when the summarizer is disabled or
/// its key is not set. A missing key is not an error.
pub fn resolve_summarizer_key(config: &SummarizerConfig) -> Option<String> {
    if !config.is_enabled() {
        return None;
    }
    std::env::var(&config.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate run
    if config.run.window_hours < 1 {
        anyhow::bail!("run.window_hours must be >= 1");
    }
    if config.run.stale_lock_minutes < 1 {
        anyhow::bail!("run.stale_lock_minutes must be >= 1");
    }

    // Validate store
    if config.store.retry_attempts == 0 {
        anyhow::bail!("store.retry_attempts must be >= 1");
    }

    // Validate chat
    if config.chat.history_limit == 0 {
        anyhow::bail!("chat.history_limit must be > 0");
    }

    // Validate docs
    if let Some(docs) = &config.docs {
        if docs.base_url.trim().is_empty() {
            anyhow::bail!("docs.base_url must not be empty");
        }
        if docs.space_key.trim().is_empty() {
            anyhow::bail!("docs.space_key must not be empty");
        }
        if docs.limit == 0 {
            anyhow::bail!("docs.limit must be > 0");
        }
    }

    match config.summarizer.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown summarizer provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(body: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults_apply() {
        let f = write_config("[db]\npath = \"./data/kb.sqlite\"\n");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.run.window_hours, 24);
        assert_eq!(config.store.retry_attempts, 3);
        assert_eq!(config.chat.token_env, "SLACK_BOT_TOKEN");
        assert_eq!(config.summarizer.model, "gpt-4o-mini");
        assert!(!config.summarizer.is_enabled());
        assert_eq!(config.lock_path(), PathBuf::from("./data/kbi.lock"));
        assert!(config.docs.is_none());
    }

    #[test]
    fn example_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/kbi.example.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.docs.as_ref().unwrap().space_key, "ENG");
        assert_eq!(config.vocabulary().unwrap().len(), 4);
    }

    #[test]
    fn rejects_bad_values() {
        let f = write_config("[db]\npath = \"kb.sqlite\"\n[store]\nretry_attempts = 0\n");
        assert!(load_config(f.path()).is_err());
        let f = write_config("[db]\npath = \"kb.sqlite\"\n[summarizer]\nprovider = \"magic\"\n");
        assert!(load_config(f.path()).is_err());
        let f = write_config("[db]\npath = \"kb.sqlite\"\n[run]\nwindow_hours = 0\n");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn vocabulary_merges_readmes() {
        let readme = write_config("- Deployments\n- `access request`\n");
        let f = write_config(&format!(
            "[db]\npath = \"kb.sqlite\"\n[keywords]\nvocabulary = [\"pending approval\", \"deployment\"]\nreadme_paths = [{:?}]\n",
            readme.path().display().to_string()
        ));
        let config = load_config(f.path()).unwrap();
        let vocab = config.vocabulary().unwrap();
        let forms: Vec<_> = vocab
            .keywords()
            .iter()
            .map(|k| k.canonical_form.as_str())
            .collect();
        assert_eq!(forms, vec!["pending approval", "deployment", "access request"]);
    }

    #[test]
    fn empty_vocabulary_is_configuration_error() {
        let f = write_config("[db]\npath = \"kb.sqlite\"\n");
        let err = load_config(f.path()).unwrap().vocabulary().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_credentials_named() {
        let chat = ChatConfig {
            token_env: "KBI_TEST_SURELY_UNSET_TOKEN".to_string(),
            ..ChatConfig::default()
        };
        let err = resolve_chat_credentials(&chat).unwrap_err();
        assert!(err.to_string().contains("KBI_TEST_SURELY_UNSET_TOKEN"));
    }
}
