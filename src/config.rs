use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

/// Top-level configuration loaded from TOML. Loaded once at process start
/// and passed by reference into each component; nothing re-reads it
/// mid-run.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EpistleConfig {
    pub mail: MailConfig,
    pub model: ModelConfig,
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub summarizer: SummarizerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub imap_host: String,
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// The assistant's own address; messages from it render as assistant
    /// turns in context.
    pub address: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Resolved from EPISTLE_MAIL_PASSWORD or the credential store when
    /// absent from the file.
    pub password: Option<String>,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// Mailbox holding our own sent mail, used by backfill.
    #[serde(default = "default_sent_mailbox")]
    pub sent_mailbox: String,
    #[serde(default)]
    pub correspondents: Vec<CorrespondentConfig>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            imap_host: String::new(),
            imap_port: default_imap_port(),
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            address: String::new(),
            display_name: default_display_name(),
            password: None,
            mailbox: default_mailbox(),
            sent_mailbox: default_sent_mailbox(),
            correspondents: Vec::new(),
        }
    }
}

fn default_imap_port() -> u16 {
    993
}
fn default_smtp_port() -> u16 {
    465
}
fn default_display_name() -> String {
    "Assistant".into()
}
fn default_mailbox() -> String {
    "INBOX".into()
}
fn default_sent_mailbox() -> String {
    "Sent".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorrespondentConfig {
    pub address: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    pub api_key: Option<String>,
    /// Override for OpenAI-compatible servers (local inference included).
    pub endpoint: Option<String>,
    /// Separate endpoint/key for embeddings when the chat provider has no
    /// embeddings API.
    pub embed_endpoint: Option<String>,
    pub embed_api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub reply_prompt: Option<String>,
    pub summary_prompt: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            chat_model: default_chat_model(),
            embed_model: default_embed_model(),
            api_key: None,
            endpoint: None,
            embed_endpoint: None,
            embed_api_key: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            reply_prompt: None,
            summary_prompt: None,
        }
    }
}

fn default_provider() -> String {
    "anthropic".into()
}
fn default_chat_model() -> String {
    "claude-sonnet-4-5-20250929".into()
}
fn default_embed_model() -> String {
    "text-embedding-3-small".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "epistle.db".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Hour of day (UTC) after which the daily summarization pass runs.
    #[serde(default)]
    pub summary_hour: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            summary_hour: 0,
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_true")]
    pub daily: bool,
    #[serde(default = "default_true")]
    pub weekly: bool,
    #[serde(default)]
    pub monthly: bool,
    #[serde(default)]
    pub quarterly: bool,
    /// Send each generated summary to its correspondent.
    #[serde(default)]
    pub notify: bool,
    #[serde(default = "default_relevant_topk")]
    pub relevant_topk: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            daily: true,
            weekly: true,
            monthly: false,
            quarterly: false,
            notify: false,
            relevant_topk: default_relevant_topk(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_relevant_topk() -> usize {
    3
}

/// Load configuration from file or use defaults.
///
/// Search order:
/// 1. `EPISTLE_CONFIG` env var
/// 2. `~/.epistle/config.toml`
/// 3. Zero-config defaults (no file needed)
pub fn load() -> anyhow::Result<EpistleConfig> {
    let path = config_path();

    if path.exists() {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let mut config: EpistleConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))?;

        resolve_secrets(&mut config);
        validate(&config)?;

        info!("loaded config from {}", path.display());
        Ok(config)
    } else {
        info!("no config file found, using zero-config defaults");
        let mut config = EpistleConfig::default();
        resolve_secrets(&mut config);
        Ok(config)
    }
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("EPISTLE_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".epistle").join("config.toml")
}

/// Resolve secrets from environment variables or the credential store when
/// not set in the file.
fn resolve_secrets(config: &mut EpistleConfig) {
    if config.model.api_key.is_none() {
        config.model.api_key = match config.model.provider.as_str() {
            "anthropic" => std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .or_else(|| crate::secrets::load_key("anthropic")),
            "openai" => std::env::var("OPENAI_API_KEY")
                .ok()
                .or_else(|| crate::secrets::load_key("openai")),
            _ => None,
        };
    }

    if config.model.embed_api_key.is_none() {
        config.model.embed_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .or_else(|| crate::secrets::load_key("openai"));
    }

    if config.mail.password.is_none() {
        config.mail.password = std::env::var("EPISTLE_MAIL_PASSWORD")
            .ok()
            .or_else(|| crate::secrets::load_key("mail"));
    }
}

/// Validate the config and return clear error messages.
fn validate(config: &EpistleConfig) -> anyhow::Result<()> {
    let valid_providers = ["anthropic", "openai"];
    if !valid_providers.contains(&config.model.provider.as_str()) {
        anyhow::bail!(
            "invalid provider '{}': must be one of {:?}",
            config.model.provider,
            valid_providers
        );
    }

    if config.model.max_tokens == 0 {
        anyhow::bail!("model.max_tokens must be > 0");
    }

    if config.model.timeout_secs == 0 {
        anyhow::bail!("model.timeout_secs must be > 0");
    }

    if config.scheduler.summary_hour > 23 {
        anyhow::bail!("scheduler.summary_hour must be 0-23");
    }

    for (i, correspondent) in config.mail.correspondents.iter().enumerate() {
        if correspondent.address.is_empty() {
            anyhow::bail!("mail.correspondents[{i}] must have an address");
        }
    }

    Ok(())
}
