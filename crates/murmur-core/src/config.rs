use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (murmur.toml + MURMUR_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MurmurConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for MurmurConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            completion: CompletionConfig::default(),
            bot: BotConfig::default(),
            sessions: SessionsConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Event feed (OneBot-compatible HTTP action API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Base URL of the feed API, without trailing slash.
    #[serde(default = "default_feed_url")]
    pub api_url: String,
    /// Optional bearer token sent in the Authorization header.
    pub access_token: Option<String>,
    /// Long-poll timeout passed to get_latest_events, in seconds.
    #[serde(default = "default_long_poll_secs")]
    pub long_poll_secs: u64,
    /// Pause between successful poll cycles, in seconds.
    #[serde(default = "default_poll_pause_secs")]
    pub poll_pause_secs: u64,
    /// Pause after a failed poll cycle, in seconds.
    #[serde(default = "default_error_pause_secs")]
    pub error_pause_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_url: default_feed_url(),
            access_token: None,
            long_poll_secs: default_long_poll_secs(),
            poll_pause_secs: default_poll_pause_secs(),
            error_pause_secs: default_error_pause_secs(),
        }
    }
}

/// Chat-completion API (DeepSeek, OpenAI wire format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// API key. When unset the completion client answers with a fixed
    /// "service unavailable" text instead of calling out.
    pub api_key: Option<String>,
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_completion_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Bot behavior: admin identity, default prompt, bootstrap allowlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// User id of the single administrator. Admin commands are refused for
    /// everyone else by exact string comparison.
    pub admin_id: Option<String>,
    /// System prompt used when a user has no custom prompt configured.
    #[serde(default = "default_prompt")]
    pub default_prompt: String,
    /// Comma-separated user ids pre-enabled on first start (before a policy
    /// file exists). Ignored once the policy file has been written.
    #[serde(default)]
    pub bootstrap_enabled: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            admin_id: None,
            default_prompt: default_prompt(),
            bootstrap_enabled: String::new(),
        }
    }
}

/// Conversation session limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Idle seconds after which a session expires.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Period of the background expiry sweep, in seconds.
    #[serde(default = "default_sweep_period_secs")]
    pub sweep_period_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_period_secs: default_sweep_period_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the durable policy file (rewritten in full on every mutation).
    #[serde(default = "default_policy_path")]
    pub policy_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            policy_path: default_policy_path(),
        }
    }
}

fn default_feed_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_long_poll_secs() -> u64 {
    30
}
fn default_poll_pause_secs() -> u64 {
    1
}
fn default_error_pause_secs() -> u64 {
    5
}
fn default_completion_base_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}
fn default_model() -> String {
    "deepseek-chat".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_prompt() -> String {
    "You are a friendly chat assistant. Reply in a concise, warm tone. \
     Politely decline sensitive topics. Keep replies short."
        .to_string()
}
fn default_max_history() -> usize {
    10
}
fn default_idle_timeout_secs() -> u64 {
    1800
}
fn default_sweep_period_secs() -> u64 {
    3600
}
fn default_policy_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.murmur/user_policy.json", home)
}

impl MurmurConfig {
    /// Load config from a TOML file with MURMUR_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.murmur/murmur.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: MurmurConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MURMUR_").split("_"))
            .extract()
            .map_err(|e| crate::error::MurmurError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Split the bootstrap list into trimmed, non-empty user ids.
    pub fn bootstrap_ids(&self) -> Vec<String> {
        self.bot
            .bootstrap_enabled
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.murmur/murmur.toml", home)
}
