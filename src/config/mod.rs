use crate::error::ConfigError;
use crate::store::RetryPolicy;
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Workspace directory - computed from home, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

// ── Telegram ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token; overridable via TELEGRAM_BOT_TOKEN.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Chat ids allowed to talk to the bot. Empty allows every chat.
    #[serde(default)]
    pub allowed_chats: Vec<i64>,
}

// ── Gemini ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key; overridable via GEMINI_API_KEY.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_gemini_model")]
    pub model: String,
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".into()
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_gemini_model(),
        }
    }
}

// ── Search ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Brave Search key; absent disables proactive search entirely.
    /// Overridable via BRAVE_API_KEY.
    #[serde(default)]
    pub brave_api_key: Option<String>,
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,
}

fn default_search_max_results() -> usize {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            brave_api_key: None,
            max_results: default_search_max_results(),
        }
    }
}

// ── Store ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Chat record database path; defaults to `<workspace>/meridian.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_store_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_store_base_backoff_secs")]
    pub base_backoff_secs: u64,
}

fn default_store_max_attempts() -> u32 {
    3
}

fn default_store_base_backoff_secs() -> u64 {
    1
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_attempts: default_store_max_attempts(),
            base_backoff_secs: default_store_base_backoff_secs(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Meridian configuration.
# Secrets may also come from the environment:
#   TELEGRAM_BOT_TOKEN, GEMINI_API_KEY, BRAVE_API_KEY

[telegram]
# bot_token = "123456:ABC..."
# allowed_chats = []

[gemini]
# api_key = "..."
model = "gemini-2.0-flash"

[search]
# brave_api_key = "..."
max_results = 5

[store]
# database_path = "/var/lib/meridian/meridian.db"
max_attempts = 3
base_backoff_secs = 1
"#;

impl Config {
    /// Load `~/.meridianbot/config.toml`, writing a commented default
    /// template on first run. Environment overrides are applied last.
    pub fn load_or_init() -> Result<Self, ConfigError> {
        let workspace_dir = Self::default_workspace_dir()?;
        let config_path = workspace_dir.join("config.toml");

        if !config_path.exists() {
            fs::create_dir_all(&workspace_dir)?;
            fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)?;
            tracing::info!(path = %config_path.display(), "wrote default config");
        }

        Self::load_from(&config_path, &workspace_dir)
    }

    pub fn load_from(config_path: &Path, workspace_dir: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(config_path)?;
        let mut config: Self =
            toml::from_str(&raw).map_err(|err| ConfigError::Load(err.to_string()))?;
        config.workspace_dir = workspace_dir.to_path_buf();
        config.config_path = config_path.to_path_buf();
        config.apply_env_overrides_from(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn default_workspace_dir() -> Result<PathBuf, ConfigError> {
        let user_dirs = UserDirs::new()
            .ok_or_else(|| ConfigError::Load("could not determine home directory".into()))?;
        Ok(user_dirs.home_dir().join(".meridianbot"))
    }

    /// Secrets from the environment win over the config file.
    pub fn apply_env_overrides_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(key) = get("GEMINI_API_KEY") {
            self.gemini.api_key = Some(key);
        }
        if let Some(key) = get("BRAVE_API_KEY") {
            self.search.brave_api_key = Some(key);
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.store
            .database_path
            .clone()
            .unwrap_or_else(|| self.workspace_dir.join("meridian.db"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.store.max_attempts.max(1),
            Duration::from_secs(self.store.base_backoff_secs),
        )
    }

    /// Everything `run` needs up front, so failures happen at startup
    /// rather than on the first message.
    pub fn validate_for_run(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::Validation(
                "telegram.bot_token is not set (or TELEGRAM_BOT_TOKEN)".into(),
            ));
        }
        if self.gemini.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::Validation(
                "gemini.api_key is not set (or GEMINI_API_KEY)".into(),
            ));
        }
        Ok(())
    }
}
