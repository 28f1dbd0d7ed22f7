// Local configuration for the client.
//
// Client config: `~/.liqua/config.toml`
// API keys never live here; OpenRouter reads `OPENROUTER_API_KEY`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use liqua_llm::ollama::DEFAULT_OLLAMA_URL;
use liqua_llm::openrouter::API_KEY_ENV;
use liqua_llm::{GeneratorSettings, Provider, ReasoningEffort};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Root directory for client state: `~/.liqua/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".liqua"))
}

/// Path to the client config file: `~/.liqua/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Path to the local database holding the outbox: `~/.liqua/client.db`.
pub fn default_db_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("client.db"))
}

// ── Client config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Sync server base URL.
    pub server_url: String,
    /// Stable id of this replica. Generated on first run.
    pub client_id: Option<String>,
    pub ai: AiConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { server_url: DEFAULT_SERVER_URL.to_owned(), client_id: None, ai: AiConfig::default() }
    }
}

impl ClientConfig {
    /// Load from `~/.liqua/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = global_config_path().ok_or(ConfigError::NoHomeDir)?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        restrict_to_owner(path)?;
        Ok(())
    }

    /// The replica id, minting one on first use. Returns whether it is new.
    pub fn ensure_client_id(&mut self) -> (String, bool) {
        match &self.client_id {
            Some(id) if !id.trim().is_empty() => (id.clone(), false),
            _ => {
                let id = Uuid::new_v4().to_string();
                self.client_id = Some(id.clone());
                (id, true)
            }
        }
    }
}

/// AI settings. Unknown keys are rejected so secrets cannot sneak in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AiConfig {
    pub provider: Provider,
    pub model: String,
    pub ollama_url: String,
    pub reasoning_effort: ReasoningEffort,
    /// Applied to chats that carry no instructions of their own.
    pub custom_instructions: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: DEFAULT_MODEL.to_owned(),
            ollama_url: DEFAULT_OLLAMA_URL.to_owned(),
            reasoning_effort: ReasoningEffort::default(),
            custom_instructions: None,
        }
    }
}

impl AiConfig {
    pub fn generator_settings(&self) -> GeneratorSettings {
        self.generator_settings_with(|key| std::env::var(key).ok())
    }

    /// Testable variant of [`Self::generator_settings`].
    pub fn generator_settings_with<F>(&self, env: F) -> GeneratorSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        match self.provider {
            Provider::Ollama => GeneratorSettings::Ollama { base_url: self.ollama_url.clone() },
            Provider::OpenRouter => GeneratorSettings::OpenRouter {
                api_key: env(API_KEY_ENV).map(|key| key.trim().to_owned()).filter(|key| !key.is_empty()),
                reasoning_effort: self.reasoning_effort,
            },
        }
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("could not determine home directory")]
    NoHomeDir,
}
