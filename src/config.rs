use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const API_KEY_ENV: &str = "DIFY_API_KEY";
pub const BASE_URL_ENV: &str = "VITALCHAT_BASE_URL";

pub const DEFAULT_BASE_URL: &str = "https://api.dify.ai/v1";
pub const DEFAULT_USER: &str = "vitalchat-user";

const DEFAULT_GREETING: &str = "Hello! I'm **VitalHealth**, your AI health assistant.\n\n\
I can help you:\n\
- read and explain a medical check-up report\n\
- check medications for contraindications\n\
- suggest dietary adjustments\n\n\
Describe your symptoms or paste your report to get started.";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upstream API key; the environment takes precedence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base endpoint, `/chat-messages` is appended per request
    pub base_url: String,

    /// Opaque client label sent with every request
    pub user: String,

    /// Longest silence tolerated while waiting for the response or the next
    /// chunk of a streamed answer
    pub idle_timeout_secs: u64,

    pub connect_timeout_secs: u64,

    /// Assistant message that opens a fresh session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,

    #[serde(skip)]
    pub home: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            user: DEFAULT_USER.to_string(),
            idle_timeout_secs: 300,
            connect_timeout_secs: 10,
            greeting: Some(DEFAULT_GREETING.to_string()),
            home: default_home(),
        }
    }
}

/// Upstream secret; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vitalchat")
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> PathBuf {
        default_home().join("config.toml")
    }

    /// Load from `path` (or the default location) and apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);
        let mut config = Self::load_file(&path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Read a config file; a missing file means defaults
    pub fn load_file(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            Config::default()
        };

        config.home = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(default_home);

        Ok(config)
    }

    /// Overlay values from the environment
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup(BASE_URL_ENV).filter(|u| !u.trim().is_empty()) {
            self.base_url = url;
        }
    }

    /// Write the configuration unless a file already exists.
    ///
    /// A key taken from the environment is left out of the file.
    pub fn init_file(&self, path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let template = Config {
            api_key: None,
            ..self.clone()
        };
        let content = toml::to_string_pretty(&template).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(true)
    }

    /// The upstream key, required before any interaction
    pub fn api_key(&self) -> Result<ApiKey> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(ApiKey::new(key)),
            _ => bail!(
                "No API key configured. Set {} or add `api_key` to {}.",
                API_KEY_ENV,
                self.home.join("config.toml").display()
            ),
        }
    }

    /// Full URL of the chat endpoint
    pub fn chat_url(&self) -> String {
        format!("{}/chat-messages", self.base_url.trim_end_matches('/'))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    /// Human-readable summary with the key redacted
    pub fn describe(&self) -> String {
        let key = match self.api_key() {
            Ok(_) => "configured",
            Err(_) => "missing",
        };
        format!(
            "config dir:       {}\nbase url:         {}\nuser label:       {}\napi key:          {}\nidle timeout:     {}s\nconnect timeout:  {}s",
            self.home.display(),
            self.base_url,
            self.user,
            key,
            self.idle_timeout_secs,
            self.connect_timeout_secs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_file(&dir.path().join("config.toml")).unwrap();

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.user, DEFAULT_USER);
        assert_eq!(config.home, dir.path());
        assert!(config.api_key().is_err());
    }

    #[test]
    fn file_values_and_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "api_key = \"file-key\"\nbase_url = \"http://localhost:9000/v1/\"\nuser = \"tester\"\n",
        )
        .unwrap();

        let mut config = Config::load_file(&path).unwrap();
        assert_eq!(config.api_key().unwrap().expose(), "file-key");
        assert_eq!(config.chat_url(), "http://localhost:9000/v1/chat-messages");
        assert_eq!(config.idle_timeout_secs, 300);

        config.apply_env(|name| match name {
            API_KEY_ENV => Some("env-key".to_string()),
            BASE_URL_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.api_key().unwrap().expose(), "env-key");
        assert_eq!(config.base_url, "http://localhost:9000/v1/");
    }

    #[test]
    fn blank_key_is_missing() {
        let config = Config {
            api_key: Some("   ".to_string()),
            ..Config::default()
        };
        let err = config.api_key().unwrap_err().to_string();
        assert!(err.contains(API_KEY_ENV));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "base_url = [").unwrap();
        assert!(Config::load_file(&path).is_err());
    }

    #[test]
    fn init_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::default();

        assert!(config.init_file(&path).unwrap());
        assert!(!config.init_file(&path).unwrap());

        let reloaded = Config::load_file(&path).unwrap();
        assert_eq!(reloaded.base_url, DEFAULT_BASE_URL);
        assert_eq!(reloaded.greeting, config.greeting);
        assert!(reloaded.api_key.is_none());
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("secret");
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
    }
}
