use crate::types::ApiKeyRecord;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "chat-stream.json";
const CONFIG_DIR_NAME: &str = "chat-stream";

/// Frame parsing behavior
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamSettings {
    /// Parse a final line that never received its newline instead of
    /// dropping it
    #[serde(default)]
    pub flush_trailing_line: bool,
}

fn default_timeout_secs() -> u64 {
    10
}

/// HTTP client timeouts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpSettings {
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Total timeout of the balance and model-list queries. Chat requests
    /// stream for as long as the provider keeps sending.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_timeout_secs(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl HttpSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Contents of `chat-stream.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatStreamConfig {
    #[serde(default)]
    pub api_keys: Vec<ApiKeyRecord>,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub http: HttpSettings,
    /// Enabled plugin uuids. Absent means every plugin not marked disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<String>>,
}

impl ChatStreamConfig {
    /// Load from `custom_path`, or from the first config directory that has
    /// a `chat-stream.json`
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self> {
        let custom = custom_path.is_some();
        let (config_path, searched_paths) = Self::determine_config_path(custom_path);

        if !config_path.exists() {
            return Err(Self::missing_config_error(&config_path, &searched_paths, custom));
        }

        Self::load_from_file(&config_path)
    }

    /// Like [`load`](Self::load), but an absent file yields the defaults
    pub fn load_or_default(custom_path: Option<PathBuf>) -> Result<Self> {
        if custom_path.is_some() {
            return Self::load(custom_path);
        }
        let (config_path, _) = Self::determine_config_path(None);
        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        let value: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        let value = substitute_env_vars_in_value(value)
            .with_context(|| format!("Failed to substitute env vars in {}", path.display()))?;

        serde_json::from_value(value)
            .with_context(|| format!("Invalid config: {}", path.display()))
    }

    pub fn default_path() -> PathBuf {
        Self::determine_config_path(None).0
    }

    fn determine_config_path(custom_path: Option<PathBuf>) -> (PathBuf, Vec<PathBuf>) {
        if let Some(path) = custom_path {
            return (path.clone(), vec![path]);
        }

        let mut searched_paths = Vec::new();
        for base_dir in config_directories() {
            let candidate = base_dir.join(CONFIG_FILE);
            if searched_paths.contains(&candidate) {
                continue;
            }
            let exists = candidate.exists();
            searched_paths.push(candidate.clone());
            if exists {
                return (candidate, searched_paths);
            }
        }

        let fallback = searched_paths
            .first()
            .cloned()
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        (fallback, searched_paths)
    }

    fn missing_config_error(
        resolved_path: &Path,
        searched_paths: &[PathBuf],
        custom: bool,
    ) -> anyhow::Error {
        if custom {
            return anyhow::anyhow!("Config file not found: {}", resolved_path.display());
        }

        let searched = searched_paths
            .iter()
            .map(|path| format!("  {}", path.display()))
            .collect::<Vec<_>>()
            .join("\n");

        anyhow::anyhow!(
            "Config file not found.\nSearched locations:\n{searched}\n\nCreate {} with your API keys.",
            resolved_path.display()
        )
    }
}

/// Candidate config directories, highest priority first
fn config_directories() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(custom_dir) = std::env::var("CHAT_STREAM_CONFIG_DIR") {
        candidates.push(PathBuf::from(custom_dir));
    }
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        candidates.push(PathBuf::from(xdg_config).join(CONFIG_DIR_NAME));
    }
    if let Some(home_dir) = dirs::home_dir() {
        candidates.push(home_dir.join(".config").join(CONFIG_DIR_NAME));
    }
    if let Some(system_config) = dirs::config_dir() {
        candidates.push(system_config.join(CONFIG_DIR_NAME));
    }
    if let Ok(current_dir) = std::env::current_dir() {
        candidates.push(current_dir.join(CONFIG_DIR_NAME));
    }

    let mut unique: Vec<PathBuf> = Vec::new();
    for dir in candidates {
        if !unique.contains(&dir) {
            unique.push(dir);
        }
    }
    unique
}

/// Recursively substitute `${VAR}` placeholders in string values
fn substitute_env_vars_in_value(value: serde_json::Value) -> Result<serde_json::Value> {
    use serde_json::Value;

    match value {
        Value::String(s) => Ok(Value::String(substitute_env_vars_in_string(&s)?)),
        Value::Object(map) => map
            .into_iter()
            .map(|(key, val)| Ok((key, substitute_env_vars_in_value(val)?)))
            .collect::<Result<serde_json::Map<_, _>>>()
            .map(Value::Object),
        Value::Array(items) => items
            .into_iter()
            .map(substitute_env_vars_in_value)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other),
    }
}

fn substitute_env_vars_in_string(input: &str) -> Result<String> {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        let end = rest[start..]
            .find('}')
            .map(|offset| start + offset)
            .ok_or_else(|| anyhow::anyhow!("Unclosed environment variable substitution: {input}"))?;

        let var_name = &rest[start + 2..end];
        let var_value = std::env::var(var_name)
            .with_context(|| format!("Environment variable not set: {var_name}"))?;

        result.push_str(&rest[..start]);
        result.push_str(&var_value);
        rest = &rest[end + 1..];
    }
    result.push_str(rest);

    Ok(result)
}
