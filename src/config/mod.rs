pub mod validation;

use serde::{Deserialize, Serialize};

use crate::protocol::gemini::{GeminiGenerationConfig, GeminiSafetySetting};

use self::validation::validate_config;

/// Environment variable consulted when `upstream.api_key` is left empty.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Upstream request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_cors_allow_origin")]
    pub cors_allow_origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_cors_allow_origin() -> String {
    "*".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            http_use_env_proxy: false,
            base_path: String::new(),
            cors_allow_origin: default_cors_allow_origin(),
            runtime_worker_threads: None,
        }
    }
}

/// Upstream Gemini service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_model(),
            proxy: None,
        }
    }
}

/// Defaults and bounds applied to inbound generation requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_min_output_tokens")]
    pub min_output_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

fn default_temperature() -> f64 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    2048
}
fn default_min_output_tokens() -> u32 {
    1
}
fn default_top_p() -> f64 {
    0.95
}
fn default_top_k() -> u32 {
    40
}
fn default_max_prompt_chars() -> usize {
    32_000
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            min_output_tokens: default_min_output_tokens(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

impl GenerationConfig {
    /// Upstream generation parameters for one request.
    #[must_use]
    pub fn to_upstream(&self, temperature: f64, max_output_tokens: u32) -> GeminiGenerationConfig {
        GeminiGenerationConfig {
            temperature,
            max_output_tokens,
            top_p: self.top_p,
            top_k: self.top_k,
        }
    }
}

/// Streaming relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Longest gap between upstream chunks, in seconds. Unset means no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    32
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

fn default_safety_settings() -> Vec<GeminiSafetySetting> {
    HARM_CATEGORIES
        .iter()
        .map(|category| GeminiSafetySetting {
            category: (*category).to_string(),
            threshold: "BLOCK_MEDIUM_AND_ABOVE".to_string(),
        })
        .collect()
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default = "default_safety_settings")]
    pub safety_settings: Vec<GeminiSafetySetting>,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            generation: GenerationConfig::default(),
            safety_settings: default_safety_settings(),
            relay: RelayConfig::default(),
            features: FeaturesConfig::default(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
///
/// An empty `upstream.api_key` is filled from `GEMINI_API_KEY`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents, |name| std::env::var(name).ok())
}

/// Parse and validate a YAML document. `env` resolves environment
/// variables for fields that fall back to them.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(
    contents: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig, ConfigError> {
    let mut config: AppConfig = serde_yaml::from_str(contents)?;
    if config.upstream.api_key.trim().is_empty() {
        if let Some(key) = env(API_KEY_ENV) {
            config.upstream.api_key = key.trim().to_string();
        }
    }
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 8000);
        assert!(!config.server.http_use_env_proxy);
        assert_eq!(config.server.http_pool_max_idle_per_host, 16);
        assert_eq!(config.upstream.model, "gemini-1.5-flash");
        assert_eq!(config.safety_settings.len(), 4);
        assert_eq!(config.relay.channel_capacity, 32);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("upstream:\n  api_key: k\n", no_env).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.cors_allow_origin, "*");
        assert_eq!(
            config.upstream.base_url,
            "https://generativelanguage.googleapis.com/v1beta"
        );
        assert_eq!(config.generation.max_output_tokens, 2048);
        assert!((config.generation.temperature - 0.7).abs() < f64::EPSILON);
        assert!(config.relay.idle_timeout_secs.is_none());
        assert_eq!(config.features.log_level, "INFO");
        assert!(config
            .safety_settings
            .iter()
            .all(|s| s.threshold == "BLOCK_MEDIUM_AND_ABOVE"));
    }

    #[test]
    fn test_api_key_falls_back_to_env() {
        let config = parse_config("server:\n  port: 9000\n", |name| {
            (name == API_KEY_ENV).then(|| " from-env ".to_string())
        })
        .unwrap();
        assert_eq!(config.upstream.api_key, "from-env");
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_file_api_key_wins_over_env() {
        let config = parse_config("upstream:\n  api_key: from-file\n", |_| {
            Some("from-env".to_string())
        })
        .unwrap();
        assert_eq!(config.upstream.api_key, "from-file");
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let err = parse_config("{}", no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_api_key_is_never_serialized() {
        let config = parse_config("upstream:\n  api_key: secret\n", no_env).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_explicit_safety_settings_replace_defaults() {
        let yaml = "upstream:\n  api_key: k\nsafety_settings:\n  - category: HARM_CATEGORY_HARASSMENT\n    threshold: BLOCK_NONE\n";
        let config = parse_config(yaml, no_env).unwrap();
        assert_eq!(config.safety_settings.len(), 1);
        assert_eq!(config.safety_settings[0].threshold, "BLOCK_NONE");
    }
}
