use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_generation(config)?;
    validate_safety_settings(config)?;
    validate_relay(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if server.cors_allow_origin.trim().is_empty() {
        return Err(validation_err("server.cors_allow_origin cannot be empty"));
    }
    if http::HeaderValue::from_str(&server.cors_allow_origin).is_err() {
        return Err(validation_err(
            "server.cors_allow_origin is not a valid header value",
        ));
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://") {
        return Err(validation_err(
            "upstream.base_url must start with http:// or https://",
        ));
    }
    if upstream.api_key.trim().is_empty() {
        return Err(validation_err(format!(
            "upstream.api_key cannot be empty (set it in the file or via {})",
            super::API_KEY_ENV
        )));
    }
    let model = upstream.model.trim();
    if model.is_empty() {
        return Err(validation_err("upstream.model cannot be empty"));
    }
    if model.contains(['/', '?', '#', ' ']) {
        return Err(validation_err(format!(
            "upstream.model '{model}' contains characters not allowed in a model id"
        )));
    }
    validate_proxy_url("proxy", upstream.proxy.as_deref())?;
    Ok(())
}

fn validate_proxy_url(field_name: &str, proxy: Option<&str>) -> Result<(), ConfigError> {
    let Some(proxy) = proxy.map(str::trim) else {
        return Ok(());
    };
    if proxy.is_empty() {
        return Err(validation_err(format!(
            "upstream.{field_name} cannot be empty when set"
        )));
    }
    let parsed = url::Url::parse(proxy).map_err(|err| {
        validation_err(format!("upstream.{field_name} is not a valid URL: {err}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "upstream.{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_generation(config: &AppConfig) -> Result<(), ConfigError> {
    let generation = &config.generation;
    if !(0.0..=2.0).contains(&generation.temperature) {
        return Err(validation_err(
            "generation.temperature must be between 0.0 and 2.0",
        ));
    }
    if !(0.0..=1.0).contains(&generation.top_p) {
        return Err(validation_err("generation.top_p must be between 0.0 and 1.0"));
    }
    if generation.max_output_tokens == 0 {
        return Err(validation_err(
            "generation.max_output_tokens must be greater than 0",
        ));
    }
    if generation.min_output_tokens > generation.max_output_tokens {
        return Err(validation_err(
            "generation.min_output_tokens cannot exceed generation.max_output_tokens",
        ));
    }
    if generation.max_prompt_chars == 0 {
        return Err(validation_err(
            "generation.max_prompt_chars must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_safety_settings(config: &AppConfig) -> Result<(), ConfigError> {
    for setting in &config.safety_settings {
        if setting.category.trim().is_empty() || setting.threshold.trim().is_empty() {
            return Err(validation_err(
                "safety_settings entries need a category and a threshold",
            ));
        }
    }
    Ok(())
}

fn validate_relay(config: &AppConfig) -> Result<(), ConfigError> {
    if config.relay.channel_capacity == 0 {
        return Err(validation_err(
            "relay.channel_capacity must be greater than 0",
        ));
    }
    if config.relay.idle_timeout_secs == Some(0) {
        return Err(validation_err(
            "relay.idle_timeout_secs must be greater than 0 when set",
        ));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
