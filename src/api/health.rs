use std::sync::Arc;

use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a config summary. The API key is never included.
pub fn health_handler(state: &Arc<AppState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "gemini-relay is running",
        "requests_seen": state.requests_seen(),
        "config": {
            "model": state.endpoint.model(),
            "upstream_host": state.endpoint.upstream_host(),
            "generation": {
                "temperature": config.generation.temperature,
                "max_output_tokens": config.generation.max_output_tokens,
                "max_prompt_chars": config.generation.max_prompt_chars,
            },
            "relay": {
                "idle_timeout_secs": config.relay.idle_timeout_secs,
                "channel_capacity": config.relay.channel_capacity,
            },
            "safety_settings_count": config.safety_settings.len(),
            "log_level": config.features.log_level,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn health_summary_omits_api_key() {
        let mut config = AppConfig::default();
        config.upstream.api_key = "super-secret-key".to_string();
        let state = Arc::new(AppState::from_config(config).unwrap());
        let Json(body) = health_handler(&state);
        assert_eq!(body["config"]["model"], "gemini-1.5-flash");
        assert_eq!(
            body["config"]["upstream_host"],
            "generativelanguage.googleapis.com"
        );
        assert_eq!(body["requests_seen"], 0);
        assert!(!body.to_string().contains("super-secret-key"));
    }
}
