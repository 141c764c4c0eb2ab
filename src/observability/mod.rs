pub mod token_counter;

use std::time::Instant;

use tracing_subscriber::EnvFilter;

use crate::stream::RelaySummary;

pub use token_counter::{estimate_tokens, merge_usage, TokenUsage};

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    let filter = EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Log the one-line summary of a finished relay operation.
pub fn log_relay_complete(
    request_id: &str,
    model: &str,
    prompt: &str,
    summary: &RelaySummary,
    start_time: Instant,
) {
    let usage = merge_usage(
        summary.usage.as_ref(),
        estimate_tokens(prompt),
        token_counter::estimate_tokens_from_bytes(summary.text_bytes),
    );
    tracing::info!(
        request_id = request_id,
        model = model,
        outcome = summary.outcome.as_str(),
        token_frames = summary.tokens,
        text_bytes = summary.text_bytes,
        upstream_chunks = summary.upstream_chunks,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "relay completed"
    );
}
