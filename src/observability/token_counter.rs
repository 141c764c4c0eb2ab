use serde::Serialize;

use crate::protocol::gemini::GeminiUsageMetadata;

/// Token accounting reported to clients and logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Estimate tokens from a byte count already known to the caller.
#[must_use]
pub fn estimate_tokens_from_bytes(bytes: usize) -> u64 {
    (bytes as u64).div_ceil(4)
}

/// Merge upstream-reported usage with local estimates.
///
/// Non-zero upstream values always win; missing or zero fields are filled
/// from the estimates, and a missing total is the sum of the resolved parts.
#[must_use]
pub fn merge_usage(
    upstream: Option<&GeminiUsageMetadata>,
    estimated_prompt: u64,
    estimated_completion: u64,
) -> TokenUsage {
    let pick = |value: Option<u64>, estimate: u64| match value {
        Some(v) if v > 0 => v,
        _ => estimate,
    };
    let upstream = upstream.copied().unwrap_or_default();
    let prompt_tokens = pick(upstream.prompt_token_count, estimated_prompt);
    let completion_tokens = pick(upstream.candidates_token_count, estimated_completion);
    let total_tokens = pick(upstream.total_token_count, prompt_tokens + completion_tokens);

    TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_nonempty() {
        assert_eq!(estimate_tokens("Hello, world!"), 4);
    }

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens_from_bytes(0), 0);
    }

    #[test]
    fn test_merge_usage_prefers_upstream() {
        let upstream = GeminiUsageMetadata {
            prompt_token_count: Some(100),
            candidates_token_count: Some(50),
            total_token_count: Some(150),
        };
        let merged = merge_usage(Some(&upstream), 999, 999);
        assert_eq!(
            merged,
            TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            }
        );
    }

    #[test]
    fn test_merge_usage_fills_missing() {
        let merged = merge_usage(None, 40, 20);
        assert_eq!(merged.prompt_tokens, 40);
        assert_eq!(merged.completion_tokens, 20);
        assert_eq!(merged.total_tokens, 60);
    }

    #[test]
    fn test_merge_usage_fills_zero_and_partial() {
        let upstream = GeminiUsageMetadata {
            prompt_token_count: Some(100),
            candidates_token_count: Some(0),
            total_token_count: None,
        };
        let merged = merge_usage(Some(&upstream), 50, 25);
        assert_eq!(merged.prompt_tokens, 100);
        assert_eq!(merged.completion_tokens, 25);
        assert_eq!(merged.total_tokens, 125);
    }
}
