//! Generative model seam.
//!
//! The pipeline consumes the model through [`ModelClient`] — a single
//! `invoke` that takes instruction text, the expected response shape, and a
//! bounded retry policy, and yields loosely-typed JSON. Shape enforcement is
//! deliberately *not* done here: the coercion layer ([`coerce`]) maps
//! whatever came back onto a defaulted struct plus diagnostics, so a shape
//! mismatch never propagates as a parse error.

pub mod coerce;
pub mod gemini;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

// ─── Retry policy ────────────────────────────────────────────────────────────

/// Bounded-retry policy passed into every external model call.
///
/// Total attempts = `1 + max_retries`; backoff between attempts is linear
/// (`backoff_base * attempt_number`).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Hard deadline per attempt.
    pub timeout: Duration,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn total_attempts(&self) -> u32 {
        1 + self.max_retries
    }

    /// Linear backoff before retrying `attempt` (1-indexed).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt)
    }

    /// Copy with caller-supplied per-request overrides applied.
    pub fn with_overrides(&self, retries: Option<u32>, timeout_secs: Option<u64>) -> Self {
        Self {
            max_retries: retries.unwrap_or(self.max_retries),
            timeout: timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.timeout),
            backoff_base: self.backoff_base,
        }
    }
}

// ─── Expected shapes ─────────────────────────────────────────────────────────

/// The field set the caller expects back from a model call.
///
/// Communicated to the client so the instruction can name the contract, and
/// to the coercion layer so unknown shapes default sensibly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedShape {
    /// `{ project_name, files: [{path, content}], metadata? }`
    Generation,
    /// `{ followups: [...] }`
    Followups,
    /// `{ files: [{path, content}], new_dependencies: [name], warnings? }`
    Overlay,
}

impl ExpectedShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpectedShape::Generation => "generation",
            ExpectedShape::Followups => "followups",
            ExpectedShape::Overlay => "overlay",
        }
    }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Every attempt failed. This is the one fatal upstream outcome —
    /// the terminal failure names the last underlying error.
    #[error("model call failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
    #[error("model client misconfigured: {0}")]
    Misconfigured(String),
}

// ─── Client trait ────────────────────────────────────────────────────────────

/// One opaque generation call against the hosted model.
///
/// Implementations must tolerate loosely-typed output (string-encoded JSON,
/// partial fields) and return the parsed [`Value`] as-is; defensive shaping
/// happens in [`coerce`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(
        &self,
        instruction: &str,
        shape: ExpectedShape,
        retry: &RetryPolicy,
    ) -> Result<Value, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let policy = RetryPolicy {
            max_retries: 2,
            timeout: Duration::from_secs(180),
            backoff_base: Duration::from_secs(1),
        };
        assert_eq!(policy.total_attempts(), 3);
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let policy = RetryPolicy {
            max_retries: 2,
            timeout: Duration::from_secs(180),
            backoff_base: Duration::from_secs(1),
        };
        let merged = policy.with_overrides(Some(0), None);
        assert_eq!(merged.max_retries, 0);
        assert_eq!(merged.timeout, Duration::from_secs(180));
    }
}
