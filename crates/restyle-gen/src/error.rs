//! Error types for generation requests.

use std::time::Duration;

use thiserror::Error;

use crate::throttle::{RateLimit, Throttled};

/// Errors that can occur while generating a stylized image.
#[derive(Debug, Error)]
pub enum GenError {
    /// The provider answered 429.
    #[error("rate limited by provider: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// A call kept hitting the rate limit past the configured retry cap.
    #[error("still rate limited after {retries} retries: {message}")]
    RateLimitExhausted { retries: u32, message: String },

    /// The provider returned a non-success status other than 429.
    #[error("provider error {status}: {message}")]
    Api { status: u16, message: String },

    /// An error propagated from `reqwest`.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// A provider response could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The polled job reached the `failed` status.
    #[error("prediction {id} failed: {message}")]
    JobFailed { id: String, message: String },

    /// The job was still running when the poll budget ran out.
    #[error("timed out waiting for prediction {id} after {attempts} polls")]
    PollTimeout { id: String, attempts: u32 },

    /// The job succeeded but carried no output reference.
    #[error("prediction {id} succeeded without an output URL")]
    MissingOutput { id: String },

    /// No provider API token is configured.
    #[error("no API token configured (set RESTYLE_REPLICATE_API_TOKEN)")]
    MissingToken,

    /// The throttler dropped the call without answering.
    #[error("queued call was abandoned before it completed")]
    Abandoned,

    /// An error propagated from the core domain layer.
    #[error(transparent)]
    Core(#[from] restyle_core::Error),
}

impl GenError {
    /// Returns `true` for either rate-limit kind.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::RateLimitExhausted { .. }
        )
    }

    /// HTTP status a front end should answer with for this error.
    ///
    /// Rate limiting, job failure and poll timeout each get their own code
    /// so clients can tell "try later", "the job broke" and "still running"
    /// apart.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::RateLimited { .. } | Self::RateLimitExhausted { .. } => 429,
            Self::Core(
                restyle_core::Error::InvalidRequest(_) | restyle_core::Error::UnsupportedImage(_),
            ) => 400,
            Self::MissingToken => 401,
            Self::Api { .. }
            | Self::Request(_)
            | Self::Parse { .. }
            | Self::JobFailed { .. }
            | Self::MissingOutput { .. } => 502,
            Self::PollTimeout { .. } => 504,
            Self::Abandoned | Self::Core(_) => 500,
        }
    }
}

impl Throttled for GenError {
    fn rate_limit(&self) -> Option<RateLimit> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(RateLimit {
                retry_after: *retry_after,
            }),
            _ => None,
        }
    }

    fn exhausted(self, retries: u32) -> Self {
        let message = match self {
            Self::RateLimited { message, .. } => message,
            other => other.to_string(),
        };
        Self::RateLimitExhausted { retries, message }
    }

    fn abandoned() -> Self {
        Self::Abandoned
    }
}

/// Convenience alias for generation results.
pub type GenResult<T> = std::result::Result<T, GenError>;
