//! Replicate prediction API client.
//!
//! Creates predictions for the configured model and fetches their status.
//! Rate-limit answers (HTTP 429) are turned into
//! [`GenError::RateLimited`] carrying the provider's retry hint so the
//! [`Throttler`](crate::throttle::Throttler) can back off and retry.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use restyle_core::model::Prediction;

use crate::config::{Config, GenerationParams};
use crate::error::{GenError, GenResult};
use crate::poll::StatusSource;

const USER_AGENT: &str = "restyle/0.1.0 (https://github.com/oxur/restyle)";

// ---------------------------------------------------------------------------
// Request / error bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CreatePrediction<'a> {
    input: &'a PredictionInput,
}

/// Model input for a depth-conditioned style transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionInput {
    pub control_image: String,
    pub prompt: String,
    pub num_inference_steps: u32,
    pub guidance: f64,
    pub control_strength: f64,
    pub output_format: String,
    pub output_quality: u32,
}

impl PredictionInput {
    pub fn new(
        control_image: impl Into<String>,
        prompt: impl Into<String>,
        params: &GenerationParams,
    ) -> Self {
        Self {
            control_image: control_image.into(),
            prompt: prompt.into(),
            num_inference_steps: params.num_inference_steps,
            guidance: params.guidance,
            control_strength: params.control_strength,
            output_format: params.output_format.clone(),
            output_quality: params.output_quality,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    retry_after: Option<f64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Replicate API client.
#[derive(Clone)]
pub struct ReplicateClient {
    http: Client,
    api_base: String,
    model: String,
    token: String,
}

impl ReplicateClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    /// Returns [`GenError::MissingToken`] when no API token is configured,
    /// or an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> GenResult<Self> {
        let token = config
            .replicate_api_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(GenError::MissingToken)?;

        let http = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            token,
        })
    }

    /// Start a prediction.
    ///
    /// Asks the provider to hold the connection until the prediction
    /// finishes, so the returned status is often already `succeeded`. When
    /// it is not, the caller should wait on the returned id.
    pub async fn create_prediction(&self, input: &PredictionInput) -> GenResult<Prediction> {
        let url = format!("{}/v1/models/{}/predictions", self.api_base, self.model);
        log::debug!("creating prediction on {}", self.model);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Prefer", "wait")
            .json(&CreatePrediction { input })
            .send()
            .await?;

        let prediction = parse_prediction(response).await?;
        log::info!(
            "created prediction {} (status: {})",
            prediction.id,
            prediction.status
        );
        Ok(prediction)
    }

    /// Fetch the current state of a prediction.
    pub async fn get_prediction(&self, id: &str) -> GenResult<Prediction> {
        let url = format!("{}/v1/predictions/{}", self.api_base, id);

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Token {}", self.token))
            .send()
            .await?;

        parse_prediction(response).await
    }
}

impl fmt::Debug for ReplicateClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicateClient")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// A provider that can start predictions and report on them.
#[async_trait]
pub trait PredictionApi: StatusSource {
    async fn create_prediction(&self, input: &PredictionInput) -> GenResult<Prediction>;

    /// Model identifier reported back to callers.
    fn model(&self) -> &str;
}

#[async_trait]
impl StatusSource for ReplicateClient {
    async fn fetch_status(&self, id: &str) -> GenResult<Prediction> {
        self.get_prediction(id).await
    }
}

#[async_trait]
impl PredictionApi for ReplicateClient {
    async fn create_prediction(&self, input: &PredictionInput) -> GenResult<Prediction> {
        ReplicateClient::create_prediction(self, input).await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

async fn parse_prediction(response: Response) -> GenResult<Prediction> {
    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        log::error!("Replicate API error: {} {}", status, body);
        return Err(error_from_response(status, retry_after.as_deref(), &body));
    }

    response.json::<Prediction>().await.map_err(|e| GenError::Parse {
        message: e.to_string(),
    })
}

/// Classify a non-success response.
///
/// A 429 takes its retry hint from the JSON body's `retry_after` (seconds),
/// falling back to the `Retry-After` header.
fn error_from_response(
    status: StatusCode,
    retry_after_header: Option<&str>,
    body: &str,
) -> GenError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = parsed.retry_after.and_then(seconds).or_else(|| {
            retry_after_header
                .and_then(|h| h.trim().parse::<f64>().ok())
                .and_then(seconds)
        });
        return GenError::RateLimited {
            retry_after,
            message: parsed.detail.unwrap_or_else(|| "Rate limited".to_string()),
        };
    }

    GenError::Api {
        status: status.as_u16(),
        message: parsed.detail.unwrap_or_else(|| body.to_string()),
    }
}

/// A zero hint counts as no hint, so the configured default backoff applies.
fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_token(token: Option<&str>) -> Config {
        Config {
            replicate_api_token: token.map(str::to_string),
            ..Config::default()
        }
    }

    #[test]
    fn test_client_requires_token() {
        let err = ReplicateClient::new(&config_with_token(None)).unwrap_err();
        assert!(matches!(err, GenError::MissingToken));
        let err = ReplicateClient::new(&config_with_token(Some("  "))).unwrap_err();
        assert!(matches!(err, GenError::MissingToken));
    }

    #[test]
    fn test_client_debug_redacts_token() {
        let client = ReplicateClient::new(&config_with_token(Some("r8_secret"))).unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("ReplicateClient"));
        assert!(debug.contains("flux-depth-dev"));
        assert!(!debug.contains("r8_secret"));
    }

    #[test]
    fn test_api_base_trailing_slash_trimmed() {
        let mut config = config_with_token(Some("t"));
        config.api_base = "http://localhost:5000/".to_string();
        let client = ReplicateClient::new(&config).unwrap();
        assert_eq!(client.api_base, "http://localhost:5000");
    }

    #[test]
    fn test_prediction_input_body() {
        let input = PredictionInput::new(
            "https://example.com/me.jpg",
            "a portrait in the style of Vermeer",
            &GenerationParams::default(),
        );
        let body = serde_json::to_value(CreatePrediction { input: &input }).unwrap();
        assert_eq!(body["input"]["control_image"], "https://example.com/me.jpg");
        assert_eq!(body["input"]["num_inference_steps"], 24);
        assert_eq!(body["input"]["guidance"], 12.0);
        assert_eq!(body["input"]["control_strength"], 0.8);
        assert_eq!(body["input"]["output_format"], "jpg");
        assert_eq!(body["input"]["output_quality"], 90);
    }

    #[test]
    fn test_429_uses_body_retry_after() {
        let err = error_from_response(
            StatusCode::TOO_MANY_REQUESTS,
            Some("30"),
            r#"{"detail":"Request was throttled.","retry_after":4}"#,
        );
        match err {
            GenError::RateLimited {
                retry_after,
                message,
            } => {
                assert_eq!(retry_after, Some(Duration::from_secs(4)));
                assert_eq!(message, "Request was throttled.");
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn test_429_falls_back_to_header() {
        let err = error_from_response(StatusCode::TOO_MANY_REQUESTS, Some("7"), "not json");
        assert!(matches!(
            err,
            GenError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(7)
        ));
    }

    #[test]
    fn test_429_without_hint() {
        let err = error_from_response(StatusCode::TOO_MANY_REQUESTS, None, "{}");
        assert!(matches!(
            err,
            GenError::RateLimited { retry_after: None, ref message } if message == "Rate limited"
        ));
    }

    #[test]
    fn test_other_status_is_api_error() {
        let err = error_from_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            None,
            r#"{"detail":"Input validation failed"}"#,
        );
        assert!(matches!(
            err,
            GenError::Api { status: 422, ref message } if message == "Input validation failed"
        ));

        let err = error_from_response(StatusCode::BAD_GATEWAY, None, "upstream down");
        assert!(matches!(
            err,
            GenError::Api { status: 502, ref message } if message == "upstream down"
        ));
    }

    #[test]
    fn test_negative_retry_after_ignored() {
        assert_eq!(seconds(-1.0), None);
        assert_eq!(seconds(f64::NAN), None);
        assert_eq!(seconds(1e300), None);
        assert_eq!(seconds(1.5), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_zero_retry_after_is_no_hint() {
        assert_eq!(seconds(0.0), None);
        let err = error_from_response(
            StatusCode::TOO_MANY_REQUESTS,
            Some("0"),
            r#"{"detail":"Request was throttled.","retry_after":0}"#,
        );
        assert!(matches!(err, GenError::RateLimited { retry_after: None, .. }));
    }
}
