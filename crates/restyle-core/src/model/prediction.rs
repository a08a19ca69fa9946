use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of an asynchronous generation job.
///
/// Only `succeeded` and `failed` are terminal. Every other value the
/// provider reports (`starting`, `processing`, `canceled`, or something
/// new) is treated as still in flight and kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Succeeded,
    Failed,
    Pending(String),
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Pending(status) => status,
        }
    }
}

impl From<String> for JobStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            _ => Self::Pending(status),
        }
    }
}

impl From<&str> for JobStatus {
    fn from(status: &str) -> Self {
        Self::from(status.to_string())
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending(status) => status,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generation job as reported by the provider.
///
/// Fields the model does not name are kept in `extra` so the full provider
/// response can be echoed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: JobStatus,

    /// Output reference: a URL string or a list of URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Error text reported for a failed job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Prediction {
    #[must_use]
    pub fn new(id: impl Into<String>, status: impl Into<JobStatus>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            output: None,
            error: None,
            url: None,
            created_at: None,
            completed_at: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(serde_json::Value::String(error.into()));
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// The first usable output reference.
    ///
    /// Prefers the first element of a list output, then a plain string
    /// output, then the top-level `url`.
    pub fn output_url(&self) -> Option<&str> {
        let from_output = match &self.output {
            Some(serde_json::Value::Array(items)) => items.first().and_then(|v| v.as_str()),
            Some(serde_json::Value::String(url)) => Some(url.as_str()),
            _ => None,
        };
        from_output
            .filter(|url| !url.is_empty())
            .or_else(|| self.url.as_deref().filter(|url| !url.is_empty()))
    }

    /// Error text for a failed job, if the provider sent any.
    pub fn error_message(&self) -> Option<String> {
        match &self.error {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(message)) => Some(message.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_terminal_values() {
        assert_eq!(JobStatus::from("succeeded"), JobStatus::Succeeded);
        assert_eq!(JobStatus::from("failed"), JobStatus::Failed);
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_other_values_are_pending() {
        for raw in ["starting", "processing", "canceled", "Succeeded", ""] {
            let status = JobStatus::from(raw);
            assert!(!status.is_terminal(), "{raw:?} should not be terminal");
            assert_eq!(status.as_str(), raw);
        }
    }

    #[test]
    fn test_prediction_deserialize_replicate_shape() {
        let prediction: Prediction = serde_json::from_value(json!({
            "id": "gm3qorzdhgbfurvjtvhg6dckhu",
            "status": "processing",
            "output": null,
            "created_at": "2024-05-01T12:00:00.123456Z",
            "version": "abc123",
            "urls": { "get": "https://api.replicate.com/v1/predictions/gm3" }
        }))
        .unwrap();

        assert_eq!(prediction.status, JobStatus::Pending("processing".into()));
        assert!(prediction.created_at.is_some());
        assert!(prediction.extra.contains_key("version"));
        assert!(prediction.extra.contains_key("urls"));
        assert!(prediction.output_url().is_none());
    }

    #[test]
    fn test_prediction_serializes_status_as_string() {
        let prediction = Prediction::new("p1", "succeeded");
        let value = serde_json::to_value(&prediction).unwrap();
        assert_eq!(value["status"], "succeeded");
        assert!(value.get("output").is_none());
    }

    #[test]
    fn test_output_url_prefers_first_list_item() {
        let prediction = Prediction::new("p1", "succeeded")
            .with_output(json!(["https://a.example/1.jpg", "https://a.example/2.jpg"]))
            .with_url("https://fallback.example");
        assert_eq!(prediction.output_url(), Some("https://a.example/1.jpg"));
    }

    #[test]
    fn test_output_url_string_output() {
        let prediction =
            Prediction::new("p1", "succeeded").with_output(json!("https://a.example/out.jpg"));
        assert_eq!(prediction.output_url(), Some("https://a.example/out.jpg"));
    }

    #[test]
    fn test_output_url_falls_back_to_url() {
        let prediction = Prediction::new("p1", "succeeded")
            .with_output(json!([]))
            .with_url("https://fallback.example/out.jpg");
        assert_eq!(
            prediction.output_url(),
            Some("https://fallback.example/out.jpg")
        );
    }

    #[test]
    fn test_error_message() {
        assert!(Prediction::new("p1", "failed").error_message().is_none());
        let failed = Prediction::new("p1", "failed").with_error("NSFW content detected");
        assert_eq!(
            failed.error_message().as_deref(),
            Some("NSFW content detected")
        );
    }
}
