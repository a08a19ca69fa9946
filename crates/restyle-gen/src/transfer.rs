//! Style transfer orchestration.
//!
//! Ties the pieces together: resolve the prompt, push one generation call
//! through the shared [`Throttler`], wait on the job with a [`Poller`] if
//! the provider did not finish inline, and pick out the output image.

use std::sync::Arc;

use serde::Serialize;

use restyle_core::model::{JobStatus, Prediction, StyleRequest};
use restyle_core::Error as CoreError;

use crate::config::{Config, GenerationParams, PollConfig};
use crate::error::{GenError, GenResult};
use crate::poll::Poller;
use crate::replicate::{PredictionApi, PredictionInput, ReplicateClient};
use crate::throttle::Throttler;

/// A finished style transfer.
#[derive(Debug, Clone, Serialize)]
pub struct Stylized {
    pub id: String,
    pub output_url: String,
    pub model: String,
    pub prompt: String,
    pub prediction: Prediction,
}

/// Runs style transfers against a provider, one throttled call at a time.
#[derive(Debug)]
pub struct StyleTransfer<A> {
    throttler: Throttler,
    poller: Arc<Poller<A>>,
    params: GenerationParams,
}

impl StyleTransfer<ReplicateClient> {
    /// Build a Replicate-backed transfer with its own throttler.
    ///
    /// # Errors
    /// Returns an error if no API token is configured or the HTTP client
    /// cannot be built.
    pub fn from_config(config: &Config) -> GenResult<Self> {
        let client = ReplicateClient::new(config)?;
        Ok(Self::new(
            client,
            Throttler::new(config.throttle.clone()),
            config.poll.clone(),
            config.generation.clone(),
        ))
    }
}

impl<A: PredictionApi + 'static> StyleTransfer<A> {
    /// `throttler` may be shared with other components calling the same
    /// provider.
    pub fn new(api: A, throttler: Throttler, poll: PollConfig, params: GenerationParams) -> Self {
        Self {
            throttler,
            poller: Arc::new(Poller::new(api, poll)),
            params,
        }
    }

    pub fn throttler(&self) -> &Throttler {
        &self.throttler
    }

    pub fn api(&self) -> &A {
        self.poller.source()
    }

    /// Stylize one photo.
    ///
    /// # Errors
    /// Invalid requests fail before anything is queued. Provider errors,
    /// job failure, poll timeout and rate-limit exhaustion come back as the
    /// matching [`GenError`] variant.
    pub async fn stylize(&self, request: &StyleRequest) -> GenResult<Stylized> {
        if request.image.as_str().trim().is_empty() {
            return Err(CoreError::InvalidRequest("image is required".into()).into());
        }
        let prompt = request.resolve_prompt()?;
        log::info!("style transfer requested with image {}", request.image);
        log::debug!("prompt: {}", prompt);

        let input = Arc::new(PredictionInput::new(
            request.image.as_str(),
            prompt.as_str(),
            &self.params,
        ));
        let poller = Arc::clone(&self.poller);

        log::info!(
            "queueing generation ({} already waiting)",
            self.throttler.pending()
        );
        let prediction = self
            .throttler
            .submit(move || {
                let poller = Arc::clone(&poller);
                let input = Arc::clone(&input);
                async move { generate(&poller, &input).await }
            })
            .await?;

        let output_url = prediction
            .output_url()
            .map(str::to_string)
            .ok_or_else(|| GenError::MissingOutput {
                id: prediction.id.clone(),
            })?;

        Ok(Stylized {
            id: prediction.id.clone(),
            output_url,
            model: self.api().model().to_string(),
            prompt,
            prediction,
        })
    }
}

/// One throttled unit of work: create the prediction and, unless the
/// provider already finished it, wait for it.
async fn generate<A: PredictionApi>(
    poller: &Poller<A>,
    input: &PredictionInput,
) -> GenResult<Prediction> {
    let created = poller.source().create_prediction(input).await?;
    match created.status {
        JobStatus::Succeeded => Ok(created),
        JobStatus::Failed => Err(GenError::JobFailed {
            message: created
                .error_message()
                .unwrap_or_else(|| "Prediction failed".to_string()),
            id: created.id,
        }),
        JobStatus::Pending(_) => {
            log::info!(
                "prediction {} is {}; waiting for result",
                created.id,
                created.status
            );
            poller.await_completion(&created.id).await
        }
    }
}
