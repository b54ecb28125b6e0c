use crate::{
    capabilities::retry::{RetryDecision, RetryPolicy},
    config::InferenceConfig,
    errors::{PipelineError, Result},
    models::{GenerationRequest, GenerationResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, error, warn};

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct InferencePayload {
    pub inputs: String,
    pub parameters: InferenceParameters,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct InferenceParameters {
    pub num_inference_steps: u32,
}

impl From<&GenerationRequest> for InferencePayload {
    fn from(request: &GenerationRequest) -> Self {
        Self {
            inputs: request.input_text(),
            parameters: InferenceParameters {
                num_inference_steps: request.inference_steps,
            },
        }
    }
}

/// One round trip to the inference service. Implementations report a
/// rate-limit response as [`PipelineError::RateLimited`].
#[async_trait]
pub trait InferenceTransport: Send + Sync {
    async fn submit(&self, payload: &InferencePayload) -> Result<Bytes>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl InferenceTransport for HttpTransport {
    async fn submit(&self, payload: &InferencePayload) -> Result<Bytes> {
        let mut builder = self.client.post(&self.endpoint).json(payload);

        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RateLimited);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::transport(format!(
                "service returned status {status}: {}",
                body.trim()
            )));
        }

        Ok(response.bytes().await?)
    }
}

/// Issues a single generation request and applies the retry policy around it.
/// Every outcome, including exhausted retries, comes back as a value.
pub struct GenerationClient<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: InferenceTransport> GenerationClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let payload = InferencePayload::from(request);
        let attempts = AtomicU32::new(0);
        let (transport, policy, payload, counter) =
            (&self.transport, &self.policy, &payload, &attempts);

        let result = Retry::spawn(self.policy.strategy(), move || async move {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(
                target: "generation_client",
                slot = request.slot,
                attempt,
                input = %payload.inputs,
                "submitting generation request"
            );

            let err = match transport.submit(payload).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) => err,
            };

            match policy.decide(attempt, &err) {
                RetryDecision::RetryAfter(backoff) => {
                    warn!(
                        target: "generation_client",
                        slot = request.slot,
                        attempt,
                        backoff_secs = backoff.as_secs_f32(),
                        "too many requests, retrying after backoff"
                    );
                    Err(RetryError::Transient {
                        err,
                        retry_after: None,
                    })
                }
                RetryDecision::GiveUp => Err(RetryError::Permanent(err)),
            }
        })
        .await;

        result.map_err(|err| {
            let attempts = attempts.load(Ordering::SeqCst);
            let err = self.policy.exhausted(attempts, err);
            error!(
                target: "generation_client",
                slot = request.slot,
                attempts,
                error = %err,
                "generation request failed"
            );
            err
        })
    }
}
