use std::sync::Arc;

use crate::{
    capabilities::{GenerationClient, InferenceTransport, VariationPicker},
    errors::PipelineError,
    models::{GenerationRequest, GenerationResult, ImageArtifact, Prompt},
    util::{ArtifactWriter, SlotMetadata},
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct SlotFailure {
    pub slot: usize,
    pub variation: String,
    pub error: PipelineError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Complete,
    Partial,
    Empty,
}

#[derive(Debug)]
pub struct BatchReport {
    pub requested: usize,
    /// Persisted variants in slot order.
    pub artifacts: Vec<ImageArtifact>,
    pub failures: Vec<SlotFailure>,
}

impl BatchReport {
    pub fn outcome(&self) -> BatchOutcome {
        if self.artifacts.is_empty() {
            BatchOutcome::Empty
        } else if self.artifacts.len() == self.requested {
            BatchOutcome::Complete
        } else {
            BatchOutcome::Partial
        }
    }

    pub fn succeeded_slots(&self) -> Vec<usize> {
        self.artifacts.iter().map(|artifact| artifact.slot).collect()
    }
}

/// Fans one prompt out into `count` concurrent generation requests and
/// persists whatever comes back.
pub struct BatchGenerator<T> {
    client: Arc<GenerationClient<T>>,
    picker: VariationPicker,
    writer: ArtifactWriter,
    inference_steps: u32,
}

impl<T> BatchGenerator<T>
where
    T: InferenceTransport + 'static,
{
    pub fn new(
        client: GenerationClient<T>,
        picker: VariationPicker,
        writer: ArtifactWriter,
        inference_steps: u32,
    ) -> Self {
        Self {
            client: Arc::new(client),
            picker,
            writer,
            inference_steps,
        }
    }

    pub fn build_requests(&self, prompt: &Prompt, count: usize) -> Vec<GenerationRequest> {
        (1..=count)
            .map(|slot| GenerationRequest {
                slot,
                prompt: prompt.clone(),
                variation: self.picker.pick(),
                inference_steps: self.inference_steps,
            })
            .collect()
    }

    pub async fn generate_batch(&self, prompt: &Prompt, count: usize, run_id: Uuid) -> BatchReport {
        let requests = self.build_requests(prompt, count);
        self.run_requests(prompt, requests, run_id).await
    }

    /// `requests` must carry slots `1..=len` in order.
    async fn run_requests(
        &self,
        prompt: &Prompt,
        requests: Vec<GenerationRequest>,
        run_id: Uuid,
    ) -> BatchReport {
        let count = requests.len();
        let mut results = self.dispatch(&requests).await;

        let mut artifacts = Vec::new();
        let mut failures = Vec::new();

        for request in requests {
            let result = results[request.slot - 1].take().unwrap_or_else(|| {
                Err(PipelineError::other(
                    "generation task ended without reporting a result",
                ))
            });

            let payload = match result {
                Ok(payload) => payload,
                Err(err) => {
                    error!(
                        target: "batch_generator",
                        slot = request.slot,
                        error = %err,
                        "skipping image due to failed generation"
                    );
                    failures.push(SlotFailure {
                        slot: request.slot,
                        variation: request.variation,
                        error: err,
                    });
                    continue;
                }
            };

            let metadata = SlotMetadata {
                run_id,
                variation: request.variation.clone(),
                inference_steps: request.inference_steps,
            };

            match self
                .writer
                .persist(prompt, request.slot, &payload, &metadata)
                .await
            {
                Ok(artifact) => {
                    info!(
                        target: "batch_generator",
                        slot = artifact.slot,
                        variation = %artifact.variation,
                        bytes = artifact.size_bytes,
                        path = %artifact.path.display(),
                        "image saved"
                    );
                    artifacts.push(artifact);
                }
                Err(err) => {
                    error!(
                        target: "batch_generator",
                        slot = request.slot,
                        error = %err,
                        "failed to persist generated image"
                    );
                    failures.push(SlotFailure {
                        slot: request.slot,
                        variation: request.variation,
                        error: err,
                    });
                }
            }
        }

        BatchReport {
            requested: count,
            artifacts,
            failures,
        }
    }

    /// Spawns one task per request and waits until every slot has reported.
    /// Index `i` of the returned vector belongs to slot `i + 1`.
    async fn dispatch(&self, requests: &[GenerationRequest]) -> Vec<Option<GenerationResult>> {
        let count = requests.len();
        let (tx, mut rx) = mpsc::channel::<(usize, GenerationResult)>(count.max(1));

        let handles: Vec<_> = requests
            .iter()
            .cloned()
            .map(|request| {
                let client = Arc::clone(&self.client);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = client.generate(&request).await;
                    let _ = tx.send((request.slot, result)).await;
                })
            })
            .collect();
        drop(tx);

        let mut results: Vec<Option<GenerationResult>> = (0..count).map(|_| None).collect();
        let mut received = 0;
        while received < count {
            match rx.recv().await {
                Some((slot, result)) => {
                    results[slot - 1] = Some(result);
                    received += 1;
                }
                None => break,
            }
        }

        for handle in handles {
            if let Err(err) = handle.await {
                warn!(
                    target: "batch_generator",
                    error = %err,
                    "generation task aborted"
                );
            }
        }

        results
    }
}
