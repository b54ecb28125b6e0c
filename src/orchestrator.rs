use std::{sync::Arc, time::Duration};

use crate::{
    capabilities::{
        BatchGenerator, BatchOutcome, FfmpegEncoder, FfmpegPlayback, GenerationClient,
        HttpTransport, InferenceTransport, PlaybackBackend, PlaybackOutcome, Player, RetryPolicy,
        VariationPicker, VideoAssembler, VideoEncoder,
    },
    config::AppConfig,
    errors::{PipelineError, Result},
    models::{Prompt, VideoArtifact},
    trigger::PipelineRunner,
    util::ArtifactWriter,
};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// What one activation produced. `video` is `None` when assembly was skipped
/// because the batch came back empty; `preview` and `playback` are `None` when
/// their step did not run.
#[derive(Debug)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub prompt: Prompt,
    pub batch: BatchOutcome,
    pub images: usize,
    pub preview: Option<Result<PlaybackOutcome>>,
    pub video: Option<Result<VideoArtifact>>,
    pub playback: Option<Result<PlaybackOutcome>>,
}

pub struct PipelineController<T = HttpTransport, E = FfmpegEncoder, B = FfmpegPlayback> {
    batch: BatchGenerator<T>,
    assembler: Arc<VideoAssembler<E>>,
    player: Option<Player<B>>,
    preview_hold: Option<Duration>,
    count: usize,
    frame_rate: u32,
    cancel: watch::Receiver<bool>,
}

impl PipelineController {
    pub async fn from_config(config: &AppConfig, cancel: watch::Receiver<bool>) -> Result<Self> {
        let writer = ArtifactWriter::new(
            config.output.dir.clone(),
            config.output.image_extension.clone(),
        )
        .await?;

        let policy = RetryPolicy::new(
            config.inference.max_attempts,
            config.inference.rate_limit_backoff,
        );
        let client = GenerationClient::new(HttpTransport::new(&config.inference)?, policy);
        info!(
            target: "pipeline",
            endpoint = %config.inference.api_url,
            max_attempts = client.policy().max_attempts,
            backoff_secs = client.policy().backoff.as_secs(),
            "inference client ready"
        );

        let picker = VariationPicker::new(config.batch.variations.clone())?;
        debug!(target: "pipeline", variations = picker.len(), "variation pool loaded");
        let batch = BatchGenerator::new(
            client,
            picker,
            writer.clone(),
            config.inference.inference_steps,
        );
        let assembler = VideoAssembler::new(writer, FfmpegEncoder::new(&config.tools.ffmpeg));

        let player = if config.player.enabled {
            let backend = FfmpegPlayback::new(
                &config.tools.ffmpeg,
                &config.tools.ffprobe,
                &config.tools.ffplay,
                config.player.window_title.clone(),
            );
            Some(Player::new(backend, config.player.frame_wait))
        } else {
            info!(target: "pipeline", "playback disabled");
            None
        };

        let controller = Self::new(
            batch,
            assembler,
            player,
            config.batch.count,
            config.output.frame_rate,
            cancel,
        );
        if config.player.preview_images {
            Ok(controller.with_preview(config.player.preview_hold))
        } else {
            Ok(controller)
        }
    }
}

impl<T, E, B> PipelineController<T, E, B>
where
    T: InferenceTransport + 'static,
    E: VideoEncoder + Send + Sync + 'static,
    B: PlaybackBackend,
{
    pub fn new(
        batch: BatchGenerator<T>,
        assembler: VideoAssembler<E>,
        player: Option<Player<B>>,
        count: usize,
        frame_rate: u32,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            batch,
            assembler: Arc::new(assembler),
            player,
            preview_hold: None,
            count,
            frame_rate,
            cancel,
        }
    }

    /// Show each generated still for `hold` before assembling the video.
    /// Has no effect without a player.
    pub fn with_preview(mut self, hold: Duration) -> Self {
        self.preview_hold = Some(hold);
        self
    }

    /// Generate, preview, assemble, play. Each step only runs if the previous one left
    /// something for it; step failures end up in the report, not in `Err`.
    pub async fn execute(&self, prompt: &str) -> Result<PipelineReport> {
        let prompt = Prompt::new(prompt)?;
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id, prompt = %prompt);

        async move {
            info!(
                target: "pipeline",
                count = self.count,
                "generating image batch"
            );
            let batch = self.batch.generate_batch(&prompt, self.count, run_id).await;
            let outcome = batch.outcome();
            let images = batch.artifacts.len();

            let mut report = PipelineReport {
                run_id,
                prompt: prompt.clone(),
                batch: outcome,
                images,
                preview: None,
                video: None,
                playback: None,
            };

            for failure in &batch.failures {
                debug!(
                    target: "pipeline",
                    slot = failure.slot,
                    variation = %failure.variation,
                    error = %failure.error,
                    "slot failed"
                );
            }

            match outcome {
                BatchOutcome::Empty => {
                    warn!(
                        target: "pipeline",
                        failures = batch.failures.len(),
                        "no images generated, skipping video"
                    );
                    return Ok(report);
                }
                BatchOutcome::Partial => {
                    warn!(
                        target: "pipeline",
                        images,
                        slots = ?batch.succeeded_slots(),
                        failures = batch.failures.len(),
                        "batch partially failed"
                    );
                }
                BatchOutcome::Complete => {
                    info!(target: "pipeline", images, "batch complete");
                }
            }

            if let (Some(player), Some(hold)) = (&self.player, self.preview_hold) {
                let stills: Vec<_> = batch.artifacts.iter().map(|a| a.path.clone()).collect();
                let preview = player.preview(&stills, hold, self.cancel.clone()).await;
                if let Err(err) = &preview {
                    warn!(target: "pipeline", error = %err, "image preview failed");
                }
                report.preview = Some(preview);
            }

            let video = self.assemble(&prompt).await;
            let playback = match (&video, &self.player) {
                (Ok(artifact), Some(player)) => {
                    Some(player.play(&artifact.path, self.cancel.clone()).await)
                }
                _ => None,
            };

            report.video = Some(video);
            report.playback = playback;
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn assemble(&self, prompt: &Prompt) -> Result<VideoArtifact> {
        let assembler = Arc::clone(&self.assembler);
        let prompt = prompt.clone();
        let frame_rate = self.frame_rate;

        tokio::task::spawn_blocking(move || assembler.assemble(&prompt, frame_rate))
            .await
            .map_err(|err| PipelineError::other(format!("video assembly task failed: {err}")))?
    }
}

#[async_trait]
impl<T, E, B> PipelineRunner for PipelineController<T, E, B>
where
    T: InferenceTransport + 'static,
    E: VideoEncoder + Send + Sync + 'static,
    B: PlaybackBackend,
{
    async fn run(&mut self, prompt: &str) -> Result<()> {
        let report = self.execute(prompt).await?;
        let preview = step_summary(&report.preview);
        let playback = step_summary(&report.playback);

        match &report.video {
            Some(Ok(video)) => info!(
                target: "pipeline",
                run_id = %report.run_id,
                prompt = %report.prompt,
                batch = ?report.batch,
                images = report.images,
                path = %video.path.display(),
                frames = video.frame_count,
                width = video.width,
                height = video.height,
                frame_rate = video.frame_rate,
                %preview,
                %playback,
                "pipeline finished"
            ),
            Some(Err(err)) => error!(
                target: "pipeline",
                run_id = %report.run_id,
                prompt = %report.prompt,
                batch = ?report.batch,
                images = report.images,
                %preview,
                error = %err,
                "video assembly failed"
            ),
            None => warn!(
                target: "pipeline",
                run_id = %report.run_id,
                prompt = %report.prompt,
                batch = ?report.batch,
                "pipeline finished without video"
            ),
        }

        Ok(())
    }
}

fn step_summary(step: &Option<Result<PlaybackOutcome>>) -> String {
    match step {
        Some(Ok(outcome)) => format!("{outcome:?}"),
        Some(Err(err)) => format!("failed: {err}"),
        None => "skipped".to_string(),
    }
}
