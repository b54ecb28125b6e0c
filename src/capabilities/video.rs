use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
};

use crate::{
    errors::{PipelineError, Result},
    models::{Prompt, VideoArtifact},
    util::ArtifactWriter,
};
use image::{ImageReader, RgbImage};
use tracing::{error, info, warn};

/// Turns a frame size and rate into a sink for raw RGB frames.
pub trait VideoEncoder {
    type Writer: FrameWriter;

    fn open(&self, path: &Path, width: u32, height: u32, frame_rate: u32) -> Result<Self::Writer>;
}

pub trait FrameWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    fn finish(self) -> Result<()>;
}

/// Pipes `rgb24` frames into an ffmpeg child that writes an MPEG-4 `.mp4`.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl VideoEncoder for FfmpegEncoder {
    type Writer = FfmpegFrameWriter;

    fn open(&self, path: &Path, width: u32, height: u32, frame_rate: u32) -> Result<Self::Writer> {
        let mut child = Command::new(&self.binary)
            .args(["-y", "-loglevel", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-s")
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(frame_rate.to_string())
            .args(["-i", "-", "-c:v", "mpeg4", "-q:v", "2", "-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                PipelineError::Encoder(format!("failed to start {:?}: {err}", self.binary))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::Encoder("ffmpeg stdin unavailable".to_string()))?;

        Ok(FfmpegFrameWriter {
            child: Some(child),
            stdin: Some(stdin),
        })
    }
}

pub struct FfmpegFrameWriter {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl FrameWriter for FfmpegFrameWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PipelineError::Encoder("ffmpeg stdin already closed".to_string()))?;
        stdin
            .write_all(frame.as_raw())
            .map_err(|err| PipelineError::Encoder(format!("failed to feed frame: {err}")))
    }

    fn finish(mut self) -> Result<()> {
        drop(self.stdin.take());
        let child = self
            .child
            .take()
            .ok_or_else(|| PipelineError::Encoder("ffmpeg already finished".to_string()))?;
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(PipelineError::Encoder(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl Drop for FfmpegFrameWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Builds one video per prompt from its persisted variants, in slot order.
pub struct VideoAssembler<E> {
    writer: ArtifactWriter,
    encoder: E,
}

impl<E: VideoEncoder> VideoAssembler<E> {
    pub fn new(writer: ArtifactWriter, encoder: E) -> Self {
        Self { writer, encoder }
    }

    pub fn assemble(&self, prompt: &Prompt, frame_rate: u32) -> Result<VideoArtifact> {
        let images = self.writer.list_images(prompt)?;
        if images.is_empty() {
            error!(
                target: "video_assembler",
                prompt = %prompt,
                "no images found for video generation"
            );
            return Err(PipelineError::NoImages(prompt.normalized().to_string()));
        }

        let output = self.writer.video_path(prompt);
        let mut session: Option<(E::Writer, u32, u32)> = None;
        let mut frame_count = 0;

        for (slot, path) in images {
            let frame = match decode_frame(&path) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(
                        target: "video_assembler",
                        slot,
                        path = %path.display(),
                        error = %err,
                        "skipping unreadable image"
                    );
                    continue;
                }
            };

            let (width, height) = frame.dimensions();
            if session.is_none() {
                let sink = self.encoder.open(&output, width, height, frame_rate)?;
                session = Some((sink, width, height));
            }
            let Some((sink, ref_width, ref_height)) = session.as_mut() else {
                continue;
            };

            if (width, height) != (*ref_width, *ref_height) {
                warn!(
                    target: "video_assembler",
                    slot,
                    path = %path.display(),
                    width,
                    height,
                    expected_width = *ref_width,
                    expected_height = *ref_height,
                    "skipping frame with mismatched dimensions"
                );
                continue;
            }

            if let Err(err) = sink.write_frame(&frame) {
                drop(session);
                discard_partial(&output);
                return Err(err);
            }
            frame_count += 1;
        }

        let Some((sink, width, height)) = session else {
            error!(
                target: "video_assembler",
                prompt = %prompt,
                "none of the images could be decoded"
            );
            return Err(PipelineError::NoImages(prompt.normalized().to_string()));
        };

        if let Err(err) = sink.finish() {
            discard_partial(&output);
            return Err(err);
        }

        info!(
            target: "video_assembler",
            path = %output.display(),
            frames = frame_count,
            width,
            height,
            frame_rate,
            "video saved"
        );

        Ok(VideoArtifact {
            path: output,
            frame_count,
            width,
            height,
            frame_rate,
        })
    }
}

/// Format is sniffed from content; the service may hand back PNG or JPEG
/// regardless of the artifact extension.
pub(super) fn decode_frame(path: &Path) -> Result<RgbImage> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    Ok(reader.decode()?.to_rgb8())
}

fn discard_partial(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(
                target: "video_assembler",
                path = %path.display(),
                error = %err,
                "failed to remove partial video"
            );
        }
    }
}
