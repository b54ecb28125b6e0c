mod batch;
mod image;
mod player;
mod retry;
mod variation;
mod video;

pub use batch::{BatchGenerator, BatchOutcome};
pub use image::{GenerationClient, HttpTransport, InferenceTransport};
pub use player::{FfmpegPlayback, PlaybackBackend, PlaybackOutcome, Player};
pub use retry::RetryPolicy;
pub use variation::VariationPicker;
pub use video::{FfmpegEncoder, VideoAssembler, VideoEncoder};

#[cfg(test)]
pub use image::InferencePayload;
#[cfg(test)]
pub use player::{DisplaySink, FrameSource, SinkStatus};
#[cfg(test)]
pub use video::FrameWriter;
