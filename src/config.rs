use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "config/reelforge.toml";
const DEFAULT_API_URL: &str =
    "https://api-inference.huggingface.co/models/stabilityai/stable-diffusion-xl-base-1.0";
const DEFAULT_INFERENCE_STEPS: u32 = 50;
const DEFAULT_RATE_LIMIT_BACKOFF_SECONDS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: u32 = 2;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 120;
const DEFAULT_BATCH_COUNT: usize = 4;
const DEFAULT_OUTPUT_DIR: &str = "Data";
const DEFAULT_FRAME_RATE: u32 = 10;
const DEFAULT_IMAGE_EXTENSION: &str = "jpg";
const DEFAULT_TRIGGER_PATH: &str = "Files/ImageGeneration.data";
const DEFAULT_IDLE_POLL_MS: u64 = 2000;
const DEFAULT_INACTIVE_POLL_MS: u64 = 1000;
const DEFAULT_FAULT_RETRY_MS: u64 = 2000;
const DEFAULT_FRAME_WAIT_MS: u64 = 30;
const DEFAULT_WINDOW_TITLE: &str = "Playing Video";
const DEFAULT_PREVIEW_HOLD_MS: u64 = 1000;

pub const DEFAULT_VARIATIONS: [&str; 6] = [
    "cinematic lighting, ultra-realistic, 8K details",
    "digital painting, concept art, vibrant colors",
    "realistic photography, studio lighting, depth of field",
    "cyberpunk style, neon glow, futuristic theme",
    "fantasy art, mystical ambiance, high fantasy",
    "black and white, dramatic contrast, moody lighting",
];

#[derive(Clone, Debug)]
pub struct InferenceConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub inference_steps: u32,
    pub rate_limit_backoff: Duration,
    pub max_attempts: u32,
    pub request_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub count: usize,
    pub variations: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub frame_rate: u32,
    pub image_extension: String,
}

#[derive(Clone, Debug)]
pub struct TriggerConfig {
    pub path: PathBuf,
    pub idle_poll: Duration,
    pub inactive_poll: Duration,
    pub fault_retry: Duration,
}

#[derive(Clone, Debug)]
pub struct PlayerConfig {
    pub enabled: bool,
    pub frame_wait: Duration,
    pub window_title: String,
    /// Show each generated still before the video is assembled.
    pub preview_images: bool,
    pub preview_hold: Duration,
}

#[derive(Clone, Debug)]
pub struct ToolsConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub ffplay: PathBuf,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub inference: InferenceConfig,
    pub batch: BatchConfig,
    pub output: OutputConfig,
    pub trigger: TriggerConfig,
    pub player: PlayerConfig,
    pub tools: ToolsConfig,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path =
            env::var("REELFORGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let file_config = FileConfig::read(Path::new(&config_path))?;

        let mut config = file_config.into_domain();

        if let Some(api_key) = env_api_key() {
            config.inference.api_key = Some(api_key);
        }
        if let Ok(dir) = env::var("REELFORGE_OUTPUT_DIR") {
            config.output.dir = PathBuf::from(dir);
        }
        if let Ok(path) = env::var("REELFORGE_TRIGGER_PATH") {
            config.trigger.path = PathBuf::from(path);
        }

        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        FileConfig::default().into_domain()
    }
}

fn env_api_key() -> Option<String> {
    ["HUGGINGFACE_API_KEY", "HuggingFaceAPIKey"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    inference: Option<FileInferenceConfig>,
    #[serde(default)]
    batch: Option<FileBatchConfig>,
    #[serde(default)]
    output: Option<FileOutputConfig>,
    #[serde(default)]
    trigger: Option<FileTriggerConfig>,
    #[serde(default)]
    player: Option<FilePlayerConfig>,
    #[serde(default)]
    tools: Option<FileToolsConfig>,
}

impl FileConfig {
    fn read(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::parse(&contents).with_context(|| format!("failed to parse config file {:?}", path))
    }

    fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn into_domain(self) -> AppConfig {
        AppConfig {
            inference: self.inference.unwrap_or_default().into_domain(),
            batch: self.batch.unwrap_or_default().into_domain(),
            output: self.output.unwrap_or_default().into_domain(),
            trigger: self.trigger.unwrap_or_default().into_domain(),
            player: self.player.unwrap_or_default().into_domain(),
            tools: self.tools.unwrap_or_default().into_domain(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileInferenceConfig {
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    inference_steps: Option<u32>,
    #[serde(default)]
    rate_limit_backoff_seconds: Option<u64>,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    request_timeout_seconds: Option<u64>,
}

impl FileInferenceConfig {
    fn into_domain(self) -> InferenceConfig {
        InferenceConfig {
            api_url: self.api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: self.api_key.filter(|key| !key.trim().is_empty()),
            inference_steps: self.inference_steps.unwrap_or(DEFAULT_INFERENCE_STEPS),
            rate_limit_backoff: Duration::from_secs(
                self.rate_limit_backoff_seconds
                    .unwrap_or(DEFAULT_RATE_LIMIT_BACKOFF_SECONDS),
            ),
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
            request_timeout: Duration::from_secs(
                self.request_timeout_seconds
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            ),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileBatchConfig {
    #[serde(default)]
    count: Option<usize>,
    #[serde(default)]
    variations: Option<Vec<String>>,
}

impl FileBatchConfig {
    fn into_domain(self) -> BatchConfig {
        let variations = self
            .variations
            .map(|list| {
                list.into_iter()
                    .map(|entry| entry.trim().to_string())
                    .filter(|entry| !entry.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| DEFAULT_VARIATIONS.iter().map(|v| v.to_string()).collect());

        BatchConfig {
            count: self.count.unwrap_or(DEFAULT_BATCH_COUNT).max(1),
            variations,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileOutputConfig {
    #[serde(default)]
    dir: Option<String>,
    #[serde(default)]
    frame_rate: Option<u32>,
    #[serde(default)]
    image_extension: Option<String>,
}

impl FileOutputConfig {
    fn into_domain(self) -> OutputConfig {
        OutputConfig {
            dir: PathBuf::from(self.dir.unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string())),
            frame_rate: self.frame_rate.unwrap_or(DEFAULT_FRAME_RATE).max(1),
            image_extension: self
                .image_extension
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .filter(|ext| !ext.is_empty())
                .unwrap_or_else(|| DEFAULT_IMAGE_EXTENSION.to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileTriggerConfig {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    idle_poll_ms: Option<u64>,
    #[serde(default)]
    inactive_poll_ms: Option<u64>,
    #[serde(default)]
    fault_retry_ms: Option<u64>,
}

impl FileTriggerConfig {
    fn into_domain(self) -> TriggerConfig {
        TriggerConfig {
            path: PathBuf::from(self.path.unwrap_or_else(|| DEFAULT_TRIGGER_PATH.to_string())),
            idle_poll: Duration::from_millis(self.idle_poll_ms.unwrap_or(DEFAULT_IDLE_POLL_MS)),
            inactive_poll: Duration::from_millis(
                self.inactive_poll_ms.unwrap_or(DEFAULT_INACTIVE_POLL_MS),
            ),
            fault_retry: Duration::from_millis(
                self.fault_retry_ms.unwrap_or(DEFAULT_FAULT_RETRY_MS),
            ),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FilePlayerConfig {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    frame_wait_ms: Option<u64>,
    #[serde(default)]
    window_title: Option<String>,
    #[serde(default)]
    preview_images: Option<bool>,
    #[serde(default)]
    preview_hold_ms: Option<u64>,
}

impl FilePlayerConfig {
    fn into_domain(self) -> PlayerConfig {
        PlayerConfig {
            enabled: self.enabled.unwrap_or(true),
            frame_wait: Duration::from_millis(self.frame_wait_ms.unwrap_or(DEFAULT_FRAME_WAIT_MS)),
            window_title: self
                .window_title
                .unwrap_or_else(|| DEFAULT_WINDOW_TITLE.to_string()),
            preview_images: self.preview_images.unwrap_or(true),
            preview_hold: Duration::from_millis(
                self.preview_hold_ms.unwrap_or(DEFAULT_PREVIEW_HOLD_MS),
            ),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileToolsConfig {
    #[serde(default)]
    ffmpeg: Option<String>,
    #[serde(default)]
    ffprobe: Option<String>,
    #[serde(default)]
    ffplay: Option<String>,
}

impl FileToolsConfig {
    fn into_domain(self) -> ToolsConfig {
        ToolsConfig {
            ffmpeg: PathBuf::from(self.ffmpeg.unwrap_or_else(|| "ffmpeg".to_string())),
            ffprobe: PathBuf::from(self.ffprobe.unwrap_or_else(|| "ffprobe".to_string())),
            ffplay: PathBuf::from(self.ffplay.unwrap_or_else(|| "ffplay".to_string())),
        }
    }
}
