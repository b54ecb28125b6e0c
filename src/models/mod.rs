use std::{fmt, path::PathBuf};

use bytes::Bytes;

use crate::errors::{PipelineError, Result};

const FORBIDDEN_FILENAME_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Base prompt for one pipeline run. Holds the text as given and its
/// filename-safe key, which is what every artifact is named after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    text: String,
    normalized: String,
}

impl Prompt {
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into().trim().to_string();
        let normalized = normalize_prompt(&text);
        if normalized.is_empty() {
            return Err(PipelineError::TriggerMalformed(format!(
                "prompt '{text}' is empty after normalization"
            )));
        }
        Ok(Self { text, normalized })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Whitespace runs become `_`, characters that cannot appear in file names
/// are dropped.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|ch| !FORBIDDEN_FILENAME_CHARS.contains(ch) && !ch.is_control())
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub slot: usize,
    pub prompt: Prompt,
    pub variation: String,
    pub inference_steps: u32,
}

impl GenerationRequest {
    /// Text sent to the service: base prompt followed by the style modifier.
    pub fn input_text(&self) -> String {
        format!("{}, {}", self.prompt.text(), self.variation)
    }
}

pub type GenerationResult = Result<Bytes>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub slot: usize,
    pub path: PathBuf,
    pub variation: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoArtifact {
    pub path: PathBuf,
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}
