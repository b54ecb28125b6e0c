use std::path::{Path, PathBuf};

use crate::{
    errors::{PipelineError, Result},
    models::{ImageArtifact, Prompt},
    util::{local_rfc3339, now_local},
};
use bytes::Bytes;
use serde_json::{Map, Value, json};
use tokio::fs;
use uuid::Uuid;

const META_SUFFIX: &str = ".meta.json";
const VIDEO_EXTENSION: &str = "mp4";

#[derive(Debug, Clone)]
pub struct SlotMetadata {
    pub run_id: Uuid,
    pub variation: String,
    pub inference_steps: u32,
}

/// Owns the output directory layout: `<prompt>_v<slot>.<ext>` for variants,
/// `<prompt>.mp4` for the assembled video.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
    image_extension: String,
}

impl ArtifactWriter {
    pub async fn new(root: PathBuf, image_extension: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&root)
            .await
            .map_err(|err| PipelineError::artifact_io(&root, err))?;
        Ok(Self {
            root,
            image_extension: image_extension.into(),
        })
    }

    pub fn image_path(&self, prompt: &Prompt, slot: usize) -> PathBuf {
        self.root.join(format!(
            "{}_v{}.{}",
            prompt.normalized(),
            slot,
            self.image_extension
        ))
    }

    pub fn video_path(&self, prompt: &Prompt) -> PathBuf {
        self.root.join(format!("{}.{}", prompt.normalized(), VIDEO_EXTENSION))
    }

    pub async fn persist(
        &self,
        prompt: &Prompt,
        slot: usize,
        payload: &Bytes,
        metadata: &SlotMetadata,
    ) -> Result<ImageArtifact> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|err| PipelineError::artifact_io(&self.root, err))?;

        let file_path = self.image_path(prompt, slot);
        fs::write(&file_path, payload)
            .await
            .map_err(|err| PipelineError::artifact_io(&file_path, err))?;

        let mut meta = Map::new();
        meta.insert("prompt".to_string(), json!(prompt.text()));
        meta.insert("variation".to_string(), json!(metadata.variation));
        meta.insert("slot".to_string(), json!(slot));
        meta.insert(
            "inference_steps".to_string(),
            json!(metadata.inference_steps),
        );
        meta.insert("size_bytes".to_string(), json!(payload.len()));
        meta.insert("run_id".to_string(), json!(metadata.run_id.to_string()));
        meta.insert(
            "created_at".to_string(),
            json!(local_rfc3339(&now_local())),
        );

        let meta_path = sidecar_path(&file_path);
        fs::write(&meta_path, serde_json::to_vec_pretty(&Value::Object(meta))?)
            .await
            .map_err(|err| PipelineError::artifact_io(&meta_path, err))?;

        Ok(ImageArtifact {
            slot,
            path: file_path,
            variation: metadata.variation.clone(),
            size_bytes: payload.len(),
        })
    }

    /// Persisted variants for `prompt`, ordered by slot number.
    pub fn list_images(&self, prompt: &Prompt) -> Result<Vec<(usize, PathBuf)>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(PipelineError::artifact_io(&self.root, err)),
        };

        let mut images = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| PipelineError::artifact_io(&self.root, err))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(slot) =
                parse_slot(file_name, prompt.normalized(), &self.image_extension)
            {
                images.push((slot, entry.path()));
            }
        }

        images.sort_by_key(|(slot, _)| *slot);
        Ok(images)
    }
}

fn sidecar_path(file_path: &Path) -> PathBuf {
    let mut name = file_path
        .file_stem()
        .map(|stem| stem.to_os_string())
        .unwrap_or_default();
    name.push(META_SUFFIX);
    file_path.with_file_name(name)
}

fn parse_slot(file_name: &str, normalized: &str, extension: &str) -> Option<usize> {
    let rest = file_name.strip_prefix(normalized)?.strip_prefix("_v")?;
    let (digits, ext) = rest.rsplit_once('.')?;
    if !ext.eq_ignore_ascii_case(extension) {
        return None;
    }
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|slot| *slot > 0)
}
