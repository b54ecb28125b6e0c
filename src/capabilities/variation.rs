use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::errors::{PipelineError, Result};

/// Uniform pick, with replacement, from a fixed list of style modifiers.
#[derive(Debug, Clone)]
pub struct VariationPicker {
    variations: Arc<[String]>,
}

impl VariationPicker {
    pub fn new(variations: Vec<String>) -> Result<Self> {
        if variations.is_empty() {
            return Err(PipelineError::MissingConfig("batch.variations"));
        }
        Ok(Self {
            variations: variations.into(),
        })
    }

    pub fn pick(&self) -> String {
        let mut rng = rand::thread_rng();
        self.variations
            .choose(&mut rng)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.variations.len()
    }
}
