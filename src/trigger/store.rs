use std::path::{Path, PathBuf};

use crate::{
    errors::{PipelineError, Result},
    trigger::TriggerRecord,
};
use async_trait::async_trait;
use tokio::fs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerReading {
    Absent,
    Empty,
    Record(TriggerRecord),
}

/// Narrow read/write access to the trigger record.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn read(&self) -> Result<TriggerReading>;

    async fn write(&self, record: &TriggerRecord) -> Result<()>;
}

#[async_trait]
impl<T: TriggerStore + ?Sized> TriggerStore for std::sync::Arc<T> {
    async fn read(&self) -> Result<TriggerReading> {
        (**self).read().await
    }

    async fn write(&self, record: &TriggerRecord) -> Result<()> {
        (**self).write(record).await
    }
}

#[derive(Debug, Clone)]
pub struct FileTriggerStore {
    path: PathBuf,
}

impl FileTriggerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl TriggerStore for FileTriggerStore {
    async fn read(&self) -> Result<TriggerReading> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(TriggerReading::Absent);
            }
            Err(err) => return Err(PipelineError::artifact_io(&self.path, err)),
        };

        if contents.trim().is_empty() {
            return Ok(TriggerReading::Empty);
        }

        TriggerRecord::parse(&contents).map(TriggerReading::Record)
    }

    /// Staged next to the target and renamed over it, so readers never see a
    /// half-written record.
    async fn write(&self, record: &TriggerRecord) -> Result<()> {
        let staging = self.staging_path();
        fs::write(&staging, record.to_string())
            .await
            .map_err(|err| PipelineError::artifact_io(&staging, err))?;
        fs::rename(&staging, &self.path)
            .await
            .map_err(|err| PipelineError::artifact_io(&self.path, err))
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryTriggerStore {
    contents: std::sync::Mutex<Option<String>>,
    fail_reads: std::sync::atomic::AtomicUsize,
    fail_writes: std::sync::atomic::AtomicBool,
    reads: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MemoryTriggerStore {
    pub fn with_contents(contents: &str) -> Self {
        let store = Self::default();
        store.set(Some(contents));
        store
    }

    pub fn set(&self, contents: Option<&str>) {
        *self.contents.lock().unwrap() = contents.map(str::to_string);
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().unwrap().clone()
    }

    pub fn fail_next_reads(&self, count: usize) {
        self.fail_reads
            .store(count, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn fail_writes(&self) {
        self.fail_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl TriggerStore for MemoryTriggerStore {
    async fn read(&self) -> Result<TriggerReading> {
        use std::sync::atomic::Ordering;

        self.reads.fetch_add(1, Ordering::SeqCst);
        let pending = self.fail_reads.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_reads.store(pending - 1, Ordering::SeqCst);
            return Err(PipelineError::artifact_io(
                "memory-trigger",
                std::io::Error::other("simulated read failure"),
            ));
        }

        match self.contents() {
            None => Ok(TriggerReading::Absent),
            Some(contents) if contents.trim().is_empty() => Ok(TriggerReading::Empty),
            Some(contents) => TriggerRecord::parse(&contents).map(TriggerReading::Record),
        }
    }

    async fn write(&self, record: &TriggerRecord) -> Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(PipelineError::artifact_io(
                "memory-trigger",
                std::io::Error::other("simulated write failure"),
            ));
        }
        self.set(Some(&record.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn file_store_distinguishes_absent_empty_and_records() {
        let dir = TempDir::new().unwrap();
        let store = FileTriggerStore::new(dir.path().join("ImageGeneration.data"));

        assert_eq!(store.read().await.unwrap(), TriggerReading::Absent);

        std::fs::write(store.path(), "  \n").unwrap();
        assert_eq!(store.read().await.unwrap(), TriggerReading::Empty);

        std::fs::write(store.path(), "sunset beach,True").unwrap();
        assert_eq!(
            store.read().await.unwrap(),
            TriggerReading::Record(TriggerRecord {
                prompt: "sunset beach".to_string(),
                activate: true,
            })
        );

        std::fs::write(store.path(), "no status here").unwrap();
        assert!(matches!(
            store.read().await,
            Err(PipelineError::TriggerMalformed(_))
        ));
    }

    #[tokio::test]
    async fn file_store_write_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let store = FileTriggerStore::new(dir.path().join("ImageGeneration.data"));
        std::fs::write(store.path(), "sunset beach,true").unwrap();

        store.write(&TriggerRecord::deactivated()).await.unwrap();

        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), ",False");
        assert!(!dir.path().join("ImageGeneration.data.tmp").exists());
        assert!(matches!(
            store.read().await.unwrap(),
            TriggerReading::Record(TriggerRecord { activate: false, .. })
        ));
    }

    #[tokio::test]
    async fn file_store_write_into_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        let store = FileTriggerStore::new(dir.path().join("missing/ImageGeneration.data"));
        assert!(matches!(
            store.write(&TriggerRecord::deactivated()).await,
            Err(PipelineError::ArtifactIo { .. })
        ));
    }
}
