use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use skein_protocol::{
    Checkpoint, CheckpointId, CheckpointStore, SkeinResult, State, UserId, checkpoint_key,
};
use tokio::fs;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, instrument};

use crate::{ensure_version, to_skein_error};

/// Stores each checkpoint as pretty JSON at `{root}/{app}/{id}.json`.
///
/// Names are percent-encoded into path components, so distinct ids never
/// share a file and no name can leave `root`. Writes go through a temp file
/// and a rename. Writers to the same key are serialized through a per-key
/// async lock, dropped again once nobody holds or waits on it.
#[derive(Debug)]
pub struct FileCheckpointStore {
    root: PathBuf,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held for the duration of one read-check-write on a key.
struct KeyGuard<'a> {
    store: &'a FileCheckpointStore,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.store.write_locks.lock();
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    fn app_dir(&self, app_name: &str) -> Result<PathBuf> {
        Ok(self.root.join(file_stem(app_name)?))
    }

    fn file_path(&self, app_name: &str, checkpoint_id: &CheckpointId) -> Result<PathBuf> {
        Ok(self
            .app_dir(app_name)?
            .join(format!("{}.json", file_stem(checkpoint_id.as_str())?)))
    }

    async fn lock_key(&self, app_name: &str, checkpoint_id: &CheckpointId) -> KeyGuard<'_> {
        let key = checkpoint_key(app_name, checkpoint_id);
        let lock = self
            .write_locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        KeyGuard {
            store: self,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn held_locks(&self) -> usize {
        self.write_locks.lock().len()
    }

    async fn read(path: &Path) -> Result<Option<Checkpoint>> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed reading checkpoint {path:?}"))?;
        let checkpoint = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing checkpoint {path:?}"))?;
        Ok(Some(checkpoint))
    }

    async fn write(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create checkpoint dir {parent:?}"))?;
        }
        let body = serde_json::to_vec_pretty(checkpoint).context("failed serializing checkpoint")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed writing checkpoint {tmp:?}"))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("failed replacing checkpoint {path:?}"))?;
        Ok(())
    }

    async fn list(&self, app_name: &str) -> Result<Vec<Checkpoint>> {
        let dir = self.app_dir(app_name)?;
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&dir)
            .await
            .with_context(|| format!("failed listing {dir:?}"))?;
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(checkpoint) = Self::read(&path).await? {
                out.push(checkpoint);
            }
        }
        out.sort_by(|a, b| a.create_time.cmp(&b.create_time));
        Ok(out)
    }
}

/// Escaped in path components: everything but ASCII alphanumerics, `-` and `_`.
const STEM_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// Injective mapping from a name to a single path component.
fn file_stem(raw: &str) -> Result<String> {
    if raw.is_empty() {
        bail!("checkpoint path component must not be empty");
    }
    Ok(utf8_percent_encode(raw, STEM_ESCAPES).to_string())
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get_checkpoint(
        &self,
        app_name: &str,
        checkpoint_id: &CheckpointId,
    ) -> SkeinResult<Option<Checkpoint>> {
        let path = self
            .file_path(app_name, checkpoint_id)
            .map_err(to_skein_error)?;
        Self::read(&path).await.map_err(to_skein_error)
    }

    #[instrument(skip(self, user_id, seed), fields(checkpoint_id = %checkpoint_id))]
    async fn create_checkpoint(
        &self,
        app_name: &str,
        checkpoint_id: &CheckpointId,
        user_id: Option<UserId>,
        seed: Option<State>,
    ) -> SkeinResult<Checkpoint> {
        let path = self
            .file_path(app_name, checkpoint_id)
            .map_err(to_skein_error)?;
        let _guard = self.lock_key(app_name, checkpoint_id).await;

        if let Some(existing) = Self::read(&path).await.map_err(to_skein_error)? {
            return Ok(existing);
        }
        let checkpoint = Checkpoint::new(
            app_name,
            checkpoint_id.clone(),
            user_id,
            seed.unwrap_or_default(),
        );
        Self::write(&path, &checkpoint)
            .await
            .map_err(to_skein_error)?;
        debug!("checkpoint created");
        Ok(checkpoint)
    }

    #[instrument(
        skip(self, checkpoint),
        fields(checkpoint_id = %checkpoint_id, version = checkpoint.version)
    )]
    async fn update_checkpoint(
        &self,
        app_name: &str,
        checkpoint_id: &CheckpointId,
        checkpoint: &mut Checkpoint,
    ) -> SkeinResult<()> {
        let path = self
            .file_path(app_name, checkpoint_id)
            .map_err(to_skein_error)?;
        let _guard = self.lock_key(app_name, checkpoint_id).await;

        if let Some(stored) = Self::read(&path).await.map_err(to_skein_error)? {
            ensure_version(&stored, checkpoint)?;
        }
        let mut next = checkpoint.clone();
        next.touch();
        Self::write(&path, &next).await.map_err(to_skein_error)?;
        *checkpoint = next;
        debug!("checkpoint persisted");
        Ok(())
    }

    async fn list_checkpoints(&self, app_name: &str) -> SkeinResult<Vec<Checkpoint>> {
        self.list(app_name).await.map_err(to_skein_error)
    }

    async fn delete_checkpoint(
        &self,
        app_name: &str,
        checkpoint_id: &CheckpointId,
    ) -> SkeinResult<()> {
        let path = self
            .file_path(app_name, checkpoint_id)
            .map_err(to_skein_error)?;
        let _guard = self.lock_key(app_name, checkpoint_id).await;
        if fs::try_exists(&path).await.unwrap_or(false) {
            fs::remove_file(&path)
                .await
                .with_context(|| format!("failed deleting checkpoint {path:?}"))
                .map_err(to_skein_error)?;
        }
        Ok(())
    }
}
