use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use skein_protocol::{
    Checkpoint, CheckpointId, CheckpointStore, SkeinError, SkeinResult, State, UserId,
    checkpoint_key, checkpoint_key_prefix,
};
use tracing::{debug, instrument, warn};

use crate::{ensure_version, to_skein_error};

/// Minimal string key-value contract a network store has to offer.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` only if `key` is absent. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: String) -> Result<bool>;

    /// Replace the value only if it still equals `expected` (`None` = absent).
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: String,
    ) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Ordered in-process backend.
#[derive(Debug, Default)]
pub struct InMemoryKvBackend {
    entries: Mutex<BTreeMap<String, String>>,
}

impl InMemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for InMemoryKvBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set_if_absent(&self, key: &str, value: String) -> Result<bool> {
        let mut entries = self.entries.lock();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_owned(), value);
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: String,
    ) -> Result<bool> {
        let mut entries = self.entries.lock();
        if entries.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        entries.insert(key.to_owned(), value);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

/// Checkpoints as JSON values under `"{app_name}:{checkpoint_id}"`.
#[derive(Debug)]
pub struct KvCheckpointStore<B> {
    backend: B,
}

impl<B: KvBackend> KvCheckpointStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn load(&self, key: &str) -> Result<Option<(String, Checkpoint)>> {
        let Some(raw) = self.backend.get(key).await? else {
            return Ok(None);
        };
        let checkpoint = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing checkpoint at {key}"))?;
        Ok(Some((raw, checkpoint)))
    }
}

#[async_trait]
impl<B: KvBackend> CheckpointStore for KvCheckpointStore<B> {
    async fn get_checkpoint(
        &self,
        app_name: &str,
        checkpoint_id: &CheckpointId,
    ) -> SkeinResult<Option<Checkpoint>> {
        let key = checkpoint_key(app_name, checkpoint_id);
        Ok(self
            .load(&key)
            .await
            .map_err(to_skein_error)?
            .map(|(_, checkpoint)| checkpoint))
    }

    #[instrument(skip(self, user_id, seed), fields(checkpoint_id = %checkpoint_id))]
    async fn create_checkpoint(
        &self,
        app_name: &str,
        checkpoint_id: &CheckpointId,
        user_id: Option<UserId>,
        seed: Option<State>,
    ) -> SkeinResult<Checkpoint> {
        let key = checkpoint_key(app_name, checkpoint_id);
        let checkpoint = Checkpoint::new(
            app_name,
            checkpoint_id.clone(),
            user_id,
            seed.unwrap_or_default(),
        );
        let value = serde_json::to_string(&checkpoint)?;
        let stored = self
            .backend
            .set_if_absent(&key, value)
            .await
            .map_err(to_skein_error)?;
        if stored {
            debug!(key = %key, "checkpoint created");
            return Ok(checkpoint);
        }
        self.get_checkpoint(app_name, checkpoint_id)
            .await?
            .ok_or_else(|| SkeinError::Checkpoint(format!("checkpoint {key} vanished during create")))
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
        let key = checkpoint_key(app_name, checkpoint_id);
        let current = self.load(&key).await.map_err(to_skein_error)?;
        if let Some((_, stored)) = &current {
            ensure_version(stored, checkpoint)?;
        }

        let mut next = checkpoint.clone();
        next.touch();
        let value = serde_json::to_string(&next)?;
        let expected = current.as_ref().map(|(raw, _)| raw.as_str());
        let swapped = self
            .backend
            .compare_and_swap(&key, expected, value)
            .await
            .map_err(to_skein_error)?;
        if !swapped {
            let actual = self
                .get_checkpoint(app_name, checkpoint_id)
                .await?
                .map(|stored| stored.version)
                .unwrap_or_default();
            warn!(key = %key, "checkpoint changed concurrently");
            return Err(SkeinError::CheckpointConflict {
                expected: actual,
                actual: checkpoint.version,
            });
        }
        *checkpoint = next;
        Ok(())
    }

    async fn list_checkpoints(&self, app_name: &str) -> SkeinResult<Vec<Checkpoint>> {
        let prefix = checkpoint_key_prefix(app_name);
        let keys = self
            .backend
            .scan_prefix(&prefix)
            .await
            .map_err(to_skein_error)?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, checkpoint)) = self.load(&key).await.map_err(to_skein_error)? {
                if checkpoint.app_name == app_name {
                    out.push(checkpoint);
                }
            }
        }
        Ok(out)
    }

    async fn delete_checkpoint(
        &self,
        app_name: &str,
        checkpoint_id: &CheckpointId,
    ) -> SkeinResult<()> {
        let key = checkpoint_key(app_name, checkpoint_id);
        self.backend.delete(&key).await.map_err(to_skein_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::exercise_store;

    #[tokio::test]
    async fn kv_store_contract() -> Result<()> {
        exercise_store(&KvCheckpointStore::new(InMemoryKvBackend::new())).await
    }

    #[tokio::test]
    async fn values_live_under_namespaced_keys() -> Result<()> {
        let store = KvCheckpointStore::new(InMemoryKvBackend::new());
        store
            .create_checkpoint("app1", &"c1".into(), None, None)
            .await?;
        store
            .create_checkpoint("app10", &"c9".into(), None, None)
            .await?;

        let raw = store
            .backend()
            .get("app1:c1")
            .await?
            .expect("value stored under app1:c1");
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        assert_eq!(value["id"], "c1");
        assert_eq!(value["app_name"], "app1");

        let keys = store.backend().scan_prefix("app1:").await?;
        assert_eq!(keys, vec!["app1:c1"]);
        assert_eq!(store.list_checkpoints("app1").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn apps_sharing_a_prefix_stay_apart() -> Result<()> {
        let store = KvCheckpointStore::new(InMemoryKvBackend::new());
        store
            .create_checkpoint("a", &"b:c".into(), Some(UserId::from("u-a")), None)
            .await?;
        store
            .create_checkpoint("a:b", &"c".into(), Some(UserId::from("u-ab")), None)
            .await?;

        let listed_a = store.list_checkpoints("a").await?;
        assert_eq!(listed_a.len(), 1);
        assert_eq!(listed_a[0].app_name, "a");
        assert_eq!(listed_a[0].id.as_str(), "b:c");

        let listed_ab = store.list_checkpoints("a:b").await?;
        assert_eq!(listed_ab.len(), 1);
        assert_eq!(listed_ab[0].user_id, Some(UserId::from("u-ab")));

        assert!(store.backend().get("a%3Ab:c").await?.is_some());
        assert!(store.backend().get("a:b:c").await?.is_some());
        let nested = store
            .get_checkpoint("a", &"b:c".into())
            .await?
            .expect("checkpoint of app a");
        assert_eq!(nested.user_id, Some(UserId::from("u-a")));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_write_is_detected_by_swap() -> Result<()> {
        let store = KvCheckpointStore::new(InMemoryKvBackend::new());
        let id = CheckpointId::from("c1");
        let mut first = store.create_checkpoint("app1", &id, None, None).await?;
        let mut second = first.clone();

        store.update_checkpoint("app1", &id, &mut first).await?;
        let error = store
            .update_checkpoint("app1", &id, &mut second)
            .await
            .expect_err("second writer holds a stale version");
        assert!(matches!(error, SkeinError::CheckpointConflict { .. }));
        Ok(())
    }
}
