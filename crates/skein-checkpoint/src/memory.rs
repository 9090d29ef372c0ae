use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use skein_protocol::{Checkpoint, CheckpointId, CheckpointStore, SkeinResult, State, UserId};
use tracing::debug;

use crate::ensure_version;

/// Process-local store keyed by application, then checkpoint id.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    apps: Mutex<HashMap<String, IndexMap<CheckpointId, Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get_checkpoint(
        &self,
        app_name: &str,
        checkpoint_id: &CheckpointId,
    ) -> SkeinResult<Option<Checkpoint>> {
        Ok(self
            .apps
            .lock()
            .get(app_name)
            .and_then(|checkpoints| checkpoints.get(checkpoint_id))
            .cloned())
    }

    async fn create_checkpoint(
        &self,
        app_name: &str,
        checkpoint_id: &CheckpointId,
        user_id: Option<UserId>,
        seed: Option<State>,
    ) -> SkeinResult<Checkpoint> {
        let mut apps = self.apps.lock();
        let checkpoint = apps
            .entry(app_name.to_owned())
            .or_default()
            .entry(checkpoint_id.clone())
            .or_insert_with(|| {
                debug!(app_name, checkpoint_id = %checkpoint_id, "checkpoint created");
                Checkpoint::new(
                    app_name,
                    checkpoint_id.clone(),
                    user_id,
                    seed.unwrap_or_default(),
                )
            });
        Ok(checkpoint.clone())
    }

    async fn update_checkpoint(
        &self,
        app_name: &str,
        checkpoint_id: &CheckpointId,
        checkpoint: &mut Checkpoint,
    ) -> SkeinResult<()> {
        let mut apps = self.apps.lock();
        let checkpoints = apps.entry(app_name.to_owned()).or_default();
        if let Some(stored) = checkpoints.get(checkpoint_id) {
            ensure_version(stored, checkpoint)?;
        }
        checkpoint.touch();
        checkpoints.insert(checkpoint_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn list_checkpoints(&self, app_name: &str) -> SkeinResult<Vec<Checkpoint>> {
        Ok(self
            .apps
            .lock()
            .get(app_name)
            .map(|checkpoints| checkpoints.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_checkpoint(
        &self,
        app_name: &str,
        checkpoint_id: &CheckpointId,
    ) -> SkeinResult<()> {
        if let Some(checkpoints) = self.apps.lock().get_mut(app_name) {
            checkpoints.shift_remove(checkpoint_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::exercise_store;
    use anyhow::Result;

    #[tokio::test]
    async fn in_memory_store_contract() -> Result<()> {
        exercise_store(&InMemoryCheckpointStore::new()).await
    }
}
