//! Checkpoint store implementations.
//!
//! All stores share the same optimistic-concurrency rule: an update is
//! accepted only when the stored version equals the version carried by the
//! caller's checkpoint, after which the version is bumped and
//! `last_update_time` refreshed.

use skein_protocol::{Checkpoint, SkeinError, SkeinResult};
use tracing::warn;

mod file;
mod kv;
mod memory;

pub use file::FileCheckpointStore;
pub use kv::{InMemoryKvBackend, KvBackend, KvCheckpointStore};
pub use memory::InMemoryCheckpointStore;

fn ensure_version(stored: &Checkpoint, incoming: &Checkpoint) -> SkeinResult<()> {
    if stored.version != incoming.version {
        warn!(
            app_name = %incoming.app_name,
            checkpoint_id = %incoming.id,
            expected_version = stored.version,
            actual_version = incoming.version,
            "checkpoint version conflict"
        );
        return Err(SkeinError::CheckpointConflict {
            expected: stored.version,
            actual: incoming.version,
        });
    }
    Ok(())
}

fn to_skein_error(error: anyhow::Error) -> SkeinError {
    SkeinError::Checkpoint(format!("{error:#}"))
}

#[cfg(test)]
pub(crate) mod testing {
    use anyhow::Result;
    use skein_protocol::{CheckpointStore, Event, Message, SkeinError, State, UserId};

    /// Behaviour every store must share.
    pub async fn exercise_store(store: &dyn CheckpointStore) -> Result<()> {
        let app = "app1";
        let id = "c1".into();

        assert!(store.get_checkpoint(app, &id).await?.is_none());

        let mut checkpoint = store
            .create_checkpoint(app, &id, Some(UserId::from("u1")), None)
            .await?;
        assert_eq!(checkpoint.create_time, checkpoint.last_update_time);
        assert_eq!(checkpoint.version, 0);

        let again = store.create_checkpoint(app, &id, None, None).await?;
        assert_eq!(again.user_id, Some(UserId::from("u1")));

        checkpoint
            .state
            .apply(&Event::messages(vec![Message::user("hi")]));
        store.update_checkpoint(app, &id, &mut checkpoint).await?;
        assert_eq!(checkpoint.version, 1);

        let loaded = store
            .get_checkpoint(app, &id)
            .await?
            .expect("checkpoint persisted");
        assert_eq!(loaded.state.message_count(), 1);
        assert_eq!(loaded.version, 1);
        assert!(loaded.last_update_time >= loaded.create_time);

        let mut stale = loaded.clone();
        stale.version = 0;
        let error = store
            .update_checkpoint(app, &id, &mut stale)
            .await
            .expect_err("stale update must be rejected");
        assert!(matches!(
            error,
            SkeinError::CheckpointConflict {
                expected: 1,
                actual: 0
            }
        ));

        store
            .create_checkpoint(app, &"c2".into(), None, Some(State::default()))
            .await?;
        store
            .create_checkpoint("app2", &"c1".into(), None, None)
            .await?;
        let listed = store.list_checkpoints(app).await?;
        let mut ids: Vec<String> = listed.iter().map(|c| c.id.to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["c1", "c2"]);

        store.delete_checkpoint(app, &id).await?;
        assert!(store.get_checkpoint(app, &id).await?.is_none());
        assert!(store.get_checkpoint("app2", &id).await?.is_some());
        Ok(())
    }
}
