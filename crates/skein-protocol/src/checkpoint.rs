//! Persisted conversation checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CheckpointId, UserId};
use crate::state::State;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub state: State,
    pub create_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    /// Number of successful writes; stores reject updates carrying a stale value.
    #[serde(default)]
    pub version: u64,
}

impl Checkpoint {
    pub fn new(
        app_name: impl Into<String>,
        id: CheckpointId,
        user_id: Option<UserId>,
        state: State,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            app_name: app_name.into(),
            user_id,
            state,
            create_time: now,
            last_update_time: now,
            version: 0,
        }
    }

    /// Record a successful write.
    pub fn touch(&mut self) {
        self.last_update_time = Utc::now();
        self.version = self.version.saturating_add(1);
    }
}

/// Namespaced storage key, `"{app_name}:{checkpoint_id}"`.
///
/// `%` and `:` are escaped in the app name so the first `:` always ends the
/// namespace; checkpoint ids are kept verbatim.
pub fn checkpoint_key(app_name: &str, checkpoint_id: &CheckpointId) -> String {
    format!("{}{checkpoint_id}", checkpoint_key_prefix(app_name))
}

/// Prefix shared by every key of `app_name`, and by no other app.
pub fn checkpoint_key_prefix(app_name: &str) -> String {
    let namespace = app_name.replace('%', "%25").replace(':', "%3A");
    format!("{namespace}:")
}
