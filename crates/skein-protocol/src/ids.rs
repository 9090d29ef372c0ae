//! Typed ID wrappers.
//!
//! IDs are opaque String wrappers (serde-transparent). Callers may supply
//! their own identifiers (checkpoint ids usually come from the client);
//! generated ids use UUID v4.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string value.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Create a new ID using UUID v4 (random).
            pub fn new_uuid() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// View as string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new_uuid()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(
    /// Unique identifier for an event.
    EventId
);
typed_id!(
    /// Identifier of the client session an event belongs to.
    SessionId
);
typed_id!(
    /// Identifier for a checkpoint, unique within one application.
    CheckpointId
);
typed_id!(
    /// Handle to a server-side conversation context.
    ContextId
);
typed_id!(
    /// Identifier of the end user owning a checkpoint or memory.
    UserId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_new_is_unique() {
        let a = EventId::new_uuid();
        let b = EventId::new_uuid();
        assert_ne!(a, b);
    }

    #[test]
    fn checkpoint_id_from_string() {
        let id = CheckpointId::from_string("c1");
        assert_eq!(id.as_str(), "c1");
        assert_eq!(id.to_string(), "c1");
    }

    #[test]
    fn typed_id_serializes_transparently() {
        let id = UserId::from("alice");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"alice\"");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
