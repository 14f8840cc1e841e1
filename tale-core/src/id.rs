//! Identifier types for scenes and their messages.
//!
//! Message ids are small integers handed out by a generator owned by the
//! history store, so two sessions never share a counter. Memory ids wrap
//! UUIDs the same way the rest of the crate's ids do.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a message within one scene's history.
///
/// `0` is reserved for messages that have not been appended yet.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    /// The id carried by a message before the store assigns one.
    pub const UNASSIGNED: MessageId = MessageId(0);

    /// Wrap a raw id.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw integer value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether the store has assigned this id yet.
    #[inline]
    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Monotonic message id source, seeded at zero per session.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    last: u64,
}

impl IdGenerator {
    /// Create a generator whose first id is `1`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next id.
    pub fn next_id(&mut self) -> MessageId {
        self.last += 1;
        MessageId(self.last)
    }

    /// Make sure future ids are greater than `id`.
    pub fn observe(&mut self, id: MessageId) {
        self.last = self.last.max(id.0);
    }

    /// The most recently issued (or observed) id.
    pub fn last(&self) -> MessageId {
        MessageId(self.last)
    }
}

/// Macro to define a newtype ID wrapper around UUID
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random ID
            #[inline]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Short form used in memory collection names.
            pub fn short(&self) -> String {
                self.0.simple().to_string()[..10].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of the long-term memory store backing a scene
    MemoryId
);

define_id!(
    /// Identifier of one memory session (rotated on every save)
    MemorySessionId
);
