//! Transaction origins.

use uuid::Uuid;

/// Tag attached to every local transaction.
///
/// Compared by value: a binding skips events carrying its own origin, and
/// an undo manager records only events whose origin it tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Origin(Uuid);

impl Origin {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for Origin {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
