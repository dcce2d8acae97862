//! Error type for the replication-facing layer.

use sketchsync_core::CoreError;

/// Failures surfaced by the shared document, applier and binding.
///
/// Stale targets, missing presence fields and unavailable controls are
/// healed silently and never show up here; these variants mean a
/// collaborator broke a precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    Core(CoreError),
    /// A record in the shared collection is not a valid `{el, pos}` entry.
    MalformedEntry { key: String, reason: String },
    SerializationError(String),
    /// An update or state vector could not be decoded.
    DecodeError(String),
    /// A decoded update could not be integrated.
    UpdateError(String),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Core(e) => write!(f, "{e}"),
            Self::MalformedEntry { key, reason } => {
                write!(f, "Malformed entry {key:?}: {reason}")
            }
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DecodeError(e) => write!(f, "Decode error: {e}"),
            Self::UpdateError(e) => write!(f, "Update error: {e}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Core(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(e: CoreError) -> Self {
        SyncError::Core(e)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::SerializationError(e.to_string())
    }
}

impl From<yrs::encoding::read::Error> for SyncError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        SyncError::DecodeError(e.to_string())
    }
}
