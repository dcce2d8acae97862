//! Error type shared by the core algorithms.

/// Failures raised by the core data model and diffing.
///
/// None of these occur under normal operation; they indicate a violated
/// precondition from an external collaborator (a corrupted position key,
/// a payload that does not serialize).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A position key is empty, ends with the zero digit, or contains a
    /// character outside the base-62 alphabet.
    InvalidPositionKey(String),
    /// A key was requested between two bounds that are not strictly ordered.
    UnorderedBounds { lower: String, upper: String },
    /// Serializing an element, entry or asset failed.
    SerializationError(String),
    /// Deserializing an element, entry or asset failed.
    DeserializationError(String),
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::InvalidPositionKey(key) => write!(f, "Invalid position key: {key:?}"),
            CoreError::UnorderedBounds { lower, upper } => {
                write!(f, "Position bounds not ordered: {lower:?} >= {upper:?}")
            }
            CoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            CoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for CoreError {}
