//! Tunables shared by the reconciliation engine.

use std::time::Duration;

use crate::position::DEFAULT_STEP;

/// Configuration for a scene binding and its helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Digits between a new extremity key and its neighbor. Default: 8.
    pub position_step: u8,
    /// Maximum number of undo (and redo) items kept. Default: 100.
    pub undo_capacity: usize,
    /// Consecutive tracked transactions closer than this merge into one
    /// undo item. Default: 500ms.
    pub capture_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            position_step: DEFAULT_STEP,
            undo_capacity: 100,
            capture_timeout: Duration::from_millis(500),
        }
    }
}

impl SyncConfig {
    /// Config for testing (no undo merging, small history).
    pub fn for_testing() -> Self {
        Self {
            position_step: DEFAULT_STEP,
            undo_capacity: 16,
            capture_timeout: Duration::ZERO,
        }
    }
}
