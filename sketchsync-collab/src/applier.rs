//! Applies one cycle's operations to the shared collection.
//!
//! All operations of a cycle go into a single transaction tagged with the
//! caller's origin: remote replicas see the batch at once, the own
//! reconciler recognizes it as an echo, and the undo manager records it
//! as one step.

use sketchsync_core::{Operation, OrderedEntry};

use crate::doc::SharedElements;
use crate::error::SyncError;
use crate::origin::Origin;

/// Outcome of [`apply_operations`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    /// Operations whose target no longer exists in the collection.
    pub dropped: usize,
}

/// Apply `operations` in order inside one transaction.
///
/// Update writes only the element of a record and Move only its position,
/// so a concurrent move and update of one element both survive. Update,
/// Move and Delete on an id that is no longer present are dropped (a
/// concurrent remote delete won). Insert over an existing id replaces the
/// record.
pub fn apply_operations(
    elements: &SharedElements,
    origin: Origin,
    operations: &[Operation],
) -> Result<ApplyReport, SyncError> {
    if operations.is_empty() {
        return Ok(ApplyReport::default());
    }

    let report = elements.transact(origin, |txn| -> Result<ApplyReport, SyncError> {
        let mut report = ApplyReport::default();
        for op in operations {
            let applied = match op {
                Operation::Insert { element, pos } => {
                    txn.set(&OrderedEntry::new(element.clone(), pos.clone()))?;
                    true
                }
                Operation::Update { id, element } => txn.set_element(id, element)?,
                Operation::Delete { id } => txn.remove(id),
                Operation::Move { id, pos } => txn.set_position(id, pos),
            };

            if applied {
                report.applied += 1;
            } else {
                log::debug!("dropping {} on missing element {}", kind(op), op.id());
                report.dropped += 1;
            }
        }
        Ok(report)
    })?;

    log::debug!(
        "applied {} operations ({} dropped) as {}",
        report.applied,
        report.dropped,
        origin
    );
    Ok(report)
}

fn kind(op: &Operation) -> &'static str {
    match op {
        Operation::Insert { .. } => "insert",
        Operation::Update { .. } => "update",
        Operation::Delete { .. } => "delete",
        Operation::Move { .. } => "move",
    }
}
