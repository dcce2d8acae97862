//! # sketchsync-core: pure reconciliation primitives
//!
//! Everything here is synchronous, allocation-light and free of any CRDT
//! dependency: the element model, fractional position keys, snapshots and
//! the delta computation that turns a host scene into collection
//! operations.
//!
//! ```text
//! host elements ──► SnapshotTracker ──(changed?)──► DeltaComputer
//!                        ▲                               │
//!                        │ new snapshot                  ▼
//!                        └──────────────────────── Vec<Operation>
//! ```
//!
//! ## Modules
//!
//! - [`element`]: scene element and the `{el, pos}` collection record
//! - [`position`]: dense base-62 position keys
//! - [`snapshot`]: `(id, version, pos)` view and change detection
//! - [`delta`]: snapshot vs. scene → Insert/Update/Delete/Move
//! - [`asset`]: binary attachments, additive-only delta
//! - [`config`]: shared tunables

pub mod asset;
pub mod config;
pub mod delta;
pub mod element;
pub mod error;
pub mod position;
pub mod snapshot;

pub use asset::{asset_operations, AssetDelta, AssetOperation, AssetRecord};
pub use config::SyncConfig;
pub use delta::{Delta, DeltaComputer, Operation};
pub use element::{sort_entries, Element, OrderedEntry, SharedElement};
pub use error::CoreError;
pub use position::{PositionKey, DEFAULT_STEP};
pub use snapshot::{Snapshot, SnapshotEntry, SnapshotTracker};
