//! # sketchsync-collab: shared-document binding for sketch scenes
//!
//! Keeps a host scene and a yrs document in agreement: local edits become
//! minimal collection transactions, remote transactions become full scene
//! replacements that preserve the identity of untouched elements.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  SceneChange   ┌──────────────┐  Operation txn  ┌─────────────┐
//! │ SceneHost   │ ─────────────► │ SceneBinding │ ──────────────► │ SharedDoc   │
//! │ (editor)    │ ◄───────────── │              │ ◄────────────── │ (yrs Doc)   │
//! └─────────────┘  replace_*     └──────┬───────┘  ElementsEvent  └──────┬──────┘
//!                                       │                               │
//!                                ┌──────┴──────┐                 drain_outgoing /
//!                                │ Awareness   │                  apply_update
//!                                │ UndoManager │                  (transport)
//!                                └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`doc`]: the `"elements"` and `"assets"` maps with origin-tagged events
//! - [`applier`]: applies delta operations in one transaction
//! - [`reconciler`]: remote events → scene, with echo suppression
//! - [`assets`]: additive blob sync
//! - [`awareness`] / [`presence`]: per-client state and collaborators
//! - [`undo`]: origin-scoped undo/redo
//! - [`triggers`]: key chords and host controls for undo/redo
//! - [`binding`]: ties everything to a [`SceneHost`]
//!
//! Everything is single-threaded (`Rc`/`RefCell`); updates leave and enter
//! through byte buffers so any transport can carry them.

pub mod applier;
pub mod assets;
pub mod awareness;
pub mod binding;
pub mod doc;
pub mod error;
pub mod feed;
pub mod host;
pub mod origin;
pub mod presence;
pub mod reconciler;
pub mod triggers;
pub mod undo;

pub use applier::{apply_operations, ApplyReport};
pub use assets::{apply_asset_operations, AssetSync};
pub use awareness::{Awareness, AwarenessChange, AwarenessUpdate};
pub use binding::{BindingOptions, CycleReport, SceneBinding};
pub use doc::{
    AssetsEvent, AssetsTxn, ElementsEvent, ElementsTxn, EntryChange, SharedAssets, SharedDoc,
    SharedElements, ASSETS_ROOT, ELEMENTS_ROOT,
};
pub use error::SyncError;
pub use feed::{Feed, Subscription};
pub use host::{HostHandle, SceneChange, SceneHost};
pub use origin::Origin;
pub use presence::{
    collaborators_from_states, merge_collaborators, ButtonState, CollaboratorColor,
    CollaboratorState, Collaborators, Pointer, PointerTool, PointerUpdate, PresenceSync,
    UserActivity, UserProfile,
};
pub use reconciler::{rebuild_scene, Reconciler};
pub use triggers::{ControlId, ControlSurface, HistoryAction, HistoryControls, KeyChord};
pub use undo::{UndoConfig, UndoManager};
