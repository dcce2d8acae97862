//! Presence: cursors, selections and user profiles of other replicas.
//!
//! ## Architecture
//!
//! ```text
//! Local scene change / pointer move
//!       │
//!       ▼
//! PresenceSync::publish_selection() / publish_pointer()
//!       │
//!       ▼
//! Awareness local slot ──(transport)──► remote Awareness
//!                                            │ AwarenessChange
//!                                            ▼
//!                                 PresenceSync::apply_change()
//!                                            │
//!                                            ▼
//!                                 host.replace_collaborators()
//! ```
//!
//! The awareness slot layout is `{pointer, button, selectedElementIds,
//! user: {name, color, avatarUrl, state}}`. Anything missing or of the
//! wrong shape is treated as absent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::awareness::{Awareness, AwarenessChange};
use crate::error::SyncError;

// ───────────────────────────────────────────────────────────────────
// Core types
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerTool {
    #[default]
    Pointer,
    Laser,
}

/// Pointer position in scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pointer {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub tool: PointerTool,
}

impl Pointer {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            tool: PointerTool::Pointer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonState {
    #[default]
    Up,
    Down,
}

/// Raw pointer event from the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerUpdate {
    pub pointer: Pointer,
    pub button: ButtonState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserActivity {
    Active,
    Away,
    Idle,
}

/// Cursor and selection colors as CSS color strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorColor {
    pub background: String,
    pub stroke: String,
}

impl CollaboratorColor {
    /// A stable color for a client that did not publish one.
    ///
    /// The hue comes from the client id; saturation and lightness are
    /// fixed so every cursor stays readable.
    pub fn from_client_id(client_id: u64) -> Self {
        let hue = ((client_id % 360) as f32) / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        let stroke = hex(r, g, b);
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.9);
        Self {
            background: hex(r, g, b),
            stroke,
        }
    }
}

fn hex(r: f32, g: f32, b: f32) -> String {
    let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    format!("#{:02x}{:02x}{:02x}", channel(r), channel(g), channel(b))
}

/// HSL to RGB via chroma and the 60° hue sector. `h` is in turns.
fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    let chroma = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let sector = h.rem_euclid(1.0) * 6.0;
    let x = chroma * (1.0 - (sector % 2.0 - 1.0).abs());
    let (r, g, b) = match sector as u8 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = l - chroma / 2.0;
    (r + m, g + m, b + m)
}

/// One remote replica as the host renders it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorState {
    pub pointer: Option<Pointer>,
    pub button: Option<ButtonState>,
    pub selected_element_ids: BTreeSet<String>,
    pub username: Option<String>,
    pub color: CollaboratorColor,
    pub avatar_url: Option<String>,
    pub user_state: Option<UserActivity>,
}

impl CollaboratorState {
    /// Read an awareness slot leniently: each field that is missing or
    /// malformed falls back to its default.
    pub fn from_awareness(client_id: u64, state: &Value) -> Self {
        let user = state.get("user");
        let user_field = |name: &str| user.and_then(|u| u.get(name));

        Self {
            pointer: field(state.get("pointer")),
            button: field(state.get("button")),
            selected_element_ids: selected_ids(state.get("selectedElementIds")),
            username: field(user_field("name")),
            color: field(user_field("color"))
                .unwrap_or_else(|| CollaboratorColor::from_client_id(client_id)),
            avatar_url: field(user_field("avatarUrl")),
            user_state: field(user_field("state")),
        }
    }
}

fn field<T: serde::de::DeserializeOwned>(value: Option<&Value>) -> Option<T> {
    value.and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Accepts both `{id: true}` maps and plain id arrays.
fn selected_ids(value: Option<&Value>) -> BTreeSet<String> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .filter(|(_, selected)| selected.as_bool().unwrap_or(false))
            .map(|(id, _)| id.clone())
            .collect(),
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(|id| id.as_str().map(str::to_string))
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// Remote replicas keyed by client id (as a decimal string).
pub type Collaborators = BTreeMap<String, CollaboratorState>;

/// Profile published under the `user` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<CollaboratorColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<UserActivity>,
}

// ───────────────────────────────────────────────────────────────────
// Merging
// ───────────────────────────────────────────────────────────────────

/// Collaborators for every live state except `own_client_id`.
pub fn collaborators_from_states(
    states: &BTreeMap<u64, Value>,
    own_client_id: u64,
) -> Collaborators {
    states
        .iter()
        .filter(|(id, _)| **id != own_client_id)
        .map(|(id, state)| {
            let collaborator = CollaboratorState::from_awareness(*id, state);
            (id.to_string(), collaborator)
        })
        .collect()
}

/// Fold one awareness change into `previous`.
///
/// Added and updated ids are re-read from `states` (skipped if the state
/// has meanwhile vanished); removed ids are dropped; the own id is never
/// present in the result.
pub fn merge_collaborators(
    previous: &Collaborators,
    change: &AwarenessChange,
    states: &BTreeMap<u64, Value>,
    own_client_id: u64,
) -> Collaborators {
    let mut next = previous.clone();
    for id in change.added.iter().chain(&change.updated) {
        match states.get(id) {
            Some(state) => {
                next.insert(id.to_string(), CollaboratorState::from_awareness(*id, state));
            }
            None => log::trace!("awareness state for {id} vanished before merge"),
        }
    }
    for id in &change.removed {
        next.remove(&id.to_string());
    }
    next.remove(&own_client_id.to_string());
    next
}

// ───────────────────────────────────────────────────────────────────
// Synchronizer
// ───────────────────────────────────────────────────────────────────

/// Publishes local presence and tracks remote collaborators.
#[derive(Debug, Clone)]
pub struct PresenceSync {
    awareness: Awareness,
    collaborators: Collaborators,
}

impl PresenceSync {
    pub fn new(awareness: Awareness) -> Self {
        let collaborators = collaborators_from_states(&awareness.states(), awareness.client_id());
        Self {
            awareness,
            collaborators,
        }
    }

    pub fn awareness(&self) -> &Awareness {
        &self.awareness
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn publish_selection(&self, selected: &BTreeSet<String>) {
        let ids: Map<String, Value> = selected
            .iter()
            .map(|id| (id.clone(), Value::Bool(true)))
            .collect();
        self.awareness
            .set_local_state_field("selectedElementIds", Value::Object(ids));
    }

    pub fn publish_pointer(&self, update: &PointerUpdate) -> Result<(), SyncError> {
        self.awareness
            .set_local_state_field("pointer", serde_json::to_value(update.pointer)?);
        self.awareness
            .set_local_state_field("button", serde_json::to_value(update.button)?);
        Ok(())
    }

    pub fn publish_user(&self, profile: &UserProfile) -> Result<(), SyncError> {
        self.awareness
            .set_local_state_field("user", serde_json::to_value(profile)?);
        Ok(())
    }

    /// Fold a remote change in. Returns the new mapping, or `None` for
    /// changes to the local slot.
    pub fn apply_change(&mut self, change: &AwarenessChange) -> Option<&Collaborators> {
        if change.local {
            return None;
        }
        self.collaborators = merge_collaborators(
            &self.collaborators,
            change,
            &self.awareness.states(),
            self.awareness.client_id(),
        );
        Some(&self.collaborators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::awareness::AwarenessUpdate;
    use serde_json::json;

    #[test]
    fn test_full_state_parses() {
        let state = json!({
            "pointer": {"x": 10.0, "y": 20.5, "tool": "laser"},
            "button": "down",
            "selectedElementIds": {"a": true, "b": false},
            "user": {
                "name": "ana",
                "color": {"background": "#fff", "stroke": "#000"},
                "avatarUrl": "https://example.invalid/a.png",
                "state": "idle"
            }
        });
        let c = CollaboratorState::from_awareness(7, &state);
        let pointer = Pointer {
            x: 10.0,
            y: 20.5,
            tool: PointerTool::Laser,
        };
        assert_eq!(c.pointer, Some(pointer));
        assert_eq!(c.button, Some(ButtonState::Down));
        assert_eq!(c.selected_element_ids.into_iter().collect::<Vec<_>>(), ["a"]);
        assert_eq!(c.username.as_deref(), Some("ana"));
        assert_eq!(c.color.stroke, "#000");
        assert_eq!(c.user_state, Some(UserActivity::Idle));
    }

    #[test]
    fn test_partial_state_defaults() {
        let state = json!({"pointer": "garbage", "selectedElementIds": ["x"]});
        let c = CollaboratorState::from_awareness(7, &state);
        assert_eq!(c.pointer, None);
        assert_eq!(c.button, None);
        assert_eq!(c.username, None);
        assert_eq!(c.color, CollaboratorColor::from_client_id(7));
        assert!(c.selected_element_ids.contains("x"));
    }

    #[test]
    fn test_hsl_primaries() {
        let rgb = |h: f32| {
            let (r, g, b) = hsl_to_rgb(h, 1.0, 0.5);
            hex(r, g, b)
        };
        assert_eq!(rgb(0.0), "#ff0000");
        assert_eq!(rgb(1.0 / 3.0), "#00ff00");
        assert_eq!(rgb(2.0 / 3.0), "#0000ff");
        assert_eq!(rgb(1.0), "#ff0000");

        let (r, g, b) = hsl_to_rgb(0.25, 0.0, 0.4);
        assert_eq!((r, g, b), (0.4, 0.4, 0.4));
    }

    #[test]
    fn test_default_color_is_stable_hex() {
        let a = CollaboratorColor::from_client_id(42);
        assert_eq!(a, CollaboratorColor::from_client_id(42));
        assert_eq!(a.stroke.len(), 7);
        assert!(a.stroke.starts_with('#'));
        assert_ne!(a, CollaboratorColor::from_client_id(43));
    }

    #[test]
    fn test_merge_excludes_own_and_removed() {
        let mut states = BTreeMap::new();
        states.insert(1, json!({"button": "up"}));
        states.insert(2, json!({"button": "down"}));
        let previous = collaborators_from_states(&states, 1);
        assert_eq!(previous.keys().collect::<Vec<_>>(), ["2"]);

        states.insert(3, json!({}));
        let change = AwarenessChange {
            added: vec![3, 4],
            updated: vec![1],
            removed: vec![2],
            local: false,
        };
        let next = merge_collaborators(&previous, &change, &states, 1);
        assert_eq!(next.keys().collect::<Vec<_>>(), ["3"]);
    }

    #[test]
    fn test_publish_and_receive() {
        let local = Awareness::with_client_id(1);
        let remote = Awareness::with_client_id(2);
        let publisher = PresenceSync::new(local.clone());
        let mut receiver = PresenceSync::new(remote.clone());

        publisher.publish_selection(&["el-1".to_string()].into_iter().collect());
        let update = PointerUpdate {
            pointer: Pointer::new(3.0, 4.0),
            button: ButtonState::Down,
        };
        publisher.publish_pointer(&update).unwrap();

        let change = AwarenessChange {
            added: vec![1],
            ..AwarenessChange::default()
        };
        remote.apply_remote_state(&local.local_update());
        let collaborators = receiver.apply_change(&change).unwrap();

        let c = &collaborators["1"];
        assert_eq!(c.pointer, Some(Pointer::new(3.0, 4.0)));
        assert_eq!(c.button, Some(ButtonState::Down));
        assert!(c.selected_element_ids.contains("el-1"));
    }

    #[test]
    fn test_local_changes_ignored() {
        let mut sync = PresenceSync::new(Awareness::with_client_id(1));
        let change = AwarenessChange {
            updated: vec![1],
            local: true,
            ..AwarenessChange::default()
        };
        assert!(sync.apply_change(&change).is_none());
    }

    #[test]
    fn test_remote_offline_update_removes() {
        let awareness = Awareness::with_client_id(1);
        awareness.apply_remote_state(&AwarenessUpdate {
            client_id: 5,
            clock: 1,
            state: Some(json!({})),
        });
        let mut sync = PresenceSync::new(awareness.clone());
        assert!(sync.collaborators().contains_key("5"));

        awareness.apply_remote_state(&AwarenessUpdate {
            client_id: 5,
            clock: 2,
            state: None,
        });
        let change = AwarenessChange {
            removed: vec![5],
            ..AwarenessChange::default()
        };
        assert!(sync.apply_change(&change).unwrap().is_empty());
    }
}
