//! Incremental merging of change events into the workspace snapshot.
//!
//! The backend's change bus delivers row-level insert/update/delete events
//! for the `tasks` and `comments` tables, unfiltered by workspace. Applying
//! an event patches the in-memory snapshot so it converges to what a full
//! refetch would produce, without refetching. Events that cannot be parsed
//! or that are missing an id are dropped; there is no retry and no ordering
//! guarantee beyond bus delivery order.

use crate::rows::{CommentRow, TaskRow, TaskRowPatch};
use crate::state::WorkspaceState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

/// Row operation carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Watched table a change event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    Tasks,
    Comments,
}

/// One change notification from the backend bus. `new` carries the row after
/// an insert/update; `old` carries at least the id for deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub table: ChangeTable,
    #[serde(default)]
    pub new: Value,
    #[serde(default)]
    pub old: Value,
}

impl ChangeEvent {
    pub fn insert(table: ChangeTable, new: Value) -> Self {
        Self {
            op: ChangeOp::Insert,
            table,
            new,
            old: Value::Null,
        }
    }

    pub fn update(table: ChangeTable, new: Value) -> Self {
        Self {
            op: ChangeOp::Update,
            table,
            new,
            old: Value::Null,
        }
    }

    pub fn delete(table: ChangeTable, old: Value) -> Self {
        Self {
            op: ChangeOp::Delete,
            table,
            new: Value::Null,
            old,
        }
    }
}

/// Apply one change event to the snapshot. Returns true when the snapshot
/// changed. `workspace_id` scopes task inserts; events for other tenants are
/// discarded.
pub fn apply_change(state: &mut WorkspaceState, workspace_id: &str, event: &ChangeEvent) -> bool {
    match event.table {
        ChangeTable::Comments => apply_comment_change(state, event),
        ChangeTable::Tasks => apply_task_change(state, workspace_id, event),
    }
}

fn apply_comment_change(state: &mut WorkspaceState, event: &ChangeEvent) -> bool {
    match event.op {
        ChangeOp::Insert => {
            let Ok(row) = serde_json::from_value::<CommentRow>(event.new.clone()) else {
                debug!("dropping malformed comment insert event");
                return false;
            };
            let applied = state.append_comment(row.into_comment());
            if !applied {
                trace!("comment insert ignored (unknown task or duplicate id)");
            }
            applied
        }
        ChangeOp::Update => {
            let Ok(row) = serde_json::from_value::<CommentRow>(event.new.clone()) else {
                debug!("dropping malformed comment update event");
                return false;
            };
            state.set_comment_content(&row.id, &row.content)
        }
        ChangeOp::Delete => {
            // Delete payloads may be partial; anything without an id is dropped.
            let Some(id) = event.old.get("id").and_then(Value::as_str) else {
                debug!("dropping comment delete event without id");
                return false;
            };
            state.remove_comment(id)
        }
    }
}

fn apply_task_change(state: &mut WorkspaceState, workspace_id: &str, event: &ChangeEvent) -> bool {
    match event.op {
        ChangeOp::Insert => {
            let Ok(row) = serde_json::from_value::<TaskRow>(event.new.clone()) else {
                debug!("dropping malformed task insert event");
                return false;
            };
            if row.workspace_id != workspace_id {
                trace!(workspace = %row.workspace_id, "ignoring task insert for another workspace");
                return false;
            }
            // The event carries the bare row; children start empty.
            state.insert_task_front(row.into_task_without_children())
        }
        ChangeOp::Update => {
            let Ok(patch) = serde_json::from_value::<TaskRowPatch>(event.new.clone()) else {
                debug!("dropping malformed task update event");
                return false;
            };
            let Some(id) = patch.id.clone() else {
                debug!("dropping task update event without id");
                return false;
            };
            state.patch_task(&id, &patch)
        }
        ChangeOp::Delete => {
            let Some(id) = event.old.get("id").and_then(Value::as_str) else {
                debug!("dropping task delete event without id");
                return false;
            };
            state.remove_task(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_op_uses_uppercase_wire_names() {
        assert_eq!(serde_json::to_string(&ChangeOp::Insert).unwrap(), "\"INSERT\"");
        let op: ChangeOp = serde_json::from_str("\"DELETE\"").unwrap();
        assert_eq!(op, ChangeOp::Delete);
    }

    #[test]
    fn malformed_insert_is_dropped() {
        let mut state = WorkspaceState::new();
        let event = ChangeEvent::insert(ChangeTable::Comments, json!({"content": "no ids here"}));
        assert!(!apply_change(&mut state, "w1", &event));
    }

    #[test]
    fn delete_without_id_is_dropped() {
        let mut state = WorkspaceState::new();
        let event = ChangeEvent::delete(ChangeTable::Tasks, json!({}));
        assert!(!apply_change(&mut state, "w1", &event));
    }
}
