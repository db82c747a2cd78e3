//! Backend row shapes and their typed conversions into domain entities.
//!
//! The hosted backend stores snake_case columns that do not line up 1:1 with
//! the client's entities. Every row-to-entity mapping is an explicit function
//! here rather than ad-hoc construction at call sites.
//!
//! Field mapping, `profiles` row → [`AppUser`] / [`Staff`]:
//!
//! | row column      | entity field    |
//! |-----------------|-----------------|
//! | `id`            | `id`            |
//! | `email`         | `email`         |
//! | `full_name`     | `name`          |
//! | `role`          | `role`          |
//! | `department_id` | `department_id` |
//! | `workspace_id`  | `workspace_id`  |
//! | `created_at`    | `created_at`    |
//!
//! Field mapping, `tasks` row → [`Task`]:
//!
//! | row column          | entity field        |
//! |---------------------|---------------------|
//! | `due_date`          | `due_date`          |
//! | `assigned_staff_id` | `assigned_staff_id` |
//! | `created_by`        | `created_by`        |
//! | `comments(*)`       | `comments`          |
//! | `attachments(*)`    | `attachments`       |
//!
//! `attachments.type` maps to [`Attachment::kind`]; `storage_path` is a
//! backend bookkeeping column with no entity counterpart.

use crate::types::{
    AppUser, Attachment, AttachmentKind, Comment, Department, Role, Staff, Task, TaskPriority,
    TaskStatus, Workspace,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A `profiles` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub department_id: Option<String>,
    pub workspace_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub designation: Option<String>,
}

impl ProfileRow {
    pub fn into_user(self) -> AppUser {
        AppUser {
            id: self.id,
            email: self.email,
            name: self.full_name,
            role: self.role,
            department_id: self.department_id,
            workspace_id: self.workspace_id,
            created_at: self.created_at,
        }
    }

    pub fn into_staff(self) -> Staff {
        Staff {
            id: self.id,
            name: self.full_name,
            email: self.email,
            role: self.role,
            department_id: self.department_id.unwrap_or_default(),
            avatar_url: None,
            designation: self.designation,
        }
    }
}

/// Insert payload for `profiles`.
#[derive(Debug, Clone, Serialize)]
pub struct NewProfileRow {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub department_id: String,
    pub workspace_id: String,
}

/// Update payload for `profiles`. Only present fields are written.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileRowPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub designation: Option<String>,
}

/// A `workspaces` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRow {
    pub id: String,
    pub name: String,
    pub owner_id: String,
}

impl WorkspaceRow {
    pub fn into_workspace(self) -> Workspace {
        Workspace {
            id: self.id,
            name: self.name,
            owner_id: self.owner_id,
        }
    }
}

/// A `departments` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentRow {
    pub id: String,
    pub name: String,
    pub workspace_id: String,
}

impl DepartmentRow {
    pub fn into_department(self) -> Department {
        Department {
            id: self.id,
            name: self.name,
        }
    }
}

/// A `comments` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRow {
    pub id: String,
    pub task_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl CommentRow {
    pub fn into_comment(self) -> Comment {
        Comment {
            id: self.id,
            task_id: self.task_id,
            author_id: self.author_id,
            content: self.content,
            created_at: self.created_at,
        }
    }
}

/// Insert payload for `comments`.
#[derive(Debug, Clone, Serialize)]
pub struct NewCommentRow {
    pub task_id: String,
    pub author_id: String,
    pub content: String,
}

/// An `attachments` row. `type` is a reserved word in Rust, hence the rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRow {
    pub id: String,
    pub task_id: String,
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    #[serde(default)]
    pub storage_path: Option<String>,
}

impl AttachmentRow {
    pub fn into_attachment(self) -> Attachment {
        Attachment {
            id: self.id,
            task_id: self.task_id,
            name: self.name,
            url: self.url,
            kind: self.kind,
        }
    }
}

/// Insert payload for `attachments`.
#[derive(Debug, Clone, Serialize)]
pub struct NewAttachmentRow {
    pub task_id: String,
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub storage_path: String,
}

/// A `tasks` row, optionally carrying nested comment and attachment rows from
/// an embedded select.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub department_id: String,
    pub assigned_staff_id: Option<String>,
    pub created_by: Option<String>,
    pub workspace_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub comments: Vec<CommentRow>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRow>,
}

impl TaskRow {
    pub fn into_task(self) -> Task {
        Task {
            id: self.id,
            title: self.title,
            description: self.description,
            due_date: self.due_date,
            priority: self.priority,
            status: self.status,
            department_id: self.department_id,
            assigned_staff_id: self.assigned_staff_id,
            created_by: self.created_by,
            created_at: self.created_at,
            comments: self.comments.into_iter().map(CommentRow::into_comment).collect(),
            attachments: self
                .attachments
                .into_iter()
                .map(AttachmentRow::into_attachment)
                .collect(),
        }
    }

    /// A task as built from a bare row with no embedded children, the shape a
    /// change event carries.
    pub fn into_task_without_children(mut self) -> Task {
        self.comments.clear();
        self.attachments.clear();
        self.into_task()
    }
}

/// Insert payload for `tasks`.
#[derive(Debug, Clone, Serialize)]
pub struct NewTaskRow {
    pub title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub department_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_staff_id: Option<String>,
    pub workspace_id: String,
    pub created_by: String,
}

/// A sparse `tasks` patch as carried by a change event. Absent and null
/// columns both land as `None` and leave the local value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskRowPatch {
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<TaskPriority>,
    pub status: Option<TaskStatus>,
    pub department_id: Option<String>,
    pub assigned_staff_id: Option<String>,
    pub workspace_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn profile_row_maps_full_name_to_name() {
        let row: ProfileRow = serde_json::from_value(json!({
            "id": "u1",
            "email": "ada@example.com",
            "full_name": "Ada Lovelace",
            "role": "Admin",
            "department_id": "d1",
            "workspace_id": "w1",
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        let user = row.clone().into_user();
        assert_eq!(user.name, "Ada Lovelace");
        assert_eq!(user.workspace_id, "w1");

        let staff = row.into_staff();
        assert_eq!(staff.name, "Ada Lovelace");
        assert_eq!(staff.department_id, "d1");
    }

    #[test]
    fn profile_row_without_department_maps_to_empty_string() {
        let row: ProfileRow = serde_json::from_value(json!({
            "id": "u2",
            "email": "b@example.com",
            "full_name": "B",
            "role": "Staff",
            "department_id": null,
            "workspace_id": "w1"
        }))
        .unwrap();
        assert_eq!(row.into_staff().department_id, "");
    }

    #[test]
    fn task_row_nests_children() {
        let row: TaskRow = serde_json::from_value(json!({
            "id": "t1",
            "title": "Ship it",
            "description": "",
            "due_date": "2024-03-01T00:00:00Z",
            "priority": "High",
            "status": "Not Started",
            "department_id": "d1",
            "assigned_staff_id": "u1",
            "created_by": "u0",
            "workspace_id": "w1",
            "created_at": "2024-02-01T00:00:00Z",
            "comments": [{
                "id": "c1",
                "task_id": "t1",
                "author_id": "u1",
                "content": "on it",
                "created_at": "2024-02-02T00:00:00Z"
            }],
            "attachments": [{
                "id": "a1",
                "task_id": "t1",
                "name": "brief.pdf",
                "url": "https://files.example.com/brief.pdf",
                "type": "document"
            }]
        }))
        .unwrap();

        let task = row.into_task();
        assert_eq!(task.comments.len(), 1);
        assert_eq!(task.attachments.len(), 1);
        assert_eq!(task.attachments[0].kind, AttachmentKind::Document);
    }

    #[test]
    fn task_patch_treats_null_and_absent_alike() {
        let patch: TaskRowPatch = serde_json::from_value(json!({
            "id": "t1",
            "title": "New title",
            "description": null
        }))
        .unwrap();
        assert_eq!(patch.title.as_deref(), Some("New title"));
        assert!(patch.description.is_none());
        assert!(patch.status.is_none());
    }
}
