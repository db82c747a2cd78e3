//! Core domain types for the workspace task tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application-level role. Only Admins create/delete tasks and departments or
/// manage staff; the backend's own access rules remain the real authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Staff,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Staff => "Staff",
        }
    }
}

/// Task lifecycle status. Wire values keep the human-readable spelling the
/// backend stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "Not Started")]
    NotStarted,
    #[serde(rename = "In Progress")]
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "Not Started",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Completed => "Completed",
        }
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "Low",
            TaskPriority::Medium => "Medium",
            TaskPriority::High => "High",
        }
    }
}

/// Attachment kind, as stored in the backend's `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Document,
}

/// A department within a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: String,
    pub name: String,
}

/// Name of the department that always exists and is never deletable.
pub const ADMIN_DEPARTMENT: &str = "Administration";

/// A staff member. One record corresponds 1:1 with a backend identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub department_id: String,
    pub avatar_url: Option<String>,
    pub designation: Option<String>,
}

/// A comment on a task. Append-only except author-scoped edit/delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub task_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A stored attachment. Immutable in this client once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub task_id: String,
    pub name: String,
    pub url: String,
    pub kind: AttachmentKind,
}

/// A task with its nested comments and attachments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub department_id: String,
    pub assigned_staff_id: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub comments: Vec<Comment>,
    pub attachments: Vec<Attachment>,
}

impl Task {
    /// Past its due date and not yet completed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.due_date < now && self.status != TaskStatus::Completed
    }
}

/// The tenancy boundary. Every task, staff member, and department belongs to
/// exactly one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub owner_id: String,
}

/// The signed-in application user, resolved from a backend profile row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub department_id: Option<String>,
    pub workspace_id: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl AppUser {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Staff-shaped view of the session user, for lists that mix the viewer
    /// in with the rest of the workspace staff.
    pub fn as_staff(&self) -> Staff {
        Staff {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            department_id: self.department_id.clone().unwrap_or_default(),
            avatar_url: None,
            designation: None,
        }
    }
}

/// Where a draft attachment's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    /// A local file to be uploaded before the attachment row is written.
    File(PathBuf),
    /// An already-public URL kept as-is, no upload.
    Remote(String),
}

/// An attachment as supplied to task creation, before upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDraft {
    pub name: String,
    pub kind: AttachmentKind,
    pub source: AttachmentSource,
}

/// Input for creating a task. The id, comments, and creation timestamp are
/// assigned by the backend.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub department_id: String,
    pub assigned_staff_id: Option<String>,
    pub attachments: Vec<AttachmentDraft>,
}

/// Fields a user may change on their own profile.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub designation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn task(due: DateTime<Utc>, status: TaskStatus) -> Task {
        Task {
            id: "t1".into(),
            title: "title".into(),
            description: String::new(),
            due_date: due,
            priority: TaskPriority::Medium,
            status,
            department_id: "d1".into(),
            assigned_staff_id: None,
            created_by: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            comments: vec![],
            attachments: vec![],
        }
    }

    #[test]
    fn overdue_requires_past_due_and_open_status() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let past = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let future = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();

        assert!(task(past, TaskStatus::NotStarted).is_overdue(now));
        assert!(task(past, TaskStatus::InProgress).is_overdue(now));
        assert!(!task(past, TaskStatus::Completed).is_overdue(now));
        assert!(!task(future, TaskStatus::NotStarted).is_overdue(now));
    }

    #[test]
    fn status_wire_spelling_round_trips() {
        let json = serde_json::to_string(&TaskStatus::NotStarted).unwrap();
        assert_eq!(json, "\"Not Started\"");
        let back: TaskStatus = serde_json::from_str("\"In Progress\"").unwrap();
        assert_eq!(back, TaskStatus::InProgress);
    }

    #[test]
    fn role_serializes_capitalized() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"Admin\"");
        let back: Role = serde_json::from_str("\"Staff\"").unwrap();
        assert_eq!(back, Role::Staff);
    }
}
