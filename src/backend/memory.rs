//! In-memory backend double.
//!
//! Implements every boundary trait against plain vectors plus a fan-out
//! change feed, so the client core and its tests run without a network. Row
//! mutations are also published on the feed, mirroring how the hosted bus
//! redundantly re-delivers a client's own writes.

use crate::backend::{AuthApi, AuthSession, ChangeFeed, ObjectStore, SignUpOutcome, SignupMetadata, TableApi};
use crate::error::{Error, Result};
use crate::realtime::{ChangeEvent, ChangeTable};
use crate::rows::{
    AttachmentRow, CommentRow, DepartmentRow, NewAttachmentRow, NewCommentRow, NewProfileRow,
    NewTaskRow, ProfileRow, ProfileRowPatch, TaskRow, WorkspaceRow,
};
use crate::types::TaskStatus;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    profiles: Vec<ProfileRow>,
    workspaces: Vec<WorkspaceRow>,
    departments: Vec<DepartmentRow>,
    tasks: Vec<TaskRow>,
    comments: Vec<CommentRow>,
    attachments: Vec<AttachmentRow>,
}

struct AuthUser {
    user_id: String,
    password: String,
    metadata: SignupMetadata,
}

/// In-memory stand-in for the hosted backend.
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    auth_users: Mutex<HashMap<String, AuthUser>>,
    session: Mutex<Option<AuthSession>>,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    subscribers: Mutex<Vec<mpsc::Sender<ChangeEvent>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Publish an event to every live subscriber. Tests also use this to
    /// inject bus traffic that did not originate from this client.
    pub fn emit(&self, event: ChangeEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.try_send(event.clone()).is_ok());
    }

    fn emit_row<T: serde::Serialize>(
        &self,
        table: ChangeTable,
        build: fn(ChangeTable, serde_json::Value) -> ChangeEvent,
        row: &T,
    ) {
        if let Ok(value) = serde_json::to_value(row) {
            self.emit(build(table, value));
        }
    }

    /// Number of stored object paths, for assertions on upload behavior.
    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl AuthApi for MemoryBackend {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: SignupMetadata,
    ) -> Result<SignUpOutcome> {
        let mut users = self.auth_users.lock().unwrap();
        if users.contains_key(email) {
            return Err(Error::auth(format!("{email} is already registered")));
        }
        let user_id = Self::new_id();
        users.insert(
            email.to_string(),
            AuthUser {
                user_id: user_id.clone(),
                password: password.to_string(),
                metadata: metadata.clone(),
            },
        );
        let session = AuthSession {
            user_id: user_id.clone(),
            email: email.to_string(),
            access_token: Self::new_id(),
            metadata,
        };
        *self.session.lock().unwrap() = Some(session.clone());
        Ok(SignUpOutcome {
            user_id,
            email: email.to_string(),
            session: Some(session),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let users = self.auth_users.lock().unwrap();
        let user = users
            .get(email)
            .filter(|u| u.password == password)
            .ok_or_else(|| Error::auth("invalid email or password"))?;
        let session = AuthSession {
            user_id: user.user_id.clone(),
            email: email.to_string(),
            access_token: Self::new_id(),
            metadata: user.metadata.clone(),
        };
        *self.session.lock().unwrap() = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        *self.session.lock().unwrap() = None;
        Ok(())
    }

    async fn session(&self) -> Result<Option<AuthSession>> {
        Ok(self.session.lock().unwrap().clone())
    }

    async fn sign_up_secondary(&self, email: &str, password: &str) -> Result<String> {
        let mut users = self.auth_users.lock().unwrap();
        if users.contains_key(email) {
            return Err(Error::auth(format!("{email} is already registered")));
        }
        let user_id = Self::new_id();
        users.insert(
            email.to_string(),
            AuthUser {
                user_id: user_id.clone(),
                password: password.to_string(),
                metadata: SignupMetadata::default(),
            },
        );
        // The current session is deliberately left untouched.
        Ok(user_id)
    }
}

#[async_trait]
impl TableApi for MemoryBackend {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.profiles.iter().find(|p| p.id == user_id).cloned())
    }

    async fn fetch_profiles(&self, workspace_id: &str) -> Result<Vec<ProfileRow>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .profiles
            .iter()
            .filter(|p| p.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn insert_profile(&self, row: NewProfileRow) -> Result<ProfileRow> {
        let profile = ProfileRow {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            role: row.role,
            department_id: Some(row.department_id),
            workspace_id: row.workspace_id,
            created_at: Some(Utc::now()),
            designation: None,
        };
        self.tables.lock().unwrap().profiles.push(profile.clone());
        Ok(profile)
    }

    async fn update_profile(&self, user_id: &str, patch: ProfileRowPatch) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let profile = tables
            .profiles
            .iter_mut()
            .find(|p| p.id == user_id)
            .ok_or_else(|| Error::ProfileNotFound(user_id.to_string()))?;
        if let Some(full_name) = patch.full_name {
            profile.full_name = full_name;
        }
        if let Some(designation) = patch.designation {
            profile.designation = Some(designation);
        }
        Ok(())
    }

    async fn fetch_workspace(&self, workspace_id: &str) -> Result<Option<WorkspaceRow>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .workspaces
            .iter()
            .find(|w| w.id == workspace_id)
            .cloned())
    }

    async fn insert_workspace(&self, name: &str, owner_id: &str) -> Result<WorkspaceRow> {
        let workspace = WorkspaceRow {
            id: Self::new_id(),
            name: name.to_string(),
            owner_id: owner_id.to_string(),
        };
        self.tables.lock().unwrap().workspaces.push(workspace.clone());
        Ok(workspace)
    }

    async fn rename_workspace(&self, workspace_id: &str, name: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let workspace = tables
            .workspaces
            .iter_mut()
            .find(|w| w.id == workspace_id)
            .ok_or_else(|| Error::WorkspaceNotFound(workspace_id.to_string()))?;
        workspace.name = name.to_string();
        Ok(())
    }

    async fn fetch_departments(&self, workspace_id: &str) -> Result<Vec<DepartmentRow>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .departments
            .iter()
            .filter(|d| d.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn insert_department(&self, name: &str, workspace_id: &str) -> Result<DepartmentRow> {
        let department = DepartmentRow {
            id: Self::new_id(),
            name: name.to_string(),
            workspace_id: workspace_id.to_string(),
        };
        self.tables
            .lock()
            .unwrap()
            .departments
            .push(department.clone());
        Ok(department)
    }

    async fn delete_department(&self, department_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.departments.retain(|d| d.id != department_id);
        Ok(())
    }

    async fn fetch_tasks(&self, workspace_id: &str) -> Result<Vec<TaskRow>> {
        let tables = self.tables.lock().unwrap();
        let mut tasks: Vec<TaskRow> = tables
            .tasks
            .iter()
            .filter(|t| t.workspace_id == workspace_id)
            .cloned()
            .map(|mut task| {
                task.comments = tables
                    .comments
                    .iter()
                    .filter(|c| c.task_id == task.id)
                    .cloned()
                    .collect();
                task.attachments = tables
                    .attachments
                    .iter()
                    .filter(|a| a.task_id == task.id)
                    .cloned()
                    .collect();
                task
            })
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn insert_task(&self, row: NewTaskRow) -> Result<TaskRow> {
        let task = TaskRow {
            id: Self::new_id(),
            title: row.title,
            description: row.description,
            due_date: row.due_date,
            priority: row.priority,
            status: row.status,
            department_id: row.department_id,
            assigned_staff_id: row.assigned_staff_id,
            created_by: Some(row.created_by),
            workspace_id: row.workspace_id,
            created_at: Utc::now(),
            comments: vec![],
            attachments: vec![],
        };
        self.tables.lock().unwrap().tasks.push(task.clone());
        self.emit_row(ChangeTable::Tasks, ChangeEvent::insert, &task);
        Ok(task)
    }

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let updated = {
            let mut tables = self.tables.lock().unwrap();
            let task = tables
                .tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
            task.status = status;
            task.clone()
        };
        self.emit_row(ChangeTable::Tasks, ChangeEvent::update, &updated);
        Ok(())
    }

    async fn delete_task(&self, task_id: &str) -> Result<()> {
        {
            let mut tables = self.tables.lock().unwrap();
            tables.tasks.retain(|t| t.id != task_id);
            tables.comments.retain(|c| c.task_id != task_id);
            tables.attachments.retain(|a| a.task_id != task_id);
        }
        self.emit(ChangeEvent::delete(
            ChangeTable::Tasks,
            serde_json::json!({ "id": task_id }),
        ));
        Ok(())
    }

    async fn insert_comment(&self, row: NewCommentRow) -> Result<CommentRow> {
        let comment = CommentRow {
            id: Self::new_id(),
            task_id: row.task_id,
            author_id: row.author_id,
            content: row.content,
            created_at: Utc::now(),
        };
        self.tables.lock().unwrap().comments.push(comment.clone());
        self.emit_row(ChangeTable::Comments, ChangeEvent::insert, &comment);
        Ok(comment)
    }

    async fn update_comment(
        &self,
        comment_id: &str,
        author_id: &str,
        content: &str,
    ) -> Result<CommentRow> {
        let updated = {
            let mut tables = self.tables.lock().unwrap();
            let comment = tables
                .comments
                .iter_mut()
                .find(|c| c.id == comment_id && c.author_id == author_id)
                .ok_or_else(|| Error::backend("comment not found or not yours"))?;
            comment.content = content.to_string();
            comment.clone()
        };
        self.emit_row(ChangeTable::Comments, ChangeEvent::update, &updated);
        Ok(updated)
    }

    async fn delete_comment(&self, comment_id: &str, author_id: &str) -> Result<()> {
        {
            let mut tables = self.tables.lock().unwrap();
            let before = tables.comments.len();
            tables
                .comments
                .retain(|c| !(c.id == comment_id && c.author_id == author_id));
            if tables.comments.len() == before {
                return Err(Error::backend("comment not found or not yours"));
            }
        }
        self.emit(ChangeEvent::delete(
            ChangeTable::Comments,
            serde_json::json!({ "id": comment_id }),
        ));
        Ok(())
    }

    async fn insert_attachment(&self, row: NewAttachmentRow) -> Result<AttachmentRow> {
        let attachment = AttachmentRow {
            id: Self::new_id(),
            task_id: row.task_id,
            name: row.name,
            url: row.url,
            kind: row.kind,
            storage_path: Some(row.storage_path),
        };
        self.tables
            .lock()
            .unwrap()
            .attachments
            .push(attachment.clone());
        Ok(attachment)
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<String> {
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{bucket}/{path}"), bytes);
        Ok(path.to_string())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{bucket}/{path}")
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, _workspace_id: &str) -> Result<mpsc::Receiver<ChangeEvent>> {
        // Delivery is unfiltered; consumers discard other tenants' events.
        let (tx, rx) = mpsc::channel(64);
        self.subscribers.lock().unwrap().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, TaskPriority};
    use chrono::TimeZone;

    fn new_task_row(workspace_id: &str) -> NewTaskRow {
        NewTaskRow {
            title: "t".into(),
            description: String::new(),
            due_date: Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
            priority: TaskPriority::Low,
            status: TaskStatus::NotStarted,
            department_id: "d1".into(),
            assigned_staff_id: None,
            workspace_id: workspace_id.into(),
            created_by: "u1".into(),
        }
    }

    #[tokio::test]
    async fn secondary_sign_up_preserves_current_session() {
        let backend = MemoryBackend::new();
        backend
            .sign_up("admin@example.com", "pw", SignupMetadata::default())
            .await
            .unwrap();
        let before = backend.session().await.unwrap().unwrap();

        backend
            .sign_up_secondary("staff@example.com", "pw2")
            .await
            .unwrap();
        let after = backend.session().await.unwrap().unwrap();
        assert_eq!(before.user_id, after.user_id);
    }

    #[tokio::test]
    async fn mutations_are_republished_on_the_feed() {
        let backend = MemoryBackend::new();
        let mut rx = backend.subscribe("w1").await.unwrap();

        backend.insert_task(new_task_row("w1")).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.table, ChangeTable::Tasks);
        assert_eq!(event.op, crate::realtime::ChangeOp::Insert);
    }

    #[tokio::test]
    async fn fetch_tasks_nests_children_and_orders_newest_first() {
        let backend = MemoryBackend::new();
        let first = backend.insert_task(new_task_row("w1")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = backend.insert_task(new_task_row("w1")).await.unwrap();

        backend
            .insert_comment(NewCommentRow {
                task_id: first.id.clone(),
                author_id: "u1".into(),
                content: "hi".into(),
            })
            .await
            .unwrap();

        let tasks = backend.fetch_tasks("w1").await.unwrap();
        assert_eq!(tasks[0].id, second.id);
        assert_eq!(tasks[1].id, first.id);
        assert_eq!(tasks[1].comments.len(), 1);
    }

    #[tokio::test]
    async fn profiles_are_scoped_by_workspace() {
        let backend = MemoryBackend::new();
        backend
            .insert_profile(NewProfileRow {
                id: "u1".into(),
                email: "a@example.com".into(),
                full_name: "A".into(),
                role: Role::Admin,
                department_id: "d1".into(),
                workspace_id: "w1".into(),
            })
            .await
            .unwrap();
        backend
            .insert_profile(NewProfileRow {
                id: "u2".into(),
                email: "b@example.com".into(),
                full_name: "B".into(),
                role: Role::Staff,
                department_id: "d9".into(),
                workspace_id: "w2".into(),
            })
            .await
            .unwrap();

        let rows = backend.fetch_profiles("w1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "u1");
    }
}
