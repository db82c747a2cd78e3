//! The client: session lifecycle, workspace snapshot, write-through
//! mutations, and the change-feed consumer.
//!
//! Every mutation follows the same pattern: role guards first, then the
//! backend write, then the equivalent patch to the in-memory snapshot. On
//! failure the error propagates and the snapshot is left untouched. The feed
//! consumer applies the same patches; id-based deduplication in the snapshot
//! makes the redundant re-delivery of our own writes harmless.
//!
//! The snapshot sits behind a single mutex and no lock is held across an
//! await, so mutation callbacks and feed events interleave one at a time.

use crate::backend::{AuthApi, Backend, ChangeFeed, ObjectStore, SignupMetadata, TableApi};
use crate::error::{Error, Result};
use crate::realtime::{self, ChangeEvent};
use crate::readstate::ReadState;
use crate::rows::{
    NewAttachmentRow, NewCommentRow, NewProfileRow, NewTaskRow, ProfileRow, ProfileRowPatch,
    TaskRow,
};
use crate::session;
use crate::state::WorkspaceState;
use crate::store::LocalStore;
use crate::types::{
    ADMIN_DEPARTMENT, AppUser, Attachment, AttachmentSource, Comment, Department, NewTask,
    ProfilePatch, Role, Staff, Task, TaskStatus, Workspace,
};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    user: Option<AppUser>,
    state: WorkspaceState,
    read: Option<ReadState>,
}

/// A signed-in (or signable-in) workspace client.
pub struct Client {
    auth: Arc<dyn AuthApi>,
    tables: Arc<dyn TableApi>,
    objects: Arc<dyn ObjectStore>,
    feed: Arc<dyn ChangeFeed>,
    local: Arc<dyn LocalStore>,
    attachments_bucket: String,
    inner: Mutex<Inner>,
}

impl Client {
    /// Build a client over one backend implementation and a local store.
    pub fn new<B>(backend: Arc<B>, local: Arc<dyn LocalStore>) -> Self
    where
        B: Backend + 'static,
    {
        Self {
            auth: backend.clone(),
            tables: backend.clone(),
            objects: backend.clone(),
            feed: backend,
            local,
            attachments_bucket: "attachments".to_string(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_attachments_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.attachments_bucket = bucket.into();
        self
    }

    // ---- session lifecycle ----

    /// Sign up a new account. Returns the resolved user when the identity
    /// service opened a session immediately, or `None` while email
    /// confirmation is pending.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        workspace_name: &str,
    ) -> Result<Option<AppUser>> {
        let outcome = self
            .auth
            .sign_up(
                email,
                password,
                SignupMetadata {
                    full_name: Some(full_name.to_string()),
                    workspace_name: Some(workspace_name.to_string()),
                },
            )
            .await?;
        if outcome.session.is_none() {
            info!(email, "sign-up accepted; waiting for email confirmation");
            return Ok(None);
        }
        self.load_session().await
    }

    /// Sign in and load the workspace.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AppUser> {
        self.auth.sign_in(email, password).await?;
        self.load_session().await?.ok_or(Error::NotSignedIn)
    }

    /// Resolve the current session (if any) into a loaded workspace: profile
    /// lookup (with one-shot setup recovery), read-state, workspace record,
    /// and the bulk data fetch.
    pub async fn load_session(&self) -> Result<Option<AppUser>> {
        let Some(auth_session) = self.auth.session().await? else {
            self.inner.lock().unwrap().user = None;
            return Ok(None);
        };

        let user = match session::resolve_user(self.auth.as_ref(), self.tables.as_ref(), &auth_session)
            .await
        {
            Ok(user) => user,
            Err(err) => {
                // resolve_user signed the identity out; drop any stale view-state.
                *self.inner.lock().unwrap() = Inner::default();
                return Err(err);
            }
        };
        let read = ReadState::load(self.local.clone(), &user.id, Utc::now());
        let workspace = self
            .tables
            .fetch_workspace(&user.workspace_id)
            .await?
            .map(|row| row.into_workspace());

        let (departments, staff, tasks) = self.fetch_workspace_data(&user.workspace_id).await?;

        let mut inner = self.inner.lock().unwrap();
        inner.state.clear();
        inner.state.workspace = workspace;
        inner.state.install(&user, departments, staff, tasks);
        inner.read = Some(read);
        inner.user = Some(user.clone());
        Ok(Some(user))
    }

    async fn fetch_workspace_data(
        &self,
        workspace_id: &str,
    ) -> Result<(Vec<Department>, Vec<Staff>, Vec<Task>)> {
        let (departments, profiles, tasks) = tokio::join!(
            self.tables.fetch_departments(workspace_id),
            self.tables.fetch_profiles(workspace_id),
            self.tables.fetch_tasks(workspace_id),
        );
        Ok((
            departments?
                .into_iter()
                .map(|row| row.into_department())
                .collect(),
            profiles?.into_iter().map(ProfileRow::into_staff).collect(),
            tasks?.into_iter().map(TaskRow::into_task).collect(),
        ))
    }

    /// Re-resolve the current identity's profile and refresh the snapshot.
    pub async fn refresh_profile(&self) -> Result<Option<AppUser>> {
        self.load_session().await
    }

    /// Sign out and drop all local view-state.
    pub async fn sign_out(&self) -> Result<()> {
        self.auth.sign_out().await?;
        let mut inner = self.inner.lock().unwrap();
        inner.user = None;
        inner.read = None;
        inner.state.clear();
        Ok(())
    }

    // ---- change feed ----

    /// Subscribe to the change feed and spawn the consumer task. Events are
    /// applied to the snapshot one at a time, in arrival order, until the
    /// feed closes.
    pub async fn start_sync(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let workspace_id = self.require_user()?.workspace_id;
        let mut rx = self.feed.subscribe(&workspace_id).await?;
        let client = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                client.apply_event(&event);
            }
            info!("change feed closed");
        }))
    }

    /// Apply one change event to the snapshot. Returns whether anything
    /// changed; duplicates of our own optimistic writes and other tenants'
    /// events come back false.
    pub fn apply_event(&self, event: &ChangeEvent) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(workspace_id) = inner.user.as_ref().map(|u| u.workspace_id.clone()) else {
            return false;
        };
        realtime::apply_change(&mut inner.state, &workspace_id, event)
    }

    // ---- snapshot accessors ----

    pub fn current_user(&self) -> Option<AppUser> {
        self.inner.lock().unwrap().user.clone()
    }

    pub fn is_admin(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .user
            .as_ref()
            .is_some_and(AppUser::is_admin)
    }

    pub fn workspace(&self) -> Option<Workspace> {
        self.inner.lock().unwrap().state.workspace.clone()
    }

    pub fn departments(&self) -> Vec<Department> {
        self.inner.lock().unwrap().state.departments.clone()
    }

    pub fn staff(&self) -> Vec<Staff> {
        self.inner.lock().unwrap().state.staff.clone()
    }

    /// Tasks, newest first.
    pub fn tasks(&self) -> Vec<Task> {
        self.inner.lock().unwrap().state.tasks.clone()
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.inner.lock().unwrap().state.task(task_id).cloned()
    }

    // ---- notification badges ----

    pub fn unread_count(&self, task_id: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        match (&inner.read, inner.state.task(task_id)) {
            (Some(read), Some(task)) => read.unread_count(task),
            _ => 0,
        }
    }

    pub fn is_task_new(&self, task_id: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        match (&inner.read, inner.state.task(task_id)) {
            (Some(read), Some(task)) => read.is_task_new(task),
            _ => false,
        }
    }

    /// Record the task-list view opening or closing.
    pub fn set_task_list_open(&self, open: bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(read) = &mut inner.read {
            read.set_list_open(open, Utc::now());
        }
    }

    pub fn mark_task_read(&self, task_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(read) = &mut inner.read {
            read.mark_task_read(task_id, Utc::now());
        }
    }

    /// Overdue tasks assigned to the viewer, surfaced at most once per
    /// session.
    pub fn take_overdue_alert(&self) -> Option<Vec<Task>> {
        let mut inner = self.inner.lock().unwrap();
        let Inner { state, read, .. } = &mut *inner;
        read.as_mut()?.take_overdue_alert(&state.tasks, Utc::now())
    }

    // ---- mutations ----

    fn require_user(&self) -> Result<AppUser> {
        self.inner
            .lock()
            .unwrap()
            .user
            .clone()
            .ok_or(Error::NotSignedIn)
    }

    fn require_admin(&self, action: &str) -> Result<AppUser> {
        let user = self.require_user()?;
        if !user.is_admin() {
            return Err(Error::permission(format!("only admins can {action}")));
        }
        Ok(user)
    }

    /// Create a task (Admin only): write the row, upload and record draft
    /// attachments, then prepend the assembled task to the snapshot.
    pub async fn add_task(&self, new_task: NewTask) -> Result<Task> {
        let user = self.require_admin("create tasks")?;

        let row = self
            .tables
            .insert_task(NewTaskRow {
                title: new_task.title,
                description: new_task.description,
                due_date: new_task.due_date,
                priority: new_task.priority,
                status: new_task.status,
                department_id: new_task.department_id,
                assigned_staff_id: new_task.assigned_staff_id,
                workspace_id: user.workspace_id.clone(),
                created_by: user.id.clone(),
            })
            .await?;

        let mut attachments = Vec::new();
        for draft in new_task.attachments {
            match self
                .store_attachment(&user.workspace_id, &row.id, &draft.name, draft.kind, draft.source)
                .await
            {
                Ok(Some(attachment)) => attachments.push(attachment),
                Ok(None) => {}
                Err(err) => warn!(name = %draft.name, error = %err, "skipping attachment"),
            }
        }

        let mut task = row.into_task_without_children();
        task.attachments = attachments;

        self.inner.lock().unwrap().state.insert_task_front(task.clone());
        Ok(task)
    }

    /// Upload one draft and record its row. Returns `Ok(None)` for drafts
    /// that cannot yield a fetchable URL.
    async fn store_attachment(
        &self,
        workspace_id: &str,
        task_id: &str,
        name: &str,
        kind: crate::types::AttachmentKind,
        source: AttachmentSource,
    ) -> Result<Option<Attachment>> {
        let (url, storage_path) = match source {
            AttachmentSource::File(path) => {
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|err| Error::storage(format!("{}: {err}", path.display())))?;
                let object_path = format!(
                    "{workspace_id}/{task_id}/{}_{}",
                    &Uuid::new_v4().simple().to_string()[..8],
                    sanitize_file_name(name)
                );
                let stored = self
                    .objects
                    .upload(&self.attachments_bucket, &object_path, bytes)
                    .await?;
                let url = self.objects.public_url(&self.attachments_bucket, &stored);
                (url, stored)
            }
            AttachmentSource::Remote(url) => {
                // Transient local handles cannot be refetched by anyone else.
                if url.starts_with("blob:") || url.is_empty() {
                    warn!(name, "attachment has no fetchable URL; skipping");
                    return Ok(None);
                }
                (url, String::new())
            }
        };

        let row = self
            .tables
            .insert_attachment(NewAttachmentRow {
                task_id: task_id.to_string(),
                name: name.to_string(),
                url,
                kind,
                storage_path,
            })
            .await?;
        Ok(Some(row.into_attachment()))
    }

    pub async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.require_user()?;
        self.tables.update_task_status(task_id, status).await?;
        self.inner
            .lock()
            .unwrap()
            .state
            .set_task_status(task_id, status);
        Ok(())
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        self.require_admin("delete tasks")?;
        self.tables.delete_task(task_id).await?;
        self.inner.lock().unwrap().state.remove_task(task_id);
        Ok(())
    }

    pub async fn add_comment(&self, task_id: &str, content: &str) -> Result<Comment> {
        let user = self.require_user()?;
        let row = self
            .tables
            .insert_comment(NewCommentRow {
                task_id: task_id.to_string(),
                author_id: user.id,
                content: content.to_string(),
            })
            .await?;
        let comment = row.into_comment();
        self.inner
            .lock()
            .unwrap()
            .state
            .append_comment(comment.clone());
        Ok(comment)
    }

    /// Edit one's own comment.
    pub async fn update_comment(&self, comment_id: &str, content: &str) -> Result<()> {
        let user = self.require_user()?;
        self.tables
            .update_comment(comment_id, &user.id, content)
            .await?;
        self.inner
            .lock()
            .unwrap()
            .state
            .set_comment_content(comment_id, content);
        Ok(())
    }

    /// Delete one's own comment.
    pub async fn delete_comment(&self, comment_id: &str) -> Result<()> {
        let user = self.require_user()?;
        self.tables.delete_comment(comment_id, &user.id).await?;
        self.inner.lock().unwrap().state.remove_comment(comment_id);
        Ok(())
    }

    pub async fn add_department(&self, name: &str) -> Result<Department> {
        let user = self.require_admin("create departments")?;
        let row = self
            .tables
            .insert_department(name, &user.workspace_id)
            .await?;
        let department = row.into_department();
        self.inner
            .lock()
            .unwrap()
            .state
            .insert_department(department.clone());
        Ok(department)
    }

    /// Delete a department. The Administration department is rejected before
    /// any network call; the local snapshot also drops the department's
    /// staff.
    pub async fn delete_department(&self, department_id: &str) -> Result<()> {
        {
            let inner = self.inner.lock().unwrap();
            let protected = inner
                .state
                .departments
                .iter()
                .any(|d| d.id == department_id && d.name == ADMIN_DEPARTMENT);
            if protected {
                return Err(Error::ProtectedDepartment(ADMIN_DEPARTMENT.to_string()));
            }
        }
        self.require_admin("delete departments")?;
        self.tables.delete_department(department_id).await?;
        self.inner
            .lock()
            .unwrap()
            .state
            .remove_department(department_id);
        Ok(())
    }

    /// Provision a new staff member: a secondary identity signup that leaves
    /// the Admin's session untouched, then the profile row, then the local
    /// append.
    pub async fn add_staff(
        &self,
        email: &str,
        name: &str,
        department_id: &str,
        role: Role,
        password: Option<&str>,
    ) -> Result<Staff> {
        let user = self.require_admin("manage staff")?;

        // New staff sign in with this and are expected to change it.
        let password = password.unwrap_or("password123");
        let new_user_id = self.auth.sign_up_secondary(email, password).await?;

        let row = self
            .tables
            .insert_profile(NewProfileRow {
                id: new_user_id,
                email: email.to_string(),
                full_name: name.to_string(),
                role,
                department_id: department_id.to_string(),
                workspace_id: user.workspace_id,
            })
            .await?;
        let member = row.into_staff();
        self.inner.lock().unwrap().state.insert_staff(member.clone());
        Ok(member)
    }

    /// Remove a staff member from the local snapshot only. Identity removal
    /// needs a privileged server role this client does not hold, so the
    /// backend rows are left in place.
    pub async fn delete_staff(&self, staff_id: &str) -> Result<()> {
        self.require_admin("manage staff")?;
        warn!(staff = %staff_id, "staff deletion is local-only; backend identity is not removed");
        self.inner.lock().unwrap().state.remove_staff(staff_id);
        Ok(())
    }

    pub async fn update_workspace_name(&self, name: &str) -> Result<()> {
        let user = self.require_user()?;
        self.tables
            .rename_workspace(&user.workspace_id, name)
            .await?;
        self.inner.lock().unwrap().state.rename_workspace(name);
        Ok(())
    }

    /// Update one's own profile; the session user and the staff list entry
    /// are patched together.
    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<()> {
        let user = self.require_user()?;
        self.tables
            .update_profile(
                &user.id,
                ProfileRowPatch {
                    full_name: patch.name.clone(),
                    designation: patch.designation.clone(),
                },
            )
            .await?;

        let mut inner = self.inner.lock().unwrap();
        if let (Some(app_user), Some(name)) = (&mut inner.user, &patch.name) {
            app_user.name = name.clone();
        }
        inner
            .state
            .patch_staff(&user.id, patch.name.as_deref(), patch.designation.as_deref());
        Ok(())
    }
}

/// Keep letters, digits, dots, and dashes; everything else becomes `_`.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_everything_but_word_chars_dots_dashes() {
        assert_eq!(sanitize_file_name("Q3 report (final).pdf"), "Q3_report__final_.pdf");
        assert_eq!(sanitize_file_name("photo-1.png"), "photo-1.png");
    }
}
