//! Boundary contracts to the hosted backend service.
//!
//! The client consumes, and does not define, four backend surfaces: identity
//! (auth), table storage, object storage, and the row-change feed. Each is a
//! trait here so the client core stays testable against in-memory doubles;
//! [`http::HttpBackend`] is the production implementation and
//! [`memory::MemoryBackend`] the test double.

pub mod http;
pub mod memory;

use crate::error::Result;
use crate::realtime::ChangeEvent;
use crate::rows::{
    AttachmentRow, CommentRow, DepartmentRow, NewAttachmentRow, NewCommentRow, NewProfileRow,
    NewTaskRow, ProfileRow, ProfileRowPatch, TaskRow, WorkspaceRow,
};
use crate::types::TaskStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Signup metadata attached to the identity, consulted by the one-shot
/// setup-completion path when a verified identity has no profile yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupMetadata {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub workspace_name: Option<String>,
}

/// An authenticated identity session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub user_id: String,
    pub email: String,
    pub access_token: String,
    #[serde(default)]
    pub metadata: SignupMetadata,
}

/// Outcome of a sign-up. `session` is `None` while email confirmation is
/// pending.
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user_id: String,
    pub email: String,
    pub session: Option<AuthSession>,
}

/// Identity service boundary.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: SignupMetadata,
    ) -> Result<SignUpOutcome>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession>;

    async fn sign_out(&self) -> Result<()>;

    /// The current session, if any.
    async fn session(&self) -> Result<Option<AuthSession>>;

    /// Create a second identity without disturbing the current session, used
    /// when an Admin provisions a new staff member. Returns the new user id.
    async fn sign_up_secondary(&self, email: &str, password: &str) -> Result<String>;
}

/// Table storage boundary: typed row CRUD over the backend's collections.
#[async_trait]
pub trait TableApi: Send + Sync {
    // profiles
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<ProfileRow>>;
    async fn fetch_profiles(&self, workspace_id: &str) -> Result<Vec<ProfileRow>>;
    async fn insert_profile(&self, row: NewProfileRow) -> Result<ProfileRow>;
    async fn update_profile(&self, user_id: &str, patch: ProfileRowPatch) -> Result<()>;

    // workspaces
    async fn fetch_workspace(&self, workspace_id: &str) -> Result<Option<WorkspaceRow>>;
    async fn insert_workspace(&self, name: &str, owner_id: &str) -> Result<WorkspaceRow>;
    async fn rename_workspace(&self, workspace_id: &str, name: &str) -> Result<()>;

    // departments
    async fn fetch_departments(&self, workspace_id: &str) -> Result<Vec<DepartmentRow>>;
    async fn insert_department(&self, name: &str, workspace_id: &str) -> Result<DepartmentRow>;
    async fn delete_department(&self, department_id: &str) -> Result<()>;

    // tasks, with nested comments/attachments, newest first
    async fn fetch_tasks(&self, workspace_id: &str) -> Result<Vec<TaskRow>>;
    async fn insert_task(&self, row: NewTaskRow) -> Result<TaskRow>;
    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;
    async fn delete_task(&self, task_id: &str) -> Result<()>;

    // comments (author-scoped updates and deletes)
    async fn insert_comment(&self, row: NewCommentRow) -> Result<CommentRow>;
    async fn update_comment(
        &self,
        comment_id: &str,
        author_id: &str,
        content: &str,
    ) -> Result<CommentRow>;
    async fn delete_comment(&self, comment_id: &str, author_id: &str) -> Result<()>;

    // attachments
    async fn insert_attachment(&self, row: NewAttachmentRow) -> Result<AttachmentRow>;
}

/// Object storage boundary.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload bytes to `path` in `bucket`; returns the stored path.
    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<String>;

    /// Resolve a stored path to a publicly fetchable URL.
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// Row-change feed boundary.
///
/// `workspace_id` tells the transport which workspace the subscriber cares
/// about, but delivery is not guaranteed to be filtered; consumers must still
/// discard events for other tenants.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, workspace_id: &str) -> Result<mpsc::Receiver<ChangeEvent>>;
}

/// Everything the client needs from one backend, in one bound.
pub trait Backend: AuthApi + TableApi + ObjectStore + ChangeFeed {}

impl<T: AuthApi + TableApi + ObjectStore + ChangeFeed> Backend for T {}
