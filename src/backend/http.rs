//! HTTP implementation of the backend boundaries.
//!
//! Speaks the hosted service's REST dialect: `/auth/v1` for identity,
//! `/rest/v1` for table rows (equality filters, `order=`, `Prefer:
//! return=representation`), `/storage/v1` for objects. The change feed is
//! driven by a background interval sync that diffs consecutive workspace
//! fetches by row id and synthesizes insert/update/delete events; the
//! subscriber cannot tell it apart from a push bus beyond latency.

use crate::backend::{AuthApi, AuthSession, ChangeFeed, ObjectStore, SignUpOutcome, SignupMetadata, TableApi};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::realtime::{ChangeEvent, ChangeTable};
use crate::rows::{
    AttachmentRow, CommentRow, DepartmentRow, NewAttachmentRow, NewCommentRow, NewProfileRow,
    NewTaskRow, ProfileRow, ProfileRowPatch, TaskRow, WorkspaceRow,
};
use crate::types::TaskStatus;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Identity payload returned by the auth endpoints.
#[derive(Debug, Deserialize)]
struct AuthUserPayload {
    id: String,
    email: String,
    #[serde(default)]
    user_metadata: SignupMetadata,
}

/// Response of `/auth/v1/signup` and `/auth/v1/token`. `access_token` is
/// absent when email confirmation is still pending.
#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<AuthUserPayload>,
    // A confirmation-pending signup returns the bare user object instead.
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Production backend client.
pub struct HttpBackend {
    config: BackendConfig,
    http: reqwest::Client,
    session: Mutex<Option<AuthSession>>,
}

impl fmt::Debug for HttpBackend {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpBackend")
            .field("base_url", &self.config.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

const MAX_ERROR_BODY: usize = 200;

fn truncate_for_error(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY {
        body.to_owned()
    } else {
        format!("{}...", body.chars().take(MAX_ERROR_BODY).collect::<String>())
    }
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("taskdesk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| Error::backend(format!("failed to initialize HTTP client: {err}")))?;
        Ok(Self {
            config,
            http,
            session: Mutex::new(None),
        })
    }

    /// Adopt a previously persisted session (e.g. across CLI invocations).
    pub fn restore_session(&self, session: AuthSession) {
        *self.session.lock().unwrap() = Some(session);
    }

    fn bearer(&self) -> String {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.config.api_key.clone())
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.config.base_url)
    }

    fn rest_url(&self, path_and_query: &str) -> String {
        format!("{}/rest/v1/{path_and_query}", self.config.base_url)
    }

    fn apply_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.config.api_key)
            .header("Authorization", format!("Bearer {}", self.bearer()))
    }

    async fn read_body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Backend(format!(
                "HTTP {status}: {}",
                truncate_for_error(&body)
            )));
        }
        Ok(body)
    }

    async fn get_rows<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<Vec<T>> {
        let response = self
            .apply_headers(self.http.get(self.rest_url(path_and_query)))
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        serde_json::from_str(&body)
            .map_err(|err| Error::backend(format!("unexpected row payload: {err}")))
    }

    /// Insert rows and return the representation the backend echoes back.
    async fn insert_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .apply_headers(self.http.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        let mut rows: Vec<T> = serde_json::from_str(&body)
            .map_err(|err| Error::backend(format!("unexpected insert payload: {err}")))?;
        if rows.is_empty() {
            return Err(Error::backend("insert returned no rows"));
        }
        Ok(rows.remove(0))
    }

    async fn patch_rows(&self, path_and_query: &str, body: serde_json::Value) -> Result<String> {
        let response = self
            .apply_headers(self.http.patch(self.rest_url(path_and_query)))
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await?;
        Self::read_body(response).await
    }

    async fn delete_rows(&self, path_and_query: &str) -> Result<()> {
        let response = self
            .apply_headers(self.http.delete(self.rest_url(path_and_query)))
            .send()
            .await?;
        Self::read_body(response).await?;
        Ok(())
    }

    fn session_from_auth_response(raw: &str) -> Result<AuthResponse> {
        serde_json::from_str(raw)
            .map_err(|err| Error::auth(format!("unexpected auth payload: {err}")))
    }
}

#[async_trait]
impl AuthApi for HttpBackend {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: SignupMetadata,
    ) -> Result<SignUpOutcome> {
        let response = self
            .http
            .post(self.auth_url("signup"))
            .header("apikey", &self.config.api_key)
            .json(&json!({
                "email": email,
                "password": password,
                "data": metadata,
            }))
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        let parsed = Self::session_from_auth_response(&body)?;

        // With auto-confirmation the response is a session; with email
        // confirmation pending it is the bare identity.
        if let (Some(token), Some(user)) = (&parsed.access_token, &parsed.user) {
            let session = AuthSession {
                user_id: user.id.clone(),
                email: user.email.clone(),
                access_token: token.clone(),
                metadata: user.user_metadata.clone(),
            };
            *self.session.lock().unwrap() = Some(session.clone());
            return Ok(SignUpOutcome {
                user_id: session.user_id.clone(),
                email: session.email.clone(),
                session: Some(session),
            });
        }

        let user_id = parsed
            .id
            .or(parsed.user.map(|u| u.id))
            .ok_or_else(|| Error::auth("signup response carried no identity"))?;
        Ok(SignUpOutcome {
            user_id,
            email: parsed.email.unwrap_or_else(|| email.to_string()),
            session: None,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let response = self
            .http
            .post(format!("{}?grant_type=password", self.auth_url("token")))
            .header("apikey", &self.config.api_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        let parsed = Self::session_from_auth_response(&body)?;

        let token = parsed
            .access_token
            .ok_or_else(|| Error::auth("sign-in response carried no access token"))?;
        let user = parsed
            .user
            .ok_or_else(|| Error::auth("sign-in response carried no identity"))?;
        let session = AuthSession {
            user_id: user.id,
            email: user.email,
            access_token: token,
            metadata: user.user_metadata,
        };
        *self.session.lock().unwrap() = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let had_session = self.session.lock().unwrap().is_some();
        if had_session {
            let response = self
                .apply_headers(self.http.post(self.auth_url("logout")))
                .send()
                .await;
            if let Err(err) = response {
                debug!(error = %err, "logout call failed; clearing session anyway");
            }
        }
        *self.session.lock().unwrap() = None;
        Ok(())
    }

    async fn session(&self) -> Result<Option<AuthSession>> {
        Ok(self.session.lock().unwrap().clone())
    }

    async fn sign_up_secondary(&self, email: &str, password: &str) -> Result<String> {
        // Same signup endpoint, but the returned session is discarded so the
        // Admin's own session stays in place.
        let response = self
            .http
            .post(self.auth_url("signup"))
            .header("apikey", &self.config.api_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        let parsed = Self::session_from_auth_response(&body)?;
        parsed
            .user
            .map(|u| u.id)
            .or(parsed.id)
            .ok_or_else(|| Error::auth("signup response carried no identity"))
    }
}

#[async_trait]
impl TableApi for HttpBackend {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        let mut rows: Vec<ProfileRow> = self
            .get_rows(&format!("profiles?id=eq.{user_id}&select=*"))
            .await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    async fn fetch_profiles(&self, workspace_id: &str) -> Result<Vec<ProfileRow>> {
        self.get_rows(&format!("profiles?workspace_id=eq.{workspace_id}&select=*"))
            .await
    }

    async fn insert_profile(&self, row: NewProfileRow) -> Result<ProfileRow> {
        self.insert_rows("profiles", json!([row])).await
    }

    async fn update_profile(&self, user_id: &str, patch: ProfileRowPatch) -> Result<()> {
        self.patch_rows(
            &format!("profiles?id=eq.{user_id}"),
            serde_json::to_value(patch).map_err(Error::backend)?,
        )
        .await?;
        Ok(())
    }

    async fn fetch_workspace(&self, workspace_id: &str) -> Result<Option<WorkspaceRow>> {
        let mut rows: Vec<WorkspaceRow> = self
            .get_rows(&format!("workspaces?id=eq.{workspace_id}&select=*"))
            .await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    async fn insert_workspace(&self, name: &str, owner_id: &str) -> Result<WorkspaceRow> {
        self.insert_rows(
            "workspaces",
            json!([{ "name": name, "owner_id": owner_id }]),
        )
        .await
    }

    async fn rename_workspace(&self, workspace_id: &str, name: &str) -> Result<()> {
        self.patch_rows(
            &format!("workspaces?id=eq.{workspace_id}"),
            json!({ "name": name }),
        )
        .await?;
        Ok(())
    }

    async fn fetch_departments(&self, workspace_id: &str) -> Result<Vec<DepartmentRow>> {
        self.get_rows(&format!(
            "departments?workspace_id=eq.{workspace_id}&select=*"
        ))
        .await
    }

    async fn insert_department(&self, name: &str, workspace_id: &str) -> Result<DepartmentRow> {
        self.insert_rows(
            "departments",
            json!([{ "name": name, "workspace_id": workspace_id }]),
        )
        .await
    }

    async fn delete_department(&self, department_id: &str) -> Result<()> {
        self.delete_rows(&format!("departments?id=eq.{department_id}"))
            .await
    }

    async fn fetch_tasks(&self, workspace_id: &str) -> Result<Vec<TaskRow>> {
        self.get_rows(&format!(
            "tasks?workspace_id=eq.{workspace_id}&select=*,comments(*),attachments(*)&order=created_at.desc"
        ))
        .await
    }

    async fn insert_task(&self, row: NewTaskRow) -> Result<TaskRow> {
        self.insert_rows("tasks", json!([row])).await
    }

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.patch_rows(&format!("tasks?id=eq.{task_id}"), json!({ "status": status }))
            .await?;
        Ok(())
    }

    async fn delete_task(&self, task_id: &str) -> Result<()> {
        self.delete_rows(&format!("tasks?id=eq.{task_id}")).await
    }

    async fn insert_comment(&self, row: NewCommentRow) -> Result<CommentRow> {
        self.insert_rows("comments", json!([row])).await
    }

    async fn update_comment(
        &self,
        comment_id: &str,
        author_id: &str,
        content: &str,
    ) -> Result<CommentRow> {
        let body = self
            .patch_rows(
                &format!("comments?id=eq.{comment_id}&author_id=eq.{author_id}"),
                json!({ "content": content }),
            )
            .await?;
        let mut rows: Vec<CommentRow> = serde_json::from_str(&body)
            .map_err(|err| Error::backend(format!("unexpected update payload: {err}")))?;
        if rows.is_empty() {
            return Err(Error::backend(
                "comment update matched no rows (wrong id or not the author)",
            ));
        }
        Ok(rows.remove(0))
    }

    async fn delete_comment(&self, comment_id: &str, author_id: &str) -> Result<()> {
        self.delete_rows(&format!(
            "comments?id=eq.{comment_id}&author_id=eq.{author_id}"
        ))
        .await
    }

    async fn insert_attachment(&self, row: NewAttachmentRow) -> Result<AttachmentRow> {
        self.insert_rows("attachments", json!([row])).await
    }
}

#[async_trait]
impl ObjectStore for HttpBackend {
    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<String> {
        let url = format!("{}/storage/v1/object/{bucket}/{path}", self.config.base_url);
        let response = self
            .apply_headers(self.http.post(url))
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(Error::storage)?;
        let status = response.status();
        let body = response.text().await.map_err(Error::storage)?;
        if !status.is_success() {
            return Err(Error::Storage(format!(
                "HTTP {status}: {}",
                truncate_for_error(&body)
            )));
        }
        Ok(path.to_string())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{bucket}/{path}",
            self.config.base_url
        )
    }
}

/// Bare task row used for change detection; children are diffed separately.
fn bare(row: &TaskRow) -> TaskRow {
    let mut bare = row.clone();
    bare.comments.clear();
    bare.attachments.clear();
    bare
}

fn rows_equal(a: &TaskRow, b: &TaskRow) -> bool {
    serde_json::to_value(bare(a)).ok() == serde_json::to_value(bare(b)).ok()
}

/// Diff two consecutive workspace snapshots into change events: one per
/// appeared/changed/vanished task row, likewise for nested comment rows.
fn diff_snapshot(
    prev_tasks: &HashMap<String, TaskRow>,
    prev_comments: &HashMap<String, CommentRow>,
    current: &[TaskRow],
) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    let mut seen_tasks: HashMap<&str, &TaskRow> = HashMap::new();
    let mut seen_comments: HashMap<&str, &CommentRow> = HashMap::new();
    for task in current {
        seen_tasks.insert(task.id.as_str(), task);
        for comment in &task.comments {
            seen_comments.insert(comment.id.as_str(), comment);
        }
    }

    for task in current {
        match prev_tasks.get(&task.id) {
            None => {
                if let Ok(value) = serde_json::to_value(bare(task)) {
                    events.push(ChangeEvent::insert(ChangeTable::Tasks, value));
                }
            }
            Some(previous) if !rows_equal(previous, task) => {
                if let Ok(value) = serde_json::to_value(bare(task)) {
                    events.push(ChangeEvent::update(ChangeTable::Tasks, value));
                }
            }
            Some(_) => {}
        }
    }
    for task_id in prev_tasks.keys() {
        if !seen_tasks.contains_key(task_id.as_str()) {
            events.push(ChangeEvent::delete(
                ChangeTable::Tasks,
                json!({ "id": task_id }),
            ));
        }
    }

    for (comment_id, comment) in &seen_comments {
        match prev_comments.get(*comment_id) {
            None => {
                if let Ok(value) = serde_json::to_value(comment) {
                    events.push(ChangeEvent::insert(ChangeTable::Comments, value));
                }
            }
            Some(previous) if previous.content != comment.content => {
                if let Ok(value) = serde_json::to_value(comment) {
                    events.push(ChangeEvent::update(ChangeTable::Comments, value));
                }
            }
            Some(_) => {}
        }
    }
    for comment_id in prev_comments.keys() {
        if !seen_comments.contains_key(comment_id.as_str()) {
            events.push(ChangeEvent::delete(
                ChangeTable::Comments,
                json!({ "id": comment_id }),
            ));
        }
    }

    events
}

fn snapshot_maps(rows: &[TaskRow]) -> (HashMap<String, TaskRow>, HashMap<String, CommentRow>) {
    let mut tasks = HashMap::new();
    let mut comments = HashMap::new();
    for row in rows {
        tasks.insert(row.id.clone(), row.clone());
        for comment in &row.comments {
            comments.insert(comment.id.clone(), comment.clone());
        }
    }
    (tasks, comments)
}

#[async_trait]
impl ChangeFeed for HttpBackend {
    async fn subscribe(&self, workspace_id: &str) -> Result<mpsc::Receiver<ChangeEvent>> {
        let (tx, rx) = mpsc::channel(64);

        // Prime the baseline so the subscriber is not flooded with inserts
        // for rows it already has from the initial fetch.
        let initial = self.fetch_tasks(workspace_id).await?;
        let (mut prev_tasks, mut prev_comments) = snapshot_maps(&initial);

        let backend = HttpBackend {
            config: self.config.clone(),
            http: self.http.clone(),
            session: Mutex::new(self.session.lock().unwrap().clone()),
        };
        let workspace_id = workspace_id.to_string();
        let interval = std::time::Duration::from_secs(self.config.sync_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // first tick fires immediately; baseline is already primed
            loop {
                ticker.tick().await;
                let rows = match backend.fetch_tasks(&workspace_id).await {
                    Ok(rows) => rows,
                    Err(error) => {
                        warn!(error = %error, "change-feed sync failed");
                        continue;
                    }
                };
                let events = diff_snapshot(&prev_tasks, &prev_comments, &rows);
                (prev_tasks, prev_comments) = snapshot_maps(&rows);
                for event in events {
                    if tx.send(event).await.is_err() {
                        debug!("change-feed subscriber dropped; stopping sync");
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::ChangeOp;
    use crate::types::{TaskPriority, TaskStatus};
    use chrono::{TimeZone, Utc};

    fn task_row(id: &str, title: &str, comments: Vec<CommentRow>) -> TaskRow {
        TaskRow {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            due_date: Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
            priority: TaskPriority::Low,
            status: TaskStatus::NotStarted,
            department_id: "d1".into(),
            assigned_staff_id: None,
            created_by: None,
            workspace_id: "w1".into(),
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            comments,
            attachments: vec![],
        }
    }

    fn comment_row(id: &str, task_id: &str, content: &str) -> CommentRow {
        CommentRow {
            id: id.into(),
            task_id: task_id.into(),
            author_id: "u1".into(),
            content: content.into(),
            created_at: Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn diff_reports_new_task_as_insert() {
        let events = diff_snapshot(&HashMap::new(), &HashMap::new(), &[task_row("t1", "a", vec![])]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, ChangeOp::Insert);
        assert_eq!(events[0].table, ChangeTable::Tasks);
    }

    #[test]
    fn diff_reports_changed_title_as_update() {
        let (prev_tasks, prev_comments) = snapshot_maps(&[task_row("t1", "old", vec![])]);
        let events = diff_snapshot(&prev_tasks, &prev_comments, &[task_row("t1", "new", vec![])]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, ChangeOp::Update);
    }

    #[test]
    fn diff_reports_vanished_rows_as_deletes_with_id_only() {
        let (prev_tasks, prev_comments) =
            snapshot_maps(&[task_row("t1", "a", vec![comment_row("c1", "t1", "hi")])]);
        let events = diff_snapshot(&prev_tasks, &prev_comments, &[]);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.op == ChangeOp::Delete));
        assert!(events.iter().any(|e| e.old["id"] == "t1"));
        assert!(events.iter().any(|e| e.old["id"] == "c1"));
    }

    #[test]
    fn diff_reports_new_comment_without_touching_unchanged_task() {
        let (prev_tasks, prev_comments) = snapshot_maps(&[task_row("t1", "a", vec![])]);
        let current = [task_row("t1", "a", vec![comment_row("c1", "t1", "hi")])];
        let events = diff_snapshot(&prev_tasks, &prev_comments, &current);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].table, ChangeTable::Comments);
        assert_eq!(events[0].op, ChangeOp::Insert);
    }

    #[test]
    fn diff_reports_comment_content_change_as_update() {
        let (prev_tasks, prev_comments) =
            snapshot_maps(&[task_row("t1", "a", vec![comment_row("c1", "t1", "old")])]);
        let current = [task_row("t1", "a", vec![comment_row("c1", "t1", "new")])];
        let events = diff_snapshot(&prev_tasks, &prev_comments, &current);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].table, ChangeTable::Comments);
        assert_eq!(events[0].op, ChangeOp::Update);
    }

    #[test]
    fn public_url_is_derived_from_base_url() {
        let backend = HttpBackend::new(BackendConfig {
            base_url: "https://proj.backend.example.com".into(),
            api_key: "anon".into(),
            attachments_bucket: "attachments".into(),
            sync_interval_secs: 15,
        })
        .unwrap();
        assert_eq!(
            backend.public_url("attachments", "w1/t1/file.png"),
            "https://proj.backend.example.com/storage/v1/object/public/attachments/w1/t1/file.png"
        );
    }
}
