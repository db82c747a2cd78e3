//! Read-state tracking and notification badges.
//!
//! Two locally persisted timestamps drive every badge: a per-task "last read"
//! map and the moment the task-list view was last opened or closed. Badges
//! are suppressed entirely while the list view is open. None of this state is
//! synced across devices or consulted by the backend.

use crate::store::LocalStore;
use crate::types::Task;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

fn last_closed_key(user_id: &str) -> String {
    format!("last_task_list_closed_at_{user_id}")
}

fn task_read_key(user_id: &str) -> String {
    format!("task_read_status_{user_id}")
}

fn overdue_flag_key(user_id: &str) -> String {
    format!("overdue_alert_shown_{user_id}")
}

/// Per-user notification state, loaded once per session.
pub struct ReadState {
    user_id: String,
    store: Arc<dyn LocalStore>,
    last_list_closed_at: DateTime<Utc>,
    list_open: bool,
    /// Written by [`ReadState::mark_task_read`]; the unread computation only
    /// consults `last_list_closed_at`.
    task_read: HashMap<String, DateTime<Utc>>,
}

impl ReadState {
    /// Load the read-state for `user_id`, starting a new session.
    ///
    /// The first time a user is seen on a device the last-closed timestamp
    /// defaults to `now`, not epoch, so pre-existing history does not arrive
    /// as a flood of unread badges. The overdue-alert marker is cleared so it
    /// can fire once in the new session.
    pub fn load(store: Arc<dyn LocalStore>, user_id: &str, now: DateTime<Utc>) -> Self {
        let last_list_closed_at = store
            .get(&last_closed_key(user_id))
            .and_then(|raw| raw.parse::<DateTime<Utc>>().ok())
            .unwrap_or_else(|| {
                store.set(&last_closed_key(user_id), &now.to_rfc3339());
                now
            });

        let task_read = store
            .get(&task_read_key(user_id))
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        store.remove(&overdue_flag_key(user_id));

        Self {
            user_id: user_id.to_string(),
            store,
            last_list_closed_at,
            list_open: false,
            task_read,
        }
    }

    pub fn last_list_closed_at(&self) -> DateTime<Utc> {
        self.last_list_closed_at
    }

    pub fn is_list_open(&self) -> bool {
        self.list_open
    }

    /// Record the task-list view opening or closing. Both transitions stamp
    /// and persist the timestamp: badges clear on open, and "new since close"
    /// is measured from the close.
    pub fn set_list_open(&mut self, open: bool, now: DateTime<Utc>) {
        self.list_open = open;
        self.last_list_closed_at = now;
        self.store
            .set(&last_closed_key(&self.user_id), &now.to_rfc3339());
    }

    /// Record that a task was viewed individually.
    pub fn mark_task_read(&mut self, task_id: &str, now: DateTime<Utc>) {
        self.task_read.insert(task_id.to_string(), now);
        match serde_json::to_string(&self.task_read) {
            Ok(json) => self.store.set(&task_read_key(&self.user_id), &json),
            Err(err) => debug!(error = %err, "could not serialize task read map"),
        }
    }

    /// Unread-comment badge for a task: comments by other authors created
    /// strictly after the list was last open. Always 0 while the list view is
    /// open.
    pub fn unread_count(&self, task: &Task) -> usize {
        if self.list_open {
            return 0;
        }
        task.comments
            .iter()
            .filter(|c| c.author_id != self.user_id && c.created_at > self.last_list_closed_at)
            .count()
    }

    /// "New task" badge: only for the assignee, only while the list is
    /// closed, only for tasks created strictly after the last open/close.
    pub fn is_task_new(&self, task: &Task) -> bool {
        if task.assigned_staff_id.as_deref() != Some(self.user_id.as_str()) {
            return false;
        }
        if self.list_open {
            return false;
        }
        task.created_at > self.last_list_closed_at
    }

    /// Tasks that warrant the one-shot overdue alert: overdue, not completed,
    /// assigned to this user. Returns them at most once per session; later
    /// calls return `None` even if more tasks become overdue.
    pub fn take_overdue_alert(&mut self, tasks: &[Task], now: DateTime<Utc>) -> Option<Vec<Task>> {
        let overdue: Vec<Task> = tasks
            .iter()
            .filter(|t| {
                t.is_overdue(now) && t.assigned_staff_id.as_deref() == Some(self.user_id.as_str())
            })
            .cloned()
            .collect();
        if overdue.is_empty() {
            return None;
        }
        let key = overdue_flag_key(&self.user_id);
        if self.store.get(&key).is_some() {
            return None;
        }
        self.store.set(&key, "true");
        Some(overdue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Comment, TaskPriority, TaskStatus};
    use chrono::{TimeZone, Utc};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    fn task_with_comments(assigned: Option<&str>, comments: Vec<Comment>) -> Task {
        Task {
            id: "t1".into(),
            title: "t".into(),
            description: String::new(),
            due_date: at(30, 0),
            priority: TaskPriority::Low,
            status: TaskStatus::NotStarted,
            department_id: "d1".into(),
            assigned_staff_id: assigned.map(str::to_string),
            created_by: None,
            created_at: at(1, 0),
            comments,
            attachments: vec![],
        }
    }

    fn comment(id: &str, author: &str, created: DateTime<Utc>) -> Comment {
        Comment {
            id: id.into(),
            task_id: "t1".into(),
            author_id: author.into(),
            content: "c".into(),
            created_at: created,
        }
    }

    #[test]
    fn first_sight_defaults_last_closed_to_now_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let now = at(10, 12);
        let read = ReadState::load(store.clone(), "u1", now);
        assert_eq!(read.last_list_closed_at(), now);
        assert!(store.get("last_task_list_closed_at_u1").is_some());
    }

    #[test]
    fn unread_counts_only_foreign_comments_after_last_closed() {
        let store = Arc::new(MemoryStore::new());
        let mut read = ReadState::load(store, "u1", at(10, 0));
        read.set_list_open(true, at(10, 1));
        read.set_list_open(false, at(10, 2));

        let task = task_with_comments(
            Some("u1"),
            vec![
                comment("c1", "u2", at(10, 3)), // foreign, after close
                comment("c2", "u1", at(10, 4)), // own comment
                comment("c3", "u2", at(9, 0)),  // foreign, before close
            ],
        );
        assert_eq!(read.unread_count(&task), 1);
    }

    #[test]
    fn unread_is_zero_while_list_is_open() {
        let store = Arc::new(MemoryStore::new());
        let mut read = ReadState::load(store, "u1", at(1, 0));
        let task = task_with_comments(Some("u1"), vec![comment("c1", "u2", at(2, 0))]);
        assert_eq!(read.unread_count(&task), 1);
        read.set_list_open(true, at(3, 0));
        assert_eq!(read.unread_count(&task), 0);
    }

    #[test]
    fn reopening_clears_previously_unread_comments() {
        let store = Arc::new(MemoryStore::new());
        let mut read = ReadState::load(store, "u1", at(1, 0));
        let task = task_with_comments(Some("u1"), vec![comment("c1", "u2", at(2, 0))]);
        assert_eq!(read.unread_count(&task), 1);

        read.set_list_open(true, at(3, 0));
        read.set_list_open(false, at(3, 1));
        assert_eq!(read.unread_count(&task), 0);
    }

    #[test]
    fn task_is_new_only_for_assignee_with_list_closed() {
        let store = Arc::new(MemoryStore::new());
        let mut read = ReadState::load(store, "u1", at(1, 0));

        let mut task = task_with_comments(Some("u1"), vec![]);
        task.created_at = at(2, 0);
        assert!(read.is_task_new(&task));

        read.set_list_open(true, at(3, 0));
        assert!(!read.is_task_new(&task));
        read.set_list_open(false, at(3, 1));
        assert!(!read.is_task_new(&task)); // created before the latest close

        let mut foreign = task_with_comments(Some("u2"), vec![]);
        foreign.created_at = at(4, 0);
        assert!(!read.is_task_new(&foreign));
    }

    #[test]
    fn mark_task_read_persists_but_does_not_affect_unread() {
        let store = Arc::new(MemoryStore::new());
        let mut read = ReadState::load(store.clone(), "u1", at(1, 0));
        let task = task_with_comments(Some("u1"), vec![comment("c1", "u2", at(2, 0))]);

        read.mark_task_read("t1", at(2, 3));
        assert!(store.get("task_read_status_u1").unwrap().contains("t1"));
        assert_eq!(read.unread_count(&task), 1);
    }

    #[test]
    fn overdue_alert_fires_once_per_session() {
        let store = Arc::new(MemoryStore::new());
        let mut read = ReadState::load(store.clone(), "u1", at(1, 0));

        let mut overdue = task_with_comments(Some("u1"), vec![]);
        overdue.due_date = at(2, 0);
        let tasks = vec![overdue];
        let now = at(5, 0);

        let first = read.take_overdue_alert(&tasks, now);
        assert_eq!(first.map(|t| t.len()), Some(1));
        assert!(read.take_overdue_alert(&tasks, now).is_none());

        // A new session clears the marker and the alert can fire again.
        let mut next = ReadState::load(store, "u1", at(6, 0));
        assert!(next.take_overdue_alert(&tasks, now).is_some());
    }

    #[test]
    fn overdue_alert_ignores_other_assignees_and_completed_tasks() {
        let store = Arc::new(MemoryStore::new());
        let mut read = ReadState::load(store, "u1", at(1, 0));

        let mut foreign = task_with_comments(Some("u2"), vec![]);
        foreign.due_date = at(2, 0);
        let mut done = task_with_comments(Some("u1"), vec![]);
        done.due_date = at(2, 0);
        done.status = TaskStatus::Completed;

        assert!(read.take_overdue_alert(&[foreign, done], at(5, 0)).is_none());
    }
}
