//! In-memory snapshot of one workspace's departments, staff, and tasks.
//!
//! All mutation of the snapshot goes through the transition methods below so
//! the cache can be exercised without a backend. Transitions return whether
//! they changed anything; callers decide what a no-op means.

use crate::rows::TaskRowPatch;
use crate::types::{AppUser, Comment, Department, Role, Staff, Task, TaskStatus, Workspace};

/// Cached view-state for the signed-in user's workspace.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceState {
    pub workspace: Option<Workspace>,
    pub departments: Vec<Department>,
    pub staff: Vec<Staff>,
    /// Newest-first.
    pub tasks: Vec<Task>,
}

impl WorkspaceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything, as on sign-out or session loss.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Install a freshly fetched snapshot. Staff-role viewers only ever see
    /// tasks assigned to them, even when the backend returned the whole
    /// workspace.
    pub fn install(
        &mut self,
        viewer: &AppUser,
        departments: Vec<Department>,
        staff: Vec<Staff>,
        mut tasks: Vec<Task>,
    ) {
        if viewer.role == Role::Staff {
            tasks.retain(|t| t.assigned_staff_id.as_deref() == Some(viewer.id.as_str()));
        }
        self.departments = departments;
        self.staff = staff;
        self.tasks = tasks;
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    // ---- task transitions ----

    /// Prepend a task so the list stays newest-first. Refuses duplicates.
    pub fn insert_task_front(&mut self, task: Task) -> bool {
        if self.tasks.iter().any(|t| t.id == task.id) {
            return false;
        }
        self.tasks.insert(0, task);
        true
    }

    pub fn remove_task(&mut self, task_id: &str) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != task_id);
        self.tasks.len() != before
    }

    pub fn set_task_status(&mut self, task_id: &str, status: TaskStatus) -> bool {
        match self.task_mut(task_id) {
            Some(task) => {
                task.status = status;
                true
            }
            None => false,
        }
    }

    /// Merge a sparse patch over an existing task. Fields the patch does not
    /// carry keep their local value; comments and attachments are never
    /// replaced by a patch.
    pub fn patch_task(&mut self, task_id: &str, patch: &TaskRowPatch) -> bool {
        let Some(task) = self.task_mut(task_id) else {
            return false;
        };
        if let Some(title) = &patch.title {
            task.title = title.clone();
        }
        if let Some(description) = &patch.description {
            task.description = description.clone();
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = due_date;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(assigned) = &patch.assigned_staff_id {
            task.assigned_staff_id = Some(assigned.clone());
        }
        if let Some(department_id) = &patch.department_id {
            task.department_id = department_id.clone();
        }
        true
    }

    // ---- comment transitions ----

    /// Append a comment to its owning task. Returns false when the task is
    /// unknown or the comment id is already present (the dedup that makes a
    /// change event idempotent against the optimistic write-through).
    pub fn append_comment(&mut self, comment: Comment) -> bool {
        let Some(task) = self.task_mut(&comment.task_id) else {
            return false;
        };
        if task.comments.iter().any(|c| c.id == comment.id) {
            return false;
        }
        task.comments.push(comment);
        true
    }

    /// Replace a comment's content, located by comment id across all tasks
    /// (the declared task id is a hint, not a requirement).
    pub fn set_comment_content(&mut self, comment_id: &str, content: &str) -> bool {
        for task in &mut self.tasks {
            if let Some(comment) = task.comments.iter_mut().find(|c| c.id == comment_id) {
                comment.content = content.to_string();
                return true;
            }
        }
        false
    }

    /// Remove a comment by id from whichever task currently holds it.
    pub fn remove_comment(&mut self, comment_id: &str) -> bool {
        for task in &mut self.tasks {
            let before = task.comments.len();
            task.comments.retain(|c| c.id != comment_id);
            if task.comments.len() != before {
                return true;
            }
        }
        false
    }

    // ---- department transitions ----

    pub fn insert_department(&mut self, department: Department) {
        self.departments.push(department);
    }

    /// Remove a department and every staff member attached to it.
    pub fn remove_department(&mut self, department_id: &str) -> bool {
        let before = self.departments.len();
        self.departments.retain(|d| d.id != department_id);
        let removed = self.departments.len() != before;
        if removed {
            self.staff.retain(|s| s.department_id != department_id);
        }
        removed
    }

    // ---- staff transitions ----

    pub fn insert_staff(&mut self, member: Staff) {
        self.staff.push(member);
    }

    pub fn remove_staff(&mut self, staff_id: &str) -> bool {
        let before = self.staff.len();
        self.staff.retain(|s| s.id != staff_id);
        self.staff.len() != before
    }

    pub fn patch_staff(&mut self, staff_id: &str, name: Option<&str>, designation: Option<&str>) {
        if let Some(member) = self.staff.iter_mut().find(|s| s.id == staff_id) {
            if let Some(name) = name {
                member.name = name.to_string();
            }
            if let Some(designation) = designation {
                member.designation = Some(designation.to_string());
            }
        }
    }

    pub fn rename_workspace(&mut self, name: &str) {
        if let Some(ws) = &mut self.workspace {
            ws.name = name.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskPriority;
    use chrono::{TimeZone, Utc};

    fn sample_task(id: &str, assigned: Option<&str>) -> Task {
        Task {
            id: id.to_string(),
            title: format!("task {id}"),
            description: "desc".into(),
            due_date: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            priority: TaskPriority::Medium,
            status: TaskStatus::NotStarted,
            department_id: "d1".into(),
            assigned_staff_id: assigned.map(str::to_string),
            created_by: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            comments: vec![],
            attachments: vec![],
        }
    }

    fn sample_comment(id: &str, task_id: &str) -> Comment {
        Comment {
            id: id.to_string(),
            task_id: task_id.to_string(),
            author_id: "u1".into(),
            content: "hello".into(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
        }
    }

    fn admin() -> AppUser {
        AppUser {
            id: "admin".into(),
            email: "a@example.com".into(),
            name: "Admin".into(),
            role: Role::Admin,
            department_id: Some("d1".into()),
            workspace_id: "w1".into(),
            created_at: None,
        }
    }

    #[test]
    fn install_filters_tasks_for_staff_viewers() {
        let mut state = WorkspaceState::new();
        let viewer = AppUser {
            id: "u1".into(),
            role: Role::Staff,
            ..admin()
        };
        state.install(
            &viewer,
            vec![],
            vec![],
            vec![
                sample_task("t1", Some("u1")),
                sample_task("t2", Some("u2")),
                sample_task("t3", None),
            ],
        );
        assert_eq!(state.tasks.len(), 1);
        assert_eq!(state.tasks[0].id, "t1");
    }

    #[test]
    fn install_keeps_all_tasks_for_admins() {
        let mut state = WorkspaceState::new();
        state.install(
            &admin(),
            vec![],
            vec![],
            vec![sample_task("t1", Some("u1")), sample_task("t2", None)],
        );
        assert_eq!(state.tasks.len(), 2);
    }

    #[test]
    fn insert_task_front_keeps_newest_first_and_dedups() {
        let mut state = WorkspaceState::new();
        assert!(state.insert_task_front(sample_task("t1", None)));
        assert!(state.insert_task_front(sample_task("t2", None)));
        assert_eq!(state.tasks[0].id, "t2");
        assert!(!state.insert_task_front(sample_task("t2", None)));
        assert_eq!(state.tasks.len(), 2);
    }

    #[test]
    fn append_comment_dedups_by_id() {
        let mut state = WorkspaceState::new();
        state.insert_task_front(sample_task("t1", None));
        assert!(state.append_comment(sample_comment("c1", "t1")));
        assert!(!state.append_comment(sample_comment("c1", "t1")));
        assert_eq!(state.task("t1").unwrap().comments.len(), 1);
    }

    #[test]
    fn remove_comment_for_unknown_id_is_a_noop() {
        let mut state = WorkspaceState::new();
        state.insert_task_front(sample_task("t1", None));
        state.append_comment(sample_comment("c1", "t1"));
        assert!(!state.remove_comment("missing"));
        assert_eq!(state.task("t1").unwrap().comments.len(), 1);
    }

    #[test]
    fn patch_task_retains_unpatched_fields() {
        let mut state = WorkspaceState::new();
        let mut task = sample_task("t1", Some("u1"));
        task.comments.push(sample_comment("c1", "t1"));
        state.insert_task_front(task);

        let patch = TaskRowPatch {
            id: Some("t1".into()),
            title: Some("renamed".into()),
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        };
        assert!(state.patch_task("t1", &patch));

        let task = state.task("t1").unwrap();
        assert_eq!(task.title, "renamed");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.description, "desc");
        assert_eq!(task.assigned_staff_id.as_deref(), Some("u1"));
        assert_eq!(task.comments.len(), 1);
    }

    #[test]
    fn remove_department_drops_its_staff() {
        let mut state = WorkspaceState::new();
        state.insert_department(Department {
            id: "d2".into(),
            name: "Design".into(),
        });
        state.insert_staff(Staff {
            id: "u5".into(),
            name: "Des".into(),
            email: "d@example.com".into(),
            role: Role::Staff,
            department_id: "d2".into(),
            avatar_url: None,
            designation: None,
        });
        assert!(state.remove_department("d2"));
        assert!(state.staff.is_empty());
    }
}
