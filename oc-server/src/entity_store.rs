//! The relational store (`spec.md` §1) is an external collaborator,
//! treated as a typed entity store exposing the models in §3. This module
//! defines that contract as a trait and ships an in-memory implementation
//! so the server runs standalone for this exercise — analogous to the
//! teacher's trait-plus-mock-and-real-impl split for `ContainerDriver`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use oc_core::model::{Execution, Project, Task, TaskStatus, TerminalSession};

#[derive(Debug, Clone, Default)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: usize,
}

/// Async CRUD surface over `Project`, `TerminalSession`, `Task`,
/// `Execution`. The entity store owns its own transaction semantics;
/// callers perform a single atomic update per logical state change
/// (`spec.md` §5).
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_project(&self, id: &str) -> Option<Project>;
    async fn get_session(&self, id: &str) -> Option<TerminalSession>;
    async fn put_session(&self, session: TerminalSession);
    async fn list_project_sessions(&self, project_id: &str) -> Vec<TerminalSession>;

    async fn list_tasks(&self, status: Option<TaskStatus>, limit: usize, offset: usize) -> TaskPage;
    async fn get_task(&self, id: &str) -> Option<Task>;
    async fn put_task(&self, task: Task);
    async fn latest_execution(&self, task_id: &str) -> Option<Execution>;
    async fn put_execution(&self, execution: Execution);
}

#[derive(Default)]
struct Inner {
    projects: HashMap<String, Project>,
    sessions: HashMap<String, TerminalSession>,
    tasks: HashMap<String, Task>,
    executions: HashMap<String, Execution>,
}

/// `RwLock`-guarded `HashMap`-backed store, matching the teacher's general
/// "singleton guarded by one mutex around its own internal map" pattern
/// for process-wide mutable state (`spec.md` §9).
#[derive(Default)]
pub struct InMemoryEntityStore {
    inner: RwLock<Inner>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a project directly — used by tests and by the composition
    /// root when bootstrapping a demo environment.
    pub fn seed_project(&self, project: Project) {
        self.inner.write().unwrap().projects.insert(project.id.clone(), project);
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get_project(&self, id: &str) -> Option<Project> {
        self.inner.read().unwrap().projects.get(id).cloned()
    }

    async fn get_session(&self, id: &str) -> Option<TerminalSession> {
        self.inner.read().unwrap().sessions.get(id).cloned()
    }

    async fn put_session(&self, session: TerminalSession) {
        self.inner.write().unwrap().sessions.insert(session.id.clone(), session);
    }

    async fn list_project_sessions(&self, project_id: &str) -> Vec<TerminalSession> {
        self.inner
            .read()
            .unwrap()
            .sessions
            .values()
            .filter(|s| s.project_id.as_deref() == Some(project_id))
            .cloned()
            .collect()
    }

    async fn list_tasks(&self, status: Option<TaskStatus>, limit: usize, offset: usize) -> TaskPage {
        let inner = self.inner.read().unwrap();
        let mut matching: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len();
        let page = matching.into_iter().skip(offset).take(limit).collect();
        TaskPage { tasks: page, total }
    }

    async fn get_task(&self, id: &str) -> Option<Task> {
        self.inner.read().unwrap().tasks.get(id).cloned()
    }

    async fn put_task(&self, task: Task) {
        self.inner.write().unwrap().tasks.insert(task.id.clone(), task);
    }

    async fn latest_execution(&self, task_id: &str) -> Option<Execution> {
        self.inner
            .read()
            .unwrap()
            .executions
            .values()
            .filter(|e| e.task_id == task_id)
            .last()
            .cloned()
    }

    async fn put_execution(&self, execution: Execution) {
        self.inner.write().unwrap().executions.insert(execution.id.clone(), execution);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_core::model::SessionStatus;

    fn sample_session(id: &str, project_id: &str) -> TerminalSession {
        TerminalSession {
            id: id.to_string(),
            name: "s".to_string(),
            owner_user_id: "u1".to_string(),
            project_id: Some(project_id.to_string()),
            parent_id: None,
            relation_type: None,
            status: SessionStatus::Pending,
            container_name: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_then_get_session() {
        let store = InMemoryEntityStore::new();
        store.put_session(sample_session("s1", "p1")).await;
        let got = store.get_session("s1").await.unwrap();
        assert_eq!(got.id, "s1");
    }

    #[tokio::test]
    async fn list_project_sessions_filters_by_project() {
        let store = InMemoryEntityStore::new();
        store.put_session(sample_session("s1", "p1")).await;
        store.put_session(sample_session("s2", "p2")).await;
        let sessions = store.list_project_sessions("p1").await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "s1");
    }

    #[tokio::test]
    async fn list_tasks_paginates_and_filters() {
        let store = InMemoryEntityStore::new();
        for i in 0..5 {
            store
                .put_task(Task {
                    id: format!("t{i}"),
                    body: "x".into(),
                    agent_id: None,
                    repository: None,
                    status: TaskStatus::Todo,
                    created_at: chrono::Utc::now(),
                    updated_at: chrono::Utc::now(),
                })
                .await;
        }
        let page = store.list_tasks(Some(TaskStatus::Todo), 2, 1).await;
        assert_eq!(page.total, 5);
        assert_eq!(page.tasks.len(), 2);
    }
}
