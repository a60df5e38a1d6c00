//! The shared data model (`spec.md` §3): `Project`, `TerminalSession`,
//! `PresenceEntry`, `PortMapping`. These are plain serde-derived structs —
//! the entity store and the WebSocket JSON payloads in `oc-server` both
//! build on them directly.

use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type ProjectId = String;
pub type SessionId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub folder: String,
    pub owner_user_id: UserId,
    pub shared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_agent_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Project {
    /// Access rule from `spec.md` §3: owner always; any authenticated user
    /// if the project is shared.
    pub fn accessible_by(&self, user_id: &str) -> bool {
        self.shared || self.owner_user_id == user_id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Starting,
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Fork,
    Stack,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSession {
    pub id: SessionId,
    pub name: String,
    pub owner_user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_type: Option<RelationType>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl TerminalSession {
    /// `containerName` is derived deterministically from the session id —
    /// a stable mapping used by C3 and C7 without a store round-trip.
    pub fn derive_container_name(session_id: &str) -> String {
        format!("oc-sess-{session_id}")
    }

    pub fn is_accessible_by(&self, user_id: &str, project: Option<&Project>) -> bool {
        if self.owner_user_id == user_id {
            return true;
        }
        project.is_some_and(|p| p.shared)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Active,
    Viewing,
    Inactive,
}

/// Transient, in-process only entry (`spec.md` §3) — never persisted, does
/// not survive a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub project_id: ProjectId,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip)]
    pub last_heartbeat_at: Option<std::time::Instant>,
    pub derived_status: PresenceStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub session_id_hash: u64,
    pub host_port: u16,
    pub container_port: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Todo,
    Doing,
    Done,
    Canceled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    NeedsInput,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    pub status: TaskStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub task_id: String,
    pub status: ExecutionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_container_name_is_stable() {
        assert_eq!(
            TerminalSession::derive_container_name("abc123"),
            "oc-sess-abc123"
        );
        assert_eq!(
            TerminalSession::derive_container_name("abc123"),
            TerminalSession::derive_container_name("abc123")
        );
    }

    #[test]
    fn project_access_rule() {
        let owned = Project {
            id: "p1".into(),
            name: "n".into(),
            folder: "/f".into(),
            owner_user_id: "u1".into(),
            shared: false,
            default_agent_id: None,
            created_at: chrono::Utc::now(),
        };
        assert!(owned.accessible_by("u1"));
        assert!(!owned.accessible_by("u2"));

        let shared = Project { shared: true, ..owned };
        assert!(shared.accessible_by("u2"));
    }
}
