//! Presence Tracker (C6) — `spec.md` §4.6.
//!
//! Per-project `(userId, sessionId) -> PresenceEntry` table. A background
//! sweep removes entries that have gone quiet for longer than the GC
//! horizon (`SPEC_FULL.md` §9, Open Question: 5 minutes past "inactive").

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use oc_core::model::{PresenceEntry, PresenceStatus};

use crate::broadcaster::BroadcasterRegistry;

const ACTIVE_THRESHOLD: Duration = Duration::from_secs(30);
const VIEWING_THRESHOLD: Duration = Duration::from_secs(120);
const GC_HORIZON: Duration = Duration::from_secs(5 * 60);
const GC_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn derive_status(last_heartbeat_at: Instant, now: Instant) -> PresenceStatus {
    let age = now.saturating_duration_since(last_heartbeat_at);
    if age < ACTIVE_THRESHOLD {
        PresenceStatus::Active
    } else if age < VIEWING_THRESHOLD {
        PresenceStatus::Viewing
    } else {
        PresenceStatus::Inactive
    }
}

#[derive(Default)]
struct Inner {
    // project_id -> (user_id, session_id) -> entry
    by_project: HashMap<String, HashMap<(String, String), PresenceEntry>>,
}

/// Singleton owned by the composition root, guarded by one mutex around
/// its internal map (`spec.md` §9).
#[derive(Default)]
pub struct PresenceTracker {
    inner: Mutex<Inner>,
}

impl PresenceTracker {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    /// Record a heartbeat for `(user_id, session_id)` within `project_id`
    /// and broadcast the updated presence list for that project.
    pub fn heartbeat(
        &self,
        project_id: &str,
        user_id: &str,
        session_id: &str,
        broadcaster: &BroadcasterRegistry,
    ) {
        let now = Instant::now();
        {
            let mut inner = self.inner.lock().unwrap();
            let project = inner.by_project.entry(project_id.to_string()).or_default();
            let key = (user_id.to_string(), session_id.to_string());
            let entry = project.entry(key).or_insert_with(|| PresenceEntry {
                project_id: project_id.to_string(),
                user_id: user_id.to_string(),
                session_id: Some(session_id.to_string()),
                last_heartbeat_at: None,
                derived_status: PresenceStatus::Active,
            });
            entry.last_heartbeat_at = Some(now);
            entry.derived_status = PresenceStatus::Active;
        }
        broadcaster.notify(&format!("presence:{project_id}"));
    }

    /// Remove a presence entry immediately, e.g. on an explicit
    /// disconnect, rather than waiting for the GC sweep.
    pub fn leave(
        &self,
        project_id: &str,
        user_id: &str,
        session_id: &str,
        broadcaster: &BroadcasterRegistry,
    ) {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            match inner.by_project.get_mut(project_id) {
                Some(project) => project
                    .remove(&(user_id.to_string(), session_id.to_string()))
                    .is_some(),
                None => false,
            }
        };
        if removed {
            broadcaster.notify(&format!("presence:{project_id}"));
        }
    }

    /// Current presence list for `project_id`, with status derived from
    /// how long ago each entry's last heartbeat was observed.
    pub fn list(&self, project_id: &str) -> Vec<PresenceEntry> {
        let now = Instant::now();
        let inner = self.inner.lock().unwrap();
        match inner.by_project.get(project_id) {
            Some(project) => project
                .values()
                .map(|entry| {
                    let mut entry = entry.clone();
                    if let Some(last) = entry.last_heartbeat_at {
                        entry.derived_status = derive_status(last, now);
                    }
                    entry
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Drop entries inactive for longer than the GC horizon. Returns the
    /// set of project ids that lost at least one entry so the caller can
    /// broadcast the updated lists.
    fn sweep(&self) -> Vec<String> {
        let now = Instant::now();
        let mut touched = Vec::new();
        let mut inner = self.inner.lock().unwrap();
        inner.by_project.retain(|project_id, entries| {
            let before = entries.len();
            entries.retain(|_, entry| match entry.last_heartbeat_at {
                Some(last) => now.saturating_duration_since(last) < GC_HORIZON,
                None => true,
            });
            if entries.len() != before {
                touched.push(project_id.clone());
            }
            !entries.is_empty()
        });
        touched
    }

    /// Spawn the background GC sweep task. Runs until the returned handle
    /// is dropped/aborted.
    pub fn spawn_gc(
        self: &std::sync::Arc<Self>,
        broadcaster: std::sync::Arc<BroadcasterRegistry>,
    ) -> tokio::task::JoinHandle<()> {
        let tracker = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(GC_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                for project_id in tracker.sweep() {
                    broadcaster.notify(&format!("presence:{project_id}"));
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_then_list_shows_active() {
        let tracker = PresenceTracker::new();
        let broadcaster = BroadcasterRegistry::new();
        tracker.heartbeat("p1", "u1", "s1", &broadcaster);
        let entries = tracker.list("p1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].derived_status, PresenceStatus::Active);
    }

    #[test]
    fn leave_removes_entry() {
        let tracker = PresenceTracker::new();
        let broadcaster = BroadcasterRegistry::new();
        tracker.heartbeat("p1", "u1", "s1", &broadcaster);
        tracker.leave("p1", "u1", "s1", &broadcaster);
        assert!(tracker.list("p1").is_empty());
    }

    #[test]
    fn list_unknown_project_is_empty() {
        let tracker = PresenceTracker::new();
        assert!(tracker.list("nope").is_empty());
    }

    #[test]
    fn derive_status_thresholds() {
        let now = Instant::now();
        assert_eq!(derive_status(now, now), PresenceStatus::Active);
        assert_eq!(
            derive_status(now - Duration::from_secs(60), now),
            PresenceStatus::Viewing
        );
        assert_eq!(
            derive_status(now - Duration::from_secs(200), now),
            PresenceStatus::Inactive
        );
    }

    #[test]
    fn sweep_drops_entries_past_gc_horizon() {
        let tracker = PresenceTracker::new();
        {
            let mut inner = tracker.inner.lock().unwrap();
            let project = inner.by_project.entry("p1".to_string()).or_default();
            project.insert(
                ("u1".to_string(), "s1".to_string()),
                PresenceEntry {
                    project_id: "p1".to_string(),
                    user_id: "u1".to_string(),
                    session_id: Some("s1".to_string()),
                    last_heartbeat_at: Some(Instant::now() - Duration::from_secs(10 * 60)),
                    derived_status: PresenceStatus::Inactive,
                },
            );
        }
        let touched = tracker.sweep();
        assert_eq!(touched, vec!["p1".to_string()]);
        assert!(tracker.list("p1").is_empty());
    }
}
