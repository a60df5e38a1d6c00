//! Session Service (C3) — `spec.md` §4.3.
//!
//! Reconciles a `TerminalSession`'s logical lifecycle against the physical
//! container the Container Driver (C1) sees, serialized per session id so
//! two concurrent `start` calls for the same session never race the
//! create/retry loop — the teacher's per-connection mutex pattern applied
//! at the session-id granularity instead of per-connection.

use std::collections::HashMap;
use std::sync::Arc;

use oc_core::driver::{ContainerDriver, Mount, RunSpec};
use oc_core::mount_planner::{self, MountPlannerConfig};
use oc_core::errors::DriverError;
use oc_core::model::{SessionStatus, TerminalSession};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::broadcaster::BroadcasterRegistry;
use crate::entity_store::EntityStore;
use crate::ingress::IngressHelper;

const MAX_LAYER_RETRIES: u32 = 5;
const LAYER_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SessionServiceError {
    #[error("session not found")]
    NotFound,
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    InvalidInput(#[from] oc_core::errors::InvalidInputError),
    #[error("container engine did not settle after {0} layer-lock retries")]
    RetriesExhausted(u32),
    #[error("container did not reach running state")]
    ContainerNotRunning,
}

/// Optional parameters for [`SessionService::start`] — mirrors the
/// `{reset?, workspaceSuffix?, gitBranch?}` options object `spec.md` §4.3
/// describes.
#[derive(Debug, Clone, Default)]
pub struct StartOptions<'a> {
    /// Force a restart even if the container is already running.
    pub reset: bool,
    /// Relative path under the workspace root to mount as `/workspace`,
    /// e.g. a cloned repository's directory.
    pub workspace_suffix: Option<&'a str>,
    /// Branch to best-effort `git checkout` inside `/workspace` once the
    /// container is up.
    pub git_branch: Option<&'a str>,
}

/// The composition root wires this against trait objects so the HTTP/WS
/// handlers do not need to be generic over the driver/store types.
pub type DynSessionService = SessionService<dyn ContainerDriver, dyn EntityStore>;

/// Per-session serialization: one `Mutex<()>` per session id, created
/// lazily. The outer map itself is short-locked only to fetch/create the
/// per-session entry (`spec.md` §5).
pub struct SessionService<D: ?Sized, S: ?Sized> {
    driver: Arc<D>,
    store: Arc<S>,
    mount_config: MountPlannerConfig,
    broadcaster: Arc<BroadcasterRegistry>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    network_name: String,
    ingress: Arc<dyn IngressHelper>,
}

impl<D, S> SessionService<D, S>
where
    D: ContainerDriver + ?Sized,
    S: EntityStore + ?Sized,
{
    pub fn new(
        driver: Arc<D>,
        store: Arc<S>,
        mount_config: MountPlannerConfig,
        broadcaster: Arc<BroadcasterRegistry>,
        network_name: impl Into<String>,
        ingress: Arc<dyn IngressHelper>,
    ) -> Self {
        Self {
            driver,
            store,
            mount_config,
            broadcaster,
            locks: Mutex::new(HashMap::new()),
            network_name: network_name.into(),
            ingress,
        }
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Start (or resume) the container backing `session_id`.
    ///
    /// Algorithm (`spec.md` §4.3):
    /// 1. Load the session; fail `NotFound` if missing or `stopped`.
    /// 2. Short-circuit if the session is already `running`/`starting`,
    ///    owned by `user_id`, and `reset` was not requested.
    /// 3. Probe the container by its derived name: running and not
    ///    resetting → no action; running or stopped and resetting →
    ///    `restart`; stopped and not resetting → `start`; missing →
    ///    build mounts/env (C2, threading `workspace_suffix`), ensure the
    ///    network, pull the image, then enter the create-retry loop.
    /// 4. Re-probe; fail `ContainerNotRunning` if the container still
    ///    isn't up.
    /// 5. If `git_branch` is supplied, best-effort checkout it in
    ///    `/workspace`.
    /// 6. Persist the new status and broadcast `sessions:<projectId>`.
    pub async fn start(
        &self,
        user_id: &str,
        session_id: &str,
        image: &str,
        options: StartOptions<'_>,
    ) -> Result<TerminalSession, SessionServiceError> {
        let session_lock = self.lock_for(session_id).await;
        let _guard = session_lock.lock().await;

        let mut session = self
            .store
            .get_session(session_id)
            .await
            .ok_or(SessionServiceError::NotFound)?;

        if session.status == SessionStatus::Stopped {
            return Err(SessionServiceError::NotFound);
        }

        let container_name = TerminalSession::derive_container_name(session_id);

        if !options.reset
            && matches!(session.status, SessionStatus::Starting | SessionStatus::Running)
            && session.owner_user_id == user_id
            && self.driver.is_running(&container_name).await? == Some(true)
        {
            return Ok(session);
        }

        match self.driver.is_running(&container_name).await? {
            Some(true) => {
                if options.reset {
                    self.driver.restart(&container_name).await?;
                }
            }
            Some(false) => {
                if options.reset {
                    self.driver.restart(&container_name).await?;
                } else {
                    self.driver.start(&container_name).await?;
                }
            }
            None => {
                self.driver.ensure_network(&self.network_name, false).await?;
                self.driver.pull(image).await?;
                self.create_with_retries(
                    &container_name,
                    image,
                    &session.owner_user_id,
                    options.workspace_suffix,
                )
                .await?;
            }
        }

        if self.driver.is_running(&container_name).await? != Some(true) {
            return Err(SessionServiceError::ContainerNotRunning);
        }

        if let Some(branch) = options.git_branch {
            let argv = vec![
                "git".to_string(),
                "-C".to_string(),
                "/workspace".to_string(),
                "checkout".to_string(),
                branch.to_string(),
            ];
            if let Err(e) = self.driver.exec(&container_name, &argv).await {
                warn!(container_name, branch, "best-effort branch checkout failed: {e}");
            }
        }

        session.status = SessionStatus::Running;
        session.container_name = Some(container_name);
        session.updated_at = chrono::Utc::now();

        self.store.put_session(session.clone()).await;
        if let Some(project_id) = &session.project_id {
            self.broadcaster.notify(&format!("sessions:{project_id}"));
        }

        Ok(session)
    }

    async fn create_with_retries(
        &self,
        container_name: &str,
        image: &str,
        owner_user_id: &str,
        workspace_suffix: Option<&str>,
    ) -> Result<(), SessionServiceError> {
        let plan = mount_planner::plan_mounts(&self.mount_config, owner_user_id, workspace_suffix)?;
        let spec = self.run_spec(container_name, image, &plan.mounts, plan.env, plan.entrypoint_args);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.driver.run(&spec).await {
                Ok(()) => return Ok(()),
                Err(DriverError::LayerLocked(msg)) => {
                    if attempt >= MAX_LAYER_RETRIES {
                        return Err(SessionServiceError::RetriesExhausted(MAX_LAYER_RETRIES));
                    }
                    warn!(container_name, attempt, "layer locked, retrying: {msg}");
                    sleep(LAYER_RETRY_DELAY).await;
                }
                Err(DriverError::NameConflict(_)) => {
                    info!(container_name, "name conflict, attempting recovery");
                    if self.driver.start(container_name).await.is_ok() {
                        return Ok(());
                    }
                    self.driver.safe_remove(container_name).await?;
                    // One more attempt after clearing the conflicting container.
                    return self.driver.run(&spec).await.map_err(Into::into);
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    fn run_spec(
        &self,
        name: &str,
        image: &str,
        mounts: &[Mount],
        env: HashMap<String, String>,
        args: Vec<String>,
    ) -> RunSpec {
        RunSpec {
            name: name.to_string(),
            image: image.to_string(),
            network: Some(self.network_name.clone()),
            env,
            mounts: mounts.to_vec(),
            extra_hosts: Vec::new(),
            args,
        }
    }

    /// Stop the container backing `session_id`. Best-effort ingress
    /// cleanup, then `safeRemove`; a missing container is not an error —
    /// it reports `removed: false`.
    pub async fn stop(&self, session_id: &str) -> Result<bool, SessionServiceError> {
        let session_lock = self.lock_for(session_id).await;
        let _guard = session_lock.lock().await;

        let mut session = self
            .store
            .get_session(session_id)
            .await
            .ok_or(SessionServiceError::NotFound)?;

        let container_name = TerminalSession::derive_container_name(session_id);
        let existed = self.driver.is_running(&container_name).await?.is_some();

        self.ingress.cleanup(session_id).await;
        self.driver.safe_remove(&container_name).await?;

        session.status = SessionStatus::Stopped;
        session.updated_at = chrono::Utc::now();
        self.store.put_session(session.clone()).await;
        if let Some(project_id) = &session.project_id {
            self.broadcaster.notify(&format!("sessions:{project_id}"));
        }

        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_store::InMemoryEntityStore;
    use async_trait::async_trait;
    use oc_core::driver::ExecOutput;
    use std::sync::Mutex as StdMutex;

    /// Local mock, independent of `oc_core`'s own test-only mock — this
    /// crate cannot reach into another crate's `#[cfg(test)]` module.
    #[derive(Default)]
    struct MockDriver {
        running: StdMutex<HashMap<String, bool>>,
        restart_count: StdMutex<u32>,
        exec_calls: StdMutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl ContainerDriver for MockDriver {
        async fn run(&self, spec: &RunSpec) -> Result<(), DriverError> {
            self.running.lock().unwrap().insert(spec.name.clone(), true);
            Ok(())
        }

        async fn start(&self, name: &str) -> Result<(), DriverError> {
            self.running.lock().unwrap().insert(name.to_string(), true);
            Ok(())
        }

        async fn restart(&self, name: &str) -> Result<(), DriverError> {
            *self.restart_count.lock().unwrap() += 1;
            self.running.lock().unwrap().insert(name.to_string(), true);
            Ok(())
        }

        async fn pull(&self, _image: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn is_running(&self, name: &str) -> Result<Option<bool>, DriverError> {
            Ok(self.running.lock().unwrap().get(name).copied())
        }

        async fn exec(&self, _name: &str, argv: &[String]) -> Result<ExecOutput, DriverError> {
            self.exec_calls.lock().unwrap().push(argv.to_vec());
            Ok(ExecOutput {
                stdout: Vec::new(),
                stderr: Vec::new(),
                exit_code: 0,
            })
        }

        async fn exec_attached(
            &self,
            _name: &str,
            _argv: &[String],
        ) -> Result<Box<dyn oc_core::driver::ExecStream>, DriverError> {
            let (local, _remote) = tokio::io::duplex(1024);
            Ok(Box::new(local))
        }

        async fn ensure_network(&self, _name: &str, _internal: bool) -> Result<(), DriverError> {
            Ok(())
        }

        async fn safe_remove(&self, name: &str) -> Result<(), DriverError> {
            self.running.lock().unwrap().remove(name);
            Ok(())
        }
    }

    fn sample_session(id: &str) -> TerminalSession {
        TerminalSession {
            id: id.to_string(),
            name: "s".to_string(),
            owner_user_id: "u1".to_string(),
            project_id: Some("p1".to_string()),
            parent_id: None,
            relation_type: None,
            status: SessionStatus::Pending,
            container_name: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    async fn service() -> SessionService<MockDriver, InMemoryEntityStore> {
        let driver = Arc::new(MockDriver::default());
        let store = Arc::new(InMemoryEntityStore::new());
        store.put_session(sample_session("s1")).await;
        let broadcaster = BroadcasterRegistry::new();
        SessionService::new(
            driver,
            store,
            MountPlannerConfig::testing(std::env::temp_dir()),
            broadcaster,
            "oc-net",
            Arc::new(crate::ingress::NoopIngressHelper),
        )
    }

    #[tokio::test]
    async fn start_creates_and_marks_running() {
        let svc = service().await;
        let session = svc
            .start("u1", "s1", "alpine", StartOptions::default())
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.container_name.as_deref(), Some("oc-sess-s1"));
    }

    #[tokio::test]
    async fn start_unknown_session_errors() {
        let svc = service().await;
        let err = svc
            .start("u1", "nope", "alpine", StartOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionServiceError::NotFound));
    }

    #[tokio::test]
    async fn start_is_idempotent_when_already_running() {
        let svc = service().await;
        svc.start("u1", "s1", "alpine", StartOptions::default()).await.unwrap();
        let second = svc
            .start("u1", "s1", "alpine", StartOptions::default())
            .await
            .unwrap();
        assert_eq!(second.status, SessionStatus::Running);
        assert_eq!(*svc.driver.restart_count.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn start_with_reset_restarts_even_when_already_running() {
        let svc = service().await;
        svc.start("u1", "s1", "alpine", StartOptions::default()).await.unwrap();
        let options = StartOptions {
            reset: true,
            ..Default::default()
        };
        svc.start("u1", "s1", "alpine", options).await.unwrap();
        assert_eq!(*svc.driver.restart_count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn start_rejects_stopped_session() {
        let svc = service().await;
        svc.start("u1", "s1", "alpine", StartOptions::default()).await.unwrap();
        svc.stop("s1").await.unwrap();
        let err = svc
            .start("u1", "s1", "alpine", StartOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionServiceError::NotFound));
    }

    #[tokio::test]
    async fn start_with_git_branch_checks_out_branch() {
        let svc = service().await;
        let options = StartOptions {
            git_branch: Some("feature/foo"),
            ..Default::default()
        };
        svc.start("u1", "s1", "alpine", options).await.unwrap();
        let calls = svc.driver.exec_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            vec!["git", "-C", "/workspace", "checkout", "feature/foo"]
        );
    }

    #[tokio::test]
    async fn start_threads_workspace_suffix_into_mount_plan() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("repos/owner/name")).unwrap();
        let driver = Arc::new(MockDriver::default());
        let store = Arc::new(InMemoryEntityStore::new());
        store.put_session(sample_session("s1")).await;
        let svc = SessionService::new(
            driver,
            store,
            MountPlannerConfig::testing(tmp.path()),
            BroadcasterRegistry::new(),
            "oc-net",
            Arc::new(crate::ingress::NoopIngressHelper),
        );
        let options = StartOptions {
            workspace_suffix: Some("repos/owner/name"),
            ..Default::default()
        };
        let session = svc.start("u1", "s1", "alpine", options).await.unwrap();
        assert_eq!(session.status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn stop_missing_container_reports_not_removed() {
        let svc = service().await;
        let removed = svc.stop("s1").await.unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn stop_after_start_reports_removed() {
        let svc = service().await;
        svc.start("u1", "s1", "alpine", StartOptions::default()).await.unwrap();
        let removed = svc.stop("s1").await.unwrap();
        assert!(removed);
    }
}
