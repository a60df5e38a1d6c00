//! Container Driver (C1) — a thin typed interface to a container engine.
//!
//! Grounded on the teacher's `Docker` backend (`bollard`-based connect/
//! disconnect/exec flow), generalized from "attach one interactive shell"
//! into the narrower, pull/run/probe/exec/network operation set the
//! Session Service (C3) needs to reconcile a session's logical lifecycle
//! against a physical container.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::errors::DriverError;

/// A single mount point for a container, `source` on the host bound at
/// `target` inside the container.
#[derive(Debug, Clone)]
pub struct Mount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Input to [`ContainerDriver::run`] — `spec.md` §4.1.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub network: Option<String>,
    pub env: HashMap<String, String>,
    pub mounts: Vec<Mount>,
    pub extra_hosts: Vec<String>,
    pub args: Vec<String>,
}

/// Result of [`ContainerDriver::exec`].
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i64,
}

/// A bidirectional byte stream attached to a running exec session, used by
/// the exec-tunnel fallback (`spec.md` §4.7.1) to splice a TCP socket to a
/// container process's stdio.
pub trait ExecStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ExecStream for T {}

/// Thin typed interface to a container engine (C1).
///
/// Determinism contract: `run` is the only operation that may block
/// indefinitely (it waits on an image pull/extract); every other method
/// has bounded wall time or returns `Ok(None)`.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Create and start a container from `spec`. Returns once the engine
    /// has accepted the create+start.
    async fn run(&self, spec: &RunSpec) -> Result<(), DriverError>;

    /// `docker start <name>` on an existing, stopped container.
    async fn start(&self, name: &str) -> Result<(), DriverError>;

    /// `docker restart <name>`.
    async fn restart(&self, name: &str) -> Result<(), DriverError>;

    /// Idempotent image pull; engine-native deduplication is assumed for
    /// concurrent pulls of the same image, but callers must still
    /// serialize around `run` to avoid `LayerLocked` races (see C3).
    async fn pull(&self, image: &str) -> Result<(), DriverError>;

    /// `Ok(Some(true))` running, `Ok(Some(false))` exists but stopped,
    /// `Ok(None)` no such container.
    async fn is_running(&self, name: &str) -> Result<Option<bool>, DriverError>;

    /// Run `argv` inside the container and collect output + exit code.
    async fn exec(&self, name: &str, argv: &[String]) -> Result<ExecOutput, DriverError>;

    /// Start `argv` inside the container attached interactively (tty,
    /// stdin/stdout/stderr all wired) and return a bidirectional stream
    /// over its stdio. Used by the exec-tunnel fallback to pipe
    /// `exec -i <name> nc localhost <port>`.
    async fn exec_attached(
        &self,
        name: &str,
        argv: &[String],
    ) -> Result<Box<dyn ExecStream>, DriverError>;

    /// Idempotent network creation.
    async fn ensure_network(&self, name: &str, internal: bool) -> Result<(), DriverError>;

    /// Remove a container, swallowing "no such container"; reports
    /// everything else.
    async fn safe_remove(&self, name: &str) -> Result<(), DriverError>;
}

/// `bollard`-backed [`ContainerDriver`] talking to the local Docker daemon.
pub struct BollardDriver {
    client: bollard::Docker,
}

impl BollardDriver {
    pub fn connect_local() -> Result<Self, DriverError> {
        let client = bollard::Docker::connect_with_local_defaults()
            .map_err(|e| DriverError::Other(format!("failed to connect to docker daemon: {e}")))?;
        Ok(Self { client })
    }

    fn classify(context: &str, err: bollard::errors::Error) -> DriverError {
        use bollard::errors::Error::DockerResponseServerError;
        match err {
            DockerResponseServerError {
                status_code: 409,
                message,
            } => DriverError::NameConflict(message),
            DockerResponseServerError {
                status_code: 404,
                message,
            } => DriverError::ImageMissing(message),
            other => {
                let msg = other.to_string();
                let lower = msg.to_lowercase();
                if lower.contains("already being pulled")
                    || lower.contains("already in progress")
                    || lower.contains("layer is locked")
                {
                    DriverError::LayerLocked(msg)
                } else {
                    DriverError::Other(format!("{context}: {msg}"))
                }
            }
        }
    }
}

#[async_trait]
impl ContainerDriver for BollardDriver {
    async fn run(&self, spec: &RunSpec) -> Result<(), DriverError> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let binds: Vec<String> = spec
            .mounts
            .iter()
            .map(|m| {
                let mut b = format!("{}:{}", m.source, m.target);
                if m.read_only {
                    b.push_str(":ro");
                }
                b
            })
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            tty: Some(true),
            open_stdin: Some(true),
            env: if env.is_empty() { None } else { Some(env) },
            cmd: if spec.args.is_empty() {
                None
            } else {
                Some(spec.args.clone())
            },
            host_config: Some(HostConfig {
                binds: if binds.is_empty() { None } else { Some(binds) },
                network_mode: spec.network.clone(),
                extra_hosts: if spec.extra_hosts.is_empty() {
                    None
                } else {
                    Some(spec.extra_hosts.clone())
                },
                init: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let created = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| Self::classify("create_container", e))?;

        debug!(container_id = %created.id, name = %spec.name, "container created");

        self.client
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| Self::classify("start_container", e))?;

        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), DriverError> {
        self.client
            .start_container::<String>(name, None)
            .await
            .map_err(|e| Self::classify("start_container", e))
    }

    async fn restart(&self, name: &str) -> Result<(), DriverError> {
        self.client
            .restart_container(name, None)
            .await
            .map_err(|e| Self::classify("restart_container", e))
    }

    async fn pull(&self, image: &str) -> Result<(), DriverError> {
        let opts = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(opts), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => debug!(?info, image, "image pull progress"),
                Err(e) => return Err(Self::classify("pull", e)),
            }
        }
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<Option<bool>, DriverError> {
        match self
            .client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(Some(
                info.state.and_then(|s| s.running).unwrap_or(false),
            )),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(Self::classify("inspect_container", e)),
        }
    }

    async fn exec(&self, name: &str, argv: &[String]) -> Result<ExecOutput, DriverError> {
        let exec = self
            .client
            .create_exec(
                name,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(argv.to_vec()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Self::classify("create_exec", e))?;

        let start = self
            .client
            .start_exec(&exec.id, Some(StartExecOptions { detach: false, ..Default::default() }))
            .await
            .map_err(|e| Self::classify("start_exec", e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let StartExecResults::Attached { mut output, .. } = start {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(bollard::container::LogOutput::StdOut { message }) => {
                        stdout.extend_from_slice(&message)
                    }
                    Ok(bollard::container::LogOutput::StdErr { message }) => {
                        stderr.extend_from_slice(&message)
                    }
                    Ok(_) => {}
                    Err(e) => return Err(Self::classify("exec output", e)),
                }
            }
        }

        let inspected = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Self::classify("inspect_exec", e))?;
        let exit_code = inspected.exit_code.unwrap_or(0);

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn exec_attached(
        &self,
        name: &str,
        argv: &[String],
    ) -> Result<Box<dyn ExecStream>, DriverError> {
        let exec = self
            .client
            .create_exec(
                name,
                CreateExecOptions {
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    cmd: Some(argv.to_vec()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Self::classify("create_exec (attached)", e))?;

        let start = self
            .client
            .start_exec(&exec.id, Some(StartExecOptions { detach: false, ..Default::default() }))
            .await
            .map_err(|e| Self::classify("start_exec (attached)", e))?;

        let (mut output, mut input) = match start {
            StartExecResults::Attached { output, input } => (output, input),
            StartExecResults::Detached => {
                return Err(DriverError::Other(
                    "exec started detached unexpectedly".to_string(),
                ))
            }
        };

        // Bridge the stream/sink pair bollard hands back into a single
        // `AsyncRead + AsyncWrite` object via a loopback duplex pipe, each
        // direction pumped by its own task.
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (mut remote_read, mut remote_write) = tokio::io::split(remote);

        tokio::spawn(async move {
            while let Some(chunk) = output.next().await {
                let bytes = match chunk {
                    Ok(bollard::container::LogOutput::StdOut { message })
                    | Ok(bollard::container::LogOutput::StdErr { message }) => message,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("exec output stream ended: {e}");
                        break;
                    }
                };
                if remote_write.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            loop {
                match remote_read.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if input.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Box::new(local))
    }

    async fn ensure_network(&self, name: &str, internal: bool) -> Result<(), DriverError> {
        match self
            .client
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                self.client
                    .create_network(CreateNetworkOptions {
                        name,
                        internal,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| Self::classify("create_network", e))?;
                Ok(())
            }
            Err(e) => Err(Self::classify("inspect_network", e)),
        }
    }

    async fn safe_remove(&self, name: &str) -> Result<(), DriverError> {
        match self
            .client
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                let msg = e.to_string();
                if msg.to_lowercase().contains("no such container") {
                    Ok(())
                } else {
                    warn!(name, "safe_remove failed: {msg}");
                    Err(Self::classify("remove_container", e))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Hand-rolled mock driver for Session Service unit tests, matching the
    /// teacher's mock-based trait testing style (`MockProcessSpawner` et al.
    /// in `core/src/session/traits.rs`).
    #[derive(Default)]
    pub struct MockDriver {
        pub run_calls: Mutex<Vec<String>>,
        pub fail_run_with: Mutex<Option<DriverError>>,
        pub running: Mutex<HashMap<String, bool>>,
    }

    #[async_trait]
    impl ContainerDriver for MockDriver {
        async fn run(&self, spec: &RunSpec) -> Result<(), DriverError> {
            self.run_calls.lock().unwrap().push(spec.name.clone());
            if let Some(err) = self.fail_run_with.lock().unwrap().take() {
                return Err(err);
            }
            self.running.lock().unwrap().insert(spec.name.clone(), true);
            Ok(())
        }

        async fn start(&self, name: &str) -> Result<(), DriverError> {
            self.running.lock().unwrap().insert(name.to_string(), true);
            Ok(())
        }

        async fn restart(&self, name: &str) -> Result<(), DriverError> {
            self.running.lock().unwrap().insert(name.to_string(), true);
            Ok(())
        }

        async fn pull(&self, _image: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn is_running(&self, name: &str) -> Result<Option<bool>, DriverError> {
            Ok(self.running.lock().unwrap().get(name).copied())
        }

        async fn exec(&self, _name: &str, _argv: &[String]) -> Result<ExecOutput, DriverError> {
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
        ) -> Result<Box<dyn ExecStream>, DriverError> {
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

    #[tokio::test]
    async fn mock_run_then_is_running() {
        let driver = MockDriver::default();
        let spec = RunSpec {
            name: "oc-sess-1".into(),
            image: "alpine".into(),
            network: None,
            env: HashMap::new(),
            mounts: vec![],
            extra_hosts: vec![],
            args: vec![],
        };
        driver.run(&spec).await.unwrap();
        assert_eq!(driver.is_running("oc-sess-1").await.unwrap(), Some(true));
        assert_eq!(driver.run_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mock_missing_container_is_none() {
        let driver = MockDriver::default();
        assert_eq!(driver.is_running("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn mock_safe_remove_clears_running_state() {
        let driver = MockDriver::default();
        let spec = RunSpec {
            name: "x".into(),
            image: "alpine".into(),
            network: None,
            env: HashMap::new(),
            mounts: vec![],
            extra_hosts: vec![],
            args: vec![],
        };
        driver.run(&spec).await.unwrap();
        driver.safe_remove("x").await.unwrap();
        assert_eq!(driver.is_running("x").await.unwrap(), None);
    }
}
