//! Mount Planner (C2) — `spec.md` §4.2.
//!
//! Pure-logic functions, no I/O beyond a single directory-existence check,
//! in the style of the teacher's `session::docker` helpers
//! (`build_docker_run_args`, `validate_docker_config`): logic kept separate
//! from the engine call so it is unit-testable without a Docker daemon.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::driver::Mount;
use crate::errors::InvalidInputError;

/// Static configuration the Mount Planner needs that does not vary per
/// call — the state root, the workspace root, the inner-daemon TLS
/// material location, and the egress proxy address.
#[derive(Debug, Clone)]
pub struct MountPlannerConfig {
    pub state_root: PathBuf,
    pub workspace_root: PathBuf,
    pub docker_host: String,
    pub docker_cert_path: String,
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
    pub github_token: Option<String>,
    pub terminal_daemon_argv: Vec<String>,
}

/// The result of planning: an ordered mount list plus the environment map
/// a container must be created with.
#[derive(Debug, Clone)]
pub struct MountPlan {
    pub mounts: Vec<Mount>,
    pub env: HashMap<String, String>,
    pub workspace_dir: PathBuf,
    /// Shell command synthesized for the container entrypoint: one symlink
    /// step aliasing `~/.agents` to `~/.commander`, then `exec` into the
    /// configured terminal-daemon argv.
    pub entrypoint_args: Vec<String>,
}

/// Reject a `workspaceSuffix` with a `..` path component or a `\`, or one
/// whose resolved path would escape the configured workspace root. Plain
/// `/`-separated segments are allowed — the Git Workspace Service (C4)
/// hands back multi-segment relative paths like `repos/<owner>/<name>`.
fn validate_workspace_suffix(
    config: &MountPlannerConfig,
    suffix: &str,
) -> Result<PathBuf, InvalidInputError> {
    if suffix.contains('\\') || suffix.split('/').any(|segment| segment == "..") {
        return Err(InvalidInputError::WorkspaceSuffix(format!(
            "suffix must not contain '..' components or '\\': {suffix}"
        )));
    }

    let resolved = config.workspace_root.join(suffix);
    if !resolved.starts_with(&config.workspace_root) {
        return Err(InvalidInputError::WorkspaceSuffix(
            "resolved path escapes the workspace root".to_string(),
        ));
    }

    Ok(resolved)
}

/// Shell-escape a single argv element for embedding in a `sh -c` string.
fn shell_escape(arg: &str) -> String {
    shell_escape::unix::escape(std::borrow::Cow::Borrowed(arg)).into_owned()
}

/// Synthesize the entrypoint shell command: `ln -sfn ~/.commander
/// ~/.agents && exec <terminal-daemon argv...>`, with every argv element
/// shell-escaped.
fn build_entrypoint(terminal_daemon_argv: &[String]) -> Vec<String> {
    let escaped_argv: Vec<String> = terminal_daemon_argv.iter().map(|a| shell_escape(a)).collect();
    let exec_line = escaped_argv.join(" ");
    let script = format!(
        "ln -sfn \"$HOME/.commander\" \"$HOME/.agents\" && exec {exec_line}"
    );
    vec!["/bin/sh".to_string(), "-c".to_string(), script]
}

/// Produce the mount set and environment for an agent container given a
/// user id and optional workspace suffix — `spec.md` §4.2.
pub fn plan_mounts(
    config: &MountPlannerConfig,
    user_id: &str,
    workspace_suffix: Option<&str>,
) -> Result<MountPlan, InvalidInputError> {
    let workspace_dir = match workspace_suffix {
        Some(suffix) => {
            let resolved = validate_workspace_suffix(config, suffix)?;
            if !resolved.is_dir() {
                return Err(InvalidInputError::WorkspaceSuffix(format!(
                    "resolved workspace path does not exist or is not a directory: {}",
                    resolved.display()
                )));
            }
            resolved
        }
        None => config.workspace_root.clone(),
    };

    let mut mounts = Vec::new();

    let user_agent_state = config.state_root.join(user_id);
    for subdir in ["claude", "codex", "cursor"] {
        let host_dir = user_agent_state.join(subdir);
        mounts.push(Mount {
            source: host_dir.to_string_lossy().into_owned(),
            target: format!("/home/agent/.{subdir}"),
            read_only: false,
        });
    }

    mounts.push(Mount {
        source: config
            .state_root
            .join("agents")
            .to_string_lossy()
            .into_owned(),
        target: "/home/agent/.commander".to_string(),
        read_only: false,
    });

    mounts.push(Mount {
        source: config.docker_cert_path.clone(),
        target: "/certs/client".to_string(),
        read_only: true,
    });

    mounts.push(Mount {
        source: workspace_dir.to_string_lossy().into_owned(),
        target: "/workspace".to_string(),
        read_only: false,
    });

    let mut env = HashMap::new();
    env.insert("HTTP_PROXY".to_string(), config.http_proxy.clone());
    env.insert("http_proxy".to_string(), config.http_proxy.clone());
    env.insert("HTTPS_PROXY".to_string(), config.https_proxy.clone());
    env.insert("https_proxy".to_string(), config.https_proxy.clone());
    env.insert("NO_PROXY".to_string(), config.no_proxy.clone());
    env.insert("no_proxy".to_string(), config.no_proxy.clone());
    env.insert("DOCKER_HOST".to_string(), config.docker_host.clone());
    env.insert("DOCKER_TLS_VERIFY".to_string(), "1".to_string());
    env.insert(
        "DOCKER_CERT_PATH".to_string(),
        "/certs/client".to_string(),
    );
    if let Some(token) = &config.github_token {
        env.insert("GITHUB_TOKEN".to_string(), token.clone());
        env.insert("GH_TOKEN".to_string(), token.clone());
    }

    let entrypoint_args = build_entrypoint(&config.terminal_daemon_argv);

    Ok(MountPlan {
        mounts,
        env,
        workspace_dir,
        entrypoint_args,
    })
}

/// Convenience constructor for a minimal config, used by callers that only
/// care about overriding a handful of fields (mirrors `Default` impls in
/// the teacher's `config` module).
impl MountPlannerConfig {
    pub fn testing(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            state_root: PathBuf::from("/var/lib/open-commander"),
            workspace_root: workspace_root.as_ref().to_path_buf(),
            docker_host: "tcp://inner-daemon:2376".to_string(),
            docker_cert_path: "/var/lib/open-commander/certs".to_string(),
            http_proxy: "http://egress-proxy:3128".to_string(),
            https_proxy: "http://egress-proxy:3128".to_string(),
            no_proxy: "localhost,127.0.0.1".to_string(),
            github_token: None,
            terminal_daemon_argv: vec!["oc-terminal-daemon".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_dotdot_suffix() {
        let config = MountPlannerConfig::testing("/tmp/ws");
        let err = plan_mounts(&config, "u1", Some("../escape")).unwrap_err();
        assert!(matches!(err, InvalidInputError::WorkspaceSuffix(_)));
    }

    #[test]
    fn rejects_dotdot_component_in_nested_suffix() {
        let config = MountPlannerConfig::testing("/tmp/ws");
        let err = plan_mounts(&config, "u1", Some("repos/../escape")).unwrap_err();
        assert!(matches!(err, InvalidInputError::WorkspaceSuffix(_)));
    }

    #[test]
    fn accepts_nested_suffix_matching_cloned_repo_layout() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("repos/owner/name")).unwrap();
        let config = MountPlannerConfig::testing(tmp.path());
        let plan = plan_mounts(&config, "u1", Some("repos/owner/name")).unwrap();
        assert_eq!(plan.workspace_dir, tmp.path().join("repos/owner/name"));
    }

    #[test]
    fn rejects_backslash_suffix() {
        let config = MountPlannerConfig::testing("/tmp/ws");
        let err = plan_mounts(&config, "u1", Some("a\\b")).unwrap_err();
        assert!(matches!(err, InvalidInputError::WorkspaceSuffix(_)));
    }

    #[test]
    fn rejects_nonexistent_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        let config = MountPlannerConfig::testing(tmp.path());
        let err = plan_mounts(&config, "u1", Some("does-not-exist")).unwrap_err();
        assert!(matches!(err, InvalidInputError::WorkspaceSuffix(_)));
    }

    #[test]
    fn accepts_existing_suffix_dir() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("proj1")).unwrap();
        let config = MountPlannerConfig::testing(tmp.path());
        let plan = plan_mounts(&config, "u1", Some("proj1")).unwrap();
        assert_eq!(plan.workspace_dir, tmp.path().join("proj1"));
    }

    #[test]
    fn no_suffix_uses_workspace_root() {
        let tmp = tempfile::tempdir().unwrap();
        let config = MountPlannerConfig::testing(tmp.path());
        let plan = plan_mounts(&config, "u1", None).unwrap();
        assert_eq!(plan.workspace_dir, tmp.path());
    }

    #[test]
    fn env_includes_proxy_and_docker_vars() {
        let tmp = tempfile::tempdir().unwrap();
        let config = MountPlannerConfig::testing(tmp.path());
        let plan = plan_mounts(&config, "u1", None).unwrap();
        assert_eq!(plan.env.get("DOCKER_TLS_VERIFY").unwrap(), "1");
        assert_eq!(plan.env.get("DOCKER_CERT_PATH").unwrap(), "/certs/client");
        assert!(plan.env.contains_key("HTTP_PROXY"));
        assert!(plan.env.contains_key("http_proxy"));
    }

    #[test]
    fn github_token_only_set_when_configured() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = MountPlannerConfig::testing(tmp.path());
        let plan = plan_mounts(&config, "u1", None).unwrap();
        assert!(!plan.env.contains_key("GITHUB_TOKEN"));

        config.github_token = Some("ghp_abc".to_string());
        let plan = plan_mounts(&config, "u1", None).unwrap();
        assert_eq!(plan.env.get("GITHUB_TOKEN").unwrap(), "ghp_abc");
        assert_eq!(plan.env.get("GH_TOKEN").unwrap(), "ghp_abc");
    }

    #[test]
    fn entrypoint_escapes_argv() {
        let args = build_entrypoint(&["my daemon".to_string(), "--flag=a b".to_string()]);
        assert_eq!(args[0], "/bin/sh");
        assert_eq!(args[1], "-c");
        assert!(args[2].contains("exec"));
        assert!(args[2].contains('\''));
    }

    #[test]
    fn mounts_include_workspace_at_expected_target() {
        let tmp = tempfile::tempdir().unwrap();
        let config = MountPlannerConfig::testing(tmp.path());
        let plan = plan_mounts(&config, "u1", None).unwrap();
        assert!(plan
            .mounts
            .iter()
            .any(|m| m.target == "/workspace" && m.source == tmp.path().to_string_lossy()));
    }
}
