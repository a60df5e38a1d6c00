//! Environment-configured ports and paths (`spec.md` §6.4) plus the rest
//! of the ambient runtime configuration, read once at startup into a
//! typed struct — the teacher's `config` module favors typed structs with
//! `#[serde(default = "...")]` defaults over scattered `std::env::var`
//! calls, and this follows the same shape even though the source here is
//! the environment rather than a settings JSON blob.

use std::path::PathBuf;

use oc_core::mount_planner::MountPlannerConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub front_door_port: u16,
    pub internal_http_port: u16,
    pub proxy_port: u16,
    pub state_root: PathBuf,
    pub workspace_root: PathBuf,
    pub docker_host: String,
    pub docker_cert_path: String,
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
    pub github_token: Option<String>,
    pub terminal_daemon_argv: Vec<String>,
    /// Bearer tokens accepted by the `/api/tasks` surface (§6.1). Unknown
    /// keys return 401.
    pub api_keys: Vec<String>,
    /// Whether auth is disabled; resolves every cookie to `admin_user_id`.
    pub auth_disabled: bool,
    pub admin_user_id: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_port(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from the process environment. Never panics on a
    /// missing variable; every field has a documented default.
    pub fn from_env() -> Self {
        let api_keys = std::env::var("OC_API_KEYS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        Self {
            front_door_port: env_port("OC_FRONT_DOOR_PORT", 3000),
            internal_http_port: env_port("OC_INTERNAL_HTTP_PORT", 3001),
            proxy_port: env_port("OC_PROXY_PORT", 7682),
            state_root: PathBuf::from(env_or("OC_STATE_ROOT", "/var/lib/open-commander")),
            workspace_root: PathBuf::from(env_or("OC_WORKSPACE_ROOT", "/var/lib/open-commander/workspaces")),
            docker_host: env_or("DOCKER_HOST", "tcp://inner-daemon:2376"),
            docker_cert_path: env_or("DOCKER_CERT_PATH", "/certs/client"),
            http_proxy: env_or("OC_HTTP_PROXY", "http://egress-proxy:3128"),
            https_proxy: env_or("OC_HTTPS_PROXY", "http://egress-proxy:3128"),
            no_proxy: env_or("OC_NO_PROXY", "localhost,127.0.0.1"),
            github_token: std::env::var("GITHUB_TOKEN").ok().filter(|s| !s.is_empty()),
            terminal_daemon_argv: std::env::var("OC_TERMINAL_DAEMON_ARGV")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(|_| vec!["oc-terminal-daemon".to_string()]),
            api_keys,
            auth_disabled: std::env::var("OC_AUTH_DISABLED").is_ok(),
            admin_user_id: env_or("OC_ADMIN_USER_ID", "admin"),
        }
    }

    pub fn mount_planner_config(&self) -> MountPlannerConfig {
        MountPlannerConfig {
            state_root: self.state_root.clone(),
            workspace_root: self.workspace_root.clone(),
            docker_host: self.docker_host.clone(),
            docker_cert_path: self.docker_cert_path.clone(),
            http_proxy: self.http_proxy.clone(),
            https_proxy: self.https_proxy.clone(),
            no_proxy: self.no_proxy.clone(),
            github_token: self.github_token.clone(),
            terminal_daemon_argv: self.terminal_daemon_argv.clone(),
        }
    }
}
