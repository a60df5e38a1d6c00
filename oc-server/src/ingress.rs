//! Ingress/port-mapping helper — resolution of the Open Question in
//! `SPEC_FULL.md` §9: modeled as a single external collaborator behind one
//! narrow hook rather than folded into the Session Service, since the
//! actual mechanism (host port allocation, reverse-proxy route removal) is
//! deployment-specific and out of scope here.

use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait IngressHelper: Send + Sync {
    /// Best-effort cleanup of any ingress state (port mappings, proxy
    /// routes) associated with `session_id`. Called by the Session
    /// Service on `stop`, before `safeRemove`; failures here are logged
    /// and never block the stop from proceeding (`spec.md` §4.3).
    async fn cleanup(&self, session_id: &str);
}

/// No-op default: there is no external ingress layer in this deployment.
#[derive(Default)]
pub struct NoopIngressHelper;

#[async_trait]
impl IngressHelper for NoopIngressHelper {
    async fn cleanup(&self, session_id: &str) {
        debug!(session_id, "no ingress helper configured, nothing to clean up");
    }
}
