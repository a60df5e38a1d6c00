//! The auth subsystem is modeled as a single capability (`spec.md` §9):
//! `resolveUser(cookieHeader) -> userId?`. Cookie parsing lives only here;
//! no other component inspects headers directly.

use async_trait::async_trait;

#[async_trait]
pub trait AuthCollaborator: Send + Sync {
    /// Resolve the cookie header of an incoming upgrade/HTTP request to a
    /// user id, or `None` if unauthenticated.
    async fn resolve_user(&self, cookie_header: Option<&str>) -> Option<String>;
}

/// Real implementation: looks for a session cookie and forwards it to the
/// (external, out of scope per `spec.md` §1) auth backend. Since that
/// backend is a black box here, this treats the cookie value itself as
/// the opaque user id it resolves to — the substitutable seam is this
/// trait, not this implementation's internals.
pub struct CookieAuth {
    pub cookie_name: String,
}

impl CookieAuth {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
        }
    }

    fn parse_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
        header.split(';').find_map(|kv| {
            let mut parts = kv.trim().splitn(2, '=');
            let key = parts.next()?.trim();
            let value = parts.next()?.trim();
            (key == name).then_some(value)
        })
    }
}

#[async_trait]
impl AuthCollaborator for CookieAuth {
    async fn resolve_user(&self, cookie_header: Option<&str>) -> Option<String> {
        let header = cookie_header?;
        Self::parse_cookie(header, &self.cookie_name).map(str::to_string)
    }
}

/// Disabled-auth mode: every request resolves to the configured admin
/// user (`spec.md` §4.7: "Under disabled-auth mode, resolve to the first
/// admin user").
pub struct DisabledAuth {
    pub admin_user_id: String,
}

#[async_trait]
impl AuthCollaborator for DisabledAuth {
    async fn resolve_user(&self, _cookie_header: Option<&str>) -> Option<String> {
        Some(self.admin_user_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cookie_auth_resolves_matching_cookie() {
        let auth = CookieAuth::new("oc_session");
        let user = auth
            .resolve_user(Some("other=1; oc_session=user-42; more=2"))
            .await;
        assert_eq!(user.as_deref(), Some("user-42"));
    }

    #[tokio::test]
    async fn cookie_auth_missing_cookie_is_none() {
        let auth = CookieAuth::new("oc_session");
        let user = auth.resolve_user(Some("unrelated=1")).await;
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn cookie_auth_no_header_is_none() {
        let auth = CookieAuth::new("oc_session");
        assert!(auth.resolve_user(None).await.is_none());
    }

    #[tokio::test]
    async fn disabled_auth_always_resolves_admin() {
        let auth = DisabledAuth {
            admin_user_id: "admin".to_string(),
        };
        assert_eq!(auth.resolve_user(None).await.as_deref(), Some("admin"));
        assert_eq!(
            auth.resolve_user(Some("whatever=1")).await.as_deref(),
            Some("admin")
        );
    }
}
