//! Route gating: decides what a route shows for a given session state.

use crate::session::SessionState;

pub const LOGIN_PATH: &str = "/login";
pub const VERIFY_2FA_PATH: &str = "/verify-2fa";
/// Landing route after login.
pub const DEFAULT_PATH: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Reachable only without a session (login, second-factor entry).
    Public,
    Protected,
}

impl RouteKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Protected => "protected",
        }
    }
}

impl std::fmt::Display for RouteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Session still resolving; show a placeholder, do not redirect.
    Loading,
    Render { mount_active_entity: bool },
    Redirect(&'static str),
}

/// Pure gate function.
pub fn decide(kind: RouteKind, session: &SessionState) -> GateDecision {
    if session.resolving {
        return GateDecision::Loading;
    }
    match (kind, session.authenticated) {
        (RouteKind::Protected, true) => GateDecision::Render {
            mount_active_entity: true,
        },
        (RouteKind::Protected, false) => GateDecision::Redirect(LOGIN_PATH),
        (RouteKind::Public, true) => GateDecision::Redirect(DEFAULT_PATH),
        (RouteKind::Public, false) => GateDecision::Render {
            mount_active_entity: false,
        },
    }
}

/// Maps paths to route kinds. Unlisted paths are protected.
#[derive(Debug, Clone)]
pub struct RouteTable {
    public: Vec<String>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            public: vec![LOGIN_PATH.to_string(), VERIFY_2FA_PATH.to_string()],
        }
    }
}

impl RouteTable {
    pub fn with_public(mut self, path: &str) -> Self {
        self.public.push(normalize_path(path));
        self
    }

    pub fn classify(&self, path: &str) -> RouteKind {
        let path = normalize_path(path);
        if self.public.iter().any(|p| *p == path) {
            RouteKind::Public
        } else {
            RouteKind::Protected
        }
    }
}

/// Strip query and fragment, collapse a trailing slash, ensure a leading one.
pub fn normalize_path(path: &str) -> String {
    let path = path
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_PATH.to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionUser;

    fn resolving() -> SessionState {
        SessionState::initial()
    }

    fn signed_out() -> SessionState {
        SessionState::default()
    }

    fn signed_in() -> SessionState {
        SessionState {
            token: Some("tok".into()),
            authenticated: true,
            user: Some(SessionUser::named("nurse")),
            resolving: false,
        }
    }

    #[test]
    fn resolving_never_redirects() {
        assert_eq!(decide(RouteKind::Protected, &resolving()), GateDecision::Loading);
        assert_eq!(decide(RouteKind::Public, &resolving()), GateDecision::Loading);

        let mut half = signed_in();
        half.resolving = true;
        assert_eq!(decide(RouteKind::Public, &half), GateDecision::Loading);
        assert_eq!(decide(RouteKind::Protected, &half), GateDecision::Loading);
    }

    #[test]
    fn protected_routes() {
        assert_eq!(
            decide(RouteKind::Protected, &signed_out()),
            GateDecision::Redirect(LOGIN_PATH)
        );
        assert_eq!(
            decide(RouteKind::Protected, &signed_in()),
            GateDecision::Render {
                mount_active_entity: true
            }
        );
    }

    #[test]
    fn public_routes() {
        assert_eq!(
            decide(RouteKind::Public, &signed_in()),
            GateDecision::Redirect(DEFAULT_PATH)
        );
        assert_eq!(
            decide(RouteKind::Public, &signed_out()),
            GateDecision::Render {
                mount_active_entity: false
            }
        );
    }

    #[test]
    fn classify_public_and_unknown_paths() {
        let routes = RouteTable::default();
        assert_eq!(routes.classify("/login"), RouteKind::Public);
        assert_eq!(routes.classify("/login/"), RouteKind::Public);
        assert_eq!(routes.classify("/login?next=%2Fpatients"), RouteKind::Public);
        assert_eq!(routes.classify("/verify-2fa"), RouteKind::Public);
        assert_eq!(routes.classify("/"), RouteKind::Protected);
        assert_eq!(routes.classify("/patients/12"), RouteKind::Protected);
        assert_eq!(routes.classify("/no-such-page"), RouteKind::Protected);
        assert_eq!(routes.classify("/loginx"), RouteKind::Protected);
    }

    #[test]
    fn extra_public_routes() {
        let routes = RouteTable::default().with_public("/forgot-password/");
        assert_eq!(routes.classify("/forgot-password"), RouteKind::Public);
    }

    #[test]
    fn normalize_handles_edge_forms() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("///"), "/");
        assert_eq!(normalize_path("login"), "/login");
        assert_eq!(normalize_path("/records/#top"), "/records");
    }
}
