use sha2::{Digest, Sha256};

/// Hex chars of the token hash kept as the fallback user identifier.
const FINGERPRINT_LEN: usize = 12;

/// Who the session belongs to, as far as the client knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub identifier: String,
}

impl SessionUser {
    pub fn named(username: &str) -> Self {
        Self {
            identifier: username.to_string(),
        }
    }

    /// Minimal identity for a rehydrated session: only the token is known.
    pub fn from_token(token: &str) -> Self {
        Self {
            identifier: format!("token:{}", token_fingerprint(token)),
        }
    }
}

/// Short, non-reversible tag for a token. Safe to log.
pub fn token_fingerprint(token: &str) -> String {
    let mut h = Sha256::new();
    h.update(token.as_bytes());
    let mut hex = hex::encode(h.finalize());
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Observable session state.
///
/// `authenticated` implies `token` is set and was accepted by the identity
/// service during this process lifetime.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    pub token: Option<String>,
    pub authenticated: bool,
    pub user: Option<SessionUser>,
    /// Startup rehydration or a login call is in flight.
    pub resolving: bool,
}

impl SessionState {
    /// State at process start: nothing known yet, rehydration pending.
    pub fn initial() -> Self {
        Self {
            resolving: true,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> SessionPhase {
        if self.resolving {
            SessionPhase::Resolving
        } else if self.authenticated {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Unauthenticated
        }
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field(
                "token",
                &self.token.as_deref().map(token_fingerprint),
            )
            .field("authenticated", &self.authenticated)
            .field("user", &self.user)
            .field("resolving", &self.resolving)
            .finish()
    }
}

/// Named states of the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Rehydration has not started.
    Unknown,
    Resolving,
    Authenticated,
    Unauthenticated,
}

impl SessionPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Resolving => "resolving",
            Self::Authenticated => "authenticated",
            Self::Unauthenticated => "unauthenticated",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_resolving() {
        let state = SessionState::initial();
        assert!(state.resolving);
        assert!(!state.authenticated);
        assert_eq!(state.phase(), SessionPhase::Resolving);
    }

    #[test]
    fn resolving_dominates_phase() {
        let state = SessionState {
            token: Some("t".into()),
            authenticated: true,
            user: None,
            resolving: true,
        };
        assert_eq!(state.phase(), SessionPhase::Resolving);
    }

    #[test]
    fn fingerprint_is_short_and_stable() {
        let a = token_fingerprint("9944b09199c62bcf9418ad846dd0e4bbdfc6ee4b");
        let b = token_fingerprint("9944b09199c62bcf9418ad846dd0e4bbdfc6ee4b");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert_ne!(a, token_fingerprint("other"));
    }

    #[test]
    fn debug_never_prints_raw_token() {
        let state = SessionState {
            token: Some("super-secret-token".into()),
            authenticated: true,
            user: Some(SessionUser::named("admin")),
            resolving: false,
        };
        let dbg = format!("{state:?}");
        assert!(!dbg.contains("super-secret-token"));
        assert!(dbg.contains(&token_fingerprint("super-secret-token")));
    }

    #[test]
    fn from_token_user_uses_fingerprint() {
        let user = SessionUser::from_token("abc");
        assert_eq!(user.identifier, format!("token:{}", token_fingerprint("abc")));
    }
}
