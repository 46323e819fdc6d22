use super::state::{token_fingerprint, SessionPhase, SessionState, SessionUser};
use crate::api::CredentialSlot;
use crate::identity::{IdentityError, IdentityService, LoginReply, SecondFactorChallenge};
use crate::storage::{DurableStore, TOKEN_KEY};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shown when the service gives no reason for a failed login.
const LOGIN_FAILED: &str = "Login failed";

/// Length of a second-factor verification code.
const SECOND_FACTOR_CODE_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("{message}")]
    LoginFailed { message: String },
    #[error("verification code must be 6 digits")]
    InvalidSecondFactorCode,
    /// The stored token could not be confirmed. Covers both an explicit
    /// rejection and an unreachable identity service.
    #[error("stored session could not be verified: {reason}")]
    SessionUnverifiable { reason: String },
    #[error("session rehydration already ran")]
    AlreadyRehydrated,
    #[error("session changed while the request was in flight")]
    Superseded,
}

/// Result of a login attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated,
    /// Hand the challenge to the second-factor flow, then call
    /// [`SessionStore::complete_second_factor`].
    SecondFactorRequired(SecondFactorChallenge),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RehydrateOutcome {
    NoStoredToken,
    Restored,
    /// A logout or login landed first; the verification result was dropped.
    Superseded,
}

/// Owns the authenticated session and the shared credential.
///
/// Only this type writes the [`CredentialSlot`] and the persisted token.
pub struct SessionStore {
    identity: Arc<dyn IdentityService>,
    storage: Arc<dyn DurableStore>,
    credential: CredentialSlot,
    state: watch::Sender<SessionState>,
    /// Outstanding resolutions. Starts at 1 for the startup window.
    resolvers: Mutex<usize>,
    rehydrate_started: AtomicBool,
    rehydration: Mutex<Option<CancellationToken>>,
    /// Bumped on every login, logout and invalidation.
    epoch: AtomicU64,
}

impl SessionStore {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        storage: Arc<dyn DurableStore>,
        credential: CredentialSlot,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::initial());
        Self {
            identity,
            storage,
            credential,
            state,
            resolvers: Mutex::new(1),
            rehydrate_started: AtomicBool::new(false),
            rehydration: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn shared(
        identity: Arc<dyn IdentityService>,
        storage: Arc<dyn DurableStore>,
        credential: CredentialSlot,
    ) -> Arc<Self> {
        Arc::new(Self::new(identity, storage, credential))
    }

    /// Watch handle; every state change is published here.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        let state = self.state.borrow();
        if !self.rehydrate_started.load(Ordering::SeqCst) && !state.authenticated {
            return SessionPhase::Unknown;
        }
        state.phase()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().authenticated
    }

    pub fn credential(&self) -> &CredentialSlot {
        &self.credential
    }

    // ── Login ───────────────────────────────────────────────────────

    /// Exchange credentials for a session.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, SessionError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(SessionError::LoginFailed {
                message: "Username and password are required".into(),
            });
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        self.begin_resolving();
        let reply = self.identity.login(username, password).await;

        let outcome = match reply {
            Ok(LoginReply::Token(token)) => {
                if self.epoch.load(Ordering::SeqCst) != epoch {
                    Err(SessionError::Superseded)
                } else {
                    self.establish(&token, SessionUser::named(username));
                    tracing::info!(username = username, "Logged in");
                    Ok(LoginOutcome::Authenticated)
                }
            }
            Ok(LoginReply::SecondFactorRequired(challenge)) => {
                tracing::info!(
                    username = username,
                    user_id = %challenge.user_id,
                    "Login deferred to second factor"
                );
                Ok(LoginOutcome::SecondFactorRequired(challenge))
            }
            Err(e) => {
                tracing::warn!(username = username, "Login failed: {e}");
                Err(SessionError::LoginFailed {
                    message: login_failure_message(&e),
                })
            }
        };

        self.end_resolving();
        outcome
    }

    /// Resume a login deferred by [`LoginOutcome::SecondFactorRequired`].
    pub async fn complete_second_factor(
        &self,
        challenge: &SecondFactorChallenge,
        code: &str,
    ) -> Result<(), SessionError> {
        let code = code.trim();
        if code.len() != SECOND_FACTOR_CODE_LEN || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(SessionError::InvalidSecondFactorCode);
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        self.begin_resolving();
        let result = self.identity.verify_second_factor(challenge, code).await;

        let outcome = match result {
            Ok(token) => {
                if self.epoch.load(Ordering::SeqCst) != epoch {
                    Err(SessionError::Superseded)
                } else {
                    self.establish(&token, SessionUser::named(&challenge.username));
                    tracing::info!(username = %challenge.username, "Second factor accepted");
                    Ok(())
                }
            }
            Err(e) => {
                tracing::warn!(username = %challenge.username, "Second factor rejected: {e}");
                Err(SessionError::LoginFailed {
                    message: login_failure_message(&e),
                })
            }
        };

        self.end_resolving();
        outcome
    }

    // ── Logout / invalidation ───────────────────────────────────────

    /// End the session. Safe to call when already logged out.
    pub fn logout(&self) {
        if self.reset() {
            tracing::info!("Logged out");
        }
    }

    /// Drop a session the backend no longer accepts (e.g. a 401 on any call).
    pub fn invalidate(&self, reason: &str) {
        if self.reset() {
            tracing::warn!(reason = reason, "Session invalidated");
        }
    }

    /// Clear token, credential and persisted entry. Returns whether anything
    /// was held.
    fn reset(&self) -> bool {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(cancel) = self.rehydration.lock().take() {
            cancel.cancel();
        }

        self.credential.detach();
        if let Err(e) = self.storage.remove(TOKEN_KEY) {
            tracing::warn!("Failed to remove persisted session token: {e}");
        }

        self.state.send_if_modified(|s| {
            let held = s.token.is_some() || s.authenticated || s.user.is_some();
            s.token = None;
            s.authenticated = false;
            s.user = None;
            held
        })
    }

    // ── Rehydration ─────────────────────────────────────────────────

    /// Restore the session persisted by a previous process. Runs once.
    pub async fn rehydrate(&self) -> Result<RehydrateOutcome, SessionError> {
        if self.rehydrate_started.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyRehydrated);
        }

        let stored = match self.storage.get(TOKEN_KEY) {
            Ok(value) => value
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            Err(e) => {
                tracing::warn!(backend = self.storage.name(), "Failed to read session token: {e}");
                None
            }
        };

        let Some(token) = stored else {
            self.end_resolving();
            tracing::debug!("No persisted session token");
            return Ok(RehydrateOutcome::NoStoredToken);
        };

        if self.is_authenticated() {
            // A login completed before rehydration was started.
            self.end_resolving();
            return Ok(RehydrateOutcome::Superseded);
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let cancel = CancellationToken::new();
        *self.rehydration.lock() = Some(cancel.clone());

        self.credential.attach(&token);
        let fingerprint = token_fingerprint(&token);
        tracing::debug!(token = %fingerprint, "Verifying persisted session token");

        let verdict = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = self.identity.check_liveness(&token) => Some(res),
        };
        self.rehydration.lock().take();

        let verdict = match verdict {
            Some(v) if self.epoch.load(Ordering::SeqCst) == epoch => v,
            _ => {
                self.end_resolving();
                tracing::debug!(token = %fingerprint, "Rehydration superseded");
                return Ok(RehydrateOutcome::Superseded);
            }
        };

        let outcome = match verdict {
            Ok(()) => {
                self.state.send_modify(|s| {
                    s.token = Some(token.clone());
                    s.authenticated = true;
                    s.user = Some(SessionUser::from_token(&token));
                });
                tracing::info!(token = %fingerprint, "Session restored");
                Ok(RehydrateOutcome::Restored)
            }
            Err(e) => {
                self.credential.detach();
                if let Err(err) = self.storage.remove(TOKEN_KEY) {
                    tracing::warn!("Failed to remove persisted session token: {err}");
                }
                self.state.send_modify(|s| {
                    s.token = None;
                    s.authenticated = false;
                    s.user = None;
                });
                tracing::warn!(token = %fingerprint, "Persisted session could not be verified: {e}");
                Err(SessionError::SessionUnverifiable {
                    reason: e.to_string(),
                })
            }
        };

        self.end_resolving();
        outcome
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Adopt a freshly issued token. Supersedes any in-flight rehydration.
    fn establish(&self, token: &str, user: SessionUser) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(cancel) = self.rehydration.lock().take() {
            cancel.cancel();
        }

        self.credential.attach(token);
        if let Err(e) = self.storage.set(TOKEN_KEY, token) {
            tracing::warn!(
                backend = self.storage.name(),
                "Failed to persist session token: {e}"
            );
        }

        self.state.send_modify(|s| {
            s.token = Some(token.to_string());
            s.authenticated = true;
            s.user = Some(user);
        });
    }

    fn begin_resolving(&self) {
        let mut pending = self.resolvers.lock();
        *pending += 1;
        self.state.send_if_modified(|s| {
            let changed = !s.resolving;
            s.resolving = true;
            changed
        });
    }

    fn end_resolving(&self) {
        let mut pending = self.resolvers.lock();
        *pending = pending.saturating_sub(1);
        let still = *pending > 0;
        self.state.send_if_modified(|s| {
            let changed = s.resolving != still;
            s.resolving = still;
            changed
        });
    }
}

fn login_failure_message(err: &IdentityError) -> String {
    match err {
        IdentityError::Rejected { message } if !message.trim().is_empty() => message.clone(),
        _ => LOGIN_FAILED.to_string(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
