//! Session layer: token lifecycle, startup rehydration and credential
//! attachment.
//!
//! ## Lifecycle
//! ```text
//! Unknown ──rehydrate──▸ Resolving ──▸ Authenticated ──logout/invalidate──▸ Unauthenticated
//!                                  └─▸ Unauthenticated ──login──▸ Authenticated
//! ```
//!
//! Rehydration runs once per store. Any verification failure (rejected
//! token, unreachable service, timeout) ends in `Unauthenticated` and is
//! reported as [`SessionError::SessionUnverifiable`].

pub mod state;
pub mod store;

pub use state::{token_fingerprint, SessionPhase, SessionState, SessionUser};
pub use store::{LoginOutcome, RehydrateOutcome, SessionError, SessionStore};
