#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

//! Session and active-patient context for the chartdesk records front end.
//!
//! - [`session::SessionStore`]: login, logout, startup rehydration and the
//!   deferred second-factor flow.
//! - [`gate::decide`]: what a route shows for the current session.
//! - [`patients::ActiveEntityStore`]: the selected patient and the roster.
//! - [`shell::AppShell`]: ties the three together per navigation.

pub mod api;
pub mod config;
pub mod gate;
pub mod identity;
pub mod patients;
pub mod session;
pub mod shell;
pub mod storage;

pub use config::Config;
pub use gate::{decide, GateDecision, RouteKind, RouteTable};
pub use patients::{ActiveEntityState, ActiveEntityStore, PatientRef};
pub use session::{SessionState, SessionStore};
pub use shell::AppShell;
