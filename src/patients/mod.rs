//! Active-entity context: the currently selected patient and the roster it
//! is picked from.
//!
//! The store only exists inside an authenticated workspace (see
//! [`crate::shell::AppShell`]). The selection is persisted under
//! [`crate::storage::SELECTION_KEY`] and restored on mount; a persisted entry
//! that can no longer be read is dropped without surfacing an error.

pub mod model;
pub mod roster;
pub mod store;

pub use model::PatientRef;
pub use roster::{normalize_roster, DirectoryError, HttpPatientDirectory, PatientDirectory};
pub use store::{ActiveEntityState, ActiveEntityStore};
