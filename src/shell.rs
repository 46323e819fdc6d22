//! Application shell: applies gate decisions and owns the lifetime of the
//! active-entity context.

use crate::gate::{decide, GateDecision, RouteKind, RouteTable};
use crate::patients::{ActiveEntityStore, PatientDirectory};
use crate::session::SessionStore;
use crate::storage::DurableStore;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Result of navigating to a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub path: String,
    pub kind: RouteKind,
    pub decision: GateDecision,
}

pub struct AppShell {
    session: Arc<SessionStore>,
    storage: Arc<dyn DurableStore>,
    directory: Arc<dyn PatientDirectory>,
    routes: RouteTable,
    active: Mutex<Option<Arc<ActiveEntityStore>>>,
}

impl AppShell {
    pub fn new(
        session: Arc<SessionStore>,
        storage: Arc<dyn DurableStore>,
        directory: Arc<dyn PatientDirectory>,
    ) -> Self {
        Self {
            session,
            storage,
            directory,
            routes: RouteTable::default(),
            active: Mutex::new(None),
        }
    }

    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Active-entity context, present only inside an authenticated workspace.
    pub fn active_entity(&self) -> Option<Arc<ActiveEntityStore>> {
        self.active.lock().clone()
    }

    /// Gate `path` against the current session and apply the outcome.
    pub fn navigate(&self, path: &str) -> Navigation {
        let kind = self.routes.classify(path);
        let state = self.session.snapshot();
        let decision = decide(kind, &state);

        match decision {
            GateDecision::Render {
                mount_active_entity: true,
            } => {
                self.ensure_mounted();
            }
            _ if !state.resolving && !state.authenticated => {
                self.unmount();
            }
            _ => {}
        }

        tracing::debug!(path, kind = %kind, ?decision, "Navigated");
        Navigation {
            path: path.to_string(),
            kind,
            decision,
        }
    }

    /// Drop the active-entity context if the session is no longer
    /// authenticated. Returns whether a context was dropped.
    pub fn sync_with_session(&self) -> bool {
        let state = self.session.snapshot();
        if !state.resolving && !state.authenticated {
            return self.unmount();
        }
        false
    }

    /// Keep the shell in step with session changes until cancelled.
    pub fn track_session(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let shell = Arc::clone(self);
        let mut rx = shell.session.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        shell.sync_with_session();
                    }
                }
            }
        })
    }

    fn ensure_mounted(&self) {
        let mut active = self.active.lock();
        if active.is_none() {
            *active = Some(Arc::new(ActiveEntityStore::mount(
                self.storage.clone(),
                self.directory.clone(),
            )));
            tracing::debug!("Active-entity context mounted");
        }
    }

    fn unmount(&self) -> bool {
        let dropped = self.active.lock().take().is_some();
        if dropped {
            tracing::debug!("Active-entity context dropped");
        }
        dropped
    }
}
