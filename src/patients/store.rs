use super::model::PatientRef;
use super::roster::{normalize_roster, DirectoryError, PatientDirectory};
use crate::storage::{DurableStore, SELECTION_KEY};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Observable active-entity context.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActiveEntityState {
    pub selected: Option<PatientRef>,
    /// Server order. Filled only by explicit roster loads.
    pub roster: Vec<PatientRef>,
    pub roster_loading: bool,
    pub roster_error: Option<String>,
}

impl ActiveEntityState {
    /// Roster entries matching `term`, in roster order.
    pub fn search(&self, term: &str) -> Vec<&PatientRef> {
        self.roster.iter().filter(|p| p.matches(term)).collect()
    }
}

/// Selected patient plus roster for an authenticated workspace.
///
/// Created by [`ActiveEntityStore::mount`] when the protected area is entered
/// and dropped on logout. The selection survives restarts through the
/// durable store; the roster does not.
pub struct ActiveEntityStore {
    storage: Arc<dyn DurableStore>,
    directory: Arc<dyn PatientDirectory>,
    state: watch::Sender<ActiveEntityState>,
    in_flight: Mutex<usize>,
    healed: AtomicU64,
}

impl ActiveEntityStore {
    /// Build the store and restore the persisted selection.
    ///
    /// A persisted entry that is unreadable or no longer matches the patient
    /// shape is removed and counted; mounting never fails.
    pub fn mount(storage: Arc<dyn DurableStore>, directory: Arc<dyn PatientDirectory>) -> Self {
        let store = Self {
            storage,
            directory,
            state: watch::channel(ActiveEntityState::default()).0,
            in_flight: Mutex::new(0),
            healed: AtomicU64::new(0),
        };
        store.restore_selection();
        store
    }

    pub fn subscribe(&self) -> watch::Receiver<ActiveEntityState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ActiveEntityState {
        self.state.borrow().clone()
    }

    pub fn selected(&self) -> Option<PatientRef> {
        self.state.borrow().selected.clone()
    }

    /// Number of persisted selections discarded as unreadable.
    pub fn healed_selections(&self) -> u64 {
        self.healed.load(Ordering::SeqCst)
    }

    // ── Selection ───────────────────────────────────────────────────

    /// Make `patient` the active patient and persist it.
    pub fn select(&self, patient: PatientRef) {
        match serde_json::to_string(&patient) {
            Ok(json) => {
                if let Err(e) = self.storage.set(SELECTION_KEY, &json) {
                    tracing::warn!(
                        backend = self.storage.name(),
                        "Failed to persist selected patient: {e}"
                    );
                }
            }
            Err(e) => tracing::warn!("Failed to serialize selected patient: {e}"),
        }
        tracing::debug!(patient_id = %patient.patient_id, "Patient selected");
        self.state.send_modify(|s| s.selected = Some(patient));
    }

    pub fn clear_selection(&self) {
        if let Err(e) = self.storage.remove(SELECTION_KEY) {
            tracing::warn!(
                backend = self.storage.name(),
                "Failed to remove persisted selection: {e}"
            );
        }
        self.state.send_if_modified(|s| s.selected.take().is_some());
    }

    fn restore_selection(&self) {
        let raw = match self.storage.get(SELECTION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(
                    backend = self.storage.name(),
                    "Failed to read persisted selection: {e}"
                );
                return;
            }
        };

        match serde_json::from_str::<PatientRef>(&raw) {
            Ok(patient) => {
                tracing::debug!(patient_id = %patient.patient_id, "Restored selected patient");
                self.state.send_modify(|s| s.selected = Some(patient));
            }
            Err(e) => {
                self.healed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!("Discarding unreadable persisted selection: {e}");
                if let Err(err) = self.storage.remove(SELECTION_KEY) {
                    tracing::warn!("Failed to remove unreadable selection: {err}");
                }
            }
        }
    }

    // ── Roster ──────────────────────────────────────────────────────

    /// Fetch the roster and replace the current one.
    ///
    /// Any previous `roster_error` is cleared when the load starts. On
    /// failure the roster is emptied and `roster_error` set; the error is
    /// also returned so callers can react to an expired session. Concurrent
    /// loads are not merged: whichever resolves last wins.
    pub async fn load_roster(&self) -> Result<usize, DirectoryError> {
        self.begin_loading();
        let result = self.directory.list_patients().await.map(normalize_roster);

        let outcome = match result {
            Ok(roster) => {
                let count = roster.len();
                self.state.send_modify(|s| {
                    s.roster = roster;
                    s.roster_error = None;
                });
                tracing::debug!(count, "Roster loaded");
                Ok(count)
            }
            Err(e) => {
                tracing::warn!("Roster load failed: {e}");
                let message = e.to_string();
                self.state.send_modify(|s| {
                    s.roster = Vec::new();
                    s.roster_error = Some(message);
                });
                Err(e)
            }
        };

        self.end_loading();
        outcome
    }

    fn begin_loading(&self) {
        let mut n = self.in_flight.lock();
        *n += 1;
        self.state.send_if_modified(|s| {
            let was_loading = std::mem::replace(&mut s.roster_loading, true);
            !was_loading || s.roster_error.take().is_some()
        });
    }

    fn end_loading(&self) {
        let mut n = self.in_flight.lock();
        *n = n.saturating_sub(1);
        if *n == 0 {
            self.state.send_if_modified(|s| std::mem::replace(&mut s.roster_loading, false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use crate::storage::StorageError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Notify;

    fn patient_json(id: &str, patient_id: &str, first: &str) -> Value {
        json!({
            "id": id,
            "patient_id": patient_id,
            "first_name": first,
            "last_name": "Mensah",
            "middle_name": null,
            "date_of_birth": "1975-11-02",
            "phone_number": "0244123456",
            "gender": "F"
        })
    }

    fn patient(id: &str, patient_id: &str, first: &str) -> PatientRef {
        serde_json::from_value(patient_json(id, patient_id, first)).unwrap()
    }

    enum Reply {
        Body(Value),
        Fail(DirectoryError),
    }

    struct FakeDirectory {
        replies: Mutex<Vec<Reply>>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeDirectory {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                gate: None,
            })
        }
    }

    #[async_trait]
    impl PatientDirectory for FakeDirectory {
        async fn list_patients(&self) -> Result<Value, DirectoryError> {
            let reply = {
                let mut replies = self.replies.lock();
                if replies.is_empty() {
                    Reply::Body(json!([]))
                } else {
                    replies.remove(0)
                }
            };
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match reply {
                Reply::Body(v) => Ok(v),
                Reply::Fail(e) => Err(e),
            }
        }
    }

    struct BrokenStore;

    impl DurableStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::InvalidKey("unavailable".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::InvalidKey("unavailable".into()))
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::InvalidKey("unavailable".into()))
        }
    }

    fn empty_directory() -> Arc<FakeDirectory> {
        FakeDirectory::new(Vec::new())
    }

    #[test]
    fn mount_with_nothing_persisted() {
        let store = ActiveEntityStore::mount(Arc::new(MemoryStore::new()), empty_directory());
        let state = store.snapshot();
        assert!(state.selected.is_none());
        assert!(state.roster.is_empty());
        assert!(!state.roster_loading);
        assert_eq!(store.healed_selections(), 0);
    }

    #[test]
    fn selection_survives_remount() {
        let storage = Arc::new(MemoryStore::new());
        let chosen = patient("p-7", "PAT000007", "Efua");

        let first = ActiveEntityStore::mount(storage.clone(), empty_directory());
        first.select(chosen.clone());
        drop(first);

        let second = ActiveEntityStore::mount(storage.clone(), empty_directory());
        assert_eq!(second.selected(), Some(chosen));
        assert_eq!(second.healed_selections(), 0);
    }

    #[test]
    fn select_replaces_previous_selection() {
        let storage = Arc::new(MemoryStore::new());
        let store = ActiveEntityStore::mount(storage.clone(), empty_directory());
        store.select(patient("a", "PAT1", "Ama"));
        store.select(patient("b", "PAT2", "Kofi"));

        let raw = storage.get(SELECTION_KEY).unwrap().unwrap();
        let persisted: PatientRef = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.id, "b");
        assert_eq!(store.selected().unwrap().first_name, "Kofi");
    }

    #[test]
    fn clear_selection_removes_persisted_entry() {
        let storage = Arc::new(MemoryStore::new());
        let store = ActiveEntityStore::mount(storage.clone(), empty_directory());
        store.select(patient("a", "PAT1", "Ama"));
        store.clear_selection();

        assert!(store.selected().is_none());
        assert_eq!(storage.get(SELECTION_KEY).unwrap(), None);
        // Idempotent.
        store.clear_selection();
        assert!(store.selected().is_none());
    }

    #[test]
    fn corrupt_selection_is_removed_and_counted() {
        let storage = Arc::new(MemoryStore::new());
        storage.set(SELECTION_KEY, "{not json").unwrap();

        let store = ActiveEntityStore::mount(storage.clone(), empty_directory());
        assert!(store.selected().is_none());
        assert_eq!(store.healed_selections(), 1);
        assert_eq!(storage.get(SELECTION_KEY).unwrap(), None);
    }

    #[test]
    fn schema_incompatible_selection_is_removed() {
        let storage = Arc::new(MemoryStore::new());
        storage
            .set(SELECTION_KEY, r#"{"id":"x","name":"Old Format"}"#)
            .unwrap();

        let store = ActiveEntityStore::mount(storage.clone(), empty_directory());
        assert!(store.selected().is_none());
        assert_eq!(store.healed_selections(), 1);
        assert_eq!(storage.get(SELECTION_KEY).unwrap(), None);
    }

    #[test]
    fn storage_failures_never_block_selection() {
        let store = ActiveEntityStore::mount(Arc::new(BrokenStore), empty_directory());
        assert!(store.selected().is_none());
        assert_eq!(store.healed_selections(), 0);

        store.select(patient("a", "PAT1", "Ama"));
        assert_eq!(store.selected().unwrap().id, "a");
        store.clear_selection();
        assert!(store.selected().is_none());
    }

    #[tokio::test]
    async fn load_roster_replaces_roster() {
        let directory = FakeDirectory::new(vec![
            Reply::Body(json!([patient_json("a", "PAT1", "Ama")])),
            Reply::Body(json!({"results": [
                patient_json("b", "PAT2", "Kofi"),
                patient_json("c", "PAT3", "Yaw")
            ]})),
        ]);
        let store = ActiveEntityStore::mount(Arc::new(MemoryStore::new()), directory);

        assert_eq!(store.load_roster().await.unwrap(), 1);
        assert_eq!(store.load_roster().await.unwrap(), 2);
        let state = store.snapshot();
        let ids: Vec<_> = state.roster.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(!state.roster_loading);
        assert!(state.roster_error.is_none());
    }

    #[tokio::test]
    async fn failed_load_empties_roster_and_records_error() {
        let directory = FakeDirectory::new(vec![
            Reply::Body(json!([patient_json("a", "PAT1", "Ama")])),
            Reply::Fail(DirectoryError::Failed("HTTP 500".into())),
            Reply::Body(json!([patient_json("a", "PAT1", "Ama")])),
        ]);
        let store = ActiveEntityStore::mount(Arc::new(MemoryStore::new()), directory);

        store.load_roster().await.unwrap();
        let err = store.load_roster().await.unwrap_err();
        assert!(matches!(err, DirectoryError::Failed(_)));
        let state = store.snapshot();
        assert!(state.roster.is_empty());
        assert!(state.roster_error.as_deref().unwrap().contains("HTTP 500"));

        // Retry clears the error.
        store.load_roster().await.unwrap();
        let state = store.snapshot();
        assert_eq!(state.roster.len(), 1);
        assert!(state.roster_error.is_none());
    }

    #[tokio::test]
    async fn retry_clears_stale_error_while_in_flight() {
        let gate = Arc::new(Notify::new());
        let directory = Arc::new(FakeDirectory {
            replies: Mutex::new(vec![
                Reply::Fail(DirectoryError::Failed("HTTP 502".into())),
                Reply::Body(json!([patient_json("a", "PAT1", "Ama")])),
            ]),
            gate: Some(gate.clone()),
        });
        let store = Arc::new(ActiveEntityStore::mount(
            Arc::new(MemoryStore::new()),
            directory,
        ));

        gate.notify_one();
        assert!(store.load_roster().await.is_err());
        assert!(store.snapshot().roster_error.is_some());

        let mut rx = store.subscribe();
        let retry = tokio::spawn({
            let store = store.clone();
            async move { store.load_roster().await }
        });
        let state = rx.wait_for(|s| s.roster_loading).await.unwrap().clone();
        assert!(state.roster_error.is_none());

        gate.notify_one();
        assert_eq!(retry.await.unwrap().unwrap(), 1);
        assert!(store.snapshot().roster_error.is_none());
    }

    #[tokio::test]
    async fn roster_load_leaves_selection_alone() {
        let storage = Arc::new(MemoryStore::new());
        let directory = FakeDirectory::new(vec![Reply::Fail(DirectoryError::Unauthorized)]);
        let store = ActiveEntityStore::mount(storage, directory);
        store.select(patient("z", "PAT9", "Esi"));

        assert!(store.load_roster().await.is_err());
        assert_eq!(store.selected().unwrap().id, "z");
    }

    #[tokio::test]
    async fn roster_loading_tracks_in_flight_requests() {
        let gate = Arc::new(Notify::new());
        let directory = Arc::new(FakeDirectory {
            replies: Mutex::new(vec![
                Reply::Body(json!([patient_json("a", "PAT1", "Ama")])),
                Reply::Body(json!([patient_json("b", "PAT2", "Kofi")])),
            ]),
            gate: Some(gate.clone()),
        });
        let store = Arc::new(ActiveEntityStore::mount(
            Arc::new(MemoryStore::new()),
            directory,
        ));
        let mut rx = store.subscribe();

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.load_roster().await }
        });
        rx.wait_for(|s| s.roster_loading).await.unwrap();
        let second = tokio::spawn({
            let store = store.clone();
            async move { store.load_roster().await }
        });
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert!(store.snapshot().roster_loading);

        gate.notify_one();
        second.await.unwrap().unwrap();
        let state = store.snapshot();
        assert!(!state.roster_loading);
        assert_eq!(state.roster.len(), 1);
    }

    #[test]
    fn search_filters_roster() {
        let state = ActiveEntityState {
            roster: vec![
                patient("a", "PAT001", "Ama"),
                patient("b", "PAT002", "Kofi"),
                patient("c", "PAT003", "Yaa"),
            ],
            ..Default::default()
        };
        let hits: Vec<_> = state.search("kofi").iter().map(|p| p.id.clone()).collect();
        assert_eq!(hits, vec!["b"]);
        assert_eq!(state.search("PAT00").len(), 3);
        assert_eq!(state.search("").len(), 3);
        assert!(state.search("nobody").is_empty());
    }
}
