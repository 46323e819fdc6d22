use super::model::PatientRef;
use crate::api::{ApiClient, ApiError};
use async_trait::async_trait;
use serde_json::Value;

const PATIENTS_PATH: &str = "/api/patients/";

#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("not authorized to list patients")]
    Unauthorized,
    #[error("patient listing failed: {0}")]
    Failed(String),
}

impl From<ApiError> for DirectoryError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized(_) => Self::Unauthorized,
            other => Self::Failed(other.to_string()),
        }
    }
}

/// Source of the patient roster. Returns the raw response body; shape
/// normalization happens in [`normalize_roster`].
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn list_patients(&self) -> Result<Value, DirectoryError>;
}

/// Coerce a roster response into a list of patients.
///
/// Accepts a bare array or a paginated `{ "results": [...] }` envelope.
/// Any other shape yields an empty list. Entries that do not parse are
/// skipped.
pub fn normalize_roster(body: Value) -> Vec<PatientRef> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut envelope) => match envelope.remove("results") {
            Some(Value::Array(items)) => items,
            _ => {
                tracing::debug!("Roster response had no results list; treating as empty");
                return Vec::new();
            }
        },
        _ => {
            tracing::debug!("Roster response was not a list; treating as empty");
            return Vec::new();
        }
    };

    let total = items.len();
    let patients: Vec<PatientRef> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<PatientRef>(item) {
            Ok(patient) => Some(patient),
            Err(e) => {
                tracing::warn!("Skipping malformed roster entry: {e}");
                None
            }
        })
        .collect();

    if patients.len() < total {
        tracing::warn!(
            skipped = total - patients.len(),
            kept = patients.len(),
            "Roster contained unreadable entries"
        );
    }
    patients
}

/// Roster backed by `GET /api/patients/`.
pub struct HttpPatientDirectory {
    api: ApiClient,
}

impl HttpPatientDirectory {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl PatientDirectory for HttpPatientDirectory {
    async fn list_patients(&self) -> Result<Value, DirectoryError> {
        Ok(self.api.get_json(PATIENTS_PATH, &[]).await?)
    }
}
