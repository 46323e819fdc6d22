use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A patient as listed by the roster endpoint.
///
/// Fields the desk relies on are typed; every other server field is kept in
/// `extra` so a persisted snapshot round-trips exactly what was selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRef {
    /// Server primary key.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Hospital patient number (e.g. "PAT004512").
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub phone_number: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PatientRef {
    /// "First [Middle] Last".
    pub fn display_name(&self) -> String {
        let mut parts = vec![self.first_name.trim()];
        if let Some(middle) = self.middle_name.as_deref().map(str::trim) {
            if !middle.is_empty() {
                parts.push(middle);
            }
        }
        parts.push(self.last_name.trim());
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Case-insensitive match on name, hospital number or phone number.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }
        self.display_name().to_lowercase().contains(&term)
            || format!("{} {}", self.first_name, self.last_name)
                .to_lowercase()
                .contains(&term)
            || self.patient_id.to_lowercase().contains(&term)
            || self.phone_number.contains(&term)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
