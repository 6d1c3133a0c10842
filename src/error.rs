use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid observation for patient {patient_id} on {date:?}: field `{field}` {reason}")]
    Validation {
        patient_id: String,
        date: Option<NaiveDate>,
        field: &'static str,
        reason: String,
    },

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("{0} has not been trained")]
    NotTrained(&'static str),

    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl EngineError {
    pub fn missing(patient_id: &str, date: Option<NaiveDate>, field: &'static str) -> Self {
        EngineError::Validation {
            patient_id: patient_id.to_string(),
            date,
            field,
            reason: "is missing".to_string(),
        }
    }

    pub fn invalid(
        patient_id: &str,
        date: Option<NaiveDate>,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::Validation {
            patient_id: patient_id.to_string(),
            date,
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_field_and_patient() {
        let err = EngineError::missing("p-7", NaiveDate::from_ymd_opt(2026, 3, 1), "age");
        let message = err.to_string();
        assert!(message.contains("p-7"));
        assert!(message.contains("`age`"));
        assert!(message.contains("is missing"));
    }

    #[test]
    fn not_trained_names_model() {
        let err = EngineError::NotTrained("risk classifier");
        assert_eq!(err.to_string(), "risk classifier has not been trained");
    }
}
