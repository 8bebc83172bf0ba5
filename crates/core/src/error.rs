use thiserror::Error;

/// Per-item failures surfaced to callers of batch operations.
///
/// Store failures are not listed here as a recoverable kind: they abort the enclosing
/// operation through `anyhow` and carry `StoreUnavailable` as their root cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChanbenchError {
    #[error("statistics unavailable for {id}: {reason}")]
    ProviderUnavailable { id: String, reason: String },

    #[error("invalid {field}: {value:?}")]
    Validation { field: &'static str, value: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ChanbenchError {
    pub fn validation(field: &'static str, value: impl Into<String>) -> Self {
        Self::Validation {
            field,
            value: value.into(),
        }
    }

    pub fn provider_unavailable(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
