use crate::store::StoreError;
use thiserror::Error;

/// Failure classes surfaced by engine operations
///
/// Inconclusive statistics are never an error; they are decision outcomes.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("ad group {0} has no creatives")]
    EmptyAdGroup(String),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Short label used for metrics and API error bodies
    pub fn class(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::InvalidConfiguration(_) => "invalid_configuration",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::EmptyAdGroup(_) => "empty_ad_group",
            EngineError::Store(_) => "store_failure",
        }
    }
}
