//! Domain error types for the case store, stream adapter, and HTTP ingress
//! handlers. Modeled after the pack's `decision-gate-core` `StoreError`
//! enum: one named variant per distinct failure mode, matched explicitly
//! at call sites rather than compared as strings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaseStoreError {
    #[error("case already exists for trigger_transaction_id {0}")]
    DuplicateTrigger(String),

    #[error("case {0} not found")]
    CaseNotFound(String),

    #[error("illegal transition for case {case_id}: {from:?} -> {attempted:?}")]
    IllegalTransition {
        case_id: String,
        from: crate::models::CaseStatus,
        attempted: crate::models::CaseStatus,
    },

    #[error("invalid payload: {0}")]
    BadPayload(String),

    #[error("case store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<rusqlite::Error> for CaseStoreError {
    fn from(e: rusqlite::Error) -> Self {
        CaseStoreError::StoreUnavailable(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream unavailable: {0}")]
    Unavailable(String),

    #[error("record is poisoned: {0}")]
    Poison(String),
}

impl From<redis::RedisError> for StreamError {
    fn from(e: redis::RedisError) -> Self {
        StreamError::Unavailable(e.to_string())
    }
}
