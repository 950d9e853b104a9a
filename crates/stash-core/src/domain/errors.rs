//! Errors - エラー型と分類
//!
//! - StoreError: 外部 blob store 呼び出しの失敗
//! - RetrievalError: 読み取り経路の失敗（HTTP status に対応）
//! - ConfigError: 起動時の設定検証

use thiserror::Error;

/// Failure of a single call to the external blob store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    /// Network/connectivity fault, or a call that exceeded its timeout.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// Stored bytes or sidecar could not be decoded.
    #[error("corrupt entry {key}: {message}")]
    Corrupt { key: String, message: String },
}

impl StoreError {
    /// Only connectivity faults are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Read-path failure. Each variant maps to one HTTP status.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Carries the underlying cause for logging only; never echoed to callers.
    #[error("internal error")]
    Internal(#[source] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("invalid cache-control value: {0:?}")]
    InvalidCacheControl(String),
}
