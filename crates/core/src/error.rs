//! Errors raised by the pure workflow rules.
//!
//! The HTTP layer maps each variant onto a status code, so every variant here
//! is produced somewhere in the domain crates:
//!
//! | variant | raised by | HTTP |
//! |---|---|---|
//! | `Validation` | request checks (`Payment::validate`, group DTOs) | 400 |
//! | `InvalidId` | typed id parsing | 400 |
//! | `InvariantViolation` | `Refund::against` (unsettled payment, excess amount) | 422 |
//! | `NotFound` | lookups of rows referenced by a request | 404 |
//! | `Conflict` | resolving or postponing a row that already left pending | 409 |

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// The request is well-formed but the rows it refers to forbid it.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Names the missing thing, e.g. "payment".
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}
