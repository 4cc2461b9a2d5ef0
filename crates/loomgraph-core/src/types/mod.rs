//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the engine:
//! - Error types (`LoomError`, `ErrorKind`)
//! - Persisted entities (`Tenant`, `User`, `Credential`, `Graph`, `Node`,
//!   `Edge`, `Label`, `Tag`, `VectorMetadata`)
//! - Ownership of subordinate records (`Owner`)
//! - Timestamp helpers shared by the store and the validating client
//!
//! ## Timestamps
//!
//! Records persist their timestamps as microseconds since the Unix epoch.
//! Every timestamp the engine stamps is truncated to microseconds up front so
//! that a record read back from the store compares equal to the value that
//! `create` returned.

mod entities;

pub use entities::{
    Credential, Edge, Graph, Label, Node, Owner, Tag, Tags, Tenant, User, VectorMetadata,
};

use chrono::{DateTime, Utc};
use thiserror::Error;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the LoomGraph engine.
///
/// - No silent failures
/// - Use `Result<T, LoomError>` for fallible operations
/// - Storage and codec failures collapse into `Internal`
#[derive(Debug, Error)]
pub enum LoomError {
    /// Malformed GUID or argument, dimensionality mismatch, invalid filter.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The referenced record does not exist in the given scope.
    #[error("Not found: {0}")]
    NotFound(String),

    /// GUID collision, delete blocked by children, or a concurrent rebuild.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unexpected storage failure (I/O, corruption, codec).
    #[error("Internal error: {0}")]
    Internal(String),

    /// The caller's cancellation token fired before the operation finished.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Coarse classification of a [`LoomError`], for callers that map errors
/// onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Conflict,
    Internal,
    Cancelled,
}

impl LoomError {
    /// The kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub(crate) fn not_found(what: &str, guid: uuid::Uuid) -> Self {
        Self::NotFound(format!("{what} {guid}"))
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}

macro_rules! internal_from {
    ($($source:ty),+ $(,)?) => {
        $(
            impl From<$source> for LoomError {
                fn from(e: $source) -> Self {
                    Self::Internal(e.to_string())
                }
            }
        )+
    };
}

internal_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    redb::CompactionError,
    postcard::Error,
    std::io::Error,
);

// =============================================================================
// TIMESTAMPS
// =============================================================================

/// The current time truncated to microsecond precision.
pub(crate) fn timestamp_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Rebuild a timestamp from its persisted microsecond form.
pub(crate) fn timestamp_from_micros(micros: i64) -> Result<DateTime<Utc>, LoomError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| LoomError::Internal(format!("invalid stored timestamp: {micros}")))
}

// =============================================================================
// TESTS
// =============================================================================
