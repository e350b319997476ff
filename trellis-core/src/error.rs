//! Error types for Trellis operations

use crate::RelationshipKind;
use thiserror::Error;

/// Identity registry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid resource reference for type '{resource_type}': {reason}")]
    InvalidReference { resource_type: String, reason: String },

    #[error("Identity conflict: {resource_type}:{id} is owned by {existing_lid}, requested by {incoming_lid}")]
    IdentityConflict {
        resource_type: String,
        id: String,
        existing_lid: String,
        incoming_lid: String,
    },

    #[error("Type mismatch for {lid}: key has type {expected}, reference has type {found}")]
    TypeMismatch {
        lid: String,
        expected: String,
        found: String,
    },

    #[error("Id already assigned for {lid}: has {current}, refused {attempted}")]
    IdAlreadyAssigned {
        lid: String,
        current: String,
        attempted: String,
    },
}

/// Relationship graph errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelationshipError {
    #[error("Unknown relationship {resource_type}.{field}")]
    UnknownRelationship { resource_type: String, field: String },

    #[error("Relationship {resource_type}.{field} is not {expected:?}")]
    KindMismatch {
        resource_type: String,
        field: String,
        expected: RelationshipKind,
    },

    #[error("Duplicate members {duplicates:?} in {lid}.{field}")]
    DuplicateRelationshipMember {
        lid: String,
        field: String,
        duplicates: Vec<String>,
    },

    #[error("Inverse {related_type}.{inverse} of {resource_type}.{field} is not declared")]
    MissingInverse {
        resource_type: String,
        field: String,
        related_type: String,
        inverse: String,
    },

    #[error("{field} expects members of type {expected}, got {found}")]
    UnexpectedType {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Index {index} out of bounds for {field} (len {len})")]
    IndexOutOfBounds {
        field: String,
        index: usize,
        len: usize,
    },
}

/// Request and document cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Fetch failed for {request_key} (status {status:?}): {message}")]
    Fetch {
        request_key: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Request {request_key} was aborted")]
    Aborted { request_key: String },

    #[error("Response for {request_key} was superseded by a newer request")]
    Superseded { request_key: String },

    #[error("Request {request_key} does not target a resource known to the store")]
    UnknownResource { request_key: String },

    #[error("Persisted cache failure: {reason}")]
    Persistence { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid schema at {resource_type}.{field}: {reason}")]
    InvalidSchema {
        resource_type: String,
        field: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    #[error("Failed to read configuration: {reason}")]
    Io { reason: String },
}

/// Master error type for all Trellis errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Relationship error: {0}")]
    Relationship(#[from] RelationshipError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// True when this error is a cancellation delivered to the aborting caller.
    pub fn is_abort(&self) -> bool {
        matches!(self, StoreError::Request(RequestError::Aborted { .. }))
    }

    /// True when this error came from the transport collaborator.
    pub fn is_fetch(&self) -> bool {
        matches!(self, StoreError::Request(RequestError::Fetch { .. }))
    }
}

/// Result type alias for Trellis operations.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================
