//! Error types for Guildhall

use std::{io::Error as IoError, path::PathBuf};
use thiserror::Error;

/// Persistence errors reported by a [`GroupStore`](crate::persistence::GroupStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read directory {0}: {1}")]
    DirectoryRead(PathBuf, IoError),

    #[error("Failed to create directory {0}: {1}")]
    DirectoryCreate(PathBuf, IoError),

    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, IoError),

    #[error("Failed to write file {0}: {1}")]
    FileWrite(PathBuf, IoError),

    #[error("Failed to rename file from {0} to {1}: {2}")]
    FileRename(PathBuf, PathBuf, IoError),

    #[error("Failed to delete file {0}: {1}")]
    FileDelete(PathBuf, IoError),

    #[error("Failed to serialize record {0}: {1}")]
    Serialization(String, serde_json::Error),

    #[error("Failed to deserialize file {0}: {1}")]
    Deserialization(PathBuf, serde_json::Error),

    #[error("Record {0} already exists")]
    Duplicate(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a group, storage or friend operation.
///
/// Every operation fails closed: when one of these is returned, no state was
/// changed.
#[derive(Debug, Error)]
pub enum GroupError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: f64, available: f64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Guild is already at the maximum level {0}")]
    MaxLevelReached(u32),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl GroupError {
    /// Stable identifier of the error kind, used on the sync wire.
    pub fn kind(&self) -> &'static str {
        match self {
            GroupError::NotFound(_) => "not_found",
            GroupError::AlreadyExists(_) => "already_exists",
            GroupError::Unauthorized(_) => "unauthorized",
            GroupError::InvariantViolation(_) => "invariant_violation",
            GroupError::InsufficientFunds { .. } => "insufficient_funds",
            GroupError::InvalidAmount(_) => "invalid_amount",
            GroupError::MaxLevelReached(_) => "max_level_reached",
            GroupError::Persistence(_) => "persistence",
        }
    }

    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        GroupError::NotFound(what.to_string())
    }

    pub(crate) fn unauthorized(what: impl std::fmt::Display) -> Self {
        GroupError::Unauthorized(what.to_string())
    }

    pub(crate) fn invariant(what: impl std::fmt::Display) -> Self {
        GroupError::InvariantViolation(what.to_string())
    }
}

/// Notification delivery errors.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Handler execution failed: {0}")]
    HandlerExecution(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sync protocol framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame of {0} bytes exceeds the limit of {1} bytes")]
    TooLarge(usize, usize),

    #[error("Malformed frame payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

/// Failure of one sync request, reported back to the sender.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Unsupported protocol version {0}, expected {1}")]
    UnsupportedVersion(u16, u16),

    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Could not encode reply: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Group(#[from] GroupError),
}

impl SyncError {
    /// Wire kind; group failures keep their own kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::UnsupportedVersion(..) => "unsupported_version",
            SyncError::Malformed(_) => "malformed",
            SyncError::Encoding(_) => "encoding",
            SyncError::Group(e) => e.kind(),
        }
    }
}

pub type GroupResult<T> = Result<T, GroupError>;
pub type StoreResult<T> = Result<T, StoreError>;
