//! Error types for contentrepo-storage

use std::fmt;
use thiserror::Error;

use crate::domain::models::RepositoryId;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Mutation attempted on a sealed (complete) version
    ImmutableVersion,
    /// Deletion attempted on a version that is being served
    ProtectedVersion,
    /// Deletion attempted on the only remaining complete version
    LastVersion,
    /// Another open version (or live handle) exists for the repository
    ConcurrentMutation,
    /// Ledger left in an inconsistent state; indicates a bug
    ConsistencyViolation,
    /// A version would contain a content type its repository kind does not support
    UnsupportedContentType,
    /// Content belongs to a different domain than the repository
    DomainMismatch,
    /// Repository not found
    RepositoryNotFound,
    /// Repository version not found
    VersionNotFound,
    /// Content unit not found in the catalog
    ContentNotFound,
    /// Name already taken within the domain
    DuplicateName,
    /// Repository kind is not registered
    UnknownKind,
    /// Database errors (SQLite)
    Database,
    /// Serialization/deserialization errors
    Serialization,
    /// Transaction errors
    Transaction,
    /// Configuration errors
    Config,
    /// I/O errors
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ImmutableVersion => "immutable_version",
            ErrorKind::ProtectedVersion => "protected_version",
            ErrorKind::LastVersion => "last_version",
            ErrorKind::ConcurrentMutation => "concurrent_mutation",
            ErrorKind::ConsistencyViolation => "consistency_violation",
            ErrorKind::UnsupportedContentType => "unsupported_content_type",
            ErrorKind::DomainMismatch => "domain_mismatch",
            ErrorKind::RepositoryNotFound => "repository_not_found",
            ErrorKind::VersionNotFound => "version_not_found",
            ErrorKind::ContentNotFound => "content_not_found",
            ErrorKind::DuplicateName => "duplicate_name",
            ErrorKind::UnknownKind => "unknown_kind",
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Config => "config",
            ErrorKind::IO => "io",
        }
    }

    /// Fatal kinds signal a bug or a broken caller contract rather than a
    /// condition the caller can resolve and retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConsistencyViolation | ErrorKind::DomainMismatch
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
///
/// Carries the repository and version number it concerns when known, so a
/// caller can act on it without parsing the message.
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
    pub repository_id: Option<RepositoryId>,
    pub version_number: Option<u32>,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            repository_id: None,
            version_number: None,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_repository(mut self, repository_id: RepositoryId) -> Self {
        self.repository_id = Some(repository_id);
        self
    }

    pub fn with_version(mut self, repository_id: RepositoryId, number: u32) -> Self {
        self.repository_id = Some(repository_id);
        self.version_number = Some(number);
        self
    }

    // Convenience constructors
    pub fn immutable_version(repository_id: RepositoryId, number: u32) -> Self {
        Self::new(
            ErrorKind::ImmutableVersion,
            format!("Version {} is complete and cannot be modified", number),
        )
        .with_version(repository_id, number)
    }

    pub fn protected_version(repository_id: RepositoryId, number: u32) -> Self {
        Self::new(
            ErrorKind::ProtectedVersion,
            format!(
                "Version {} is being served by a distribution and cannot be deleted",
                number
            ),
        )
        .with_version(repository_id, number)
    }

    pub fn last_version(repository_id: RepositoryId, number: u32) -> Self {
        Self::new(
            ErrorKind::LastVersion,
            format!(
                "Version {} is the last remaining version of the repository",
                number
            ),
        )
        .with_version(repository_id, number)
    }

    pub fn concurrent_mutation(repository_id: RepositoryId, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConcurrentMutation, message).with_repository(repository_id)
    }

    pub fn consistency(repository_id: RepositoryId, number: u32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConsistencyViolation, message).with_version(repository_id, number)
    }

    pub fn unsupported_content_types(
        repository_id: RepositoryId,
        number: u32,
        types: &[String],
    ) -> Self {
        Self::new(
            ErrorKind::UnsupportedContentType,
            format!("Saw unsupported content types {:?}", types),
        )
        .with_version(repository_id, number)
    }

    pub fn duplicate_membership(repository_id: RepositoryId, content_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::ConsistencyViolation,
            format!("Duplicate ledger record for content {}", content_id),
        )
        .with_repository(repository_id)
    }

    pub fn domain_mismatch(repository_id: RepositoryId, count: usize) -> Self {
        Self::new(
            ErrorKind::DomainMismatch,
            format!("{} content units belong to a different domain", count),
        )
        .with_repository(repository_id)
    }

    pub fn repository_not_found(repo_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::RepositoryNotFound,
            format!("Repository not found: {}", repo_id),
        )
    }

    pub fn version_not_found(version: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::VersionNotFound,
            format!("Repository version not found: {}", version),
        )
    }

    pub fn content_not_found(count: usize) -> Self {
        Self::new(
            ErrorKind::ContentNotFound,
            format!("{} content units are not registered", count),
        )
    }

    pub fn duplicate_name(name: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::DuplicateName,
            format!("Repository name already in use: {}", name),
        )
    }

    pub fn unknown_kind(kind: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::UnknownKind,
            format!("Repository kind is not registered: {}", kind),
        )
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }
}

// SQLite error conversions
#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::database(format!("SQLite error: {}", err)).with_source(err)
    }
}

// JSON error conversions
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<serde_yaml::Error> for StorageError {
    fn from(err: serde_yaml::Error) -> Self {
        StorageError::config(format!("YAML error: {}", err)).with_source(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::new(ErrorKind::IO, format!("IO error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;
