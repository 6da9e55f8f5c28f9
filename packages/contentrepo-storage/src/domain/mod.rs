//! Domain layer
//!
//! # Domain Models
//!
//! - `Repository`: versioned collection of content, owns its versions
//! - `RepositoryVersion`: Open (incomplete) or Sealed (complete) version
//! - `RepositoryContent`: append-only ledger of membership facts
//! - `ContentUnit`, `ContentCount`, `Publication`, `Distribution`
//!
//! # Ports
//!
//! - `VersionStore` / `LedgerTx`: transactional storage
//! - `CacheInvalidator`: content cache
//!
//! # Strategy
//!
//! - `RepositoryKind`: per repository type content rules and hooks

pub mod kind;
pub mod models;
pub mod ports;

pub use kind::{KindRegistry, RepositoryKind, SimpleKind, FILE_KIND};
pub use models::{
    ContentCount, ContentId, ContentUnit, CountType, Distribution, DomainId, MembershipFilter,
    MembershipId, Publication, Repository, RepositoryContent, RepositoryId, RepositoryVersion,
    VersionId, DEFAULT_DOMAIN,
};
pub use ports::{CacheInvalidator, LedgerTx, NoopInvalidator, VersionStore};
