//! Domain Models
//!
//! - `Repository`: versioned collection of content
//! - `RepositoryVersion`: one point in a repository's history
//! - `RepositoryContent`: ledger record (content entered/left the timeline)
//! - `ContentUnit`: catalog entry for a piece of content
//! - `ContentCount`: per content-type summary of a version
//! - `Publication` / `Distribution`: consumers that protect versions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Repository ID
pub type RepositoryId = Uuid;

/// Repository version ID
pub type VersionId = Uuid;

/// Content unit ID
pub type ContentId = Uuid;

/// Multi-tenant domain ID
pub type DomainId = Uuid;

/// Ledger record ID (synthetic, arena-style)
pub type MembershipId = i64;

/// The domain every object lands in unless told otherwise.
pub const DEFAULT_DOMAIN: DomainId = Uuid::nil();

// ═══════════════════════════════════════════════════════════════════════════
// Repository
// ═══════════════════════════════════════════════════════════════════════════

/// Repository Entity
///
/// `next_version` only advances when a version is sealed, so a discarded
/// version never burns a number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Repository ID (primary key)
    pub id: RepositoryId,

    /// Repository name (unique within the domain)
    pub name: String,

    /// Repository kind (type name of a registered `RepositoryKind`)
    pub kind: String,

    /// Domain the repository belongs to
    pub domain_id: DomainId,

    /// Optional description
    pub description: Option<String>,

    /// Number the next sealed version will get
    pub next_version: u32,

    /// Number of complete versions to keep (None = unlimited)
    pub retain_repo_versions: Option<u32>,

    /// Hidden repositories are internal helpers, not user-facing
    pub user_hidden: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Repository {
    /// Create a new repository in the default domain
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::in_domain(name, kind, DEFAULT_DOMAIN)
    }

    pub fn in_domain(name: impl Into<String>, kind: impl Into<String>, domain_id: DomainId) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: kind.into(),
            domain_id,
            description: None,
            next_version: 0,
            retain_repo_versions: None,
            user_hidden: false,
            created_at: Utc::now(),
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Repository Version
// ═══════════════════════════════════════════════════════════════════════════

/// One version of a repository's content set
///
/// `content_ids` is a cached snapshot. When present it always equals the set
/// derived from the ledger; when absent the ledger is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryVersion {
    /// Version ID (primary key)
    pub id: VersionId,

    /// Owning repository
    pub repository_id: RepositoryId,

    /// Number, unique per repository
    pub number: u32,

    /// False while under construction; true once sealed and visible
    pub complete: bool,

    /// Version this one was cloned from, if any
    pub base_version_id: Option<VersionId>,

    /// Cached membership snapshot
    pub content_ids: Option<BTreeSet<ContentId>>,

    /// Free-form metadata
    #[serde(default)]
    pub info: serde_json::Value,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl RepositoryVersion {
    /// Create a new, incomplete version
    pub fn new(repository_id: RepositoryId, number: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            repository_id,
            number,
            complete: false,
            base_version_id: None,
            content_ids: None,
            info: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }
}

impl fmt::Display for RepositoryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Repository: {}; Version: {}>", self.repository_id, self.number)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Ledger
// ═══════════════════════════════════════════════════════════════════════════

/// Ledger record: `content_id` entered the repository at `version_added` and
/// left it at `version_removed` (still present when `None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryContent {
    pub id: MembershipId,
    pub repository_id: RepositoryId,
    pub content_id: ContentId,
    pub version_added: VersionId,
    pub version_removed: Option<VersionId>,
}

/// Ledger query filter
///
/// All set fields must match. `content_ids` is an IN-list; callers keep it
/// within the configured batch size.
#[derive(Debug, Clone, Copy, Default)]
pub struct MembershipFilter<'a> {
    pub added_by: Option<VersionId>,
    pub removed_by: Option<VersionId>,
    /// Only records with `version_removed IS NULL`
    pub open_only: bool,
    pub content_ids: Option<&'a [ContentId]>,
}

impl<'a> MembershipFilter<'a> {
    pub fn added_by(version_id: VersionId) -> Self {
        Self {
            added_by: Some(version_id),
            ..Default::default()
        }
    }

    pub fn removed_by(version_id: VersionId) -> Self {
        Self {
            removed_by: Some(version_id),
            ..Default::default()
        }
    }

    pub fn open() -> Self {
        Self {
            open_only: true,
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content_ids: &'a [ContentId]) -> Self {
        self.content_ids = Some(content_ids);
        self
    }

    pub fn matches(&self, record: &RepositoryContent) -> bool {
        if let Some(added) = self.added_by {
            if record.version_added != added {
                return false;
            }
        }
        if let Some(removed) = self.removed_by {
            if record.version_removed != Some(removed) {
                return false;
            }
        }
        if self.open_only && record.version_removed.is_some() {
            return false;
        }
        if let Some(ids) = self.content_ids {
            if !ids.contains(&record.content_id) {
                return false;
            }
        }
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Content catalog
// ═══════════════════════════════════════════════════════════════════════════

/// Content unit (catalog entry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub id: ContentId,

    /// Content type, e.g. "file.file"
    pub content_type: String,

    pub domain_id: DomainId,

    /// Optional natural key (relative path, NEVRA, ...)
    pub natural_key: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl ContentUnit {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self::in_domain(content_type, DEFAULT_DOMAIN)
    }

    pub fn in_domain(content_type: impl Into<String>, domain_id: DomainId) -> Self {
        Self {
            id: Uuid::new_v4(),
            content_type: content_type.into(),
            domain_id,
            natural_key: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_natural_key(mut self, key: impl Into<String>) -> Self {
        self.natural_key = Some(key.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Count summaries
// ═══════════════════════════════════════════════════════════════════════════

/// Count category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CountType {
    Added,
    Present,
    Removed,
}

impl CountType {
    pub const ALL: [CountType; 3] = [CountType::Added, CountType::Present, CountType::Removed];

    /// Single-letter code used in storage
    pub fn code(&self) -> &'static str {
        match self {
            CountType::Added => "A",
            CountType::Present => "P",
            CountType::Removed => "R",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(CountType::Added),
            "P" => Some(CountType::Present),
            "R" => Some(CountType::Removed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CountType::Added => "added",
            CountType::Present => "present",
            CountType::Removed => "removed",
        }
    }
}

/// Per content-type count for one version
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentCount {
    pub version_id: VersionId,
    pub count_type: CountType,
    pub content_type: String,
    pub count: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// Consumers (protection)
// ═══════════════════════════════════════════════════════════════════════════

/// Publication built from a repository version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub id: Uuid,
    pub repository_version_id: VersionId,
    pub complete: bool,
    pub checkpoint: bool,
    pub created_at: DateTime<Utc>,
}

impl Publication {
    pub fn new(repository_version_id: VersionId) -> Self {
        Self {
            id: Uuid::new_v4(),
            repository_version_id,
            complete: true,
            checkpoint: false,
            created_at: Utc::now(),
        }
    }

    pub fn checkpoint(mut self) -> Self {
        self.checkpoint = true;
        self
    }
}

/// Distribution serving a repository, a version, or a publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub id: Uuid,
    pub name: String,
    /// Unique base path (cache key root)
    pub base_path: String,
    /// Serve whatever the repository's latest resolves to
    pub repository_id: Option<RepositoryId>,
    /// Serve one fixed version
    pub repository_version_id: Option<VersionId>,
    /// Serve one fixed publication
    pub publication_id: Option<Uuid>,
    /// Serves checkpointed history
    pub checkpoint: bool,
    /// Resolves to publications rather than raw versions
    pub serve_from_publication: bool,
}

impl Distribution {
    pub fn new(name: impl Into<String>, base_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            base_path: base_path.into(),
            repository_id: None,
            repository_version_id: None,
            publication_id: None,
            checkpoint: false,
            serve_from_publication: false,
        }
    }

    pub fn for_repository(mut self, repository_id: RepositoryId) -> Self {
        self.repository_id = Some(repository_id);
        self
    }

    pub fn for_version(mut self, version_id: VersionId) -> Self {
        self.repository_version_id = Some(version_id);
        self
    }

    pub fn for_publication(mut self, publication_id: Uuid) -> Self {
        self.publication_id = Some(publication_id);
        self
    }

    pub fn serving_publications(mut self) -> Self {
        self.serve_from_publication = true;
        self
    }

    pub fn checkpoint(mut self) -> Self {
        self.checkpoint = true;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
