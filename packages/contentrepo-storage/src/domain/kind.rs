//! Repository kinds
//!
//! A kind decides which content types a repository may hold and gets a say
//! at three points of a version's life. Hooks default to no-ops; a kind only
//! overrides what it needs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::models::RepositoryVersion;
use crate::versioning::VersionEditor;
use crate::{Result, StorageError};

/// Built-in file repository type
pub const FILE_KIND: &str = "file.file";

/// Repository kind strategy
pub trait RepositoryKind: Send + Sync {
    /// Type name stored on the repository
    fn type_name(&self) -> &str;

    /// Content types a sealed version may contain
    fn content_types(&self) -> &[String];

    /// Called right after a new version is opened.
    fn initialize_new_version(&self, _version: &mut VersionEditor<'_>) -> Result<()> {
        Ok(())
    }

    /// Called before the no-change check and the seal. May still mutate.
    fn finalize_new_version(&self, _version: &mut VersionEditor<'_>) -> Result<()> {
        Ok(())
    }

    /// Called after the seal has committed.
    fn on_new_version(&self, _version: &RepositoryVersion) -> Result<()> {
        Ok(())
    }

    fn supports(&self, content_type: &str) -> bool {
        self.content_types().iter().any(|t| t == content_type)
    }
}

/// Kind with a fixed content-type list and no hooks
#[derive(Debug, Clone)]
pub struct SimpleKind {
    name: String,
    content_types: Vec<String>,
}

impl SimpleKind {
    pub fn new<I, T>(name: impl Into<String>, content_types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            content_types: content_types.into_iter().map(Into::into).collect(),
        }
    }

    /// `file.file` repositories hold `file.file` content
    pub fn file() -> Self {
        Self::new(FILE_KIND, [FILE_KIND])
    }
}

impl RepositoryKind for SimpleKind {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn content_types(&self) -> &[String] {
        &self.content_types
    }
}

/// Type name → kind
#[derive(Clone)]
pub struct KindRegistry {
    kinds: HashMap<String, Arc<dyn RepositoryKind>>,
}

impl KindRegistry {
    /// Registry without any kinds
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: Arc<dyn RepositoryKind>) -> &mut Self {
        self.kinds.insert(kind.type_name().to_string(), kind);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn RepositoryKind>> {
        self.kinds
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::unknown_kind(name))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for KindRegistry {
    /// Registry with the built-in file kind
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(SimpleKind::file()));
        registry
    }
}

impl fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindRegistry")
            .field("kinds", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_file_kind() {
        let kind = SimpleKind::file();
        assert_eq!(kind.type_name(), FILE_KIND);
        assert!(kind.supports("file.file"));
        assert!(!kind.supports("rpm.package"));
    }

    #[test]
    fn test_default_registry_has_file_kind() {
        let registry = KindRegistry::default();
        assert_eq!(registry.names(), vec![FILE_KIND]);
        assert!(registry.get(FILE_KIND).is_ok());
    }

    #[test]
    fn test_unknown_kind() {
        let registry = KindRegistry::empty();
        let err = registry.get("rpm.rpm").err().unwrap();
        assert_eq!(err.kind, ErrorKind::UnknownKind);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = KindRegistry::default();
        registry.register(Arc::new(SimpleKind::new(
            FILE_KIND,
            ["file.file", "file.metadata"],
        )));
        let kind = registry.get(FILE_KIND).unwrap();
        assert!(kind.supports("file.metadata"));
        assert_eq!(registry.names().len(), 1);
    }
}
