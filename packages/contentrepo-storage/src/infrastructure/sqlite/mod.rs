//! SQLite Version Store
//!
//! File-based persistent storage using SQLite. Every transaction starts with
//! `BEGIN IMMEDIATE`, taking the database write lock up front so two writers
//! never interleave on one repository's ledger.
//!
//! Ids are stored as 16-byte blobs, timestamps as microseconds since the
//! epoch, and the version snapshot as a JSON array.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{
    ContentCount, ContentId, ContentUnit, CountType, Distribution, DomainId, LedgerTx,
    MembershipFilter, MembershipId, Publication, Repository, RepositoryContent, RepositoryId,
    RepositoryVersion, VersionId, VersionStore,
};
use crate::{ErrorKind, Result, StorageError};

const REPOSITORY_COLUMNS: &str = "id, name, kind, domain_id, description, next_version, \
     retain_repo_versions, user_hidden, created_at";

const VERSION_COLUMNS: &str =
    "id, repository_id, number, complete, base_version_id, content_ids, info, created_at";

const MEMBERSHIP_COLUMNS: &str =
    "id, repository_id, content_id, version_added, version_removed";

const DISTRIBUTION_COLUMNS: &str = "id, name, base_path, repository_id, repository_version_id, \
     publication_id, checkpoint, serve_from_publication";

/// SQLite-based [`VersionStore`]
pub struct SqliteVersionStore {
    conn: Mutex<Connection>,
}

impl SqliteVersionStore {
    /// Open (or create) a store at the given path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory SQLite store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// How long to wait for another process's write lock
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn.lock().busy_timeout(timeout)?;
        Ok(())
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS repositories (
                id BLOB PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                domain_id BLOB NOT NULL,
                description TEXT,
                next_version INTEGER NOT NULL,
                retain_repo_versions INTEGER,
                user_hidden INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                UNIQUE (domain_id, name)
            );

            CREATE TABLE IF NOT EXISTS repository_versions (
                id BLOB PRIMARY KEY,
                repository_id BLOB NOT NULL REFERENCES repositories(id),
                number INTEGER NOT NULL,
                complete INTEGER NOT NULL DEFAULT 0,
                base_version_id BLOB REFERENCES repository_versions(id) ON DELETE SET NULL,
                content_ids TEXT,
                info TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                UNIQUE (repository_id, number)
            );

            CREATE TABLE IF NOT EXISTS content (
                id BLOB PRIMARY KEY,
                content_type TEXT NOT NULL,
                domain_id BLOB NOT NULL,
                natural_key TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS repository_content (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repository_id BLOB NOT NULL REFERENCES repositories(id),
                content_id BLOB NOT NULL REFERENCES content(id),
                version_added BLOB NOT NULL REFERENCES repository_versions(id),
                version_removed BLOB REFERENCES repository_versions(id),
                UNIQUE (repository_id, content_id, version_added),
                UNIQUE (repository_id, content_id, version_removed)
            );

            CREATE INDEX IF NOT EXISTS idx_repository_content_added
             ON repository_content(repository_id, version_added);

            CREATE INDEX IF NOT EXISTS idx_repository_content_removed
             ON repository_content(repository_id, version_removed);

            CREATE INDEX IF NOT EXISTS idx_repository_content_content
             ON repository_content(content_id);

            CREATE TABLE IF NOT EXISTS version_content_counts (
                version_id BLOB NOT NULL REFERENCES repository_versions(id),
                count_type TEXT NOT NULL,
                content_type TEXT NOT NULL,
                count INTEGER NOT NULL,
                PRIMARY KEY (version_id, count_type, content_type)
            );

            CREATE TABLE IF NOT EXISTS publications (
                id BLOB PRIMARY KEY,
                repository_version_id BLOB NOT NULL REFERENCES repository_versions(id),
                complete INTEGER NOT NULL,
                checkpoint INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS distributions (
                id BLOB PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                base_path TEXT NOT NULL UNIQUE,
                repository_id BLOB REFERENCES repositories(id),
                repository_version_id BLOB REFERENCES repository_versions(id),
                publication_id BLOB REFERENCES publications(id),
                checkpoint INTEGER NOT NULL DEFAULT 0,
                serve_from_publication INTEGER NOT NULL DEFAULT 0
            );",
        )?;

        debug!("SQLite schema initialized");
        Ok(())
    }
}

impl VersionStore for SqliteVersionStore {
    fn begin(&self) -> Result<Box<dyn LedgerTx + '_>> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| StorageError::transaction("Failed to begin transaction").with_source(e))?;
        Ok(Box::new(SqliteTx {
            conn,
            finished: false,
        }))
    }
}

struct SqliteTx<'s> {
    conn: MutexGuard<'s, Connection>,
    finished: bool,
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "Rollback failed");
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════════════════════════════════════

fn micros(at: &DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(
        value.div_euclid(1_000_000),
        (value.rem_euclid(1_000_000) * 1_000) as u32,
    )
    .unwrap_or_default()
}

fn uuid_value(id: Uuid) -> Value {
    Value::Blob(id.as_bytes().to_vec())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| serde_json::from_str(&t))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        domain_id: row.get(3)?,
        description: row.get(4)?,
        next_version: row.get(5)?,
        retain_repo_versions: row.get(6)?,
        user_hidden: row.get(7)?,
        created_at: from_micros(row.get(8)?),
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<RepositoryVersion> {
    Ok(RepositoryVersion {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        number: row.get(2)?,
        complete: row.get(3)?,
        base_version_id: row.get(4)?,
        content_ids: json_column(row, 5)?,
        info: json_column(row, 6)?.unwrap_or_default(),
        created_at: from_micros(row.get(7)?),
    })
}

fn membership_from_row(row: &Row<'_>) -> rusqlite::Result<RepositoryContent> {
    Ok(RepositoryContent {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        content_id: row.get(2)?,
        version_added: row.get(3)?,
        version_removed: row.get(4)?,
    })
}

fn content_from_row(row: &Row<'_>) -> rusqlite::Result<ContentUnit> {
    Ok(ContentUnit {
        id: row.get(0)?,
        content_type: row.get(1)?,
        domain_id: row.get(2)?,
        natural_key: row.get(3)?,
        created_at: from_micros(row.get(4)?),
    })
}

fn publication_from_row(row: &Row<'_>) -> rusqlite::Result<Publication> {
    Ok(Publication {
        id: row.get(0)?,
        repository_version_id: row.get(1)?,
        complete: row.get(2)?,
        checkpoint: row.get(3)?,
        created_at: from_micros(row.get(4)?),
    })
}

fn distribution_from_row(row: &Row<'_>) -> rusqlite::Result<Distribution> {
    Ok(Distribution {
        id: row.get(0)?,
        name: row.get(1)?,
        base_path: row.get(2)?,
        repository_id: row.get(3)?,
        repository_version_id: row.get(4)?,
        publication_id: row.get(5)?,
        checkpoint: row.get(6)?,
        serve_from_publication: row.get(7)?,
    })
}

impl SqliteTx<'_> {
    /// Run `UPDATE ... WHERE id IN (ids)` with `value` bound first
    fn update_memberships(&mut self, column: &str, value: Value, ids: &[MembershipId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE repository_content SET {} = ? WHERE id IN ({})",
            column,
            placeholders(ids.len())
        );
        let values = std::iter::once(value).chain(ids.iter().map(|id| Value::Integer(*id)));
        match self.conn.execute(&sql, params_from_iter(values)) {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StorageError::new(
                ErrorKind::ConsistencyViolation,
                format!("Duplicate ledger record after updating {}", column),
            )
            .with_source(e)),
            Err(e) => Err(e.into()),
        }
    }
}

impl LedgerTx for SqliteTx<'_> {
    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| StorageError::transaction("Failed to commit transaction").with_source(e))?;
        self.finished = true;
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Repositories
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn insert_repository(&mut self, repo: &Repository) -> Result<()> {
        if self.repository_by_name(&repo.name, repo.domain_id)?.is_some() {
            return Err(StorageError::duplicate_name(&repo.name));
        }
        self.conn.execute(
            &format!(
                "INSERT INTO repositories ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                REPOSITORY_COLUMNS
            ),
            params![
                repo.id,
                repo.name,
                repo.kind,
                repo.domain_id,
                repo.description,
                repo.next_version,
                repo.retain_repo_versions,
                repo.user_hidden,
                micros(&repo.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_repository(&mut self, id: RepositoryId) -> Result<Option<Repository>> {
        let repo = self
            .conn
            .query_row(
                &format!("SELECT {} FROM repositories WHERE id = ?1", REPOSITORY_COLUMNS),
                params![id],
                repository_from_row,
            )
            .optional()?;
        Ok(repo)
    }

    fn repository_by_name(
        &mut self,
        name: &str,
        domain_id: DomainId,
    ) -> Result<Option<Repository>> {
        let repo = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM repositories WHERE name = ?1 AND domain_id = ?2",
                    REPOSITORY_COLUMNS
                ),
                params![name, domain_id],
                repository_from_row,
            )
            .optional()?;
        Ok(repo)
    }

    fn list_repositories(&mut self) -> Result<Vec<Repository>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM repositories ORDER BY name, id",
            REPOSITORY_COLUMNS
        ))?;
        let repos = stmt
            .query_map([], repository_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(repos)
    }

    fn update_repository(&mut self, repo: &Repository) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE repositories
             SET name = ?2, description = ?3, next_version = ?4,
                 retain_repo_versions = ?5, user_hidden = ?6
             WHERE id = ?1",
            params![
                repo.id,
                repo.name,
                repo.description,
                repo.next_version,
                repo.retain_repo_versions,
                repo.user_hidden,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::repository_not_found(repo.id));
        }
        Ok(())
    }

    fn delete_repository(&mut self, id: RepositoryId) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS doomed_versions (id BLOB PRIMARY KEY);
             DELETE FROM temp.doomed_versions;",
        )?;
        self.conn.execute(
            "INSERT INTO temp.doomed_versions SELECT id FROM repository_versions WHERE repository_id = ?1",
            params![id],
        )?;
        self.conn.execute(
            "UPDATE distributions SET repository_id = NULL WHERE repository_id = ?1",
            params![id],
        )?;
        self.conn.execute_batch(
            "UPDATE distributions SET repository_version_id = NULL
              WHERE repository_version_id IN (SELECT id FROM temp.doomed_versions);
             UPDATE distributions SET publication_id = NULL
              WHERE publication_id IN (SELECT id FROM publications
                WHERE repository_version_id IN (SELECT id FROM temp.doomed_versions));
             DELETE FROM publications
              WHERE repository_version_id IN (SELECT id FROM temp.doomed_versions);
             DELETE FROM version_content_counts
              WHERE version_id IN (SELECT id FROM temp.doomed_versions);",
        )?;
        self.conn.execute(
            "DELETE FROM repository_content WHERE repository_id = ?1",
            params![id],
        )?;
        self.conn.execute(
            "UPDATE repository_versions SET base_version_id = NULL WHERE repository_id = ?1",
            params![id],
        )?;
        self.conn.execute(
            "DELETE FROM repository_versions WHERE repository_id = ?1",
            params![id],
        )?;
        self.conn
            .execute("DELETE FROM repositories WHERE id = ?1", params![id])?;
        self.conn.execute_batch("DELETE FROM temp.doomed_versions;")?;
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Versions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn insert_version(&mut self, version: &RepositoryVersion) -> Result<()> {
        let content_ids = version
            .content_ids
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            &format!(
                "INSERT INTO repository_versions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                VERSION_COLUMNS
            ),
            params![
                version.id,
                version.repository_id,
                version.number,
                version.complete,
                version.base_version_id,
                content_ids,
                serde_json::to_string(&version.info)?,
                micros(&version.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_version(&mut self, id: VersionId) -> Result<Option<RepositoryVersion>> {
        let version = self
            .conn
            .query_row(
                &format!("SELECT {} FROM repository_versions WHERE id = ?1", VERSION_COLUMNS),
                params![id],
                version_from_row,
            )
            .optional()?;
        Ok(version)
    }

    fn version_by_number(
        &mut self,
        repository_id: RepositoryId,
        number: u32,
    ) -> Result<Option<RepositoryVersion>> {
        let version = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM repository_versions WHERE repository_id = ?1 AND number = ?2",
                    VERSION_COLUMNS
                ),
                params![repository_id, number],
                version_from_row,
            )
            .optional()?;
        Ok(version)
    }

    fn list_versions(&mut self, repository_id: RepositoryId) -> Result<Vec<RepositoryVersion>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM repository_versions WHERE repository_id = ?1 ORDER BY number",
            VERSION_COLUMNS
        ))?;
        let versions = stmt
            .query_map(params![repository_id], version_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    fn update_version(&mut self, version: &RepositoryVersion) -> Result<()> {
        let content_ids = version
            .content_ids
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let changed = self.conn.execute(
            "UPDATE repository_versions
             SET complete = ?2, base_version_id = ?3, content_ids = ?4, info = ?5
             WHERE id = ?1",
            params![
                version.id,
                version.complete,
                version.base_version_id,
                content_ids,
                serde_json::to_string(&version.info)?,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::version_not_found(version));
        }
        Ok(())
    }

    fn delete_version(&mut self, id: VersionId) -> Result<()> {
        self.conn.execute(
            "UPDATE distributions SET repository_version_id = NULL WHERE repository_version_id = ?1",
            params![id],
        )?;
        self.conn.execute(
            "UPDATE distributions SET publication_id = NULL
             WHERE publication_id IN (SELECT id FROM publications WHERE repository_version_id = ?1)",
            params![id],
        )?;
        self.conn.execute(
            "DELETE FROM publications WHERE repository_version_id = ?1",
            params![id],
        )?;
        self.conn.execute(
            "DELETE FROM version_content_counts WHERE version_id = ?1",
            params![id],
        )?;
        self.conn.execute(
            "DELETE FROM repository_versions WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Content catalog
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn insert_content(&mut self, units: &[ContentUnit]) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO content (id, content_type, domain_id, natural_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for unit in units {
            stmt.execute(params![
                unit.id,
                unit.content_type,
                unit.domain_id,
                unit.natural_key,
                micros(&unit.created_at),
            ])?;
        }
        Ok(())
    }

    fn content_units(&mut self, ids: &[ContentId]) -> Result<Vec<ContentUnit>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, content_type, domain_id, natural_key, created_at
             FROM content WHERE id IN ({}) ORDER BY id",
            placeholders(ids.len())
        ))?;
        let units = stmt
            .query_map(params_from_iter(ids.iter()), content_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(units)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Ledger
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn insert_memberships(
        &mut self,
        repository_id: RepositoryId,
        version_added: VersionId,
        content_ids: &[ContentId],
    ) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO repository_content (repository_id, content_id, version_added)
             VALUES (?1, ?2, ?3)",
        )?;
        for content_id in content_ids {
            match stmt.execute(params![repository_id, content_id, version_added]) {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(
                        StorageError::duplicate_membership(repository_id, content_id).with_source(e)
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn memberships(
        &mut self,
        repository_id: RepositoryId,
        filter: &MembershipFilter<'_>,
    ) -> Result<Vec<RepositoryContent>> {
        let mut sql = format!(
            "SELECT {} FROM repository_content WHERE repository_id = ?",
            MEMBERSHIP_COLUMNS
        );
        let mut values = vec![uuid_value(repository_id)];

        if let Some(added) = filter.added_by {
            sql.push_str(" AND version_added = ?");
            values.push(uuid_value(added));
        }
        if let Some(removed) = filter.removed_by {
            sql.push_str(" AND version_removed = ?");
            values.push(uuid_value(removed));
        }
        if filter.open_only {
            sql.push_str(" AND version_removed IS NULL");
        }
        if let Some(ids) = filter.content_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(" AND content_id IN ({})", placeholders(ids.len())));
            values.extend(ids.iter().copied().map(uuid_value));
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values.iter()), membership_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn memberships_for_content(&mut self, ids: &[ContentId]) -> Result<Vec<RepositoryContent>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM repository_content WHERE content_id IN ({}) ORDER BY id",
            MEMBERSHIP_COLUMNS,
            placeholders(ids.len())
        ))?;
        let records = stmt
            .query_map(params_from_iter(ids.iter()), membership_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn delete_memberships(&mut self, ids: &[MembershipId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.conn.execute(
            &format!(
                "DELETE FROM repository_content WHERE id IN ({})",
                placeholders(ids.len())
            ),
            params_from_iter(ids.iter()),
        )?;
        Ok(())
    }

    fn set_version_added(&mut self, ids: &[MembershipId], version_id: VersionId) -> Result<()> {
        self.update_memberships("version_added", uuid_value(version_id), ids)
    }

    fn set_version_removed(
        &mut self,
        ids: &[MembershipId],
        version_id: Option<VersionId>,
    ) -> Result<()> {
        let value = version_id.map(uuid_value).unwrap_or(Value::Null);
        self.update_memberships("version_removed", value, ids)
    }

    fn count_references(&mut self, version_id: VersionId) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM repository_content
             WHERE version_added = ?1 OR version_removed = ?1",
            params![version_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn content_at(&mut self, repository_id: RepositoryId, number: u32) -> Result<Vec<ContentId>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT rc.content_id
             FROM repository_content rc
             JOIN repository_versions va ON va.id = rc.version_added
             LEFT JOIN repository_versions vr ON vr.id = rc.version_removed
             WHERE rc.repository_id = ?1
               AND va.number <= ?2
               AND (rc.version_removed IS NULL OR vr.number > ?2)
             ORDER BY rc.content_id",
        )?;
        let ids = stmt
            .query_map(params![repository_id, number], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Count summaries
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn replace_counts(&mut self, version_id: VersionId, counts: &[ContentCount]) -> Result<()> {
        self.conn.execute(
            "DELETE FROM version_content_counts WHERE version_id = ?1",
            params![version_id],
        )?;
        let mut stmt = self.conn.prepare(
            "INSERT INTO version_content_counts (version_id, count_type, content_type, count)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for count in counts {
            stmt.execute(params![
                version_id,
                count.count_type.code(),
                count.content_type,
                count.count as i64,
            ])?;
        }
        Ok(())
    }

    fn counts(&mut self, version_id: VersionId) -> Result<Vec<ContentCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT count_type, content_type, count FROM version_content_counts
             WHERE version_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![version_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = Vec::with_capacity(rows.len());
        for (code, content_type, count) in rows {
            let count_type = CountType::from_code(&code).ok_or_else(|| {
                StorageError::serialization(format!("Unknown count type code: {}", code))
            })?;
            counts.push(ContentCount {
                version_id,
                count_type,
                content_type,
                count: count as u64,
            });
        }
        counts.sort();
        Ok(counts)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Publications & distributions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn insert_publication(&mut self, publication: &Publication) -> Result<()> {
        if self.get_version(publication.repository_version_id)?.is_none() {
            return Err(StorageError::version_not_found(
                publication.repository_version_id,
            ));
        }
        self.conn.execute(
            "INSERT INTO publications (id, repository_version_id, complete, checkpoint, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                publication.id,
                publication.repository_version_id,
                publication.complete,
                publication.checkpoint,
                micros(&publication.created_at),
            ],
        )?;
        Ok(())
    }

    fn publications(&mut self, repository_id: RepositoryId) -> Result<Vec<Publication>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.repository_version_id, p.complete, p.checkpoint, p.created_at
             FROM publications p
             JOIN repository_versions v ON v.id = p.repository_version_id
             WHERE v.repository_id = ?1
             ORDER BY p.created_at, p.id",
        )?;
        let publications = stmt
            .query_map(params![repository_id], publication_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(publications)
    }

    fn insert_distribution(&mut self, distribution: &Distribution) -> Result<()> {
        let taken: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM distributions WHERE base_path = ?1 OR name = ?2",
            params![distribution.base_path, distribution.name],
            |row| row.get(0),
        )?;
        if taken > 0 {
            return Err(StorageError::duplicate_name(&distribution.base_path));
        }
        self.conn.execute(
            &format!(
                "INSERT INTO distributions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                DISTRIBUTION_COLUMNS
            ),
            params![
                distribution.id,
                distribution.name,
                distribution.base_path,
                distribution.repository_id,
                distribution.repository_version_id,
                distribution.publication_id,
                distribution.checkpoint,
                distribution.serve_from_publication,
            ],
        )?;
        Ok(())
    }

    fn delete_distribution(&mut self, id: Uuid) -> Result<()> {
        self.conn
            .execute("DELETE FROM distributions WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn distributions(&mut self, repository_id: RepositoryId) -> Result<Vec<Distribution>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM distributions
             WHERE repository_id = ?1
                OR repository_version_id IN
                   (SELECT id FROM repository_versions WHERE repository_id = ?1)
                OR publication_id IN
                   (SELECT p.id FROM publications p
                    JOIN repository_versions v ON v.id = p.repository_version_id
                    WHERE v.repository_id = ?1)
             ORDER BY name",
            DISTRIBUTION_COLUMNS
        ))?;
        let distributions = stmt
            .query_map(params![repository_id], distribution_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(distributions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_micros_round_trip() {
        let at = DateTime::from_timestamp(1_700_000_000, 123_456_000).unwrap();
        assert_eq!(from_micros(micros(&at)), at);
    }

    #[test]
    fn test_uncommitted_transaction_rolls_back() {
        let store = SqliteVersionStore::in_memory().unwrap();
        let repo = Repository::new("files", "file.file");
        {
            let mut tx = store.begin().unwrap();
            tx.insert_repository(&repo).unwrap();
        }
        let mut tx = store.begin().unwrap();
        assert!(tx.get_repository(repo.id).unwrap().is_none());
    }

    #[test]
    fn test_version_snapshot_round_trip() {
        let store = SqliteVersionStore::in_memory().unwrap();
        let repo = Repository::new("files", "file.file");
        let mut version = RepositoryVersion::new(repo.id, 0);
        version.content_ids = Some([Uuid::new_v4(), Uuid::new_v4()].into_iter().collect());
        version.info = serde_json::json!({"origin": "sync"});

        let mut tx = store.begin().unwrap();
        tx.insert_repository(&repo).unwrap();
        tx.insert_version(&version).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        let loaded = tx.get_version(version.id).unwrap().unwrap();
        assert_eq!(loaded.content_ids, version.content_ids);
        assert_eq!(loaded.info, version.info);
        assert!(!loaded.complete);
    }

    #[test]
    fn test_membership_filter_sql() {
        let store = SqliteVersionStore::in_memory().unwrap();
        let repo = Repository::new("files", "file.file");
        let v0 = RepositoryVersion::new(repo.id, 0);
        let v1 = RepositoryVersion::new(repo.id, 1);
        let a = ContentUnit::new("file.file");
        let b = ContentUnit::new("file.file");

        let mut tx = store.begin().unwrap();
        tx.insert_repository(&repo).unwrap();
        tx.insert_version(&v0).unwrap();
        tx.insert_version(&v1).unwrap();
        tx.insert_content(&[a.clone(), b.clone()]).unwrap();
        tx.insert_memberships(repo.id, v0.id, &[a.id, b.id]).unwrap();

        let only_a = [a.id];
        let records = tx
            .memberships(repo.id, &MembershipFilter::open().with_content(&only_a))
            .unwrap();
        assert_eq!(records.len(), 1);

        tx.set_version_removed(&[records[0].id], Some(v1.id)).unwrap();
        assert_eq!(tx.content_at(repo.id, 0).unwrap().len(), 2);
        assert_eq!(tx.content_at(repo.id, 1).unwrap(), vec![b.id]);
        assert_eq!(
            tx.memberships(repo.id, &MembershipFilter::removed_by(v1.id))
                .unwrap()
                .len(),
            1
        );
        assert_eq!(tx.count_references(v0.id).unwrap(), 2);
    }

    #[test]
    fn test_duplicate_ledger_keys_rejected() {
        let store = SqliteVersionStore::in_memory().unwrap();
        let repo = Repository::new("files", "file.file");
        let v0 = RepositoryVersion::new(repo.id, 0);
        let v1 = RepositoryVersion::new(repo.id, 1);
        let v2 = RepositoryVersion::new(repo.id, 2);
        let unit = ContentUnit::new("file.file");

        let mut tx = store.begin().unwrap();
        tx.insert_repository(&repo).unwrap();
        for version in [&v0, &v1, &v2] {
            tx.insert_version(version).unwrap();
        }
        tx.insert_content(&[unit.clone()]).unwrap();
        tx.insert_memberships(repo.id, v0.id, &[unit.id]).unwrap();

        let err = tx
            .insert_memberships(repo.id, v0.id, &[unit.id])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConsistencyViolation);

        tx.insert_memberships(repo.id, v1.id, &[unit.id]).unwrap();
        let ids: Vec<MembershipId> = tx
            .memberships(repo.id, &MembershipFilter::default())
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids.len(), 2);
        let err = tx.set_version_removed(&ids, Some(v2.id)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConsistencyViolation);
        let err = tx.set_version_added(&ids, v2.id).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConsistencyViolation);

        assert_eq!(tx.memberships(repo.id, &MembershipFilter::open()).unwrap().len(), 2);
        assert_eq!(tx.count_references(v2.id).unwrap(), 0);
    }
}
