//! Translation store: CRUD over (hash, language) records, the scope-mapping
//! table, and staleness computation.
//!
//! The store owns the TranslationRecord and ScopeMapping lifecycles
//! exclusively; the tagging orchestrator and the resolution engine route all
//! persistence through the upsert contract here. Multi-statement sequences
//! run inside one transaction; partial failure rolls back entirely and the
//! caller treats the fragment as untagged for that request.
//!
//! A partial unique index on source text closes the concurrent-allocation
//! race: the second writer of identical text hits the constraint, re-fetches
//! the winner's hash and carries on with it.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::cache::TaggingCache;
use crate::i18n::OTHER_CODE;

/// Structural granularity a fragment was tagged at. Inherited by all
/// language variants of a hash from its `other` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    Installation,
    Collection,
    Section,
    Item,
    Block,
}

impl ScopeLevel {
    /// Stable integer code persisted in the store.
    pub fn code(self) -> i64 {
        match self {
            ScopeLevel::Installation => 10,
            ScopeLevel::Collection => 50,
            ScopeLevel::Section => 60,
            ScopeLevel::Item => 70,
            ScopeLevel::Block => 80,
        }
    }

    pub fn from_code(code: i64) -> Result<ScopeLevel> {
        Ok(match code {
            10 => ScopeLevel::Installation,
            50 => ScopeLevel::Collection,
            60 => ScopeLevel::Section,
            70 => ScopeLevel::Item,
            80 => ScopeLevel::Block,
            _ => bail!("Unknown scope level code: {}", code),
        })
    }
}

/// One language variant of one canonical fragment.
#[derive(Debug, Clone)]
pub struct TranslationRecord {
    pub id: i64,
    pub hash: String,
    pub language: String,
    pub text: String,
    pub scope_level: ScopeLevel,
    pub is_human_edited: bool,
    pub created_at: i64,
    pub modified_at: i64,
    pub reviewed_at: i64,
}

/// Timestamps are unix milliseconds; 0 means "never" for `reviewed_at`.
fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Whether an error is the source-text unique constraint firing, i.e. a
/// concurrent writer already inserted a source record for the same text.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[derive(Clone)]
pub struct TranslationStore {
    conn: Arc<Mutex<Connection>>,
    cache: Arc<dyn TaggingCache>,
}

impl TranslationStore {
    /// Open the translation database, creating tables on first use.
    pub fn new(database_path: &str, cache: Arc<dyn TaggingCache>) -> Result<Self> {
        let conn = Connection::open(database_path).context(format!(
            "Failed to open translation database at {}",
            database_path
        ))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS translations (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                hash            TEXT    NOT NULL,
                language        TEXT    NOT NULL,
                text            TEXT    NOT NULL,
                scope_level     INTEGER NOT NULL,
                is_human_edited INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL,
                modified_at     INTEGER NOT NULL,
                reviewed_at     INTEGER NOT NULL DEFAULT 0,
                UNIQUE (hash, language)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS uq_source_text
                ON translations (text) WHERE language = 'other';
            CREATE TABLE IF NOT EXISTS scope_mappings (
                hash     TEXT    NOT NULL,
                scope_id INTEGER NOT NULL,
                PRIMARY KEY (hash, scope_id)
            );",
        )
        .context("Failed to create translation tables")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cache,
        })
    }

    // ==================== Reads ====================

    /// Fetch one record by (hash, language).
    pub fn get(&self, hash: &str, language: &str) -> Result<Option<TranslationRecord>> {
        let conn = self.conn.lock().unwrap();
        Self::get_conn(&conn, hash, language)
    }

    /// Fetch the source (`other`) record for a hash.
    pub fn get_source(&self, hash: &str) -> Result<Option<TranslationRecord>> {
        self.get(hash, OTHER_CODE)
    }

    /// Whether any record exists for this hash (collision check).
    pub fn hash_exists(&self, hash: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM translations WHERE hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Find the hash of an existing source record with the same trimmed
    /// text. Ties resolve to the lowest row id.
    pub fn find_source_by_text(&self, source_text: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        Self::find_source_by_text_conn(&conn, source_text)
    }

    /// All hashes mapped to a scope: the scope listing query surface.
    pub fn hashes_in_scope(&self, scope_id: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT hash FROM scope_mappings WHERE scope_id = ?1 ORDER BY hash")?;

        let hashes = stmt
            .query_map(params![scope_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list scope hashes")?;

        Ok(hashes)
    }

    /// Staleness, one formula system-wide: a translation needs re-review
    /// when its own review lags its modification, or when it is older than
    /// the source record.
    ///
    /// Missing records are never stale; a missing translation is served via
    /// the fallback chain instead.
    pub fn is_stale(&self, hash: &str, language: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let target = match Self::get_conn(&conn, hash, language)? {
            Some(record) => record,
            None => return Ok(false),
        };
        let source = match Self::get_conn(&conn, hash, OTHER_CODE)? {
            Some(record) => record,
            None => return Ok(false),
        };

        Ok(target.reviewed_at < target.modified_at || target.modified_at < source.modified_at)
    }

    // ==================== Writes ====================

    /// Insert or update the `other` record for a hash.
    ///
    /// On update the text is replaced and `modified_at` advances only when
    /// the trimmed text actually changed; `reviewed_at` is set only when
    /// previously zero (first review baseline).
    pub fn upsert_source(&self, hash: &str, text: &str, scope_level: ScopeLevel) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            Self::upsert_record_conn(&conn, hash, OTHER_CODE, text, scope_level.code(), true)?;
        }
        self.cache.invalidate(hash);
        Ok(())
    }

    /// Insert or update a non-source language record. The scope level is
    /// not independently settable: it is inherited from the source record,
    /// which must already exist.
    pub fn upsert_translation(
        &self,
        hash: &str,
        language: &str,
        text: &str,
        is_human: bool,
    ) -> Result<()> {
        if language == OTHER_CODE {
            bail!("Use upsert_source for the source language record");
        }

        {
            let conn = self.conn.lock().unwrap();
            let source = Self::get_conn(&conn, hash, OTHER_CODE)?
                .context(format!("No source record for hash '{}'", hash))?;
            Self::upsert_record_conn(
                &conn,
                hash,
                language,
                text,
                source.scope_level.code(),
                is_human,
            )?;
        }
        self.cache.invalidate(hash);
        Ok(())
    }

    /// Idempotent insert of a (hash, scope) association.
    pub fn add_scope_mapping(&self, hash: &str, scope_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::add_scope_mapping_conn(&conn, hash, scope_id)
    }

    /// Flag every non-source record of the given hashes for re-review:
    /// `modified_at` advances, `reviewed_at` is baselined to the record's
    /// previous `modified_at` only when previously zero, and the scope
    /// level follows the source so variants stay uniform. The source
    /// (`other`) records are never touched.
    pub fn mark_stale(&self, hashes: &[String], scope_level: ScopeLevel) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }

        {
            let conn = self.conn.lock().unwrap();
            let now = now_millis();

            for hash in hashes {
                // modified_at advances strictly, even within one clock tick
                conn.execute(
                    "UPDATE translations
                     SET reviewed_at = CASE WHEN reviewed_at = 0 THEN modified_at ELSE reviewed_at END,
                         modified_at = CASE WHEN ?1 > modified_at THEN ?1 ELSE modified_at + 1 END,
                         scope_level = ?2
                     WHERE hash = ?3 AND language != ?4",
                    params![now, scope_level.code(), hash, OTHER_CODE],
                )
                .context("Failed to mark translations stale")?;
            }
        }

        for hash in hashes {
            self.cache.invalidate(hash);
        }
        Ok(())
    }

    /// Persist one freshly tagged fragment atomically: source record, any
    /// inline-discovered language variants, and the scope mapping, all in a
    /// single transaction.
    ///
    /// Returns the hash that ended up owning the text. When a concurrent
    /// writer already inserted a source record for the same trimmed text,
    /// the unique index fires, the transaction rolls back, and the winner's
    /// hash is returned instead of the caller's candidate.
    pub fn persist_tagging(
        &self,
        hash: &str,
        source_text: &str,
        translations: &BTreeMap<String, String>,
        scope_level: ScopeLevel,
        scope_id: Option<i64>,
    ) -> Result<String> {
        let persisted = {
            let conn = self.conn.lock().unwrap();

            match Self::persist_tagging_conn(
                &conn,
                hash,
                source_text,
                translations,
                scope_level,
                scope_id,
            ) {
                Ok(()) => hash.to_string(),
                Err(e) => {
                    let lost_race = e
                        .downcast_ref::<rusqlite::Error>()
                        .map(is_unique_violation)
                        .unwrap_or(false);
                    if !lost_race {
                        return Err(e);
                    }

                    // Someone else just inserted this text: adopt their hash
                    let winner = Self::find_source_by_text_conn(&conn, source_text)?
                        .context("Unique violation without a matching source record")?;
                    debug!(loser = %hash, winner = %winner, "Lost allocation race, reusing hash");

                    Self::persist_tagging_conn(
                        &conn,
                        &winner,
                        source_text,
                        translations,
                        scope_level,
                        scope_id,
                    )?;
                    winner
                }
            }
        };

        self.cache.invalidate(&persisted);
        Ok(persisted)
    }

    // ==================== Connection-level helpers ====================

    fn get_conn(
        conn: &Connection,
        hash: &str,
        language: &str,
    ) -> Result<Option<TranslationRecord>> {
        let mut stmt = conn.prepare(
            "SELECT id, hash, language, text, scope_level, is_human_edited,
                    created_at, modified_at, reviewed_at
             FROM translations WHERE hash = ?1 AND language = ?2",
        )?;

        let record = stmt
            .query_row(params![hash, language], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, i64>(8)?,
                ))
            })
            .optional()?;

        match record {
            Some((id, hash, language, text, level, human, created, modified, reviewed)) => {
                Ok(Some(TranslationRecord {
                    id,
                    hash,
                    language,
                    text,
                    scope_level: ScopeLevel::from_code(level)?,
                    is_human_edited: human != 0,
                    created_at: created,
                    modified_at: modified,
                    reviewed_at: reviewed,
                }))
            }
            None => Ok(None),
        }
    }

    fn find_source_by_text_conn(conn: &Connection, source_text: &str) -> Result<Option<String>> {
        let hash = conn
            .query_row(
                "SELECT hash FROM translations
                 WHERE language = ?1 AND text = ?2
                 ORDER BY id LIMIT 1",
                params![OTHER_CODE, source_text.trim()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("Failed to look up source by text")?;

        Ok(hash)
    }

    fn add_scope_mapping_conn(conn: &Connection, hash: &str, scope_id: i64) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO scope_mappings (hash, scope_id) VALUES (?1, ?2)",
            params![hash, scope_id],
        )
        .context("Failed to add scope mapping")?;
        Ok(())
    }

    /// Shared insert-or-update for one (hash, language) record.
    fn upsert_record_conn(
        conn: &Connection,
        hash: &str,
        language: &str,
        text: &str,
        scope_code: i64,
        is_human: bool,
    ) -> Result<()> {
        let text = text.trim();
        let now = now_millis();

        let existing = Self::get_conn(conn, hash, language)?;
        match existing {
            Some(record) => {
                if record.text == text {
                    return Ok(());
                }
                // modified_at advances strictly, even within one clock tick;
                // a zero reviewed_at is baselined to the new modified_at
                conn.execute(
                    "UPDATE translations
                     SET text = ?1,
                         modified_at = CASE WHEN ?2 > modified_at THEN ?2 ELSE modified_at + 1 END,
                         reviewed_at = CASE WHEN reviewed_at = 0
                             THEN (CASE WHEN ?2 > modified_at THEN ?2 ELSE modified_at + 1 END)
                             ELSE reviewed_at END,
                         is_human_edited = ?3,
                         scope_level = ?4
                     WHERE hash = ?5 AND language = ?6",
                    params![text, now, is_human as i64, scope_code, hash, language],
                )
                .context(format!("Failed to update ({}, {})", hash, language))?;
            }
            None => {
                conn.execute(
                    "INSERT INTO translations
                         (hash, language, text, scope_level, is_human_edited,
                          created_at, modified_at, reviewed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?6)",
                    params![hash, language, text, scope_code, is_human as i64, now],
                )
                .context(format!("Failed to insert ({}, {})", hash, language))?;
            }
        }

        Ok(())
    }

    /// The transactional unit behind `persist_tagging`. Raw rusqlite unique
    /// violations surface to the caller for lost-race detection.
    fn persist_tagging_conn(
        conn: &Connection,
        hash: &str,
        source_text: &str,
        translations: &BTreeMap<String, String>,
        scope_level: ScopeLevel,
        scope_id: Option<i64>,
    ) -> Result<()> {
        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])?;

        let result = (|| -> Result<()> {
            Self::upsert_record_conn(
                conn,
                hash,
                OTHER_CODE,
                source_text,
                scope_level.code(),
                true,
            )?;
            for (language, text) in translations {
                Self::upsert_record_conn(conn, hash, language, text, scope_level.code(), true)?;
            }
            if let Some(scope_id) = scope_id {
                Self::add_scope_mapping_conn(conn, hash, scope_id)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
                Ok(())
            }
            Err(e) => {
                conn.execute("ROLLBACK", [])?;
                Err(e)
            }
        }
    }
}
