//! Host content-store boundary: typed records and the generic read/update
//! interface the engine uses to reach arbitrarily-shaped content tables.
//!
//! The engine never assumes anything about a host table beyond an integer
//! `id` primary key and named columns. Dialect concerns (pattern matching,
//! schema introspection) live entirely inside the `ContentStore`
//! implementation.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::schema::JoinPath;

/// A typed view of one host row: explicit field projection, no reflection.
#[derive(Debug, Clone)]
pub struct Record {
    pub table: String,
    pub id: i64,
    /// Column values as text; NULL and binary columns project to `None`
    pub fields: BTreeMap<String, Option<String>>,
}

impl Record {
    /// Project a field by name; `None` when absent or NULL.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_deref())
    }
}

/// Column metadata returned by introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
}

impl ColumnInfo {
    /// Whether the declared type can hold translatable text.
    pub fn is_text_like(&self) -> bool {
        let ty = self.type_name.to_ascii_uppercase();
        ty.contains("TEXT") || ty.contains("CHAR") || ty.contains("CLOB")
    }
}

/// Generic relational interface onto the host content storage.
pub trait ContentStore: Send + Sync {
    /// Table names matching a `LIKE` pattern (e.g. `course%`).
    fn list_tables_matching(&self, pattern: &str) -> Result<Vec<String>>;

    /// Column metadata for one table.
    fn introspect_columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Fetch one record by id.
    fn get_record(&self, table: &str, id: i64) -> Result<Option<Record>>;

    /// Fetch a batch of records ordered by id.
    fn get_records(&self, table: &str, offset: u64, limit: u64) -> Result<Vec<Record>>;

    /// Fetch secondary-table rows related to one primary record through the
    /// declared foreign-key chain.
    fn get_related_records(
        &self,
        table: &str,
        path: &JoinPath,
        primary_id: i64,
    ) -> Result<Vec<Record>>;

    /// Write one field value back to the host row.
    fn update_field(&self, table: &str, id: i64, field: &str, value: &str) -> Result<()>;
}

/// Validate an identifier before splicing it into SQL. Identifiers come from
/// configuration and schema introspection, never from end users, but a typo
/// must fail loudly rather than produce broken SQL.
fn ident(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid {
        bail!("Invalid SQL identifier: '{}'", name);
    }
    Ok(name)
}

/// SQLite-backed host content store.
#[derive(Clone)]
pub struct SqliteContentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteContentStore {
    /// Open (or create) the host content database.
    pub fn open(database_path: &str) -> Result<Self> {
        let conn = Connection::open(database_path)
            .context(format!("Failed to open content database at {}", database_path))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Read every column of the current row into a Record.
    fn row_to_record(
        table: &str,
        columns: &[String],
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<Record> {
        let mut fields = BTreeMap::new();
        let mut id: i64 = 0;

        for (idx, name) in columns.iter().enumerate() {
            let value = match row.get_ref(idx)? {
                rusqlite::types::ValueRef::Null => None,
                rusqlite::types::ValueRef::Integer(v) => {
                    if name == "id" {
                        id = v;
                    }
                    Some(v.to_string())
                }
                rusqlite::types::ValueRef::Real(v) => Some(v.to_string()),
                rusqlite::types::ValueRef::Text(t) => {
                    Some(String::from_utf8_lossy(t).into_owned())
                }
                // Binary columns are never translatable
                rusqlite::types::ValueRef::Blob(_) => None,
            };
            fields.insert(name.clone(), value);
        }

        Ok(Record {
            table: table.to_string(),
            id,
            fields,
        })
    }

    fn query_records(
        &self,
        table: &str,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Record>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(sql)
            .context(format!("Failed to prepare query against '{}'", table))?;

        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let records = stmt
            .query_map(params, |row| Self::row_to_record(table, &columns, row))?
            .collect::<Result<Vec<_>, _>>()
            .context(format!("Failed to read rows from '{}'", table))?;

        Ok(records)
    }
}

impl ContentStore for SqliteContentStore {
    fn list_tables_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE ?1 ORDER BY name",
        )?;

        let names = stmt
            .query_map([pattern], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list tables")?;

        Ok(names)
    }

    fn introspect_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let table = ident(table)?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;

        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    type_name: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context(format!("Failed to introspect columns of '{}'", table))?;

        if columns.is_empty() {
            bail!("Table '{}' does not exist", table);
        }

        Ok(columns)
    }

    fn get_record(&self, table: &str, id: i64) -> Result<Option<Record>> {
        let table = ident(table)?;
        let sql = format!("SELECT * FROM {} WHERE id = ?1", table);
        let mut records = self.query_records(table, &sql, &[&id as &dyn rusqlite::ToSql])?;

        Ok(if records.is_empty() {
            None
        } else {
            Some(records.remove(0))
        })
    }

    fn get_records(&self, table: &str, offset: u64, limit: u64) -> Result<Vec<Record>> {
        let table = ident(table)?;
        let sql = format!("SELECT * FROM {} ORDER BY id LIMIT ?1 OFFSET ?2", table);
        let limit = limit as i64;
        let offset = offset as i64;
        self.query_records(table, &sql, &[&limit as &dyn rusqlite::ToSql, &offset])
    }

    fn get_related_records(
        &self,
        table: &str,
        path: &JoinPath,
        primary_id: i64,
    ) -> Result<Vec<Record>> {
        let table = ident(table)?;

        let sql = match path {
            JoinPath::Direct { fk_column } => format!(
                "SELECT s.* FROM {table} s WHERE s.{fk} = ?1 ORDER BY s.id",
                table = table,
                fk = ident(fk_column)?,
            ),
            JoinPath::Parent {
                parent_table,
                parent_fk,
                primary_fk,
            } => format!(
                "SELECT s.* FROM {table} s \
                 JOIN {parent} p ON p.id = s.{parent_fk} \
                 WHERE p.{primary_fk} = ?1 ORDER BY s.id",
                table = table,
                parent = ident(parent_table)?,
                parent_fk = ident(parent_fk)?,
                primary_fk = ident(primary_fk)?,
            ),
            JoinPath::Grandparent {
                parent_table,
                parent_fk,
                grandparent_table,
                grandparent_fk,
                primary_fk,
            } => format!(
                "SELECT s.* FROM {table} s \
                 JOIN {parent} p ON p.id = s.{parent_fk} \
                 JOIN {grandparent} g ON g.id = p.{grandparent_fk} \
                 WHERE g.{primary_fk} = ?1 ORDER BY s.id",
                table = table,
                parent = ident(parent_table)?,
                parent_fk = ident(parent_fk)?,
                grandparent = ident(grandparent_table)?,
                grandparent_fk = ident(grandparent_fk)?,
                primary_fk = ident(primary_fk)?,
            ),
        };

        self.query_records(table, &sql, &[&primary_id as &dyn rusqlite::ToSql])
    }

    fn update_field(&self, table: &str, id: i64, field: &str, value: &str) -> Result<()> {
        let table = ident(table)?;
        let field = ident(field)?;
        let conn = self.conn.lock().unwrap();

        let updated = conn
            .execute(
                &format!("UPDATE {} SET {} = ?1 WHERE id = ?2", table, field),
                rusqlite::params![value, id],
            )
            .context(format!("Failed to update {}.{}", table, field))?;

        if updated == 0 {
            bail!("No row with id {} in '{}'", id, table);
        }

        Ok(())
    }
}
