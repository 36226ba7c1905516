//! Schema discovery: find the tables and fields carrying translatable text
//! for a named content type.
//!
//! Discovery enumerates host tables prefixed by the content-type name,
//! filters columns through an explicit include/exclude field-name policy,
//! and resolves how each secondary table reaches the primary one. Only the
//! trivial direct foreign key is inferred heuristically; one- and two-hop
//! chains must be declared explicitly, because FK heuristics cannot safely
//! reconstruct deep joins.
//!
//! Results are immutable snapshots cached per content type; callers replace
//! a snapshot by invalidating, never by mutating.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::record::{ColumnInfo, ContentStore};

/// How a secondary table reaches the primary table of its content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JoinPath {
    /// `secondary.<fk_column> = primary.id`
    Direct { fk_column: String },

    /// `secondary.<parent_fk> = parent.id`, `parent.<primary_fk> = primary.id`
    Parent {
        parent_table: String,
        parent_fk: String,
        primary_fk: String,
    },

    /// Two intermediate hops: secondary -> parent -> grandparent -> primary
    Grandparent {
        parent_table: String,
        parent_fk: String,
        grandparent_table: String,
        grandparent_fk: String,
        primary_fk: String,
    },
}

/// One secondary table carrying translatable fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryTable {
    pub table: String,
    pub fields: Vec<String>,
    pub path: JoinPath,
}

/// An explicitly declared relationship, supplied by configuration for the
/// multi-hop cases heuristics must not guess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclaredRelationship {
    pub content_type: String,
    pub table: String,
    /// Fields to tag; when omitted the include/exclude policy decides
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    pub path: JoinPath,
}

/// The set of (table, field) pairs eligible for tagging under one content
/// type. Recomputable at any time from the live host schema; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub content_type: String,
    pub primary_table: String,
    pub primary_fields: Vec<String>,
    pub secondaries: Vec<SecondaryTable>,
}

/// Static include/exclude field-name policy. The include list keeps tagging
/// away from columns that merely look texty; the exclude list defends
/// against secrets, serialized configuration and machine metadata.
#[derive(Debug, Clone)]
pub struct FieldPolicy {
    pub include: HashSet<String>,
    pub exclude: HashSet<String>,
    pub table_denylist: HashSet<String>,
}

impl Default for FieldPolicy {
    fn default() -> Self {
        let include = [
            "name",
            "fullname",
            "shortname",
            "title",
            "summary",
            "intro",
            "description",
            "content",
            "text",
            "message",
            "label",
            "feedback",
            "instructions",
        ];
        let exclude = [
            "password", "secret", "token", "salt", "config", "configdata", "metadata", "format",
            "path", "url", "ip", "component",
        ];

        Self {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            table_denylist: HashSet::new(),
        }
    }
}

impl FieldPolicy {
    fn allows(&self, field: &str) -> bool {
        self.include.contains(field) && !self.exclude.contains(field)
    }
}

/// Discovers and caches field schemas against a host content store.
pub struct SchemaDiscovery {
    host: Arc<dyn ContentStore>,
    policy: FieldPolicy,
    declared: Vec<DeclaredRelationship>,
    cache: Mutex<HashMap<String, Arc<FieldSchema>>>,
}

impl SchemaDiscovery {
    pub fn new(
        host: Arc<dyn ContentStore>,
        policy: FieldPolicy,
        declared: Vec<DeclaredRelationship>,
    ) -> Self {
        Self {
            host,
            policy,
            declared,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Discover the field schema for a content type, returning the cached
    /// snapshot when one exists.
    ///
    /// A single inaccessible table is logged and skipped; discovery only
    /// fails when the primary table itself is missing.
    pub fn discover(&self, content_type: &str) -> Result<Arc<FieldSchema>> {
        if let Some(schema) = self.cache.lock().unwrap().get(content_type) {
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(self.build_schema(content_type)?);
        self.cache
            .lock()
            .unwrap()
            .insert(content_type.to_string(), Arc::clone(&schema));

        Ok(schema)
    }

    /// Drop the cached snapshot for one content type; the next `discover`
    /// recomputes it from the live schema.
    pub fn invalidate(&self, content_type: &str) {
        self.cache.lock().unwrap().remove(content_type);
    }

    /// Drop every cached snapshot (e.g. after a schema migration).
    pub fn invalidate_all(&self) {
        self.cache.lock().unwrap().clear();
    }

    fn build_schema(&self, content_type: &str) -> Result<FieldSchema> {
        let tables = self
            .host
            .list_tables_matching(&format!("{}%", content_type))?;

        if !tables.iter().any(|t| t == content_type) {
            bail!("No primary table found for content type '{}'", content_type);
        }

        let primary_fields = match self.eligible_fields(content_type) {
            Ok(fields) => fields,
            Err(e) => bail!(
                "Cannot introspect primary table '{}': {}",
                content_type,
                e
            ),
        };

        let mut secondaries = Vec::new();

        for table in &tables {
            if table == content_type {
                continue;
            }
            if self.policy.table_denylist.contains(table) {
                debug!(table = %table, "Skipping denylisted table");
                continue;
            }
            // Explicitly declared tables are handled below
            if self
                .declared
                .iter()
                .any(|d| d.content_type == content_type && &d.table == table)
            {
                continue;
            }

            let columns = match self.host.introspect_columns(table) {
                Ok(columns) => columns,
                Err(e) => {
                    warn!(table = %table, error = %e, "Introspection failed, skipping table");
                    continue;
                }
            };

            let fields = self.filter_fields(&columns);
            if fields.is_empty() {
                continue;
            }

            match heuristic_fk(&columns, content_type) {
                Some(fk_column) => secondaries.push(SecondaryTable {
                    table: table.clone(),
                    fields,
                    path: JoinPath::Direct { fk_column },
                }),
                None => {
                    // No resolvable foreign key: dropped rather than guessed
                    debug!(table = %table, "No foreign key to '{}', dropping", content_type);
                }
            }
        }

        for declared in self
            .declared
            .iter()
            .filter(|d| d.content_type == content_type)
        {
            let fields = match &declared.fields {
                Some(fields) => fields.clone(),
                None => match self.eligible_fields(&declared.table) {
                    Ok(fields) => fields,
                    Err(e) => {
                        warn!(
                            table = %declared.table,
                            error = %e,
                            "Introspection of declared table failed, skipping"
                        );
                        continue;
                    }
                },
            };
            secondaries.push(SecondaryTable {
                table: declared.table.clone(),
                fields,
                path: declared.path.clone(),
            });
        }

        Ok(FieldSchema {
            content_type: content_type.to_string(),
            primary_table: content_type.to_string(),
            primary_fields,
            secondaries,
        })
    }

    /// Text-like columns passing the include/exclude policy.
    fn eligible_fields(&self, table: &str) -> Result<Vec<String>> {
        let columns = self.host.introspect_columns(table)?;
        Ok(self.filter_fields(&columns))
    }

    fn filter_fields(&self, columns: &[ColumnInfo]) -> Vec<String> {
        columns
            .iter()
            .filter(|c| c.is_text_like() && self.policy.allows(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }
}

/// Direct foreign key heuristic: a column literally named after the content
/// type, or `<type>id`.
fn heuristic_fk(columns: &[ColumnInfo], content_type: &str) -> Option<String> {
    let type_id = format!("{}id", content_type);

    columns
        .iter()
        .find(|c| c.name == content_type || c.name == type_id)
        .map(|c| c.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SqliteContentStore;
    use tempfile::TempDir;

    // ==================== Helper Functions ====================

    fn create_discovery(
        denylist: &[&str],
        declared: Vec<DeclaredRelationship>,
    ) -> (SchemaDiscovery, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("content.db");
        let store =
            SqliteContentStore::open(db_path.to_str().unwrap()).expect("Failed to open store");

        {
            let conn = rusqlite::Connection::open(db_path.to_str().unwrap()).expect("open");
            conn.execute_batch(
                "CREATE TABLE course (id INTEGER PRIMARY KEY, fullname TEXT, summary TEXT, password TEXT, visible INTEGER);
                 CREATE TABLE course_sections (id INTEGER PRIMARY KEY, course INTEGER, name TEXT, summary TEXT);
                 CREATE TABLE course_modules (id INTEGER PRIMARY KEY, courseid INTEGER, name TEXT);
                 CREATE TABLE course_logs (id INTEGER PRIMARY KEY, course INTEGER, message TEXT);
                 CREATE TABLE course_orphan (id INTEGER PRIMARY KEY, something INTEGER, name TEXT);
                 CREATE TABLE course_answers (id INTEGER PRIMARY KEY, question INTEGER, text TEXT);
                 CREATE TABLE course_questions (id INTEGER PRIMARY KEY, course INTEGER, text TEXT);",
            )
            .expect("Failed to seed test tables");
        }

        let mut policy = FieldPolicy::default();
        policy.table_denylist = denylist.iter().map(|s| s.to_string()).collect();

        (SchemaDiscovery::new(Arc::new(store), policy, declared), temp_dir)
    }

    // ==================== FieldPolicy Tests ====================

    #[test]
    fn test_policy_allows_included_fields() {
        let policy = FieldPolicy::default();
        assert!(policy.allows("summary"));
        assert!(policy.allows("name"));
    }

    #[test]
    fn test_policy_rejects_excluded_fields() {
        let policy = FieldPolicy::default();
        assert!(!policy.allows("password"));
        assert!(!policy.allows("configdata"));
    }

    #[test]
    fn test_policy_rejects_unlisted_fields() {
        let policy = FieldPolicy::default();
        assert!(!policy.allows("visible"));
        assert!(!policy.allows("sortorder"));
    }

    // ==================== discover Tests ====================

    #[test]
    fn test_discover_primary_fields() {
        let (discovery, _temp_dir) = create_discovery(&[], vec![]);

        let schema = discovery.discover("course").expect("Should discover");

        assert_eq!(schema.primary_table, "course");
        // password is excluded, visible is not text-like
        assert_eq!(schema.primary_fields, vec!["fullname", "summary"]);
    }

    #[test]
    fn test_discover_secondary_direct_fk() {
        let (discovery, _temp_dir) = create_discovery(&[], vec![]);

        let schema = discovery.discover("course").expect("Should discover");
        let sections = schema
            .secondaries
            .iter()
            .find(|s| s.table == "course_sections")
            .expect("sections should be discovered");

        assert_eq!(sections.fields, vec!["name", "summary"]);
        assert_eq!(
            sections.path,
            JoinPath::Direct {
                fk_column: "course".to_string()
            }
        );
    }

    #[test]
    fn test_discover_secondary_typeid_fk() {
        let (discovery, _temp_dir) = create_discovery(&[], vec![]);

        let schema = discovery.discover("course").expect("Should discover");
        let modules = schema
            .secondaries
            .iter()
            .find(|s| s.table == "course_modules")
            .expect("modules should be discovered");

        assert_eq!(
            modules.path,
            JoinPath::Direct {
                fk_column: "courseid".to_string()
            }
        );
    }

    #[test]
    fn test_discover_drops_table_without_fk() {
        let (discovery, _temp_dir) = create_discovery(&[], vec![]);

        let schema = discovery.discover("course").expect("Should discover");
        assert!(!schema.secondaries.iter().any(|s| s.table == "course_orphan"));
    }

    #[test]
    fn test_discover_respects_denylist() {
        let (discovery, _temp_dir) = create_discovery(&["course_logs"], vec![]);

        let schema = discovery.discover("course").expect("Should discover");
        assert!(!schema.secondaries.iter().any(|s| s.table == "course_logs"));
    }

    #[test]
    fn test_discover_includes_declared_relationship() {
        let declared = vec![DeclaredRelationship {
            content_type: "course".to_string(),
            table: "course_answers".to_string(),
            fields: None,
            path: JoinPath::Parent {
                parent_table: "course_questions".to_string(),
                parent_fk: "question".to_string(),
                primary_fk: "course".to_string(),
            },
        }];
        let (discovery, _temp_dir) = create_discovery(&[], declared);

        let schema = discovery.discover("course").expect("Should discover");
        let answers = schema
            .secondaries
            .iter()
            .find(|s| s.table == "course_answers")
            .expect("declared table should be present");

        assert_eq!(answers.fields, vec!["text"]);
        assert!(matches!(answers.path, JoinPath::Parent { .. }));
    }

    #[test]
    fn test_discover_declared_fields_override_policy() {
        let declared = vec![DeclaredRelationship {
            content_type: "course".to_string(),
            table: "course_answers".to_string(),
            fields: Some(vec!["text".to_string()]),
            path: JoinPath::Direct {
                fk_column: "question".to_string(),
            },
        }];
        let (discovery, _temp_dir) = create_discovery(&[], declared);

        let schema = discovery.discover("course").expect("Should discover");
        let answers = schema
            .secondaries
            .iter()
            .find(|s| s.table == "course_answers")
            .expect("declared table should be present");
        assert_eq!(answers.fields, vec!["text"]);
    }

    #[test]
    fn test_discover_unknown_content_type_fails() {
        let (discovery, _temp_dir) = create_discovery(&[], vec![]);
        assert!(discovery.discover("forum").is_err());
    }

    // ==================== Cache Tests ====================

    #[test]
    fn test_discover_caches_snapshot() {
        let (discovery, _temp_dir) = create_discovery(&[], vec![]);

        let first = discovery.discover("course").expect("Should discover");
        let second = discovery.discover("course").expect("Should discover");

        // Same snapshot instance, not a recomputation
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_invalidate_forces_recompute() {
        let (discovery, _temp_dir) = create_discovery(&[], vec![]);

        let first = discovery.discover("course").expect("Should discover");
        discovery.invalidate("course");
        let second = discovery.discover("course").expect("Should discover");

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
    }

    #[test]
    fn test_invalidate_all() {
        let (discovery, _temp_dir) = create_discovery(&[], vec![]);

        let first = discovery.discover("course").expect("Should discover");
        discovery.invalidate_all();
        let second = discovery.discover("course").expect("Should discover");

        assert!(!Arc::ptr_eq(&first, &second));
    }

    // ==================== Serde Tests ====================

    #[test]
    fn test_join_path_round_trips_through_json() {
        let path = JoinPath::Grandparent {
            parent_table: "p".to_string(),
            parent_fk: "pfk".to_string(),
            grandparent_table: "g".to_string(),
            grandparent_fk: "gfk".to_string(),
            primary_fk: "course".to_string(),
        };

        let json = serde_json::to_string(&path).expect("serialize");
        let restored: JoinPath = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(path, restored);
    }

    #[test]
    fn test_declared_relationship_from_json() {
        let json = r#"{
            "content_type": "course",
            "table": "course_answers",
            "path": {"kind": "direct", "fk_column": "course"}
        }"#;

        let declared: DeclaredRelationship =
            serde_json::from_str(json).expect("Should deserialize");
        assert_eq!(declared.table, "course_answers");
        assert!(declared.fields.is_none());
    }
}
