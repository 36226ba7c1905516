//! Tagging orchestrator: walk a content type's configured tables and tag
//! every eligible field.
//!
//! Batch runs are cursor/offset based so an external scheduler can call
//! `run` repeatedly until exhausted and resume between batches. A field
//! already bearing a marker is never re-tagged, but its hash is still
//! registered into the current scope mapping, which is how previously-tagged
//! content picks up new scope associations.
//!
//! A failure against one secondary table or one record is logged with enough
//! context to resume and the loop continues; a long batch job never aborts
//! wholesale because one table is inaccessible.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::hash;
use crate::marker;
use crate::multilang;
use crate::record::ContentStore;
use crate::schema::{SchemaDiscovery, SecondaryTable};
use crate::store::{ScopeLevel, TranslationStore};

/// Result of one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Primary records processed in this batch
    pub processed: usize,
    /// Fields newly tagged (markers written back)
    pub tagged: usize,
    /// Fields skipped because they already carried a marker
    pub already_tagged: usize,
    /// Whether further batches remain
    pub remaining: bool,
}

/// Whether a field value is worth tagging: non-empty and not purely numeric.
pub fn is_translatable(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && trimmed.parse::<f64>().is_err()
}

pub struct TaggingOrchestrator {
    host: Arc<dyn ContentStore>,
    store: TranslationStore,
    discovery: Arc<SchemaDiscovery>,
    scope_level: ScopeLevel,
}

impl TaggingOrchestrator {
    pub fn new(
        host: Arc<dyn ContentStore>,
        store: TranslationStore,
        discovery: Arc<SchemaDiscovery>,
        scope_level: ScopeLevel,
    ) -> Self {
        Self {
            host,
            store,
            discovery,
            scope_level,
        }
    }

    /// Tag one batch of a content type's primary records (and their
    /// secondary rows), starting at `offset`. Callers loop until
    /// `remaining` is false, advancing the offset by `batch_size`.
    pub fn run(&self, content_type: &str, batch_size: u64, offset: u64) -> Result<BatchOutcome> {
        let schema = self
            .discovery
            .discover(content_type)
            .context(format!("No field schema for '{}'", content_type))?;

        let records = self
            .host
            .get_records(&schema.primary_table, offset, batch_size)
            .context(format!(
                "Failed to fetch batch of '{}' at offset {}",
                schema.primary_table, offset
            ))?;

        let mut outcome = BatchOutcome {
            processed: records.len(),
            tagged: 0,
            already_tagged: 0,
            remaining: records.len() as u64 == batch_size,
        };

        for record in &records {
            let scope_id = record.id;

            for field in &schema.primary_fields {
                if let Some(value) = record.field(field) {
                    self.tag_field(
                        &schema.primary_table,
                        record.id,
                        field,
                        value,
                        scope_id,
                        &mut outcome,
                    );
                }
            }

            for secondary in &schema.secondaries {
                if let Err(e) = self.tag_secondary(secondary, scope_id, &mut outcome) {
                    warn!(
                        content_type = %content_type,
                        table = %secondary.table,
                        primary_id = scope_id,
                        offset,
                        error = %e,
                        "Secondary table tagging failed, continuing"
                    );
                }
            }
        }

        info!(
            content_type = %content_type,
            offset,
            processed = outcome.processed,
            tagged = outcome.tagged,
            already_tagged = outcome.already_tagged,
            remaining = outcome.remaining,
            "Batch complete"
        );

        Ok(outcome)
    }

    /// Tag every eligible field of every secondary row related to one
    /// primary record through the declared foreign-key chain.
    fn tag_secondary(
        &self,
        secondary: &SecondaryTable,
        primary_id: i64,
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        let rows = self
            .host
            .get_related_records(&secondary.table, &secondary.path, primary_id)?;

        for row in &rows {
            for field in &secondary.fields {
                if let Some(value) = row.field(field) {
                    self.tag_field(
                        &secondary.table,
                        row.id,
                        field,
                        value,
                        primary_id,
                        outcome,
                    );
                }
            }
        }

        Ok(())
    }

    /// Tag one field value in place. Failures are logged and swallowed so
    /// the batch loop continues; the field is retried on the next run.
    fn tag_field(
        &self,
        table: &str,
        record_id: i64,
        field: &str,
        value: &str,
        scope_id: i64,
        outcome: &mut BatchOutcome,
    ) {
        match self.try_tag_field(table, record_id, field, value, scope_id) {
            Ok(TagResult::Tagged) => outcome.tagged += 1,
            Ok(TagResult::AlreadyTagged) => outcome.already_tagged += 1,
            Ok(TagResult::Skipped) => {}
            Err(e) => {
                warn!(
                    table = %table,
                    record_id,
                    field = %field,
                    error = %e,
                    "Field tagging failed, continuing"
                );
            }
        }
    }

    fn try_tag_field(
        &self,
        table: &str,
        record_id: i64,
        field: &str,
        value: &str,
        scope_id: i64,
    ) -> Result<TagResult> {
        // Already tagged: keep the marker, register the current scope
        if marker::is_tagged(value) {
            if let Some(hash) = marker::extract_hash(value) {
                self.store.add_scope_mapping(&hash, scope_id)?;
            }
            return Ok(TagResult::AlreadyTagged);
        }

        if !is_translatable(value) {
            return Ok(TagResult::Skipped);
        }

        let parsed = multilang::parse(value);
        let source_text = parsed.source_text.trim();
        if !is_translatable(source_text) {
            return Ok(TagResult::Skipped);
        }

        // Reuse before allocating: identical text shares one hash
        let candidate = hash::find_or_allocate(&self.store, source_text)?;
        let persisted = self.store.persist_tagging(
            &candidate,
            source_text,
            &parsed.translations,
            self.scope_level,
            Some(scope_id),
        )?;

        let tagged_value = marker::embed(source_text, &persisted);
        self.host
            .update_field(table, record_id, field, &tagged_value)?;

        debug!(table = %table, record_id, field = %field, hash = %persisted, "Field tagged");
        Ok(TagResult::Tagged)
    }
}

enum TagResult {
    Tagged,
    AlreadyTagged,
    Skipped,
}
