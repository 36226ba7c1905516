//! Resolution engine: turn marker-bearing text back into language-appropriate
//! display text at render time.
//!
//! A `Resolver` is created per request, holding the requesting user's
//! language and scope plus a memo so repeated markers in one render hit the
//! store once. A shared cross-request cache remembers lazily tagged
//! fragments so re-rendering untagged content does not re-allocate.
//!
//! Every failure on this path downgrades to rendering the original text: a
//! translation failure must never break page rendering.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::TaggingCache;
use crate::hash;
use crate::i18n::{EngineMetrics, Language};
use crate::marker;
use crate::multilang;
use crate::orchestrator::is_translatable;
use crate::store::{ScopeLevel, TranslationStore};

/// Indicator appended to machine-generated translations when the caller
/// allows rich output.
const AUTO_INDICATOR: &str = r#"<span class="autotranslated" title="machine translated">&#9881;</span>"#;

/// One resolved marker.
#[derive(Debug, Clone)]
struct Resolved {
    display_text: String,
    auto_translated: bool,
}

/// Per-request resolution context.
pub struct Resolver {
    store: TranslationStore,
    cache: Arc<dyn TaggingCache>,
    language: Language,
    scope_id: Option<i64>,
    scope_level: ScopeLevel,
    rich: bool,
    memo: HashMap<String, Resolved>,
}

impl Resolver {
    pub fn new(store: TranslationStore, cache: Arc<dyn TaggingCache>, language: Language) -> Self {
        Self {
            store,
            cache,
            language,
            scope_id: None,
            scope_level: ScopeLevel::Installation,
            rich: false,
            memo: HashMap::new(),
        }
    }

    /// Attach the scope (e.g. course id) used for lazy tagging and scope
    /// mapping registration.
    pub fn with_scope(mut self, scope_id: i64, scope_level: ScopeLevel) -> Self {
        self.scope_id = Some(scope_id);
        self.scope_level = scope_level;
        self
    }

    /// Allow rich output: machine-generated translations get a visible
    /// indicator appended.
    pub fn with_rich_output(mut self, rich: bool) -> Self {
        self.rich = rich;
        self
    }

    /// Resolve a rendered text blob into display text for this resolver's
    /// language. Marker-free blobs take the lazy tagging path; on any
    /// failure the original blob is returned unchanged.
    pub fn resolve(&mut self, blob: &str) -> String {
        if marker::scan(blob).is_empty() {
            // Never-tagged content: tag it now, then resolve the result
            return match self.lazy_tag(blob) {
                Ok(Some(tagged)) => self.resolve_markers(&tagged),
                Ok(None) => blob.to_string(),
                Err(e) => {
                    EngineMetrics::global().record_render_failure();
                    warn!(error = %e, "Lazy tagging failed, rendering original text");
                    blob.to_string()
                }
            };
        }

        self.resolve_markers(blob)
    }

    /// Steps 1-3: scan, look up (memoized), substitute.
    fn resolve_markers(&mut self, blob: &str) -> String {
        for m in marker::scan(blob) {
            if self.memo.contains_key(&m.hash) {
                EngineMetrics::global().record_memo_hit();
                continue;
            }

            let resolved = match self.lookup(&m.preceding, &m.hash) {
                Ok(resolved) => resolved,
                Err(e) => {
                    EngineMetrics::global().record_render_failure();
                    warn!(hash = %m.hash, error = %e, "Lookup failed, rendering original text");
                    Resolved {
                        display_text: m.preceding.trim().to_string(),
                        auto_translated: false,
                    }
                }
            };
            self.memo.insert(m.hash.clone(), resolved);
        }

        marker::substitute(blob, |preceding, hash| {
            // Whitespace between fragments belongs to the layout, not the
            // fragment: carry it over in front of the display text
            let lead = leading_whitespace(preceding);

            match self.memo.get(hash) {
                Some(resolved) => {
                    if resolved.auto_translated && self.rich {
                        format!("{}{} {}", lead, resolved.display_text, AUTO_INDICATOR)
                    } else {
                        format!("{}{}", lead, resolved.display_text)
                    }
                }
                // Unreachable: the memo was populated for every scanned hash
                None => format!("{}{}", lead, preceding.trim()),
            }
        })
    }

    /// Fetch and fall back: target language, then source text, then the raw
    /// preceding text when even the source record is unavailable.
    fn lookup(&self, preceding: &str, hash: &str) -> Result<Resolved> {
        EngineMetrics::global().record_store_lookup();

        let source = match self.store.get_source(hash)? {
            Some(source) => source,
            None => {
                // Even the source is gone: serve what the blob carried
                EngineMetrics::global().record_fallback();
                return Ok(Resolved {
                    display_text: preceding.trim().to_string(),
                    auto_translated: false,
                });
            }
        };

        // Self-healing: the content changed since it was tagged
        let mut source_text = source.text.clone();
        if !whitespace_insensitive_eq(preceding, &source.text) && is_translatable(preceding) {
            let healed = preceding.trim();
            self.store
                .upsert_source(hash, healed, source.scope_level)
                .context("Failed to heal drifted source text")?;
            debug!(hash = %hash, "Source text drifted, stored copy updated");
            source_text = healed.to_string();
        }

        let lookup_language = self.language.for_lookup();
        if lookup_language.is_other() {
            return Ok(Resolved {
                display_text: source_text,
                auto_translated: false,
            });
        }

        match self.store.get(hash, lookup_language.code())? {
            Some(record) => Ok(Resolved {
                display_text: record.text,
                auto_translated: !record.is_human_edited,
            }),
            None => {
                // No translation stored: fall back to the source text
                EngineMetrics::global().record_fallback();
                Ok(Resolved {
                    display_text: source_text,
                    auto_translated: false,
                })
            }
        }
    }

    /// Step 4: tag never-before-seen content purely because it was rendered
    /// once. Returns the tagged blob, or `None` when the content is not
    /// worth tagging (empty or purely numeric).
    fn lazy_tag(&mut self, blob: &str) -> Result<Option<String>> {
        if !is_translatable(blob) {
            return Ok(None);
        }

        let parsed = multilang::parse(blob);
        let source_text = parsed.source_text.trim().to_string();
        if !is_translatable(&source_text) {
            return Ok(None);
        }

        // A previous request may have tagged this exact fragment already
        if let Some(cached) = self.cache.get(&source_text, self.scope_id) {
            debug!(hash = %cached.hash, "Lazy tagging served from cache");
            return Ok(Some(cached.tagged_text));
        }

        let candidate = hash::find_or_allocate(&self.store, &source_text)?;
        let persisted = self.store.persist_tagging(
            &candidate,
            &source_text,
            &parsed.translations,
            self.scope_level,
            self.scope_id,
        )?;

        let tagged = marker::embed(&source_text, &persisted);
        self.cache
            .put(&source_text, self.scope_id, &tagged, &persisted);
        EngineMetrics::global().record_lazy_tagging();

        Ok(Some(tagged))
    }
}

/// Compare two texts ignoring all whitespace differences.
fn whitespace_insensitive_eq(a: &str, b: &str) -> bool {
    a.split_whitespace().eq(b.split_whitespace())
}

/// The whitespace prefix of a preceding-text run.
fn leading_whitespace(s: &str) -> &str {
    &s[..s.len() - s.trim_start().len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryCache, NoopCache};
    use tempfile::TempDir;

    // ==================== Helper Functions ====================

    fn create_store_with_cache(cache: Arc<dyn TaggingCache>) -> (TranslationStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("translations.db");
        let store =
            TranslationStore::new(db_path.to_str().unwrap(), cache).expect("Failed to create");
        (store, temp_dir)
    }

    fn create_store() -> (TranslationStore, TempDir) {
        create_store_with_cache(Arc::new(NoopCache))
    }

    fn seed_hello(store: &TranslationStore) {
        store
            .upsert_source("AbC123xYz9", "Hello", ScopeLevel::Item)
            .expect("source");
        store
            .upsert_translation("AbC123xYz9", "es", "Hola", true)
            .expect("translation");
    }

    fn resolver(store: &TranslationStore, lang: &str) -> Resolver {
        Resolver::new(
            store.clone(),
            Arc::new(NoopCache),
            Language::from_code(lang).expect("valid language"),
        )
    }

    // ==================== Translation Lookup Tests ====================

    #[test]
    fn test_resolve_translated_language() {
        let (store, _temp_dir) = create_store();
        seed_hello(&store);

        let output = resolver(&store, "es").resolve("Hello {t:AbC123xYz9}");
        assert_eq!(output, "Hola");
    }

    #[test]
    fn test_resolve_canonical_language_reads_other() {
        let (store, _temp_dir) = create_store();
        seed_hello(&store);

        let output = resolver(&store, "en").resolve("Hello {t:AbC123xYz9}");
        assert_eq!(output, "Hello");
    }

    #[test]
    fn test_resolve_missing_translation_falls_back_to_source() {
        let (store, _temp_dir) = create_store();
        seed_hello(&store);

        let output = resolver(&store, "fr").resolve("Hello {t:AbC123xYz9}");
        assert_eq!(output, "Hello");
    }

    #[test]
    fn test_resolve_missing_source_falls_back_to_preceding() {
        let (store, _temp_dir) = create_store();

        let output = resolver(&store, "es").resolve("Orphaned {t:zzzzzzzzzz}");
        assert_eq!(output, "Orphaned");
    }

    #[test]
    fn test_resolve_multiple_markers() {
        let (store, _temp_dir) = create_store();
        seed_hello(&store);
        store
            .upsert_source("bbbbbbbbbb", "World", ScopeLevel::Item)
            .expect("source");
        store
            .upsert_translation("bbbbbbbbbb", "es", "Mundo", true)
            .expect("translation");

        let output =
            resolver(&store, "es").resolve("Hello {t:AbC123xYz9} World {t:bbbbbbbbbb}");
        assert_eq!(output, "Hola Mundo");
    }

    #[test]
    fn test_resolve_repeated_marker_uses_memo() {
        let (store, _temp_dir) = create_store();
        seed_hello(&store);

        let mut r = resolver(&store, "es");
        let output = r.resolve("Hello {t:AbC123xYz9} Hello {t:AbC123xYz9}");
        assert_eq!(output, "Hola Hola");
        // The memo now covers the hash; a second blob reuses it
        let output2 = r.resolve("Hello {t:AbC123xYz9}");
        assert_eq!(output2, "Hola");
    }

    #[test]
    fn test_resolve_preserves_text_after_last_marker() {
        let (store, _temp_dir) = create_store();
        seed_hello(&store);

        let output = resolver(&store, "es").resolve("Hello {t:AbC123xYz9} trailing text");
        assert_eq!(output, "Hola trailing text");
    }

    // ==================== Machine-Translation Indicator Tests ====================

    #[test]
    fn test_machine_translation_indicator_with_rich_output() {
        let (store, _temp_dir) = create_store();
        store
            .upsert_source("AbC123xYz9", "Hello", ScopeLevel::Item)
            .expect("source");
        store
            .upsert_translation("AbC123xYz9", "es", "Hola", false)
            .expect("machine translation");

        let mut r = Resolver::new(
            store.clone(),
            Arc::new(NoopCache),
            Language::from_code("es").unwrap(),
        )
        .with_rich_output(true);

        let output = r.resolve("Hello {t:AbC123xYz9}");
        assert!(output.starts_with("Hola "));
        assert!(output.contains("autotranslated"));
    }

    #[test]
    fn test_no_indicator_without_rich_output() {
        let (store, _temp_dir) = create_store();
        store
            .upsert_source("AbC123xYz9", "Hello", ScopeLevel::Item)
            .expect("source");
        store
            .upsert_translation("AbC123xYz9", "es", "Hola", false)
            .expect("machine translation");

        let output = resolver(&store, "es").resolve("Hello {t:AbC123xYz9}");
        assert_eq!(output, "Hola");
    }

    #[test]
    fn test_no_indicator_for_human_translation() {
        let (store, _temp_dir) = create_store();
        seed_hello(&store);

        let mut r = Resolver::new(
            store.clone(),
            Arc::new(NoopCache),
            Language::from_code("es").unwrap(),
        )
        .with_rich_output(true);

        let output = r.resolve("Hello {t:AbC123xYz9}");
        assert_eq!(output, "Hola");
    }

    // ==================== Self-Healing Tests ====================

    #[test]
    fn test_drifted_source_is_healed() {
        let (store, _temp_dir) = create_store();
        seed_hello(&store);

        let output = resolver(&store, "en").resolve("Hello edited {t:AbC123xYz9}");
        assert_eq!(output, "Hello edited");

        let source = store.get_source("AbC123xYz9").unwrap().unwrap();
        assert_eq!(source.text, "Hello edited");
    }

    #[test]
    fn test_whitespace_only_drift_is_not_healed() {
        let (store, _temp_dir) = create_store();
        seed_hello(&store);
        let before = store.get_source("AbC123xYz9").unwrap().unwrap();

        resolver(&store, "en").resolve("  Hello\n {t:AbC123xYz9}");

        let after = store.get_source("AbC123xYz9").unwrap().unwrap();
        assert_eq!(before.modified_at, after.modified_at);
        assert_eq!(after.text, "Hello");
    }

    // ==================== Lazy Tagging Tests ====================

    #[test]
    fn test_lazy_tagging_persists_and_resolves() {
        let (store, _temp_dir) = create_store();

        let mut r = Resolver::new(
            store.clone(),
            Arc::new(InMemoryCache::new()),
            Language::canonical(),
        )
        .with_scope(7, ScopeLevel::Collection);

        let output = r.resolve("Fresh content");
        assert_eq!(output, "Fresh content");

        // The fragment was tagged behind the scenes
        let hash = store
            .find_source_by_text("Fresh content")
            .unwrap()
            .expect("source should exist");
        assert!(store.hashes_in_scope(7).unwrap().contains(&hash));
    }

    #[test]
    fn test_lazy_tagging_reuses_cache_across_requests() {
        let cache = Arc::new(InMemoryCache::new());
        let (store, _temp_dir) = create_store_with_cache(cache.clone());

        let mut first = Resolver::new(store.clone(), cache.clone(), Language::canonical());
        first.resolve("Fresh content");

        let hash_before = store
            .find_source_by_text("Fresh content")
            .unwrap()
            .expect("tagged");

        // A second request resolves the same untagged fragment
        let mut second = Resolver::new(store.clone(), cache.clone(), Language::canonical());
        let output = second.resolve("Fresh content");
        assert_eq!(output, "Fresh content");

        // Same hash: the cache prevented a duplicate allocation
        let hash_after = store
            .find_source_by_text("Fresh content")
            .unwrap()
            .expect("still tagged");
        assert_eq!(hash_before, hash_after);
    }

    #[test]
    fn test_lazy_tagging_converges_via_find_existing() {
        // Even with no shared cache, find_existing converges on one hash
        let (store, _temp_dir) = create_store();

        let mut first = Resolver::new(store.clone(), Arc::new(NoopCache), Language::canonical());
        first.resolve("Fresh content");
        let mut second = Resolver::new(store.clone(), Arc::new(NoopCache), Language::canonical());
        second.resolve("Fresh content");

        let hash = store.find_source_by_text("Fresh content").unwrap();
        assert!(hash.is_some(), "the text converged on one source record");
    }

    #[test]
    fn test_lazy_tagging_with_multilingual_content() {
        let (store, _temp_dir) = create_store();

        let mut r = Resolver::new(
            store.clone(),
            Arc::new(NoopCache),
            Language::from_code("es").unwrap(),
        );

        let output = r.resolve("{lang en}Hello{lang}{lang es}Hola{lang}");
        // The inline Spanish variant was stored and immediately served
        assert_eq!(output, "Hola");

        let hash = store.find_source_by_text("Hello").unwrap().expect("tagged");
        let es = store.get(&hash, "es").unwrap().expect("variant stored");
        assert_eq!(es.text, "Hola");
    }

    #[test]
    fn test_numeric_blob_is_not_tagged() {
        let (store, _temp_dir) = create_store();

        let output = resolver(&store, "es").resolve("42");
        assert_eq!(output, "42");
        assert!(store.find_source_by_text("42").unwrap().is_none());
    }

    #[test]
    fn test_empty_blob_passthrough() {
        let (store, _temp_dir) = create_store();

        let output = resolver(&store, "es").resolve("");
        assert_eq!(output, "");
    }

    // ==================== Fallback Chain Property ====================

    #[test]
    fn test_fallback_chain_order() {
        let (store, _temp_dir) = create_store();

        // 1. target language present: target text
        seed_hello(&store);
        assert_eq!(
            resolver(&store, "es").resolve("Hello {t:AbC123xYz9}"),
            "Hola"
        );

        // 2. target missing: source text
        assert_eq!(
            resolver(&store, "de").resolve("Hello {t:AbC123xYz9}"),
            "Hello"
        );

        // 3. source missing too: raw preceding text
        assert_eq!(
            resolver(&store, "de").resolve("Raw text {t:zzzzzzzzzz}"),
            "Raw text"
        );
    }

    // ==================== Whitespace Compare Tests ====================

    #[test]
    fn test_whitespace_insensitive_eq() {
        assert!(whitespace_insensitive_eq("Hello world", "Hello  world"));
        assert!(whitespace_insensitive_eq(" Hello\nworld ", "Hello world"));
        assert!(!whitespace_insensitive_eq("Hello world", "Hello worlds"));
    }
}
