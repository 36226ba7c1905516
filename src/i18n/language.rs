//! Language type: flexible, validated language representation.
//!
//! This module provides the `Language` type, a validated language code plus
//! the `other` sentinel that stands for the installation's canonical source
//! language in the translation store.

use crate::i18n::{LanguageConfig, LanguageRegistry};
use anyhow::{bail, Result};

/// Sentinel language code for the canonical source text of a hash.
pub const OTHER_CODE: &str = "other";

/// A validated language.
///
/// Either a language that exists and is enabled in the registry, or the
/// `other` sentinel. Construct via [`Language::from_code`] or the constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Language {
    /// ISO 639-1 language code (e.g., "en", "es"), or the `other` sentinel
    code: &'static str,
}

impl Language {
    /// The `other` sentinel: the canonical source language of the
    /// installation, whatever that language happens to be.
    pub const OTHER: Language = Language { code: OTHER_CODE };

    /// Create a Language from a language code string.
    ///
    /// Codes are matched case-insensitively against the registry; `other`
    /// always resolves to the sentinel.
    ///
    /// # Returns
    /// * `Ok(Language)` if the code is `other`, or valid and enabled
    /// * `Err` if the code is not found or the language is disabled
    pub fn from_code(code: &str) -> Result<Language> {
        if code.eq_ignore_ascii_case(OTHER_CODE) {
            return Ok(Language::OTHER);
        }

        let registry = LanguageRegistry::get();

        match registry.get_by_code(code) {
            Some(config) if config.enabled => Ok(Language {
                code: config.code, // Use the static str from the registry
            }),
            Some(_) => bail!("Language '{}' is not enabled", code),
            None => bail!("Unknown language code: '{}'", code),
        }
    }

    /// Get the canonical (source) language.
    ///
    /// This is the language source fragments are written in, and from which
    /// all translations are derived.
    pub fn canonical() -> Language {
        let config = LanguageRegistry::get().canonical();
        Language { code: config.code }
    }

    /// Map a requested display language onto a store lookup language.
    ///
    /// A request for the installation's canonical language must read the
    /// `other` record, never a same-code translation row that cannot exist.
    pub fn for_lookup(self) -> Language {
        if self.is_canonical() {
            Language::OTHER
        } else {
            self
        }
    }

    /// Get the language code, or `other` for the sentinel.
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Whether this is the `other` sentinel.
    pub fn is_other(&self) -> bool {
        self.code == OTHER_CODE
    }

    /// Get the full language configuration from the registry.
    ///
    /// # Panics
    /// Panics for the `other` sentinel or a code missing from the registry;
    /// neither can happen for a Language constructed via `from_code`
    /// returning a concrete language.
    pub fn config(&self) -> &'static LanguageConfig {
        LanguageRegistry::get()
            .get_by_code(self.code)
            .expect("Language code should always be valid")
    }

    /// Get the English name of the language.
    pub fn name(&self) -> &'static str {
        if self.is_other() {
            return "Source";
        }
        self.config().name
    }

    /// Check if this is the canonical language.
    ///
    /// The `other` sentinel counts as canonical: it names the same text.
    pub fn is_canonical(&self) -> bool {
        if self.is_other() {
            return true;
        }
        self.config().is_canonical
    }
}
