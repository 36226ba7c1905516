//! Internationalization (i18n) module.
//!
//! This module centralizes language knowledge for the tagging engine: the
//! installation's known languages, the validated `Language` type (including
//! the `other` sentinel for canonical source text), and engine metrics.
//!
//! # Architecture
//!
//! - `registry`: single source of truth for the installation's languages
//! - `language`: type-safe Language value, `other` sentinel, lookup mapping
//! - `metrics`: render-path observability counters
//!
//! # Example
//!
//! ```rust,ignore
//! use transtag::i18n::Language;
//!
//! // Get canonical language (the installation's source language)
//! let canonical = Language::canonical();
//!
//! // Create language from code
//! let spanish = Language::from_code("es")?;
//!
//! // Requests for the canonical language read the `other` record
//! assert!(canonical.for_lookup().is_other());
//! ```

mod language;
mod metrics;
mod registry;

pub use language::{Language, OTHER_CODE};
pub use metrics::{EngineMetrics, MetricsReport};
pub use registry::{LanguageConfig, LanguageRegistry};
