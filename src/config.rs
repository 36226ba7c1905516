use anyhow::{Context, Result};

use crate::store::ScopeLevel;

#[derive(Debug, Clone)]
pub struct Config {
    // Databases
    pub content_db: String,
    pub translations_db: String,

    // Tagging
    pub content_types: Vec<String>,
    pub batch_size: u64,
    pub scope_level: ScopeLevel,

    // Declared multi-hop relationships (JSON file, optional)
    pub relationships_file: Option<String>,

    // Scheduling
    pub schedule_times: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            // Databases
            content_db: std::env::var("TRANSTAG_CONTENT_DB")
                .context("TRANSTAG_CONTENT_DB not set")?,
            translations_db: std::env::var("TRANSTAG_TRANSLATIONS_DB")
                .context("TRANSTAG_TRANSLATIONS_DB not set")?,

            // Tagging
            content_types: std::env::var("TRANSTAG_CONTENT_TYPES")
                .context("TRANSTAG_CONTENT_TYPES not set")?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            batch_size: std::env::var("TRANSTAG_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            scope_level: std::env::var("TRANSTAG_SCOPE_LEVEL")
                .ok()
                .and_then(|v| parse_scope_level(&v))
                .unwrap_or(ScopeLevel::Collection),

            // Relationships
            relationships_file: std::env::var("TRANSTAG_RELATIONSHIPS").ok(),

            // Scheduling
            schedule_times: std::env::var("TRANSTAG_SCHEDULE_TIMES")
                .unwrap_or_else(|_| "02:00".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }
}

fn parse_scope_level(value: &str) -> Option<ScopeLevel> {
    match value.to_ascii_lowercase().as_str() {
        "installation" => Some(ScopeLevel::Installation),
        "collection" => Some(ScopeLevel::Collection),
        "section" => Some(ScopeLevel::Section),
        "item" => Some(ScopeLevel::Item),
        "block" => Some(ScopeLevel::Block),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scope_level() {
        assert_eq!(parse_scope_level("collection"), Some(ScopeLevel::Collection));
        assert_eq!(parse_scope_level("BLOCK"), Some(ScopeLevel::Block));
        assert_eq!(parse_scope_level("bogus"), None);
    }
}
