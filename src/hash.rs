//! Hash allocator: collision-checked 10-character content identifiers.
//!
//! Allocation draws uniformly random alphanumeric strings and checks them
//! against the translation store, bounded by a fixed attempt ceiling so a
//! pathological collision storm (or an unreachable store reporting every
//! candidate as taken) fails fatally instead of looping forever.
//!
//! `find_existing` is the deduplication mechanism: it is consulted
//! everywhere before allocating, so textually-identical fragments converge
//! on one hash.

use anyhow::Result;
use rand::{distributions::Alphanumeric, Rng};
use thiserror::Error;
use tracing::warn;

use crate::marker::HASH_LEN;
use crate::store::TranslationStore;

/// Attempt ceiling before allocation fails fatally.
pub const MAX_ATTEMPTS: u32 = 100;

/// Typed failure classes of identifier allocation.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("identifier space exhausted: no free hash after {0} attempts")]
    IdentifierSpaceExhausted(u32),
}

/// One uniformly random 10-character alphanumeric candidate.
fn random_hash() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(HASH_LEN)
        .map(char::from)
        .collect()
}

/// Generate a hash no existing record uses.
pub fn allocate(store: &TranslationStore) -> Result<String> {
    for attempt in 0..MAX_ATTEMPTS {
        let candidate = random_hash();
        if !store.hash_exists(&candidate)? {
            return Ok(candidate);
        }
        warn!(attempt, candidate = %candidate, "Hash collision, retrying");
    }

    Err(AllocError::IdentifierSpaceExhausted(MAX_ATTEMPTS).into())
}

/// Hash of an existing source record with the same trimmed text, if any.
pub fn find_existing(store: &TranslationStore, source_text: &str) -> Result<Option<String>> {
    store.find_source_by_text(source_text)
}

/// The standard selection order: reuse an existing hash for identical text,
/// allocate a fresh one only on miss.
pub fn find_or_allocate(store: &TranslationStore, source_text: &str) -> Result<String> {
    match find_existing(store, source_text)? {
        Some(hash) => Ok(hash),
        None => allocate(store),
    }
}
