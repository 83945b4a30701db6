//! Reusable test helpers for privacy engine integration tests.
//!
//! Each helper builds a fresh engine over its own store, so tests never
//! share state and can run in parallel.

#![allow(dead_code)]

use buddy_core::identity::IdentityKey;
use buddy_core::privacy::{
    EngineConfig, MemoryStore, OpContext, PrivacyEngine, PrivacyStore, Relationship, SqliteStore,
};
use tracing_subscriber::EnvFilter;

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shorthand for a normalized identity.
pub fn key(handle: &str) -> IdentityKey {
    IdentityKey::new(handle)
}

/// A context with no deadline.
pub fn ctx() -> OpContext {
    OpContext::background()
}

/// Engine over an in-memory store.
pub fn memory_engine() -> PrivacyEngine<MemoryStore> {
    init_tracing();
    PrivacyEngine::new(MemoryStore::new())
}

/// Engine over an in-memory SQLite database.
pub fn sqlite_engine() -> PrivacyEngine<SqliteStore> {
    init_tracing();
    PrivacyEngine::new(SqliteStore::in_memory().expect("should open in-memory database"))
}

/// Engine over an in-memory store with an explicit configuration.
pub fn memory_engine_with(config: EngineConfig) -> PrivacyEngine<MemoryStore> {
    init_tracing();
    PrivacyEngine::with_config(MemoryStore::new(), config)
}

/// Registers every handle.
pub fn register_all<S: PrivacyStore>(engine: &PrivacyEngine<S>, handles: &[&str]) {
    for handle in handles {
        engine
            .register(&ctx(), &key(handle))
            .expect("should register user");
    }
}

/// Candidate names of a relationship list, in order.
pub fn candidates(relationships: &[Relationship]) -> Vec<String> {
    relationships
        .iter()
        .map(|r| r.candidate.as_str().to_string())
        .collect()
}

/// Finds the relationship for one candidate.
pub fn find<'a>(relationships: &'a [Relationship], candidate: &str) -> &'a Relationship {
    relationships
        .iter()
        .find(|r| r.candidate == key(candidate))
        .unwrap_or_else(|| panic!("missing relationship for {candidate}"))
}
