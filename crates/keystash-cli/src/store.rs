use color_eyre::Result;
use keystash_core::{storage::DocumentDriver, KeyStore};
use keystash_mongo::MongoDriver;
use tracing::debug;

use crate::config::Config;

/// Build a MongoDB-backed key store from config and an optional flag override.
/// Fails before any I/O when no connection string is available.
pub fn store_from_config(
    config: &Config,
    connection_string: Option<String>,
) -> Result<KeyStore<MongoDriver>> {
    store_with_driver(config, connection_string, MongoDriver::new())
}

pub fn store_with_driver<D: DocumentDriver>(
    config: &Config,
    connection_string: Option<String>,
    driver: D,
) -> Result<KeyStore<D>> {
    let options = config.connection_options(connection_string);
    let store = KeyStore::new(options, driver)?;
    debug!(collection = %store.collection(), "key store configured");
    Ok(store)
}

/// Helper for tests: a key store over an in-memory backend.
#[cfg(test)]
pub fn test_store(
    backend: keystash_core::storage::InMemoryDocumentStore,
) -> KeyStore<keystash_core::storage::InMemoryDocumentStore> {
    let config = Config {
        connection_string: Some("mongodb://localhost:27017/keystash_test".into()),
    };
    store_with_driver(&config, None, backend).expect("test store")
}
