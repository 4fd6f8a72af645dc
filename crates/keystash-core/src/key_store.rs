use bson::{doc, Document};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::{
    keys::{ConnectionOptions, EncryptedKeysData, KeyDocument},
    storage::{DocumentDatabase, DocumentDriver, DocumentStoreError},
    time::DateWithOffset,
};

/// Collection holding one document per user.
pub const KEYS_COLLECTION: &str = "keys";

const USER_ID_FIELD: &str = "userId";

/// Errors surfaced by [`KeyStore`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("connection string is missing or empty")]
    Configuration,
    #[error("key store is not connected; call connect() first")]
    NotConnected,
    #[error("{operation} of key data was not acknowledged by the store")]
    NotAcknowledged { operation: &'static str },
    #[error("no key data matched user: {user_id}")]
    NoMatch { user_id: String },
    #[error("key data not found for user: {user_id}")]
    NotFound { user_id: String },
    #[error("key data already exists for user: {user_id}")]
    AlreadyExists { user_id: String },
    #[error("key document mapping failed: {reason}")]
    Mapping { reason: String },
    #[error(transparent)]
    Store(#[from] DocumentStoreError),
}

/// Per-user encrypted key records in a single document collection.
///
/// Data operations fail with [`KeyStoreError::NotConnected`] until
/// [`KeyStore::connect`] succeeds.
pub struct KeyStore<D: DocumentDriver> {
    driver: D,
    connection_string: String,
    collection: String,
    db: Option<D::Database>,
}

impl<D: DocumentDriver> KeyStore<D> {
    /// Validate options without touching the network.
    pub fn new(options: ConnectionOptions, driver: D) -> Result<Self, KeyStoreError> {
        let connection_string = options
            .connection_string
            .filter(|s| !s.is_empty())
            .ok_or(KeyStoreError::Configuration)?;

        Ok(Self {
            driver,
            connection_string,
            collection: KEYS_COLLECTION.to_string(),
            db: None,
        })
    }

    /// Use a different collection name than [`KEYS_COLLECTION`].
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_connected(&self) -> bool {
        self.db.is_some()
    }

    /// Connect and ensure the unique `userId` index exists.
    #[instrument(skip_all, fields(collection = %self.collection))]
    pub async fn connect(&mut self) -> Result<(), KeyStoreError> {
        if let Some(previous) = self.db.take() {
            previous.close().await;
        }

        let db = self.driver.connect(&self.connection_string).await?;
        if let Err(err) = db.create_unique_index(&self.collection, USER_ID_FIELD).await {
            db.close().await;
            return Err(err.into());
        }

        self.db = Some(db);
        debug!("key store connected");
        Ok(())
    }

    /// Release the connection; a no-op when not connected.
    #[instrument(skip_all, fields(collection = %self.collection))]
    pub async fn close(&mut self) {
        if let Some(db) = self.db.take() {
            db.close().await;
            debug!("key store closed");
        }
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn get_key_data(&self, user_id: &str) -> Result<EncryptedKeysData, KeyStoreError> {
        let document = self
            .db()?
            .find_one(&self.collection, user_filter(user_id))
            .await?
            .ok_or_else(|| KeyStoreError::NotFound {
                user_id: user_id.to_string(),
            })?;

        let stored: KeyDocument = bson::from_document(document).map_err(mapping_err)?;
        Ok(stored.into_record())
    }

    /// Insert a new record, ignoring any timestamps on `data`, and return it as persisted.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn add_key_data(
        &self,
        data: &EncryptedKeysData,
        user_id: &str,
    ) -> Result<EncryptedKeysData, KeyStoreError> {
        let db = self.db()?;
        let stored = KeyDocument::stamped(user_id, data, DateWithOffset::now());
        let document = bson::to_document(&stored).map_err(mapping_err)?;

        let outcome = match db.insert_one(&self.collection, document).await {
            Ok(outcome) => outcome,
            Err(DocumentStoreError::DuplicateKey { .. }) => {
                return Err(KeyStoreError::AlreadyExists {
                    user_id: user_id.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        };

        if !outcome.acknowledged {
            warn!("insert not acknowledged");
            return Err(KeyStoreError::NotAcknowledged { operation: "insert" });
        }

        self.get_key_data(user_id).await
    }

    /// Replace the payload fields and bump `modifiedTime`; `creationTime` is left alone.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn update_key_data(
        &self,
        data: &EncryptedKeysData,
        user_id: &str,
    ) -> Result<EncryptedKeysData, KeyStoreError> {
        let db = self.db()?;
        let now = bson::to_bson(&DateWithOffset::now()).map_err(mapping_err)?;
        let set = doc! {
            "encrypterName": data.encrypter_name.as_str(),
            "salt": data.salt.as_str(),
            "keysBlob": data.keys_blob.as_str(),
            "modifiedTime": now,
        };

        let outcome = db
            .update_one(&self.collection, user_filter(user_id), set)
            .await?;

        if !outcome.acknowledged {
            warn!("update not acknowledged");
            return Err(KeyStoreError::NotAcknowledged { operation: "update" });
        }
        // Zero modified covers both an unknown user and an unchanged document.
        if outcome.modified == 0 {
            return Err(KeyStoreError::NoMatch {
                user_id: user_id.to_string(),
            });
        }

        self.get_key_data(user_id).await
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn remove_key_data(&self, user_id: &str) -> Result<(), KeyStoreError> {
        let outcome = self
            .db()?
            .delete_one(&self.collection, user_filter(user_id))
            .await?;

        if outcome.deleted == 0 {
            return Err(KeyStoreError::NoMatch {
                user_id: user_id.to_string(),
            });
        }
        Ok(())
    }

    /// Whether any record is stored for `user_id`.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn data_exists(&self, user_id: &str) -> Result<bool, KeyStoreError> {
        let count = self
            .db()?
            .count(&self.collection, user_filter(user_id))
            .await?;
        Ok(count > 0)
    }

    fn db(&self) -> Result<&D::Database, KeyStoreError> {
        self.db.as_ref().ok_or(KeyStoreError::NotConnected)
    }
}

fn user_filter(user_id: &str) -> Document {
    doc! { USER_ID_FIELD: user_id }
}

fn mapping_err<E: ToString>(err: E) -> KeyStoreError {
    KeyStoreError::Mapping {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::storage::InMemoryDocumentStore;

    async fn connected() -> (KeyStore<InMemoryDocumentStore>, InMemoryDocumentStore) {
        let backend = InMemoryDocumentStore::new();
        let mut store = KeyStore::new(
            ConnectionOptions::new("mongodb://localhost:27017/keystash"),
            backend.clone(),
        )
        .expect("valid options");
        store.connect().await.expect("connect");
        (store, backend)
    }

    #[test]
    fn rejects_missing_or_empty_connection_string() {
        let missing = KeyStore::new(ConnectionOptions::default(), InMemoryDocumentStore::new());
        assert!(matches!(missing, Err(KeyStoreError::Configuration)));

        let empty = KeyStore::new(ConnectionOptions::new(""), InMemoryDocumentStore::new());
        assert!(matches!(empty, Err(KeyStoreError::Configuration)));
    }

    #[tokio::test]
    async fn operations_fail_before_connect() {
        let store = KeyStore::new(
            ConnectionOptions::new("mongodb://localhost"),
            InMemoryDocumentStore::new(),
        )
        .expect("valid options");
        let data = EncryptedKeysData::new("aes256", "s1", "b1");

        assert_eq!(
            store.get_key_data("u1").await,
            Err(KeyStoreError::NotConnected)
        );
        assert_eq!(
            store.add_key_data(&data, "u1").await,
            Err(KeyStoreError::NotConnected)
        );
        assert_eq!(
            store.update_key_data(&data, "u1").await,
            Err(KeyStoreError::NotConnected)
        );
        assert_eq!(
            store.remove_key_data("u1").await,
            Err(KeyStoreError::NotConnected)
        );
        assert_eq!(
            store.data_exists("u1").await,
            Err(KeyStoreError::NotConnected)
        );
    }

    #[tokio::test]
    async fn add_then_get_returns_payload_with_equal_timestamps() {
        let (store, _) = connected().await;
        let data = EncryptedKeysData::new("aes256", "s1", "b1");

        let added = store.add_key_data(&data, "u1").await.expect("add");
        let read = store.get_key_data("u1").await.expect("get");

        assert_eq!(added, read);
        assert_eq!(read.encrypter_name, "aes256");
        assert_eq!(read.salt, "s1");
        assert_eq!(read.keys_blob, "b1");
        assert_eq!(read.creation_time, read.modified_time);
        assert!(!read.creation_time.is_empty());
    }

    #[tokio::test]
    async fn add_discards_caller_timestamps() {
        let (store, _) = connected().await;
        let mut data = EncryptedKeysData::new("aes256", "s1", "b1");
        data.creation_time = "1970-01-01T00:00:00.000Z".into();
        data.modified_time = "1970-01-01T00:00:00.000Z".into();

        let added = store.add_key_data(&data, "u1").await.expect("add");
        assert_ne!(added.creation_time, data.creation_time);
    }

    #[tokio::test]
    async fn second_add_for_same_user_fails() {
        let (store, backend) = connected().await;
        let data = EncryptedKeysData::new("aes256", "s1", "b1");
        store.add_key_data(&data, "u1").await.expect("first add");

        let err = store
            .add_key_data(&EncryptedKeysData::new("aes256", "s2", "b2"), "u1")
            .await
            .expect_err("duplicate user");
        assert_eq!(
            err,
            KeyStoreError::AlreadyExists {
                user_id: "u1".into()
            }
        );
        assert_eq!(backend.snapshot(KEYS_COLLECTION).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_changes_payload_and_keeps_creation_time() {
        let (store, _) = connected().await;
        let added = store
            .add_key_data(&EncryptedKeysData::new("aes256", "s1", "b1"), "u1")
            .await
            .expect("add");

        std::thread::sleep(Duration::from_millis(5));
        let updated = store
            .update_key_data(&EncryptedKeysData::new("aes256", "s1", "b2"), "u1")
            .await
            .expect("update");

        assert_eq!(updated.keys_blob, "b2");
        assert_eq!(updated.creation_time, added.creation_time);
        assert!(updated.modified_time > added.modified_time);
        assert_eq!(store.get_key_data("u1").await.expect("get"), updated);
    }

    #[tokio::test]
    async fn update_unknown_user_is_no_match() {
        let (store, _) = connected().await;
        let err = store
            .update_key_data(&EncryptedKeysData::new("aes256", "s1", "b1"), "ghost")
            .await
            .expect_err("no such user");
        assert_eq!(
            err,
            KeyStoreError::NoMatch {
                user_id: "ghost".into()
            }
        );
    }

    #[tokio::test]
    async fn remove_and_exists_follow_lifecycle() {
        let (store, _) = connected().await;
        assert!(!store.data_exists("u1").await.expect("exists"));

        store
            .add_key_data(&EncryptedKeysData::new("aes256", "s1", "b1"), "u1")
            .await
            .expect("add");
        assert!(store.data_exists("u1").await.expect("exists"));

        store.remove_key_data("u1").await.expect("remove");
        assert!(!store.data_exists("u1").await.expect("exists"));

        let err = store
            .remove_key_data("u1")
            .await
            .expect_err("already removed");
        assert!(matches!(err, KeyStoreError::NoMatch { .. }));
    }

    #[tokio::test]
    async fn get_unknown_user_is_not_found() {
        let (store, _) = connected().await;
        let err = store.get_key_data("ghost").await.expect_err("missing");
        assert_eq!(
            err,
            KeyStoreError::NotFound {
                user_id: "ghost".into()
            }
        );
    }

    #[tokio::test]
    async fn unacknowledged_writes_surface_as_errors() {
        let (store, backend) = connected().await;
        backend.set_unacknowledged_writes(true).unwrap();

        let err = store
            .add_key_data(&EncryptedKeysData::new("aes256", "s1", "b1"), "u1")
            .await
            .expect_err("insert not acknowledged");
        assert_eq!(err, KeyStoreError::NotAcknowledged { operation: "insert" });

        let err = store
            .update_key_data(&EncryptedKeysData::new("aes256", "s1", "b2"), "u1")
            .await
            .expect_err("update not acknowledged");
        assert_eq!(err, KeyStoreError::NotAcknowledged { operation: "update" });
    }

    #[tokio::test]
    async fn stored_document_keeps_date_pairs() {
        let (store, backend) = connected().await;
        store
            .add_key_data(&EncryptedKeysData::new("aes256", "s1", "b1"), "u1")
            .await
            .expect("add");

        let docs = backend.snapshot(KEYS_COLLECTION).expect("snapshot");
        let modified = docs[0].get_document("modifiedTime").expect("modifiedTime");
        assert!(matches!(modified.get("date"), Some(bson::Bson::DateTime(_))));
        assert!(modified.get_i32("offset").is_ok());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_disconnects() {
        let (mut store, _) = connected().await;
        assert!(store.is_connected());

        store.close().await;
        store.close().await;
        assert!(!store.is_connected());
        assert_eq!(
            store.data_exists("u1").await,
            Err(KeyStoreError::NotConnected)
        );

        store.connect().await.expect("reconnect");
        assert!(store.is_connected());
    }

    #[tokio::test]
    async fn custom_collection_is_used_for_storage() {
        let backend = InMemoryDocumentStore::new();
        let mut store = KeyStore::new(ConnectionOptions::new("mongodb://x"), backend.clone())
            .expect("valid options")
            .with_collection("tenant_keys");
        store.connect().await.expect("connect");
        store
            .add_key_data(&EncryptedKeysData::new("aes256", "s1", "b1"), "u1")
            .await
            .expect("add");

        assert_eq!(store.collection(), "tenant_keys");
        assert_eq!(backend.snapshot("tenant_keys").unwrap().len(), 1);
        assert!(backend.snapshot(KEYS_COLLECTION).unwrap().is_empty());
    }
}
