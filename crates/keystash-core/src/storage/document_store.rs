use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use bson::Document;
use thiserror::Error;

/// Errors produced by document store implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentStoreError {
    /// A write collided with a unique index.
    #[error("duplicate value for unique field: {field}")]
    DuplicateKey { field: String },
    /// The store could not be reached or rejected the connection string.
    #[error("connection failure: {reason}")]
    Connection { reason: String },
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Backend { reason: String },
}

/// Result of an insert-one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub acknowledged: bool,
}

/// Result of an update-one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub acknowledged: bool,
    /// Documents matching the filter.
    pub matched: u64,
    /// Documents whose stored values actually changed.
    pub modified: u64,
}

/// Result of a delete-one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: u64,
}

/// Opens connections to a document database.
#[async_trait]
pub trait DocumentDriver: Send + Sync {
    type Database: DocumentDatabase;

    /// Connect using the given connection string and return a live handle.
    async fn connect(&self, connection_string: &str) -> Result<Self::Database, DocumentStoreError>;
}

/// A connected database handle. Filters are equality matches on top-level fields.
#[async_trait]
pub trait DocumentDatabase: Send + Sync + Sized {
    /// Ensure a unique ascending index exists on `field` (idempotent).
    async fn create_unique_index(&self, collection: &str, field: &str)
        -> Result<(), DocumentStoreError>;

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, DocumentStoreError>;

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
    ) -> Result<InsertOutcome, DocumentStoreError>;

    /// Apply `set` as a `$set` partial update to the first document matching `filter`.
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        set: Document,
    ) -> Result<UpdateOutcome, DocumentStoreError>;

    async fn delete_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteOutcome, DocumentStoreError>;

    async fn count(&self, collection: &str, filter: Document) -> Result<u64, DocumentStoreError>;

    /// Release the connection.
    async fn close(self);
}

/// In-memory document store for tests and offline smoke runs.
/// Cloning shares the same underlying collections.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDocumentStore {
    inner: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Vec<Document>>,
    unique_indexes: HashMap<String, BTreeSet<String>>,
    unacknowledged_writes: bool,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store running with an unacknowledged write concern: writes
    /// are still applied but reported as not acknowledged.
    pub fn set_unacknowledged_writes(&self, enabled: bool) -> Result<(), DocumentStoreError> {
        self.lock()?.unacknowledged_writes = enabled;
        Ok(())
    }

    /// Copy of every document currently stored in `collection`.
    pub fn snapshot(&self, collection: &str) -> Result<Vec<Document>, DocumentStoreError> {
        Ok(self
            .lock()?
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, DocumentStoreError> {
        self.inner.lock().map_err(|err| DocumentStoreError::Backend {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

#[async_trait]
impl DocumentDriver for InMemoryDocumentStore {
    type Database = InMemoryDocumentStore;

    async fn connect(&self, connection_string: &str) -> Result<Self::Database, DocumentStoreError> {
        if connection_string.is_empty() {
            return Err(DocumentStoreError::Connection {
                reason: "empty connection string".to_string(),
            });
        }
        Ok(self.clone())
    }
}

#[async_trait]
impl DocumentDatabase for InMemoryDocumentStore {
    async fn create_unique_index(
        &self,
        collection: &str,
        field: &str,
    ) -> Result<(), DocumentStoreError> {
        let mut state = self.lock()?;
        let existing = state.collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);
        if has_duplicates(existing, field) {
            return Err(DocumentStoreError::DuplicateKey {
                field: field.to_string(),
            });
        }
        state
            .unique_indexes
            .entry(collection.to_string())
            .or_default()
            .insert(field.to_string());
        Ok(())
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, DocumentStoreError> {
        let state = self.lock()?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| matches(doc, &filter)))
            .cloned())
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
    ) -> Result<InsertOutcome, DocumentStoreError> {
        let mut state = self.lock()?;
        let acknowledged = !state.unacknowledged_writes;
        let unique_fields = state
            .unique_indexes
            .get(collection)
            .cloned()
            .unwrap_or_default();
        let docs = state.collections.entry(collection.to_string()).or_default();

        for field in unique_fields {
            let Some(value) = document.get(&field) else {
                continue;
            };
            if docs.iter().any(|doc| doc.get(&field) == Some(value)) {
                return Err(DocumentStoreError::DuplicateKey { field });
            }
        }

        docs.push(document);
        Ok(InsertOutcome { acknowledged })
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        set: Document,
    ) -> Result<UpdateOutcome, DocumentStoreError> {
        let mut state = self.lock()?;
        let acknowledged = !state.unacknowledged_writes;
        let target = state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|doc| matches(doc, &filter)));

        let Some(doc) = target else {
            return Ok(UpdateOutcome {
                acknowledged,
                matched: 0,
                modified: 0,
            });
        };

        let mut changed = false;
        for (key, value) in set {
            if doc.get(&key) != Some(&value) {
                doc.insert(key, value);
                changed = true;
            }
        }

        Ok(UpdateOutcome {
            acknowledged,
            matched: 1,
            modified: u64::from(changed),
        })
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteOutcome, DocumentStoreError> {
        let mut state = self.lock()?;
        let Some(docs) = state.collections.get_mut(collection) else {
            return Ok(DeleteOutcome { deleted: 0 });
        };
        match docs.iter().position(|doc| matches(doc, &filter)) {
            Some(index) => {
                docs.remove(index);
                Ok(DeleteOutcome { deleted: 1 })
            }
            None => Ok(DeleteOutcome { deleted: 0 }),
        }
    }

    async fn count(&self, collection: &str, filter: Document) -> Result<u64, DocumentStoreError> {
        let state = self.lock()?;
        let count = state
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|doc| matches(doc, &filter)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn close(self) {}
}

fn matches(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, expected)| doc.get(key) == Some(expected))
}

fn has_duplicates(docs: &[Document], field: &str) -> bool {
    let values: Vec<_> = docs.iter().filter_map(|doc| doc.get(field)).collect();
    values
        .iter()
        .enumerate()
        .any(|(i, value)| values[i + 1..].contains(value))
}
