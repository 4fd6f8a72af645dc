mod document_store;

pub use document_store::{
    DeleteOutcome, DocumentDatabase, DocumentDriver, DocumentStoreError, InMemoryDocumentStore,
    InsertOutcome, UpdateOutcome,
};
