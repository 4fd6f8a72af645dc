use async_trait::async_trait;
use bson::{doc, Document};
use keystash_core::storage::{
    DeleteOutcome, DocumentDatabase, DocumentDriver, DocumentStoreError, InsertOutcome,
    UpdateOutcome,
};
use mongodb::{
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{Acknowledgment, IndexOptions, WriteConcern},
    Client, Collection, Database, IndexModel,
};
use tracing::{debug, instrument};

/// Database used when the connection string does not name one.
pub const DEFAULT_DATABASE: &str = "test";

const DUPLICATE_KEY_CODE: i32 = 11000;

/// Opens MongoDB connections from a `mongodb://` or `mongodb+srv://` connection string.
#[derive(Debug, Default, Clone, Copy)]
pub struct MongoDriver;

impl MongoDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentDriver for MongoDriver {
    type Database = MongoDatabase;

    #[instrument(skip_all)]
    async fn connect(&self, connection_string: &str) -> Result<MongoDatabase, DocumentStoreError> {
        let client = Client::with_uri_str(connection_string)
            .await
            .map_err(connection_err)?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));

        // The driver connects lazily; ping so bad hosts fail here.
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(connection_err)?;

        debug!(database = %db.name(), "connected to mongodb");
        Ok(MongoDatabase { client, db })
    }
}

/// A connected MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoDatabase {
    client: Client,
    db: Database,
}

impl MongoDatabase {
    pub fn name(&self) -> &str {
        self.db.name()
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

#[async_trait]
impl DocumentDatabase for MongoDatabase {
    #[instrument(skip_all, fields(collection = %collection, field = %field))]
    async fn create_unique_index(
        &self,
        collection: &str,
        field: &str,
    ) -> Result<(), DocumentStoreError> {
        let model = IndexModel::builder()
            .keys(doc! { field: 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let created = self
            .collection(collection)
            .create_index(model)
            .await
            .map_err(write_err)?;
        debug!(index = %created.index_name, "unique index ensured");
        Ok(())
    }

    #[instrument(skip_all, fields(collection = %collection))]
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, DocumentStoreError> {
        self.collection(collection)
            .find_one(filter)
            .await
            .map_err(backend_err)
    }

    #[instrument(skip_all, fields(collection = %collection))]
    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
    ) -> Result<InsertOutcome, DocumentStoreError> {
        let coll = self.collection(collection);
        coll.insert_one(document).await.map_err(write_err)?;
        Ok(InsertOutcome {
            acknowledged: acknowledges(coll.write_concern()),
        })
    }

    #[instrument(skip_all, fields(collection = %collection))]
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        set: Document,
    ) -> Result<UpdateOutcome, DocumentStoreError> {
        let coll = self.collection(collection);
        let result = coll
            .update_one(filter, doc! { "$set": set })
            .await
            .map_err(write_err)?;
        Ok(UpdateOutcome {
            acknowledged: acknowledges(coll.write_concern()),
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    #[instrument(skip_all, fields(collection = %collection))]
    async fn delete_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteOutcome, DocumentStoreError> {
        let result = self
            .collection(collection)
            .delete_one(filter)
            .await
            .map_err(backend_err)?;
        Ok(DeleteOutcome {
            deleted: result.deleted_count,
        })
    }

    #[instrument(skip_all, fields(collection = %collection))]
    async fn count(&self, collection: &str, filter: Document) -> Result<u64, DocumentStoreError> {
        self.collection(collection)
            .count_documents(filter)
            .await
            .map_err(backend_err)
    }

    #[instrument(skip_all)]
    async fn close(self) {
        self.client.shutdown().await;
        debug!("mongodb client shut down");
    }
}

/// `w: 0` is the only write concern under which the server does not acknowledge.
fn acknowledges(concern: Option<&WriteConcern>) -> bool {
    !matches!(
        concern.and_then(|wc| wc.w.as_ref()),
        Some(Acknowledgment::Nodes(0))
    )
}

fn write_err(err: MongoError) -> DocumentStoreError {
    let duplicate = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(failure))
            if failure.code == DUPLICATE_KEY_CODE =>
        {
            Some(duplicate_field(&failure.message))
        }
        ErrorKind::Command(failure) if failure.code == DUPLICATE_KEY_CODE => {
            Some(duplicate_field(&failure.message))
        }
        _ => None,
    };

    match duplicate {
        Some(field) => DocumentStoreError::DuplicateKey { field },
        None => backend_err(err),
    }
}

/// Pull the field name out of an `E11000 ... dup key: { userId: "u1" }` message.
fn duplicate_field(message: &str) -> String {
    message
        .split_once("dup key: {")
        .and_then(|(_, rest)| rest.split_once(':'))
        .map(|(field, _)| field.trim().trim_matches('"').to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn connection_err(err: MongoError) -> DocumentStoreError {
    DocumentStoreError::Connection {
        reason: err.to_string(),
    }
}

fn backend_err<E: ToString>(err: E) -> DocumentStoreError {
    DocumentStoreError::Backend {
        reason: err.to_string(),
    }
}
