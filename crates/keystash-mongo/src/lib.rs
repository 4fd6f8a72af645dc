//! MongoDB-backed document store for `keystash-core`.
//! Uses the official `mongodb` driver; connection pooling is left to the driver.

pub mod mongo_store;

pub use mongo_store::{MongoDatabase, MongoDriver};
