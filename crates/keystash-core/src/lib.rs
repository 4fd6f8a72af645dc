//! Core of keystash: the encrypted key record, its timestamp encoding, the
//! document-store contract, and the `KeyStore` that ties them together.
//! Database drivers live in sibling crates.

pub mod key_store;
pub mod keys;
pub mod storage;
pub mod time;

pub use key_store::{KeyStore, KeyStoreError, KEYS_COLLECTION};
pub use keys::{ConnectionOptions, EncryptedKeysData};
pub use time::DateWithOffset;
