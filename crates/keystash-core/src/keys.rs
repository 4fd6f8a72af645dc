use serde::{Deserialize, Serialize};

use crate::time::DateWithOffset;

/// Encrypted key material for one user, as handed to and returned from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedKeysData {
    /// Scheme that produced `keys_blob` (e.g. `aes256`).
    pub encrypter_name: String,
    pub salt: String,
    /// Opaque encrypted payload.
    pub keys_blob: String,
    /// ISO-8601, assigned by the store on insert.
    #[serde(default)]
    pub creation_time: String,
    /// ISO-8601, assigned by the store on every update.
    #[serde(default)]
    pub modified_time: String,
}

impl EncryptedKeysData {
    /// New record payload; timestamps are left empty for the store to fill in.
    pub fn new(
        encrypter_name: impl Into<String>,
        salt: impl Into<String>,
        keys_blob: impl Into<String>,
    ) -> Self {
        Self {
            encrypter_name: encrypter_name.into(),
            salt: salt.into(),
            keys_blob: keys_blob.into(),
            creation_time: String::new(),
            modified_time: String::new(),
        }
    }
}

/// Connection settings for a [`crate::KeyStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    pub connection_string: Option<String>,
}

impl ConnectionOptions {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
        }
    }
}

/// Shape of a record inside the `keys` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KeyDocument {
    pub user_id: String,
    pub encrypter_name: String,
    pub salt: String,
    pub keys_blob: String,
    pub creation_time: DateWithOffset,
    pub modified_time: DateWithOffset,
}

impl KeyDocument {
    /// Stamp a fresh document; both timestamps share the same captured instant.
    pub fn stamped(user_id: &str, data: &EncryptedKeysData, now: DateWithOffset) -> Self {
        Self {
            user_id: user_id.to_string(),
            encrypter_name: data.encrypter_name.clone(),
            salt: data.salt.clone(),
            keys_blob: data.keys_blob.clone(),
            creation_time: now,
            modified_time: now,
        }
    }

    pub fn into_record(self) -> EncryptedKeysData {
        EncryptedKeysData {
            encrypter_name: self.encrypter_name,
            salt: self.salt,
            keys_blob: self.keys_blob,
            creation_time: self.creation_time.to_iso_string(),
            modified_time: self.modified_time.to_iso_string(),
        }
    }
}
