use clap::{Args, Parser, Subcommand};
use keystash_core::EncryptedKeysData;

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "keystash",
    about = "Manage per-user encrypted key records in MongoDB",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// MongoDB connection string; overrides the config file.
    #[arg(long, global = true)]
    pub connection_string: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Connect to the store and probe the keys collection.
    Health,
    #[command(flatten)]
    Keys(KeyCommand),
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Operations on a single user's key record.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum KeyCommand {
    /// Print the key record for a user as JSON.
    Get { user_id: String },
    /// Store a new key record for a user.
    Add {
        user_id: String,
        #[command(flatten)]
        payload: KeyPayload,
    },
    /// Replace the key record for a user.
    Update {
        user_id: String,
        #[command(flatten)]
        payload: KeyPayload,
    },
    /// Delete the key record for a user.
    Remove { user_id: String },
    /// Print whether a key record exists for a user.
    Exists { user_id: String },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct KeyPayload {
    /// Name of the scheme that produced the blob.
    #[arg(long)]
    pub encrypter: String,
    #[arg(long)]
    pub salt: String,
    /// Encrypted key material.
    #[arg(long)]
    pub blob: String,
}

impl From<KeyPayload> for EncryptedKeysData {
    fn from(payload: KeyPayload) -> Self {
        EncryptedKeysData::new(payload.encrypter, payload.salt, payload.blob)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
