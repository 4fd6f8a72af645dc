use color_eyre::{eyre::WrapErr, Result};
use keystash_core::{storage::DocumentDriver, EncryptedKeysData, KeyStore};
use tracing::info;

use crate::cli::KeyCommand;

/// Connect, run one key subcommand, and close. Returns the text to print.
pub async fn handle<D: DocumentDriver>(cmd: KeyCommand, store: &mut KeyStore<D>) -> Result<String> {
    store.connect().await.wrap_err("failed to connect to key store")?;
    let outcome = run(cmd, store).await;
    store.close().await;
    outcome
}

async fn run<D: DocumentDriver>(cmd: KeyCommand, store: &KeyStore<D>) -> Result<String> {
    match cmd {
        KeyCommand::Get { user_id } => {
            let data = store
                .get_key_data(&user_id)
                .await
                .wrap_err_with(|| format!("failed to read key data for {user_id}"))?;
            render(&data)
        }
        KeyCommand::Add { user_id, payload } => {
            let data = store
                .add_key_data(&payload.into(), &user_id)
                .await
                .wrap_err_with(|| format!("failed to add key data for {user_id}"))?;
            info!(%user_id, "key data added");
            render(&data)
        }
        KeyCommand::Update { user_id, payload } => {
            let data = store
                .update_key_data(&payload.into(), &user_id)
                .await
                .wrap_err_with(|| format!("failed to update key data for {user_id}"))?;
            info!(%user_id, "key data updated");
            render(&data)
        }
        KeyCommand::Remove { user_id } => {
            store
                .remove_key_data(&user_id)
                .await
                .wrap_err_with(|| format!("failed to remove key data for {user_id}"))?;
            info!(%user_id, "key data removed");
            Ok(format!("Removed key data for {user_id}"))
        }
        KeyCommand::Exists { user_id } => {
            let exists = store.data_exists(&user_id).await?;
            Ok(exists.to_string())
        }
    }
}

fn render(data: &EncryptedKeysData) -> Result<String> {
    Ok(serde_json::to_string_pretty(data)?)
}
