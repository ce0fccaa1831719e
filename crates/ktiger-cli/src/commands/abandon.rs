//! The `ktiger abandon` command.

use anyhow::{Context, Result};

use ktiger_core::traits::SessionStore;

use super::GlobalOptions;

pub async fn execute(options: &GlobalOptions) -> Result<()> {
    let config = options.load_config()?;
    let store = config.session_store();

    // An unreadable record is still removed.
    let existing = store.load().await;

    store
        .clear()
        .await
        .with_context(|| format!("failed to remove {}", store.path().display()))?;

    match existing {
        Ok(Some(position)) => println!(
            "Abandoned attempt {} ({})",
            position.attempt_id, position.exam_title
        ),
        Ok(None) => println!("No exam in progress"),
        Err(e) => println!("Removed unreadable record ({e})"),
    }
    Ok(())
}
