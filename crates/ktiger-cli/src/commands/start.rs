//! The `ktiger start` command.

use anyhow::{Context, Result};

use ktiger_client::create_backend;
use ktiger_core::model::{ExamId, UserId};
use ktiger_core::start_attempt;

use super::GlobalOptions;

pub async fn execute(options: &GlobalOptions, exam_id: ExamId, user_id: UserId) -> Result<()> {
    let config = options.load_config()?;
    let backend = create_backend(&config)?;
    let store = config.session_store();

    let exam = backend
        .get_exam(exam_id)
        .await
        .with_context(|| format!("failed to fetch exam {exam_id}"))?;

    let attempt = start_attempt(backend.as_ref(), &store, exam_id, user_id, &exam.title)
        .await
        .with_context(|| format!("failed to start exam {exam_id}"))?;

    println!(
        "Started attempt {} for \"{}\" (recorded in {})",
        attempt.attempt_id,
        exam.title,
        store.path().display()
    );
    Ok(())
}
