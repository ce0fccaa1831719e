//! The `ktiger exams` command.

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use ktiger_client::create_backend;

use super::GlobalOptions;

pub async fn execute(options: &GlobalOptions) -> Result<()> {
    let config = options.load_config()?;
    let backend = create_backend(&config)?;

    let exams = backend
        .list_active_exams()
        .await
        .context("failed to list active exams")?;

    if exams.is_empty() {
        println!("No active exams");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Title", "Type", "Duration", "Questions"]);
    for exam in &exams {
        table.add_row(vec![
            Cell::new(exam.exam_id),
            Cell::new(&exam.title),
            Cell::new(exam.exam_type.as_deref().unwrap_or("-")),
            Cell::new(
                exam.duration_minutes
                    .map(|m| format!("{m} min"))
                    .unwrap_or_else(|| "-".into()),
            ),
            Cell::new(
                exam.total_questions
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".into()),
            ),
        ]);
    }
    println!("{table}");

    Ok(())
}
