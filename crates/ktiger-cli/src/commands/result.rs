//! The `ktiger result` command.

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use ktiger_client::create_backend;
use ktiger_core::model::{AttemptId, TopikLevel};

use super::GlobalOptions;

pub async fn execute(options: &GlobalOptions, attempt_id: AttemptId) -> Result<()> {
    let config = options.load_config()?;
    let backend = create_backend(&config)?;

    let result = backend
        .get_result(attempt_id)
        .await
        .with_context(|| format!("failed to fetch result of attempt {attempt_id}"))?;

    println!("Attempt {attempt_id}");
    if let Some(total) = result.total_score {
        println!(
            "  Total score: {total:.0} ({})",
            TopikLevel::from_total_score(total)
        );
    }
    if let (Some(correct), Some(total)) = (result.correct_answers, result.total_questions) {
        println!("  Correct:     {correct}/{total}");
    }

    if !result.section_results.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Section", "Correct", "Score"]);
        for section in &result.section_results {
            table.add_row(vec![
                Cell::new(
                    section
                        .section_type
                        .map(|t| t.display_name())
                        .unwrap_or("Section"),
                ),
                Cell::new(match (section.correct_count, section.total_questions) {
                    (Some(c), Some(t)) => format!("{c}/{t}"),
                    (Some(c), None) => c.to_string(),
                    _ => "-".into(),
                }),
                Cell::new(
                    section
                        .score
                        .map(|s| format!("{s:.0}"))
                        .unwrap_or_else(|| "-".into()),
                ),
            ]);
        }
        println!("{table}");
    }

    Ok(())
}
