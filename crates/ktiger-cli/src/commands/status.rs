//! The `ktiger status` command.

use anyhow::{Context, Result};

use ktiger_core::model::format_clock;
use ktiger_core::traits::SessionStore;

use super::GlobalOptions;

pub async fn execute(options: &GlobalOptions) -> Result<()> {
    let config = options.load_config()?;
    let store = config.session_store();

    let record = store.load().await.with_context(|| {
        format!(
            "failed to read in-progress record: {}",
            store.path().display()
        )
    })?;

    let Some(position) = record else {
        println!("No exam in progress");
        return Ok(());
    };

    let title = if position.exam_title.is_empty() {
        "(untitled)"
    } else {
        position.exam_title.as_str()
    };
    println!("Exam in progress: {title}");
    println!("  Attempt:   {}", position.attempt_id);
    println!(
        "  Started:   {}",
        position.started_at.format("%Y-%m-%d %H:%M UTC")
    );
    println!("  Section:   {}", position.current_section_index + 1);
    println!("  Question:  {}", position.current_question_index + 1);
    match position.time_left_seconds {
        Some(secs) => println!("  Time left: {}", format_clock(secs)),
        None => println!("  Time left: full section"),
    }

    Ok(())
}
