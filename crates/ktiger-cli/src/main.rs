//! ktiger CLI — inspect and manage TOPIK exam attempts.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use ktiger_core::model::{AttemptId, ExamId, UserId};

mod commands;

#[derive(Parser)]
#[command(name = "ktiger", version, about = "K-Tiger Study exam session tool")]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the in-progress record (overrides config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the locally recorded in-progress exam
    Status,

    /// Forget the in-progress exam so it is not resumed
    Abandon,

    /// List active exams
    Exams,

    /// Start a new attempt and record it as in progress
    Start {
        /// Exam to start
        #[arg(long)]
        exam: ExamId,

        /// User taking the exam
        #[arg(long)]
        user: UserId,
    },

    /// Show the scored result of a submitted attempt
    Result {
        /// Attempt to look up
        #[arg(long)]
        attempt: AttemptId,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ktiger=info")),
        )
        .init();

    let cli = Cli::parse();
    let options = commands::GlobalOptions {
        config: cli.config,
        data_dir: cli.data_dir,
    };

    let result = match cli.command {
        Commands::Status => commands::status::execute(&options).await,
        Commands::Abandon => commands::abandon::execute(&options).await,
        Commands::Exams => commands::exams::execute(&options).await,
        Commands::Start { exam, user } => commands::start::execute(&options, exam, user).await,
        Commands::Result { attempt } => commands::result::execute(&options, attempt).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
