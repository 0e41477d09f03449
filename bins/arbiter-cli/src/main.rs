mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "arbiter-cli")]
#[command(about = "Arbiter CLI - Inspect languages, preview harnesses, run code and queue submissions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured languages
    Languages {
        /// Language registry file
        #[arg(short, long, default_value = "config/languages.json")]
        config: PathBuf,
    },

    /// Print the harness generated for a function signature
    Harness {
        /// Language name (e.g., python, java, cpp, rust)
        #[arg(short, long)]
        language: String,

        /// JSON file with functionName, parameterTypes and returnType
        #[arg(short, long)]
        signature: PathBuf,

        /// Language registry file
        #[arg(short, long, default_value = "config/languages.json")]
        config: PathBuf,
    },

    /// Run a source file once in the local Docker sandbox
    Scratch {
        /// Language name
        #[arg(short, long)]
        language: String,

        /// Source file to run
        #[arg(short, long)]
        file: PathBuf,

        /// File piped to the program's stdin
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Queue an existing submission for judging
    Enqueue {
        /// Submission id
        #[arg(short, long)]
        submission_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Languages { config } => {
            commands::list_languages(&config)?;
        }
        Commands::Harness {
            language,
            signature,
            config,
        } => {
            commands::print_harness(&config, &language, &signature)?;
        }
        Commands::Scratch { language, file, input } => {
            commands::run_scratch(&language, &file, input.as_deref()).await?;
        }
        Commands::Enqueue { submission_id } => {
            commands::enqueue(submission_id).await?;
        }
    }

    Ok(())
}
