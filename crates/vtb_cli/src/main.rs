//! Video Translate Batch CLI
//!
//! Two entry points over the same pipeline: `translate` for one video in
//! one process, `batch` for a folder of videos split across workers.

use anyhow::Result;
use clap::{Parser, Subcommand};
use vtb_core::logging::LogLevel;

mod commands;

use commands::batch::BatchCommand;
use commands::translate::TranslateCommand;

#[derive(Parser)]
#[command(
    name = "vtb",
    version,
    about = "Batch video translation across one or more GPU workers",
    after_help = "EXAMPLES:\n  \
                  # One video, one process\n  \
                  vtb translate --video car-turn.mp4 --prompt \"a red car in the snow\" --output out/car-turn\n\n  \
                  # A folder of videos, four workers (launcher sets RANK, WORLD_SIZE, LOCAL_RANK)\n  \
                  vtb batch --video-folder videos --prompt-folder prompts \\\n      \
                  --base-config config/base.toml --output-folder out"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a single video with an inline prompt
    Translate(TranslateCommand),

    /// Translate every video in a folder, sharing the work across workers
    Batch(BatchCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    match cli.command {
        Commands::Translate(cmd) => cmd.execute(level),
        Commands::Batch(cmd) => cmd.execute(level),
    }
}
