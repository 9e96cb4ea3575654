//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Dub an episode: transcribe, translate, re-speak, time-align and mix.
#[derive(Parser)]
#[command(name = "vodub")]
#[command(about = "Resumable video dubbing pipeline")]
#[command(version)]
pub struct Cli {
    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline up to a phase; phases that are already current skip
    Run {
        /// Input video file
        video: PathBuf,

        /// Target phase to run up to (inclusive)
        #[arg(long)]
        to: String,

        /// Force re-execution from this phase onwards (inclusive)
        #[arg(long = "from")]
        from_phase: Option<String>,

        /// Override the derived workspace parent directory
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// JSON config file merged over the defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Accept manual edits: re-fingerprint a phase's output artifacts
    Bless {
        /// Input video file (identifies the workspace)
        video: PathBuf,

        /// Phase whose outputs to re-fingerprint
        phase: String,
    },

    /// List phases with their version, requires and provides
    Phases,
}
