use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cabin")]
#[command(about = "Talk to a live cabin agent from the terminal", long_about = None)]
pub struct Cli {
    /// TOML configuration file (default: <config dir>/cabin/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open an interactive session
    Console(ConsoleArgs),

    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug, Default, Clone)]
pub struct ConsoleArgs {
    /// Model resource name
    #[arg(short, long)]
    pub model: Option<String>,

    /// Prebuilt voice name
    #[arg(short, long)]
    pub voice: Option<String>,

    /// System instruction
    #[arg(short, long)]
    pub instruction: Option<String>,

    /// Ask for text replies instead of audio
    #[arg(long)]
    pub text_only: bool,

    /// Stream the default microphone and play replies (needs `desktop-audio`)
    #[arg(long)]
    pub audio: bool,

    /// Reconnect with backoff when the connection drops
    #[arg(long)]
    pub reconnect: bool,
}
