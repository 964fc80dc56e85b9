use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "courier",
    about = "Media Courier - fetch media links and deliver them to Telegram chats",
    version,
    long_about = "A Telegram bot that downloads media with yt-dlp, converts it with ffmpeg when a fixed output format is configured, keeps files under the upload limit by stepping down in quality, and uploads the result back to the chat."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Configuration file (defaults to ./config.yaml or the user config dir)
    #[arg(short, long, global = true, value_name = "FILE", env = "COURIER_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the Telegram bot
    Run,

    /// Run a single job locally and save the result
    Fetch {
        /// Media URL
        #[arg(value_name = "URL")]
        url: String,

        /// Fetch the audio track only
        #[arg(short, long)]
        audio: bool,

        /// Directory the result is copied into
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output: PathBuf,
    },

    /// List the formats available for a URL and show which one would be picked
    Formats {
        /// Media URL
        #[arg(value_name = "URL")]
        url: String,

        /// Pick as for an audio request
        #[arg(short, long)]
        audio: bool,
    },

    /// Show the effective configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// Check that the external tools are installed
    Check,
}
