use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "finger-kiosk",
    about = "Button-driven fingerprint kiosk with liveness-gated identification",
    version
)]
pub struct Cli {
    /// Configuration file; defaults to /etc/finger-kiosk/config.toml, then
    /// /usr/local/etc/finger-kiosk/config.toml
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Emit log lines as JSON instead of human-readable text
    #[arg(long)]
    pub json: bool,

    /// Increase verbosity (may be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}
