use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ustozbot")]
#[command(author, version, about = "Telegram AI English tutor bot with daily quotas and premium entitlements", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the bot (this is also what plain `ustozbot` does)
    Run,

    /// Scan for expired premiums once and exit
    Sweep {
        /// Only show what would be expired without actually doing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Reset every user's daily counter to zero
    ResetLimits,

    /// Print user and usage totals
    Stats,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
