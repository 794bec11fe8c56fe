pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "musicof",
    about = "Music-of-the-day nomination bot for Slack",
    long_about = "Runs the musicof nomination game in a Slack channel, and inspects runtime readiness and effective configuration.",
    after_help = "Examples:\n  musicof\n  musicof doctor --json\n  musicof config"
)]
pub struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Path to the config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Connect to Slack and run the nomination game (the default)")]
    Run,
    #[command(about = "Validate config, Slack credentials, and game channel visibility")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => commands::run::run(config_path.as_deref()),
        Command::Doctor { json } => {
            println!("{}", commands::doctor::run(json, config_path.as_deref()));
            ExitCode::SUCCESS
        }
        Command::Config => {
            println!("{}", commands::config::run(config_path.as_deref()));
            ExitCode::SUCCESS
        }
    }
}
