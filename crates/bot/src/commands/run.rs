use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use musicof_core::config::{AppConfig, LoadOptions};
use musicof_slack::bot::Bot;

pub fn run(config_path: Option<&Path>) -> ExitCode {
    let options =
        LoadOptions { config_path: config_path.map(Path::to_path_buf), ..LoadOptions::default() };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("config validation failed: {error}");
            return ExitCode::from(2);
        }
    };
    init_logging(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to initialize async runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_until_shutdown(&config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "musicof did not shut down cleanly");
            ExitCode::FAILURE
        }
    }
}

async fn run_until_shutdown(config: &AppConfig) -> Result<()> {
    let bot = Bot::start(config).await?;
    tracing::info!("musicof is running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    bot.stop().await?;
    tracing::info!("musicof stopped cleanly");
    Ok(())
}

fn init_logging(config: &AppConfig) {
    use musicof_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}
