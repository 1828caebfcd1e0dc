mod aggregate;
mod app;
mod cli;
mod collect;
mod config;
mod directory;
mod error;
mod identity;
mod report;
mod sources;
mod tool;
mod usage;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use std::{fs::OpenOptions, path::Path};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let config = config::AppConfig::load(cli.config_path.as_deref())?;
    init_tracing(config.logging.file.as_deref());
    for warning in &config.warnings {
        tracing::warn!("{warning}");
    }

    let range = app::resolve_range(
        Local::now().date_naive(),
        config.report.lookback_days,
        cli.start,
        cli.end,
    );
    let options = app::RunOptions {
        range,
        output: cli
            .output
            .clone()
            .unwrap_or_else(|| config.report.output_path.clone()),
        use_directory: !cli.no_directory,
    };

    app::App::new(config).run(options).await
}

fn init_tracing(log_file: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false);

    // The report may go to stdout, so logs never do.
    let file = log_file.and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| eprintln!("failed to open log file {}: {err}", path.display()))
            .ok()
    });
    let _ = match file {
        Some(file) => builder.with_writer(std::sync::Mutex::new(file)).try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };
}
