use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

/// Command-line interface for building the usage report.
#[derive(Debug, Parser)]
#[command(author, version, about = "Cross-tool AI assistant usage and spend report", long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file (defaults to ./ai-usage.toml if present).
    #[arg(long, value_name = "FILE")]
    pub config_path: Option<PathBuf>,
    /// First day covered by the report (defaults to the configured lookback).
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub start: Option<NaiveDate>,
    /// Last day covered by the report (defaults to today).
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub end: Option<NaiveDate>,
    /// Where to write the JSON report; `-` for stdout.
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// Skip unregistered user detection even if a directory is configured.
    #[arg(long)]
    pub no_directory: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dates_and_flags() {
        let cli = Cli::try_parse_from([
            "ai-usage-report",
            "--start",
            "2026-09-01",
            "--end",
            "2026-09-30",
            "--output",
            "-",
            "--no-directory",
        ])
        .unwrap();
        assert_eq!(cli.start, NaiveDate::from_ymd_opt(2026, 9, 1));
        assert_eq!(cli.end, NaiveDate::from_ymd_opt(2026, 9, 30));
        assert_eq!(cli.output, Some(PathBuf::from("-")));
        assert!(cli.no_directory);
        assert!(cli.config_path.is_none());
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!(Cli::try_parse_from(["ai-usage-report", "--start", "09/01/2026"]).is_err());
    }
}
