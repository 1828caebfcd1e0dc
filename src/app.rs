use crate::{
    collect::{self, IdentitySource, UsageCollector},
    config::AppConfig,
    directory::DirectoryResolver,
    identity,
    report::Report,
    sources::JsonlSource,
    usage::DateRange,
};
use anyhow::Result;
use chrono::{Days, NaiveDate};
use std::{path::PathBuf, sync::Arc};

/// Per-invocation choices layered on top of the configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub range: DateRange,
    pub output: PathBuf,
    pub use_directory: bool,
}

/// High-level report orchestrator.
pub struct App {
    config: Arc<AppConfig>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn sources(&self) -> Vec<Arc<JsonlSource>> {
        self.config
            .sources
            .iter()
            .filter_map(JsonlSource::from_config)
            .map(Arc::new)
            .collect()
    }

    /// `None` when the directory cannot be used; detection is then skipped.
    fn resolver(&self, use_directory: bool) -> Option<DirectoryResolver> {
        if !use_directory {
            tracing::info!("directory lookups disabled for this run");
            return None;
        }
        match DirectoryResolver::from_config(&self.config.directory) {
            Ok(resolver) => Some(resolver),
            Err(err) => {
                tracing::warn!(error = %err, "directory unavailable");
                None
            }
        }
    }

    pub async fn build_report(&self, range: DateRange, use_directory: bool) -> Report {
        let timeout = self.config.report.collector_timeout();
        let sources = self.sources();

        let collectors: Vec<Arc<dyn UsageCollector>> = sources
            .iter()
            .filter(|source| source.enabled())
            .map(|source| source.clone() as Arc<dyn UsageCollector>)
            .collect();
        let identity_sources: Vec<Arc<dyn IdentitySource>> = sources
            .iter()
            .map(|source| source.clone() as Arc<dyn IdentitySource>)
            .collect();

        tracing::info!(
            start = %range.start,
            end = %range.end,
            collectors = collectors.len(),
            "building usage report"
        );

        let (mut collected, users) = tokio::join!(
            collect::collect_all(&collectors, range, timeout),
            collect::collect_identities(&identity_sources, timeout),
        );

        let identities = identity::merge_identities(
            users
                .batches
                .iter()
                .map(|(tool, snapshots)| (*tool, snapshots.as_slice())),
        );
        collected.failures.extend(users.failures);

        let resolver = self.resolver(use_directory);
        Report::build(range, collected, identities, resolver.as_ref()).await
    }

    pub async fn run(self, options: RunOptions) -> Result<()> {
        let report = self.build_report(options.range, options.use_directory).await;
        report.write_to(&options.output)?;
        tracing::info!(
            output = %options.output.display(),
            users = report.summary.distinct_users,
            rows = report.user_tool_rows.len(),
            failures = report.failures.len(),
            "report written"
        );
        Ok(())
    }
}

/// Range ending at `end` (or `today`) and starting at `start` (or `lookback_days` earlier).
pub fn resolve_range(
    today: NaiveDate,
    lookback_days: u32,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> DateRange {
    let end = end.unwrap_or(today);
    let start = start.unwrap_or_else(|| {
        end.checked_sub_days(Days::new(u64::from(lookback_days.saturating_sub(1))))
            .unwrap_or(end)
    });
    DateRange::new(start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SourceConfig, error::Operation, tool::Tool};
    use std::fs;
    use tempfile::TempDir;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    #[test]
    fn range_defaults_to_lookback_ending_today() {
        let range = resolve_range(day(10, 19), 30, None, None);
        assert_eq!(range.start, day(9, 20));
        assert_eq!(range.end, day(10, 19));

        let range = resolve_range(day(10, 19), 30, Some(day(10, 1)), Some(day(10, 5)));
        assert_eq!((range.start, range.end), (day(10, 1), day(10, 5)));
    }

    fn source(tool: &str, dir: &TempDir, usage: Option<&str>, users: Option<&str>) -> SourceConfig {
        let write = |name: String, body: &str| {
            let path = dir.path().join(name);
            fs::write(&path, body).unwrap();
            path
        };
        SourceConfig {
            tool: tool.to_string(),
            enabled: true,
            usage_path: usage.map(|body| write(format!("{tool}-usage.jsonl"), body)),
            spending_path: None,
            users_path: users.map(|body| write(format!("{tool}-users.jsonl"), body)),
        }
    }

    #[tokio::test]
    async fn report_survives_broken_sources_and_missing_directory() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.sources = vec![
            source(
                "cursor",
                &dir,
                Some(r#"{"identity":"a@corp.example","date":"2026-09-02","input_tokens":7}"#),
                Some(r#"{"email":"a@corp.example","display_name":"Ann"}"#),
            ),
            SourceConfig {
                usage_path: Some(dir.path().join("missing.jsonl")),
                ..source("codex", &dir, None, None)
            },
            source("tabnine", &dir, None, None),
            source(
                "copilot",
                &dir,
                Some(r#"{"identity":"a@corp.example","date":"2026-09-03","lines_suggested":4}"#),
                Some(r#"{"email":"A@corp.example","display_name":"ann-gh"}"#),
            ),
        ];

        let app = App::new(config);
        let report = app
            .build_report(DateRange::new(day(9, 1), day(9, 30)), true)
            .await;

        assert_eq!(report.user_tool_rows.len(), 2);
        assert_eq!(report.multi_tool_rows.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].tool, Tool::Codex);
        assert_eq!(report.failures[0].operation, Operation::Usage);
        assert!(!report.unregistered_checked);

        assert_eq!(report.identities.len(), 1);
        assert_eq!(report.identities[0].tools_count, 2);
        assert_eq!(report.identities[0].display_name, "Ann");
    }
}
