use crate::{
    collect::{IdentitySource, UsageCollector},
    config::SourceConfig,
    identity::{IdentityKey, RawUserSnapshot},
    tool::Tool,
    usage::{DateRange, Metadata, SpendingRecord, UsageRecord},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Months, NaiveDate};
use serde::{Deserialize, de::DeserializeOwned};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Provider exports stored as JSON Lines, one file per record kind.
#[derive(Debug, Clone)]
pub struct JsonlSource {
    tool: Tool,
    enabled: bool,
    usage_path: Option<PathBuf>,
    spending_path: Option<PathBuf>,
    users_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct UsageLine {
    identity: String,
    date: NaiveDate,
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    cache_tokens: Option<u64>,
    #[serde(default)]
    lines_suggested: Option<u64>,
    #[serde(default)]
    lines_accepted: Option<u64>,
    #[serde(default)]
    acceptance_rate: Option<f64>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SpendingLine {
    identity: String,
    period: String,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[allow(dead_code)]
impl JsonlSource {
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            enabled: true,
            usage_path: None,
            spending_path: None,
            users_path: None,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Option<Self> {
        let tool = config.tool()?;
        Some(Self {
            tool,
            enabled: config.enabled,
            usage_path: config.usage_path.clone(),
            spending_path: config.spending_path.clone(),
            users_path: config.users_path.clone(),
        })
    }

    pub fn with_usage(mut self, path: impl Into<PathBuf>) -> Self {
        self.usage_path = Some(path.into());
        self
    }

    pub fn with_spending(mut self, path: impl Into<PathBuf>) -> Self {
        self.spending_path = Some(path.into());
        self
    }

    pub fn with_users(mut self, path: impl Into<PathBuf>) -> Self {
        self.users_path = Some(path.into());
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl UsageCollector for JsonlSource {
    fn tool(&self) -> Tool {
        self.tool
    }

    async fn collect_usage(&self, range: DateRange) -> Result<Vec<UsageRecord>> {
        let Some(path) = self.usage_path.as_deref() else {
            return Ok(Vec::new());
        };
        let lines: Vec<UsageLine> = read_jsonl(path).await?;
        Ok(lines
            .into_iter()
            .filter(|line| range.contains(line.date))
            .map(|line| UsageRecord {
                identity: IdentityKey::new(&line.identity),
                tool: self.tool,
                date: line.date,
                input_tokens: line.input_tokens,
                output_tokens: line.output_tokens,
                cache_tokens: line.cache_tokens,
                lines_suggested: line.lines_suggested,
                lines_accepted: line.lines_accepted,
                acceptance_rate: line.acceptance_rate,
                metadata: Metadata::from(line.metadata),
            })
            .collect())
    }

    async fn collect_spending(&self, range: DateRange) -> Result<Vec<SpendingRecord>> {
        let Some(path) = self.spending_path.as_deref() else {
            return Ok(Vec::new());
        };
        let lines: Vec<SpendingLine> = read_jsonl(path).await?;
        Ok(lines
            .into_iter()
            .filter(|line| match period_bounds(&line.period) {
                Some((start, end)) => range.overlaps(start, end),
                None => true,
            })
            .map(|line| {
                let mut record = SpendingRecord::new(
                    IdentityKey::new(&line.identity),
                    self.tool,
                    line.period,
                    line.amount,
                    line.currency,
                );
                record.metadata = Metadata::from(line.metadata);
                record
            })
            .collect())
    }
}

#[async_trait]
impl IdentitySource for JsonlSource {
    fn tool(&self) -> Tool {
        self.tool
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn fetch_users(&self) -> Result<Vec<RawUserSnapshot>> {
        match self.users_path.as_deref() {
            Some(path) => read_jsonl(path).await,
            None => Ok(Vec::new()),
        }
    }
}

/// Parses `YYYY-MM-DD` as a single day and `YYYY-MM` as a calendar month.
fn period_bounds(period: &str) -> Option<(NaiveDate, NaiveDate)> {
    let period = period.trim();
    if let Ok(day) = NaiveDate::parse_from_str(period, "%Y-%m-%d") {
        return Some((day, day));
    }
    let first = NaiveDate::parse_from_str(&format!("{period}-01"), "%Y-%m-%d").ok()?;
    let last = first.checked_add_months(Months::new(1))?.pred_opt()?;
    Some((first, last))
}

async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read export {}", path.display()))?;

    let mut out = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(value) => out.push(value),
            Err(err) => {
                tracing::warn!(error = %err, path = %path.display(), line = idx + 1, "skipping malformed export line");
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::LOGIN_METADATA_KEY;
    use std::fs;
    use tempfile::TempDir;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn usage_export_is_parsed_and_filtered_by_range() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "usage.jsonl",
            concat!(
                r#"{"identity":" Jane@Corp.example ","date":"2026-09-02","input_tokens":120,"metadata":{"login":"jane-gh"}}"#,
                "\n",
                "\n",
                "not json\n",
                r#"{"identity":"jane@corp.example","date":"2026-10-02","input_tokens":5}"#,
                "\n",
                r#"{"identity":"bob@corp.example","date":"2026-09-30","lines_suggested":10,"lines_accepted":4}"#,
                "\n",
            ),
        );
        let source = JsonlSource::new(Tool::Copilot).with_usage(path);

        let range = DateRange::new(day(9, 1), day(9, 30));
        let records = source.collect_usage(range).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].identity.as_str(), "jane@corp.example");
        assert_eq!(records[0].input_tokens, Some(120));
        assert_eq!(records[0].output_tokens, None);
        assert_eq!(records[0].metadata.get(LOGIN_METADATA_KEY), Some("jane-gh"));
        assert_eq!(records[1].lines_accepted, Some(4));
        assert!(records.iter().all(|r| r.tool == Tool::Copilot));
    }

    #[tokio::test]
    async fn spending_export_filters_recognised_periods() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "spending.jsonl",
            concat!(
                r#"{"identity":"a@corp.example","period":"2026-09","amount":40.0}"#,
                "\n",
                r#"{"identity":"a@corp.example","period":"2026-07","amount":99.0}"#,
                "\n",
                r#"{"identity":"a@corp.example","period":"2026-09-15","amount":1.0,"currency":"eur"}"#,
                "\n",
                r#"{"identity":"b@corp.example","period":"Q3 2026"}"#,
                "\n",
            ),
        );
        let source = JsonlSource::new(Tool::Cursor).with_spending(path);

        let range = DateRange::new(day(9, 10), day(9, 20));
        let records = source.collect_spending(range).await.unwrap();
        let periods: Vec<&str> = records.iter().map(|r| r.period.as_str()).collect();
        assert_eq!(periods, vec!["2026-09", "2026-09-15", "Q3 2026"]);
        assert_eq!(records[0].currency, "USD");
        assert_eq!(records[1].currency, "EUR");
        assert_eq!(records[2].amount, None);
    }

    #[tokio::test]
    async fn users_export_yields_snapshots() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "users.jsonl",
            concat!(
                r#"{"email":"a@corp.example","display_name":"Ann","last_activity":"2026-09-14T08:30:00Z","status":"active"}"#,
                "\n",
                r#"{"email":"UNRESOLVED","display_name":"bob-login"}"#,
                "\n",
            ),
        );
        let source = JsonlSource::new(Tool::Windsurf).with_users(path);

        let users = source.fetch_users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].status.as_deref(), Some("active"));
        assert!(users[0].last_activity.is_some());
        assert_eq!(users[1].display_name.as_deref(), Some("bob-login"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error_but_unset_path_is_empty() {
        let dir = TempDir::new().unwrap();
        let range = DateRange::new(day(9, 1), day(9, 30));

        let source = JsonlSource::new(Tool::Codex).with_usage(dir.path().join("absent.jsonl"));
        assert!(source.collect_usage(range).await.is_err());
        assert!(source.collect_spending(range).await.unwrap().is_empty());
        assert!(source.fetch_users().await.unwrap().is_empty());
    }

    #[test]
    fn period_bounds_handles_months_and_days() {
        assert_eq!(period_bounds("2026-02"), Some((day(2, 1), day(2, 28))));
        assert_eq!(period_bounds("2026-12"), Some((day(12, 1), day(12, 31))));
        assert_eq!(period_bounds(" 2026-09-15 "), Some((day(9, 15), day(9, 15))));
        assert_eq!(period_bounds("last month"), None);
    }

    #[test]
    fn from_config_skips_unknown_tools() {
        let config = SourceConfig {
            tool: "tabnine".into(),
            enabled: true,
            usage_path: None,
            spending_path: None,
            users_path: None,
        };
        assert!(JsonlSource::from_config(&config).is_none());

        let config = SourceConfig {
            tool: "claude_code".into(),
            enabled: false,
            ..config
        };
        let source = JsonlSource::from_config(&config).unwrap();
        assert_eq!(UsageCollector::tool(&source), Tool::ClaudeCode);
        assert!(!source.enabled());
    }
}
