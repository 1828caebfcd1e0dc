use crate::{
    aggregate::{self, MultiToolRow, Summary, UnregisteredRow, UserToolRow},
    collect::{Collected, SourceFailure},
    directory::DirectoryResolver,
    identity::UnifiedIdentity,
    usage::DateRange,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    fs,
    io::{self, Write},
    path::Path,
};

/// Everything one run produces, ready for an external writer.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub range: DateRange,
    pub summary: Summary,
    pub user_tool_rows: Vec<UserToolRow>,
    pub multi_tool_rows: Vec<MultiToolRow>,
    /// Empty when detection was skipped; see `unregistered_checked`.
    pub unregistered_rows: Vec<UnregisteredRow>,
    pub unregistered_checked: bool,
    pub identities: Vec<UnifiedIdentity>,
    pub failures: Vec<SourceFailure>,
}

impl Report {
    pub async fn build(
        range: DateRange,
        collected: Collected,
        identities: Vec<UnifiedIdentity>,
        resolver: Option<&DirectoryResolver>,
    ) -> Self {
        let Collected {
            usage,
            spending,
            failures,
        } = collected;

        let summary = aggregate::summarize(&usage, &spending);
        let user_tool_rows = aggregate::user_tool_rows(&usage, &spending);
        let multi_tool_rows = aggregate::multi_tool_rows(&usage, &spending);
        let unregistered = aggregate::unregistered_rows(&usage, resolver).await;

        Self {
            generated_at: Utc::now(),
            range,
            summary,
            user_tool_rows,
            multi_tool_rows,
            unregistered_checked: unregistered.is_some(),
            unregistered_rows: unregistered.unwrap_or_default(),
            identities,
            failures,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize report")
    }

    /// Writes the report as JSON; `-` means stdout.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        if path == Path::new("-") {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(json.as_bytes())
                .and_then(|_| stdout.write_all(b"\n"))
                .context("failed to write report to stdout")?;
            return Ok(());
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, json).with_context(|| format!("failed to write report {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Operation,
        identity::IdentityKey,
        tool::Tool,
        usage::{SpendingRecord, UsageRecord},
    };
    use chrono::NaiveDate;
    use serde_json::Value;
    use tempfile::TempDir;

    fn sample_collected() -> Collected {
        let date = NaiveDate::from_ymd_opt(2026, 9, 3).unwrap();
        let mut cursor = UsageRecord::new(IdentityKey::new("a@corp.example"), Tool::Cursor, date);
        cursor.input_tokens = Some(100);
        let codex = UsageRecord::new(IdentityKey::new("a@corp.example"), Tool::Codex, date);
        Collected {
            usage: vec![cursor, codex],
            spending: vec![SpendingRecord::new(
                IdentityKey::new("a@corp.example"),
                Tool::Cursor,
                "2026-09",
                Some(20.0),
                None,
            )],
            failures: vec![SourceFailure {
                tool: Tool::Windsurf,
                operation: Operation::Spending,
                reason: "HTTP 503".into(),
            }],
        }
    }

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 9, 30).unwrap(),
        )
    }

    #[tokio::test]
    async fn build_assembles_every_section() {
        let report = Report::build(range(), sample_collected(), Vec::new(), None).await;
        assert_eq!(report.summary.distinct_users, 1);
        assert_eq!(report.user_tool_rows.len(), 2);
        assert_eq!(report.multi_tool_rows.len(), 1);
        assert!(!report.unregistered_checked);
        assert!(report.unregistered_rows.is_empty());
        assert_eq!(report.failures.len(), 1);
    }

    #[tokio::test]
    async fn json_uses_tool_ids_and_nulls() {
        let report = Report::build(range(), sample_collected(), Vec::new(), None).await;
        let value: Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(value["summary"]["cost_by_tool"]["cursor"], 20.0);
        assert_eq!(value["range"]["start"], "2026-09-01");
        let codex_row = value["user_tool_rows"]
            .as_array()
            .unwrap()
            .iter()
            .find(|row| row["tool"] == "codex")
            .unwrap();
        assert!(codex_row["input_tokens"].is_null());
        assert_eq!(value["failures"][0]["operation"], "spending");
    }

    #[tokio::test]
    async fn write_to_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/report.json");
        let report = Report::build(range(), sample_collected(), Vec::new(), None).await;

        report.write_to(&path).unwrap();
        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["multi_tool_rows"][0]["tools_count"], 2);
    }
}
