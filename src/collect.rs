use crate::{
    error::{CollectError, Operation},
    identity::RawUserSnapshot,
    tool::Tool,
    usage::{DateRange, SpendingRecord, UsageRecord},
};
use anyhow::Result;
use async_trait::async_trait;
use futures::{FutureExt, future::join_all};
use serde::Serialize;
use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

/// A provider that reports per-user usage and spend for a date range.
#[async_trait]
pub trait UsageCollector: Send + Sync {
    fn tool(&self) -> Tool;

    async fn collect_usage(&self, range: DateRange) -> Result<Vec<UsageRecord>>;

    async fn collect_spending(&self, range: DateRange) -> Result<Vec<SpendingRecord>>;
}

/// A provider that lists its licensed users.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    fn tool(&self) -> Tool;

    fn display_name(&self) -> &str {
        self.tool().label()
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn fetch_users(&self) -> Result<Vec<RawUserSnapshot>>;
}

/// Outcome of one bounded source call.
pub type Attempt<T> = std::result::Result<Vec<T>, CollectError>;

/// A source call that contributed nothing to the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    pub tool: Tool,
    pub operation: Operation,
    pub reason: String,
}

impl From<&CollectError> for SourceFailure {
    fn from(err: &CollectError) -> Self {
        Self {
            tool: err.tool(),
            operation: err.operation(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Collected {
    pub usage: Vec<UsageRecord>,
    pub spending: Vec<SpendingRecord>,
    pub failures: Vec<SourceFailure>,
}

#[derive(Debug, Default)]
pub struct CollectedUsers {
    pub batches: Vec<(Tool, Vec<RawUserSnapshot>)>,
    pub failures: Vec<SourceFailure>,
}

/// Runs `call` under `timeout`, turning errors, panics and timeouts into a [`CollectError`].
pub async fn attempt<T, F>(tool: Tool, operation: Operation, timeout: Duration, call: F) -> Attempt<T>
where
    F: Future<Output = Result<Vec<T>>>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(call).catch_unwind()).await {
        Ok(Ok(Ok(records))) => Ok(records),
        Ok(Ok(Err(err))) => Err(CollectError::failed(tool, operation, &err)),
        Ok(Err(payload)) => Err(CollectError::Failed {
            tool,
            operation,
            message: format!("panicked: {}", panic_message(&*payload)),
        }),
        Err(_) => Err(CollectError::Timeout {
            tool,
            operation,
            after: timeout,
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Adds a successful attempt to `target`, or records the failure and contributes nothing.
fn fold_attempt<T>(target: &mut Vec<T>, failures: &mut Vec<SourceFailure>, attempt: Attempt<T>) {
    match attempt {
        Ok(records) => target.extend(records),
        Err(err) => {
            tracing::warn!(tool = %err.tool(), operation = %err.operation(), error = %err, "source collection failed; continuing without it");
            failures.push(SourceFailure::from(&err));
        }
    }
}

/// Invokes usage and spending collection on every collector concurrently.
///
/// Each call is bounded and isolated: one failing call never affects another.
/// Results are concatenated in collector registration order.
pub async fn collect_all(
    collectors: &[Arc<dyn UsageCollector>],
    range: DateRange,
    timeout: Duration,
) -> Collected {
    let attempts = join_all(collectors.iter().map(|collector| async move {
        let tool = collector.tool();
        tokio::join!(
            attempt(tool, Operation::Usage, timeout, collector.collect_usage(range)),
            attempt(tool, Operation::Spending, timeout, collector.collect_spending(range)),
        )
    }))
    .await;

    let mut collected = Collected::default();
    for (usage, spending) in attempts {
        fold_attempt(&mut collected.usage, &mut collected.failures, usage);
        fold_attempt(&mut collected.spending, &mut collected.failures, spending);
    }

    tracing::info!(
        collectors = collectors.len(),
        usage_records = collected.usage.len(),
        spending_records = collected.spending.len(),
        failures = collected.failures.len(),
        "collection finished"
    );
    collected
}

/// Fetches user snapshots from every enabled identity source.
pub async fn collect_identities(
    sources: &[Arc<dyn IdentitySource>],
    timeout: Duration,
) -> CollectedUsers {
    let enabled: Vec<&Arc<dyn IdentitySource>> = sources
        .iter()
        .filter(|source| {
            if !source.is_enabled() {
                tracing::debug!(source = source.display_name(), "identity source disabled");
            }
            source.is_enabled()
        })
        .collect();

    let attempts = join_all(enabled.iter().map(|source| async move {
        let tool = source.tool();
        (
            tool,
            attempt(tool, Operation::Users, timeout, source.fetch_users()).await,
        )
    }))
    .await;

    let mut collected = CollectedUsers::default();
    for (tool, result) in attempts {
        let mut users = Vec::new();
        fold_attempt(&mut users, &mut collected.failures, result);
        collected.batches.push((tool, users));
    }
    collected
}
