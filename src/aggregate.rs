use crate::{
    directory::DirectoryResolver,
    identity::IdentityKey,
    tool::Tool,
    usage::{NullableSum, SpendingRecord, UsageRecord},
};
use chrono::NaiveDate;
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Report-wide totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_cost: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub distinct_users: usize,
    pub cost_by_tool: BTreeMap<Tool, f64>,
}

/// Usage of one tool by one identity over the report range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserToolRow {
    pub identity: IdentityKey,
    pub tool: Tool,
    pub last_usage: NaiveDate,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_tokens: Option<u64>,
    pub lines_suggested: Option<u64>,
    pub lines_accepted: Option<u64>,
    /// Percentage of suggested lines that were accepted.
    pub acceptance_rate: Option<f64>,
    pub cost: Option<f64>,
}

/// An identity active in more than one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiToolRow {
    pub identity: IdentityKey,
    pub tools: BTreeSet<Tool>,
    pub tools_count: usize,
    pub last_usage: NaiveDate,
    pub total_tokens: Option<u64>,
    pub total_lines_suggested: Option<u64>,
    pub total_lines_accepted: Option<u64>,
    pub total_cost: Option<f64>,
}

/// A login with activity in a tool that reports no email, unknown to the directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnregisteredRow {
    pub login: String,
    pub tool: Tool,
    pub last_usage: NaiveDate,
    pub lines_suggested: Option<u64>,
    pub lines_accepted: Option<u64>,
}

#[derive(Debug, Default, Clone, Copy)]
struct UsageTotals {
    input_tokens: NullableSum<u64>,
    output_tokens: NullableSum<u64>,
    cache_tokens: NullableSum<u64>,
    lines_suggested: NullableSum<u64>,
    lines_accepted: NullableSum<u64>,
}

impl UsageTotals {
    fn add(&mut self, record: &UsageRecord) {
        self.input_tokens.add(record.input_tokens);
        self.output_tokens.add(record.output_tokens);
        self.cache_tokens.add(record.cache_tokens);
        self.lines_suggested.add(record.lines_suggested);
        self.lines_accepted.add(record.lines_accepted);
    }

    /// input + output + cache under the same absent-only-if-all-absent rule.
    fn all_tokens(&self) -> NullableSum<u64> {
        let mut total = NullableSum::new();
        total.merge(self.input_tokens);
        total.merge(self.output_tokens);
        total.merge(self.cache_tokens);
        total
    }
}

struct Group {
    last_usage: NaiveDate,
    totals: UsageTotals,
}

impl Group {
    fn new(record: &UsageRecord) -> Self {
        Self {
            last_usage: record.date,
            totals: UsageTotals::default(),
        }
    }

    fn add(&mut self, record: &UsageRecord) {
        self.last_usage = self.last_usage.max(record.date);
        self.totals.add(record);
    }
}

pub fn acceptance_rate(suggested: Option<u64>, accepted: Option<u64>) -> Option<f64> {
    match (suggested, accepted) {
        (Some(suggested), Some(accepted)) if suggested > 0 => {
            Some(accepted as f64 / suggested as f64 * 100.0)
        }
        _ => None,
    }
}

pub fn summarize(usage: &[UsageRecord], spending: &[SpendingRecord]) -> Summary {
    let mut cost_by_tool: BTreeMap<Tool, f64> = BTreeMap::new();
    let mut total_cost = 0.0;
    for record in spending {
        let amount = record.amount.unwrap_or(0.0);
        total_cost += amount;
        *cost_by_tool.entry(record.tool).or_insert(0.0) += amount;
    }

    let currencies: BTreeSet<&str> = spending.iter().map(|r| r.currency.as_str()).collect();
    if currencies.len() > 1 {
        tracing::warn!(?currencies, "spending spans several currencies; totals add them as-is");
    }

    let distinct_users: BTreeSet<&IdentityKey> = usage.iter().map(|r| &r.identity).collect();

    Summary {
        total_cost,
        total_input_tokens: usage
            .iter()
            .filter_map(|r| r.input_tokens)
            .fold(0, u64::saturating_add),
        total_output_tokens: usage
            .iter()
            .filter_map(|r| r.output_tokens)
            .fold(0, u64::saturating_add),
        distinct_users: distinct_users.len(),
        cost_by_tool,
    }
}

fn costs_by_identity_tool(
    spending: &[SpendingRecord],
) -> HashMap<(&IdentityKey, Tool), NullableSum<f64>> {
    let mut costs: HashMap<(&IdentityKey, Tool), NullableSum<f64>> = HashMap::new();
    for record in spending {
        costs
            .entry((&record.identity, record.tool))
            .or_default()
            .add(record.amount);
    }
    costs
}

/// One row per (identity, tool) seen in usage, ordered by identity then tool.
pub fn user_tool_rows(usage: &[UsageRecord], spending: &[SpendingRecord]) -> Vec<UserToolRow> {
    let mut groups: BTreeMap<(&IdentityKey, Tool), Group> = BTreeMap::new();
    for record in usage {
        groups
            .entry((&record.identity, record.tool))
            .or_insert_with(|| Group::new(record))
            .add(record);
    }

    let costs = costs_by_identity_tool(spending);

    groups
        .into_iter()
        .map(|((identity, tool), group)| {
            let totals = group.totals;
            let lines_suggested = totals.lines_suggested.value();
            let lines_accepted = totals.lines_accepted.value();
            UserToolRow {
                identity: identity.clone(),
                tool,
                last_usage: group.last_usage,
                input_tokens: totals.input_tokens.value(),
                output_tokens: totals.output_tokens.value(),
                cache_tokens: totals.cache_tokens.value(),
                lines_suggested,
                lines_accepted,
                acceptance_rate: acceptance_rate(lines_suggested, lines_accepted),
                cost: costs
                    .get(&(identity, tool))
                    .and_then(|cost| cost.value()),
            }
        })
        .collect()
}

/// Identities using two or more tools, widest usage first.
pub fn multi_tool_rows(usage: &[UsageRecord], spending: &[SpendingRecord]) -> Vec<MultiToolRow> {
    let mut groups: BTreeMap<&IdentityKey, (BTreeSet<Tool>, Group)> = BTreeMap::new();
    for record in usage {
        let (tools, group) = groups
            .entry(&record.identity)
            .or_insert_with(|| (BTreeSet::new(), Group::new(record)));
        tools.insert(record.tool);
        group.add(record);
    }

    let mut costs: HashMap<&IdentityKey, NullableSum<f64>> = HashMap::new();
    for record in spending {
        costs.entry(&record.identity).or_default().add(record.amount);
    }

    let mut rows: Vec<MultiToolRow> = groups
        .into_iter()
        .filter(|(_, (tools, _))| tools.len() > 1)
        .map(|(identity, (tools, group))| MultiToolRow {
            identity: identity.clone(),
            tools_count: tools.len(),
            tools,
            last_usage: group.last_usage,
            total_tokens: group.totals.all_tokens().value(),
            total_lines_suggested: group.totals.lines_suggested.value(),
            total_lines_accepted: group.totals.lines_accepted.value(),
            total_cost: costs.get(identity).and_then(|cost| cost.value()),
        })
        .collect();

    rows.sort_by(|a, b| {
        b.tools_count
            .cmp(&a.tools_count)
            .then_with(|| a.identity.cmp(&b.identity))
    });
    rows
}

/// Logins from tools without native emails that the directory does not know.
///
/// Returns `None` when no directory is available, meaning detection was skipped.
pub async fn unregistered_rows(
    usage: &[UsageRecord],
    resolver: Option<&DirectoryResolver>,
) -> Option<Vec<UnregisteredRow>> {
    let Some(resolver) = resolver else {
        tracing::warn!("directory unavailable; skipping unregistered user detection");
        return None;
    };

    let mut groups: BTreeMap<(Tool, &IdentityKey), (Option<&str>, Group)> = BTreeMap::new();
    for record in usage.iter().filter(|r| !r.tool.has_native_email()) {
        let (login, group) = groups
            .entry((record.tool, &record.identity))
            .or_insert_with(|| (None, Group::new(record)));
        if login.is_none() {
            *login = record.login();
        }
        group.add(record);
    }

    let candidates = groups.into_iter().filter_map(|((tool, key), (login, group))| {
        let login = match login.or_else(|| key.unresolved_login()) {
            Some(login) => login,
            // Keyed by a verified email already: registered, nothing to look up.
            None if key.as_str().contains('@') => return None,
            None => key.as_str(),
        };
        Some((tool, login.to_string(), group))
    });

    let checked = join_all(candidates.map(|(tool, login, group)| async move {
        let email = resolver.find_email_by_git_name(&login).await;
        (tool, login, group, email)
    }))
    .await;

    let mut rows: Vec<UnregisteredRow> = checked
        .into_iter()
        .filter(|(_, _, _, email)| email.is_none())
        .map(|(tool, login, group, _)| UnregisteredRow {
            login,
            tool,
            last_usage: group.last_usage,
            lines_suggested: group.totals.lines_suggested.value(),
            lines_accepted: group.totals.lines_accepted.value(),
        })
        .collect();
    rows.sort_by(|a, b| a.login.cmp(&b.login).then_with(|| a.tool.cmp(&b.tool)));

    tracing::info!(unregistered = rows.len(), "unregistered user detection finished");
    Some(rows)
}
