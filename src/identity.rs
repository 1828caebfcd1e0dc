use crate::tool::Tool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

/// Placeholder some providers put in the email field when they cannot resolve one.
pub const UNRESOLVED_MARKER: &str = "UNRESOLVED";

const LAST_ACTIVITY_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Canonical, case-insensitive key used to merge one person across tools.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_lowercase())
    }

    /// Bucket for an identity without a usable email, keyed by its secondary login.
    pub fn unresolved(login: &str) -> Self {
        Self::new(&format!("{UNRESOLVED_MARKER}#{}", login.trim()))
    }

    /// `~` and `/` never occur in a valid login, so these keys cannot meet a real one.
    fn anonymous(tool: Tool, ordinal: usize) -> Self {
        Self::unresolved(&format!("~anonymous/{}/{ordinal}", tool.id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unresolved(&self) -> bool {
        self.unresolved_login().is_some()
    }

    /// Secondary login of an unresolved key.
    pub fn unresolved_login(&self) -> Option<&str> {
        let (marker, login) = self.0.split_once('#')?;
        marker
            .eq_ignore_ascii_case(UNRESOLVED_MARKER)
            .then_some(login)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user as one identity source reports it, before merging.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawUserSnapshot {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<String>,
}

impl RawUserSnapshot {
    fn resolvable_email(&self) -> Option<&str> {
        non_empty(self.email.as_deref())
            .filter(|email| !email.eq_ignore_ascii_case(UNRESOLVED_MARKER) && email.contains('@'))
    }

    fn display_name(&self) -> Option<&str> {
        non_empty(self.display_name.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// How an identity's key was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailResolution {
    /// Keyed by an email supplied by at least one tool.
    Verified,
    /// Keyed by a secondary login under the unresolved marker.
    Unresolved,
}

/// Computes the merge key for a snapshot.
///
/// Emails win. Without one the key is the unresolved marker plus the display name,
/// then the login. A snapshot offering none of these gets a key unique to its
/// position in the source's batch so it can never absorb an unrelated person.
pub fn resolve_key(snapshot: &RawUserSnapshot, tool: Tool, ordinal: usize) -> IdentityKey {
    if let Some(email) = snapshot.resolvable_email() {
        return IdentityKey::new(email);
    }
    match snapshot
        .display_name()
        .or_else(|| non_empty(snapshot.login.as_deref()))
    {
        Some(login) => IdentityKey::unresolved(login),
        None => {
            tracing::warn!(tool = %tool, ordinal, "user snapshot has no email, name or login");
            IdentityKey::anonymous(tool, ordinal)
        }
    }
}

/// Per-tool facts kept on a unified identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolActivity {
    /// Formatted as `YYYY-MM-DD HH:MM` (UTC), empty when the tool reported none.
    pub last_activity: String,
    pub status: String,
}

/// One person merged across every identity source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedIdentity {
    pub key: IdentityKey,
    pub display_name: String,
    pub tools: BTreeMap<Tool, ToolActivity>,
    pub tools_count: usize,
    pub email_resolution: EmailResolution,
}

impl UnifiedIdentity {
    #[allow(dead_code)]
    pub fn uses(&self, tool: Tool) -> bool {
        self.tools.contains_key(&tool)
    }
}

#[derive(Debug, Default)]
struct ActivityDraft {
    last_activity: Option<DateTime<Utc>>,
    status: String,
}

/// In-progress merge state for a single identity key.
#[derive(Debug)]
pub struct IdentityBuilder {
    key: IdentityKey,
    display_name: Option<(String, u8)>,
    tools: BTreeMap<Tool, ActivityDraft>,
}

impl IdentityBuilder {
    pub fn new(key: IdentityKey) -> Self {
        Self {
            key,
            display_name: None,
            tools: BTreeMap::new(),
        }
    }

    pub fn apply_tool(&mut self, tool: Tool, snapshot: &RawUserSnapshot) {
        let draft = self.tools.entry(tool).or_default();
        draft.last_activity = draft.last_activity.max(snapshot.last_activity);
        if let Some(status) = non_empty(snapshot.status.as_deref()) {
            draft.status = status.to_string();
        }

        if let Some(name) = snapshot.display_name() {
            let priority = tool.name_priority();
            let replace = match &self.display_name {
                Some((_, current)) => priority > *current,
                None => true,
            };
            if replace {
                self.display_name = Some((name.to_string(), priority));
            }
        }
    }

    pub fn build(self) -> UnifiedIdentity {
        let email_resolution = if self.key.is_unresolved() {
            EmailResolution::Unresolved
        } else {
            EmailResolution::Verified
        };
        let display_name = match self.display_name {
            Some((name, _)) => name,
            None => self
                .key
                .unresolved_login()
                .unwrap_or(self.key.as_str())
                .to_string(),
        };
        let tools: BTreeMap<Tool, ToolActivity> = self
            .tools
            .into_iter()
            .map(|(tool, draft)| {
                let last_activity = draft
                    .last_activity
                    .map(|ts| ts.format(LAST_ACTIVITY_FORMAT).to_string())
                    .unwrap_or_default();
                (
                    tool,
                    ToolActivity {
                        last_activity,
                        status: draft.status,
                    },
                )
            })
            .collect();

        UnifiedIdentity {
            key: self.key,
            display_name,
            tools_count: tools.len(),
            tools,
            email_resolution,
        }
    }
}

/// Merges snapshots from every identity source into unified identities.
#[derive(Debug, Default)]
pub struct IdentityMerger {
    builders: HashMap<IdentityKey, IdentityBuilder>,
    ordinals: HashMap<Tool, usize>,
}

impl IdentityMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one snapshot reported under a raw tool identifier.
    /// Unknown identifiers are logged and skipped.
    #[allow(dead_code)]
    pub fn apply(&mut self, tool_id: &str, snapshot: &RawUserSnapshot) {
        match tool_id.parse::<Tool>() {
            Ok(tool) => self.apply_tool(tool, snapshot),
            Err(err) => tracing::warn!(error = %err, "skipping user snapshot from unknown tool"),
        }
    }

    pub fn apply_tool(&mut self, tool: Tool, snapshot: &RawUserSnapshot) {
        let ordinal = self.ordinals.entry(tool).or_insert(0);
        let key = resolve_key(snapshot, tool, *ordinal);
        *ordinal += 1;

        self.builders
            .entry(key.clone())
            .or_insert_with(|| IdentityBuilder::new(key))
            .apply_tool(tool, snapshot);
    }

    pub fn apply_batch(&mut self, tool: Tool, snapshots: &[RawUserSnapshot]) {
        for snapshot in snapshots {
            self.apply_tool(tool, snapshot);
        }
    }

    /// Finalizes all identities, most widely used first, then by key.
    pub fn finish(self) -> Vec<UnifiedIdentity> {
        let mut identities: Vec<UnifiedIdentity> =
            self.builders.into_values().map(IdentityBuilder::build).collect();
        // Keys are already lowercased, so plain ordering is case-insensitive.
        identities.sort_by(|a, b| {
            b.tools_count
                .cmp(&a.tools_count)
                .then_with(|| a.key.cmp(&b.key))
        });
        identities
    }
}

pub fn merge_identities<'a, I>(batches: I) -> Vec<UnifiedIdentity>
where
    I: IntoIterator<Item = (Tool, &'a [RawUserSnapshot])>,
{
    let mut merger = IdentityMerger::new();
    for (tool, snapshots) in batches {
        merger.apply_batch(tool, snapshots);
    }
    merger.finish()
}
