use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// AI coding assistants the report knows how to merge.
///
/// Variant order is the column order used for per-tool output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Copilot,
    Cursor,
    ClaudeCode,
    Windsurf,
    Codex,
}

/// (tool, display label, display-name priority). Higher priority wins name contention.
const TOOL_TABLE: &[(Tool, &str, u8)] = &[
    (Tool::Copilot, "GitHub Copilot", 1),
    (Tool::Windsurf, "Windsurf", 2),
    (Tool::Codex, "OpenAI Codex", 3),
    (Tool::Cursor, "Cursor", 4),
    (Tool::ClaudeCode, "Claude Code", 5),
];

impl Tool {
    pub const ALL: [Tool; 5] = [
        Tool::Copilot,
        Tool::Cursor,
        Tool::ClaudeCode,
        Tool::Windsurf,
        Tool::Codex,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Tool::Copilot => "copilot",
            Tool::Cursor => "cursor",
            Tool::ClaudeCode => "claude_code",
            Tool::Windsurf => "windsurf",
            Tool::Codex => "codex",
        }
    }

    pub fn label(self) -> &'static str {
        self.entry().1
    }

    pub fn name_priority(self) -> u8 {
        self.entry().2
    }

    /// Whether the provider reports a verified corporate email for its users.
    /// Tools without one are checked against the directory for unregistered logins.
    pub fn has_native_email(self) -> bool {
        !matches!(self, Tool::Copilot)
    }

    fn entry(self) -> &'static (Tool, &'static str, u8) {
        TOOL_TABLE
            .iter()
            .find(|(tool, _, _)| *tool == self)
            .unwrap_or(&TOOL_TABLE[0])
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tool id `{0}`")]
pub struct UnknownTool(pub String);

impl FromStr for Tool {
    type Err = UnknownTool;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Tool::ALL
            .into_iter()
            .find(|tool| {
                tool.id().eq_ignore_ascii_case(trimmed) || tool.label().eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| UnknownTool(trimmed.to_string()))
    }
}
