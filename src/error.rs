use crate::tool::Tool;
use std::{fmt, time::Duration};
use thiserror::Error;

/// Which half of a collector was being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Usage,
    Spending,
    Users,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Usage => "usage",
            Operation::Spending => "spending",
            Operation::Users => "users",
        })
    }
}

/// Failure of a single source call. Always recovered by omitting that contribution.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("{tool} {operation} collection timed out after {}s", .after.as_secs())]
    Timeout {
        tool: Tool,
        operation: Operation,
        after: Duration,
    },
    #[error("{tool} {operation} collection failed: {message}")]
    Failed {
        tool: Tool,
        operation: Operation,
        message: String,
    },
}

impl CollectError {
    pub fn failed(tool: Tool, operation: Operation, err: &anyhow::Error) -> Self {
        CollectError::Failed {
            tool,
            operation,
            message: format!("{err:#}"),
        }
    }

    pub fn tool(&self) -> Tool {
        match self {
            CollectError::Timeout { tool, .. } | CollectError::Failed { tool, .. } => *tool,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            CollectError::Timeout { operation, .. } | CollectError::Failed { operation, .. } => {
                *operation
            }
        }
    }
}
