use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlowError>;

/// Why a model endpoint call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceErrorKind {
    RateLimited,
    Auth,
    Network,
    InvalidResponse,
    Other,
}

impl fmt::Display for InferenceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InferenceErrorKind::RateLimited => "rate limited",
            InferenceErrorKind::Auth => "authentication failed",
            InferenceErrorKind::Network => "network error",
            InferenceErrorKind::InvalidResponse => "invalid response",
            InferenceErrorKind::Other => "request failed",
        };
        f.write_str(label)
    }
}

/// Coarse failure taxonomy reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    DuplicateTool,
    UnknownTool,
    ToolNotPermitted,
    Argument,
    ToolExecution,
    Inference,
    StepLimitExceeded,
    HandoffCycle,
    InvalidHandoff,
    ConcurrentAccess,
    Timeout,
    Protocol,
    Io,
    Serde,
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("tool `{0}` is already registered")]
    DuplicateTool(String),

    #[error("tool `{0}` not found")]
    UnknownTool(String),

    #[error("agent `{agent}` is not permitted to call tool `{tool}`")]
    ToolNotPermitted { agent: String, tool: String },

    #[error("invalid arguments for tool `{tool}`: {message}")]
    Argument { tool: String, message: String },

    #[error("tool `{name}` invocation failed: {source}")]
    ToolExecution {
        name: String,
        transient: bool,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("language model error ({kind}): {message}")]
    Inference {
        kind: InferenceErrorKind,
        message: String,
    },

    #[error("agent `{agent}` reached the step limit of {max_steps} without answering")]
    StepLimitExceeded {
        agent: String,
        max_steps: usize,
        partial: Option<String>,
    },

    #[error("handoff cycle detected: {0}")]
    HandoffCycle(String),

    #[error("agent `{from}` cannot hand off to `{to}`")]
    InvalidHandoff { from: String, to: String },

    #[error("conversation `{0}` is already being driven by another run")]
    ConcurrentAccess(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl FlowError {
    pub fn inference(kind: InferenceErrorKind, message: impl Into<String>) -> Self {
        FlowError::Inference {
            kind,
            message: message.into(),
        }
    }

    pub fn argument(tool: impl Into<String>, message: impl Into<String>) -> Self {
        FlowError::Argument {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Wrap a tool failure that should not be retried.
    pub fn tool_failure(
        name: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        FlowError::ToolExecution {
            name: name.into(),
            transient: false,
            source: source.into(),
        }
    }

    /// Wrap a tool failure caused by a flaky collaborator (network, throttling).
    pub fn transient_tool_failure(
        name: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        FlowError::ToolExecution {
            name: name.into(),
            transient: true,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::Configuration(_) => ErrorKind::Configuration,
            FlowError::DuplicateTool(_) => ErrorKind::DuplicateTool,
            FlowError::UnknownTool(_) => ErrorKind::UnknownTool,
            FlowError::ToolNotPermitted { .. } => ErrorKind::ToolNotPermitted,
            FlowError::Argument { .. } => ErrorKind::Argument,
            FlowError::ToolExecution { .. } => ErrorKind::ToolExecution,
            FlowError::Inference { .. } => ErrorKind::Inference,
            FlowError::StepLimitExceeded { .. } => ErrorKind::StepLimitExceeded,
            FlowError::HandoffCycle(_) => ErrorKind::HandoffCycle,
            FlowError::InvalidHandoff { .. } => ErrorKind::InvalidHandoff,
            FlowError::ConcurrentAccess(_) => ErrorKind::ConcurrentAccess,
            FlowError::Timeout { .. } => ErrorKind::Timeout,
            FlowError::Protocol(_) => ErrorKind::Protocol,
            FlowError::Io(_) => ErrorKind::Io,
            FlowError::Serde(_) => ErrorKind::Serde,
        }
    }

    /// Failures worth a single retry within the same step.
    pub fn is_transient(&self) -> bool {
        match self {
            FlowError::Inference { kind, .. } => matches!(
                kind,
                InferenceErrorKind::RateLimited | InferenceErrorKind::Network
            ),
            FlowError::ToolExecution { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Best partial answer carried by a step-limit failure.
    pub fn partial_answer(&self) -> Option<&str> {
        match self {
            FlowError::StepLimitExceeded { partial, .. } => partial.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_failures() {
        assert!(FlowError::inference(InferenceErrorKind::RateLimited, "429").is_transient());
        assert!(FlowError::inference(InferenceErrorKind::Network, "reset").is_transient());
        assert!(!FlowError::inference(InferenceErrorKind::Auth, "401").is_transient());
        assert!(FlowError::transient_tool_failure("web_search", "timeout").is_transient());
        assert!(!FlowError::tool_failure("divide", "division by zero").is_transient());
        assert!(!FlowError::UnknownTool("x".into()).is_transient());
    }

    #[test]
    fn exposes_partial_answer() {
        let err = FlowError::StepLimitExceeded {
            agent: "calculator".into(),
            max_steps: 2,
            partial: Some("probably 8".into()),
        };
        assert_eq!(err.kind(), ErrorKind::StepLimitExceeded);
        assert_eq!(err.partial_answer(), Some("probably 8"));
    }
}
