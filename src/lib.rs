//! Multi-agent dispatch and handoff runtime.
//!
//! The crate provides:
//! - A tool abstraction with typed input schemas (`Tool`, `ToolRegistry`).
//! - Agents that answer directly with native function calling or run a bounded
//!   reason/act/observe loop (`Agent`, `ReasoningMode`).
//! - Conversation state shared across runs (`SessionContext`, `SessionStore`).
//! - An orchestrator that moves control between agents through explicit
//!   handoffs (`AgentWorkflow`).

mod agent;
mod config;
mod error;
mod hooks;
mod llm;
mod message;
mod react;
mod retry;
mod session;
mod tool;
mod workflow;

pub mod tools;

pub use agent::{
    handoff_spec, Agent, AgentCard, AgentStepResult, ReasoningMode, ReasoningStep, StepInput,
    DEFAULT_MAX_STEPS, HANDOFF_TOOL,
};
pub use config::{AgentConfig, FlowConfig, ModelConfig, RunConfig, ToolsConfig};
pub use error::{ErrorKind, FlowError, InferenceErrorKind, Result};
pub use hooks::WorkflowHook;
pub use llm::{
    LanguageModel, ModelCompletion, OpenAiCompatibleClient, RecordedRequest, StubModel,
    HUGGING_FACE_BASE_URL, OPENAI_BASE_URL,
};
pub use message::{Attachment, AttachmentKind, Message, Role, ToolCall, ToolResult};
pub use react::{parse_react_output, react_instructions, render_history, ReactOutput};
pub use retry::RetryPolicy;
pub use session::{RunLease, SessionContext, SessionSnapshot, SessionStore};
pub use tool::{FunctionTool, Tool, ToolParam, ToolRegistry, ToolSpec, ValueType};
pub use workflow::{
    AgentWorkflow, AgentWorkflowBuilder, RunOptions, RunOutput, DEFAULT_MAX_HANDOFFS,
};
