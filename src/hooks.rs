use async_trait::async_trait;

use crate::error::Result;
use crate::message::{ToolCall, ToolResult};

/// Observer for the events of a workflow run.
///
/// Every method defaults to a no-op. Returning an error aborts the run with
/// that error.
#[async_trait]
pub trait WorkflowHook: Send + Sync {
    async fn on_agent_start(&self, _agent: &str, _input: &str) -> Result<()> {
        Ok(())
    }

    async fn before_tool_call(&self, _agent: &str, _call: &ToolCall) -> Result<()> {
        Ok(())
    }

    async fn after_tool_result(&self, _agent: &str, _result: &ToolResult) -> Result<()> {
        Ok(())
    }

    async fn on_handoff(&self, _from: &str, _to: &str, _reason: &str) -> Result<()> {
        Ok(())
    }

    async fn on_final_answer(&self, _agent: &str, _answer: &str) -> Result<()> {
        Ok(())
    }
}
