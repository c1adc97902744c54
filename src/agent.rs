use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowError, Result};
use crate::llm::{LanguageModel, ModelCompletion};
use crate::message::ToolCall;
use crate::react::{parse_react_output, react_instructions, render_history, ReactOutput};
use crate::retry::RetryPolicy;
use crate::session::SessionContext;
use crate::tool::{ToolSpec, ValueType};

/// Name of the pseudo-tool through which a model hands control to a peer.
pub const HANDOFF_TOOL: &str = "handoff";

pub const DEFAULT_MAX_STEPS: usize = 10;

/// How an agent reasons toward an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    /// Native function calling, at most one tool call per activation.
    #[default]
    Direct,
    /// Bounded reason → act → observe loop over a text protocol.
    ReactLoop,
}

/// What a peer needs to know about an agent to route to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
}

/// One completed act → observe cycle of the current activation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningStep {
    pub thought: Option<String>,
    pub action: ToolCall,
    pub observation: Value,
}

/// Everything an agent sees besides the session when taking a step.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    /// Message that started the current activation (user input or handoff reason).
    pub message: &'a str,
    /// Specs of the tools this agent may call.
    pub tools: &'a [ToolSpec],
    /// Agents this one may hand off to.
    pub peers: &'a [AgentCard],
    /// Steps already taken in this activation, oldest first.
    pub trace: &'a [ReasoningStep],
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentStepResult {
    FinalAnswer(String),
    ToolCall {
        name: String,
        arguments: Value,
        thought: Option<String>,
    },
    Handoff {
        target: String,
        message: String,
    },
}

/// A named reasoning unit: prompt, permitted tools, strategy and model.
#[derive(Clone)]
pub struct Agent {
    name: String,
    description: String,
    system_prompt: String,
    tools: BTreeSet<String>,
    mode: ReasoningMode,
    max_steps: usize,
    handoff_targets: BTreeSet<String>,
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("tools", &self.tools)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

impl Agent {
    pub fn new(name: impl Into<String>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: "You are a helpful agent.".to_string(),
            tools: BTreeSet::new(),
            mode: ReasoningMode::Direct,
            max_steps: DEFAULT_MAX_STEPS,
            handoff_targets: BTreeSet::new(),
            model,
            retry: RetryPolicy::once(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn with_mode(mut self, mode: ReasoningMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn react(self) -> Self {
        self.with_mode(ReasoningMode::ReactLoop)
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Restrict handoffs to these peers. Without any, every other agent is a candidate.
    pub fn with_handoff_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handoff_targets
            .extend(targets.into_iter().map(Into::into));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn mode(&self) -> ReasoningMode {
        self.mode
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn tool_names(&self) -> &BTreeSet<String> {
        &self.tools
    }

    pub fn handoff_targets(&self) -> &BTreeSet<String> {
        &self.handoff_targets
    }

    pub fn can_call(&self, tool: &str) -> bool {
        self.tools.contains(tool)
    }

    pub fn card(&self) -> AgentCard {
        AgentCard {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }

    /// Take one reasoning step: answer, request a tool, or hand off.
    pub async fn step(
        &self,
        context: &SessionContext,
        input: &StepInput<'_>,
    ) -> Result<AgentStepResult> {
        match self.mode {
            ReasoningMode::Direct => self.direct_step(context, input).await,
            ReasoningMode::ReactLoop => self.react_step(context, input).await,
        }
    }

    async fn direct_step(
        &self,
        context: &SessionContext,
        input: &StepInput<'_>,
    ) -> Result<AgentStepResult> {
        let prompt = self.build_prompt(context, input);
        let history = context.history();

        if !input.trace.is_empty() {
            let text = self
                .retry
                .retry(&self.name, |_| self.model.complete(&prompt, &history))
                .await?;
            return Ok(AgentStepResult::FinalAnswer(text));
        }

        let offered = offered_tools(input);
        let completion = self
            .retry
            .retry(&self.name, |_| {
                self.model.complete_with_tools(&prompt, &history, &offered)
            })
            .await?;
        match completion {
            ModelCompletion::Text(text) => Ok(AgentStepResult::FinalAnswer(text)),
            ModelCompletion::ToolCall(call) => {
                self.resolve_action(call.name, call.arguments, None, input)
            }
        }
    }

    async fn react_step(
        &self,
        context: &SessionContext,
        input: &StepInput<'_>,
    ) -> Result<AgentStepResult> {
        if input.trace.len() >= self.max_steps {
            return Err(FlowError::StepLimitExceeded {
                agent: self.name.clone(),
                max_steps: self.max_steps,
                partial: best_partial(input.trace),
            });
        }

        let offered = offered_tools(input);
        let prompt = format!(
            "{}\n\n{}",
            self.build_prompt(context, input),
            react_instructions(&offered)
        );
        let history = render_history(&context.history());
        let raw = self
            .retry
            .retry(&self.name, |_| self.model.complete(&prompt, &history))
            .await?;
        tracing::trace!(agent = %self.name, %raw, "react output");

        match parse_react_output(&raw)? {
            ReactOutput::Answer { answer, .. } => Ok(AgentStepResult::FinalAnswer(answer)),
            ReactOutput::Action {
                thought,
                name,
                input: arguments,
            } => self.resolve_action(name, arguments, thought, input),
        }
    }

    fn resolve_action(
        &self,
        name: String,
        arguments: Value,
        thought: Option<String>,
        input: &StepInput<'_>,
    ) -> Result<AgentStepResult> {
        if name == HANDOFF_TOOL && !input.peers.is_empty() {
            let target = arguments
                .get("to_agent")
                .and_then(Value::as_str)
                .ok_or_else(|| FlowError::argument(HANDOFF_TOOL, "missing `to_agent`"))?;
            let reason = arguments
                .get("reason")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|reason| !reason.is_empty())
                .unwrap_or(input.message);
            return Ok(AgentStepResult::Handoff {
                target: target.to_string(),
                message: reason.to_string(),
            });
        }

        if !self.can_call(&name) || !input.tools.iter().any(|spec| spec.name == name) {
            return Err(FlowError::ToolNotPermitted {
                agent: self.name.clone(),
                tool: name,
            });
        }
        Ok(AgentStepResult::ToolCall {
            name,
            arguments,
            thought,
        })
    }

    fn build_prompt(&self, context: &SessionContext, input: &StepInput<'_>) -> String {
        let mut prompt = self.system_prompt.clone();
        if !input.peers.is_empty() {
            prompt.push_str(&format!(
                "\n\nYou are the agent `{}`. If another agent is better suited for the \
                 current request, call the `{HANDOFF_TOOL}` tool. Available agents:\n",
                self.name
            ));
            for peer in input.peers {
                prompt.push_str(&format!("- {}: {}\n", peer.name, peer.description));
            }
        }
        let variables = context.variables();
        if !variables.is_empty() {
            prompt.push_str(&format!(
                "\n\nConversation state: {}\n",
                Value::Object(variables)
            ));
        }
        prompt
    }
}

fn offered_tools(input: &StepInput<'_>) -> Vec<ToolSpec> {
    let mut offered = input.tools.to_vec();
    if !input.peers.is_empty() {
        offered.push(handoff_spec(input.peers));
    }
    offered
}

/// Spec of the pseudo-tool used to transfer control to a peer.
pub fn handoff_spec(peers: &[AgentCard]) -> ToolSpec {
    let names: Vec<&str> = peers.iter().map(|p| p.name.as_str()).collect();
    ToolSpec::new(
        HANDOFF_TOOL,
        format!(
            "Hand the conversation to another agent better suited to the request. \
             Valid agents: {}.",
            names.join(", ")
        ),
    )
    .input("to_agent", ValueType::String, "Name of the agent to hand off to")
    .input(
        "reason",
        ValueType::String,
        "Why the other agent should take over",
    )
    .output(ValueType::String)
}

fn best_partial(trace: &[ReasoningStep]) -> Option<String> {
    let last = trace.last()?;
    last.thought.clone().or_else(|| match &last.observation {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    })
}
