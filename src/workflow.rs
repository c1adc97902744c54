//! Orchestration of a group of agents over one shared conversation.
//!
//! Exactly one agent is active at a time. A run starts at the root agent and
//! moves between agents only through explicit handoffs; tool calls are
//! executed here, through the shared [`ToolRegistry`], and their observations
//! are fed back to the agent that asked for them.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::agent::{Agent, AgentCard, AgentStepResult, ReasoningStep, StepInput, HANDOFF_TOOL};
use crate::error::{FlowError, Result};
use crate::hooks::WorkflowHook;
use crate::llm::LanguageModel;
use crate::message::{Message, ToolCall};
use crate::retry::RetryPolicy;
use crate::session::SessionContext;
use crate::tool::{ToolRegistry, ToolSpec};

pub const DEFAULT_MAX_HANDOFFS: usize = 16;

/// Per-run limits.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Bound on every agent step and every tool invocation.
    pub timeout: Option<Duration>,
    pub max_handoffs: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_handoffs: DEFAULT_MAX_HANDOFFS,
        }
    }
}

impl RunOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_handoffs(mut self, max_handoffs: usize) -> Self {
        self.max_handoffs = max_handoffs;
        self
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub answer: String,
    /// Agent that produced the answer.
    pub agent: String,
    /// Agents activated during the run, root first.
    pub path: Vec<String>,
    pub tool_calls: usize,
    pub steps: usize,
}

impl fmt::Display for RunOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.answer)
    }
}

struct AgentSlot {
    agent: Agent,
    tools: Vec<ToolSpec>,
    peers: Vec<AgentCard>,
}

pub struct AgentWorkflow {
    agents: BTreeMap<String, AgentSlot>,
    root: String,
    tools: ToolRegistry,
    options: RunOptions,
    retry: RetryPolicy,
    hooks: Vec<Arc<dyn WorkflowHook>>,
}

impl fmt::Debug for AgentWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentWorkflow")
            .field("root", &self.root)
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("tools", &self.tools)
            .field("options", &self.options)
            .finish()
    }
}

#[derive(Default)]
pub struct AgentWorkflowBuilder {
    agents: Vec<Agent>,
    root: Option<String>,
    tools: ToolRegistry,
    options: RunOptions,
    retry: RetryPolicy,
    hooks: Vec<Arc<dyn WorkflowHook>>,
}

impl AgentWorkflowBuilder {
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn agents(mut self, agents: impl IntoIterator<Item = Agent>) -> Self {
        self.agents.extend(agents);
        self
    }

    /// Agent that receives every run's input. Defaults to the first agent added.
    pub fn root(mut self, name: impl Into<String>) -> Self {
        self.root = Some(name.into());
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn hook(mut self, hook: Arc<dyn WorkflowHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn build(self) -> Result<AgentWorkflow> {
        let root = match (&self.root, self.agents.first()) {
            (Some(root), _) => root.clone(),
            (None, Some(first)) => first.name().to_string(),
            (None, None) => {
                return Err(FlowError::Configuration(
                    "a workflow needs at least one agent".into(),
                ))
            }
        };

        let mut cards = BTreeMap::new();
        for agent in &self.agents {
            if cards
                .insert(agent.name().to_string(), agent.card())
                .is_some()
            {
                return Err(FlowError::Configuration(format!(
                    "agent `{}` is defined more than once",
                    agent.name()
                )));
            }
        }
        if !cards.contains_key(&root) {
            return Err(FlowError::Configuration(format!(
                "root agent `{root}` is not defined"
            )));
        }

        let mut agents = BTreeMap::new();
        for agent in self.agents {
            let mut tools = Vec::with_capacity(agent.tool_names().len());
            for name in agent.tool_names() {
                if name == HANDOFF_TOOL {
                    return Err(FlowError::Configuration(format!(
                        "agent `{}` uses tool `{HANDOFF_TOOL}`, which is reserved for handoffs",
                        agent.name()
                    )));
                }
                let spec = self.tools.spec(name).ok_or_else(|| {
                    FlowError::Configuration(format!(
                        "agent `{}` references unknown tool `{name}`",
                        agent.name()
                    ))
                })?;
                tools.push(spec.clone());
            }

            for target in agent.handoff_targets() {
                if target == agent.name() {
                    return Err(FlowError::Configuration(format!(
                        "agent `{target}` cannot hand off to itself"
                    )));
                }
                if !cards.contains_key(target) {
                    return Err(FlowError::Configuration(format!(
                        "agent `{}` may hand off to unknown agent `{target}`",
                        agent.name()
                    )));
                }
            }
            let peers = cards
                .values()
                .filter(|card| card.name != agent.name())
                .filter(|card| {
                    agent.handoff_targets().is_empty()
                        || agent.handoff_targets().contains(&card.name)
                })
                .cloned()
                .collect();

            agents.insert(
                agent.name().to_string(),
                AgentSlot {
                    agent,
                    tools,
                    peers,
                },
            );
        }

        Ok(AgentWorkflow {
            agents,
            root,
            tools: self.tools,
            options: self.options,
            retry: self.retry,
            hooks: self.hooks,
        })
    }
}

impl AgentWorkflow {
    pub fn builder() -> AgentWorkflowBuilder {
        AgentWorkflowBuilder::default()
    }

    /// Single function-calling agent over every tool in `tools`.
    pub fn from_tools(tools: ToolRegistry, model: Arc<dyn LanguageModel>) -> Result<Self> {
        let agent = Agent::new("agent", model)
            .with_description("Agent that can use the provided tools.")
            .with_tools(tools.names());
        Self::builder().tools(tools).agent(agent).build()
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn WorkflowHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.get(name).map(|slot| &slot.agent)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run against a fresh, throwaway context.
    pub async fn run_stateless(&self, input: impl Into<Message>) -> Result<RunOutput> {
        self.run(&SessionContext::new(), input).await
    }

    /// Drive `input` to a final answer, recording every turn in `context`.
    ///
    /// On failure the turns recorded so far stay in `context`.
    pub async fn run(
        &self,
        context: &SessionContext,
        input: impl Into<Message>,
    ) -> Result<RunOutput> {
        let _lease = context.begin_run()?;
        let message = input.into();
        let mut activation_input = message.content.clone();
        tracing::info!(
            conversation = %context.conversation_id(),
            root = %self.root,
            "starting run"
        );
        context.append_turn(message);

        let mut current = self.root.clone();
        let mut path = vec![current.clone()];
        let mut activations: HashSet<(String, u64)> = HashSet::new();
        let mut handoffs = 0usize;
        let mut tool_calls = 0usize;
        let mut steps = 0usize;

        loop {
            if !activations.insert((current.clone(), input_hash(&activation_input))) {
                return Err(FlowError::HandoffCycle(format!(
                    "agent `{current}` was handed the same request twice"
                )));
            }
            let slot = self.slot(&current)?;
            for hook in &self.hooks {
                hook.on_agent_start(&current, &activation_input).await?;
            }

            let mut trace: Vec<ReasoningStep> = Vec::new();
            let (target, reason) = loop {
                let input = StepInput {
                    message: &activation_input,
                    tools: &slot.tools,
                    peers: &slot.peers,
                    trace: &trace,
                };
                steps += 1;
                tracing::debug!(agent = %current, step = trace.len() + 1, "agent step");
                let result = self
                    .bounded(
                        || format!("step of agent `{current}`"),
                        slot.agent.step(context, &input),
                    )
                    .await?;

                match result {
                    AgentStepResult::FinalAnswer(answer) => {
                        for hook in &self.hooks {
                            hook.on_final_answer(&current, &answer).await?;
                        }
                        context.append_turn(Message::assistant(answer.clone()).from_agent(&current));
                        tracing::info!(agent = %current, steps, tool_calls, "run finished");
                        return Ok(RunOutput {
                            answer,
                            agent: current,
                            path,
                            tool_calls,
                            steps,
                        });
                    }
                    AgentStepResult::ToolCall {
                        name,
                        arguments,
                        thought,
                    } => {
                        let call = ToolCall {
                            id: Some(format!("call-{}", context.len())),
                            name,
                            arguments,
                        };
                        for hook in &self.hooks {
                            hook.before_tool_call(&current, &call).await?;
                        }
                        let observation = self.invoke_tool(&current, &call).await?;

                        let request = Message::tool_call(
                            thought
                                .as_deref()
                                .map(|t| format!("Thought: {t}"))
                                .unwrap_or_default(),
                            call.clone(),
                        )
                        .from_agent(&current);
                        let response =
                            Message::tool(&call.name, observation.clone(), call.id.clone())
                                .from_agent(&current);
                        if let Some(result) = &response.tool_result {
                            for hook in &self.hooks {
                                hook.after_tool_result(&current, result).await?;
                            }
                        }
                        context.append_turns([request, response]);

                        tool_calls += 1;
                        trace.push(ReasoningStep {
                            thought,
                            action: call,
                            observation,
                        });
                    }
                    AgentStepResult::Handoff { target, message } => break (target, message),
                }
            };

            if !slot.peers.iter().any(|peer| peer.name == target) {
                return Err(FlowError::InvalidHandoff {
                    from: current,
                    to: target,
                });
            }
            handoffs += 1;
            if handoffs > self.options.max_handoffs {
                return Err(FlowError::HandoffCycle(format!(
                    "more than {} handoffs in one run",
                    self.options.max_handoffs
                )));
            }
            for hook in &self.hooks {
                hook.on_handoff(&current, &target, &reason).await?;
            }
            tracing::info!(from = %current, to = %target, %reason, "handoff");
            context.append_turn(
                Message::assistant(format!("Handing off to `{target}`: {reason}"))
                    .from_agent(&current),
            );

            path.push(target.clone());
            current = target;
            activation_input = reason;
        }
    }

    fn slot(&self, name: &str) -> Result<&AgentSlot> {
        self.agents.get(name).ok_or_else(|| {
            FlowError::Configuration(format!("agent `{name}` is not part of this workflow"))
        })
    }

    async fn invoke_tool(&self, agent: &str, call: &ToolCall) -> Result<Value> {
        tracing::debug!(%agent, tool = %call.name, arguments = %call.arguments, "invoking tool");
        self.retry
            .retry(&call.name, |_| {
                self.bounded(
                    || format!("tool `{}`", call.name),
                    self.tools.invoke(&call.name, call.arguments.clone()),
                )
            })
            .await
    }

    async fn bounded<T, F>(&self, operation: impl FnOnce() -> String, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.options.timeout {
            Some(after) => tokio::time::timeout(after, fut)
                .await
                .map_err(|_| FlowError::Timeout {
                    operation: operation(),
                    after,
                })?,
            None => fut.await,
        }
    }
}

fn input_hash(input: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    input.trim().hash(&mut hasher);
    hasher.finish()
}
