use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{Agent, ReasoningMode};
use crate::error::{FlowError, Result};
use crate::llm::LanguageModel;
use crate::tool::ToolRegistry;
use crate::workflow::{AgentWorkflow, RunOptions};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            organization: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> String {
    "huggingface".into()
}

fn default_model() -> String {
    "Qwen/Qwen2.5-Coder-32B-Instruct".into()
}

fn default_request_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Bound on every model call and tool invocation.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_max_handoffs")]
    pub max_handoffs: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            max_handoffs: default_max_handoffs(),
        }
    }
}

fn default_max_handoffs() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub mode: ReasoningMode,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub can_handoff_to: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_search_results")]
    pub search_max_results: usize,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_webpage_chars")]
    pub webpage_max_chars: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            search_max_results: default_search_results(),
            http_timeout_secs: default_http_timeout(),
            webpage_max_chars: default_webpage_chars(),
        }
    }
}

fn default_search_results() -> usize {
    5
}

fn default_http_timeout() -> u64 {
    10
}

fn default_webpage_chars() -> usize {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FlowConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub root_agent: Option<String>,
    #[serde(default, rename = "agent")]
    pub agents: Vec<AgentConfig>,
}

impl FlowConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| FlowError::Configuration(format!("failed to parse configuration: {err}")))
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    pub fn apply_env(&mut self) {
        if let Ok(provider) = env::var("AGENTFLOW_PROVIDER") {
            self.model.provider = provider;
        }
        if let Ok(model) = env::var("AGENTFLOW_MODEL") {
            self.model.model = model;
        }
        if let Ok(url) = env::var("AGENTFLOW_BASE_URL") {
            self.model.base_url = Some(url);
        }
        if self.model.api_key.is_none() {
            let provider_key = match self.model.provider.as_str() {
                "huggingface" => env::var("HF_TOKEN").ok(),
                "openai" => env::var("OPENAI_API_KEY").ok(),
                _ => None,
            };
            self.model.api_key = provider_key;
        }
        if let Ok(key) = env::var("AGENTFLOW_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Ok(timeout) = env::var("AGENTFLOW_TIMEOUT_SECS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                self.run.timeout_secs = Some(parsed);
            }
        }
        if let Ok(max) = env::var("AGENTFLOW_MAX_HANDOFFS") {
            if let Ok(parsed) = max.parse::<usize>() {
                self.run.max_handoffs = parsed;
            }
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            timeout: self.run.timeout_secs.map(Duration::from_secs),
            max_handoffs: self.run.max_handoffs,
        }
    }

    /// Wire the configured agents into a workflow over `tools`, all sharing `model`.
    pub fn build_workflow(
        &self,
        tools: ToolRegistry,
        model: Arc<dyn LanguageModel>,
    ) -> Result<AgentWorkflow> {
        if self.agents.is_empty() {
            return Err(FlowError::Configuration(
                "no agents configured; add at least one [[agent]] table".into(),
            ));
        }
        let root = self
            .root_agent
            .clone()
            .unwrap_or_else(|| self.agents[0].name.clone());

        let mut builder = AgentWorkflow::builder()
            .tools(tools)
            .root(root)
            .options(self.run_options());
        for agent_cfg in &self.agents {
            let mut agent = Agent::new(agent_cfg.name.clone(), Arc::clone(&model))
                .with_description(agent_cfg.description.clone())
                .with_tools(agent_cfg.tools.iter().cloned())
                .with_mode(agent_cfg.mode)
                .with_handoff_targets(agent_cfg.can_handoff_to.iter().cloned());
            if let Some(prompt) = &agent_cfg.system_prompt {
                agent = agent.with_system_prompt(prompt.clone());
            }
            if let Some(max_steps) = agent_cfg.max_steps {
                agent = agent.with_max_steps(max_steps);
            }
            builder = builder.agent(agent);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::llm::StubModel;
    use crate::tools::calculator_toolkit;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MULTI_AGENT: &str = r#"
root_agent = "multiply_agent"

[model]
provider = "openai"
model = "gpt-4o"

[run]
timeout_secs = 30

[[agent]]
name = "multiply_agent"
description = "Is able to multiply two integers"
system_prompt = "A helpful assistant that can use a tool to multiply numbers."
tools = ["multiply"]
mode = "react_loop"
max_steps = 4

[[agent]]
name = "add_agent"
description = "Is able to add two integers"
tools = ["add"]
"#;

    #[test]
    fn loads_agents_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{MULTI_AGENT}").unwrap();

        env::set_var("AGENTFLOW_MAX_HANDOFFS", "3");
        let cfg = FlowConfig::from_env_or_file(file.path()).unwrap();
        env::remove_var("AGENTFLOW_MAX_HANDOFFS");

        assert_eq!(cfg.model.provider, "openai");
        assert_eq!(cfg.model.request_timeout_secs, 60);
        assert_eq!(cfg.run.max_handoffs, 3);
        assert_eq!(cfg.run_options().timeout, Some(Duration::from_secs(30)));
        assert_eq!(cfg.agents.len(), 2);
        assert_eq!(cfg.agents[0].mode, ReasoningMode::ReactLoop);
        assert_eq!(cfg.agents[1].mode, ReasoningMode::Direct);
        assert_eq!(cfg.root_agent.as_deref(), Some("multiply_agent"));
    }

    #[test]
    fn builds_workflow_from_config() {
        let cfg = FlowConfig::from_toml(MULTI_AGENT).unwrap();
        let model = StubModel::new(vec![]);
        let workflow = cfg.build_workflow(calculator_toolkit().unwrap(), model).unwrap();
        assert_eq!(workflow.root(), "multiply_agent");
        assert_eq!(workflow.agent_names(), vec!["add_agent", "multiply_agent"]);
    }

    #[test]
    fn rejects_unknown_root() {
        let mut cfg = FlowConfig::from_toml(MULTI_AGENT).unwrap();
        cfg.root_agent = Some("missing".into());
        let err = cfg
            .build_workflow(calculator_toolkit().unwrap(), StubModel::new(vec![]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn reports_parse_errors_as_configuration() {
        let err = FlowConfig::from_toml("[[agent]]\ntools = 5").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
