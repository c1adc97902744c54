//! Ready-made agent sets for running without a configuration file.

use agentflow::{AgentConfig, FlowConfig, ModelConfig, ReasoningMode};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    /// One ReAct calculator agent with add and subtract.
    Calculator,
    /// multiply_agent at the root, handing addition to add_agent.
    MultiAgent,
    /// Alfred planning a party at Wayne Manor.
    Party,
    /// Web search only.
    Search,
    /// Describe the attached images with a vision model.
    Image,
}

fn agent(name: &str, description: &str, prompt: &str, tools: &[&str]) -> AgentConfig {
    AgentConfig {
        name: name.into(),
        description: description.into(),
        system_prompt: Some(prompt.into()),
        tools: tools.iter().map(|t| t.to_string()).collect(),
        mode: ReasoningMode::ReactLoop,
        max_steps: None,
        can_handoff_to: Vec::new(),
    }
}

pub fn config(preset: Preset) -> FlowConfig {
    let mut cfg = FlowConfig::default();
    let agents = match preset {
        Preset::Calculator => vec![agent(
            "calculator",
            "Performs basic arithmetic operations",
            "You are a calculator assistant. Use your tools for any math operation.",
            &["add", "subtract"],
        )],
        Preset::MultiAgent => vec![
            agent(
                "multiply_agent",
                "Is able to multiply two integers",
                "A helpful assistant that can use a tool to multiply numbers.",
                &["multiply"],
            ),
            agent(
                "add_agent",
                "Is able to add two integers",
                "A helpful assistant that can use a tool to add numbers.",
                &["add"],
            ),
        ],
        Preset::Party => vec![AgentConfig {
            max_steps: Some(10),
            ..agent(
                "alfred",
                "Butler of Wayne Manor, plans parties",
                "You are Alfred, the butler of Wayne Manor. Plan the party the user asks \
                 about, using your tools for menus, catering, themes and research.",
                &[
                    "web_search",
                    "visit_webpage",
                    "suggest_menu",
                    "catering_service",
                    "superhero_party_theme",
                ],
            )
        }],
        Preset::Search => vec![agent(
            "researcher",
            "Searches the web",
            "You answer questions by searching the web and citing what you found.",
            &["web_search"],
        )],
        Preset::Image => {
            cfg.model = ModelConfig {
                provider: "openai".into(),
                model: "gpt-4o".into(),
                ..ModelConfig::default()
            };
            vec![AgentConfig {
                mode: ReasoningMode::Direct,
                ..agent(
                    "inspector",
                    "Identifies party guests from photos",
                    "You inspect photos of party guests. Describe the costume and makeup \
                     of the character in the attached images and say who they are.",
                    &[],
                )
            }]
        }
    };
    cfg.agents = agents;
    cfg
}
