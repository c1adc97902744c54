//! Text protocol for the reason-act-observe loop.
//!
//! The model is asked to reply in a `Thought / Action / Action Input` or
//! `Thought / Answer` shape; observations are fed back as user turns.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{FlowError, Result};
use crate::message::{Message, Role};
use crate::tool::ToolSpec;

/// A parsed model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReactOutput {
    Action {
        thought: Option<String>,
        name: String,
        input: Value,
    },
    Answer {
        thought: Option<String>,
        answer: String,
    },
}

pub fn react_instructions(tools: &[ToolSpec]) -> String {
    let mut out = String::new();
    out.push_str("## Tools\n\n");
    if tools.is_empty() {
        out.push_str("No tools are available; answer directly.\n\n");
    } else {
        out.push_str(
            "You have access to the following tools. Use them whenever they help, \
             one at a time.\n\n",
        );
        for tool in tools {
            out.push_str(&format!(
                "> Tool Name: {}\nTool Description: {}\nTool Args: {}\n\n",
                tool.name,
                tool.description,
                tool.parameters_schema()
            ));
        }
    }

    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    out.push_str("## Output Format\n\n");
    out.push_str("To use a tool, reply with exactly:\n\n");
    out.push_str("Thought: <what you need to do next>\n");
    out.push_str(&format!("Action: <tool name, one of: {}>\n", names.join(", ")));
    out.push_str("Action Input: <JSON object with the tool arguments>\n\n");
    out.push_str("You will then receive:\n\nObservation: <tool output>\n\n");
    out.push_str("Repeat until you can answer, then reply with:\n\n");
    out.push_str("Thought: I can answer without using any more tools.\n");
    out.push_str("Answer: <your answer>\n");
    out
}

fn action_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)Action:\s*`?([A-Za-z0-9_\-]+)`?[^\n]*\n\s*Action Input:\s*(.*)")
            .expect("static regex")
    })
}

fn thought_before(text: &str, marker_pos: usize) -> Option<String> {
    let head = &text[..marker_pos];
    let thought = match head.find("Thought:") {
        Some(pos) => &head[pos + "Thought:".len()..],
        None => head,
    };
    let thought = thought.trim();
    (!thought.is_empty()).then(|| thought.to_string())
}

/// Extract the first balanced JSON object from `text`.
fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&text[start..=start + offset]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

pub fn parse_react_output(text: &str) -> Result<ReactOutput> {
    let action_pos = text.find("Action:");
    let answer_pos = text.find("Answer:");

    match (action_pos, answer_pos) {
        (Some(action), answer) if answer.map_or(true, |ans| action < ans) => {
            let caps = action_re().captures(&text[action..]).ok_or_else(|| {
                FlowError::Protocol(format!(
                    "could not parse an `Action` / `Action Input` pair from `{text}`"
                ))
            })?;
            let name = caps[1].trim().to_string();
            let raw_input = caps[2].trim();
            let input = extract_json_object(raw_input).ok_or_else(|| {
                FlowError::Protocol(format!(
                    "`Action Input` for `{name}` is not a JSON object: `{raw_input}`"
                ))
            })?;
            Ok(ReactOutput::Action {
                thought: thought_before(text, action),
                name,
                input,
            })
        }
        (_, Some(answer)) => Ok(ReactOutput::Answer {
            thought: thought_before(text, answer),
            answer: text[answer + "Answer:".len()..].trim().to_string(),
        }),
        _ => Ok(ReactOutput::Answer {
            thought: None,
            answer: text
                .trim()
                .trim_start_matches("Thought:")
                .trim()
                .to_string(),
        }),
    }
}

/// Rewrite session turns into the plain-text shape the loop expects:
/// tool requests become assistant text, tool results become observations.
pub fn render_history(history: &[Message]) -> Vec<Message> {
    history
        .iter()
        .map(|turn| match turn.role {
            Role::Assistant if turn.tool_call.is_some() => {
                let call = turn.tool_call.as_ref().map(|c| (&c.name, &c.arguments));
                let mut text = turn.content.clone();
                if let Some((name, args)) = call {
                    if !text.contains("Action:") {
                        text = format!("{text}\nAction: {name}\nAction Input: {args}");
                    }
                }
                Message {
                    tool_call: None,
                    content: text,
                    ..turn.clone()
                }
            }
            Role::Tool => Message {
                tool_result: None,
                role: Role::User,
                content: format!("Observation: {}", turn.content),
                ..turn.clone()
            },
            _ => turn.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;
    use crate::tool::ValueType;
    use serde_json::json;

    #[test]
    fn parses_action_with_thought() {
        let out = parse_react_output(
            "Thought: I need to add the numbers.\nAction: add\nAction Input: {\"a\": 5, \"b\": 3}\n",
        )
        .unwrap();
        assert_eq!(
            out,
            ReactOutput::Action {
                thought: Some("I need to add the numbers.".into()),
                name: "add".into(),
                input: json!({"a": 5, "b": 3}),
            }
        );
    }

    #[test]
    fn parses_answer() {
        let out = parse_react_output("Thought: I can answer now.\nAnswer: 8").unwrap();
        assert_eq!(
            out,
            ReactOutput::Answer {
                thought: Some("I can answer now.".into()),
                answer: "8".into(),
            }
        );
    }

    #[test]
    fn bare_text_is_an_implicit_answer() {
        let out = parse_react_output("Your name is Bob.").unwrap();
        assert_eq!(
            out,
            ReactOutput::Answer {
                thought: None,
                answer: "Your name is Bob.".into(),
            }
        );
    }

    #[test]
    fn action_input_may_contain_nested_braces_and_trailing_text() {
        let out = parse_react_output(
            "Action: visit_webpage\nAction Input: {\"url\": \"https://x.io/{id}\"} then observe",
        )
        .unwrap();
        match out {
            ReactOutput::Action { name, input, .. } => {
                assert_eq!(name, "visit_webpage");
                assert_eq!(input["url"], "https://x.io/{id}");
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn malformed_action_input_is_a_protocol_error() {
        let err = parse_react_output("Thought: hmm\nAction: add\nAction Input: five and three")
            .unwrap_err();
        assert!(matches!(err, FlowError::Protocol(_)));
    }

    #[test]
    fn instructions_list_tools() {
        let spec = ToolSpec::new("suggest_menu", "Suggests a menu based on the occasion.")
            .input("occasion", ValueType::String, "The type of occasion");
        let text = react_instructions(&[spec]);
        assert!(text.contains("> Tool Name: suggest_menu"));
        assert!(text.contains("one of: suggest_menu"));
        assert!(text.contains("Answer:"));
    }

    #[test]
    fn renders_tool_turns_as_observations() {
        let history = vec![
            Message::user("Can you add 5 and 3?"),
            Message::tool_call(
                "Thought: use add",
                ToolCall {
                    id: Some("call-1".into()),
                    name: "add".into(),
                    arguments: json!({"a": 5, "b": 3}),
                },
            ),
            Message::tool("add", json!(8), Some("call-1".into())),
        ];
        let rendered = render_history(&history);
        assert!(rendered[1].tool_call.is_none());
        assert!(rendered[1].content.contains("Action: add"));
        assert_eq!(rendered[2].role, Role::User);
        assert_eq!(rendered[2].content, "Observation: 8");
    }
}
