//! Language model abstraction and the HTTP client used against hosted endpoints.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ModelConfig;
use crate::error::{FlowError, InferenceErrorKind, Result};
use crate::message::{AttachmentKind, Message, Role, ToolCall};
use crate::tool::ToolSpec;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const HUGGING_FACE_BASE_URL: &str = "https://router.huggingface.co/v1";

/// What the model asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelCompletion {
    Text(String),
    ToolCall(ToolCall),
}

/// Narrow interface to a chat-completion endpoint.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete with the given tools available for native function calling.
    async fn complete_with_tools(
        &self,
        prompt: &str,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelCompletion>;

    /// Plain text completion.
    async fn complete(&self, prompt: &str, history: &[Message]) -> Result<String> {
        match self.complete_with_tools(prompt, history, &[]).await? {
            ModelCompletion::Text(text) => Ok(text),
            ModelCompletion::ToolCall(call) => Err(FlowError::inference(
                InferenceErrorKind::InvalidResponse,
                format!("model requested tool `{}` when none were offered", call.name),
            )),
        }
    }
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> FlowError {
    let kind = match status.as_u16() {
        429 => InferenceErrorKind::RateLimited,
        401 | 403 => InferenceErrorKind::Auth,
        408 | 500..=599 => InferenceErrorKind::Network,
        _ => InferenceErrorKind::Other,
    };
    FlowError::inference(kind, format!("{provider} request failed with {status}: {body}"))
}

fn serialize_tool_arguments(args: &Value) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| args.to_string())
}

/// Client for endpoints speaking the OpenAI chat-completions protocol
/// (OpenAI itself, the Hugging Face inference router, local gateways).
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    provider: String,
    model: String,
    api_key: Option<String>,
    base_url: String,
    organization: Option<String>,
}

impl std::fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleClient")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiCompatibleClient {
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|err| {
                    FlowError::Configuration(format!("http client error: {err}"))
                })?,
            provider: provider.into(),
            model: model.into(),
            api_key: None,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            organization: None,
        })
    }

    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self::new("openai", OPENAI_BASE_URL, model, Duration::from_secs(60))?
            .with_api_key(api_key))
    }

    pub fn hugging_face(token: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(
            Self::new("huggingface", HUGGING_FACE_BASE_URL, model, Duration::from_secs(60))?
                .with_api_key(token),
        )
    }

    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let base_url = match (&cfg.base_url, cfg.provider.as_str()) {
            (Some(url), _) => url.clone(),
            (None, "openai") => OPENAI_BASE_URL.to_string(),
            (None, "huggingface") => HUGGING_FACE_BASE_URL.to_string(),
            (None, other) => {
                return Err(FlowError::Configuration(format!(
                    "provider `{other}` needs an explicit base_url"
                )))
            }
        };
        let mut client = Self::new(
            cfg.provider.clone(),
            base_url,
            cfg.model.clone(),
            Duration::from_secs(cfg.request_timeout_secs),
        )?;
        client.api_key = cfg.api_key.clone();
        client.organization = cfg.organization.clone();
        Ok(client)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_openai_messages(&self, prompt: &str, history: &[Message]) -> Vec<OpenAiMessage> {
        let mut built = Vec::with_capacity(history.len() + 1);
        if !prompt.is_empty() {
            built.push(OpenAiMessage {
                role: "system".into(),
                content: Some(json!(prompt)),
                tool_call_id: None,
                tool_calls: None,
            });
        }

        for message in history {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            }
            .to_string();

            let tool_calls = message.tool_call.as_ref().map(|call| {
                vec![OpenAiToolCall {
                    id: call.id.clone(),
                    r#type: "function".to_string(),
                    function: OpenAiFunctionCall {
                        name: call.name.clone(),
                        arguments: serialize_tool_arguments(&call.arguments),
                    },
                }]
            });

            let content = match &message.tool_result {
                Some(result) if message.role == Role::Tool => {
                    json!(serialize_tool_arguments(&result.output))
                }
                _ => content_parts(message),
            };

            built.push(OpenAiMessage {
                role,
                content: Some(content),
                tool_call_id: message
                    .tool_result
                    .as_ref()
                    .and_then(|result| result.tool_call_id.clone()),
                tool_calls,
            });
        }
        built
    }

    /// Agents take one action per step, so parallel calls are switched off.
    fn completion_payload(
        &self,
        prompt: &str,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Value> {
        let mut payload = json!({
            "model": self.model,
            "messages": self.to_openai_messages(prompt, history),
        });
        if let Some(tools) = self.to_openai_tools(tools) {
            payload["tools"] = serde_json::to_value(tools)?;
            payload["tool_choice"] = json!("auto");
            payload["parallel_tool_calls"] = json!(false);
        }
        Ok(payload)
    }

    fn to_openai_tools(&self, tools: &[ToolSpec]) -> Option<Vec<OpenAiTool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|tool| OpenAiTool {
                    r#type: "function".to_string(),
                    function: OpenAiFunction {
                        name: tool.name.clone(),
                        description: Some(tool.description.clone()),
                        parameters: Some(tool.parameters_schema()),
                    },
                })
                .collect(),
        )
    }
}

/// Plain string content, or text + image parts when images are attached.
fn content_parts(message: &Message) -> Value {
    let images: Vec<&str> = message
        .attachments
        .iter()
        .filter(|a| a.kind == AttachmentKind::Image)
        .map(|a| a.uri.as_str())
        .collect();
    if images.is_empty() {
        return json!(message.content);
    }
    let mut parts = vec![json!({"type": "text", "text": message.content})];
    for url in images {
        parts.push(json!({"type": "image_url", "image_url": {"url": url}}));
    }
    Value::Array(parts)
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleClient {
    async fn complete_with_tools(
        &self,
        prompt: &str,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelCompletion> {
        let payload = self.completion_payload(prompt, history, tools)?;

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        tracing::debug!(provider = %self.provider, model = %self.model, "sending completion request");
        let resp = builder.json(&payload).send().await.map_err(|err| {
            FlowError::inference(
                InferenceErrorKind::Network,
                format!("{} request error: {err}", self.provider),
            )
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, &self.provider));
        }

        let body: OpenAiResponse = resp.json().await.map_err(|err| {
            FlowError::inference(
                InferenceErrorKind::InvalidResponse,
                format!("{} response parse error: {err}", self.provider),
            )
        })?;
        parse_choice(body, &self.provider)
    }
}

fn parse_choice(body: OpenAiResponse, provider: &str) -> Result<ModelCompletion> {
    let first = body.choices.into_iter().next().ok_or_else(|| {
        FlowError::inference(
            InferenceErrorKind::InvalidResponse,
            format!("{provider} returned no choices"),
        )
    })?;

    if let Some(call) = first.message.tool_calls.and_then(|calls| calls.into_iter().next()) {
        let arguments = serde_json::from_str(&call.function.arguments)
            .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
        return Ok(ModelCompletion::ToolCall(ToolCall {
            id: call.id,
            name: call.function.name,
            arguments,
        }));
    }

    first
        .message
        .content
        .map(ModelCompletion::Text)
        .ok_or_else(|| {
            FlowError::inference(
                InferenceErrorKind::InvalidResponse,
                format!("{provider} returned neither content nor a tool call"),
            )
        })
}

/// A request observed by [`StubModel`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub prompt: String,
    pub history: Vec<Message>,
    pub tools: Vec<String>,
}

/// Scripted model for tests and offline demos.
///
/// Each response is either a JSON directive
/// (`{"action":"respond","content":..}` / `{"action":"call_tool","name":..,"arguments":..}`)
/// or raw text returned verbatim.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|guard| guard.len()).unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond { content: String },
    CallTool { name: String, arguments: Value },
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_with_tools(
        &self,
        prompt: &str,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelCompletion> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                prompt: prompt.to_string(),
                history: history.to_vec(),
                tools: tools.iter().map(|t| t.name.clone()).collect(),
            });
        }

        let raw = self
            .responses
            .lock()
            .map_err(|_| FlowError::inference(InferenceErrorKind::Other, "stub model poisoned"))?
            .pop_front()
            .ok_or_else(|| {
                FlowError::inference(
                    InferenceErrorKind::Other,
                    "StubModel ran out of scripted responses",
                )
            })?;

        match serde_json::from_str::<StubDirective>(&raw) {
            Ok(StubDirective::Respond { content }) => Ok(ModelCompletion::Text(content)),
            Ok(StubDirective::CallTool { name, arguments }) => {
                Ok(ModelCompletion::ToolCall(ToolCall {
                    id: None,
                    name,
                    arguments,
                }))
            }
            Err(_) => Ok(ModelCompletion::Text(raw)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Attachment;
    use crate::tool::ValueType;

    fn client() -> OpenAiCompatibleClient {
        OpenAiCompatibleClient::new("test", "http://localhost:1/v1/", "m", Duration::from_secs(1))
            .unwrap()
    }

    #[test]
    fn maps_status_codes_to_inference_kinds() {
        let kind = |code: u16| match coalesce_error(
            reqwest::StatusCode::from_u16(code).unwrap(),
            "",
            "test",
        ) {
            FlowError::Inference { kind, .. } => kind,
            other => panic!("unexpected error {other}"),
        };
        assert_eq!(kind(429), InferenceErrorKind::RateLimited);
        assert_eq!(kind(401), InferenceErrorKind::Auth);
        assert_eq!(kind(503), InferenceErrorKind::Network);
        assert_eq!(kind(400), InferenceErrorKind::Other);
    }

    #[test]
    fn renders_history_with_tool_turns_and_images() {
        let call = ToolCall {
            id: Some("call-1".into()),
            name: "add".into(),
            arguments: json!({"a": 5, "b": 3}),
        };
        let history = vec![
            Message::user("Who is this?")
                .with_attachments(vec![Attachment::image("https://example.com/joker.jpg")]),
            Message::tool_call("Calling tool `add`", call),
            Message::tool("add", json!(8), Some("call-1".into())),
        ];
        let built = client().to_openai_messages("be helpful", &history);

        assert_eq!(built.len(), 4);
        assert_eq!(built[0].role, "system");
        let parts = built[1].content.as_ref().unwrap().as_array().unwrap();
        assert_eq!(parts[1]["image_url"]["url"], "https://example.com/joker.jpg");
        let calls = built[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, r#"{"a":5,"b":3}"#);
        assert_eq!(built[3].tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(built[3].content, Some(json!("8")));
    }

    #[test]
    fn renders_tools_as_functions() {
        let spec = ToolSpec::new("multiply", "Multiply two integers.")
            .input("a", ValueType::Integer, "left")
            .input("b", ValueType::Integer, "right");
        let tools = client().to_openai_tools(&[spec]).unwrap();
        assert_eq!(tools[0].function.name, "multiply");
        assert_eq!(
            tools[0].function.parameters.as_ref().unwrap()["required"],
            json!(["a", "b"])
        );
        assert!(client().to_openai_tools(&[]).is_none());
    }

    #[test]
    fn payload_asks_for_one_tool_call_at_a_time() {
        let spec = ToolSpec::new("add", "Add two integers.")
            .input("a", ValueType::Integer, "left")
            .input("b", ValueType::Integer, "right");
        let history = vec![Message::user("Can you add 5 and 3?")];
        let payload = client()
            .completion_payload("You are a calculator.", &history, &[spec])
            .unwrap();
        assert_eq!(payload["parallel_tool_calls"], json!(false));
        assert_eq!(payload["tool_choice"], json!("auto"));

        let plain = client()
            .completion_payload("You are a calculator.", &history, &[])
            .unwrap();
        assert!(plain.get("tools").is_none());
        assert!(plain.get("parallel_tool_calls").is_none());
    }

    #[test]
    fn parses_tool_call_choice() {
        let body: OpenAiResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": null, "tool_calls": [{
                "id": "call_9", "type": "function",
                "function": {"name": "add", "arguments": "{\"a\":5,\"b\":3}"}
            }]}}]
        }))
        .unwrap();
        match parse_choice(body, "test").unwrap() {
            ModelCompletion::ToolCall(call) => {
                assert_eq!(call.name, "add");
                assert_eq!(call.arguments, json!({"a": 5, "b": 3}));
                assert_eq!(call.id.as_deref(), Some("call_9"));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn empty_choices_are_invalid() {
        let body: OpenAiResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            parse_choice(body, "test"),
            Err(FlowError::Inference {
                kind: InferenceErrorKind::InvalidResponse,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn stub_model_follows_script() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"add","arguments":{"a":1,"b":2}}"#.into(),
            "plain text".into(),
        ]);
        let first = model.complete_with_tools("p", &[], &[]).await.unwrap();
        assert!(matches!(first, ModelCompletion::ToolCall(ref c) if c.name == "add"));
        assert_eq!(model.complete("p", &[]).await.unwrap(), "plain text");
        assert!(model.complete("p", &[]).await.is_err());
        assert_eq!(model.requests().len(), 3);
    }
}
