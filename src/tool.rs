use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{FlowError, Result};

/// Declared type of a tool parameter or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    /// URL or `data:` URI pointing at an image.
    Image,
    Any,
}

impl ValueType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::String | ValueType::Image => value.is_string(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Object => value.is_object(),
            ValueType::Array => value.is_array(),
            ValueType::Any => true,
        }
    }

    fn json_schema_type(&self) -> Option<&'static str> {
        match self {
            ValueType::String | ValueType::Image => Some("string"),
            ValueType::Integer => Some("integer"),
            ValueType::Number => Some("number"),
            ValueType::Boolean => Some("boolean"),
            ValueType::Object => Some("object"),
            ValueType::Array => Some("array"),
            ValueType::Any => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Object => "object",
            ValueType::Array => "array",
            ValueType::Image => "image",
            ValueType::Any => "any",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub kind: ValueType,
    pub description: String,
    #[serde(default)]
    pub optional: bool,
}

/// Name, description and calling convention of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<ToolParam>,
    pub output: ValueType,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            inputs: Vec::new(),
            output: ValueType::Any,
        }
    }

    pub fn input(
        mut self,
        name: impl Into<String>,
        kind: ValueType,
        description: impl Into<String>,
    ) -> Self {
        self.inputs.push(ToolParam {
            name: name.into(),
            kind,
            description: description.into(),
            optional: false,
        });
        self
    }

    pub fn optional_input(
        mut self,
        name: impl Into<String>,
        kind: ValueType,
        description: impl Into<String>,
    ) -> Self {
        self.inputs.push(ToolParam {
            name: name.into(),
            kind,
            description: description.into(),
            optional: true,
        });
        self
    }

    pub fn output(mut self, kind: ValueType) -> Self {
        self.output = kind;
        self
    }

    /// JSON-schema rendering of the inputs, as expected by function-calling endpoints.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.inputs {
            let mut prop = Map::new();
            if let Some(ty) = param.kind.json_schema_type() {
                prop.insert("type".into(), json!(ty));
            }
            prop.insert("description".into(), json!(param.description));
            properties.insert(param.name.clone(), Value::Object(prop));
            if !param.optional {
                required.push(json!(param.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check `arguments` against the declared inputs.
    pub fn validate(&self, arguments: &Value) -> Result<()> {
        let empty = Map::new();
        let args = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(FlowError::argument(
                    &self.name,
                    format!("expected a JSON object, got `{other}`"),
                ))
            }
        };

        for param in &self.inputs {
            match args.get(&param.name) {
                None | Some(Value::Null) if param.optional => {}
                None | Some(Value::Null) => {
                    return Err(FlowError::argument(
                        &self.name,
                        format!("missing required parameter `{}`", param.name),
                    ))
                }
                Some(value) if !param.kind.matches(value) => {
                    return Err(FlowError::argument(
                        &self.name,
                        format!(
                            "parameter `{}` expects {}, got `{value}`",
                            param.name, param.kind
                        ),
                    ))
                }
                Some(_) => {}
            }
        }

        if let Some(extra) = args
            .keys()
            .find(|key| !self.inputs.iter().any(|p| &p.name == *key))
        {
            return Err(FlowError::argument(
                &self.name,
                format!("unexpected parameter `{extra}`"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn call(&self, input: Value) -> Result<Value>;
}

type ToolFn = dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// Adapts a closure into a [`Tool`].
pub struct FunctionTool {
    spec: ToolSpec,
    func: Arc<ToolFn>,
}

impl FunctionTool {
    pub fn new<F>(spec: ToolSpec, func: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self {
            spec,
            func: Arc::new(move |input: Value| {
                let func = Arc::clone(&func);
                async move { func(input) }.boxed()
            }),
        }
    }

    pub fn new_async<F, Fut>(spec: ToolSpec, func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            spec,
            func: Arc::new(move |input: Value| func(input).boxed()),
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn call(&self, input: Value) -> Result<Value> {
        (self.func)(input).await
    }
}

#[derive(Clone)]
struct Entry {
    spec: ToolSpec,
    tool: Arc<dyn Tool>,
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Entry>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool under the name in its spec. The spec is captured once.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.insert(tool.spec(), Arc::new(tool))
    }

    pub fn register_fn<F>(&mut self, spec: ToolSpec, func: F) -> Result<()>
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        let tool = FunctionTool::new(spec.clone(), func);
        self.insert(spec, Arc::new(tool))
    }

    fn insert(&mut self, spec: ToolSpec, tool: Arc<dyn Tool>) -> Result<()> {
        if self.tools.contains_key(&spec.name) {
            return Err(FlowError::DuplicateTool(spec.name));
        }
        self.tools.insert(spec.name.clone(), Entry { spec, tool });
        Ok(())
    }

    /// Move every tool of `other` into this registry.
    pub fn merge(&mut self, other: ToolRegistry) -> Result<()> {
        for (_, entry) in other.tools {
            self.insert(entry.spec, entry.tool)?;
        }
        Ok(())
    }

    /// A registry restricted to `names`.
    pub fn subset<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<ToolRegistry> {
        let mut subset = ToolRegistry::new();
        for name in names {
            let entry = self
                .tools
                .get(name)
                .ok_or_else(|| FlowError::UnknownTool(name.to_string()))?;
            subset.insert(entry.spec.clone(), Arc::clone(&entry.tool))?;
        }
        Ok(subset)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn name_set(&self) -> BTreeSet<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|entry| &entry.spec)
    }

    pub fn describe(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|entry| entry.spec.clone()).collect()
    }

    /// Validate `arguments` against the registered schema and run the tool.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| FlowError::UnknownTool(name.to_string()))?;
        entry.spec.validate(&arguments)?;
        entry.tool.call(arguments).await.map_err(|err| match err {
            FlowError::Argument { .. }
            | FlowError::ToolExecution { .. }
            | FlowError::Timeout { .. } => err,
            other => FlowError::tool_failure(name, other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn add_spec() -> ToolSpec {
        ToolSpec::new("add", "Add two numbers.")
            .input("a", ValueType::Integer, "first addend")
            .input("b", ValueType::Integer, "second addend")
            .output(ValueType::Integer)
    }

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools
            .register_fn(add_spec(), |input| {
                let a = input["a"].as_i64().unwrap_or_default();
                let b = input["b"].as_i64().unwrap_or_default();
                Ok(json!(a + b))
            })
            .unwrap();
        tools
    }

    #[tokio::test]
    async fn invokes_registered_tool() {
        let tools = registry();
        let out = tools.invoke("add", json!({"a": 5, "b": 3})).await.unwrap();
        assert_eq!(out, json!(8));
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut tools = registry();
        let err = tools.register_fn(add_spec(), |_| Ok(Value::Null)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateTool);
        assert_eq!(tools.len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let err = registry().invoke("divide", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownTool);
    }

    #[tokio::test]
    async fn validates_arguments_against_schema() {
        let tools = registry();

        let missing = tools.invoke("add", json!({"a": 5})).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Argument);
        assert!(missing.to_string().contains("missing required parameter `b`"));

        let wrong_type = tools.invoke("add", json!({"a": "5", "b": 3})).await.unwrap_err();
        assert_eq!(wrong_type.kind(), ErrorKind::Argument);

        let extra = tools
            .invoke("add", json!({"a": 1, "b": 2, "c": 3}))
            .await
            .unwrap_err();
        assert!(extra.to_string().contains("unexpected parameter `c`"));

        let not_object = tools.invoke("add", json!([5, 3])).await.unwrap_err();
        assert_eq!(not_object.kind(), ErrorKind::Argument);
    }

    #[tokio::test]
    async fn wraps_callable_failures() {
        let mut tools = ToolRegistry::new();
        tools
            .register_fn(ToolSpec::new("explode", "Always fails."), |_| {
                Err(FlowError::Protocol("boom".into()))
            })
            .unwrap();
        let err = tools.invoke("explode", Value::Null).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolExecution);
        assert!(!err.is_transient());
    }

    #[test]
    fn renders_json_schema() {
        let schema = add_spec()
            .optional_input("note", ValueType::String, "free text")
            .parameters_schema();
        assert_eq!(schema["properties"]["a"]["type"], "integer");
        assert_eq!(schema["required"], json!(["a", "b"]));
    }

    #[test]
    fn subset_keeps_only_named_tools() {
        let tools = registry();
        assert_eq!(tools.subset(["add"]).unwrap().names(), vec!["add"]);
        assert_eq!(
            tools.subset(["add", "multiply"]).unwrap_err().kind(),
            ErrorKind::UnknownTool
        );
    }
}
