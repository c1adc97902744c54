//! Calculator toolkit: integer add, subtract and multiply, plus division.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{FlowError, Result};
use crate::tool::{Tool, ToolRegistry, ToolSpec, ValueType};

/// Registry holding `add`, `subtract`, `multiply` and `divide`.
pub fn calculator_toolkit() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(IntegerTool::Add)?;
    registry.register(IntegerTool::Subtract)?;
    registry.register(IntegerTool::Multiply)?;
    registry.register(DivideTool)?;
    Ok(registry)
}

#[derive(Debug, Clone, Copy)]
enum IntegerTool {
    Add,
    Subtract,
    Multiply,
}

impl IntegerTool {
    fn name(self) -> &'static str {
        match self {
            IntegerTool::Add => "add",
            IntegerTool::Subtract => "subtract",
            IntegerTool::Multiply => "multiply",
        }
    }

    fn apply(self, a: i64, b: i64) -> Option<i64> {
        match self {
            IntegerTool::Add => a.checked_add(b),
            IntegerTool::Subtract => a.checked_sub(b),
            IntegerTool::Multiply => a.checked_mul(b),
        }
    }
}

#[async_trait]
impl Tool for IntegerTool {
    fn spec(&self) -> ToolSpec {
        let description = match self {
            IntegerTool::Add => "Add two integers and return the result.",
            IntegerTool::Subtract => "Subtract the second integer from the first.",
            IntegerTool::Multiply => "Multiply two integers and return the result.",
        };
        ToolSpec::new(self.name(), description)
            .input("a", ValueType::Integer, "First integer")
            .input("b", ValueType::Integer, "Second integer")
            .output(ValueType::Integer)
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let a = get_integer(&input, "a", self.name())?;
        let b = get_integer(&input, "b", self.name())?;
        let result = self
            .apply(a, b)
            .ok_or_else(|| FlowError::tool_failure(self.name(), "integer overflow"))?;
        Ok(json!(result))
    }
}

struct DivideTool;

#[async_trait]
impl Tool for DivideTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("divide", "Divide the first number by the second.")
            .input("a", ValueType::Number, "Dividend")
            .input("b", ValueType::Number, "Divisor")
            .output(ValueType::Number)
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let a = get_number(&input, "a", "divide")?;
        let b = get_number(&input, "b", "divide")?;
        if b == 0.0 {
            return Err(FlowError::tool_failure("divide", "division by zero"));
        }
        Ok(json!(a / b))
    }
}

fn get_integer(input: &Value, field: &str, tool: &str) -> Result<i64> {
    input
        .get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| FlowError::argument(tool, format!("missing integer `{field}`")))
}

fn get_number(input: &Value, field: &str, tool: &str) -> Result<f64> {
    input
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| FlowError::argument(tool, format!("missing number `{field}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_integer_operations() {
        let registry = calculator_toolkit().unwrap();
        assert_eq!(
            registry.invoke("add", json!({"a": 5, "b": 3})).await.unwrap(),
            json!(8)
        );
        assert_eq!(
            registry
                .invoke("subtract", json!({"a": 5, "b": 3}))
                .await
                .unwrap(),
            json!(2)
        );
        assert_eq!(
            registry
                .invoke("multiply", json!({"a": 5, "b": 3}))
                .await
                .unwrap(),
            json!(15)
        );
    }

    #[tokio::test]
    async fn test_integer_inputs_are_enforced() {
        let registry = calculator_toolkit().unwrap();
        let err = registry
            .invoke("add", json!({"a": 5.5, "b": 3}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[tokio::test]
    async fn test_divide() {
        let registry = calculator_toolkit().unwrap();
        let result = registry
            .invoke("divide", json!({"a": 7, "b": 2}))
            .await
            .unwrap();
        assert_eq!(result, json!(3.5));

        let err = registry
            .invoke("divide", json!({"a": 1, "b": 0}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolExecution);
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_overflow_is_a_tool_failure() {
        let registry = calculator_toolkit().unwrap();
        let err = registry
            .invoke("multiply", json!({"a": i64::MAX, "b": 2}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolExecution);
    }
}
