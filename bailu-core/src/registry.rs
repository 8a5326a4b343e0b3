//! Tool Registry
//!
//! Name-keyed dictionary of tool handlers, built once at startup and
//! read-only thereafter, plus the parameter validation the mediator runs
//! before every dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::types::{ErrorCode, ExecutionContext, ParamType, ToolCall, ToolDefinition, ToolResult};

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// Executable side of a registered tool. Receives already-validated,
/// already-typed parameters. Failures are returned, never raised; the
/// mediator normalizes anything that escapes anyway.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(
        &self,
        params: &serde_json::Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> ToolResult;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Flat registry of `(definition, handler)` pairs in registration order.
pub struct ToolRegistry {
    tools: Vec<(ToolDefinition, Arc<dyn ToolHandler>)>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Re-registering a name is allowed only with the
    /// identical handler; a different handler under an existing name is
    /// an error.
    pub fn register(
        &mut self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        if let Some(&i) = self.index.get(&definition.name) {
            if Arc::ptr_eq(&self.tools[i].1, &handler) {
                return Ok(());
            }
            bail!("tool '{}' is already registered", definition.name);
        }
        tracing::debug!(tool = %definition.name, safe = definition.safe, "registered tool");
        self.index.insert(definition.name.clone(), self.tools.len());
        self.tools.push((definition, handler));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<(&ToolDefinition, &Arc<dyn ToolHandler>)> {
        self.index
            .get(name)
            .map(|&i| (&self.tools[i].0, &self.tools[i].1))
    }

    /// Definitions in registration order.
    pub fn list(&self) -> Vec<&ToolDefinition> {
        self.tools.iter().map(|(def, _)| def).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Parameter validation
// ---------------------------------------------------------------------------

/// Validate a tool call against its definition.
///
/// Every required parameter must be present and every provided parameter
/// must match its declared type, with two coercions applied: a numeric
/// string becomes a number and `"true"`/`"false"` become booleans.
/// Absent optional parameters receive their declared defaults. On
/// mismatch, returns an `invalid-arguments` failure naming the offending
/// parameters.
pub fn validate_params(
    definition: &ToolDefinition,
    call: &ToolCall,
) -> Result<serde_json::Map<String, Value>, ToolResult> {
    let mut validated = serde_json::Map::new();
    let mut missing = Vec::new();
    let mut mistyped = Vec::new();

    for param in &definition.parameters {
        match call.params.get(&param.name) {
            Some(value) => match coerce_to_type(value, param.param_type) {
                Some(coerced) => {
                    validated.insert(param.name.clone(), coerced);
                }
                None => mistyped.push(format!(
                    "{} (expected {})",
                    param.name,
                    param.param_type.as_str()
                )),
            },
            None if param.required => missing.push(param.name.clone()),
            None => {
                if let Some(default) = &param.default {
                    validated.insert(param.name.clone(), default.clone());
                }
            }
        }
    }

    if !missing.is_empty() || !mistyped.is_empty() {
        let mut parts = Vec::new();
        if !missing.is_empty() {
            parts.push(format!("missing: {}", missing.join(", ")));
        }
        if !mistyped.is_empty() {
            parts.push(format!("mistyped: {}", mistyped.join(", ")));
        }
        return Err(ToolResult::fail(
            ErrorCode::InvalidArguments,
            format!("tool '{}' — {}", definition.name, parts.join("; ")),
        ));
    }

    // Unknown extra parameters pass through untouched; handlers ignore them.
    for (name, value) in &call.params {
        if !validated.contains_key(name) {
            validated.insert(name.clone(), value.clone());
        }
    }

    Ok(validated)
}

fn coerce_to_type(value: &Value, expected: ParamType) -> Option<Value> {
    match expected {
        ParamType::String => match value {
            Value::String(_) => Some(value.clone()),
            // The parser coerces eagerly; a bare numeric or boolean value
            // for a string parameter is rendered back.
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        ParamType::Number => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    return Some(Value::Number(i.into()));
                }
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
            }
            _ => None,
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.trim() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        ParamType::Array => matches!(value, Value::Array(_)).then(|| value.clone()),
        ParamType::Object => matches!(value, Value::Object(_)).then(|| value.clone()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolParameter;

    struct NoopHandler;

    #[async_trait]
    impl ToolHandler for NoopHandler {
        async fn execute(
            &self,
            _params: &serde_json::Map<String, Value>,
            _ctx: &ExecutionContext,
        ) -> ToolResult {
            ToolResult::ok("noop")
        }
    }

    fn sample_def() -> ToolDefinition {
        ToolDefinition {
            name: "sample".into(),
            description: "A sample tool".into(),
            parameters: vec![
                ToolParameter::required("path", ParamType::String, "File path"),
                ToolParameter::optional(
                    "timeout",
                    ParamType::Number,
                    "Seconds",
                    Some(Value::Number(30.into())),
                ),
                ToolParameter::optional("recursive", ParamType::Boolean, "Recurse", None),
            ],
            safe: true,
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = ToolRegistry::new();
        reg.register(sample_def(), Arc::new(NoopHandler)).unwrap();

        assert!(reg.get("sample").is_some());
        assert!(reg.get("other").is_none());
        assert_eq!(reg.list().len(), 1);
    }

    #[test]
    fn duplicate_name_with_different_handler_errors() {
        let mut reg = ToolRegistry::new();
        let handler: Arc<dyn ToolHandler> = Arc::new(NoopHandler);
        reg.register(sample_def(), handler.clone()).unwrap();

        // Same handler: idempotent.
        assert!(reg.register(sample_def(), handler).is_ok());
        // Different handler under the same name: error.
        assert!(reg.register(sample_def(), Arc::new(NoopHandler)).is_err());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn missing_required_param_fails() {
        let call = ToolCall::new("sample");
        let err = validate_params(&sample_def(), &call).unwrap_err();
        assert_eq!(err.error_code(), Some("invalid-arguments"));
        assert!(err.error.unwrap().contains("path"));
    }

    #[test]
    fn numeric_string_coerces() {
        let call = ToolCall::new("sample")
            .with_param("path", Value::String("a.txt".into()))
            .with_param("timeout", Value::String("120".into()));
        let params = validate_params(&sample_def(), &call).unwrap();
        assert_eq!(params["timeout"], Value::Number(120.into()));
    }

    #[test]
    fn boolean_string_coerces() {
        let call = ToolCall::new("sample")
            .with_param("path", Value::String("a.txt".into()))
            .with_param("recursive", Value::String("true".into()));
        let params = validate_params(&sample_def(), &call).unwrap();
        assert_eq!(params["recursive"], Value::Bool(true));
    }

    #[test]
    fn defaults_fill_in() {
        let call = ToolCall::new("sample").with_param("path", Value::String("a.txt".into()));
        let params = validate_params(&sample_def(), &call).unwrap();
        assert_eq!(params["timeout"], Value::Number(30.into()));
        assert!(!params.contains_key("recursive"));
    }

    #[test]
    fn mistyped_param_is_named() {
        let call = ToolCall::new("sample")
            .with_param("path", Value::String("a.txt".into()))
            .with_param("timeout", Value::String("soon".into()));
        let err = validate_params(&sample_def(), &call).unwrap_err();
        let msg = err.error.unwrap();
        assert!(msg.contains("timeout"));
        assert!(msg.contains("number"));
    }
}
