//! Static tool registry and concurrent dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use super::builtin;
use super::{
    RegistrationError, Tool, ToolContext, ToolError, ToolHost, ToolInvocation, ToolResult,
};
use crate::model::ToolSpec;

const MAX_NAME_LEN: usize = 64;

/// Output value used when a tool returns nothing worth forwarding.
const SUCCESS_MARKER: &str = "success";

/// Registry of tools keyed by unique name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    specs: Vec<ToolSpec>,
    context: Arc<ToolContext>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new(context: ToolContext) -> Self {
        Self {
            tools: HashMap::new(),
            specs: Vec::new(),
            context: Arc::new(context),
        }
    }

    /// Create a registry holding every built-in tool.
    pub fn with_builtins(context: ToolContext) -> Result<Self, RegistrationError> {
        let mut registry = Self::new(context);
        for tool in builtin::all() {
            registry.register_arc(tool)?;
        }
        Ok(registry)
    }

    /// Register a tool after validating its descriptor.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistrationError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistrationError> {
        let spec = tool.spec();
        validate_spec(&spec)?;
        if self.tools.contains_key(&spec.name) {
            return Err(RegistrationError::Duplicate(spec.name));
        }

        tracing::debug!(tool = %spec.name, "registered tool");
        self.tools.insert(spec.name.clone(), tool);
        self.specs.push(spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    /// Tool definitions in registration order.
    pub fn definitions(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }
}

impl ToolHost for ToolRegistry {
    fn specs(&self) -> &[ToolSpec] {
        self.definitions()
    }

    async fn execute_many(&self, invocations: Vec<ToolInvocation>) -> Vec<ToolResult> {
        let handles: Vec<_> = invocations
            .into_iter()
            .map(|invocation| {
                let tool = self.get(&invocation.name);
                let name = invocation.name.clone();
                let context = Arc::clone(&self.context);
                let id = invocation
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4()));
                let handle = tokio::spawn(async move {
                    run_invocation(tool, &invocation, &context).await
                });
                (handle, name, id)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (handle, name, id) in handles {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(ToolError::Execution(format!("tool task failed: {e}"))));
            let result = match outcome {
                Ok(output) => ToolResult::success(name, id, output),
                Err(error) => {
                    tracing::warn!(tool = %name, call_id = %id, %error, "tool invocation failed");
                    ToolResult::failure(name, id, error)
                }
            };
            results.push(result);
        }
        results
    }
}

/// Run one invocation in isolation.
async fn run_invocation(
    tool: Option<Arc<dyn Tool>>,
    invocation: &ToolInvocation,
    context: &ToolContext,
) -> Result<Value, ToolError> {
    let name = &invocation.name;
    let tool = tool.ok_or_else(|| ToolError::NotFound(name.clone()))?;
    let input: Value = serde_json::from_str(&invocation.arguments).map_err(|e| {
        ToolError::InvalidInput(format!("arguments for {name} are not valid JSON: {e}"))
    })?;

    tool.execute(input, context).await.and_then(extract_payload)
}

/// Reduce a handler's output to the payload forwarded to the model.
///
/// Objects are unwrapped when exactly one field besides `success` remains;
/// `{"success": false, ...}` is a failure. Other non-null values pass
/// through unchanged.
fn extract_payload(output: Value) -> Result<Value, ToolError> {
    let mut fields = match output {
        Value::Object(fields) => fields,
        Value::Null => return Ok(Value::String(SUCCESS_MARKER.into())),
        other => return Ok(other),
    };

    if fields.get("success") == Some(&Value::Bool(false)) {
        let reason = match fields.remove("error") {
            Some(Value::String(reason)) => reason,
            Some(other) => other.to_string(),
            None => "tool reported failure".to_string(),
        };
        return Err(ToolError::Execution(reason));
    }

    fields.remove("success");
    if fields.len() == 1 {
        if let Some((_, value)) = fields.into_iter().next() {
            return Ok(value);
        }
    }
    Ok(Value::String(SUCCESS_MARKER.into()))
}

fn validate_spec(spec: &ToolSpec) -> Result<(), RegistrationError> {
    let name_ok = !spec.name.is_empty()
        && spec.name.len() <= MAX_NAME_LEN
        && spec
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !name_ok {
        return Err(RegistrationError::InvalidName(spec.name.clone()));
    }

    if spec.description.trim().is_empty() {
        return Err(RegistrationError::MissingDescription(spec.name.clone()));
    }

    let invalid = |reason: &str| RegistrationError::InvalidSchema {
        name: spec.name.clone(),
        reason: reason.to_string(),
    };

    let schema = spec
        .parameters
        .as_object()
        .ok_or_else(|| invalid("schema must be an object"))?;
    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("schema type must be \"object\""));
    }

    let properties = match schema.get("properties") {
        None => None,
        Some(Value::Object(props)) => Some(props),
        Some(_) => return Err(invalid("\"properties\" must be an object")),
    };

    if let Some(required) = schema.get("required") {
        let required = required
            .as_array()
            .ok_or_else(|| invalid("\"required\" must be an array"))?;
        for field in required {
            let field = field
                .as_str()
                .ok_or_else(|| invalid("\"required\" entries must be strings"))?;
            if !properties.is_some_and(|props| props.contains_key(field)) {
                return Err(invalid(&format!("required field {field} is not a property")));
            }
        }
    }

    Ok(())
}
