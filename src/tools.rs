//! Tool invocation layer.
//!
//! Tools are pluggable: anything implementing [`Tool`] can be registered in a
//! [`ToolSet`]. The built-in set contains the `dice` tool.

use crate::error::{RouteError, ToolError};
use crate::protocol::{CallToolResult, Content, JsonObject, Tool as ToolDescriptor};
use rand::Rng;
use serde_json::{json, Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Default number of sides for `dice`.
pub const DEFAULT_DICE_SIDES: u64 = 6;

/// A named server-side operation.
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the `arguments` object.
    fn input_schema(&self) -> Value;

    fn call(&self, arguments: &Map<String, Value>) -> Result<CallToolResult, ToolError>;
}

/// Rolls a die with a configurable number of sides.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiceTool;

impl DiceTool {
    fn sides(arguments: &Map<String, Value>) -> Result<u64, ToolError> {
        let Some(value) = arguments.get("sides") else {
            return Ok(DEFAULT_DICE_SIDES);
        };
        if value.is_null() {
            return Ok(DEFAULT_DICE_SIDES);
        }
        let sides = value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| {
                ToolError::InvalidParams(format!("sides must be a positive integer, got {value}"))
            })?;
        if sides < 1 {
            return Err(ToolError::InvalidParams("sides must be >= 1".to_string()));
        }
        Ok(sides)
    }
}

impl Tool for DiceTool {
    fn name(&self) -> &'static str {
        "dice"
    }

    fn description(&self) -> &'static str {
        "Roll a die and return the result"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sides": {
                    "type": "integer",
                    "minimum": 1,
                    "default": DEFAULT_DICE_SIDES,
                    "description": "Number of sides on the die"
                }
            }
        })
    }

    fn call(&self, arguments: &Map<String, Value>) -> Result<CallToolResult, ToolError> {
        let sides = Self::sides(arguments)?;
        let roll = rand::thread_rng().gen_range(1..=sides);
        debug!(sides, roll, "Rolled dice");
        Ok(CallToolResult::success(vec![Content::text(roll.to_string())]))
    }
}

/// The tools a server exposes.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default set served by `dice-mcp`.
    pub fn builtin() -> Self {
        Self::new().with_tool(DiceTool)
    }

    /// Register a tool. A later tool with the same name replaces the earlier one.
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|t| {
                let schema: JsonObject = t.input_schema().as_object().cloned().unwrap_or_default();
                ToolDescriptor::new(t.name(), t.description(), Arc::new(schema))
            })
            .collect()
    }

    /// Invoke a tool by name.
    ///
    /// Tool-level failures come back as `isError` results. A panicking tool is
    /// reported as [`RouteError::Internal`].
    pub fn call(
        &self,
        name: &str,
        arguments: Option<&Map<String, Value>>,
    ) -> Result<CallToolResult, RouteError> {
        let Some(tool) = self.get(name) else {
            return Ok(ToolError::UnknownTool(name.to_string()).to_tool_result());
        };
        let empty = Map::new();
        let arguments = arguments.unwrap_or(&empty);
        match catch_unwind(AssertUnwindSafe(|| tool.call(arguments))) {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Ok(e.to_tool_result()),
            Err(_) => {
                error!(tool = %name, "Tool panicked");
                Err(RouteError::Internal(format!("tool {name} panicked")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{is_tool_error, result_text};

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn dice_stays_in_range() {
        let tools = ToolSet::builtin();
        for _ in 0..200 {
            let result = tools
                .call("dice", Some(&args(json!({"sides": 6}))))
                .expect("dice call");
            assert!(!is_tool_error(&result));
            let roll: u64 = result_text(&result).parse().expect("integer roll");
            assert!((1..=6).contains(&roll));
        }
    }

    #[test]
    fn dice_defaults_to_six_sides() {
        let result = ToolSet::builtin().call("dice", None).expect("dice call");
        let roll: u64 = result_text(&result).parse().expect("integer roll");
        assert!((1..=6).contains(&roll));

        let one = ToolSet::builtin()
            .call("dice", Some(&args(json!({"sides": 1.0}))))
            .expect("dice call");
        assert_eq!(result_text(&one), "1");
    }

    #[test]
    fn invalid_sides_are_tool_errors() {
        let tools = ToolSet::builtin();
        for bad in [json!({"sides": 0}), json!({"sides": -3}), json!({"sides": "six"})] {
            let result = tools.call("dice", Some(&args(bad))).expect("dice call");
            assert!(is_tool_error(&result));
            assert!(result_text(&result).starts_with("Invalid parameters"));
        }
    }

    #[test]
    fn unknown_tool_and_listing() {
        let tools = ToolSet::builtin();
        let result = tools.call("coin", None).expect("call");
        assert!(is_tool_error(&result));
        assert_eq!(result_text(&result), "Unknown tool: coin");

        let listed = tools.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "dice");
        assert_eq!(listed[0].input_schema["properties"]["sides"]["minimum"], 1);
    }

    struct Exploding;

    impl Tool for Exploding {
        fn name(&self) -> &'static str {
            "explode"
        }
        fn description(&self) -> &'static str {
            "always panics"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn call(&self, _arguments: &Map<String, Value>) -> Result<CallToolResult, ToolError> {
            panic!("boom")
        }
    }

    #[test]
    fn panicking_tool_is_internal_error() {
        let tools = ToolSet::builtin().with_tool(Exploding);
        assert!(matches!(
            tools.call("explode", None),
            Err(RouteError::Internal(_))
        ));
    }
}
