//! Built-in wrapper tools.
//!
//! Two tools belong to the wrapper itself: `config_instructions`, which
//! tells the model/user how to unblock a server, and `quarantine_release`,
//! which retrieves a quarantined response after out-of-band review.
//! `config_instructions` is always advertised; `quarantine_release` is
//! listed only while the server is not fully blocked. Their names are
//! reserved either way: a downstream tool with a colliding name is
//! shadowed and never exposed.

use rmcp::model::Tool;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const CONFIG_INSTRUCTIONS_TOOL: &str = "config_instructions";
pub const QUARANTINE_RELEASE_TOOL: &str = "quarantine_release";

/// Fixed response of the `config_instructions` tool.
pub const CONFIG_INSTRUCTIONS_TEXT: &str = "This MCP server is wrapped by mcp-context-protector. \
The downstream server's configuration (instructions, tool descriptions, or tool schemas) has not \
been approved yet, or it changed since it was last approved, so some or all downstream tools are \
blocked. To review and approve the current configuration, ask the user to run the review command \
in a terminal: `mcp-context-protector --review-server` with the same server arguments. Blocked \
tools become available once the configuration is approved.";

pub fn is_builtin(name: &str) -> bool {
    name == CONFIG_INSTRUCTIONS_TOOL || name == QUARANTINE_RELEASE_TOOL
}

/// The wrapper's own tools. The façade filters this list down to
/// `config_instructions` alone while the server is fully blocked.
pub fn builtin_tools() -> Vec<Tool> {
    vec![
        Tool {
            name: CONFIG_INSTRUCTIONS_TOOL.into(),
            title: Some(CONFIG_INSTRUCTIONS_TOOL.to_string()),
            icons: None,
            description: Some(
                "Explains why downstream tools are blocked and how to approve the wrapped \
                 server's configuration."
                    .into(),
            ),
            input_schema: empty_object_schema(),
            output_schema: None,
            annotations: None,
            meta: None,
        },
        Tool {
            name: QUARANTINE_RELEASE_TOOL.into(),
            title: Some(QUARANTINE_RELEASE_TOOL.to_string()),
            icons: None,
            description: Some(
                "Retrieves a quarantined tool response by id. Only works after the entry has \
                 been released in an out-of-band quarantine review."
                    .into(),
            ),
            input_schema: quarantine_release_schema(),
            output_schema: None,
            annotations: None,
            meta: None,
        },
    ]
}

fn empty_object_schema() -> Arc<Map<String, Value>> {
    let mut schema = Map::new();
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema.insert("properties".to_string(), Value::Object(Map::new()));
    Arc::new(schema)
}

fn quarantine_release_schema() -> Arc<Map<String, Value>> {
    let mut properties = Map::new();
    properties.insert(
        "quarantine_id".to_string(),
        serde_json::json!({
            "type": "string",
            "description": "Identifier from a '[quarantined: id=...]' response"
        }),
    );

    let mut schema = Map::new();
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema.insert("properties".to_string(), Value::Object(properties));
    schema.insert(
        "required".to_string(),
        Value::Array(vec![Value::String("quarantine_id".to_string())]),
    );
    Arc::new(schema)
}
