//! Snapshot model for a downstream server's configuration surface.
//!
//! A [`ServerConfig`] captures everything the wrapper trusts-on-first-use:
//! the server's instructions text and the full set of advertised tools. Tool
//! ordering in the downstream's `tools/list` response is not significant, so
//! tools are held in a name-keyed map. Snapshots are immutable values; a
//! refresh builds a new snapshot and swaps it in under the session lock.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One tool as advertised by the downstream server.
///
/// Two `ToolSpec`s are considered the same tool configuration when their
/// names match exactly, their descriptions match byte-for-byte (modulo one
/// trailing newline), and their input schemas are structurally equal after
/// canonical normalization. That comparison is implemented through the
/// hashes in [`crate::canonical`], not through `PartialEq` on this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A point-in-time snapshot of a downstream server's configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server instructions, if the server declared any. `None` (no
    /// instructions) and `Some("")` (explicitly empty) are distinct states.
    pub instructions: Option<String>,

    /// Advertised tools, keyed by tool name.
    pub tools: BTreeMap<String, ToolSpec>,
}

impl ServerConfig {
    /// Builds a snapshot from an unordered tool list. Later duplicates of a
    /// tool name replace earlier ones, matching how hosts resolve them.
    pub fn new(instructions: Option<String>, tools: impl IntoIterator<Item = ToolSpec>) -> Self {
        let tools = tools
            .into_iter()
            .map(|tool| (tool.name.clone(), tool))
            .collect();
        Self {
            instructions,
            tools,
        }
    }

    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }
}
