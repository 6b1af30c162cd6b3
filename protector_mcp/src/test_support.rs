//! Shared stubs for unit and integration tests.
//!
//! The façade and session are tested against an in-process downstream stub
//! rather than a spawned server process, keeping the gating semantics fast
//! and deterministic to verify.

use crate::downstream::{DownstreamError, DownstreamPeer};
use async_trait::async_trait;
use protector_core::ToolSpec;
use rmcp::model::{
    CallToolResult, Content, ErrorData, GetPromptRequestParams, GetPromptResult,
    ListPromptsResult, ListResourcesResult, ReadResourceRequestParams, ReadResourceResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// In-process downstream with a mutable tool list, canned call results, and
/// a kill switch.
pub struct StubDownstream {
    instructions: Option<String>,
    tools: Mutex<Vec<ToolSpec>>,
    alive: AtomicBool,
    /// Tool name -> text returned from `tools/call`.
    responses: Mutex<HashMap<String, String>>,
    /// Recorded `tools/call` invocations (name, arguments).
    calls: Mutex<Vec<(String, Option<serde_json::Map<String, serde_json::Value>>)>>,
}

impl StubDownstream {
    pub fn new(instructions: Option<&str>, tools: Vec<ToolSpec>) -> Self {
        Self {
            instructions: instructions.map(str::to_string),
            tools: Mutex::new(tools),
            alive: AtomicBool::new(true),
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sets the text returned when the named tool is called.
    pub fn respond_with(&self, tool: &str, text: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(tool.to_string(), text.to_string());
    }

    /// Replaces the advertised tool list, as a downstream update would.
    pub fn set_tools(&self, tools: Vec<ToolSpec>) {
        *self.tools.lock().unwrap() = tools;
    }

    /// Simulates the downstream process going away.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn recorded_calls(&self) -> Vec<(String, Option<serde_json::Map<String, serde_json::Value>>)> {
        self.calls.lock().unwrap().clone()
    }

    fn ensure_alive(&self) -> Result<(), DownstreamError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DownstreamError::Unavailable("stub closed".to_string()))
        }
    }
}

#[async_trait]
impl DownstreamPeer for StubDownstream {
    fn instructions(&self) -> Option<String> {
        self.instructions.clone()
    }

    async fn fetch_tools(&self) -> Result<Vec<ToolSpec>, DownstreamError> {
        self.ensure_alive()?;
        Ok(self.tools.lock().unwrap().clone())
    }

    async fn call_tool(
        &self,
        name: String,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult, DownstreamError> {
        self.ensure_alive()?;
        self.calls.lock().unwrap().push((name.clone(), arguments));
        match self.responses.lock().unwrap().get(&name) {
            Some(text) => Ok(CallToolResult::success(vec![Content::text(text.clone())])),
            // The honest downstream answer for a name it does not serve.
            None => Err(DownstreamError::Rpc(ErrorData::invalid_params(
                format!("Tool '{}' not found.", name),
                None,
            ))),
        }
    }

    async fn list_prompts(&self) -> Result<ListPromptsResult, DownstreamError> {
        self.ensure_alive()?;
        Ok(ListPromptsResult::default())
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParams,
    ) -> Result<GetPromptResult, DownstreamError> {
        self.ensure_alive()?;
        Err(DownstreamError::Rpc(ErrorData::invalid_params(
            format!("Prompt '{}' not found.", request.name),
            None,
        )))
    }

    async fn list_resources(&self) -> Result<ListResourcesResult, DownstreamError> {
        self.ensure_alive()?;
        Ok(ListResourcesResult::default())
    }

    async fn read_resource(
        &self,
        _request: ReadResourceRequestParams,
    ) -> Result<ReadResourceResult, DownstreamError> {
        self.ensure_alive()?;
        Err(DownstreamError::Rpc(ErrorData::invalid_params(
            "Resource not found.".to_string(),
            None,
        )))
    }
}

/// Extracts the concatenated text content of a tool result.
pub fn result_text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|content| content.as_text().map(|text| text.text.clone()))
        .collect::<Vec<_>>()
        .join("")
}
