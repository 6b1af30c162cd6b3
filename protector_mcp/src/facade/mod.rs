//! The wrapper's MCP server façade.
//!
//! [`WrapperService`] implements `rmcp::ServerHandler` toward the host and
//! enforces the approval gate on every surface: `tools/list` advertises
//! only approved downstream tools plus the built-ins — shrinking to
//! `config_instructions` alone while the server is fully blocked —
//! `tools/call` forwards only approved calls, and prompts/resources pass
//! through only when the server is fully approved.
//!
//! ## Leak-free blocking
//!
//! Nothing about a blocked tool escapes: no name, description, schema, or
//! count. A call to a blocked tool and a call to a name that does not exist
//! produce byte-identical errors whenever the server is not fully approved,
//! so a caller cannot probe for the existence of hidden tools. Honest
//! pass-through of unknown names (with the downstream's own "not found"
//! error) happens only under full approval, when there is nothing to hide.

pub mod builtin;

use crate::downstream::DownstreamError;
use crate::pipeline::ResponsePipeline;
use crate::session::WrapperSession;
use protector_core::{sanitize, AnsiMode, OverallState, QuarantineStore};
use rmcp::{
    handler::server::ServerHandler,
    model::{
        CallToolRequestParams, CallToolResult, CancelledNotificationParam, Content,
        ErrorData as McpError, GetPromptRequestParams, GetPromptResult, Implementation,
        ListPromptsResult, ListResourcesResult, ListToolsResult, PaginatedRequestParams,
        ProtocolVersion, ReadResourceRequestParams, ReadResourceResult, ServerCapabilities,
        ServerInfo, Tool,
    },
    service::{NotificationContext, RequestContext, RoleServer},
};
use std::sync::Arc;

/// Uniform error text for anything hidden by policy. Deliberately identical
/// for "blocked" and "not present" so the two cases cannot be told apart.
pub const POLICY_BLOCKED_MESSAGE: &str = "Tool not available. The wrapped server's configuration \
requires review; call 'config_instructions' for details.";

/// Error text when the downstream leg is gone.
pub const UNAVAILABLE_MESSAGE: &str = "Downstream server unavailable.";

/// Uniform error text for an unknown or still-held quarantine entry.
const QUARANTINE_UNAVAILABLE_MESSAGE: &str =
    "Quarantine entry is unknown or has not been released.";

pub(crate) fn policy_blocked_error() -> McpError {
    McpError::invalid_params(POLICY_BLOCKED_MESSAGE.to_string(), None)
}

pub(crate) fn unavailable_error() -> McpError {
    McpError::internal_error(UNAVAILABLE_MESSAGE.to_string(), None)
}

/// MCP server handler presented to the host.
#[derive(Clone)]
pub struct WrapperService {
    session: Arc<WrapperSession>,
    pipeline: Arc<ResponsePipeline>,
    quarantine: Arc<dyn QuarantineStore>,
    ansi_mode: AnsiMode,
}

impl WrapperService {
    pub fn new(
        session: Arc<WrapperSession>,
        pipeline: Arc<ResponsePipeline>,
        quarantine: Arc<dyn QuarantineStore>,
        ansi_mode: AnsiMode,
    ) -> Self {
        Self {
            session,
            pipeline,
            quarantine,
            ansi_mode,
        }
    }

    pub fn session(&self) -> &Arc<WrapperSession> {
        &self.session
    }

    /// The tool inventory the host is allowed to see right now.
    pub fn visible_tools(&self) -> Vec<Tool> {
        let state = self.session.current();

        // A fully blocked server (instructions drift/new, or the downstream
        // gone) exposes exactly one tool: the explanation of how to unblock
        // it. Not even `quarantine_release` is advertised here.
        if !state.connected || state.evaluation.overall_state == OverallState::BlockedAll {
            return builtin::builtin_tools()
                .into_iter()
                .filter(|tool| tool.name == builtin::CONFIG_INSTRUCTIONS_TOOL)
                .collect();
        }

        let mut tools = builtin::builtin_tools();
        for (name, spec) in &state.snapshot.tools {
            if builtin::is_builtin(name) {
                tracing::warn!(tool = %name, "downstream tool shadowed by built-in");
                continue;
            }
            if state.evaluation.is_tool_approved(name) {
                tools.push(Tool {
                    name: spec.name.clone().into(),
                    title: None,
                    icons: None,
                    description: Some(sanitize(&spec.description, self.ansi_mode).into()),
                    input_schema: Arc::new(
                        spec.input_schema.as_object().cloned().unwrap_or_default(),
                    ),
                    output_schema: None,
                    annotations: None,
                            meta: None,
                });
            }
        }

        tools
    }

    /// Handles one `tools/call`, built-ins included. This is the whole
    /// approval gate for tool execution.
    pub async fn dispatch_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult, McpError> {
        // Reserved names are handled locally no matter what the downstream
        // advertises.
        if name == builtin::CONFIG_INSTRUCTIONS_TOOL {
            return Ok(CallToolResult::success(vec![Content::text(
                builtin::CONFIG_INSTRUCTIONS_TEXT.to_string(),
            )]));
        }
        if name == builtin::QUARANTINE_RELEASE_TOOL {
            return self.handle_quarantine_release(arguments).await;
        }

        let state = self.session.current();
        if !state.connected {
            return Err(unavailable_error());
        }

        if state.snapshot.tools.contains_key(name) {
            if state.evaluation.is_tool_approved(name) {
                return self.forward_tool_call(name, arguments).await;
            }
            tracing::info!(tool = %name, "blocked call to unapproved tool");
            return Err(policy_blocked_error());
        }

        if state.evaluation.is_fully_approved() {
            // Nothing is hidden, so the downstream's honest "not found"
            // answer is safe to pass through.
            return self.forward_tool_call(name, arguments).await;
        }

        tracing::info!(tool = %name, "blocked call to unknown tool name");
        Err(policy_blocked_error())
    }

    async fn forward_tool_call(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult, McpError> {
        let cancel = self.session.cancellation();
        let call = self
            .session
            .downstream()
            .call_tool(name.to_string(), arguments.clone());

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(unavailable_error()),
            result = call => result,
        };

        match result {
            Ok(result) => {
                self.pipeline
                    .process(name, arguments.as_ref(), result)
                    .await
            }
            Err(DownstreamError::Rpc(data)) => Err(data),
            Err(error) => {
                tracing::warn!(tool = %name, %error, "downstream call failed");
                Err(unavailable_error())
            }
        }
    }

    async fn handle_quarantine_release(
        &self,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult, McpError> {
        let arguments = arguments.unwrap_or_default();
        let id = arguments
            .get("quarantine_id")
            .and_then(|value| value.as_str())
            .ok_or_else(|| {
                McpError::invalid_params("quarantine_id parameter is required".to_string(), None)
            })?;

        let entry = self.quarantine.get(id).await.map_err(|error| {
            tracing::error!(%error, "quarantine store read failed");
            McpError::internal_error("quarantine store unavailable".to_string(), None)
        })?;

        // Unknown and unreleased are indistinguishable on purpose: the id
        // space must not be probeable.
        let entry = match entry {
            Some(entry) if entry.released => entry,
            _ => {
                return Err(McpError::invalid_params(
                    QUARANTINE_UNAVAILABLE_MESSAGE.to_string(),
                    None,
                ));
            }
        };

        serde_json::from_value(entry.response).map_err(|error| {
            tracing::error!(%error, "stored quarantine payload is not a tool result");
            McpError::internal_error("stored quarantine payload is corrupt".to_string(), None)
        })
    }

    /// Prompts and resources are all-or-nothing: anything short of full
    /// approval hides them entirely.
    fn passthrough_allowed(&self) -> bool {
        let state = self.session.current();
        state.connected && state.evaluation.is_fully_approved()
    }

    fn map_downstream_error(error: DownstreamError) -> McpError {
        match error {
            DownstreamError::Rpc(data) => data,
            other => {
                tracing::warn!(error = %other, "downstream request failed");
                unavailable_error()
            }
        }
    }
}

#[async_trait::async_trait]
#[allow(clippy::manual_async_fn)] // Required by rmcp ServerHandler trait
impl ServerHandler for WrapperService {
    fn get_info(&self) -> ServerInfo {
        let state = self.session.current();
        // The downstream's instruction text is part of the prompt surface;
        // it is only surfaced once it has been approved in full.
        let instructions = if state.connected && state.evaluation.is_fully_approved() {
            state
                .snapshot
                .instructions
                .as_ref()
                .map(|text| sanitize(text, self.ansi_mode))
        } else {
            None
        };

        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_tool_list_changed()
                .enable_prompts()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                title: Some("mcp-context-protector".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions,
        }
    }

    fn on_initialized(
        &self,
        context: NotificationContext<RoleServer>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        async move {
            tracing::info!("host connected");
            self.session.set_host_peer(context.peer.clone());
        }
    }

    fn on_cancelled(
        &self,
        notification: CancelledNotificationParam,
        _context: NotificationContext<RoleServer>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        async move {
            tracing::info!(
                request_id = ?notification.request_id,
                reason = ?notification.reason,
                "host cancelled request"
            );
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            Ok(ListToolsResult {
                meta: None,
                tools: self.visible_tools(),
                next_cursor: None,
            })
        }
    }

    fn call_tool(
        &self,
        params: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move { self.dispatch_tool(params.name.as_ref(), params.arguments).await }
    }

    fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListPromptsResult, McpError>> + Send + '_ {
        async move {
            if !self.passthrough_allowed() {
                return Ok(ListPromptsResult::default());
            }
            self.session
                .downstream()
                .list_prompts()
                .await
                .map_err(Self::map_downstream_error)
        }
    }

    fn get_prompt(
        &self,
        request: GetPromptRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<GetPromptResult, McpError>> + Send + '_ {
        async move {
            if !self.passthrough_allowed() {
                return Err(policy_blocked_error());
            }
            self.session
                .downstream()
                .get_prompt(request)
                .await
                .map_err(Self::map_downstream_error)
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        async move {
            if !self.passthrough_allowed() {
                return Ok(ListResourcesResult::default());
            }
            self.session
                .downstream()
                .list_resources()
                .await
                .map_err(Self::map_downstream_error)
        }
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        async move {
            if !self.passthrough_allowed() {
                return Err(policy_blocked_error());
            }
            self.session
                .downstream()
                .read_resource(request)
                .await
                .map_err(Self::map_downstream_error)
        }
    }
}
