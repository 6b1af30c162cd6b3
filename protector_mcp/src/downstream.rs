//! Downstream MCP client leg.
//!
//! The wrapper owns exactly one live MCP client session to the server it
//! protects. This module maps the CLI-selected transport onto the matching
//! `rmcp` client transport, fetches configuration snapshots, and forwards
//! downstream list-change notifications into the session's refresh channel.
//!
//! The [`DownstreamPeer`] trait is the seam between the façade and the wire:
//! production uses [`DownstreamHandle`] over a real `rmcp` session, tests
//! substitute an in-process stub.

use async_trait::async_trait;
use protector_core::{ServerIdentity, ToolSpec};
use rmcp::{
    handler::client::ClientHandler,
    model::{
        CallToolRequestParams, CallToolResult, ClientCapabilities, ClientInfo,
        GetPromptRequestParams, GetPromptResult, Implementation, ListPromptsResult,
        ListResourcesResult, LoggingMessageNotificationParam, ProtocolVersion,
        ReadResourceRequestParams, ReadResourceResult,
    },
    service::{NotificationContext, Peer, RoleClient, ServiceError},
    transport::{
        sse_client::SseClientConfig, ConfigureCommandExt, SseClientTransport,
        StreamableHttpClientTransport, TokioChildProcess,
    },
    ServiceExt,
};
use thiserror::Error;
use tokio::sync::mpsc;

/// Which downstream server the wrapper protects, as selected on the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownstreamTarget {
    Stdio { command: String, args: Vec<String> },
    Sse { url: String },
    Http { url: String },
}

impl DownstreamTarget {
    /// The approval-store identity for this target. For stdio servers the
    /// locator is the exact command line; for the HTTP family it is the
    /// exact URL.
    pub fn identity(&self) -> ServerIdentity {
        match self {
            DownstreamTarget::Stdio { command, args } => {
                let mut locator = command.clone();
                for arg in args {
                    locator.push(' ');
                    locator.push_str(arg);
                }
                ServerIdentity::stdio(locator)
            }
            DownstreamTarget::Sse { url } => ServerIdentity::sse(url.clone()),
            DownstreamTarget::Http { url } => ServerIdentity::http(url.clone()),
        }
    }
}

/// Events surfaced from the downstream session to the wrapper session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownstreamEvent {
    /// The downstream announced a tool/prompt/resource list change; the
    /// snapshot must be refreshed and re-evaluated.
    ConfigChanged,
    /// The downstream session ended; all pending calls fail `unavailable`.
    Closed,
}

/// Errors from the downstream leg.
#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("failed to launch downstream process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to connect to downstream server: {0}")]
    Connect(String),

    /// The downstream answered with a JSON-RPC error of its own. Passed
    /// through verbatim where pass-through semantics apply.
    #[error("downstream returned an error: {}", .0.message)]
    Rpc(rmcp::model::ErrorData),

    #[error("downstream server unavailable: {0}")]
    Unavailable(String),
}

fn map_service_error(error: ServiceError) -> DownstreamError {
    match error {
        ServiceError::McpError(data) => DownstreamError::Rpc(data),
        other => DownstreamError::Unavailable(other.to_string()),
    }
}

/// Client-side handler for the downstream session. Forwards list-change
/// notifications into the session refresh channel and logs downstream log
/// messages under this process's tracing hierarchy.
#[derive(Clone)]
pub struct DownstreamHandler {
    events: mpsc::Sender<DownstreamEvent>,
}

impl DownstreamHandler {
    pub fn new(events: mpsc::Sender<DownstreamEvent>) -> Self {
        Self { events }
    }

    fn send_config_changed(&self) {
        // try_send: the refresh loop coalesces bursts anyway, so a full
        // channel just means a refresh is already pending.
        if let Err(error) = self.events.try_send(DownstreamEvent::ConfigChanged) {
            tracing::debug!(%error, "refresh event dropped");
        }
    }
}

impl ClientHandler for DownstreamHandler {
    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                title: Some("mcp-context-protector".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
        }
    }

    async fn on_tool_list_changed(&self, _context: NotificationContext<RoleClient>) {
        tracing::info!("downstream tool list changed");
        self.send_config_changed();
    }

    async fn on_prompt_list_changed(&self, _context: NotificationContext<RoleClient>) {
        tracing::info!("downstream prompt list changed");
        self.send_config_changed();
    }

    async fn on_resource_list_changed(&self, _context: NotificationContext<RoleClient>) {
        tracing::info!("downstream resource list changed");
        self.send_config_changed();
    }

    async fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        tracing::debug!(level = ?params.level, "downstream log: {}", params.data);
    }
}

/// The façade's view of the downstream server.
#[async_trait]
pub trait DownstreamPeer: Send + Sync {
    /// Instructions captured from the downstream initialize handshake.
    fn instructions(&self) -> Option<String>;

    /// Fetches the complete current tool list.
    async fn fetch_tools(&self) -> Result<Vec<ToolSpec>, DownstreamError>;

    async fn call_tool(
        &self,
        name: String,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult, DownstreamError>;

    async fn list_prompts(&self) -> Result<ListPromptsResult, DownstreamError>;

    async fn get_prompt(
        &self,
        request: GetPromptRequestParams,
    ) -> Result<GetPromptResult, DownstreamError>;

    async fn list_resources(&self) -> Result<ListResourcesResult, DownstreamError>;

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
    ) -> Result<ReadResourceResult, DownstreamError>;
}

/// Live connection to a downstream server.
pub struct DownstreamHandle {
    peer: Peer<RoleClient>,
    instructions: Option<String>,
    server_name: String,
}

impl DownstreamHandle {
    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

/// Connects to the selected downstream and starts a watchdog that reports
/// session termination through `events`.
pub async fn connect(
    target: &DownstreamTarget,
    events: mpsc::Sender<DownstreamEvent>,
) -> Result<DownstreamHandle, DownstreamError> {
    let handler = DownstreamHandler::new(events.clone());

    let client = match target {
        DownstreamTarget::Stdio { command, args } => {
            let transport = TokioChildProcess::new(
                tokio::process::Command::new(command).configure(|cmd| {
                    cmd.args(args).stderr(std::process::Stdio::inherit());
                }),
            )
            .map_err(DownstreamError::Spawn)?;
            handler
                .serve(transport)
                .await
                .map_err(|e| DownstreamError::Connect(e.to_string()))?
        }
        DownstreamTarget::Sse { url } => {
            let transport = SseClientTransport::start_with_client(
                reqwest::Client::default(),
                SseClientConfig {
                    sse_endpoint: url.clone().into(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| DownstreamError::Connect(e.to_string()))?;
            handler
                .serve(transport)
                .await
                .map_err(|e| DownstreamError::Connect(e.to_string()))?
        }
        DownstreamTarget::Http { url } => {
            let transport = StreamableHttpClientTransport::from_uri(url.as_str());
            handler
                .serve(transport)
                .await
                .map_err(|e| DownstreamError::Connect(e.to_string()))?
        }
    };

    let instructions = client.peer_info().and_then(|info| info.instructions.clone());
    let server_name = client
        .peer_info()
        .map(|info| info.server_info.name.clone())
        .unwrap_or_default();
    let peer = client.peer().clone();

    tokio::spawn(async move {
        let quit = client.waiting().await;
        tracing::info!(reason = ?quit, "downstream session ended");
        let _ = events.send(DownstreamEvent::Closed).await;
    });

    Ok(DownstreamHandle {
        peer,
        instructions,
        server_name,
    })
}

#[async_trait]
impl DownstreamPeer for DownstreamHandle {
    fn instructions(&self) -> Option<String> {
        self.instructions.clone()
    }

    async fn fetch_tools(&self) -> Result<Vec<ToolSpec>, DownstreamError> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .map_err(map_service_error)?;
        Ok(tools
            .into_iter()
            .map(|tool| ToolSpec {
                name: tool.name.to_string(),
                description: tool
                    .description
                    .map(|text| text.to_string())
                    .unwrap_or_default(),
                input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: String,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult, DownstreamError> {
        self.peer
            .call_tool(CallToolRequestParams {
                name: name.into(),
                arguments,
                task: None,
                meta: None,
            })
            .await
            .map_err(map_service_error)
    }

    async fn list_prompts(&self) -> Result<ListPromptsResult, DownstreamError> {
        let prompts = self
            .peer
            .list_all_prompts()
            .await
            .map_err(map_service_error)?;
        Ok(ListPromptsResult {
            prompts,
            ..Default::default()
        })
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParams,
    ) -> Result<GetPromptResult, DownstreamError> {
        self.peer.get_prompt(request).await.map_err(map_service_error)
    }

    async fn list_resources(&self) -> Result<ListResourcesResult, DownstreamError> {
        let resources = self
            .peer
            .list_all_resources()
            .await
            .map_err(map_service_error)?;
        Ok(ListResourcesResult {
            resources,
            ..Default::default()
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
    ) -> Result<ReadResourceResult, DownstreamError> {
        self.peer
            .read_resource(request)
            .await
            .map_err(map_service_error)
    }
}
