//! mcp-context-protector: a trust-on-first-use security wrapper for MCP
//! servers.
//!
//! The wrapper sits between an MCP host and one downstream MCP server. It
//! presents a filtered MCP server to the host (`facade`), drives a live MCP
//! client session to the downstream (`downstream`), and gates everything on
//! the approval evaluation from `protector_core`. Tool responses pass
//! through the guardrail `pipeline` before reaching the host; flagged
//! payloads land in quarantine. The `shell` module carries the CLI,
//! including the interactive review modes that grant approvals.

pub mod downstream;
pub mod facade;
pub mod host_transport;
pub mod pipeline;
pub mod session;
pub mod shell;
pub mod test_support;
pub mod utils;
