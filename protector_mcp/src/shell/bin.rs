// Binary entry point for mcp-context-protector.
// Thin wrapper that delegates to the library implementation.

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    protector_mcp::shell::run().await
}
