//! Command-line interface.
//!
//! One binary, four modes:
//!
//! 1. Wrapper mode (default): run as an MCP server over stdio, proxying the
//!    downstream server selected by `--command`/`--command-args`/`--url`/
//!    `--sse-url` behind the approval gate.
//! 2. `--review-server`: interactively review and approve the selected
//!    downstream server's current configuration.
//! 3. `--review-quarantine`: review quarantined tool responses and release
//!    them.
//! 4. `--list-guardrail-providers`: print registered provider names.
//!
//! Exit codes: 0 clean shutdown, 1 bad arguments, 2 downstream unreachable
//! at startup, 3 review declined or aborted.

use super::{review, server};
use crate::downstream::DownstreamTarget;
use crate::utils::logging::init_logging;
use clap::Parser;
use protector_core::{AnsiMode, FileApprovalStore, FileQuarantineStore};
use protector_guardrails::ProviderRegistry;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// mcp-context-protector: trust-on-first-use approval wrapper for MCP servers.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about,
    long_about = "mcp-context-protector wraps a downstream MCP server and blocks its tools until \
their configuration (server instructions, tool descriptions, input schemas) has been approved by \
a human. Configuration drift re-blocks the affected surface until re-approval.

Wrap a stdio server:    mcp-context-protector --command-args my-server --flag value
Wrap an HTTP server:    mcp-context-protector --url http://localhost:3000/mcp
Review a server:        mcp-context-protector --review-server --command-args my-server --flag value
Review quarantine:      mcp-context-protector --review-quarantine"
)]
pub struct Cli {
    /// Launch a stdio downstream from a single command string
    /// (whitespace-split for spawning; stored verbatim as the server identity)
    #[arg(long, conflicts_with_all = ["command_args", "url", "sse_url"])]
    pub command: Option<String>,

    /// Launch a stdio downstream from an explicit argv (command followed by
    /// its arguments)
    #[arg(long, num_args = 1.., value_name = "CMD", allow_hyphen_values = true, conflicts_with_all = ["url", "sse_url"])]
    pub command_args: Vec<String>,

    /// Streamable-HTTP downstream URL
    #[arg(long, conflicts_with = "sse_url")]
    pub url: Option<String>,

    /// SSE downstream URL
    #[arg(long)]
    pub sse_url: Option<String>,

    /// Scan tool responses with the named guardrail provider
    #[arg(long)]
    pub guardrail_provider: Option<String>,

    /// Print registered guardrail provider names and exit
    #[arg(long)]
    pub list_guardrail_providers: bool,

    /// Review and approve the selected downstream server's configuration
    #[arg(long)]
    pub review_server: bool,

    /// List every server with a stored approval record
    #[arg(long)]
    pub review_all_servers: bool,

    /// Review quarantined tool responses
    #[arg(long)]
    pub review_quarantine: bool,

    /// Restrict `--review-quarantine` to a single entry
    #[arg(long)]
    pub quarantine_id: Option<String>,

    /// Override the approval store path (default
    /// ~/.mcp-context-protector/servers.json)
    #[arg(long)]
    pub server_config_file: Option<PathBuf>,

    /// Override the quarantine store path (default
    /// ~/.mcp-context-protector/quarantine.json)
    #[arg(long)]
    pub quarantine_path: Option<PathBuf>,

    /// Show ANSI escape sequences as visible text instead of stripping them
    #[arg(long)]
    pub visualize_ansi_codes: bool,

    /// Bound on one guardrail scan before the response is treated as
    /// suspicious
    #[arg(long, default_value_t = 10)]
    pub scan_timeout_seconds: u64,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Log to stderr instead of the rolling log file
    #[arg(long)]
    pub log_to_stderr: bool,
}

impl Cli {
    /// The downstream server selected by transport flags, if any.
    pub fn downstream_target(&self) -> Option<DownstreamTarget> {
        if let Some(command_line) = &self.command {
            let mut parts = command_line.split_whitespace().map(str::to_string);
            let command = parts.next()?;
            return Some(DownstreamTarget::Stdio {
                command,
                args: parts.collect(),
            });
        }
        if !self.command_args.is_empty() {
            return Some(DownstreamTarget::Stdio {
                command: self.command_args[0].clone(),
                args: self.command_args[1..].to_vec(),
            });
        }
        if let Some(url) = &self.url {
            return Some(DownstreamTarget::Http { url: url.clone() });
        }
        if let Some(url) = &self.sse_url {
            return Some(DownstreamTarget::Sse { url: url.clone() });
        }
        None
    }

    pub fn approval_store(&self) -> FileApprovalStore {
        match &self.server_config_file {
            Some(path) => FileApprovalStore::new(path.clone()),
            None => FileApprovalStore::new(FileApprovalStore::default_path()),
        }
    }

    pub fn quarantine_store(&self) -> FileQuarantineStore {
        match &self.quarantine_path {
            Some(path) => FileQuarantineStore::new(path.clone()),
            None => FileQuarantineStore::new(FileQuarantineStore::default_path()),
        }
    }

    pub fn ansi_mode(&self) -> AnsiMode {
        if self.visualize_ansi_codes {
            AnsiMode::Visualize
        } else {
            AnsiMode::Strip
        }
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_seconds)
    }
}

pub async fn run() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let code = match error.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = error.print();
            return ExitCode::from(code);
        }
    };

    let log_level = if cli.debug { "debug" } else { "info" };
    if let Err(error) = init_logging(log_level, !cli.log_to_stderr) {
        eprintln!("Failed to initialize logging: {error:#}");
        return ExitCode::from(1);
    }

    // URL targets are validated up front so a typo is a usage error, not a
    // misleading "downstream unreachable".
    if let Some(DownstreamTarget::Http { url } | DownstreamTarget::Sse { url }) =
        cli.downstream_target()
        && let Err(error) = url::Url::parse(&url)
    {
        eprintln!("Invalid downstream URL '{url}': {error}");
        return ExitCode::from(1);
    }

    if cli.list_guardrail_providers {
        for name in ProviderRegistry::with_builtins().names() {
            println!("{name}");
        }
        return ExitCode::SUCCESS;
    }

    if cli.review_quarantine {
        return review::run_review_quarantine(&cli).await;
    }
    if cli.review_all_servers {
        return review::run_review_all_servers(&cli).await;
    }
    if cli.review_server {
        return review::run_review_server(&cli).await;
    }

    server::run_wrapper_mode(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("mcp-context-protector").chain(args.iter().copied()))
            .expect("parse")
    }

    #[test]
    fn command_string_is_split_for_spawning() {
        let cli = parse(&["--command", "my-server --flag value"]);
        assert_eq!(
            cli.downstream_target(),
            Some(DownstreamTarget::Stdio {
                command: "my-server".to_string(),
                args: vec!["--flag".to_string(), "value".to_string()],
            })
        );
    }

    #[test]
    fn command_args_keep_hyphenated_arguments() {
        let cli = parse(&["--command-args", "my-server", "--flag", "value"]);
        assert_eq!(
            cli.downstream_target(),
            Some(DownstreamTarget::Stdio {
                command: "my-server".to_string(),
                args: vec!["--flag".to_string(), "value".to_string()],
            })
        );
    }

    #[test]
    fn url_flags_select_the_http_family() {
        let cli = parse(&["--url", "http://localhost:3000/mcp"]);
        assert!(matches!(
            cli.downstream_target(),
            Some(DownstreamTarget::Http { .. })
        ));

        let cli = parse(&["--sse-url", "http://localhost:3000/sse"]);
        assert!(matches!(
            cli.downstream_target(),
            Some(DownstreamTarget::Sse { .. })
        ));
    }

    #[test]
    fn conflicting_transports_are_rejected() {
        let result = Cli::try_parse_from([
            "mcp-context-protector",
            "--command",
            "x",
            "--url",
            "http://y/",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn no_transport_selected_yields_none() {
        let cli = parse(&["--list-guardrail-providers"]);
        assert!(cli.downstream_target().is_none());
    }

    #[test]
    fn store_paths_are_overridable() {
        let cli = parse(&[
            "--command",
            "x",
            "--server-config-file",
            "/tmp/servers.json",
            "--quarantine-path",
            "/tmp/quarantine.json",
        ]);
        assert_eq!(
            cli.approval_store().path(),
            std::path::Path::new("/tmp/servers.json")
        );
        assert_eq!(
            cli.quarantine_store().path(),
            std::path::Path::new("/tmp/quarantine.json")
        );
    }

    #[test]
    fn ansi_mode_follows_the_flag() {
        assert_eq!(parse(&["--command", "x"]).ansi_mode(), AnsiMode::Strip);
        assert_eq!(
            parse(&["--command", "x", "--visualize-ansi-codes"]).ansi_mode(),
            AnsiMode::Visualize
        );
    }
}
