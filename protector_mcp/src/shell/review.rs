//! Interactive review modes.
//!
//! Plain stdin/stdout prompt loops, no TUI. `--review-server` connects to
//! the configured downstream, shows the evaluation of the live snapshot
//! against the stored record, and approves everything on confirmation.
//! `--review-quarantine` walks held responses and releases them
//! individually. Declining or aborting a review exits with code 3.
//!
//! All text shown here is ANSI-sanitized; with `--visualize-ansi-codes`
//! the escape bytes are rendered visibly instead so the reviewer can see
//! exactly what the server sent.

use super::cli::Cli;
use crate::downstream::{self, DownstreamPeer};
use protector_core::{
    evaluate, sanitize, AnsiMode, ApprovalState, ApprovalStore, QuarantineEntry, QuarantineStore,
    ServerConfig,
};
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;

const EXIT_DECLINED: u8 = 3;

/// Reads one answer from stdin. `None` means EOF, treated as an abort.
fn prompt(question: &str) -> Option<String> {
    print!("{question}");
    std::io::stdout().flush().ok()?;
    let mut answer = String::new();
    match std::io::stdin().read_line(&mut answer) {
        Ok(0) => None,
        Ok(_) => Some(answer.trim().to_ascii_lowercase()),
        Err(_) => None,
    }
}

fn state_label(state: ApprovalState) -> &'static str {
    match state {
        ApprovalState::Approved => "approved",
        ApprovalState::Drift => "CHANGED since approval",
        ApprovalState::New => "NEW (never approved)",
    }
}

fn print_snapshot_review(snapshot: &ServerConfig, evaluation: &protector_core::Evaluation, mode: AnsiMode) {
    println!();
    match &snapshot.instructions {
        Some(text) => {
            println!(
                "Instructions [{}]:",
                state_label(evaluation.instructions_state)
            );
            for line in sanitize(text, mode).lines() {
                println!("    {line}");
            }
        }
        None => println!(
            "Instructions [{}]: (none declared)",
            state_label(evaluation.instructions_state)
        ),
    }

    println!();
    println!("Tools ({}):", snapshot.tools.len());
    for (name, tool) in &snapshot.tools {
        let state = evaluation
            .tool_states
            .get(name)
            .copied()
            .unwrap_or(ApprovalState::New);
        println!("  {} [{}]", name, state_label(state));
        let description = sanitize(&tool.description, mode);
        if !description.is_empty() {
            println!("      {description}");
        }
    }
    println!();
}

/// `--review-server`: connect, evaluate, prompt, approve all on accept.
pub async fn run_review_server(cli: &Cli) -> ExitCode {
    let Some(target) = cli.downstream_target() else {
        eprintln!(
            "--review-server needs the downstream flags too (--command, --command-args, --url \
             or --sse-url) so the right server is reviewed."
        );
        return ExitCode::from(1);
    };

    let identity = target.identity();
    let store = cli.approval_store();

    // The events channel is unused in review mode; the session is short-lived.
    let (events_tx, _events_rx) = mpsc::channel(16);
    let handle = match downstream::connect(&target, events_tx).await {
        Ok(handle) => handle,
        Err(error) => {
            eprintln!("Failed to reach downstream server: {error}");
            return ExitCode::from(2);
        }
    };

    let tools = match handle.fetch_tools().await {
        Ok(tools) => tools,
        Err(error) => {
            eprintln!("Failed to fetch downstream configuration: {error}");
            return ExitCode::from(2);
        }
    };
    let snapshot = ServerConfig::new(handle.instructions(), tools);

    let record = match store.load(&identity).await {
        Ok(record) => record,
        Err(error) => {
            eprintln!("Warning: approval store unreadable ({error}); treating server as new.");
            None
        }
    };
    let evaluation = evaluate(record.as_ref(), &snapshot);

    println!("Reviewing {identity}");
    if evaluation.is_fully_approved() {
        println!("Configuration is unchanged since the last approval. Nothing to do.");
        return ExitCode::SUCCESS;
    }

    print_snapshot_review(&snapshot, &evaluation, cli.ansi_mode());

    match prompt("Approve this configuration (instructions and all tools)? [y/N] ") {
        Some(answer) if answer == "y" || answer == "yes" => {
            if let Err(error) = store.approve_all(&identity, &snapshot).await {
                eprintln!("Failed to record approval: {error}");
                return ExitCode::from(1);
            }
            println!("Approved. The wrapper will expose these tools on its next evaluation.");
            ExitCode::SUCCESS
        }
        _ => {
            println!("Declined. The server stays blocked.");
            ExitCode::from(EXIT_DECLINED)
        }
    }
}

/// `--review-all-servers`: list stored records; live review still happens
/// per server via `--review-server`.
pub async fn run_review_all_servers(cli: &Cli) -> ExitCode {
    let store = cli.approval_store();
    let identities = match store.list_identities().await {
        Ok(identities) => identities,
        Err(error) => {
            eprintln!("Failed to read approval store: {error}");
            return ExitCode::from(1);
        }
    };

    if identities.is_empty() {
        println!("No servers have approval records yet.");
        return ExitCode::SUCCESS;
    }

    println!("Servers with approval records:");
    for identity in identities {
        match store.load(&identity).await {
            Ok(Some(record)) => {
                println!(
                    "  {} — {} approved tool(s), last updated {}",
                    identity,
                    record.tool_hashes.len(),
                    record.last_updated_at.to_rfc3339()
                );
            }
            _ => println!("  {identity}"),
        }
    }
    println!();
    println!(
        "Run with --review-server and the matching transport flags to re-review a live server."
    );
    ExitCode::SUCCESS
}

fn print_quarantine_entry(entry: &QuarantineEntry, mode: AnsiMode) {
    println!();
    println!("Quarantine id: {}", entry.id);
    println!("  server:  {}", entry.server_identity);
    println!("  tool:    {}", entry.tool_name);
    println!("  held at: {}", entry.created_at.to_rfc3339());
    println!("  verdict: {}", entry.guardrail_verdict);
    println!("  response text:");
    for text in response_texts(&entry.response) {
        for line in sanitize(&text, mode).lines() {
            println!("    | {line}");
        }
    }
}

/// Text fragments of a stored tool result document.
fn response_texts(response: &serde_json::Value) -> Vec<String> {
    response
        .get("content")
        .and_then(|content| content.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text"))
                .filter_map(|text| text.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// `--review-quarantine [--quarantine-id ID]`.
pub async fn run_review_quarantine(cli: &Cli) -> ExitCode {
    let store: Arc<dyn QuarantineStore> = Arc::new(cli.quarantine_store());

    let entries = if let Some(id) = &cli.quarantine_id {
        match store.get(id).await {
            Ok(Some(entry)) => vec![entry],
            Ok(None) => {
                eprintln!("No quarantine entry with id {id}.");
                return ExitCode::from(1);
            }
            Err(error) => {
                eprintln!("Failed to read quarantine store: {error}");
                return ExitCode::from(1);
            }
        }
    } else {
        match store.list(true).await {
            Ok(entries) => entries,
            Err(error) => {
                eprintln!("Failed to read quarantine store: {error}");
                return ExitCode::from(1);
            }
        }
    };

    if entries.is_empty() {
        println!("No quarantined responses awaiting review.");
        return ExitCode::SUCCESS;
    }

    for entry in &entries {
        print_quarantine_entry(entry, cli.ansi_mode());
        if entry.released {
            println!("  (already released)");
            continue;
        }
        match prompt("Release this response to the host? [y/N/q] ").as_deref() {
            Some("y") | Some("yes") => {
                if let Err(error) = store.release(&entry.id).await {
                    eprintln!("Failed to release entry: {error}");
                    return ExitCode::from(1);
                }
                println!("Released. 'quarantine_release' will now return the payload.");
            }
            Some("q") | None => {
                println!("Review aborted.");
                return ExitCode::from(EXIT_DECLINED);
            }
            _ => println!("Kept in quarantine."),
        }
    }

    ExitCode::SUCCESS
}
