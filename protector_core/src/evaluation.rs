//! Approval evaluation of a live snapshot against a stored record.
//!
//! Evaluation is the gate the wrapper façade consults before advertising or
//! forwarding anything. It is deliberately a pure function: given the same
//! record and snapshot it always produces the same verdict, which keeps the
//! blocking semantics testable without any I/O.
//!
//! The one asymmetric rule: instructions drift blocks the *entire* server.
//! Instructions are injected into the model's prompt before any tool call,
//! so a change there contaminates the whole session context; per-tool
//! blocking would not contain it.

use crate::approval::ApprovalRecord;
use crate::canonical::{hash_snapshot_instructions, hash_tool};
use crate::model::ServerConfig;
use serde::Serialize;
use std::collections::BTreeMap;

/// Approval state of one element (the instructions, or a single tool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalState {
    /// The stored hash matches the live snapshot.
    Approved,
    /// A hash is stored, but the live snapshot no longer matches it.
    Drift,
    /// Nothing is stored for this element yet.
    New,
}

/// Overall gate for a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallState {
    /// Instructions and every advertised tool are approved.
    FullyApproved,
    /// Instructions are approved; some tools are not. Only unapproved tools
    /// are blocked.
    Partial,
    /// Instructions are new or drifted; nothing downstream is exposed.
    BlockedAll,
}

/// Result of evaluating one snapshot against one approval record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub instructions_state: ApprovalState,
    /// State per tool present in the snapshot. Tools that only exist in the
    /// record (removed downstream) do not appear here; their stale hashes
    /// are inert.
    pub tool_states: BTreeMap<String, ApprovalState>,
    pub overall_state: OverallState,
}

impl Evaluation {
    /// Evaluation for a server that must be treated as completely unknown,
    /// e.g. when the approval store cannot be read. Fail closed.
    pub fn unknown(snapshot: &ServerConfig) -> Self {
        evaluate(None, snapshot)
    }

    pub fn is_fully_approved(&self) -> bool {
        self.overall_state == OverallState::FullyApproved
    }

    /// Whether a specific tool may be exposed and forwarded.
    pub fn is_tool_approved(&self, name: &str) -> bool {
        self.overall_state != OverallState::BlockedAll
            && self.tool_states.get(name) == Some(&ApprovalState::Approved)
    }
}

/// Evaluates a live snapshot against the stored record for the same
/// identity. `record` is `None` for first contact.
pub fn evaluate(record: Option<&ApprovalRecord>, snapshot: &ServerConfig) -> Evaluation {
    let instructions_state = match record.and_then(|r| r.instructions_hash.as_deref()) {
        None => ApprovalState::New,
        Some(stored) if stored == hash_snapshot_instructions(snapshot) => ApprovalState::Approved,
        Some(_) => ApprovalState::Drift,
    };

    let mut tool_states = BTreeMap::new();
    for (name, tool) in &snapshot.tools {
        let stored = record.and_then(|r| r.tool_hashes.get(name));
        let state = match (hash_tool(tool), stored) {
            (Ok(live), Some(stored)) if *stored == live => ApprovalState::Approved,
            (Ok(_), Some(_)) => ApprovalState::Drift,
            (Ok(_), None) => ApprovalState::New,
            // Malformed schema: never trust it, never crash on it.
            (Err(_), Some(_)) => ApprovalState::Drift,
            (Err(_), None) => ApprovalState::New,
        };
        tool_states.insert(name.clone(), state);
    }

    let overall_state = if instructions_state != ApprovalState::Approved {
        OverallState::BlockedAll
    } else if tool_states
        .values()
        .all(|state| *state == ApprovalState::Approved)
    {
        OverallState::FullyApproved
    } else {
        OverallState::Partial
    };

    Evaluation {
        instructions_state,
        tool_states,
        overall_state,
    }
}
