//! Core state and semantics for the mcp-context-protector wrapper.
//!
//! This crate is protocol-agnostic: it defines what a downstream server's
//! configuration snapshot is, how snapshots are canonicalized, hashed, and
//! compared, how granular approvals are evaluated and persisted, and where
//! flagged tool responses are quarantined. The MCP-facing crate
//! (`protector_mcp`) composes these pieces into the live proxy.

pub mod approval;
pub mod canonical;
pub mod comparator;
pub mod error;
pub mod evaluation;
pub mod identity;
pub mod model;
pub mod quarantine;
pub mod sanitize;
mod store_io;

pub use approval::{
    default_data_dir, ApprovalRecord, ApprovalStore, FileApprovalStore, MemoryApprovalStore,
};
pub use canonical::{hash_instructions, hash_tool, ABSENT_INSTRUCTIONS};
pub use comparator::{diff_configs, ConfigDiff, ToolModification};
pub use error::{ProtectorError, Result};
pub use evaluation::{evaluate, ApprovalState, Evaluation, OverallState};
pub use identity::{ServerIdentity, TransportKind};
pub use model::{ServerConfig, ToolSpec};
pub use quarantine::{
    FileQuarantineStore, MemoryQuarantineStore, QuarantineEntry, QuarantineStore,
};
pub use sanitize::{sanitize, AnsiMode};
