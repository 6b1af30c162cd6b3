//! Persistent approval records.
//!
//! One [`ApprovalRecord`] is stored per [`ServerIdentity`], holding the
//! hashes that were blessed at approval time. The store is process-wide and
//! injected into sessions, so tests can swap the on-disk implementation for
//! [`MemoryApprovalStore`].
//!
//! ## Persistence format
//!
//! `servers.json` is a version-1 document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "records": [
//!     {
//!       "identity": { "kind": "stdio", "locator": "my-server --flag" },
//!       "instructions_hash": "…",
//!       "tool_hashes": { "echo": "…" },
//!       "created_at": "2026-01-01T00:00:00Z",
//!       "last_updated_at": "2026-01-01T00:00:00Z"
//!     }
//!   ]
//! }
//! ```
//!
//! Writes are atomic-rename with an advisory file lock (see
//! [`crate::store_io`]). Failure policy is fail-closed: if the store cannot
//! be read, every server evaluates as unknown and stays blocked; if a write
//! fails mid-approval, the file keeps its previous content and the error
//! propagates to the approval flow.

use crate::canonical::{hash_snapshot_instructions, hash_tool};
use crate::error::{ProtectorError, Result};
use crate::evaluation::{evaluate, Evaluation};
use crate::identity::ServerIdentity;
use crate::model::ServerConfig;
use crate::store_io;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::RwLock;

const STORE_VERSION: u32 = 1;

/// Approval state persisted for one server identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Hash of the approved instructions, or `None` while instructions have
    /// never been approved for this server.
    pub instructions_hash: Option<String>,
    /// Hash of each approved tool's canonical triple, keyed by tool name.
    /// Entries for tools the downstream no longer advertises are inert and
    /// are garbage-collected on the next full approval.
    pub tool_hashes: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl ApprovalRecord {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            instructions_hash: None,
            tool_hashes: BTreeMap::new(),
            created_at: now,
            last_updated_at: now,
        }
    }

    /// Record approving the given snapshot in full: its instructions and
    /// every advertised tool. Fails if any tool schema is malformed; a
    /// schema that cannot be canonicalized cannot be trusted.
    pub fn approving_all(snapshot: &ServerConfig) -> Result<Self> {
        let now = Utc::now();
        let mut tool_hashes = BTreeMap::new();
        for tool in snapshot.tools.values() {
            tool_hashes.insert(tool.name.clone(), hash_tool(tool)?);
        }
        Ok(Self {
            instructions_hash: Some(hash_snapshot_instructions(snapshot)),
            tool_hashes,
            created_at: now,
            last_updated_at: now,
        })
    }
}

/// Granular approval operations, keyed by server identity.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Loads the record for an identity, or `None` when the server has never
    /// been approved.
    async fn load(&self, identity: &ServerIdentity) -> Result<Option<ApprovalRecord>>;

    /// All identities with a stored record, for review tooling.
    async fn list_identities(&self) -> Result<Vec<ServerIdentity>>;

    /// Records the snapshot's instructions hash for this identity.
    async fn approve_instructions(
        &self,
        identity: &ServerIdentity,
        snapshot: &ServerConfig,
    ) -> Result<()>;

    /// Records the hash for a single tool out of the snapshot.
    async fn approve_tool(
        &self,
        identity: &ServerIdentity,
        snapshot: &ServerConfig,
        tool_name: &str,
    ) -> Result<()>;

    /// Approves the instructions and every tool in the snapshot, replacing
    /// the stored tool hashes wholesale (stale entries are dropped here).
    async fn approve_all(&self, identity: &ServerIdentity, snapshot: &ServerConfig) -> Result<()>;

    /// Removes the record for an identity entirely.
    async fn forget(&self, identity: &ServerIdentity) -> Result<()>;

    /// Evaluates a live snapshot against the stored record. Fail-closed: a
    /// store that cannot be read evaluates as unknown (fully blocked).
    async fn evaluate_snapshot(
        &self,
        identity: &ServerIdentity,
        snapshot: &ServerConfig,
    ) -> Evaluation {
        match self.load(identity).await {
            Ok(record) => evaluate(record.as_ref(), snapshot),
            Err(error) => {
                tracing::warn!(
                    identity = %identity,
                    error = %error,
                    "approval store unreadable, treating server as unknown"
                );
                Evaluation::unknown(snapshot)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// On-disk implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct StoredApproval {
    identity: ServerIdentity,
    #[serde(flatten)]
    record: ApprovalRecord,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServersFile {
    version: u32,
    records: Vec<StoredApproval>,
}

impl ServersFile {
    fn empty() -> Self {
        Self {
            version: STORE_VERSION,
            records: Vec::new(),
        }
    }

    fn parse(bytes: Option<Vec<u8>>) -> Result<Self> {
        let Some(bytes) = bytes else {
            return Ok(Self::empty());
        };
        let file: ServersFile = serde_json::from_slice(&bytes)?;
        if file.version != STORE_VERSION {
            return Err(ProtectorError::Persist(format!(
                "unsupported servers.json version {}",
                file.version
            )));
        }
        Ok(file)
    }

    fn record_mut(&mut self, identity: &ServerIdentity) -> &mut ApprovalRecord {
        if let Some(index) = self
            .records
            .iter()
            .position(|stored| stored.identity == *identity)
        {
            &mut self.records[index].record
        } else {
            self.records.push(StoredApproval {
                identity: identity.clone(),
                record: ApprovalRecord::empty(Utc::now()),
            });
            &mut self.records.last_mut().expect("just pushed").record
        }
    }
}

/// `servers.json`-backed approval store.
pub struct FileApprovalStore {
    path: PathBuf,
}

impl FileApprovalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: `~/.mcp-context-protector/servers.json`.
    pub fn default_path() -> PathBuf {
        default_data_dir().join("servers.json")
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn read_all(&self) -> Result<ServersFile> {
        ServersFile::parse(store_io::read_file(self.path.clone()).await?)
    }

    /// Runs a read-modify-write cycle on the whole document under the
    /// writer lock.
    async fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut ServersFile) -> Result<()> + Send + 'static,
    {
        store_io::update_file(self.path.clone(), move |bytes| {
            let mut file = ServersFile::parse(bytes)?;
            apply(&mut file)?;
            Ok((serde_json::to_vec_pretty(&file)?, ()))
        })
        .await
    }
}

/// Directory holding all persisted protector state.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-context-protector")
}

#[async_trait]
impl ApprovalStore for FileApprovalStore {
    async fn load(&self, identity: &ServerIdentity) -> Result<Option<ApprovalRecord>> {
        let file = self.read_all().await?;
        Ok(file
            .records
            .into_iter()
            .find(|stored| stored.identity == *identity)
            .map(|stored| stored.record))
    }

    async fn list_identities(&self) -> Result<Vec<ServerIdentity>> {
        let file = self.read_all().await?;
        Ok(file.records.into_iter().map(|stored| stored.identity).collect())
    }

    async fn approve_instructions(
        &self,
        identity: &ServerIdentity,
        snapshot: &ServerConfig,
    ) -> Result<()> {
        let identity = identity.clone();
        let hash = hash_snapshot_instructions(snapshot);
        self.mutate(move |file| {
            let record = file.record_mut(&identity);
            record.instructions_hash = Some(hash);
            record.last_updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn approve_tool(
        &self,
        identity: &ServerIdentity,
        snapshot: &ServerConfig,
        tool_name: &str,
    ) -> Result<()> {
        let tool = snapshot
            .tool(tool_name)
            .ok_or_else(|| ProtectorError::UnknownTool(tool_name.to_string()))?;
        let hash = hash_tool(tool)?;
        let identity = identity.clone();
        let tool_name = tool_name.to_string();
        self.mutate(move |file| {
            let record = file.record_mut(&identity);
            record.tool_hashes.insert(tool_name, hash);
            record.last_updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn approve_all(&self, identity: &ServerIdentity, snapshot: &ServerConfig) -> Result<()> {
        let approved = ApprovalRecord::approving_all(snapshot)?;
        let identity = identity.clone();
        self.mutate(move |file| {
            let record = file.record_mut(&identity);
            record.instructions_hash = approved.instructions_hash;
            record.tool_hashes = approved.tool_hashes;
            record.last_updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn forget(&self, identity: &ServerIdentity) -> Result<()> {
        let identity = identity.clone();
        self.mutate(move |file| {
            file.records.retain(|stored| stored.identity != identity);
            Ok(())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests, fail-closed fallbacks)
// ---------------------------------------------------------------------------

/// Approval store held entirely in memory.
#[derive(Default)]
pub struct MemoryApprovalStore {
    records: RwLock<HashMap<ServerIdentity, ApprovalRecord>>,
}

impl MemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for MemoryApprovalStore {
    async fn load(&self, identity: &ServerIdentity) -> Result<Option<ApprovalRecord>> {
        Ok(self.records.read().expect("store lock").get(identity).cloned())
    }

    async fn list_identities(&self) -> Result<Vec<ServerIdentity>> {
        Ok(self
            .records
            .read()
            .expect("store lock")
            .keys()
            .cloned()
            .collect())
    }

    async fn approve_instructions(
        &self,
        identity: &ServerIdentity,
        snapshot: &ServerConfig,
    ) -> Result<()> {
        let mut records = self.records.write().expect("store lock");
        let record = records
            .entry(identity.clone())
            .or_insert_with(|| ApprovalRecord::empty(Utc::now()));
        record.instructions_hash = Some(hash_snapshot_instructions(snapshot));
        record.last_updated_at = Utc::now();
        Ok(())
    }

    async fn approve_tool(
        &self,
        identity: &ServerIdentity,
        snapshot: &ServerConfig,
        tool_name: &str,
    ) -> Result<()> {
        let tool = snapshot
            .tool(tool_name)
            .ok_or_else(|| ProtectorError::UnknownTool(tool_name.to_string()))?;
        let hash = hash_tool(tool)?;
        let mut records = self.records.write().expect("store lock");
        let record = records
            .entry(identity.clone())
            .or_insert_with(|| ApprovalRecord::empty(Utc::now()));
        record.tool_hashes.insert(tool_name.to_string(), hash);
        record.last_updated_at = Utc::now();
        Ok(())
    }

    async fn approve_all(&self, identity: &ServerIdentity, snapshot: &ServerConfig) -> Result<()> {
        let approved = ApprovalRecord::approving_all(snapshot)?;
        let mut records = self.records.write().expect("store lock");
        match records.get_mut(identity) {
            Some(record) => {
                record.instructions_hash = approved.instructions_hash;
                record.tool_hashes = approved.tool_hashes;
                record.last_updated_at = Utc::now();
            }
            None => {
                records.insert(identity.clone(), approved);
            }
        }
        Ok(())
    }

    async fn forget(&self, identity: &ServerIdentity) -> Result<()> {
        self.records.write().expect("store lock").remove(identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::OverallState;
    use crate::model::ToolSpec;
    use serde_json::json;

    fn snapshot() -> ServerConfig {
        ServerConfig::new(
            Some("Hi".to_string()),
            vec![ToolSpec::new("echo", "Echo input", json!({"type": "object"}))],
        )
    }

    fn file_store() -> (tempfile::TempDir, FileApprovalStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileApprovalStore::new(dir.path().join("servers.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn unknown_identity_loads_as_none() {
        let (_dir, store) = file_store();
        let record = store.load(&ServerIdentity::stdio("missing")).await.unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn approve_all_then_evaluate_is_fully_approved() {
        let (_dir, store) = file_store();
        let identity = ServerIdentity::stdio("echo-server");
        let snap = snapshot();

        store.approve_all(&identity, &snap).await.unwrap();
        let eval = store.evaluate_snapshot(&identity, &snap).await;
        assert_eq!(eval.overall_state, OverallState::FullyApproved);
    }

    #[tokio::test]
    async fn approve_tool_alone_leaves_instructions_unapproved() {
        let (_dir, store) = file_store();
        let identity = ServerIdentity::stdio("echo-server");
        let snap = snapshot();

        store.approve_tool(&identity, &snap, "echo").await.unwrap();
        let eval = store.evaluate_snapshot(&identity, &snap).await;
        assert_eq!(eval.overall_state, OverallState::BlockedAll);

        store.approve_instructions(&identity, &snap).await.unwrap();
        let eval = store.evaluate_snapshot(&identity, &snap).await;
        assert_eq!(eval.overall_state, OverallState::FullyApproved);
    }

    #[tokio::test]
    async fn approve_tool_rejects_names_missing_from_snapshot() {
        let (_dir, store) = file_store();
        let identity = ServerIdentity::stdio("echo-server");
        let result = store.approve_tool(&identity, &snapshot(), "ghost").await;
        assert!(matches!(result, Err(ProtectorError::UnknownTool(_))));
    }

    #[tokio::test]
    async fn forget_removes_the_record() {
        let (_dir, store) = file_store();
        let identity = ServerIdentity::stdio("echo-server");
        let snap = snapshot();

        store.approve_all(&identity, &snap).await.unwrap();
        store.forget(&identity).await.unwrap();
        assert!(store.load(&identity).await.unwrap().is_none());
        assert!(store.list_identities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn approve_all_garbage_collects_stale_tool_hashes() {
        let (_dir, store) = file_store();
        let identity = ServerIdentity::stdio("echo-server");

        store.approve_all(&identity, &snapshot()).await.unwrap();

        let shrunk = ServerConfig::new(
            Some("Hi".to_string()),
            vec![ToolSpec::new("sum", "Add numbers", json!({"type": "object"}))],
        );
        store.approve_all(&identity, &shrunk).await.unwrap();

        let record = store.load(&identity).await.unwrap().unwrap();
        assert!(record.tool_hashes.contains_key("sum"));
        assert!(!record.tool_hashes.contains_key("echo"));
    }

    #[tokio::test]
    async fn persisted_layout_matches_the_documented_schema() {
        let (dir, store) = file_store();
        let identity = ServerIdentity::stdio("echo-server");
        store.approve_all(&identity, &snapshot()).await.unwrap();

        let raw = std::fs::read(dir.path().join("servers.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(doc["version"], 1);
        let record = &doc["records"][0];
        assert_eq!(record["identity"]["kind"], "stdio");
        assert_eq!(record["identity"]["locator"], "echo-server");
        assert!(record["instructions_hash"].is_string());
        assert!(record["tool_hashes"]["echo"].is_string());
        assert!(record["created_at"].is_string());
        assert!(record["last_updated_at"].is_string());
    }

    #[tokio::test]
    async fn corrupt_store_fails_closed_on_evaluate() {
        let (dir, store) = file_store();
        std::fs::write(dir.path().join("servers.json"), b"{ not json").unwrap();

        let snap = snapshot();
        let eval = store
            .evaluate_snapshot(&ServerIdentity::stdio("echo-server"), &snap)
            .await;
        assert_eq!(eval.overall_state, OverallState::BlockedAll);
    }

    #[tokio::test]
    async fn unsupported_version_fails_closed() {
        let (dir, store) = file_store();
        std::fs::write(
            dir.path().join("servers.json"),
            br#"{"version": 99, "records": []}"#,
        )
        .unwrap();

        assert!(store.load(&ServerIdentity::stdio("x")).await.is_err());
        let eval = store
            .evaluate_snapshot(&ServerIdentity::stdio("x"), &snapshot())
            .await;
        assert_eq!(eval.overall_state, OverallState::BlockedAll);
    }

    #[tokio::test]
    async fn memory_store_mirrors_file_store_semantics() {
        let store = MemoryApprovalStore::new();
        let identity = ServerIdentity::sse("http://localhost:9999/sse");
        let snap = snapshot();

        assert!(store.load(&identity).await.unwrap().is_none());
        store.approve_all(&identity, &snap).await.unwrap();
        let eval = store.evaluate_snapshot(&identity, &snap).await;
        assert_eq!(eval.overall_state, OverallState::FullyApproved);

        store.forget(&identity).await.unwrap();
        assert!(store.load(&identity).await.unwrap().is_none());
    }
}
