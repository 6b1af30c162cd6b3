//! Quarantine storage for flagged tool responses.
//!
//! When a guardrail provider flags a tool response, the original payload is
//! held here instead of being returned to the host. Entries carry an
//! unguessable random identifier; the host only ever learns the identifier
//! and the verdict reason. The payload comes back exclusively through the
//! `quarantine_release` built-in after a human flips `released` in an
//! out-of-band review.
//!
//! `quarantine.json` uses the same version-1, atomic-rename, advisory-lock
//! discipline as the approval store. The file is append-dominant; released
//! entries stay around until an explicit purge.

use crate::error::{ProtectorError, Result};
use crate::identity::ServerIdentity;
use crate::store_io;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;
use uuid::Uuid;

const STORE_VERSION: u32 = 1;

/// One quarantined tool response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    /// Unguessable random token identifying the entry.
    pub id: String,
    pub server_identity: ServerIdentity,
    pub tool_name: String,
    /// Arguments of the tool call that produced the response.
    pub request_args: serde_json::Value,
    /// The original, unreturned response payload.
    pub response: serde_json::Value,
    /// Structured verdict from the guardrail provider.
    pub guardrail_verdict: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub released: bool,
}

impl QuarantineEntry {
    /// Builds a fresh, unreleased entry with a random identifier.
    pub fn new(
        server_identity: ServerIdentity,
        tool_name: impl Into<String>,
        request_args: serde_json::Value,
        response: serde_json::Value,
        guardrail_verdict: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            server_identity,
            tool_name: tool_name.into(),
            request_args,
            response,
            guardrail_verdict,
            created_at: Utc::now(),
            released: false,
        }
    }
}

/// Storage operations for quarantined responses.
#[async_trait]
pub trait QuarantineStore: Send + Sync {
    /// Appends a new entry.
    async fn append(&self, entry: QuarantineEntry) -> Result<()>;

    /// Fetches an entry by identifier.
    async fn get(&self, id: &str) -> Result<Option<QuarantineEntry>>;

    /// Marks an entry released. Idempotent: releasing an already-released
    /// entry succeeds without change.
    async fn release(&self, id: &str) -> Result<()>;

    /// Lists entries, optionally only those still awaiting review.
    async fn list(&self, unreleased_only: bool) -> Result<Vec<QuarantineEntry>>;

    /// Drops released entries, returning how many were removed.
    async fn purge_released(&self) -> Result<usize>;
}

// ---------------------------------------------------------------------------
// On-disk implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct QuarantineFile {
    version: u32,
    entries: Vec<QuarantineEntry>,
}

impl QuarantineFile {
    fn empty() -> Self {
        Self {
            version: STORE_VERSION,
            entries: Vec::new(),
        }
    }

    fn parse(bytes: Option<Vec<u8>>) -> Result<Self> {
        let Some(bytes) = bytes else {
            return Ok(Self::empty());
        };
        let file: QuarantineFile = serde_json::from_slice(&bytes)?;
        if file.version != STORE_VERSION {
            return Err(ProtectorError::Persist(format!(
                "unsupported quarantine.json version {}",
                file.version
            )));
        }
        Ok(file)
    }
}

/// `quarantine.json`-backed store.
pub struct FileQuarantineStore {
    path: PathBuf,
}

impl FileQuarantineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: `~/.mcp-context-protector/quarantine.json`.
    pub fn default_path() -> PathBuf {
        crate::approval::default_data_dir().join("quarantine.json")
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn read_all(&self) -> Result<QuarantineFile> {
        QuarantineFile::parse(store_io::read_file(self.path.clone()).await?)
    }

    async fn mutate<F, T>(&self, apply: F) -> Result<T>
    where
        F: FnOnce(&mut QuarantineFile) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        store_io::update_file(self.path.clone(), move |bytes| {
            let mut file = QuarantineFile::parse(bytes)?;
            let value = apply(&mut file)?;
            Ok((serde_json::to_vec_pretty(&file)?, value))
        })
        .await
    }
}

#[async_trait]
impl QuarantineStore for FileQuarantineStore {
    async fn append(&self, entry: QuarantineEntry) -> Result<()> {
        self.mutate(move |file| {
            file.entries.push(entry);
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<QuarantineEntry>> {
        let file = self.read_all().await?;
        Ok(file.entries.into_iter().find(|entry| entry.id == id))
    }

    async fn release(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.mutate(move |file| {
            let entry = file
                .entries
                .iter_mut()
                .find(|entry| entry.id == id)
                .ok_or(ProtectorError::QuarantineNotFound(id))?;
            entry.released = true;
            Ok(())
        })
        .await
    }

    async fn list(&self, unreleased_only: bool) -> Result<Vec<QuarantineEntry>> {
        let file = self.read_all().await?;
        Ok(file
            .entries
            .into_iter()
            .filter(|entry| !unreleased_only || !entry.released)
            .collect())
    }

    async fn purge_released(&self) -> Result<usize> {
        self.mutate(|file| {
            let before = file.entries.len();
            file.entries.retain(|entry| !entry.released);
            Ok(before - file.entries.len())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Quarantine store held entirely in memory.
#[derive(Default)]
pub struct MemoryQuarantineStore {
    entries: RwLock<Vec<QuarantineEntry>>,
}

impl MemoryQuarantineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuarantineStore for MemoryQuarantineStore {
    async fn append(&self, entry: QuarantineEntry) -> Result<()> {
        self.entries.write().expect("store lock").push(entry);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<QuarantineEntry>> {
        Ok(self
            .entries
            .read()
            .expect("store lock")
            .iter()
            .find(|entry| entry.id == id)
            .cloned())
    }

    async fn release(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.write().expect("store lock");
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| ProtectorError::QuarantineNotFound(id.to_string()))?;
        entry.released = true;
        Ok(())
    }

    async fn list(&self, unreleased_only: bool) -> Result<Vec<QuarantineEntry>> {
        Ok(self
            .entries
            .read()
            .expect("store lock")
            .iter()
            .filter(|entry| !unreleased_only || !entry.released)
            .cloned()
            .collect())
    }

    async fn purge_released(&self) -> Result<usize> {
        let mut entries = self.entries.write().expect("store lock");
        let before = entries.len();
        entries.retain(|entry| !entry.released);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry() -> QuarantineEntry {
        QuarantineEntry::new(
            ServerIdentity::stdio("echo-server"),
            "echo",
            json!({"x": 1}),
            json!({"text": "SECRET payload"}),
            json!({"reason": "matched pattern"}),
        )
    }

    fn file_store() -> (tempfile::TempDir, FileQuarantineStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileQuarantineStore::new(dir.path().join("quarantine.json"));
        (dir, store)
    }

    #[test]
    fn identifiers_are_unique() {
        assert_ne!(entry().id, entry().id);
    }

    #[tokio::test]
    async fn append_get_release_round_trip() {
        let (_dir, store) = file_store();
        let original = entry();
        let id = original.id.clone();

        store.append(original.clone()).await.unwrap();

        let fetched = store.get(&id).await.unwrap().unwrap();
        assert!(!fetched.released);
        assert_eq!(fetched.response, original.response);

        store.release(&id).await.unwrap();
        let released = store.get(&id).await.unwrap().unwrap();
        assert!(released.released);

        // Release is idempotent.
        store.release(&id).await.unwrap();
        assert!(store.get(&id).await.unwrap().unwrap().released);
    }

    #[tokio::test]
    async fn release_of_unknown_id_is_an_error() {
        let (_dir, store) = file_store();
        let result = store.release("no-such-id").await;
        assert!(matches!(result, Err(ProtectorError::QuarantineNotFound(_))));
    }

    #[tokio::test]
    async fn list_filters_unreleased() {
        let (_dir, store) = file_store();
        let first = entry();
        let second = entry();
        let released_id = first.id.clone();

        store.append(first).await.unwrap();
        store.append(second).await.unwrap();
        store.release(&released_id).await.unwrap();

        assert_eq!(store.list(false).await.unwrap().len(), 2);
        let pending = store.list(true).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_ne!(pending[0].id, released_id);
    }

    #[tokio::test]
    async fn released_entries_survive_until_purged() {
        let (_dir, store) = file_store();
        let item = entry();
        let id = item.id.clone();

        store.append(item).await.unwrap();
        store.release(&id).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_some());

        assert_eq!(store.purge_released().await.unwrap(), 1);
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_mirrors_file_store_semantics() {
        let store = MemoryQuarantineStore::new();
        let item = entry();
        let id = item.id.clone();

        store.append(item).await.unwrap();
        store.release(&id).await.unwrap();
        assert!(store.get(&id).await.unwrap().unwrap().released);
        assert_eq!(store.purge_released().await.unwrap(), 1);
        assert!(store.list(false).await.unwrap().is_empty());
    }
}
