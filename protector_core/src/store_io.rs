//! Crash-safe file access shared by the approval and quarantine stores.
//!
//! Writes go to a temp file in the target directory, are fsynced, then
//! renamed over the destination, so a reader always sees either the previous
//! document or the new one. Writers serialize on an advisory `fs2` lock held
//! on a sidecar `.lock` file; readers take the shared lock. Lock acquisition
//! can block, so all file work runs on the blocking pool.

use crate::error::{ProtectorError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Lock file guarding a store file: `servers.json` -> `servers.json.lock`.
pub(crate) fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    PathBuf::from(lock_path)
}

fn open_lock_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path_for(path))
}

/// Reads the full store file under a shared lock. `Ok(None)` when the file
/// does not exist yet.
pub(crate) async fn read_file(path: PathBuf) -> Result<Option<Vec<u8>>> {
    tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>> {
        if !path.exists() {
            return Ok(None);
        }
        let lock_file = open_lock_file(&path)?;
        FileExt::lock_shared(&lock_file)?;
        let bytes = std::fs::read(&path)?;
        Ok(Some(bytes))
    })
    .await
    .map_err(|join| ProtectorError::Persist(format!("store read task failed: {}", join)))?
}

/// Atomically replaces the store file with `bytes` while holding the
/// exclusive advisory lock. The caller is expected to have produced `bytes`
/// from a read-modify step performed through [`update_file`]; this function
/// alone does not make read-modify-write atomic.
pub(crate) fn replace_locked(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|e| ProtectorError::Persist(e.to_string()))?;
    Ok(())
}

/// Runs a read-modify-write cycle on a store file under the exclusive lock.
///
/// `update` receives the current bytes (`None` when the file is missing) and
/// returns the replacement document plus a value handed back to the caller,
/// or an error to abandon the write and leave the file untouched.
pub(crate) async fn update_file<F, T>(path: PathBuf, update: F) -> Result<T>
where
    F: FnOnce(Option<Vec<u8>>) -> Result<(Vec<u8>, T)> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || -> Result<T> {
        let lock_file = open_lock_file(&path)?;
        FileExt::lock_exclusive(&lock_file)?;

        let current = if path.exists() {
            Some(std::fs::read(&path)?)
        } else {
            None
        };
        let (replacement, value) = update(current)?;
        replace_locked(&path, &replacement)?;
        Ok(value)
        // Lock released when `lock_file` drops.
    })
    .await
    .map_err(|join| ProtectorError::Persist(format!("store write task failed: {}", join)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("servers.json");
        assert!(read_file(path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_creates_and_replaces() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("servers.json");

        update_file(path.clone(), |current| {
            assert!(current.is_none());
            Ok((b"first".to_vec(), ()))
        })
        .await
        .unwrap();

        update_file(path.clone(), |current| {
            assert_eq!(current.as_deref(), Some(&b"first"[..]));
            Ok((b"second".to_vec(), ()))
        })
        .await
        .unwrap();

        assert_eq!(read_file(path).await.unwrap().unwrap(), b"second");
    }

    #[tokio::test]
    async fn failed_update_leaves_previous_content() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("servers.json");

        update_file(path.clone(), |_| Ok((b"stable".to_vec(), ())))
            .await
            .unwrap();

        let result = update_file(path.clone(), |_| -> Result<(Vec<u8>, ())> {
            Err(ProtectorError::Persist("simulated failure".to_string()))
        })
        .await;
        assert!(result.is_err());

        assert_eq!(read_file(path).await.unwrap().unwrap(), b"stable");
    }

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path_for(Path::new("/tmp/servers.json")),
            PathBuf::from("/tmp/servers.json.lock")
        );
    }
}
