//! Credential store for the current session record
//!
//! Holds at most one `SessionRecord`. Every mutation swaps the whole record
//! under a tokio Mutex, so a reader sees either the old record or the new one,
//! never a mix. When file-backed, the record is mirrored to a JSON file using
//! atomic temp-file + rename, and clearing the session deletes the file.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::record::SessionRecord;

/// Single-record credential store.
pub struct CredentialStore {
    path: Option<PathBuf>,
    state: Mutex<Option<SessionRecord>>,
}

impl CredentialStore {
    /// Store that only lives in memory (lost on restart).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(None),
        }
    }

    /// Load the session record from the given file path.
    ///
    /// A missing file is a cold start with no session. An expired record is
    /// loaded as-is; the session manager decides what to do with it.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            let record: Option<SessionRecord> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing session file: {e}")))?;
            info!(
                path = %path.display(),
                has_session = record.is_some(),
                "loaded session file"
            );
            record
        } else {
            info!(path = %path.display(), "session file not found, starting without a session");
            None
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// Clone of the current record, if any.
    pub async fn get(&self) -> Option<SessionRecord> {
        self.state.lock().await.clone()
    }

    /// Replace the current record wholesale and persist it.
    ///
    /// The in-memory record is swapped even if persisting fails; the error is
    /// returned so the caller can log it.
    pub async fn replace(&self, record: SessionRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = Some(record);
        debug!("replaced session record");
        match (&self.path, state.as_ref()) {
            (Some(path), Some(record)) => write_atomic(path, record).await,
            _ => Ok(()),
        }
    }

    /// Remove the current record. Returns what was removed.
    pub async fn clear(&self) -> Result<Option<SessionRecord>> {
        let mut state = self.state.lock().await;
        let removed = state.take();
        if removed.is_some() {
            debug!("cleared session record");
        }
        if let Some(path) = &self.path {
            remove_file(path).await?;
        }
        Ok(removed)
    }

    /// Remove the current record only if it still equals `expected`
    /// (`None` matches an empty store). Returns whether anything changed.
    pub async fn clear_if(&self, expected: Option<&SessionRecord>) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.as_ref() != expected {
            debug!("session record changed since it was read, keeping it");
            return Ok(false);
        }
        let removed = state.take().is_some();
        if let Some(path) = &self.path {
            remove_file(path).await?;
        }
        Ok(removed)
    }

    /// Whether a record is held (expired or not).
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.is_none()
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }
}

/// Write the session record to a file atomically, 0600 on unix.
async fn write_atomic(path: &Path, record: &SessionRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| Error::CredentialParse(format!("serializing session: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("session path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session");
    Ok(())
}

async fn remove_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "removed session file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(format!("removing session file: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_record(suffix: &str) -> SessionRecord {
        SessionRecord::new(format!("at_{suffix}"), 4_102_444_800_000)
            .with_refresh_token(format!("rt_{suffix}"))
    }

    #[tokio::test]
    async fn in_memory_replace_and_clear() {
        let store = CredentialStore::in_memory();
        assert!(store.is_empty().await);
        assert!(!store.is_persistent());

        store.replace(test_record("1")).await.unwrap();
        assert_eq!(store.get().await.unwrap().access_token.expose(), "at_1");

        store.replace(test_record("2")).await.unwrap();
        assert_eq!(store.get().await.unwrap().access_token.expose(), "at_2");

        let removed = store.clear().await.unwrap();
        assert_eq!(removed.unwrap().access_token.expose(), "at_2");
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.replace(test_record("1")).await.unwrap();

        let reloaded = CredentialStore::load(path).await.unwrap();
        let record = reloaded.get().await.unwrap();
        assert_eq!(record.access_token.expose(), "at_1");
        assert_eq!(record.refresh_token.unwrap().expose(), "rt_1");
    }

    #[tokio::test]
    async fn cold_start_has_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        assert!(store.is_empty().await);
        assert!(!path.exists(), "loading must not create a file for an absent session");
    }

    #[tokio::test]
    async fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.replace(test_record("1")).await.unwrap();
        assert!(path.exists());

        store.clear().await.unwrap();
        assert!(!path.exists());

        // Clearing twice is fine
        assert!(store.clear().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_if_keeps_a_newer_record() {
        let store = CredentialStore::in_memory();
        let old = test_record("old");
        store.replace(old.clone()).await.unwrap();
        store.replace(test_record("new")).await.unwrap();

        assert!(!store.clear_if(Some(&old)).await.unwrap());
        assert_eq!(store.get().await.unwrap().access_token.expose(), "at_new");

        let current = store.get().await;
        assert!(store.clear_if(current.as_ref()).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let result = CredentialStore::load(path).await;
        assert!(matches!(result, Err(Error::CredentialParse(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.replace(test_record("1")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "session file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_replacements_leave_one_whole_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = Arc::new(CredentialStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.replace(test_record(&i.to_string())).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Whatever record won, its access and refresh tokens belong together
        let record = store.get().await.unwrap();
        let suffix = record.access_token.expose().trim_start_matches("at_").to_string();
        assert_eq!(
            record.refresh_token.unwrap().expose(),
            &format!("rt_{suffix}")
        );

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let on_disk: SessionRecord = serde_json::from_str(&contents).unwrap();
        assert_eq!(on_disk.access_token.expose(), &format!("at_{suffix}"));
    }
}
