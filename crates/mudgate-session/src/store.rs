//! Account persistence.
//!
//! The gatekeeper needs three things from storage: does this name have an
//! account, create one, and load one. [`AccountStore`] is that contract.
//! Two implementations ship here:
//!
//! - [`MemoryAccountStore`]: a concurrent map, for tests and throwaway
//!   servers.
//! - [`DirectoryAccountStore`]: one `<username>.json` file per account.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::SessionError;

/// A stored player account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password_hash: String,
    /// Creation time, seconds since the Unix epoch.
    pub created_at: u64,
}

impl Account {
    /// A new account stamped with the current time.
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            created_at,
        }
    }
}

/// Account lookup and persistence.
#[async_trait]
pub trait AccountStore: Send + Sync + 'static {
    /// Whether an account exists for `username`.
    async fn username_exists(&self, username: &str) -> Result<bool, SessionError>;

    /// Stores a new account.
    ///
    /// # Errors
    /// [`SessionError::AccountExists`] if the name is taken.
    async fn create_account(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<Account, SessionError>;

    /// Loads the account for `username`, if any.
    async fn load_account(&self, username: &str) -> Result<Option<Account>, SessionError>;
}

// ---------------------------------------------------------------------------
// In memory
// ---------------------------------------------------------------------------

/// Accounts held in a concurrent map. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: DashMap<String, Account>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn username_exists(&self, username: &str) -> Result<bool, SessionError> {
        Ok(self.accounts.contains_key(username))
    }

    async fn create_account(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<Account, SessionError> {
        match self.accounts.entry(username.to_string()) {
            Entry::Occupied(_) => Err(SessionError::AccountExists(username.to_string())),
            Entry::Vacant(slot) => {
                let account = Account::new(username, password_hash);
                slot.insert(account.clone());
                tracing::info!(%username, "account created");
                Ok(account)
            }
        }
    }

    async fn load_account(&self, username: &str) -> Result<Option<Account>, SessionError> {
        Ok(self.accounts.get(username).map(|entry| entry.value().clone()))
    }
}

// ---------------------------------------------------------------------------
// On disk
// ---------------------------------------------------------------------------

/// Accounts stored as JSON files in one directory.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash never leaves a half-written record behind.
#[derive(Debug, Clone)]
pub struct DirectoryAccountStore {
    root: PathBuf,
}

impl DirectoryAccountStore {
    /// Opens (creating if needed) the store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tracing::info!(path = %root.display(), "account directory opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, username: &str) -> Result<PathBuf, SessionError> {
        // Only plain names make safe file names.
        if username.is_empty() || !username.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(SessionError::InvalidUsername(username.to_string()));
        }
        Ok(self.root.join(format!("{username}.json")))
    }
}

#[async_trait]
impl AccountStore for DirectoryAccountStore {
    async fn username_exists(&self, username: &str) -> Result<bool, SessionError> {
        let path = self.path_for(username)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn create_account(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<Account, SessionError> {
        let path = self.path_for(username)?;
        if tokio::fs::try_exists(&path).await? {
            return Err(SessionError::AccountExists(username.to_string()));
        }

        let account = Account::new(username, password_hash);
        let body = serde_json::to_vec_pretty(&account).map_err(SessionError::Encode)?;
        let tmp = self.root.join(format!(".{username}.json.tmp"));
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::info!(%username, path = %path.display(), "account created");
        Ok(account)
    }

    async fn load_account(&self, username: &str) -> Result<Option<Account>, SessionError> {
        let path = self.path_for(username)?;
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|source| SessionError::Corrupt {
                username: username.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_create_and_load() {
        let store = MemoryAccountStore::new();
        assert!(!store.username_exists("alice").await.unwrap());

        store.create_account("alice", "salt$hash").await.unwrap();
        assert!(store.username_exists("alice").await.unwrap());

        let account = store.load_account("alice").await.unwrap().unwrap();
        assert_eq!(account.username, "alice");
        assert_eq!(account.password_hash, "salt$hash");
    }

    #[tokio::test]
    async fn test_memory_duplicate_create_fails() {
        let store = MemoryAccountStore::new();
        store.create_account("alice", "a").await.unwrap();
        let err = store.create_account("alice", "b").await.unwrap_err();
        assert!(matches!(err, SessionError::AccountExists(name) if name == "alice"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_load_missing_is_none() {
        let store = MemoryAccountStore::new();
        assert!(store.load_account("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryAccountStore::open(dir.path().join("accounts"))
            .await
            .unwrap();

        store.create_account("bob", "salt$hash").await.unwrap();
        assert!(store.username_exists("bob").await.unwrap());
        assert!(store.root().join("bob.json").exists());

        // A second handle on the same directory sees the record.
        let reopened = DirectoryAccountStore::open(store.root()).await.unwrap();
        let account = reopened.load_account("bob").await.unwrap().unwrap();
        assert_eq!(account.password_hash, "salt$hash");
    }

    #[tokio::test]
    async fn test_directory_duplicate_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryAccountStore::open(dir.path()).await.unwrap();
        store.create_account("bob", "a").await.unwrap();
        assert!(matches!(
            store.create_account("bob", "b").await,
            Err(SessionError::AccountExists(_))
        ));
    }

    #[tokio::test]
    async fn test_directory_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryAccountStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.username_exists("../etc").await,
            Err(SessionError::InvalidUsername(_))
        ));
    }

    #[tokio::test]
    async fn test_directory_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryAccountStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("eve.json"), b"{not json").unwrap();
        assert!(matches!(
            store.load_account("eve").await,
            Err(SessionError::Corrupt { .. })
        ));
    }
}
