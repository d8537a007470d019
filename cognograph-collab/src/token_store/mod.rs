//! Encrypted-at-rest session token store.
//!
//! ```text
//! ┌─────────────┐  seal / open   ┌─────────────┐  records   ┌─────────────┐
//! │ TokenStore  │ ─────────────► │ TokenCipher │ ─────────► │ TokenVault  │
//! │ (per-ws gen)│                │ (AES-GCM)   │            │ (mem / file)│
//! └─────────────┘                └──────┬──────┘            └─────────────┘
//!                                       │ key
//!                                       ▼
//!                                ┌─────────────┐
//!                                │ KeySource   │
//!                                │ (keychain)  │
//!                                └─────────────┘
//! ```
//!
//! At most one token is held per workspace; `store` replaces. Reads fail
//! closed: an unreadable record is reported as "no token".
//!
//! Every `store`/`remove` bumps a per-workspace generation. Async callers read
//! the generation alongside the token and apply their result only if it is
//! unchanged, so a refresh that completes after a `remove` is discarded.

pub mod cipher;
pub mod vault;

use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

pub use cipher::{KeySource, KeyringKeySource, StaticKeySource, KEY_LEN};
pub use vault::{FileVault, MemoryVault, TokenVault};

use crate::config::ClientConfig;
use crate::session::SessionToken;
use cipher::TokenCipher;

/// Per-workspace write counter.
pub type Generation = u64;

/// Token store errors.
#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("key error: {0}")]
    Key(String),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid record: {0}")]
    Format(String),
    #[error("token has an empty workspace id")]
    EmptyWorkspaceId,
}

#[derive(Default)]
struct StoreState {
    generations: HashMap<String, Generation>,
    present: HashSet<String>,
}

impl StoreState {
    fn generation(&self, workspace_id: &str) -> Generation {
        self.generations.get(workspace_id).copied().unwrap_or(0)
    }

    fn bump(&mut self, workspace_id: &str) -> Generation {
        let generation = self.generations.entry(workspace_id.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }
}

/// One bearer token per workspace, sealed before it reaches the vault.
pub struct TokenStore {
    vault: Box<dyn TokenVault>,
    cipher: TokenCipher,
    state: Mutex<StoreState>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("workspaces", &self.workspace_ids())
            .finish()
    }
}

impl TokenStore {
    /// Build a store, loading the key from `keys`.
    ///
    /// If the key source fails (no keychain on this machine, locked keychain)
    /// an ephemeral key is used instead and previously sealed records become
    /// unreadable, which degrades to "must rejoin".
    pub fn new(vault: impl TokenVault + 'static, keys: &dyn KeySource) -> Self {
        let key = keys.load_or_create().unwrap_or_else(|e| {
            warn!("token key unavailable ({e}); using an ephemeral key, tokens will not survive restart");
            cipher::random_key()
        });
        Self::with_key(vault, key)
    }

    pub fn with_key(vault: impl TokenVault + 'static, key: [u8; KEY_LEN]) -> Self {
        let present = match vault.list() {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!("failed to list stored tokens: {e}");
                HashSet::new()
            }
        };
        Self {
            vault: Box::new(vault),
            cipher: TokenCipher::new(key),
            state: Mutex::new(StoreState {
                generations: HashMap::new(),
                present,
            }),
        }
    }

    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::with_key(MemoryVault::new(), cipher::random_key())
    }

    /// The store described by `config`: file-backed under `token_dir` with the
    /// key in the OS keychain, or [`in_memory`](Self::in_memory) when no
    /// directory is set.
    pub fn open(config: &ClientConfig) -> Result<Self, TokenStoreError> {
        match &config.token_dir {
            Some(dir) => {
                let vault = FileVault::open(dir)?;
                let keys =
                    KeyringKeySource::new(&config.keyring_service, dir.to_string_lossy());
                info!("token store at {}", dir.display());
                Ok(Self::new(vault, &keys))
            }
            None => Ok(Self::in_memory()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `token` under its workspace id, replacing any previous token.
    pub fn store(&self, token: &SessionToken) -> Result<Generation, TokenStoreError> {
        let mut state = self.lock();
        self.write_locked(&mut state, token)
    }

    /// Like [`store`](Self::store), but only if the workspace's generation is
    /// still `expected`. Returns `Ok(None)` when it moved on.
    pub fn store_if_generation(
        &self,
        token: &SessionToken,
        expected: Generation,
    ) -> Result<Option<Generation>, TokenStoreError> {
        let mut state = self.lock();
        if state.generation(&token.workspace_id) != expected {
            debug!("discarding stale token write for {}", token.workspace_id);
            return Ok(None);
        }
        self.write_locked(&mut state, token).map(Some)
    }

    fn write_locked(
        &self,
        state: &mut StoreState,
        token: &SessionToken,
    ) -> Result<Generation, TokenStoreError> {
        if token.workspace_id.is_empty() {
            return Err(TokenStoreError::EmptyWorkspaceId);
        }
        let record = self.cipher.seal(token)?;
        self.vault.write(&token.workspace_id, &record)?;
        state.present.insert(token.workspace_id.clone());
        let generation = state.bump(&token.workspace_id);
        info!(
            "stored {} token for workspace {}",
            token.permissions, token.workspace_id
        );
        Ok(generation)
    }

    /// The token for `workspace_id`, or `None` if absent or unreadable.
    pub fn get(&self, workspace_id: &str) -> Option<SessionToken> {
        self.get_with_generation(workspace_id).0
    }

    /// The token together with the generation it was read at.
    pub fn get_with_generation(&self, workspace_id: &str) -> (Option<SessionToken>, Generation) {
        let state = self.lock();
        (self.read_locked(workspace_id), state.generation(workspace_id))
    }

    fn read_locked(&self, workspace_id: &str) -> Option<SessionToken> {
        let record = match self.vault.read(workspace_id) {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                warn!("failed to read token for workspace {workspace_id}: {e}");
                return None;
            }
        };
        match self.cipher.open(&record) {
            Ok(token) if token.workspace_id == workspace_id => Some(token),
            Ok(_) => {
                warn!("token record for workspace {workspace_id} belongs to another workspace");
                None
            }
            Err(e) => {
                warn!("unreadable token for workspace {workspace_id}: {e}");
                None
            }
        }
    }

    /// Drop the token for `workspace_id`. Returns whether one was stored.
    pub fn remove(&self, workspace_id: &str) -> Result<bool, TokenStoreError> {
        let mut state = self.lock();
        self.remove_locked(&mut state, workspace_id)
    }

    /// Like [`remove`](Self::remove), but only if the generation is still
    /// `expected`. Returns false when it moved on or nothing was stored.
    pub fn remove_if_generation(
        &self,
        workspace_id: &str,
        expected: Generation,
    ) -> Result<bool, TokenStoreError> {
        let mut state = self.lock();
        if state.generation(workspace_id) != expected {
            debug!("keeping token for {workspace_id}: replaced since read");
            return Ok(false);
        }
        self.remove_locked(&mut state, workspace_id)
    }

    fn remove_locked(
        &self,
        state: &mut StoreState,
        workspace_id: &str,
    ) -> Result<bool, TokenStoreError> {
        let existed = self.vault.delete(workspace_id)?;
        state.present.remove(workspace_id);
        state.bump(workspace_id);
        if existed {
            info!("removed token for workspace {workspace_id}");
        }
        Ok(existed)
    }

    pub fn generation(&self, workspace_id: &str) -> Generation {
        self.lock().generation(workspace_id)
    }

    /// Workspaces with a stored token, sorted.
    pub fn workspace_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().present.iter().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Permission;

    fn token(workspace: &str, bearer: &str) -> SessionToken {
        SessionToken::new(workspace, bearer, Permission::Write, u64::MAX)
    }

    #[test]
    fn test_store_replaces_previous_token() {
        let store = TokenStore::in_memory();
        store.store(&token("w", "t1")).unwrap();
        store.store(&token("w", "t2")).unwrap();
        assert_eq!(store.get("w").unwrap().token, "t2");
        assert_eq!(store.workspace_ids(), vec!["w".to_string()]);
    }

    #[test]
    fn test_open_without_dir_is_in_memory() {
        let store = TokenStore::open(&ClientConfig::for_testing()).unwrap();
        assert!(store.workspace_ids().is_empty());
        store.store(&token("w", "t1")).unwrap();
        assert_eq!(store.get("w").unwrap().token, "t1");
    }

    #[test]
    fn test_remove() {
        let store = TokenStore::in_memory();
        store.store(&token("w", "t1")).unwrap();
        assert!(store.remove("w").unwrap());
        assert!(store.get("w").is_none());
        assert!(!store.remove("w").unwrap());
        assert!(store.workspace_ids().is_empty());
    }

    #[test]
    fn test_empty_workspace_id_rejected() {
        let store = TokenStore::in_memory();
        assert!(matches!(
            store.store(&token("", "t")),
            Err(TokenStoreError::EmptyWorkspaceId)
        ));
    }

    #[test]
    fn test_corrupt_record_fails_closed() {
        let vault = MemoryVault::new();
        let store = TokenStore::with_key(vault.clone(), [3u8; KEY_LEN]);
        store.store(&token("w", "t1")).unwrap();
        vault.write("w", b"CGTK0001garbage-garbage-garbage").unwrap();
        assert!(store.get("w").is_none());
    }

    #[test]
    fn test_record_moved_between_workspaces_rejected() {
        let vault = MemoryVault::new();
        let store = TokenStore::with_key(vault.clone(), [3u8; KEY_LEN]);
        store.store(&token("a", "secret-a")).unwrap();
        let record = vault.read("a").unwrap().unwrap();
        vault.write("b", &record).unwrap();
        assert!(store.get("b").is_none());
    }

    #[test]
    fn test_generation_guards() {
        let store = TokenStore::in_memory();
        store.store(&token("w", "t1")).unwrap();
        let (_, seen) = store.get_with_generation("w");

        store.remove("w").unwrap();
        assert_eq!(store.store_if_generation(&token("w", "late"), seen).unwrap(), None);
        assert!(store.get("w").is_none());

        let generation = store.store(&token("w", "t2")).unwrap();
        assert!(!store.remove_if_generation("w", seen).unwrap());
        assert!(store.get("w").is_some());
        assert!(store.remove_if_generation("w", generation).unwrap());
        assert!(store.get("w").is_none());
    }

    #[test]
    fn test_failing_key_source_falls_back() {
        struct Broken;
        impl KeySource for Broken {
            fn load_or_create(&self) -> Result<[u8; KEY_LEN], TokenStoreError> {
                Err(TokenStoreError::Key("no keychain".into()))
            }
        }
        let store = TokenStore::new(MemoryVault::new(), &Broken);
        store.store(&token("w", "t1")).unwrap();
        assert_eq!(store.get("w").unwrap().token, "t1");
    }
}
