//! Credential persistence: the access/refresh pair every request reads

use crate::error::Result;
use crate::types::AuthTokens;
use papaya::HashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Keys of the credential contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialKey {
    Access,
    Refresh,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 2] = [CredentialKey::Access, CredentialKey::Refresh];

    /// Name under which the value is persisted
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKey::Access => "access_token",
            CredentialKey::Refresh => "refresh_token",
        }
    }
}

/// Key-value store holding the credential pair
///
/// Injected into the gateway so it can be swapped for tests or for a
/// platform keychain.
pub trait CredentialStore: Send + Sync + 'static {
    fn get(&self, key: CredentialKey) -> Option<String>;

    fn set(&self, key: CredentialKey, value: &str) -> Result<()>;

    fn remove(&self, key: CredentialKey) -> Result<()>;

    fn access_token(&self) -> Option<String> {
        self.get(CredentialKey::Access)
    }

    fn refresh_token(&self) -> Option<String> {
        self.get(CredentialKey::Refresh)
    }

    /// Persist a freshly issued pair. A missing refresh token leaves the stored one untouched.
    fn store_tokens(&self, tokens: &AuthTokens) -> Result<()> {
        self.set(CredentialKey::Access, &tokens.access_token)?;
        if let Some(refresh) = &tokens.refresh_token {
            self.set(CredentialKey::Refresh, refresh)?;
        }
        Ok(())
    }

    /// Remove both tokens
    fn clear(&self) -> Result<()> {
        for key in CredentialKey::ALL {
            self.remove(key)?;
        }
        Ok(())
    }
}

impl<S: CredentialStore> CredentialStore for Arc<S> {
    fn get(&self, key: CredentialKey) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: CredentialKey) -> Result<()> {
        (**self).remove(key)
    }

    fn store_tokens(&self, tokens: &AuthTokens) -> Result<()> {
        (**self).store_tokens(tokens)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}

/// Thread-safe in-memory store using Papaya HashMap
#[derive(Clone)]
pub struct TokenStore {
    tokens: Arc<HashMap<CredentialKey, String>>,
}

impl TokenStore {
    /// Create a new empty token store
    pub fn new() -> Self {
        Self {
            tokens: Arc::new(HashMap::new()),
        }
    }

    /// Create a store already holding a credential pair
    pub fn with_tokens(tokens: &AuthTokens) -> Self {
        let store = Self::new();
        let pinned = store.tokens.pin();
        pinned.insert(CredentialKey::Access, tokens.access_token.clone());
        if let Some(refresh) = &tokens.refresh_token {
            pinned.insert(CredentialKey::Refresh, refresh.clone());
        }
        drop(pinned);
        store
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for TokenStore {
    fn get(&self, key: CredentialKey) -> Option<String> {
        self.tokens.pin().get(&key).cloned()
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<()> {
        self.tokens.pin().insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: CredentialKey) -> Result<()> {
        self.tokens.pin().remove(&key);
        Ok(())
    }
}

/// JSON-file backed store, rewritten on every change
///
/// Survives process restarts the way browser local storage survives reloads.
pub struct FileTokenStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileTokenStore {
    /// Open the store at `path`; a missing file is an empty store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), entries = entries.len(), "Opened credential file");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy, persist it, and only then make it visible
    fn update(&self, change: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = entries.clone();
        if !change(&mut next) {
            return Ok(());
        }

        // Write-then-rename so a crash never leaves a truncated file behind
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&next)?)?;
        std::fs::rename(&tmp, &self.path)?;

        *entries = next;
        Ok(())
    }
}

impl CredentialStore for FileTokenStore {
    fn get(&self, key: CredentialKey) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key.as_str())
            .cloned()
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.as_str().to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: CredentialKey) -> Result<()> {
        self.update(|entries| entries.remove(key.as_str()).is_some())
    }

    /// Both tokens land in one write, or neither does
    fn store_tokens(&self, tokens: &AuthTokens) -> Result<()> {
        self.update(|entries| {
            entries.insert(CredentialKey::Access.as_str().to_string(), tokens.access_token.clone());
            if let Some(refresh) = &tokens.refresh_token {
                entries.insert(CredentialKey::Refresh.as_str().to_string(), refresh.clone());
            }
            true
        })
    }

    fn clear(&self) -> Result<()> {
        self.update(|entries| {
            let before = entries.len();
            for key in CredentialKey::ALL {
                entries.remove(key.as_str());
            }
            entries.len() != before
        })
    }
}
