//! API key storage
//!
//! The key lives in two places: a [`CredentialStore`] that persists it across
//! runs, and a shared [`Credential`] handle that HTTP collaborators read on
//! every request. Edits go to both at once.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Shared, cheaply cloneable handle to the current API key
#[derive(Clone, Default)]
pub struct Credential {
    inner: Arc<RwLock<Option<SecretString>>>,
}

impl Credential {
    /// Create a handle from an optional initial value
    ///
    /// Empty or whitespace-only values count as absent.
    #[must_use]
    pub fn new(value: Option<&str>) -> Self {
        let credential = Self::default();
        if let Some(value) = value {
            credential.set(value);
        }
        credential
    }

    /// Replace the current key
    pub fn set(&self, value: &str) {
        let value = value.trim();
        let next = if value.is_empty() {
            None
        } else {
            Some(SecretString::from(value.to_owned()))
        };
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Whether a non-empty key is available
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Authorization header value for the current key
    ///
    /// # Errors
    ///
    /// Returns error if no key is set
    pub fn bearer(&self) -> Result<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|key| format!("Bearer {}", key.expose_secret()))
            .ok_or_else(|| Error::Credential("no API key set".to_string()))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("present", &self.is_present())
            .finish()
    }
}

/// Persistence for the single API key string
pub trait CredentialStore: Send + Sync {
    /// Read the stored key, or `None` if nothing has been saved
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be read
    fn load(&self) -> Result<Option<String>>;

    /// Overwrite the stored key
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be written
    fn save(&self, value: &str) -> Result<()>;
}

/// Stores the key in a single file, readable only by the owner
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// File name used inside the data directory
    pub const FILE_NAME: &'static str = "credential";

    /// Store the key at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store the key at `<data_dir>/credential`
    #[must_use]
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(Self::FILE_NAME))
    }

    /// Location of the credential file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let value = content.trim();
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Credential(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn save(&self, value: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, value.trim())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %self.path.display(), "credential saved");
        Ok(())
    }
}

/// In-process store, used when nothing should touch disk
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    value: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    /// Create a store pre-populated with `value`
    #[must_use]
    pub fn with_value(value: &str) -> Self {
        Self {
            value: Mutex::new(Some(value.to_string())),
        }
    }

    /// The last saved value
    #[must_use]
    pub fn saved(&self) -> Option<String> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.saved().filter(|v| !v.trim().is_empty()))
    }

    fn save(&self, value: &str) -> Result<()> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.trim().to_string());
        Ok(())
    }
}
