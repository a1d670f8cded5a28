//! Credential Store
//!
//! Persists the opaque session material the transport hands us so a restart
//! or reconnect resumes the session instead of pairing again. Writes use the
//! same temp-file-then-rename discipline as the dedup ledger.

use crate::persistence::{atomic_write, read_optional, temp_path};
use crate::transport::Credential;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Result type for credential store operations
pub type CredentialResult<T> = Result<T, CredentialError>;

/// Credential store errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("IO error on credential store '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Load / save contract the lifecycle manager relies on
pub trait CredentialStore: Send + 'static {
    /// `None` when no session has been paired yet
    fn load(&self) -> CredentialResult<Option<Credential>>;

    /// Durably replace the stored credential
    fn save(&self, credential: &Credential) -> CredentialResult<()>;

    /// Forget the credential so the next connect pairs fresh
    fn clear(&self) -> CredentialResult<()>;
}

/// Credential store backed by a single file
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> CredentialError {
        CredentialError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> CredentialResult<Option<Credential>> {
        let bytes = read_optional(&self.path).map_err(|e| self.io_error(e))?;
        Ok(bytes.filter(|b| !b.is_empty()).map(Credential))
    }

    fn save(&self, credential: &Credential) -> CredentialResult<()> {
        atomic_write(&self.path, &credential.0).map_err(|e| self.io_error(e))
    }

    fn clear(&self) -> CredentialResult<()> {
        for path in [self.path.clone(), temp_path(&self.path)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(self.io_error(e)),
            }
        }
        Ok(())
    }
}
