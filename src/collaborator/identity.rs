use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::CollaboratorError;

use super::IdentityProvider;

/// Fixed user id, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user_id: Option<String>,
}

impl StaticIdentity {
    /// A blank id counts as no user.
    #[must_use]
    pub fn new(user_id: Option<String>) -> Self {
        Self {
            user_id: user_id.filter(|u| !u.trim().is_empty()),
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Result<Option<String>, CollaboratorError> {
        Ok(self.user_id.clone())
    }
}

/// Reads the active user from a file maintained by another process.
///
/// The file holds either the bare id or a `{"user_id": "..."}` object. A
/// missing or empty file means nobody is logged in.
#[derive(Debug, Clone)]
pub struct FileIdentity {
    path: PathBuf,
}

#[derive(Deserialize)]
struct UserDoc {
    user_id: Option<String>,
}

impl FileIdentity {
    /// Watch `path`; the file is re-read on every lookup.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl IdentityProvider for FileIdentity {
    fn current_user(&self) -> Result<Option<String>, CollaboratorError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CollaboratorError::Identity {
                    message: format!("cannot read {}: {e}", self.path.display()),
                })
            }
        };

        let trimmed = raw.trim();
        let user = if trimmed.starts_with('{') {
            serde_json::from_str::<UserDoc>(trimmed)
                .map_err(|e| CollaboratorError::Identity {
                    message: format!("malformed user document: {e}"),
                })?
                .user_id
        } else {
            Some(trimmed.to_string())
        };
        Ok(user.filter(|u| !u.is_empty()))
    }
}
