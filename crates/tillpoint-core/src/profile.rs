// ── Persisted session profile ──
//
// The logged-in user's profile survives restarts so the session can be
// restored without asking for credentials. Only the profile is written,
// never passwords or cookies. The file holds `{"auth": {"user": ...}}`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tillpoint_api::rest::models::UserProfile;
use tracing::debug;

use crate::error::CoreError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    auth: AuthState,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthState {
    #[serde(default)]
    user: Option<UserProfile>,
}

/// JSON file holding the persisted `auth` state.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored profile. A missing file means nobody is logged in.
    pub fn load(&self) -> Result<Option<UserProfile>, CoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.storage_error(&e)),
        };
        let state: PersistedState =
            serde_json::from_str(&text).map_err(|e| self.storage_error(&e))?;
        Ok(state.auth.user)
    }

    pub fn save(&self, user: &UserProfile) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.storage_error(&e))?;
        }

        let state = PersistedState {
            auth: AuthState {
                user: Some(user.clone()),
            },
        };
        let text = serde_json::to_string_pretty(&state).map_err(|e| self.storage_error(&e))?;

        // Write-then-rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|e| self.storage_error(&e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.storage_error(&e))?;
        debug!(path = %self.path.display(), "profile saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), CoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "profile cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.storage_error(&e)),
        }
    }

    fn storage_error(&self, err: &dyn std::fmt::Display) -> CoreError {
        CoreError::Storage {
            path: self.path.display().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};

    use super::*;

    fn ada() -> UserProfile {
        UserProfile {
            id: None,
            username: "ada".into(),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            email: None,
            role: Some("cashier".into()),
            is_active: Some(true),
            is_enabled: Some(true),
            extra: Map::new(),
        }
    }

    #[test]
    fn missing_file_means_no_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("session.json"));
        assert_eq!(store.load().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("nested").join("session.json"));

        store.save(&ada()).unwrap();
        assert_eq!(store.load().unwrap(), Some(ada()));

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["auth"]["user"]["username"], json!("ada"));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{not json").unwrap();

        let err = ProfileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, CoreError::Storage { .. }));
    }
}
