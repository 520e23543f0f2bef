use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

const KEYRING_SERVICE: &str = "lumosnap-sync";
const KEYRING_USER: &str = "session";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthState {
    pub token: String,
    pub user: AuthUser,
}

fn keyring_entry() -> Option<keyring::Entry> {
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER).ok()
}

/// Loss of this file (or no OS credential store entry) means the user is unauthenticated, not
/// an error — callers see `None` and the Remote API Adapter surfaces `Unauthenticated` from
/// there. Corruption is treated the same way, after deleting the bad data so the
/// next launch doesn't keep failing the same way.
pub fn load(fallback_path: &Path) -> Option<AuthState> {
    if let Some(entry) = keyring_entry() {
        if let Ok(json) = entry.get_password() {
            match serde_json::from_str(&json) {
                Ok(state) => return Some(state),
                Err(err) => {
                    tracing::warn!(?err, "auth entry in OS credential store was corrupt, clearing");
                    let _ = entry.delete_credential();
                }
            }
        }
    }

    let contents = fs::read_to_string(fallback_path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(state) => Some(state),
        Err(err) => {
            tracing::warn!(?err, path = %fallback_path.display(), "auth fallback file was corrupt, clearing");
            let _ = fs::remove_file(fallback_path);
            None
        }
    }
}

/// Prefer the OS-level encrypted store; fall back to a plain UTF-8 JSON file when it's
/// unavailable (headless Linux without a secret service, CI, etc.).
pub fn save(fallback_path: &Path, state: &AuthState) -> Result<()> {
    let json = serde_json::to_string(state)?;
    if let Some(entry) = keyring_entry() {
        if entry.set_password(&json).is_ok() {
            let _ = fs::remove_file(fallback_path);
            return Ok(());
        }
        tracing::warn!("OS credential store unavailable, falling back to plaintext auth file");
    }
    fs::write(fallback_path, json)?;
    Ok(())
}

pub fn clear(fallback_path: &Path) {
    if let Some(entry) = keyring_entry() {
        let _ = entry.delete_credential();
    }
    let _ = fs::remove_file(fallback_path);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> AuthState {
        AuthState {
            token: "tok_abc".into(),
            user: AuthUser {
                id: "u1".into(),
                email: "a@example.com".into(),
                name: "A".into(),
                image: None,
            },
        }
    }

    #[test]
    fn test_fallback_save_and_load_roundtrip_when_keyring_unavailable() {
        // In a sandboxed test environment there is usually no OS credential store reachable,
        // so `save` falls through to the plaintext file and `load` reads it back.
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("auth.json");
        save(&path, &sample_state()).unwrap();
        let loaded = load(&path);
        assert!(loaded.is_some());
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("missing.json");
        assert!(load(&path).is_none());
    }

    #[test]
    fn test_load_corrupt_fallback_file_clears_it() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("auth.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(load(&path).is_none());
        assert!(!path.exists());
    }
}
