use std::path::{Path, PathBuf};

use keyring::Entry;
use serde::{Deserialize, Serialize};

const SERVICE: &str = "studylink_app";
const USER: &str = "studylink_session";

/// Identity of the authenticated session: keys every cache query and
/// distinguishes own messages from peer messages. Token issuance is the
/// auth server's business; we only carry the result around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: String,
    pub token: String,
}

impl SessionIdentity {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

/// Persist the session across runs. The identity is stored as one JSON blob
/// in the OS keyring; when the keyring is unavailable and `KEYRING_FALLBACK`
/// is set to `true`, a plain file stands in.
pub fn save_session(session: &SessionIdentity) -> anyhow::Result<()> {
    store(&Entry::new(SERVICE, USER), &fallback_path(), session)
}

pub fn load_session() -> Option<SessionIdentity> {
    read(&Entry::new(SERVICE, USER), &fallback_path())
}

pub fn clear_session() -> anyhow::Result<()> {
    remove(&Entry::new(SERVICE, USER), &fallback_path())
}

fn fallback_path() -> PathBuf {
    Path::new("data").join("session.json")
}

fn fallback_enabled() -> bool {
    std::env::var("KEYRING_FALLBACK").unwrap_or_default() == "true"
}

fn store(entry: &Entry, fallback: &Path, session: &SessionIdentity) -> anyhow::Result<()> {
    let json = serde_json::to_string(session)?;
    if entry.set_password(&json).is_ok() {
        return Ok(());
    }
    if !fallback_enabled() {
        // never write the token to disk unless explicitly allowed
        anyhow::bail!("keyring unavailable and file fallback disabled");
    }
    if let Some(parent) = fallback.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(fallback, json)?;
    log::warn!("[SESSION] keyring unavailable, session persisted to fallback file");
    Ok(())
}

fn read(entry: &Entry, fallback: &Path) -> Option<SessionIdentity> {
    if let Ok(json) = entry.get_password() {
        if let Ok(session) = serde_json::from_str(&json) {
            return Some(session);
        }
    }
    if fallback_enabled() {
        if let Ok(json) = std::fs::read_to_string(fallback) {
            // a corrupt file reads as "no session", same as a missing one
            return serde_json::from_str(&json).ok();
        }
    }
    None
}

fn remove(entry: &Entry, fallback: &Path) -> anyhow::Result<()> {
    let _ = entry.delete_password();
    if fallback.exists() {
        std::fs::remove_file(fallback)?;
    }
    Ok(())
}
