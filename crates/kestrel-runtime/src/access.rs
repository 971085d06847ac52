//! Owner and premium lookups backed by JSON files.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use kestrel_core::AccessOracle;
use kestrel_framework::Blocklist;
use serde::Deserialize;
use tracing::warn;

/// An owner record: either a bare number or `{ "number": ".." }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OwnerEntry {
    Number(String),
    Record { number: String },
}

impl OwnerEntry {
    fn number(&self) -> &str {
        match self {
            Self::Number(n) | Self::Record { number: n } => n,
        }
    }
}

/// A premium record; `expires_at` is unix milliseconds, absent for lifetime.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PremiumEntry {
    Number(String),
    Record {
        number: String,
        #[serde(default)]
        expires_at: Option<u64>,
    },
}

impl PremiumEntry {
    fn number(&self) -> &str {
        match self {
            Self::Number(n) | Self::Record { number: n, .. } => n,
        }
    }

    fn is_active(&self, now_ms: u64) -> bool {
        match self {
            Self::Number(_) => true,
            Self::Record { expires_at, .. } => expires_at.is_none_or(|at| at > now_ms),
        }
    }
}

/// Reads `owner.json` and `premium.json` on every query so external edits
/// take effect immediately. Missing or unreadable files count as empty.
#[derive(Debug, Clone)]
pub struct FileAccessOracle {
    owner_path: PathBuf,
    premium_path: PathBuf,
}

impl FileAccessOracle {
    pub fn new(owner_path: impl Into<PathBuf>, premium_path: impl Into<PathBuf>) -> Self {
        Self {
            owner_path: owner_path.into(),
            premium_path: premium_path.into(),
        }
    }

    pub fn owner_path(&self) -> &Path {
        &self.owner_path
    }

    pub fn premium_path(&self) -> &Path {
        &self.premium_path
    }
}

async fn read_entries<T: for<'de> Deserialize<'de>>(path: &Path) -> Vec<T> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read access file");
            return Vec::new();
        }
    };
    if text.trim().is_empty() {
        return Vec::new();
    }
    serde_json::from_str(&text).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Access file is not a valid list");
        Vec::new()
    })
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl AccessOracle for FileAccessOracle {
    async fn is_owner(&self, identity: &str) -> bool {
        let id = Blocklist::normalize(identity);
        if id.is_empty() {
            return false;
        }
        read_entries::<OwnerEntry>(&self.owner_path)
            .await
            .iter()
            .any(|e| Blocklist::normalize(e.number()) == id)
    }

    async fn is_premium(&self, identity: &str) -> bool {
        let id = Blocklist::normalize(identity);
        if id.is_empty() {
            return false;
        }
        let now = now_ms();
        read_entries::<PremiumEntry>(&self.premium_path)
            .await
            .iter()
            .any(|e| Blocklist::normalize(e.number()) == id && e.is_active(now))
    }
}
