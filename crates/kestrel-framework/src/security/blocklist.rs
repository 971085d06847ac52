//! Durable blocklist.
//!
//! Identities are normalised to their digits before every lookup, so
//! `"+62 812-3"` and `"628123@s.whatsapp.net"` address the same entry. The
//! set lives in memory and is mirrored to a JSON array on disk; every
//! mutation writes the file before returning.
//!
//! The file is read lazily on first access. A missing file starts an empty
//! list; an unreadable or corrupt one is logged and also treated as empty.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::BlocklistError;

/// Summary of the blocklist and its backing file.
#[derive(Debug, Clone, Serialize)]
pub struct BlocklistStats {
    pub total_blocked: usize,
    pub file_path: Option<PathBuf>,
    pub file_exists: bool,
    pub last_modified: Option<SystemTime>,
}

pub struct Blocklist {
    path: Option<PathBuf>,
    entries: Mutex<Option<HashSet<String>>>,
}

impl Blocklist {
    /// A blocklist persisted to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            entries: Mutex::new(None),
        }
    }

    /// A blocklist that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Some(HashSet::new())),
        }
    }

    /// Keeps only the digits of `id`.
    pub fn normalize(id: &str) -> String {
        id.chars().filter(char::is_ascii_digit).collect()
    }

    pub fn is_blocked(&self, id: &str) -> bool {
        let norm = Self::normalize(id);
        !norm.is_empty() && self.with_entries(|set| set.contains(&norm))
    }

    /// Blocks `id`. Returns `false` when the id normalises to nothing, is
    /// already blocked, or the file could not be written.
    pub fn add_block(&self, id: &str) -> bool {
        let norm = Self::normalize(id);
        if norm.is_empty() {
            return false;
        }
        self.mutate(|set| set.insert(norm.clone()))
            .inspect(|_| info!(identity = %norm, "Identity blocked"))
            .unwrap_or(false)
    }

    /// Unblocks `id`. Returns `false` when it was not blocked or the file
    /// could not be written.
    pub fn remove_block(&self, id: &str) -> bool {
        let norm = Self::normalize(id);
        self.mutate(|set| set.remove(&norm))
            .inspect(|_| info!(identity = %norm, "Identity unblocked"))
            .unwrap_or(false)
    }

    /// Unblocks everyone.
    pub fn clear(&self) -> bool {
        let mut count = 0;
        let cleared = self.mutate(|set| {
            count = set.len();
            set.clear();
            true
        });
        if cleared.is_some() {
            info!(count, "Blocklist cleared");
        }
        cleared.unwrap_or(false)
    }

    /// Discards the in-memory set and reads the file again.
    pub fn reload(&self) -> usize {
        let loaded = self.load();
        let count = loaded.len();
        *self.entries.lock() = Some(loaded);
        count
    }

    /// Blocked identities, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.with_entries(|set| set.iter().cloned().collect());
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.with_entries(|set| set.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BlocklistStats {
        let meta = self.path.as_deref().and_then(|p| fs::metadata(p).ok());
        BlocklistStats {
            total_blocked: self.len(),
            file_path: self.path.clone(),
            file_exists: meta.is_some(),
            last_modified: meta.and_then(|m| m.modified().ok()),
        }
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    fn with_entries<R>(&self, f: impl FnOnce(&HashSet<String>) -> R) -> R {
        let mut guard = self.entries.lock();
        let set = guard.get_or_insert_with(|| self.load());
        f(set)
    }

    /// Applies `change`; when it reports a modification, persists the set.
    ///
    /// `None` means nothing changed, `Some(ok)` carries whether the write
    /// succeeded. A failed write keeps the in-memory change.
    fn mutate(&self, change: impl FnOnce(&mut HashSet<String>) -> bool) -> Option<bool> {
        let mut guard = self.entries.lock();
        let set = guard.get_or_insert_with(|| self.load());
        if !change(set) {
            return None;
        }
        match self.persist(set) {
            Ok(()) => Some(true),
            Err(e) => {
                error!(error = %e, "Failed to persist blocklist");
                Some(false)
            }
        }
    }

    fn load(&self) -> HashSet<String> {
        let Some(path) = self.path.as_deref() else {
            return HashSet::new();
        };
        match read_file(path) {
            Ok(set) => {
                info!(path = %path.display(), count = set.len(), "Blocklist loaded");
                set
            }
            Err(e) => {
                warn!(error = %e, "Blocklist unreadable, starting empty");
                HashSet::new()
            }
        }
    }

    fn persist(&self, set: &HashSet<String>) -> Result<(), BlocklistError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let mut ids: Vec<&String> = set.iter().collect();
        ids.sort();
        let body = serde_json::to_string_pretty(&ids).map_err(|source| BlocklistError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        let io_err = |source| BlocklistError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, body).map_err(io_err)
    }
}

fn read_file(path: &Path) -> Result<HashSet<String>, BlocklistError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(source) => {
            return Err(BlocklistError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if text.trim().is_empty() {
        return Ok(HashSet::new());
    }
    let ids: Vec<String> =
        serde_json::from_str(&text).map_err(|source| BlocklistError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(ids.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_to_digits() {
        assert_eq!(Blocklist::normalize("+62 812-3@s.whatsapp.net"), "628123");
        assert_eq!(Blocklist::normalize("abc"), "");
    }

    #[test]
    fn add_and_remove_are_idempotent() {
        let list = Blocklist::in_memory();
        assert!(list.add_block("62812"));
        assert!(!list.add_block("+62 812"));
        assert!(list.is_blocked("62812@s.whatsapp.net"));

        assert!(list.remove_block("62812"));
        assert!(!list.remove_block("62812"));
        assert!(!list.is_blocked("62812"));
        assert!(!list.add_block("no digits"));
    }

    #[test]
    fn mutations_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("blocklist.json");

        let list = Blocklist::new(&path);
        assert!(list.add_block("111"));
        assert!(list.add_block("222"));
        assert!(list.remove_block("111"));

        let on_disk: Vec<String> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec!["222".to_string()]);

        let reopened = Blocklist::new(&path);
        assert!(reopened.is_blocked("222"));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn corrupt_file_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocklist.json");
        fs::write(&path, "{ not an array").unwrap();

        let list = Blocklist::new(&path);
        assert!(list.is_empty());
        assert!(list.add_block("333"));
        assert_eq!(list.reload(), 1);
    }

    #[test]
    fn clear_empties_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocklist.json");
        let list = Blocklist::new(&path);
        list.add_block("1");
        list.add_block("2");
        assert!(list.clear());
        assert!(list.list().is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "[]");
        assert!(list.stats().file_exists);
    }
}
