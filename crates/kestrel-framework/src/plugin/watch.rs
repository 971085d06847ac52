//! Filesystem observation of plugin directories.
//!
//! [`PluginWatcher`] forwards debounced paths over a channel; the consumer
//! passes each one to [`sync_path`], which decides between load, reload and
//! unload.

use std::path::Path;

use tracing::{debug, error, info};

use super::registry::{PluginChange, PluginRegistry};

/// Applies whatever change `path` represents to `registry`.
///
/// Returns the change that was applied, or `None` when the path is not a
/// plugin manifest or nothing needs doing.
pub async fn sync_path(registry: &PluginRegistry, path: &Path) -> Option<PluginChange> {
    let change = registry.classify_change(path, path.exists())?;
    debug!(path = %path.display(), change = ?change, "Plugin file changed");
    match registry.apply_change(change.clone()).await {
        Ok(()) => {
            info!(path = %path.display(), change = ?change, "Plugin change applied");
            Some(change)
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to apply plugin change");
            None
        }
    }
}

#[cfg(feature = "watch")]
pub use watcher::PluginWatcher;

#[cfg(feature = "watch")]
mod watcher {
    use std::path::PathBuf;
    use std::time::Duration;

    use notify::{RecommendedWatcher, RecursiveMode, Watcher};
    use notify_debouncer_mini::{DebounceEventResult, DebouncedEventKind, Debouncer, new_debouncer};
    use tokio::sync::mpsc;
    use tracing::{info, warn};

    /// Keeps the underlying watcher alive; dropping it stops observation.
    pub struct PluginWatcher {
        _debouncer: Debouncer<RecommendedWatcher>,
        watched: Vec<PathBuf>,
    }

    impl PluginWatcher {
        /// Watches every existing directory in `dirs` recursively.
        ///
        /// Changed paths are sent on the returned channel after `debounce`
        /// of quiet time.
        pub fn start(
            dirs: &[PathBuf],
            debounce: Duration,
        ) -> Result<(Self, mpsc::UnboundedReceiver<PathBuf>), notify::Error> {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut debouncer = new_debouncer(debounce, move |res: DebounceEventResult| match res {
                Ok(events) => {
                    for event in events {
                        if event.kind == DebouncedEventKind::Any && tx.send(event.path).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Plugin watcher error"),
            })?;

            let mut watched = Vec::new();
            for dir in dirs {
                if !dir.is_dir() {
                    warn!(dir = %dir.display(), "Plugin directory missing, not watched");
                    continue;
                }
                let dir = std::path::absolute(dir).unwrap_or_else(|_| dir.clone());
                debouncer.watcher().watch(&dir, RecursiveMode::Recursive)?;
                info!(dir = %dir.display(), "Watching plugin directory");
                watched.push(dir);
            }

            Ok((
                Self {
                    _debouncer: debouncer,
                    watched,
                },
                rx,
            ))
        }

        pub fn watched(&self) -> &[PathBuf] {
            &self.watched
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[tokio::test]
    async fn sync_path_follows_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PluginRegistry::builder().plugin_dir(dir.path()).build();
        let path = dir.path().join("hot.toml");

        fs::write(&path, "handler = \"reply\"\nreply = \"v1\"").unwrap();
        assert!(matches!(sync_path(&registry, &path).await, Some(PluginChange::Added(_))));
        assert!(registry.is_active("hot"));

        fs::write(&path, "handler = \"reply\"\nreply = \"v2\"").unwrap();
        assert_eq!(
            sync_path(&registry, &path).await,
            Some(PluginChange::Modified("hot".into()))
        );
        assert!(registry.is_active("hot"));

        fs::remove_file(&path).unwrap();
        assert_eq!(
            sync_path(&registry, &path).await,
            Some(PluginChange::Removed("hot".into()))
        );
        assert!(!registry.contains("hot"));

        assert_eq!(sync_path(&registry, &dir.path().join("readme.md")).await, None);
    }

    #[cfg(feature = "watch")]
    #[tokio::test]
    async fn watcher_skips_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        let (watcher, _rx) = PluginWatcher::start(
            &[dir.path().to_path_buf(), missing],
            std::time::Duration::from_millis(50),
        )
        .unwrap();
        assert_eq!(watcher.watched().len(), 1);
    }
}
