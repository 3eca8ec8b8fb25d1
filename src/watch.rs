//! Source watcher and rebuild control loop
//!
//! Polls a function's handler source tree for content changes, coalesces
//! bursts of writes with a short stability window, and runs one rebuild
//! cycle per coalesced change: mark the function cold, drain its pool,
//! rebuild. The watcher is a single task per function, so at most one
//! cycle is ever in flight; changes landing mid-cycle are absorbed by
//! re-snapshotting after the build instead of queuing another cycle.
//!
//! A failed proactive build is logged and otherwise silent: the function
//! stays cold and the next dispatch retries and surfaces the failure.

use crate::dispatch::FunctionDescriptor;
use crate::pool::RuntimeState;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Tuning knobs for the watch loop. The defaults tolerate editor write
/// patterns (rename-and-replace, double writes) without double-building.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// How often the source tree is re-scanned.
    pub poll_interval: Duration,
    /// How long the tree must stay unchanged after a detected write
    /// before a rebuild cycle starts.
    pub stability_window: Duration,
    /// File extensions that count as handler source.
    pub extensions: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            stability_window: Duration::from_millis(20),
            extensions: vec!["go".to_string()],
        }
    }
}

/// Content snapshot of the watched tree: one hash per relevant file.
type TreeSnapshot = BTreeMap<PathBuf, u64>;

/// Watches one function's source tree and keeps its artifact in sync.
pub struct SourceWatcher {
    function: FunctionDescriptor,
    code_dir: PathBuf,
    state: Arc<RuntimeState>,
    config: WatchConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl SourceWatcher {
    pub fn new(
        function: FunctionDescriptor,
        code_dir: PathBuf,
        state: Arc<RuntimeState>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            function,
            code_dir,
            state,
            config: WatchConfig::default(),
            shutdown_rx,
        }
    }

    pub fn with_config(mut self, config: WatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs the watch loop until shutdown is signalled.
    pub async fn run(mut self) {
        info!(
            function = %self.function.id,
            dir = %self.code_dir.display(),
            "watching handler source"
        );
        let mut snapshot = self.scan().unwrap_or_default();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    let current = match self.scan() {
                        Ok(current) => current,
                        Err(e) => {
                            // Watch errors never stop the loop.
                            warn!(function = %self.function.id, error = %e, "source scan failed");
                            continue;
                        }
                    };
                    if current != snapshot {
                        snapshot = self.settle(current).await;
                        self.rebuild_cycle().await;
                        // Absorb writes that landed during the cycle.
                        if let Ok(after) = self.scan() {
                            snapshot = after;
                        }
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!(function = %self.function.id, "source watcher shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Waits until the tree stops changing for one stability window, so
    /// a burst of editor writes coalesces into a single rebuild.
    async fn settle(&self, mut current: TreeSnapshot) -> TreeSnapshot {
        loop {
            tokio::time::sleep(self.config.stability_window).await;
            match self.scan() {
                Ok(next) if next == current => return current,
                Ok(next) => current = next,
                Err(e) => {
                    warn!(function = %self.function.id, error = %e, "source scan failed");
                    return current;
                }
            }
        }
    }

    /// One proactive rebuild: cold, drain, build.
    async fn rebuild_cycle(&self) {
        info!(function = %self.function.id, "source changed, rebuilding");
        self.state.mark_cold(&self.function.id);
        self.state.drain(&self.function.id);
        match self.function.toolchain.build().await {
            Ok(()) => self.state.mark_warm(&self.function.id),
            Err(e) => {
                // Surfaced on the next dispatch, which retries the build.
                warn!(function = %self.function.id, error = %e, "proactive rebuild failed");
            }
        }
    }

    fn scan(&self) -> std::io::Result<TreeSnapshot> {
        let mut snapshot = TreeSnapshot::new();
        scan_dir(&self.code_dir, &self.config.extensions, &mut snapshot)?;
        debug!(
            function = %self.function.id,
            files = snapshot.len(),
            "scanned source tree"
        );
        Ok(snapshot)
    }
}

fn scan_dir(
    dir: &Path,
    extensions: &[String],
    snapshot: &mut TreeSnapshot,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            // Skip hidden directories and artifact output.
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            scan_dir(&path, extensions, snapshot)?;
        } else if file_type.is_file() && has_relevant_extension(&path, extensions) {
            // A file deleted between read_dir and read is just absent
            // from this snapshot.
            if let Ok(contents) = std::fs::read(&path) {
                snapshot.insert(path, content_hash(&contents));
            }
        }
    }
    Ok(())
}

fn has_relevant_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want == ext))
}

fn content_hash(contents: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    contents.hash(&mut hasher);
    hasher.finish()
}
