// Keyward — Credential file watcher
//
// Watches the directory holding the credential file rather than the file
// itself: editors and `envfile::update_value` replace the file by rename,
// which a watch on the old inode would miss.

use std::ffi::OsString;
use std::path::Path;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::WatchError;

/// Keeps the OS watch alive for as long as it is held.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Send `()` on `events` for every write, create, rename or removal of
    /// `path`. Events are dropped when the channel is full; the debounce
    /// downstream only needs to know that something happened.
    pub fn spawn(path: &Path, events: mpsc::Sender<()>) -> Result<Self, WatchError> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let file_name: OsString = path
            .file_name()
            .ok_or_else(|| WatchError::NoParent(path.display().to_string()))?
            .to_os_string();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_relevant(&event, &file_name) => {
                let _ = events.try_send(());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "File watch error"),
        })?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Watching credential file");
        Ok(Self { _watcher: watcher })
    }
}

fn is_relevant(event: &Event, file_name: &OsString) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|p| p.file_name().map(|n| n == file_name.as_os_str()).unwrap_or(false))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
