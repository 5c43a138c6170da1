//! Watches a schema document on disk so a guest can re-declare its tunable
//! surface while running.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, trace, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use super::schema::GameSchema;

pub struct SchemaWatcher {
    path: PathBuf,
    changed: Arc<AtomicBool>,
    _watcher: RecommendedWatcher,
}

impl SchemaWatcher {
    /// Editors that save by writing a temp file and renaming it over the
    /// document replace the watched inode, so the parent directory is
    /// watched and events are filtered by path.
    pub fn start(path: PathBuf) -> Result<Self, notify::Error> {
        let changed = Arc::new(AtomicBool::new(false));
        let changed_flag = changed.clone();
        let last_loaded_hash = Mutex::new(file_content_hash(&path).ok());
        let schema_path = path.clone();
        let watch_dir = watch_dir(&path);
        info!(
            "watching schema '{}' via directory '{}'",
            schema_path.display(),
            watch_dir.display()
        );

        let mut watcher = notify::recommended_watcher(move |result| {
            let event: Event = match result {
                Ok(event) => event,
                Err(err) => {
                    warn!(
                        "schema watcher failed for '{}': {}",
                        schema_path.display(),
                        err
                    );
                    return;
                }
            };

            trace!("schema watcher event: {:?} {:?}", event.kind, event.paths);

            if !schema_file_changed(&event, &schema_path) {
                return;
            }

            let file_hash = match file_content_hash(&schema_path) {
                Ok(hash) => hash,
                Err(err) => {
                    trace!(
                        "schema '{}' not readable yet: {}",
                        schema_path.display(),
                        err
                    );
                    return;
                }
            };

            let mut last = last_loaded_hash.lock();
            if *last == Some(file_hash) {
                trace!("schema content unchanged: {}", schema_path.display());
                return;
            }
            *last = Some(file_hash);

            changed_flag.store(true, Ordering::SeqCst);
            info!("detected schema change: {}", schema_path.display());
        })?;

        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            path,
            changed,
            _watcher: watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn take_changed(&self) -> bool {
        self.changed.swap(false, Ordering::SeqCst)
    }

    /// Re-reads the document if it changed since the last call. A document
    /// that fails to parse is reported as an error and the flag is cleared,
    /// so the caller keeps its previous schema.
    pub fn reload_if_changed(&self) -> Option<Result<GameSchema, String>> {
        if self.take_changed() {
            Some(GameSchema::load(&self.path))
        } else {
            None
        }
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn file_content_hash(path: &Path) -> Result<u64, std::io::Error> {
    let bytes = fs::read(path)?;
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    Ok(hasher.finish())
}

fn schema_file_changed(event: &Event, watched_path: &Path) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }

    if event.paths.is_empty() {
        return true;
    }

    event
        .paths
        .iter()
        .any(|path| path_matches_target(path, watched_path))
}

fn path_matches_target(path: &Path, target: &Path) -> bool {
    if path == target {
        return true;
    }

    if path.file_name() == target.file_name() {
        return true;
    }

    let path_canon = path.canonicalize().ok();
    let target_canon = target.canonicalize().ok();

    match (path_canon, target_canon) {
        (Some(path_canon), Some(target_canon)) => path_canon == target_canon,
        _ => false,
    }
}
