//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched rather than the file itself so that
//! editors which save by writing a temporary file and renaming it over the
//! original are still observed.

use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::event::CreateKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;

/// Window in which further change events are ignored after an accepted one.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

/// Request handed from the watcher thread to the cooperative core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadRequest {
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("config file has no parent directory: {0}")]
    NoParent(PathBuf),

    #[error("watcher is already running")]
    AlreadyRunning,

    #[error("failed to start watcher: {0}")]
    Notify(#[from] notify::Error),

    #[error("failed to spawn watcher thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Accepts at most one event per debounce window.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
        }
    }

    /// Returns true and records `now` when the event falls outside the window.
    pub fn accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }
}

/// Decides which raw filesystem events turn into reload requests.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    tracked: PathBuf,
    debouncer: Debouncer,
}

impl ChangeFilter {
    pub fn new(tracked: PathBuf, window: Duration) -> Self {
        Self {
            tracked,
            debouncer: Debouncer::new(window),
        }
    }

    pub fn should_reload(&mut self, event: &Event, now: Instant) -> bool {
        let relevant_kind = match event.kind {
            EventKind::Create(CreateKind::Folder) => false,
            EventKind::Create(_) | EventKind::Modify(_) => true,
            _ => false,
        };
        if !relevant_kind {
            return false;
        }
        if !event.paths.iter().any(|p| p == &self.tracked) {
            return false;
        }
        if self.tracked.is_dir() {
            return false;
        }
        self.debouncer.accept(now)
    }
}

enum WatchMessage {
    Fs(notify::Result<Event>),
    Stop,
}

/// Watches one config file from a dedicated OS thread.
///
/// The thread never touches aggregator state: accepted changes are sent as
/// [`ReloadRequest`]s over a tokio channel to whoever owns the topology.
pub struct FileWatcher {
    path: PathBuf,
    debounce: Duration,
    control: Option<std_mpsc::Sender<WatchMessage>>,
    thread: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Create a watcher for `path`. The path is made absolute so it can be
    /// compared with the paths reported by the OS.
    pub fn new(path: &Path) -> Self {
        Self {
            path: resolve(path),
            debounce: DEFAULT_DEBOUNCE,
            control: None,
            thread: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Start watching in a background thread.
    pub fn start(&mut self, reloads: mpsc::UnboundedSender<ReloadRequest>) -> Result<(), WatchError> {
        if self.thread.is_some() {
            return Err(WatchError::AlreadyRunning);
        }
        let parent = self
            .path
            .parent()
            .ok_or_else(|| WatchError::NoParent(self.path.clone()))?
            .to_path_buf();

        let (tx, rx) = std_mpsc::channel();
        let fs_tx = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = fs_tx.send(WatchMessage::Fs(res));
            },
            notify::Config::default(),
        )?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;

        let mut filter = ChangeFilter::new(self.path.clone(), self.debounce);
        let tracked = self.path.clone();
        let thread = std::thread::Builder::new()
            .name("config-watcher".into())
            .spawn(move || {
                // Owned here so the OS watch is released when the loop ends.
                let _watcher = watcher;
                for message in rx {
                    match message {
                        WatchMessage::Stop => break,
                        WatchMessage::Fs(Ok(event)) => {
                            if !filter.should_reload(&event, Instant::now()) {
                                continue;
                            }
                            tracing::info!(path = %tracked.display(), "Config file changed, scheduling reload");
                            let request = ReloadRequest { path: tracked.clone() };
                            if reloads.send(request).is_err() {
                                tracing::debug!("Reload receiver dropped, watcher exiting");
                                break;
                            }
                        }
                        WatchMessage::Fs(Err(e)) => tracing::error!(error = %e, "Watch error"),
                    }
                }
            })?;

        self.control = Some(tx);
        self.thread = Some(thread);
        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(())
    }

    /// Stop watching and join the watcher thread.
    pub fn stop(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(WatchMessage::Stop);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Config watcher thread panicked");
            }
            tracing::info!(path = %self.path.display(), "Config watcher stopped");
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn resolve(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    // Canonicalize the directory only; the file may be mid-replace.
    let canonical = match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => parent.canonicalize().ok().map(|dir| dir.join(name)),
        _ => None,
    };
    canonical.unwrap_or(absolute)
}
