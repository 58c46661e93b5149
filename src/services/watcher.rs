//! Glob-driven filesystem watcher
//!
//! Wraps `notify` behind a small callback interface: every file matching the
//! include globs (and no exclusion) is reported once through `on_added`,
//! first for the files already on disk, then for files that appear later.
//! `on_ready` fires once, after the initial enumeration.
//!
//! Live files are only reported once their size has stopped changing for the
//! configured settle window, so half-copied files are not imported.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::media::filter::build_exclusion_set;

pub type AddedCallback = Arc<dyn Fn(PathBuf) + Send + Sync>;
pub type ReadyCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Polling interval; zero uses native change notifications
    pub poll_interval: Duration,
    /// How long a file's size must stay unchanged before it is reported
    pub write_settle: Duration,
    /// How often pending files are re-checked
    pub settle_check: Duration,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            write_settle: Duration::from_millis(2000),
            settle_check: Duration::from_millis(100),
        }
    }
}

enum WatcherHandle {
    Native(RecommendedWatcher),
    Poll(PollWatcher),
}

impl WatcherHandle {
    fn watch(&mut self, root: &Path) -> notify::Result<()> {
        match self {
            Self::Native(w) => w.watch(root, RecursiveMode::Recursive),
            Self::Poll(w) => w.watch(root, RecursiveMode::Recursive),
        }
    }
}

/// Include globs minus exclusions
struct GlobMatcher {
    include: GlobSet,
    exclude: GlobSet,
}

impl GlobMatcher {
    fn new(globs: &[String], exclusions: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for glob in globs {
            builder.add(
                GlobBuilder::new(glob)
                    .case_insensitive(true)
                    .literal_separator(true)
                    .build()
                    .with_context(|| format!("Invalid watch glob '{glob}'"))?,
            );
        }
        Ok(Self {
            include: builder.build().context("Invalid watch globs")?,
            exclude: build_exclusion_set(exclusions)?,
        })
    }

    fn matches(&self, path: &Path) -> bool {
        self.include.is_match(path) && !self.exclude.is_match(path)
    }

    fn files_under(&self, dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true) {
            match entry {
                Ok(entry) if entry.file_type().is_file() && self.matches(entry.path()) => {
                    files.push(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => warn!(root = %dir.display(), error = %e, "Cannot read watched path"),
            }
        }
        files.sort();
        files
    }
}

/// Literal directory prefix of a glob, i.e. everything before the first
/// component holding a wildcard. Understands `globset::escape` output.
pub fn glob_base(glob: &str) -> PathBuf {
    let mut base = String::new();
    for (i, component) in glob.split('/').enumerate() {
        let Some(literal) = literal_component(component) else {
            break;
        };
        if i > 0 {
            base.push('/');
        }
        base.push_str(&literal);
    }
    if base.is_empty() {
        PathBuf::from(".")
    } else {
        PathBuf::from(base)
    }
}

fn literal_component(component: &str) -> Option<String> {
    let chars: Vec<char> = component.chars().collect();
    let mut literal = String::with_capacity(component.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            // escaped metacharacter, e.g. `[*]`
            '[' if i + 2 < chars.len() && chars[i + 2] == ']' => {
                literal.push(chars[i + 1]);
                i += 3;
            }
            '*' | '?' | '[' | '{' => return None,
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    Some(literal)
}

/// Drop roots nested inside another root; watching is recursive anyway
fn distinct_roots(globs: &[String]) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for base in globs.iter().map(|g| glob_base(g)) {
        if roots.iter().any(|r| base.starts_with(r)) {
            continue;
        }
        roots.retain(|r| !r.starts_with(&base));
        roots.push(base);
    }
    roots
}

struct PendingWrite {
    size: u64,
    stable_since: Instant,
}

struct WatchLoop {
    matcher: Arc<GlobMatcher>,
    options: WatcherOptions,
    on_added: AddedCallback,
    known: HashSet<PathBuf>,
    pending: HashMap<PathBuf, PendingWrite>,
}

impl WatchLoop {
    fn emit(&mut self, path: PathBuf) {
        if self.known.insert(path.clone()) {
            debug!(path = %path.display(), "File added");
            (self.on_added)(path);
        }
    }

    fn forget(&mut self, path: &Path) {
        self.known.retain(|p| !p.starts_with(path));
        self.pending.retain(|p, _| !p.starts_with(path));
    }

    fn track(&mut self, path: PathBuf, size: u64) {
        if self.known.contains(&path) {
            return;
        }
        let now = Instant::now();
        self.pending
            .entry(path)
            .and_modify(|w| {
                if w.size != size {
                    w.size = size;
                    w.stable_since = now;
                }
            })
            .or_insert(PendingWrite {
                size,
                stable_since: now,
            });
    }

    async fn observe(&mut self, path: &Path) {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => {
                // A directory moved or copied in: its files never get their own events
                let matcher = self.matcher.clone();
                let dir = path.to_path_buf();
                match tokio::task::spawn_blocking(move || matcher.files_under(&dir)).await {
                    Ok(files) => {
                        for file in files {
                            let size = std::fs::metadata(&file).map(|m| m.len()).unwrap_or(0);
                            self.track(file, size);
                        }
                    }
                    Err(e) => error!(path = %path.display(), error = %e, "Directory walk panicked"),
                }
            }
            Ok(meta) => {
                if self.matcher.matches(path) {
                    self.track(path.to_path_buf(), meta.len());
                }
            }
            Err(_) => self.forget(path),
        }
    }

    async fn handle(&mut self, event: Event) {
        match event.kind {
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in &event.paths {
                    self.forget(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = event.paths.as_slice() {
                    self.forget(from);
                    self.observe(to).await;
                }
            }
            EventKind::Create(_) | EventKind::Modify(_) => {
                for path in &event.paths {
                    self.observe(path).await;
                }
            }
            _ => {}
        }
    }

    /// Report pending files whose size has been stable long enough
    fn settle(&mut self) {
        let now = Instant::now();
        let mut settled = Vec::new();
        let mut gone = Vec::new();

        for (path, write) in self.pending.iter_mut() {
            match std::fs::metadata(path) {
                Ok(meta) if meta.len() != write.size => {
                    write.size = meta.len();
                    write.stable_since = now;
                }
                Ok(_) if now.duration_since(write.stable_since) >= self.options.write_settle => {
                    settled.push(path.clone());
                }
                Ok(_) => {}
                Err(_) => gone.push(path.clone()),
            }
        }

        for path in gone {
            self.pending.remove(&path);
        }
        settled.sort();
        for path in settled {
            self.pending.remove(&path);
            self.emit(path);
        }
    }
}

/// Watches a set of globs until `stop_watching` is called
pub struct ChangeWatcher {
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ChangeWatcher {
    /// Start watching. Must be called inside a runtime.
    pub fn new(
        globs: &[String],
        exclusions: &[String],
        options: WatcherOptions,
        on_added: AddedCallback,
        on_ready: ReadyCallback,
    ) -> Result<Self> {
        let matcher = Arc::new(GlobMatcher::new(globs, exclusions)?);
        let roots = distinct_roots(globs);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handler = move |res: notify::Result<Event>| {
            let _ = event_tx.send(res);
        };

        let mut watcher = if options.poll_interval.is_zero() {
            WatcherHandle::Native(
                RecommendedWatcher::new(handler, notify::Config::default())
                    .context("Failed to create watcher")?,
            )
        } else {
            WatcherHandle::Poll(
                PollWatcher::new(
                    handler,
                    notify::Config::default().with_poll_interval(options.poll_interval),
                )
                .context("Failed to create polling watcher")?,
            )
        };

        for root in &roots {
            match watcher.watch(root) {
                Ok(()) => info!(root = %root.display(), "Watching folder"),
                Err(e) => warn!(root = %root.display(), error = %e, "Cannot watch folder"),
            }
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = WatchLoop {
            matcher,
            options,
            on_added,
            known: HashSet::new(),
            pending: HashMap::new(),
        };
        let task = tokio::spawn(run(state, watcher, roots, event_rx, shutdown_rx, on_ready));

        Ok(Self {
            shutdown: Mutex::new(Some(shutdown_tx)),
            task: tokio::sync::Mutex::new(Some(task)),
        })
    }

    /// Release every watch handle. Returns once the watcher is fully closed;
    /// no callback fires afterwards. Safe to call repeatedly.
    pub async fn stop_watching(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }

        let mut task = self.task.lock().await;
        if let Some(handle) = task.take()
            && let Err(e) = handle.await
        {
            error!(error = %e, "Watcher task failed");
        }
    }
}

async fn run(
    mut state: WatchLoop,
    watcher: WatcherHandle,
    roots: Vec<PathBuf>,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut shutdown: oneshot::Receiver<()>,
    on_ready: ReadyCallback,
) {
    let initial = {
        let matcher = state.matcher.clone();
        tokio::task::spawn_blocking(move || {
            roots
                .iter()
                .flat_map(|root| matcher.files_under(root))
                .collect::<Vec<_>>()
        })
    };

    let initial = tokio::select! {
        _ = &mut shutdown => {
            drop(watcher);
            return;
        }
        files = initial => files.unwrap_or_else(|e| {
            error!(error = %e, "Initial enumeration panicked");
            Vec::new()
        }),
    };

    for path in initial {
        state.emit(path);
    }
    info!(files = state.known.len(), "Initial watch scan complete");
    on_ready();

    let mut tick = tokio::time::interval(state.options.settle_check);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(res) = events.recv() => match res {
                Ok(event) => state.handle(event).await,
                Err(e) => warn!(error = %e, "Watch error"),
            },
            _ = tick.tick(), if !state.pending.is_empty() => state.settle(),
        }
    }

    drop(watcher);
    debug!("Watcher closed");
}
