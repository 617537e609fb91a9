//! Completion tracker
//!
//! Decides, purely from filesystem observation and wall-clock deadlines, which
//! expected output files were produced. Each file moves from `Pending` to
//! exactly one terminal state:
//! - `Satisfied`: the file was seen on disk (after a change notification, by a
//!   periodic scan or at its deadline)
//! - `TimedOut`: its deadline passed and the file was not there
//! - `Cancelled`: the caller withdrew it, e.g. after a failed launch
//!
//! The tracker fires its completion callback exactly once, when the input has
//! ended and no file is still pending.
//!
//! Change notifications on the output tree (via `notify`) trigger a re-scan of
//! the pending set; the periodic scan backs them up for events that are lost
//! or arrive before a new directory is watched.
//!
//! A file's deadline is armed when its renderer starts, or when the input ends
//! if it has not started by then. A renderer that never exits therefore cannot
//! keep queued files pending forever.

mod state;

pub use state::TrackedState;

use crate::input::InputHandle;
use crate::TrackerError;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use state::TrackedFile;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Extra time granted past each request's own timeout, so a renderer racing
/// its internal deadline can finish writing
pub const DEFAULT_TIMEOUT_PAD: Duration = Duration::from_secs(2);

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

type CompletionCallback = Box<dyn FnOnce(TrackerReport) + Send + 'static>;

/// Aggregate outcome, each list in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerReport {
    pub completed: Vec<PathBuf>,
    pub timed_out: Vec<PathBuf>,
    pub cancelled: Vec<PathBuf>,
}

impl TrackerReport {
    /// True when any capture timed out
    pub fn failed(&self) -> bool {
        !self.timed_out.is_empty()
    }

    /// Every file that did not complete
    pub fn not_completed(&self) -> Vec<PathBuf> {
        self.timed_out
            .iter()
            .chain(self.cancelled.iter())
            .cloned()
            .collect()
    }
}

/// Entry point for building a tracker
pub struct Tracker;

impl Tracker {
    pub fn builder(output_dir: impl Into<PathBuf>) -> TrackerBuilder {
        TrackerBuilder {
            output_dir: output_dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout_pad: DEFAULT_TIMEOUT_PAD,
            on_complete: None,
            input: None,
        }
    }
}

/// Collects the tracker's collaborators before it starts
pub struct TrackerBuilder {
    output_dir: PathBuf,
    poll_interval: Duration,
    timeout_pad: Duration,
    on_complete: Option<CompletionCallback>,
    input: Option<InputHandle>,
}

impl TrackerBuilder {
    /// How often pending files are checked on disk
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn timeout_pad(mut self, pad: Duration) -> Self {
        self.timeout_pad = pad;
        self
    }

    /// Callback invoked once with the final report
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(TrackerReport) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// End-of-input signal of the generator feeding this tracker
    pub fn input(mut self, input: InputHandle) -> Self {
        self.input = Some(input);
        self
    }

    /// Spawns the tracker task on the current runtime
    ///
    /// # Errors
    ///
    /// Checked in this order: no callback, a zero poll interval, no input handle.
    pub fn start(self) -> Result<(TrackerHandle, JoinHandle<()>), TrackerError> {
        let on_complete = self.on_complete.ok_or(TrackerError::MissingCallback)?;
        if self.poll_interval.is_zero() {
            return Err(TrackerError::InvalidInterval);
        }
        let input = self.input.ok_or(TrackerError::MissingInput)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let watcher = watch_output(&self.output_dir, change_tx);

        let task = TrackerTask {
            files: Vec::new(),
            index: HashMap::new(),
            pending: 0,
            input_ended: false,
            commands_closed: false,
            watching: watcher.is_some(),
            timeout_pad: self.timeout_pad,
        };

        tracing::debug!(
            "Tracking output below {} (watching: {}, scan every {:?})",
            self.output_dir.display(),
            task.watching,
            self.poll_interval
        );
        let channels = Channels {
            commands: rx,
            changes: change_rx,
            input,
            _watcher: watcher,
        };
        let join = tokio::spawn(task.run(channels, self.poll_interval, on_complete));
        Ok((TrackerHandle { tx }, join))
    }
}

/// Watches the output tree recursively, sending one wakeup per change event
///
/// Returns `None` when the platform watcher cannot be set up; the tracker then
/// relies on its periodic scan.
fn watch_output(dir: &Path, changes: mpsc::UnboundedSender<()>) -> Option<RecommendedWatcher> {
    let handler = move |result: notify::Result<notify::Event>| match result {
        Ok(event) if !matches!(event.kind, EventKind::Access(_)) => {
            let _ = changes.send(());
        }
        Ok(_) => {}
        Err(e) => tracing::debug!("Watcher error: {}", e),
    };

    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(watcher) => watcher,
        Err(e) => {
            tracing::warn!("Cannot create filesystem watcher: {}", e);
            return None;
        }
    };
    if let Err(e) = watcher.watch(dir, RecursiveMode::Recursive) {
        tracing::warn!("Cannot watch {}: {}", dir.display(), e);
        return None;
    }
    Some(watcher)
}

/// Everything the tracker task listens to
struct Channels {
    commands: mpsc::UnboundedReceiver<Command>,
    changes: mpsc::UnboundedReceiver<()>,
    input: InputHandle,
    // dropping the watcher stops change events
    _watcher: Option<RecommendedWatcher>,
}

#[derive(Debug)]
enum Command {
    Register {
        path: PathBuf,
        timeout: Duration,
        baseline: Option<SystemTime>,
    },
    Started(PathBuf),
    Cancel(PathBuf),
}

/// Cloneable handle used to feed the tracker
///
/// Each method returns false once the tracker has finished.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl TrackerHandle {
    /// Adds an expected output file
    ///
    /// The file's current modification time is taken here, before any renderer
    /// can touch it; only a change from it counts as the file being written.
    pub fn register(&self, path: &Path, timeout: Duration) -> bool {
        let baseline = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok();
        self.send(Command::Register {
            path: path.to_path_buf(),
            timeout,
            baseline,
        })
    }

    /// Arms the file's deadline: now + its timeout + the pad
    ///
    /// A deadline armed earlier at end of input is only ever pushed later.
    pub fn started(&self, path: &Path) -> bool {
        self.send(Command::Started(path.to_path_buf()))
    }

    /// Withdraws a file that can no longer be produced
    pub fn cancel(&self, path: &Path) -> bool {
        self.send(Command::Cancel(path.to_path_buf()))
    }

    fn send(&self, command: Command) -> bool {
        self.tx.send(command).is_ok()
    }
}

struct TrackerTask {
    files: Vec<TrackedFile>,
    index: HashMap<PathBuf, usize>,
    pending: usize,
    input_ended: bool,
    commands_closed: bool,
    watching: bool,
    timeout_pad: Duration,
}

impl TrackerTask {
    async fn run(
        mut self,
        channels: Channels,
        poll_interval: Duration,
        on_complete: CompletionCallback,
    ) {
        let Channels {
            mut commands,
            mut changes,
            input,
            _watcher,
        } = channels;
        let mut input = input.0;
        let mut scan = tokio::time::interval(poll_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.quiescent() {
            let next_deadline = self.next_deadline();

            tokio::select! {
                biased;

                command = commands.recv(), if !self.commands_closed => match command {
                    Some(command) => self.apply(command),
                    None => {
                        self.commands_closed = true;
                        self.arm_unstarted();
                    }
                },
                _ = &mut input, if !self.input_ended => {
                    // registrations sent before the signal are still queued
                    while let Ok(command) = commands.try_recv() {
                        self.apply(command);
                    }
                    self.input_ended = true;
                    self.arm_unstarted();
                    tracing::debug!("Input ended with {} files pending", self.pending);
                }
                change = changes.recv(), if self.watching => match change {
                    Some(()) => {
                        // one scan covers a burst of events
                        while changes.try_recv().is_ok() {}
                        self.scan().await;
                    }
                    None => self.watching = false,
                },
                _ = scan.tick() => self.scan().await,
                _ = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                    if next_deadline.is_some() => self.expire(Instant::now()).await,
            }
        }

        let report = self.report();
        tracing::debug!(
            "Tracker quiescent: {} completed, {} timed out, {} cancelled",
            report.completed.len(),
            report.timed_out.len(),
            report.cancelled.len()
        );
        on_complete(report);
    }

    fn quiescent(&self) -> bool {
        self.input_ended && self.pending == 0
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register {
                path,
                timeout,
                baseline,
            } => {
                if self.index.contains_key(&path) {
                    tracing::warn!("{} is already tracked", path.display());
                    return;
                }
                tracing::trace!("Tracking {}", path.display());
                self.index.insert(path.clone(), self.files.len());
                self.files.push(TrackedFile::new(path, timeout, baseline));
                self.pending += 1;
            }
            Command::Started(path) => {
                let pad = self.timeout_pad;
                if let Some(file) = self.lookup_mut(&path) {
                    if file.state == TrackedState::Pending {
                        let deadline = Instant::now() + file.timeout + pad;
                        file.deadline = Some(file.deadline.map_or(deadline, |d| d.max(deadline)));
                    }
                }
            }
            Command::Cancel(path) => {
                if let Some(&idx) = self.index.get(&path) {
                    self.transition(idx, TrackedState::Cancelled);
                }
            }
        }
    }

    fn lookup_mut(&mut self, path: &Path) -> Option<&mut TrackedFile> {
        let idx = *self.index.get(path)?;
        self.files.get_mut(idx)
    }

    /// Gives every file that has not started yet a deadline from now
    ///
    /// Called at end of input and when every handle is gone, so no file waits
    /// on a launch slot that may never free up.
    fn arm_unstarted(&mut self) {
        let now = Instant::now();
        let pad = self.timeout_pad;
        for file in &mut self.files {
            if file.state == TrackedState::Pending && file.deadline.is_none() {
                file.deadline = Some(now + file.timeout + pad);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.files
            .iter()
            .filter(|f| f.state == TrackedState::Pending)
            .filter_map(|f| f.deadline)
            .min()
    }

    async fn scan(&mut self) {
        for idx in 0..self.files.len() {
            if self.files[idx].state == TrackedState::Pending && self.files[idx].written().await {
                self.transition(idx, TrackedState::Satisfied);
            }
        }
    }

    async fn expire(&mut self, now: Instant) {
        for idx in 0..self.files.len() {
            let file = &self.files[idx];
            let due = file.state == TrackedState::Pending
                && file.deadline.map_or(false, |deadline| deadline <= now);
            if !due {
                continue;
            }
            let outcome = if file.written().await {
                TrackedState::Satisfied
            } else {
                TrackedState::TimedOut
            };
            self.transition(idx, outcome);
        }
    }

    /// The only place a file's state changes; a file already in a terminal
    /// state is left alone
    fn transition(&mut self, idx: usize, to: TrackedState) -> bool {
        let file = &mut self.files[idx];
        if file.state.is_terminal() || !to.is_terminal() {
            return false;
        }
        tracing::debug!("{}: {} -> {}", file.path.display(), file.state, to);
        file.state = to;
        self.pending -= 1;
        true
    }

    fn report(&self) -> TrackerReport {
        let mut report = TrackerReport::default();
        for file in &self.files {
            let list = match file.state {
                TrackedState::Satisfied => &mut report.completed,
                TrackedState::TimedOut => &mut report.timed_out,
                TrackedState::Cancelled => &mut report.cancelled,
                TrackedState::Pending => continue,
            };
            list.push(file.path.clone());
        }
        report
    }
}
