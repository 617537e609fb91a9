//! Bounded renderer launcher
//!
//! Requests are admitted in arrival order. With a process limit, a request
//! waits for a free slot; a slot frees when its renderer process exits, for any
//! reason. Exit codes are logged but not interpreted: whether a capture
//! succeeded is decided by the tracker from the filesystem.
//!
//! The launcher is closed once the tracker has reported. Requests still
//! queued at that point are dropped; renderers already running are left to
//! exit on their own.
//!
//! Renderer invocation:
//! `<program> [snapshot-script] <output-file> <url> <selector> <timeout-ms> <check-interval-ms> [args...]`

use crate::config::RendererConfig;
use crate::input::CaptureRequest;
use crate::tracker::TrackerHandle;
use crate::SnapshotError;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Launches renderer processes for submitted requests
pub struct Launcher {
    tx: mpsc::UnboundedSender<CaptureRequest>,
    task: JoinHandle<()>,
}

impl Launcher {
    /// Starts the dispatch task
    ///
    /// # Arguments
    ///
    /// * `renderer` - Program, script and passthrough arguments
    /// * `limit` - Maximum concurrent processes, `None` for unbounded
    /// * `tracker` - Told when each renderer starts, or cancelled on launch failure
    pub fn start(renderer: RendererConfig, limit: Option<usize>, tracker: TrackerHandle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let slots = limit.map(|n| Arc::new(Semaphore::new(n)));

        match limit {
            Some(n) => tracing::debug!("Launching renderers with a limit of {}", n),
            None => tracing::debug!("Launching renderers without a limit"),
        }

        let dispatcher = Dispatcher {
            renderer: Arc::new(renderer),
            slots,
            tracker,
        };
        let task = tokio::spawn(dispatcher.run(rx));

        Self { tx, task }
    }

    /// Queues a request; returns false if the launcher has stopped
    pub fn submit(&self, request: CaptureRequest) -> bool {
        self.tx.send(request).is_ok()
    }

    /// Stops dispatching; queued requests that have not launched are dropped
    pub fn close(self) {
        drop(self.tx);
        self.task.abort();
    }
}

struct Dispatcher {
    renderer: Arc<RendererConfig>,
    slots: Option<Arc<Semaphore>>,
    tracker: TrackerHandle,
}

impl Dispatcher {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<CaptureRequest>) {
        let mut launched = 0usize;

        while let Some(request) = rx.recv().await {
            // Semaphore hands out permits in FIFO order
            let permit = match &self.slots {
                Some(slots) => match slots.clone().acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
                None => None,
            };

            match self.spawn(&request).await {
                Ok(child) => {
                    launched += 1;
                    self.tracker.started(&request.output_file);
                    tokio::spawn(watch(child, request, permit));
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    self.tracker.cancel(&request.output_file);
                }
            }
        }

        tracing::debug!("Launcher drained after {} launches", launched);
    }

    async fn spawn(&self, request: &CaptureRequest) -> crate::Result<Child> {
        let launch_error = |source: std::io::Error| SnapshotError::Launch {
            output_file: request.output_file.clone(),
            source,
        };

        if let Some(parent) = request.output_file.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(launch_error)?;
        }

        let mut command = Command::new(&self.renderer.program);
        if let Some(script) = &self.renderer.snapshot_script {
            command.arg(script);
        }
        command
            .arg(&request.output_file)
            .arg(request.url.as_str())
            .arg(&request.selector)
            .arg(request.timeout.as_millis().to_string())
            .arg(request.check_interval.as_millis().to_string())
            .args(&self.renderer.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = command.spawn().map_err(launch_error)?;
        tracing::debug!(
            "Started renderer (pid {:?}) for {}",
            child.id(),
            request.url
        );
        Ok(child)
    }
}

/// Forwards the renderer's output and frees its slot on exit
async fn watch(
    mut child: Child,
    request: CaptureRequest,
    permit: Option<OwnedSemaphorePermit>,
) {
    let url = request.url.to_string();
    let stdout = child
        .stdout
        .take()
        .map(|out| tokio::spawn(forward(out, url.clone(), false)));
    let stderr = child
        .stderr
        .take()
        .map(|err| tokio::spawn(forward(err, url.clone(), true)));

    match child.wait().await {
        Ok(status) if status.success() => tracing::debug!("Renderer for {} exited", url),
        Ok(status) => tracing::debug!("Renderer for {} exited with {}", url, status),
        Err(e) => tracing::warn!("Failed to wait on renderer for {}: {}", url, e),
    }

    for forwarder in [stdout, stderr].into_iter().flatten() {
        let _ = forwarder.await;
    }

    drop(permit);
}

async fn forward(stream: impl AsyncRead + Unpin, url: String, is_stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            tracing::debug!(target: "html_snapshots::renderer", "[{}] {}", url, line);
        } else {
            tracing::trace!(target: "html_snapshots::renderer", "[{}] {}", url, line);
        }
    }
}
