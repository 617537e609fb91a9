//! Run orchestration
//!
//! Wires the pieces of one run together:
//! - validates the configuration and prepares the output directory
//! - starts the tracker, then the launcher, then the input generator
//! - registers every generated request with the tracker before handing it to
//!   the launcher, so a fast renderer can never finish before tracking starts
//! - signals end of input as soon as the generator returns, without waiting
//!   for the launch queue to drain
//! - resolves with the completed/not-completed partition once the tracker is
//!   quiescent, then closes the launcher

use crate::config::{validate, Config, OutputConfig};
use crate::input::{end_of_input, GeneratorContext, RequestSink};
use crate::launcher::Launcher;
use crate::tracker::{Tracker, TrackerReport};
use crate::{ConfigError, SnapshotError};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

/// Outcome of a run in which every capture completed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub completed: Vec<PathBuf>,
}

/// A run that did not fully succeed
///
/// Always carries the partition of everything registered before the run
/// ended. `error` is `None` when the only problem is captures that did not
/// complete, and holds the cause when configuration or input generation failed.
#[derive(Debug)]
pub struct RunError {
    pub completed: Vec<PathBuf>,
    pub not_completed: Vec<PathBuf>,
    pub error: Option<SnapshotError>,
}

impl RunError {
    /// A run that failed before anything was registered
    fn aborted(error: SnapshotError) -> Self {
        Self {
            completed: Vec::new(),
            not_completed: Vec::new(),
            error: Some(error),
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(e) => write!(
                f,
                "run failed: {} ({} completed, {} not completed)",
                e,
                self.completed.len(),
                self.not_completed.len()
            ),
            None => write!(
                f,
                "{} of {} captures did not complete",
                self.not_completed.len(),
                self.completed.len() + self.not_completed.len()
            ),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Runs one snapshot pass
///
/// # Returns
///
/// * `Ok(RunResult)` - Every registered capture was written
/// * `Err(RunError)` - Some capture timed out or failed to launch, or the
///   configuration or input generator failed; the partition is attached
///
/// # Example
///
/// ```no_run
/// use html_snapshots::config::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("snapshots.toml"))?;
/// match html_snapshots::run(config).await {
///     Ok(result) => println!("{} pages captured", result.completed.len()),
///     Err(e) => eprintln!("{} ({} not completed)", e, e.not_completed.len()),
/// }
/// # Ok(())
/// # }
/// ```
pub async fn run(config: Config) -> Result<RunResult, RunError> {
    let start_time = Instant::now();

    validate(&config).map_err(|e| RunError::aborted(e.into()))?;
    prepare_output_dir(&config.output)
        .await
        .map_err(RunError::aborted)?;

    let config = Arc::new(config);
    let ctx = GeneratorContext::new(config.clone()).map_err(RunError::aborted)?;

    let (signal, input) = end_of_input();
    let (report_tx, report_rx) = oneshot::channel();
    let (tracker, tracker_task) = Tracker::builder(config.output.dir())
        .poll_interval(config.capture.poll_interval())
        .on_complete(move |report| {
            let _ = report_tx.send(report);
        })
        .input(input)
        .start()
        .map_err(|e| RunError::aborted(e.into()))?;

    let launcher = Launcher::start(
        config.renderer.clone(),
        config.capture.process_limit(),
        tracker.clone(),
    );

    let (sink, mut requests) = RequestSink::channel();
    let kind = config.input.kind;
    let generator = tokio::spawn(async move { kind.run(&ctx, &sink).await });

    let mut error: Option<SnapshotError> = None;
    let mut seen = HashSet::new();
    while let Some(request) = requests.recv().await {
        if !seen.insert(request.output_file.clone()) {
            tracing::error!(
                "{} is produced by more than one request (latest: {})",
                request.output_file.display(),
                request.url
            );
            error = Some(ConfigError::DuplicateOutput(request.output_file).into());
            break;
        }
        tracker.register(&request.output_file, request.timeout);
        if !launcher.submit(request) {
            tracing::error!("Launcher stopped accepting requests");
            break;
        }
    }
    // further emits fail with ReceiverClosed, which stops the generator
    drop(requests);

    match generator.await {
        Ok(Ok(())) => {}
        Ok(Err(SnapshotError::ReceiverClosed)) if error.is_some() => {}
        Ok(Err(e)) => {
            tracing::error!("Input generation failed: {}", e);
            error.get_or_insert(e);
        }
        Err(e) => {
            error.get_or_insert(e.into());
        }
    }

    // every request is registered; queued ones get their deadlines now
    signal.close();
    drop(tracker);

    let joined = tracker_task.await;
    // requests still waiting for a slot have already resolved as timed out
    launcher.close();
    if let Err(e) = joined {
        return Err(RunError::aborted(e.into()));
    }
    let report = report_rx.await.unwrap_or_else(|_| TrackerReport::default());
    let not_completed = report.not_completed();

    tracing::info!(
        "Run finished in {:?}: {} completed, {} timed out, {} failed to launch",
        start_time.elapsed(),
        report.completed.len(),
        report.timed_out.len(),
        report.cancelled.len()
    );

    if error.is_none() && not_completed.is_empty() {
        Ok(RunResult {
            completed: report.completed,
        })
    } else {
        Err(RunError {
            completed: report.completed,
            not_completed,
            error,
        })
    }
}

/// Cleans the output directory if asked to, then makes sure it exists
async fn prepare_output_dir(output: &OutputConfig) -> crate::Result<()> {
    let dir = output.dir();
    if output.clean {
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::info!("Cleaned output directory {}", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    tokio::fs::create_dir_all(&dir).await?;
    Ok(())
}
