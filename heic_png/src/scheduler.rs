//! Batch scheduler
//!
//! `Idle -> Preparing -> Running -> Completed | Stopped | Failed`
//!
//! The calling thread coordinates: it discovers files, resolves destinations,
//! skips those already present and spawns the rest onto a rayon pool. Workers
//! report back over a channel, and only the coordinator touches the counters
//! or the observer.

use crate::control::{ProgressEvent, ProgressObserver, StopSignal};
use crate::converter::{convert_guarded, Converter, PngConverter, WorkItem};
use crate::discovery;
use crate::errors::{ConversionError, SetupError};
use crate::output_paths;
use crate::request::ConversionRequest;
use shared_utils::{file_name_lossy, resolve_pool_width, BatchResult};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Preparing,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Preparing => "preparing",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Stopped => "stopped",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// `Completed`, `Stopped` or `Failed`
    pub status: RunState,
    /// Where output was written; `None` when the run never got a usable directory.
    pub output_dir: Option<PathBuf>,
    pub completed: usize,
    pub total: usize,
    pub summary: BatchResult,
    pub message: String,
}

impl RunOutcome {
    /// Completed, possibly with per-file failures.
    pub fn is_completed(&self) -> bool {
        self.status == RunState::Completed
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    /// Pool width; `None` uses `HEIC_PNG_WORKERS` or `min(32, cores + 4)`.
    pub workers: Option<usize>,
    /// Write into this existing directory instead of allocating a new one.
    /// Files converted by an earlier run are then skipped.
    pub resume_into: Option<PathBuf>,
}

/// Convert `request` with the PNG converter and default options.
pub fn run(
    request: &ConversionRequest,
    stop: &StopSignal,
    observer: &dyn ProgressObserver,
) -> RunOutcome {
    run_with(
        request,
        &PngConverter,
        &SchedulerOptions::default(),
        stop,
        observer,
    )
}

/// Tracks the state machine and guarantees a single `on_done`.
struct Run<'o> {
    state: RunState,
    observer: &'o dyn ProgressObserver,
}

impl<'o> Run<'o> {
    fn enter(&mut self, next: RunState) {
        tracing::debug!(from = %self.state, to = %next, "Run state");
        self.state = next;
    }

    fn finish(mut self, outcome: RunOutcome) -> RunOutcome {
        self.enter(outcome.status);
        self.observer.on_done(&outcome);
        outcome
    }

    fn fail(self, err: SetupError, output_dir: Option<PathBuf>, summary: BatchResult) -> RunOutcome {
        let message = err.to_string();
        tracing::error!(error = %message, "Run failed");
        self.observer.on_error(&message);
        let completed = summary.processed();
        let total = summary.total;
        self.finish(RunOutcome {
            status: RunState::Failed,
            output_dir,
            completed,
            total,
            summary,
            message,
        })
    }
}

/// Result sent back by a pool task.
enum TaskReport {
    Finished(PathBuf, Result<(), ConversionError>),
    /// Stop was requested before the task started.
    Abandoned(PathBuf),
}

/// Coordinator-side counters; `completed` moves in lockstep with progress events.
struct Tally<'o> {
    completed: usize,
    total: usize,
    summary: BatchResult,
    observer: &'o dyn ProgressObserver,
}

impl Tally<'_> {
    fn progress(&mut self, message: String) {
        self.completed += 1;
        self.observer.on_progress(&ProgressEvent {
            completed: self.completed,
            total: self.total,
            message,
        });
    }

    fn skipped(&mut self, source: &Path) {
        self.summary.skip();
        self.progress(format!("Skipped (exists): {}", file_name_lossy(source)));
    }

    /// `source` maps to a destination another source of this run already owns.
    fn duplicate(&mut self, source: &Path, owner: &Path) {
        let err = ConversionError::new(
            source,
            format!(
                "output name already used by {} in this run",
                file_name_lossy(owner)
            ),
        );
        self.record(TaskReport::Finished(source.to_path_buf(), Err(err)));
    }

    fn record(&mut self, report: TaskReport) {
        match report {
            TaskReport::Finished(_, Ok(())) => {
                self.summary.success();
                self.progress(format!("Processed: {}/{}", self.completed + 1, self.total));
            }
            TaskReport::Finished(source, Err(err)) => {
                tracing::warn!(path = %source.display(), error = %err.message, "Conversion failed");
                let message = err.to_string();
                self.summary.fail(source, err.message);
                self.progress(format!("Processed: {}/{}", self.completed + 1, self.total));
                self.observer.on_error(&message);
            }
            TaskReport::Abandoned(source) => {
                tracing::debug!(path = %source.display(), "Not started, stop requested");
                self.summary.abandon();
            }
        }
    }
}

/// Pool width for a batch of `total` files: the configured width, but never
/// more threads than files.
fn pool_width_for(requested: Option<usize>, total: usize) -> usize {
    resolve_pool_width(requested).min(total).max(1)
}

/// Build the worker pool, halving the width while thread creation fails.
///
/// Hosts with a tight thread limit (containers, parallel test runs) can refuse
/// a full-width pool; a narrower pool still completes the batch.
fn build_pool(width: usize) -> Result<(rayon::ThreadPool, usize), rayon::ThreadPoolBuildError> {
    let mut width = width.max(1);
    loop {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(width)
            .thread_name(|i| format!("heic-png-{}", i))
            .build()
        {
            Ok(pool) => return Ok((pool, width)),
            Err(e) if width > 1 => {
                tracing::warn!(width, error = %e, "Worker pool build failed, retrying narrower");
                width /= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

struct Prepared {
    output_dir: PathBuf,
    files: Vec<PathBuf>,
}

fn prepare(request: &ConversionRequest, options: &SchedulerOptions) -> Result<Prepared, SetupError> {
    request.validate()?;

    if !request.input_root.is_dir() {
        return Err(SetupError::InputRootMissing(request.input_root.clone()));
    }
    if request.output_base.as_os_str().is_empty() {
        return Err(SetupError::EmptyOutputBase);
    }

    let output_dir = match &options.resume_into {
        Some(dir) if dir.is_dir() => {
            tracing::info!(dir = %dir.display(), "Resuming into existing output directory");
            dir.clone()
        }
        Some(dir) => return Err(SetupError::ResumeDirMissing(dir.clone())),
        None => output_paths::allocate(&request.output_base, request.effective_prefix())
            .map_err(|source| SetupError::OutputAllocation {
                base: request.output_base.clone(),
                source,
            })?,
    };

    let files = discovery::discover(&request.input_root, request.recursive);
    if files.is_empty() {
        return Err(SetupError::NothingToConvert(request.input_root.clone()));
    }

    Ok(Prepared { output_dir, files })
}

/// Run a batch with an explicit converter and options.
///
/// Blocks until every submitted item has finished or been abandoned. The
/// observer is called from this thread only.
pub fn run_with(
    request: &ConversionRequest,
    converter: &dyn Converter,
    options: &SchedulerOptions,
    stop: &StopSignal,
    observer: &dyn ProgressObserver,
) -> RunOutcome {
    let mut run = Run {
        state: RunState::Idle,
        observer,
    };

    run.enter(RunState::Preparing);
    let Prepared { output_dir, files } = match prepare(request, options) {
        Ok(prepared) => prepared,
        // The zero-candidate case keeps its (empty) directory on disk but does
        // not report it.
        Err(err) => return run.fail(err, None, BatchResult::new()),
    };

    let total = files.len();
    let (pool, workers) = match build_pool(pool_width_for(options.workers, total)) {
        Ok(built) => built,
        Err(e) => {
            return run.fail(
                SetupError::WorkerPool(e.to_string()),
                Some(output_dir),
                BatchResult::with_total(total),
            )
        }
    };

    run.enter(RunState::Running);
    tracing::info!(
        total,
        workers,
        output = %output_dir.display(),
        "Batch started"
    );
    observer.on_progress(&ProgressEvent {
        completed: 0,
        total,
        message: format!("Starting... (0/{})\nOutput: {}", total, output_dir.display()),
    });

    let settings = request.convert_settings();
    let mut tally = Tally {
        completed: 0,
        total,
        summary: BatchResult::with_total(total),
        observer,
    };
    let aborted = AtomicBool::new(false);
    let mut failure: Option<SetupError> = None;
    let (tx, rx) = crossbeam_channel::unbounded::<TaskReport>();

    pool.in_place_scope(|scope| {
        let mut submitted = 0usize;
        let mut received = 0usize;
        // destination -> source already dispatched to it
        let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();

        for source in &files {
            if stop.is_stopped() {
                tracing::info!(submitted, total, "Stop requested, no further dispatch");
                break;
            }

            let dest = match output_paths::resolve(source, &request.input_root, &output_dir) {
                Ok(dest) => dest,
                Err(err) => {
                    aborted.store(true, Ordering::SeqCst);
                    failure = Some(err.into());
                    break;
                }
            };

            if let Some(first) = claimed.get(&dest) {
                tally.duplicate(source, first);
                continue;
            }
            if dest.exists() {
                tally.skipped(source);
                continue;
            }
            claimed.insert(dest.clone(), source.clone());

            let item = WorkItem {
                source: source.clone(),
                dest,
            };
            let tx = tx.clone();
            let aborted = &aborted;
            submitted += 1;
            scope.spawn(move |_| {
                let report = if stop.is_stopped() || aborted.load(Ordering::SeqCst) {
                    TaskReport::Abandoned(item.source)
                } else {
                    let result = convert_guarded(converter, &item, &settings);
                    TaskReport::Finished(item.source, result)
                };
                // The coordinator holds the receiver until every report is in.
                let _ = tx.send(report);
            });

            for report in rx.try_iter() {
                received += 1;
                tally.record(report);
            }
        }

        while received < submitted {
            match rx.recv() {
                Ok(report) => {
                    received += 1;
                    tally.record(report);
                }
                Err(_) => break,
            }
        }
    });

    let Tally {
        completed, summary, ..
    } = tally;

    if let Some(err) = failure {
        return run.fail(err, Some(output_dir), summary);
    }

    let stopped = stop.is_stopped() && completed < total;
    let (status, message) = if stopped {
        (RunState::Stopped, format!("Stopped at {}/{}", completed, total))
    } else {
        (
            RunState::Completed,
            format!(
                "Done: {}/{} ({} converted, {} already present, {} failed)",
                completed, total, summary.succeeded, summary.skipped, summary.failed
            ),
        )
    };
    tracing::info!(
        status = %status,
        completed,
        total,
        converted = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        abandoned = summary.abandoned,
        "Batch finished"
    );

    run.finish(RunOutcome {
        status,
        output_dir: Some(output_dir),
        completed,
        total,
        summary,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ChannelObserver, RunEvent};
    use crate::request::ConvertSettings;
    use std::collections::HashSet;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records which sources it was asked to convert and writes a stub file.
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<PathBuf>>,
        fail_on: Option<&'static str>,
    }

    impl Converter for Recording {
        fn convert(&self, item: &WorkItem, _: &ConvertSettings) -> Result<(), ConversionError> {
            self.seen.lock().unwrap().push(item.source.clone());
            if self.fail_on.is_some_and(|name| item.source.ends_with(name)) {
                return Err(ConversionError::new(&item.source, "corrupt container"));
            }
            fs::write(&item.dest, b"png").unwrap();
            Ok(())
        }
    }

    /// Raises the stop flag from inside its `n`th conversion.
    struct StopAfter {
        n: usize,
        calls: AtomicUsize,
        stop: StopSignal,
    }

    impl Converter for StopAfter {
        fn convert(&self, _: &WorkItem, _: &ConvertSettings) -> Result<(), ConversionError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.n {
                self.stop.request_stop();
            }
            Ok(())
        }
    }

    fn input_with(names: &[&str]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for name in names {
            let path = temp.path().join("in").join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"").unwrap();
        }
        temp
    }

    fn ten_files() -> Vec<String> {
        (0..10).map(|i| format!("img_{}.heic", i)).collect()
    }

    fn request_for(temp: &TempDir) -> ConversionRequest {
        ConversionRequest::new(temp.path().join("in"), temp.path().join("out"))
    }

    fn drain(rx: &crossbeam_channel::Receiver<RunEvent>) -> Vec<RunEvent> {
        rx.try_iter().collect()
    }

    fn assert_single_terminal_done(events: &[RunEvent]) {
        let done = events
            .iter()
            .filter(|e| matches!(e, RunEvent::Done(_)))
            .count();
        assert_eq!(done, 1);
        assert!(matches!(events.last(), Some(RunEvent::Done(_))));
    }

    fn progress_counts(events: &[RunEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Progress(p) => Some(p.completed),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_resume_skips_existing_outputs() {
        let names = ten_files();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let temp = input_with(&names);
        let out = temp.path().join("out/Previous1");
        fs::create_dir_all(&out).unwrap();
        for i in 0..3 {
            fs::write(out.join(format!("img_{}.png", i)), b"done").unwrap();
        }

        let converter = Recording::default();
        let options = SchedulerOptions {
            workers: Some(4),
            resume_into: Some(out.clone()),
        };
        let (observer, rx) = ChannelObserver::new();
        let outcome = run_with(
            &request_for(&temp),
            &converter,
            &options,
            &StopSignal::new(),
            &observer,
        );

        assert_eq!(outcome.status, RunState::Completed);
        assert_eq!(outcome.completed, 10);
        assert_eq!(outcome.total, 10);
        assert_eq!(outcome.summary.skipped, 3);
        assert_eq!(outcome.summary.succeeded, 7);
        assert_eq!(outcome.output_dir, Some(out));

        let seen: HashSet<PathBuf> = converter.seen.lock().unwrap().iter().cloned().collect();
        assert_eq!(seen.len(), 7);
        for i in 0..3 {
            assert!(!seen.contains(&temp.path().join(format!("in/img_{}.heic", i))));
        }

        let events = drain(&rx);
        assert_eq!(progress_counts(&events), (0..=10).collect::<Vec<_>>());
        assert_single_terminal_done(&events);
    }

    #[test]
    fn test_fresh_run_allocates_indexed_directory() {
        let temp = input_with(&["a.heic", "nested/b.HEIF", "c.jpg"]);
        fs::create_dir_all(temp.path().join("out/ConvertToPNGOutput1")).unwrap();

        let converter = Recording::default();
        let (observer, rx) = ChannelObserver::new();
        let outcome = run_with(
            &request_for(&temp),
            &converter,
            &SchedulerOptions::default(),
            &StopSignal::new(),
            &observer,
        );

        let out = temp.path().join("out/ConvertToPNGOutput2");
        assert!(outcome.is_completed());
        assert_eq!(outcome.output_dir.as_deref(), Some(out.as_path()));
        assert!(out.join("a.png").is_file());
        assert!(out.join("nested/b.png").is_file());

        let events = drain(&rx);
        match &events[0] {
            RunEvent::Progress(p) => {
                assert_eq!((p.completed, p.total), (0, 2));
                assert!(p.message.contains(&out.display().to_string()));
            }
            other => panic!("expected initial progress, got {:?}", other),
        }
    }

    #[test]
    fn test_stop_after_two_items() {
        let names = ten_files();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let temp = input_with(&names);
        let stop = StopSignal::new();
        let converter = StopAfter {
            n: 2,
            calls: AtomicUsize::new(0),
            stop: stop.clone(),
        };
        let options = SchedulerOptions {
            workers: Some(1),
            ..Default::default()
        };

        let (observer, rx) = ChannelObserver::new();
        let outcome = run_with(&request_for(&temp), &converter, &options, &stop, &observer);

        assert_eq!(outcome.status, RunState::Stopped);
        assert!(outcome.completed >= 2 && outcome.completed <= 3, "{}", outcome.completed);
        assert!(outcome.message.starts_with("Stopped at"));
        assert!(outcome.output_dir.is_some());
        assert_eq!(converter.calls.load(Ordering::SeqCst), outcome.completed);

        let events = drain(&rx);
        assert_single_terminal_done(&events);
        assert_eq!(progress_counts(&events).last(), Some(&outcome.completed));
    }

    #[test]
    fn test_stop_before_start_dispatches_nothing() {
        let temp = input_with(&["a.heic", "b.heic"]);
        let stop = StopSignal::new();
        stop.request_stop();
        let converter = Recording::default();

        let (observer, _rx) = ChannelObserver::new();
        let outcome = run_with(
            &request_for(&temp),
            &converter,
            &SchedulerOptions::default(),
            &stop,
            &observer,
        );

        assert_eq!(outcome.status, RunState::Stopped);
        assert_eq!(outcome.completed, 0);
        assert!(converter.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_per_file_errors_do_not_abort_batch() {
        let temp = input_with(&["good1.heic", "bad.heic", "good2.heif"]);
        let converter = Recording {
            fail_on: Some("bad.heic"),
            ..Default::default()
        };

        let (observer, rx) = ChannelObserver::new();
        let outcome = run_with(
            &request_for(&temp),
            &converter,
            &SchedulerOptions::default(),
            &StopSignal::new(),
            &observer,
        );

        assert_eq!(outcome.status, RunState::Completed);
        assert_eq!(outcome.completed, 3);
        assert_eq!(outcome.summary.failed, 1);
        assert_eq!(outcome.summary.succeeded, 2);

        let errors: Vec<String> = drain(&rx)
            .into_iter()
            .filter_map(|e| match e {
                RunEvent::Error(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("bad.heic") && errors[0].contains("corrupt container"));
    }

    #[test]
    fn test_empty_input_fails_without_output_dir() {
        let temp = input_with(&["notes.txt"]);
        let (observer, rx) = ChannelObserver::new();
        let outcome = run_with(
            &request_for(&temp),
            &Recording::default(),
            &SchedulerOptions::default(),
            &StopSignal::new(),
            &observer,
        );

        assert_eq!(outcome.status, RunState::Failed);
        assert!(outcome.output_dir.is_none());
        assert!(outcome.message.starts_with("nothing to convert"));

        let events = drain(&rx);
        assert!(progress_counts(&events).is_empty());
        assert!(matches!(&events[0], RunEvent::Error(m) if m.starts_with("nothing to convert")));
        assert_single_terminal_done(&events);
    }

    #[test]
    fn test_missing_input_root_fails_before_allocation() {
        let temp = TempDir::new().unwrap();
        let request = ConversionRequest::new(temp.path().join("absent"), temp.path().join("out"));
        let (observer, _rx) = ChannelObserver::new();
        let outcome = run_with(
            &request,
            &Recording::default(),
            &SchedulerOptions::default(),
            &StopSignal::new(),
            &observer,
        );

        assert_eq!(outcome.status, RunState::Failed);
        assert!(outcome.output_dir.is_none());
        assert!(!temp.path().join("out").exists());
    }

    #[test]
    fn test_invalid_request_and_empty_base_fail() {
        let temp = input_with(&["a.heic"]);
        let mut request = request_for(&temp);
        request.resize_mode = crate::request::ResizeMode::Stretch;
        request.target_width = Some(10);

        let (observer, _rx) = ChannelObserver::new();
        let outcome = run_with(
            &request,
            &Recording::default(),
            &SchedulerOptions::default(),
            &StopSignal::new(),
            &observer,
        );
        assert_eq!(outcome.status, RunState::Failed);
        assert!(outcome.message.starts_with("invalid request"));

        let request = ConversionRequest::new(temp.path().join("in"), "");
        let outcome = run_with(
            &request,
            &Recording::default(),
            &SchedulerOptions::default(),
            &StopSignal::new(),
            &observer,
        );
        assert_eq!(outcome.status, RunState::Failed);
        assert_eq!(outcome.message, SetupError::EmptyOutputBase.to_string());
    }

    #[test]
    fn test_same_stem_inputs_share_one_destination() {
        let temp = input_with(&["a.heic", "a.heif", "b.heic"]);
        let converter = Recording::default();
        let options = SchedulerOptions {
            workers: Some(4),
            ..Default::default()
        };

        let (observer, rx) = ChannelObserver::new();
        let outcome = run_with(
            &request_for(&temp),
            &converter,
            &options,
            &StopSignal::new(),
            &observer,
        );

        assert_eq!(outcome.status, RunState::Completed);
        assert_eq!(outcome.completed, 3);
        assert_eq!(outcome.summary.succeeded, 2);
        assert_eq!(outcome.summary.failed, 1);

        let seen = converter.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        let a_sources = seen
            .iter()
            .filter(|p| p.file_stem().is_some_and(|s| s == "a"))
            .count();
        assert_eq!(a_sources, 1);

        let errors: Vec<String> = drain(&rx)
            .into_iter()
            .filter_map(|e| match e {
                RunEvent::Error(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(
            errors[0].contains("a.heic") && errors[0].contains("a.heif"),
            "{}",
            errors[0]
        );
    }

    #[test]
    fn test_pool_width_never_exceeds_file_count() {
        assert_eq!(pool_width_for(Some(8), 3), 3);
        assert_eq!(pool_width_for(Some(2), 10), 2);
        assert_eq!(pool_width_for(None, 1), 1);
        assert_eq!(pool_width_for(Some(0), 0), 1);
        assert!(pool_width_for(None, 1000) <= shared_utils::thread_manager::MAX_POOL_WIDTH);
    }

    #[test]
    fn test_build_pool_reports_width() {
        let (pool, width) = build_pool(2).unwrap();
        assert_eq!(width, 2);
        assert_eq!(pool.current_num_threads(), 2);
    }

    #[test]
    fn test_default_width_handles_many_files() {
        let names: Vec<String> = (0..40).map(|i| format!("img_{:02}.heic", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let temp = input_with(&names);
        let converter = Recording::default();

        let (observer, _rx) = ChannelObserver::new();
        let outcome = run_with(
            &request_for(&temp),
            &converter,
            &SchedulerOptions::default(),
            &StopSignal::new(),
            &observer,
        );

        assert_eq!(outcome.status, RunState::Completed, "{}", outcome.message);
        assert_eq!(outcome.summary.succeeded, 40);
        assert_eq!(converter.seen.lock().unwrap().len(), 40);
    }

    #[test]
    fn test_resume_into_missing_dir_fails() {
        let temp = input_with(&["a.heic"]);
        let options = SchedulerOptions {
            resume_into: Some(temp.path().join("nope")),
            ..Default::default()
        };
        let (observer, _rx) = ChannelObserver::new();
        let outcome = run_with(
            &request_for(&temp),
            &Recording::default(),
            &options,
            &StopSignal::new(),
            &observer,
        );
        assert_eq!(outcome.status, RunState::Failed);
        assert!(outcome.output_dir.is_none());
    }
}
