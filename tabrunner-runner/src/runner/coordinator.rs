// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run coordinator.
//!
//! The coordinator owns the run-generation counter, the aggregate result set,
//! and the runtime history. A run request partitions the working set into
//! groups and fans them out, either to local tab sessions (each popping one
//! test at a time so a slot is never idle while work remains) or to remote
//! workers (one invocation per group). Results stream back over a channel
//! tagged with the generation they were dispatched under; anything tagged
//! with an older generation is silently discarded. That fence is the sole
//! cancellation mechanism — superseded work is never interrupted, just
//! ignored.

use crate::{
    config::OrchestratorConfig,
    errors::StartRunError,
    events::{RunEvent, RunEventKind, RunStats},
    history::{FLUSH_DEBOUNCE, RuntimeHistory},
    runner::remote::{RemoteInvoker, work_tests_with_retry},
    schedule::group_tests,
    session::{SessionHandle, TestSpec},
    time::{StopwatchStart, stopwatch},
};
use chrono::Local;
use debug_ignore::DebugIgnore;
use future_queue::StreamExt as _;
use futures::{FutureExt as _, StreamExt as _, stream::FuturesUnordered};
use indexmap::IndexMap;
use std::{
    sync::Arc,
    time::Duration,
};
use tabrunner_metadata::{StatusSnapshot, TestResult, WorkRequest};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, warn};

/// Where a run executes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RunMode {
    /// Drive local tab sessions.
    Local,

    /// Dispatch one remote invocation per run group.
    #[default]
    Remote,
}

/// Options for one run request.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// The filter the working set was derived from. A request with an
    /// unchanged filter and no force flag is a no-op.
    pub grep: Option<String>,

    /// Start a new run even if the filter is unchanged.
    pub force: bool,

    /// Run only the tests that failed in the previous run.
    pub filter_failed: bool,

    /// Where to execute.
    pub mode: RunMode,
}

/// A handle to an in-flight run, used to wait for its completion.
///
/// There is no explicit completion event beyond the result stream going
/// quiet; callers needing a barrier pass this back to
/// [`RunCoordinator::wait`].
#[derive(Debug)]
pub struct RunHandle {
    generation: u64,
    joins: Vec<JoinHandle<()>>,
}

impl RunHandle {
    /// The generation this run was dispatched under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True if the request was a duplicate and no new run was started.
    pub fn is_noop(&self) -> bool {
        self.joins.is_empty()
    }
}

enum BatchOutcome {
    Results(Vec<TestResult>),
    InvocationFailed {
        batch_id: String,
        error: String,
        tests: Vec<String>,
    },
}

enum WaitStimulus {
    Outcome(u64, BatchOutcome),
    FlushDue,
    TaskDone,
}

type Reporter = DebugIgnore<Box<dyn FnMut(RunEvent) + Send>>;

/// Coordinates runs across local sessions and remote workers.
///
/// Explicitly constructed and passed to whoever needs it; the generation
/// counter lives here and nowhere else.
pub struct RunCoordinator {
    config: OrchestratorConfig,
    history: RuntimeHistory,
    sessions: Vec<SessionHandle>,
    invoker: Option<Arc<dyn RemoteInvoker>>,
    reporter: Reporter,

    generation: u64,
    grep: Option<String>,
    results: IndexMap<String, TestResult>,
    stats: RunStats,
    total_count: usize,
    worker_count: usize,
    is_remote: bool,
    stopwatch: StopwatchStart,
    flush_at: Option<Instant>,

    outcome_tx: mpsc::UnboundedSender<(u64, BatchOutcome)>,
    outcome_rx: mpsc::UnboundedReceiver<(u64, BatchOutcome)>,
}

impl std::fmt::Debug for BatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Results(results) => f.debug_tuple("Results").field(&results.len()).finish(),
            Self::InvocationFailed { batch_id, .. } => {
                f.debug_tuple("InvocationFailed").field(batch_id).finish()
            }
        }
    }
}

impl RunCoordinator {
    /// Creates a coordinator with no attached sessions or invoker.
    pub fn new(
        config: OrchestratorConfig,
        history: RuntimeHistory,
        reporter: impl FnMut(RunEvent) + Send + 'static,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            config,
            history,
            sessions: Vec::new(),
            invoker: None,
            reporter: DebugIgnore(Box::new(reporter)),
            generation: 0,
            grep: None,
            results: IndexMap::new(),
            stats: RunStats::default(),
            total_count: 0,
            worker_count: 0,
            is_remote: false,
            stopwatch: stopwatch(),
            flush_at: None,
            outcome_tx,
            outcome_rx,
        }
    }

    /// Attaches local tab sessions for [`RunMode::Local`] runs.
    pub fn attach_sessions(&mut self, sessions: Vec<SessionHandle>) {
        self.sessions = sessions;
    }

    /// Attaches the remote invoker for [`RunMode::Remote`] runs.
    pub fn attach_invoker(&mut self, invoker: Arc<dyn RemoteInvoker>) {
        self.invoker = Some(invoker);
    }

    /// The current run generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Statistics for the current run.
    pub fn run_stats(&self) -> RunStats {
        self.stats
    }

    /// The aggregated final results, in arrival order.
    pub fn results(&self) -> impl Iterator<Item = &TestResult> + '_ {
        self.results.values()
    }

    /// A full-state snapshot for a reconnecting client.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            run_id: self.generation,
            total_count: self.total_count,
            worker_count: self.worker_count,
            is_remote: self.is_remote,
            results: self.results.values().cloned().collect(),
        }
    }

    /// Starts a run over `test_names`.
    ///
    /// Increments the generation, clears prior results, partitions the
    /// working set, and fans it out per `options.mode`. Returns without
    /// waiting; results stream through the reporter as they arrive during
    /// [`wait`](Self::wait). A request whose filter is unchanged (no force,
    /// no failed-filter) is a no-op returning the current state.
    pub fn start_run(
        &mut self,
        test_names: Vec<String>,
        options: RunOptions,
    ) -> Result<RunHandle, StartRunError> {
        let same_filter = options.grep == self.grep;
        if self.generation > 0 && same_filter && !options.force && !options.filter_failed {
            debug!("filter unchanged, ignoring duplicate run request");
            return Ok(RunHandle {
                generation: self.generation,
                joins: Vec::new(),
            });
        }

        let working_set: Vec<String> = if options.filter_failed {
            self.results
                .values()
                .filter(|result| !result.passed())
                .map(|result| result.full_name.clone())
                .collect()
        } else {
            test_names
        };
        self.grep = options.grep.clone();

        match options.mode {
            RunMode::Local if self.sessions.is_empty() => return Err(StartRunError::NoSessions),
            RunMode::Remote if self.invoker.is_none() => return Err(StartRunError::NoInvoker),
            _ => {}
        }

        self.generation += 1;
        let generation = self.generation;
        self.results.clear();
        self.stats = RunStats {
            initial_run_count: working_set.len(),
            ..RunStats::default()
        };
        self.total_count = working_set.len();
        self.is_remote = options.mode == RunMode::Remote;
        self.stopwatch = stopwatch();

        let concurrency = match options.mode {
            RunMode::Remote => self.config.remote_concurrency,
            RunMode::Local => self.sessions.len(),
        };
        let groups = group_tests(&working_set, concurrency, &self.history);
        self.worker_count = match options.mode {
            RunMode::Remote => groups.len(),
            RunMode::Local => self.sessions.len(),
        };

        self.emit(RunEventKind::RunStarted {
            run_id: generation,
            initial_run_count: working_set.len(),
            worker_count: self.worker_count,
            is_remote: self.is_remote,
        });

        let joins = match options.mode {
            RunMode::Remote => self.dispatch_remote(generation, groups),
            RunMode::Local => self.dispatch_local(generation, groups),
        };

        Ok(RunHandle { generation, joins })
    }

    fn dispatch_remote(
        &self,
        generation: u64,
        groups: Vec<crate::schedule::RunGroup>,
    ) -> Vec<JoinHandle<()>> {
        let invoker = self
            .invoker
            .clone()
            .expect("checked in start_run: remote runs have an invoker");
        let deflake_limit = self.config.deflake_limit;
        let session_id = self.config.session_id;
        let concurrency = self.config.remote_concurrency;

        let invocations: Vec<_> = groups
            .into_iter()
            .enumerate()
            .map(|(index, group)| {
                let batch_id = format!("L{index}");
                let request = WorkRequest {
                    test_names: group.tests.clone(),
                    deflake_limit,
                    run_id: generation,
                    batch_id: Some(batch_id.clone()),
                    session_id,
                };
                let invoker = invoker.clone();
                let outcome_tx = self.outcome_tx.clone();
                move |_cx: future_queue::FutureQueueContext| {
                    async move {
                        debug!(batch = %batch_id, tests = request.test_names.len(), "invoking worker");
                        let outcome = match work_tests_with_retry(invoker.as_ref(), request).await {
                            Ok(response) => BatchOutcome::Results(
                                response
                                    .results
                                    .into_values()
                                    .filter_map(|attempts| attempts.into_iter().next_back())
                                    .collect(),
                            ),
                            Err(error) => BatchOutcome::InvocationFailed {
                                batch_id,
                                error: error.to_string(),
                                tests: group.tests,
                            },
                        };
                        let _ = outcome_tx.send((generation, outcome));
                    }
                    .boxed()
                }
            })
            .collect();

        vec![tokio::spawn(async move {
            futures::stream::iter(invocations.into_iter().map(|invocation| (1usize, invocation)))
                .future_queue(concurrency)
                .collect::<()>()
                .await;
        })]
    }

    fn dispatch_local(
        &self,
        generation: u64,
        groups: Vec<crate::schedule::RunGroup>,
    ) -> Vec<JoinHandle<()>> {
        groups
            .into_iter()
            .zip(self.sessions.iter().cloned())
            .map(|(group, session)| {
                let outcome_tx = self.outcome_tx.clone();
                tokio::spawn(async move {
                    for test_name in group.tests {
                        let spec = TestSpec {
                            test_name,
                            run_id: generation,
                        };
                        match session.set_test(spec).await {
                            Some(result) => {
                                let _ = outcome_tx
                                    .send((generation, BatchOutcome::Results(vec![result])));
                            }
                            // Superseded by a newer run, or the session died;
                            // either way this slot is done.
                            None => break,
                        }
                    }
                })
            })
            .collect()
    }

    /// Waits until every dispatched group has completed or been superseded,
    /// pumping results to the reporter as they arrive.
    pub async fn wait(&mut self, handle: RunHandle) -> RunStats {
        let mut tasks: FuturesUnordered<JoinHandle<()>> = handle.joins.into_iter().collect();

        while !tasks.is_empty() {
            let flush_at = self
                .flush_at
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            let stimulus = tokio::select! {
                outcome = self.outcome_rx.recv() => match outcome {
                    Some((generation, outcome)) => WaitStimulus::Outcome(generation, outcome),
                    None => unreachable!("coordinator holds an outcome sender"),
                },
                _ = tokio::time::sleep_until(flush_at), if self.flush_at.is_some() => {
                    WaitStimulus::FlushDue
                }
                join = tasks.next() => {
                    if let Some(Err(error)) = join {
                        warn!(%error, "run group task panicked");
                    }
                    WaitStimulus::TaskDone
                }
            };

            match stimulus {
                WaitStimulus::Outcome(generation, outcome) => self.ingest(generation, outcome),
                WaitStimulus::FlushDue => {
                    self.flush_at = None;
                    self.flush_history();
                }
                WaitStimulus::TaskDone => {}
            }
        }

        // Everything has been sent; drain what's still queued.
        while let Ok((generation, outcome)) = self.outcome_rx.try_recv() {
            self.ingest(generation, outcome);
        }

        self.flush_at = None;
        self.flush_history();

        let elapsed = self.stopwatch.snapshot().active;
        self.emit(RunEventKind::RunFinished {
            run_id: handle.generation,
            elapsed,
            run_stats: self.stats,
        });
        self.stats
    }

    /// Starts a run and waits for it to complete.
    pub async fn run_to_completion(
        &mut self,
        test_names: Vec<String>,
        options: RunOptions,
    ) -> Result<RunStats, StartRunError> {
        let handle = self.start_run(test_names, options)?;
        Ok(self.wait(handle).await)
    }

    /// Feeds a batch of final results into the aggregate.
    ///
    /// Results tagged with a generation older than the current one are
    /// dropped: they never appear in the aggregate set and never touch the
    /// runtime history.
    pub fn handle_results(&mut self, generation: u64, results: Vec<TestResult>) {
        self.ingest(generation, BatchOutcome::Results(results));
    }

    fn ingest(&mut self, generation: u64, outcome: BatchOutcome) {
        if generation != self.generation {
            debug!(
                stale = generation,
                current = self.generation,
                ?outcome,
                "discarding stale results"
            );
            return;
        }

        match outcome {
            BatchOutcome::Results(results) => {
                for result in results {
                    self.record_result(result);
                }
            }
            BatchOutcome::InvocationFailed {
                batch_id,
                error,
                tests,
            } => {
                warn!(batch = %batch_id, %error, "remote invocation failed");
                self.emit(RunEventKind::InvocationFailed {
                    batch_id: batch_id.clone(),
                    error: error.clone(),
                    test_count: tests.len(),
                });
                for test_name in tests {
                    self.record_result(TestResult {
                        full_name: test_name,
                        error: Some(error.clone()),
                        stack: None,
                        time: 0,
                        attempts: 1,
                        run_id: generation,
                        batch_id: Some(batch_id.clone()),
                        log_stream: None,
                    });
                }
            }
        }
    }

    fn record_result(&mut self, result: TestResult) {
        self.history.record(&result);
        if self.flush_at.is_none() {
            self.flush_at = Some(Instant::now() + FLUSH_DEBOUNCE);
        }

        if let Some(previous) = self
            .results
            .insert(result.full_name.clone(), result.clone())
        {
            self.stats.on_result_replaced(&previous);
        }
        self.stats.on_test_finished(&result);

        self.emit(RunEventKind::TestFinished {
            result,
            current_stats: self.stats,
        });
    }

    fn flush_history(&mut self) {
        if let Err(error) = self.history.flush() {
            warn!(%error, "failed to flush runtime history");
        }
    }

    fn emit(&mut self, kind: RunEventKind) {
        let snapshot = self.stopwatch.snapshot();
        (self.reporter)(RunEvent {
            timestamp: Local::now().fixed_offset(),
            elapsed: snapshot.active,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{SessionTimeouts, TabConfig},
        errors::InvokeError,
        session::{spawn_session, test_support::FakePageChannel},
    };
    use futures::future::BoxFuture;
    use pretty_assertions::assert_eq;
    use std::{
        collections::{BTreeMap, HashSet},
        sync::Mutex,
    };
    use tabrunner_metadata::{ListRequest, WorkResponse};

    /// A worker fleet that runs batches in memory: configured tests fail
    /// their first attempt and pass on the retry.
    struct FakeFleet {
        flaky: HashSet<String>,
        failing: HashSet<String>,
        deny: Option<String>,
    }

    impl FakeFleet {
        fn passing() -> Self {
            Self {
                flaky: HashSet::new(),
                failing: HashSet::new(),
                deny: None,
            }
        }

        fn with_failing(names: &[&str]) -> Self {
            Self {
                flaky: HashSet::new(),
                failing: names.iter().map(|n| (*n).to_owned()).collect(),
                deny: None,
            }
        }

        fn with_flaky(names: &[&str]) -> Self {
            Self {
                flaky: names.iter().map(|n| (*n).to_owned()).collect(),
                failing: HashSet::new(),
                deny: None,
            }
        }

        fn denying(message: &str) -> Self {
            Self {
                flaky: HashSet::new(),
                failing: HashSet::new(),
                deny: Some(message.to_owned()),
            }
        }

        fn result(&self, name: &str, run_id: u64, attempts: u32, failed: bool) -> TestResult {
            TestResult {
                full_name: name.to_owned(),
                error: failed.then(|| "assertion failed".to_owned()),
                stack: None,
                time: 25,
                attempts,
                run_id,
                batch_id: None,
                log_stream: Some("fleet-log".to_owned()),
            }
        }
    }

    impl RemoteInvoker for FakeFleet {
        fn work_tests(
            &self,
            request: WorkRequest,
        ) -> BoxFuture<'_, Result<WorkResponse, InvokeError>> {
            Box::pin(async move {
                if let Some(message) = &self.deny {
                    return Err(InvokeError::from_message(message.clone()));
                }
                let mut results = BTreeMap::new();
                for name in &request.test_names {
                    let attempts = if self.flaky.contains(name) {
                        vec![
                            self.result(name, request.run_id, 1, true),
                            self.result(name, request.run_id, 2, false),
                        ]
                    } else if self.failing.contains(name) {
                        (1..=request.deflake_limit)
                            .map(|attempt| self.result(name, request.run_id, attempt, true))
                            .collect()
                    } else {
                        vec![self.result(name, request.run_id, 1, false)]
                    };
                    results.insert(name.clone(), attempts);
                }
                Ok(WorkResponse {
                    results,
                    log_stream_name: "fleet-log".to_owned(),
                })
            })
        }

        fn list_tests(
            &self,
            _request: ListRequest,
        ) -> BoxFuture<'_, Result<Vec<String>, InvokeError>> {
            Box::pin(async { Ok(vec!["a".to_owned(), "b".to_owned()]) })
        }
    }

    fn coordinator_with(
        invoker: Option<Arc<dyn RemoteInvoker>>,
    ) -> (
        RunCoordinator,
        Arc<Mutex<Vec<RunEventKind>>>,
        camino_tempfile::Utf8TempDir,
    ) {
        let dir = camino_tempfile::Utf8TempDir::new().unwrap();
        let history = RuntimeHistory::empty(dir.path());
        let events: Arc<Mutex<Vec<RunEventKind>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut coordinator = RunCoordinator::new(
            OrchestratorConfig::new(dir.path().to_owned()),
            history,
            move |event| sink.lock().unwrap().push(event.kind),
        );
        if let Some(invoker) = invoker {
            coordinator.attach_invoker(invoker);
        }
        (coordinator, events, dir)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[tokio::test]
    async fn remote_run_aggregates_final_results() {
        let (mut coordinator, events, _dir) =
            coordinator_with(Some(Arc::new(FakeFleet::with_flaky(&["b"]))));

        let stats = coordinator
            .run_to_completion(names(&["a", "b", "c"]), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(stats.initial_run_count, 3);
        assert_eq!(stats.finished_count, 3);
        assert_eq!(stats.passed, 3);
        assert_eq!(stats.flaky, 1);
        assert!(stats.is_success());

        let flaky = coordinator
            .results()
            .find(|r| r.full_name == "b")
            .unwrap();
        assert_eq!(flaky.attempts, 2);
        assert!(flaky.passed());

        let events = events.lock().unwrap();
        assert!(matches!(events.first(), Some(RunEventKind::RunStarted { .. })));
        assert!(matches!(events.last(), Some(RunEventKind::RunFinished { .. })));
        let finished = events
            .iter()
            .filter(|e| matches!(e, RunEventKind::TestFinished { .. }))
            .count();
        assert_eq!(finished, 3);
    }

    #[tokio::test]
    async fn failing_tests_are_counted_and_history_updated() {
        let (mut coordinator, _events, _dir) =
            coordinator_with(Some(Arc::new(FakeFleet::with_failing(&["b"]))));

        let stats = coordinator
            .run_to_completion(names(&["a", "b"]), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(stats.failed, 1);
        assert!(!stats.is_success());
        // History saw the failure, so the next estimate reflects it.
        assert_eq!(
            coordinator.history.estimate("b"),
            Duration::from_millis(25)
        );
    }

    #[tokio::test]
    async fn invocation_failure_synthesizes_whole_batch_as_failed() {
        let (mut coordinator, events, _dir) =
            coordinator_with(Some(Arc::new(FakeFleet::denying("function not found"))));

        let stats = coordinator
            .run_to_completion(names(&["a", "b"]), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(stats.failed, 2);
        for result in coordinator.results() {
            assert!(result.error.as_deref().unwrap().contains("function not found"));
            assert!(result.batch_id.is_some());
        }

        // Reported distinctly from real test failures.
        let events = events.lock().unwrap();
        assert!(
            events
                .iter()
                .any(|e| matches!(e, RunEventKind::InvocationFailed { .. }))
        );
    }

    #[tokio::test]
    async fn stale_generation_results_are_discarded() {
        let (mut coordinator, _events, _dir) = coordinator_with(Some(Arc::new(FakeFleet::passing())));
        coordinator
            .run_to_completion(names(&["a"]), RunOptions::default())
            .await
            .unwrap();
        assert_eq!(coordinator.generation(), 1);
        let baseline = coordinator.results().count();

        let stale = TestResult {
            full_name: "ghost".to_owned(),
            error: None,
            stack: None,
            time: 1,
            attempts: 1,
            run_id: 0,
            batch_id: None,
            log_stream: None,
        };
        coordinator.handle_results(0, vec![stale.clone()]);
        assert_eq!(coordinator.results().count(), baseline);
        assert_eq!(coordinator.history.estimate("ghost"), crate::history::DEFAULT_ESTIMATE);

        let current = TestResult {
            full_name: "ghost".to_owned(),
            run_id: 1,
            ..stale
        };
        coordinator.handle_results(1, vec![current]);
        assert_eq!(coordinator.results().count(), baseline + 1);
    }

    #[tokio::test]
    async fn duplicate_run_request_is_a_noop() {
        let (mut coordinator, _events, _dir) = coordinator_with(Some(Arc::new(FakeFleet::passing())));
        let options = RunOptions {
            grep: Some("editor".to_owned()),
            ..RunOptions::default()
        };

        coordinator
            .run_to_completion(names(&["a"]), options.clone())
            .await
            .unwrap();
        assert_eq!(coordinator.generation(), 1);

        // Same filter, no force: nothing happens.
        let handle = coordinator
            .start_run(names(&["a"]), options.clone())
            .unwrap();
        assert!(handle.is_noop());
        assert_eq!(coordinator.generation(), 1);

        // Forcing always starts a new generation.
        let handle = coordinator
            .start_run(
                names(&["a"]),
                RunOptions {
                    force: true,
                    ..options.clone()
                },
            )
            .unwrap();
        assert!(!handle.is_noop());
        assert_eq!(coordinator.generation(), 2);
        coordinator.wait(handle).await;

        // Changing the filter also starts a new generation.
        let handle = coordinator
            .start_run(
                names(&["a"]),
                RunOptions {
                    grep: Some("viewer".to_owned()),
                    ..RunOptions::default()
                },
            )
            .unwrap();
        assert_eq!(coordinator.generation(), 3);
        coordinator.wait(handle).await;
    }

    #[tokio::test]
    async fn filter_failed_reruns_only_failures() {
        let (mut coordinator, _events, _dir) =
            coordinator_with(Some(Arc::new(FakeFleet::with_failing(&["b"]))));

        coordinator
            .run_to_completion(names(&["a", "b", "c"]), RunOptions::default())
            .await
            .unwrap();

        let stats = coordinator
            .run_to_completion(
                Vec::new(),
                RunOptions {
                    filter_failed: true,
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(stats.initial_run_count, 1);
        assert_eq!(coordinator.results().count(), 1);
        assert_eq!(coordinator.results().next().unwrap().full_name, "b");
    }

    #[tokio::test]
    async fn remote_run_without_invoker_is_a_setup_error() {
        let (mut coordinator, _events, _dir) = coordinator_with(None);
        let outcome = coordinator.start_run(names(&["a"]), RunOptions::default());
        assert!(matches!(outcome, Err(StartRunError::NoInvoker)));
    }

    #[tokio::test]
    async fn local_run_drives_tab_sessions() {
        let (mut coordinator, _events, _dir) = coordinator_with(None);
        let sessions: Vec<SessionHandle> = (0..2)
            .map(|index| {
                let channel = FakePageChannel::new();
                let (handle, _join) = spawn_session(
                    format!("w{index}"),
                    TabConfig::default(),
                    SessionTimeouts::default(),
                    format!("http://localhost:310{index}/worker?id={index}"),
                    Box::new(channel),
                );
                handle
            })
            .collect();
        coordinator.attach_sessions(sessions);

        let stats = coordinator
            .run_to_completion(
                names(&["a", "b", "c", "d", "e"]),
                RunOptions {
                    mode: RunMode::Local,
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(stats.finished_count, 5);
        assert_eq!(stats.passed, 5);

        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.worker_count, 2);
        assert!(!snapshot.is_remote);
        assert_eq!(snapshot.total_count, 5);
        assert_eq!(snapshot.results.len(), 5);
    }
}
