use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::{BackendError, ExecutorError, Failure};
use crate::series::SeriesData;
use crate::task::QueryTask;

/// Resolved result of one task.
pub type Outcome = Result<SeriesData, Failure>;

/// Something that can execute a query against a metrics store.
///
/// Implementations must be safe to call from several workers at once. A call
/// may block for a long time or never return; the executor only waits for it
/// up to the per-task timeout, which is also handed to the backend so clients
/// with a native deadline can stop abandoned work themselves.
pub trait Backend: Send + Sync {
    fn fetch(&self, task: &QueryTask, timeout: Duration) -> Result<SeriesData, BackendError>;
}

impl<F> Backend for F
where
    F: Fn(&QueryTask) -> Result<SeriesData, BackendError> + Send + Sync,
{
    fn fetch(&self, task: &QueryTask, _: Duration) -> Result<SeriesData, BackendError> {
        self(task)
    }
}

/// Outcome of a task together with the time it spent in its worker.
#[derive(Debug)]
pub struct Resolved {
    pub outcome: Outcome,
    pub elapsed: Duration,
}

/// Outcomes of one executor run, one slot per input task, in declared order.
#[derive(Debug, Default)]
pub struct ResultTable {
    tasks: Vec<QueryTask>,
    slots: Vec<Resolved>,
}

impl ResultTable {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Outcome of the first task equal to `task`.
    pub fn get(&self, task: &QueryTask) -> Option<&Outcome> {
        self.tasks
            .iter()
            .position(|t| t == task)
            .map(|i| &self.slots[i].outcome)
    }

    pub fn outcome(&self, index: usize) -> Option<&Outcome> {
        self.slots.get(index).map(|slot| &slot.outcome)
    }

    pub fn elapsed(&self, index: usize) -> Option<Duration> {
        self.slots.get(index).map(|slot| slot.elapsed)
    }

    /// Tasks and their outcomes in the order the tasks were declared.
    pub fn iter(&self) -> impl Iterator<Item = (&QueryTask, &Outcome)> {
        self.tasks
            .iter()
            .zip(self.slots.iter().map(|slot| &slot.outcome))
    }

    pub fn failures(&self) -> usize {
        self.slots.iter().filter(|s| s.outcome.is_err()).count()
    }

    /// Consumes the table, yielding owned outcomes in declared order.
    pub fn into_outcomes(self) -> impl Iterator<Item = (QueryTask, Outcome)> {
        self.tasks
            .into_iter()
            .zip(self.slots.into_iter().map(|slot| slot.outcome))
    }
}

/// Runs query tasks on a bounded pool of workers, each task under its own
/// deadline.
#[derive(Debug, Clone, Copy)]
pub struct QueryExecutor {
    concurrency: usize,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(concurrency: usize, timeout: Duration) -> Result<Self, ExecutorError> {
        if concurrency == 0 {
            return Err(ExecutorError::InvalidConcurrency);
        }
        if timeout.is_zero() {
            return Err(ExecutorError::InvalidTimeout);
        }
        Ok(Self {
            concurrency,
            timeout,
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Executes every task and waits for all of them.
    ///
    /// The algorithm works as follows:
    /// 1. A dedicated pool of `concurrency` worker threads is built.
    /// 2. Every task is spawned into a FIFO scope on that pool, so idle
    ///    workers pick tasks up in declared order.
    /// 3. A worker hands the blocking `fetch` to a detached thread and waits
    ///    on a channel for at most `timeout`, counted from the moment it
    ///    picked the task up.
    /// 4. The outcome is sent back tagged with the task position, so results
    ///    land in pre-sized slots regardless of completion order.
    /// 5. The scope returns only once every task has an outcome.
    ///
    /// A fetch that misses its deadline is abandoned, not killed. Its thread
    /// may keep running but the late result is dropped.
    pub fn run<B>(&self, tasks: &[QueryTask], backend: Arc<B>) -> Result<ResultTable, ExecutorError>
    where
        B: Backend + ?Sized + 'static,
    {
        if tasks.is_empty() {
            return Ok(ResultTable::default());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("query-worker-{i}"))
            .build()?;

        let root_span = tracing::span!(Level::INFO, "running_queries");
        root_span.pb_set_length(tasks.len() as u64);
        root_span.pb_set_style(&crate::utils::style_bar());
        root_span.pb_set_message("Querying...");
        let _enter = root_span.enter();

        let timeout = self.timeout;
        let started = Instant::now();
        let (sender, receiver) = mpsc::channel::<(usize, Resolved)>();

        pool.scope_fifo(|s| {
            for (index, task) in tasks.iter().enumerate() {
                let sender = sender.clone();
                let backend = Arc::clone(&backend);
                let root_span = &root_span;

                s.spawn_fifo(move |_| {
                    let span = tracing::span!(parent: root_span, Level::INFO, "query", label = %task.label);
                    span.pb_set_style(&crate::utils::style_task());
                    span.pb_set_message(&format!("Querying {}", task.label));
                    let _enter = span.enter();

                    let start = Instant::now();
                    let outcome = resolve(index, task, backend, timeout);
                    let elapsed = start.elapsed();

                    match &outcome {
                        Ok(data) => tracing::info!(
                            label = %task.label,
                            series = data.series.len(),
                            ?elapsed,
                            "query finished"
                        ),
                        Err(failure) => tracing::warn!(
                            label = %task.label,
                            error = %failure,
                            ?elapsed,
                            "query failed"
                        ),
                    }

                    root_span.pb_inc(1);

                    // The receiver outlives the scope.
                    let _ = sender.send((index, Resolved { outcome, elapsed }));
                });
            }
        });

        drop(sender);

        let mut slots: Vec<Option<Resolved>> = tasks.iter().map(|_| None).collect();
        for (index, resolved) in receiver {
            slots[index] = Some(resolved);
        }

        let slots: Vec<Resolved> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Resolved {
                    outcome: Err(Failure::Backend(BackendError::Panicked(
                        "worker exited without reporting".into(),
                    ))),
                    elapsed: Duration::ZERO,
                })
            })
            .collect();

        let table = ResultTable {
            tasks: tasks.to_vec(),
            slots,
        };

        tracing::info!(
            tasks = table.len(),
            failures = table.failures(),
            elapsed = ?started.elapsed(),
            "queries complete"
        );

        Ok(table)
    }
}

fn resolve<B>(index: usize, task: &QueryTask, backend: Arc<B>, timeout: Duration) -> Outcome
where
    B: Backend + ?Sized + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let owned = task.clone();

    let spawned = thread::Builder::new()
        .name(format!("fetch-{index}"))
        .spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| backend.fetch(&owned, timeout)))
                .unwrap_or_else(|panic| Err(BackendError::Panicked(panic_message(panic))));

            // Fails once the deadline has passed and the worker moved on.
            let _ = tx.send(result);
        });

    if let Err(err) = spawned {
        return Err(Failure::Backend(BackendError::Other(format!(
            "couldn't spawn fetch thread: {err}"
        ))));
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(data)) => data.validate().map_err(Failure::from),
        Ok(Err(err)) => Err(Failure::Backend(err)),
        Err(RecvTimeoutError::Timeout) => Err(Failure::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(Failure::Backend(BackendError::Panicked(
            "fetch thread exited without a result".into(),
        ))),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown payload")
    }
}
