//! Runs a validated [ActionGraph] across a pool of worker threads.
//!
//! One coordinator (the calling thread) owns all scheduling state. It counts how many of each
//! action's dependencies are still outstanding, hands ready actions to the workers over a
//! channel, and holds actions with an initial delay in a timer heap until they are due, so a
//! waiting action never ties up a worker. Workers send events back over a second channel. The
//! coordinator is the only caller of the [Report] implementation.

pub mod graph;
pub mod report;

use crate::core::wait::Cancelled;
use crate::core::{Action, Cluster, Selection};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
pub use graph::{ActionGraph, GraphError};
pub use report::{Outcome, Report, Reporter, RunReport};
use std::any::Any;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

/// How many actions may run at once when nothing else is specified.
pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOptions {
    /// The number of worker threads. Zero is treated as one.
    pub concurrency: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Selects, validates, and runs the actions `selection` picks out of `cluster`.
///
/// Returns [Err] only if the selected actions do not form a valid graph, in which case nothing
/// has run. Action failures are reported in the returned [RunReport].
pub fn run_plan(
    cluster: &Cluster,
    selection: &Selection,
    options: &RunOptions,
    reporter: &mut impl Report,
) -> Result<RunReport, GraphError> {
    let graph = ActionGraph::build(selection.select(cluster))?;
    graph.check_nodes(cluster)?;
    tracing::info!(
        operation = %selection.operation,
        actions = graph.len(),
        "Running plan",
    );
    Ok(execute(cluster, &graph, options, reporter))
}

/// Messages from workers to the coordinator.
enum Event {
    Started(usize),
    Finished(usize, Outcome),
}

/// Runs every action in `graph` and returns each one's outcome.
pub fn execute(
    cluster: &Cluster,
    graph: &ActionGraph,
    options: &RunOptions,
    reporter: &mut impl Report,
) -> RunReport {
    let start = Instant::now();
    let (job_tx, job_rx) = channel::unbounded::<usize>();
    let (event_tx, event_rx) = channel::unbounded::<Event>();

    let outcomes = thread::scope(|scope| {
        for _ in 0..options.concurrency.max(1) {
            let jobs = job_rx.clone();
            let events = event_tx.clone();
            scope.spawn(move || work(cluster, graph, jobs, events));
        }

        let mut coordinator = Coordinator {
            cluster,
            graph,
            reporter,
            jobs: job_tx,
            queued_jobs: job_rx,
            waiting: (0..graph.len()).map(|i| graph.dependencies(i).len()).collect(),
            outcomes: vec![None; graph.len()],
            unfinished: graph.len(),
            timers: BinaryHeap::new(),
            cancelled: false,
        };
        coordinator.run(&event_rx);
        // Dropping the coordinator closes the job channel, which stops the workers.
        coordinator.outcomes
    });

    RunReport {
        outcomes: graph
            .order()
            .iter()
            .map(|&i| {
                let outcome = outcomes[i].clone().unwrap_or(Outcome::Cancelled);
                (graph.actions()[i].id().clone(), outcome)
            })
            .collect(),
        elapsed: start.elapsed(),
    }
}

struct Coordinator<'a, R: Report> {
    cluster: &'a Cluster,
    graph: &'a ActionGraph,
    reporter: &'a mut R,

    jobs: Sender<usize>,

    /// A receiving end of [Self::jobs], used to take back jobs no worker has picked up yet.
    queued_jobs: Receiver<usize>,

    /// How many of each action's dependencies have not succeeded yet.
    waiting: Vec<usize>,

    outcomes: Vec<Option<Outcome>>,

    /// How many actions have no outcome yet.
    unfinished: usize,

    /// Actions that are ready but serving their initial delay, soonest first.
    timers: BinaryHeap<Reverse<(Instant, usize)>>,

    cancelled: bool,
}

impl<R: Report> Coordinator<'_, R> {
    fn run(&mut self, events: &Receiver<Event>) {
        let graph = self.graph;
        for &i in graph.order() {
            if self.waiting[i] == 0 {
                self.schedule(i);
            }
        }

        while self.unfinished > 0 {
            if !self.cancelled && self.cluster.env().cancellation().is_cancelled() {
                self.cancel();
                continue;
            }

            let cancellation = match self.cancelled {
                true => channel::never(),
                false => self.cluster.env().cancellation().receiver().clone(),
            };
            let timer = match self.timers.peek() {
                Some(Reverse((due, _))) => channel::at(*due),
                None => channel::never(),
            };

            select! {
                recv(events) -> event => match event {
                    Ok(Event::Started(i)) => self.started(i),
                    Ok(Event::Finished(i, outcome)) => self.finished(i, outcome),
                    Err(_) => {
                        tracing::error!("Every worker exited before the run finished");
                        break;
                    }
                },
                recv(cancellation) -> _ => self.cancel(),
                recv(timer) -> _ => self.fire_timers(),
            }
        }
    }

    fn action(&self, index: usize) -> &Action {
        &self.graph.actions()[index]
    }

    /// Sends a ready action to the workers, or to the timer heap if it has an initial delay.
    fn schedule(&mut self, index: usize) {
        let delay = self.action(index).initial_delay();
        if delay.is_zero() {
            self.dispatch(index);
        } else {
            tracing::debug!(action = %self.action(index).id(), ?delay, "Delaying action");
            self.timers.push(Reverse((Instant::now() + delay, index)));
        }
    }

    fn dispatch(&mut self, index: usize) {
        if self.jobs.send(index).is_err() {
            self.record(index, Outcome::Failed("no worker is available".to_string()));
        }
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        while let Some(&Reverse((due, index))) = self.timers.peek() {
            if due > now {
                break;
            }
            self.timers.pop();
            self.dispatch(index);
        }
    }

    fn started(&mut self, index: usize) {
        let id = self.action(index).id().clone();
        if let Err(err) = self.reporter.starting(&id) {
            tracing::warn!("Could not report that {id} is starting: {err}");
        }
    }

    fn finished(&mut self, index: usize, outcome: Outcome) {
        // An action may notice cancellation before the coordinator does.
        if outcome == Outcome::Cancelled && !self.cancelled {
            self.cancel();
        }

        let succeeded = outcome.is_success();
        self.record(index, outcome);

        if succeeded {
            let graph = self.graph;
            for &dependent in graph.dependents(index) {
                self.waiting[dependent] -= 1;
                if self.waiting[dependent] == 0 && self.outcomes[dependent].is_none() {
                    self.schedule(dependent);
                }
            }
        } else {
            self.skip_dependents(index);
        }
    }

    /// Marks every direct and indirect dependent of `index` that has no outcome yet as skipped.
    fn skip_dependents(&mut self, index: usize) {
        let failed = self.action(index).id().clone();
        let mut stack: Vec<usize> = self.graph.dependents(index).iter().copied().collect();
        while let Some(i) = stack.pop() {
            if self.outcomes[i].is_some() {
                continue;
            }
            self.record(
                i,
                Outcome::Skipped {
                    failed: failed.clone(),
                },
            );
            stack.extend(self.graph.dependents(i));
        }
    }

    /// Stops dispatching and marks every action that has not started as cancelled.
    ///
    /// Actions already running are left alone; their outcomes arrive as usual.
    fn cancel(&mut self) {
        tracing::warn!("Run cancelled; waiting for running actions to finish");
        self.cancelled = true;

        let mut not_started: Vec<usize> = self.queued_jobs.try_iter().collect();
        not_started.extend(self.timers.drain().map(|Reverse((_, i))| i));
        for i in not_started {
            self.record(i, Outcome::Cancelled);
        }

        // Actions that were never ready.
        let graph = self.graph;
        for &i in graph.order() {
            if self.outcomes[i].is_none() && self.waiting[i] > 0 {
                self.record(i, Outcome::Cancelled);
            }
        }
    }

    fn record(&mut self, index: usize, outcome: Outcome) {
        if self.outcomes[index].is_some() {
            tracing::error!(
                action = %self.action(index).id(),
                "Ignoring a second outcome: {outcome}",
            );
            return;
        }

        let id = self.action(index).id().clone();
        if let Err(err) = self.reporter.report(&id, &outcome) {
            tracing::warn!("Could not report the outcome of {id}: {err}");
        }
        self.outcomes[index] = Some(outcome);
        self.unfinished -= 1;
    }
}

/// A worker thread's main loop. Returns when the job channel closes.
fn work(cluster: &Cluster, graph: &ActionGraph, jobs: Receiver<usize>, events: Sender<Event>) {
    for index in jobs {
        let action = &graph.actions()[index];
        let outcome = if cluster.env().cancellation().is_cancelled() {
            Outcome::Cancelled
        } else {
            // The coordinator outlives every worker, so a failed send means it panicked.
            if events.send(Event::Started(index)).is_err() {
                return;
            }
            call(cluster, action)
        };
        if events.send(Event::Finished(index, outcome)).is_err() {
            return;
        }
    }
}

/// Runs one action on its node and converts the result into an [Outcome].
fn call(cluster: &Cluster, action: &Action) -> Outcome {
    let node = action.id().node().and_then(|name| cluster.node(name));
    let log = node.map_or(cluster.log(), |node| node.log());
    log.notice(format!("Starting {}", action.id().kind()));

    let result = panic::catch_unwind(AssertUnwindSafe(|| action.call(cluster, node)));
    let outcome = match result {
        Ok(Ok(())) => Outcome::Succeeded,
        Ok(Err(err)) if err.downcast_ref::<Cancelled>().is_some() => Outcome::Cancelled,
        Ok(Err(err)) => Outcome::Failed(format!("{err:#}")),
        Err(payload) => Outcome::Failed(format!("panicked: {}", panic_message(&*payload))),
    };

    match &outcome {
        Outcome::Succeeded => log.notice(format!("Completed {}", action.id().kind())),
        Outcome::Failed(cause) => log.error(format!("{} failed: {cause}", action.id().kind())),
        _ => log.warning(format!("{} {outcome}", action.id().kind())),
    }
    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown cause"
    }
}
