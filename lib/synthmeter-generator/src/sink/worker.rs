use std::thread::JoinHandle;

use crossbeam_channel::{never, select, Receiver, Sender, TryRecvError};
use snafu::{IntoError as _, Snafu};
use tracing::{debug, info, warn};

use super::{MetricAgent, Reporter, TrafficStore};
use crate::{
    event::{AgentMetricSample, ExchangeEvent, MeteringEvent, TrafficSample},
    GenericError,
};

const TRAFFIC_WORKER: &str = "synthmeter-traffic";
const AGENT_WORKER: &str = "synthmeter-agent";
const METERING_WORKER: &str = "synthmeter-meter";

/// A worker error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum WorkerError {
    /// The worker thread could not be spawned.
    #[snafu(display("Failed to spawn worker thread '{}'.", worker))]
    Spawn {
        /// Worker name.
        worker: &'static str,

        /// Error source.
        source: std::io::Error,
    },

    /// A collaborator failed to start.
    #[snafu(display("Failed to start collaborator for worker '{}': {}", worker, source))]
    Start {
        /// Worker name.
        worker: &'static str,

        /// Error source.
        source: GenericError,
    },

    /// The worker thread panicked.
    #[snafu(display("Worker thread '{}' panicked.", worker))]
    Panicked {
        /// Worker name.
        worker: &'static str,
    },
}

/// Fires the stop signal.
///
/// Dropping the trigger has the same effect as calling [`StopTrigger::trigger`].
pub struct StopTrigger {
    _tx: Sender<()>,
}

impl StopTrigger {
    /// Stops every worker observing the paired [`StopSignal`].
    pub fn trigger(self) {}
}

/// Stop signal observed by sink workers.
///
/// The signal never carries a value: it fires when its [`StopTrigger`] is dropped, which every clone observes exactly
/// once, as a disconnection.
#[derive(Clone)]
pub struct StopSignal {
    rx: Receiver<()>,
}

impl StopSignal {
    /// Returns the underlying receiver, for use in `select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Returns `true` if the signal has fired.
    pub fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

/// Creates a linked stop trigger and signal.
pub fn stop_signal() -> (StopTrigger, StopSignal) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (StopTrigger { _tx: tx }, StopSignal { rx })
}

/// Delivery counters of a worker.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WorkerStats {
    /// Items taken off the worker's channel(s).
    pub received: u64,

    /// Items handed to the collaborator successfully.
    pub delivered: u64,

    /// Items dropped after a delivery failure.
    pub failed: u64,
}

impl WorkerStats {
    fn record<T>(&mut self, worker: &'static str, what: &'static str, result: Result<T, GenericError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.delivered += 1;
                Some(value)
            }
            Err(e) => {
                self.failed += 1;
                warn!(worker, error = %e, "Failed to deliver {}. Dropping.", what);
                None
            }
        }
    }
}

/// Handle to a running sink worker.
pub struct WorkerHandle {
    name: &'static str,
    handle: JoinHandle<WorkerStats>,
}

impl WorkerHandle {
    /// Returns the worker name, which is also the name of its thread.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Waits for the worker to stop, returning its delivery counters.
    ///
    /// # Errors
    ///
    /// If the worker thread panicked, an error is returned.
    pub fn join(self) -> Result<WorkerStats, WorkerError> {
        let worker = self.name;
        self.handle.join().map_err(|_| Panicked { worker }.build())
    }
}

fn spawn_named<F>(worker: &'static str, f: F) -> Result<WorkerHandle, WorkerError>
where
    F: FnOnce() -> WorkerStats + Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name(worker.to_string())
        .spawn(f)
        .map_err(|source| Spawn { worker }.into_error(source))?;

    debug!(worker, "Spawned sink worker.");
    Ok(WorkerHandle { name: worker, handle })
}

/// Spawns the traffic worker.
///
/// Each batch received is written to `store` as one bulk insertion. A failed commit drops the batch and the worker
/// carries on.
///
/// # Errors
///
/// If the worker thread cannot be spawned, an error is returned.
pub fn spawn_traffic_worker<S>(
    mut store: S, queue: Receiver<Vec<TrafficSample>>, stop: StopSignal,
) -> Result<WorkerHandle, WorkerError>
where
    S: TrafficStore + 'static,
{
    spawn_named(TRAFFIC_WORKER, move || {
        let mut stats = WorkerStats::default();

        loop {
            select! {
                recv(queue) -> batch => match batch {
                    Ok(batch) => {
                        stats.received += 1;

                        let mut bulk = store.begin_bulk();
                        for sample in &batch {
                            bulk.append(sample);
                        }

                        if let Some(written) = stats.record(TRAFFIC_WORKER, "traffic batch", bulk.commit()) {
                            debug!(samples = written, "Committed traffic batch.");
                        }
                    }
                    Err(_) => break,
                },
                recv(stop.receiver()) -> _ => break,
            }
        }

        info!(worker = TRAFFIC_WORKER, batches = stats.received, failed = stats.failed, "Sink worker stopped.");
        stats
    })
}

/// Spawns the agent worker.
///
/// Each sample received is sent to `agent` individually. A failed send drops the sample and the worker carries on.
///
/// # Errors
///
/// If the worker thread cannot be spawned, an error is returned.
pub fn spawn_agent_worker<A>(
    mut agent: A, queue: Receiver<AgentMetricSample>, stop: StopSignal,
) -> Result<WorkerHandle, WorkerError>
where
    A: MetricAgent + 'static,
{
    spawn_named(AGENT_WORKER, move || {
        let mut stats = WorkerStats::default();

        loop {
            select! {
                recv(queue) -> sample => match sample {
                    Ok(sample) => {
                        stats.received += 1;
                        stats.record(AGENT_WORKER, "agent metric", agent.send(&sample));
                    }
                    Err(_) => break,
                },
                recv(stop.receiver()) -> _ => break,
            }
        }

        info!(worker = AGENT_WORKER, samples = stats.received, failed = stats.failed, "Sink worker stopped.");
        stats
    })
}

/// The optional exchange side of the metering worker.
pub struct ExchangeLane {
    reporter: Box<dyn Reporter<ExchangeEvent>>,
    queue: Receiver<ExchangeEvent>,
}

impl ExchangeLane {
    /// Creates a new `ExchangeLane` draining `queue` into `reporter`.
    pub fn new<R>(reporter: R, queue: Receiver<ExchangeEvent>) -> Self
    where
        R: Reporter<ExchangeEvent> + 'static,
    {
        Self {
            reporter: Box::new(reporter),
            queue,
        }
    }
}

/// A started reporter, stopped when dropped.
struct StartedReporter<E> {
    name: &'static str,
    reporter: Box<dyn Reporter<E>>,
}

impl<E> StartedReporter<E> {
    fn start<R>(name: &'static str, mut reporter: R) -> Result<Self, WorkerError>
    where
        R: Reporter<E> + 'static,
    {
        reporter
            .start()
            .map_err(|source| Start { worker: METERING_WORKER }.into_error(source))?;

        Ok(Self {
            name,
            reporter: Box::new(reporter),
        })
    }

    fn report(&mut self, event: E) -> Result<(), GenericError> {
        self.reporter.report(event)
    }
}

impl<E> Drop for StartedReporter<E> {
    fn drop(&mut self) {
        if let Err(e) = self.reporter.stop() {
            warn!(worker = METERING_WORKER, reporter = self.name, error = %e, "Failed to stop reporter.");
        }
    }
}

/// Spawns the metering worker.
///
/// Metering events are forwarded to `reporter`, and exchange events, if an exchange lane is given, to the lane's
/// reporter. Both reporters are started before the worker thread is spawned and stopped, flushing any buffered
/// events, once the worker is told to stop. A reporter that was started is also stopped if the worker fails to
/// start.
///
/// # Errors
///
/// If a reporter fails to start, or the worker thread cannot be spawned, an error is returned.
pub fn spawn_metering_worker<M>(
    reporter: M, queue: Receiver<MeteringEvent>, exchange: Option<ExchangeLane>, stop: StopSignal,
) -> Result<WorkerHandle, WorkerError>
where
    M: Reporter<MeteringEvent> + 'static,
{
    let mut reporter = StartedReporter::<MeteringEvent>::start("metering", reporter)?;
    let (mut exchange_reporter, exchange_queue) = match exchange {
        Some(ExchangeLane { reporter, queue }) => {
            let reporter = StartedReporter::<ExchangeEvent>::start("exchange", reporter)?;
            (Some(reporter), queue)
        }
        None => (None, never()),
    };

    spawn_named(METERING_WORKER, move || {
        let mut stats = WorkerStats::default();

        loop {
            select! {
                recv(queue) -> event => match event {
                    Ok(event) => {
                        stats.received += 1;
                        stats.record(METERING_WORKER, "metering event", reporter.report(event));
                    }
                    Err(_) => break,
                },
                recv(exchange_queue) -> event => match (event, exchange_reporter.as_mut()) {
                    (Ok(event), Some(exchange_reporter)) => {
                        stats.received += 1;
                        stats.record(METERING_WORKER, "exchange event", exchange_reporter.report(event));
                    }
                    (Ok(_), None) => {}
                    (Err(_), _) => break,
                },
                recv(stop.receiver()) -> _ => break,
            }
        }

        // Flushes the metering reporter, then the exchange reporter.
        drop(reporter);
        drop(exchange_reporter);

        info!(worker = METERING_WORKER, events = stats.received, failed = stats.failed, "Sink worker stopped.");
        stats
    })
}
