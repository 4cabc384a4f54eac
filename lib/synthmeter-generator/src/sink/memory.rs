//! In-memory collaborators.
//!
//! These record every delivered item in a [`Record`] that can be inspected from another thread while the owning worker
//! is running, and can be told to fail upcoming deliveries.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{BulkInsert, MetricAgent, Reporter, TrafficStore};
use crate::{
    event::{AgentMetricSample, TrafficSample},
    GenericError,
};

struct RecordState<T> {
    items: Vec<T>,
    pending_failures: usize,
    fail_start: bool,
    started: bool,
    stopped: bool,
}

/// Shared record of delivered items.
pub struct Record<T> {
    state: Arc<Mutex<RecordState<T>>>,
}

impl<T> Clone for Record<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for Record<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(RecordState {
                items: Vec::new(),
                pending_failures: 0,
                fail_start: false,
                started: false,
                stopped: false,
            })),
        }
    }
}

impl<T> Record<T> {
    fn lock(&self) -> MutexGuard<'_, RecordState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, item: T) -> Result<(), GenericError> {
        let mut state = self.lock();
        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(anyhow::anyhow!("Delivery rejected by in-memory collaborator."));
        }

        state.items.push(item);
        Ok(())
    }

    /// Makes the next `count` deliveries fail.
    pub fn fail_next(&self, count: usize) {
        self.lock().pending_failures = count;
    }

    /// Makes the collaborator fail to start.
    pub fn fail_start(&self) {
        self.lock().fail_start = true;
    }

    /// Returns the number of recorded items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Returns `true` if the collaborator was started.
    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// Returns `true` if the collaborator was stopped.
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }
}

impl<T: Clone> Record<T> {
    /// Returns a copy of every recorded item, in delivery order.
    pub fn items(&self) -> Vec<T> {
        self.lock().items.clone()
    }
}

impl Record<Vec<TrafficSample>> {
    /// Returns every committed batch, in commit order.
    pub fn batches(&self) -> Vec<Vec<TrafficSample>> {
        self.items()
    }

    /// Returns the number of samples across all committed batches.
    pub fn sample_count(&self) -> usize {
        self.lock().items.iter().map(Vec::len).sum()
    }
}

/// Traffic store keeping every committed batch in memory.
#[derive(Default)]
pub struct RecordingTrafficStore {
    record: Record<Vec<TrafficSample>>,
}

impl RecordingTrafficStore {
    /// Returns a handle to the committed batches.
    pub fn record(&self) -> Record<Vec<TrafficSample>> {
        self.record.clone()
    }
}

struct RecordingBulk<'a> {
    record: &'a Record<Vec<TrafficSample>>,
    samples: Vec<TrafficSample>,
}

impl BulkInsert for RecordingBulk<'_> {
    fn append(&mut self, sample: &TrafficSample) {
        self.samples.push(sample.clone());
    }

    fn commit(self: Box<Self>) -> Result<usize, GenericError> {
        let written = self.samples.len();
        self.record.deliver(self.samples)?;
        Ok(written)
    }
}

impl TrafficStore for RecordingTrafficStore {
    fn begin_bulk(&mut self) -> Box<dyn BulkInsert + '_> {
        Box::new(RecordingBulk {
            record: &self.record,
            samples: Vec::new(),
        })
    }
}

/// Metric agent keeping every sample in memory.
#[derive(Default)]
pub struct RecordingMetricAgent {
    record: Record<AgentMetricSample>,
}

impl RecordingMetricAgent {
    /// Returns a handle to the delivered samples.
    pub fn record(&self) -> Record<AgentMetricSample> {
        self.record.clone()
    }
}

impl MetricAgent for RecordingMetricAgent {
    fn send(&mut self, sample: &AgentMetricSample) -> Result<(), GenericError> {
        self.record.deliver(sample.clone())
    }
}

/// Reporter keeping every event in memory.
pub struct RecordingReporter<E> {
    record: Record<E>,
}

impl<E> Default for RecordingReporter<E> {
    fn default() -> Self {
        Self {
            record: Record::default(),
        }
    }
}

impl<E> RecordingReporter<E> {
    /// Returns a handle to the reported events.
    pub fn record(&self) -> Record<E> {
        self.record.clone()
    }
}

impl<E: Send> Reporter<E> for RecordingReporter<E> {
    fn start(&mut self) -> Result<(), GenericError> {
        let mut state = self.record.lock();
        if state.fail_start {
            return Err(anyhow::anyhow!("In-memory reporter configured to fail on start."));
        }

        state.started = true;
        Ok(())
    }

    fn report(&mut self, event: E) -> Result<(), GenericError> {
        self.record.deliver(event)
    }

    fn stop(&mut self) -> Result<(), GenericError> {
        self.record.lock().stopped = true;
        Ok(())
    }
}
