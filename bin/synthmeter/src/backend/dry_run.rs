use std::fmt::Debug;

use synthmeter_generator::{
    event::{AgentMetricSample, TrafficSample},
    sink::{BulkInsert, MetricAgent, Reporter, TrafficStore},
    GenericError,
};
use tracing::debug;

/// Traffic store that only logs what it is given.
pub struct LogTrafficStore;

impl TrafficStore for LogTrafficStore {
    fn begin_bulk(&mut self) -> Box<dyn BulkInsert + '_> {
        Box::new(LogBulk { appended: 0 })
    }
}

struct LogBulk {
    appended: usize,
}

impl BulkInsert for LogBulk {
    fn append(&mut self, sample: &TrafficSample) {
        debug!(?sample, "Traffic sample.");
        self.appended += 1;
    }

    fn commit(self: Box<Self>) -> Result<usize, GenericError> {
        Ok(self.appended)
    }
}

/// Metric agent that only logs what it is given.
pub struct LogMetricAgent;

impl MetricAgent for LogMetricAgent {
    fn send(&mut self, sample: &AgentMetricSample) -> Result<(), GenericError> {
        debug!(?sample, "Agent metric.");
        Ok(())
    }
}

/// Reporter that only logs what it is given.
pub struct LogReporter {
    name: &'static str,
    reported: usize,
}

impl LogReporter {
    pub fn new(name: &'static str) -> Self {
        Self { name, reported: 0 }
    }
}

impl<E> Reporter<E> for LogReporter
where
    E: Debug,
{
    fn report(&mut self, event: E) -> Result<(), GenericError> {
        debug!(reporter = self.name, ?event, "Event.");
        self.reported += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), GenericError> {
        debug!(reporter = self.name, events = self.reported, "Reporter stopped.");
        Ok(())
    }
}
