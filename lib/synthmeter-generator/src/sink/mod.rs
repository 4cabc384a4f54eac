//! Delivery collaborators and the workers that drive them.
//!
//! Each collaborator is owned by exactly one worker thread, so implementations only need to be [`Send`].

use crate::{
    event::{AgentMetricSample, TrafficSample},
    GenericError,
};

pub mod memory;

mod worker;
pub use self::worker::{
    spawn_agent_worker, spawn_metering_worker, spawn_traffic_worker, stop_signal, ExchangeLane, StopSignal,
    StopTrigger, WorkerError, WorkerHandle, WorkerStats,
};

/// A single bulk insertion into the storage backend.
pub trait BulkInsert {
    /// Appends a sample to the bulk insertion.
    fn append(&mut self, sample: &TrafficSample);

    /// Commits the bulk insertion, returning the number of samples written.
    ///
    /// # Errors
    ///
    /// If the backend rejects the insertion, an error is returned.
    fn commit(self: Box<Self>) -> Result<usize, GenericError>;
}

/// Bulk storage for traffic samples.
pub trait TrafficStore: Send {
    /// Begins a new bulk insertion.
    fn begin_bulk(&mut self) -> Box<dyn BulkInsert + '_>;
}

/// Metric agent accepting individual business metric samples.
pub trait MetricAgent: Send {
    /// Sends a single sample.
    ///
    /// # Errors
    ///
    /// If the sample cannot be delivered, an error is returned.
    fn send(&mut self, sample: &AgentMetricSample) -> Result<(), GenericError>;
}

/// Reporter for metering or exchange events.
///
/// Reporters own their buffering: `report` may only enqueue the event, and `stop` must flush whatever is pending.
pub trait Reporter<E>: Send {
    /// Starts the reporter.
    ///
    /// # Errors
    ///
    /// If the reporter cannot be started, an error is returned.
    fn start(&mut self) -> Result<(), GenericError> {
        Ok(())
    }

    /// Reports a single event.
    ///
    /// # Errors
    ///
    /// If the event cannot be reported, an error is returned.
    fn report(&mut self, event: E) -> Result<(), GenericError>;

    /// Stops the reporter, flushing any pending events.
    ///
    /// # Errors
    ///
    /// If pending events cannot be flushed, an error is returned.
    fn stop(&mut self) -> Result<(), GenericError> {
        Ok(())
    }
}

impl<T> TrafficStore for Box<T>
where
    T: TrafficStore + ?Sized,
{
    fn begin_bulk(&mut self) -> Box<dyn BulkInsert + '_> {
        (**self).begin_bulk()
    }
}

impl<T> MetricAgent for Box<T>
where
    T: MetricAgent + ?Sized,
{
    fn send(&mut self, sample: &AgentMetricSample) -> Result<(), GenericError> {
        (**self).send(sample)
    }
}

impl<E, T> Reporter<E> for Box<T>
where
    T: Reporter<E> + ?Sized,
{
    fn start(&mut self) -> Result<(), GenericError> {
        (**self).start()
    }

    fn report(&mut self, event: E) -> Result<(), GenericError> {
        (**self).report(event)
    }

    fn stop(&mut self) -> Result<(), GenericError> {
        (**self).stop()
    }
}
