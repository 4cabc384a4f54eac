//! Fan-out driver.
//!
//! The driver is the only producer in the pipeline. It walks the catalog once per cycle, builds the events for every
//! operation, and hands each one to its sink worker over a zero-capacity channel: every send blocks until the worker is
//! ready to receive, so a slow collaborator stalls generation rather than letting events pile up.
//!
//! Shutdown is signalled by dropping senders. When the driver finishes, the data channels and the stop signal all
//! disconnect, and every worker observes that independently.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use rand::Rng;
use snafu::Snafu;
use tracing::{debug, error, info};

use crate::{
    builder::{EventBuilder, EventPair},
    catalog::Catalog,
    event::{AgentMetricSample, ExchangeEvent, MeteringEvent, TrafficSample},
    sink::{stop_signal, StopSignal, StopTrigger},
};

const PROGRESS_INTERVAL: u64 = 100;

/// A driver error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum DriverError {
    /// A sink worker is no longer receiving.
    #[snafu(display("Sink worker for the {} channel is no longer receiving.", channel))]
    SinkDisconnected {
        /// Name of the channel.
        channel: &'static str,
    },
}

/// Driver configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct DriverConfig {
    /// Number of cycles to run. Zero or less runs until the process is stopped.
    pub events: i64,

    /// Pause between cycles, if any.
    pub pause: Option<Duration>,
}

impl DriverConfig {
    /// Returns the number of cycles to run, or `None` if unbounded.
    pub fn cycles(&self) -> Option<u64> {
        u64::try_from(self.events).ok().filter(|cycles| *cycles > 0)
    }
}

/// Counters of what the driver produced.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DriverStats {
    /// Completed cycles.
    pub cycles: u64,

    /// Traffic batches sent.
    pub traffic_batches: u64,

    /// Traffic samples sent, across all batches.
    pub traffic_samples: u64,

    /// Agent metric samples sent.
    pub agent_metrics: u64,

    /// Metering events sent, counting both phases.
    pub metering_events: u64,

    /// Exchange events sent, counting both phases.
    pub exchange_events: u64,
}

/// Producer side of the pipeline channels.
pub struct PipelineSenders {
    traffic: Sender<Vec<TrafficSample>>,
    agent: Sender<AgentMetricSample>,
    metering: Sender<MeteringEvent>,
    exchange: Option<Sender<ExchangeEvent>>,
    stop: StopTrigger,
}

/// Consumer side of the pipeline channels, to be handed to the sink workers.
pub struct PipelineReceivers {
    /// Traffic batches.
    pub traffic: Receiver<Vec<TrafficSample>>,

    /// Agent metric samples.
    pub agent: Receiver<AgentMetricSample>,

    /// Metering events.
    pub metering: Receiver<MeteringEvent>,

    /// Exchange events, if the exchange is enabled.
    pub exchange: Option<Receiver<ExchangeEvent>>,

    /// Stop signal shared by every worker.
    pub stop: StopSignal,
}

/// Creates the pipeline channels.
///
/// All channels are zero-capacity. The exchange channel only exists when `exchange_enabled` is `true`.
pub fn pipeline(exchange_enabled: bool) -> (PipelineSenders, PipelineReceivers) {
    let (traffic_tx, traffic_rx) = crossbeam_channel::bounded(0);
    let (agent_tx, agent_rx) = crossbeam_channel::bounded(0);
    let (metering_tx, metering_rx) = crossbeam_channel::bounded(0);
    let (exchange_tx, exchange_rx) = if exchange_enabled {
        let (tx, rx) = crossbeam_channel::bounded(0);
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };
    let (stop_tx, stop_rx) = stop_signal();

    let senders = PipelineSenders {
        traffic: traffic_tx,
        agent: agent_tx,
        metering: metering_tx,
        exchange: exchange_tx,
        stop: stop_tx,
    };
    let receivers = PipelineReceivers {
        traffic: traffic_rx,
        agent: agent_rx,
        metering: metering_rx,
        exchange: exchange_rx,
        stop: stop_rx,
    };

    (senders, receivers)
}

/// The generation loop.
pub struct Driver<R> {
    catalog: Catalog,
    builder: EventBuilder<R>,
    config: DriverConfig,
    senders: PipelineSenders,
}

impl<R> Driver<R>
where
    R: Rng,
{
    /// Creates a new `Driver`.
    ///
    /// Exchange events are built if, and only if, the pipeline was created with an exchange channel.
    pub fn new(catalog: Catalog, builder: EventBuilder<R>, config: DriverConfig, senders: PipelineSenders) -> Self {
        let builder = builder.with_exchange(senders.exchange.is_some());
        Self {
            catalog,
            builder,
            config,
            senders,
        }
    }

    /// Runs the configured number of cycles, then stops every sink worker.
    ///
    /// With an unbounded configuration this only returns on error.
    ///
    /// # Errors
    ///
    /// If a sink worker stops receiving, generation stops and an error is returned. The remaining workers are stopped
    /// either way.
    pub fn run(self) -> Result<DriverStats, DriverError> {
        let Self {
            catalog,
            mut builder,
            config,
            senders,
        } = self;

        let cycles = config.cycles();
        let mut stats = DriverStats::default();
        info!(
            operations = catalog.len(),
            cycles = cycles.map_or_else(|| "unbounded".to_string(), |n| n.to_string()),
            sampler = %builder.sampler().kind(),
            exchange = builder.exchange_enabled(),
            "Starting generation."
        );

        while cycles.is_none_or(|limit| stats.cycles < limit) {
            if let Err(e) = run_cycle(&catalog, &mut builder, &senders, &mut stats) {
                error!(error = %e, cycle = stats.cycles, "Stopping generation.");
                return Err(e);
            }

            stats.cycles += 1;
            debug!(cycle = stats.cycles, "Finished generation cycle.");
            if stats.cycles % PROGRESS_INTERVAL == 0 {
                info!(
                    cycle = stats.cycles,
                    metering_events = stats.metering_events,
                    "Generation in progress."
                );
            }

            if let Some(pause) = config.pause {
                if cycles.is_none_or(|limit| stats.cycles < limit) {
                    std::thread::sleep(pause);
                }
            }
        }

        senders.stop.trigger();
        info!(?stats, "Generation complete.");
        Ok(stats)
    }
}

fn run_cycle<R>(
    catalog: &Catalog, builder: &mut EventBuilder<R>, senders: &PipelineSenders, stats: &mut DriverStats,
) -> Result<(), DriverError>
where
    R: Rng,
{
    for (operation_id, operation) in catalog.iter() {
        let events = builder.build_cycle(operation_id, operation);

        let samples = events.traffic.len() as u64;
        send(&senders.traffic, events.traffic, "traffic")?;
        stats.traffic_batches += 1;
        stats.traffic_samples += samples;

        for sample in events.agent_metrics {
            send(&senders.agent, sample, "agent")?;
            stats.agent_metrics += 1;
        }

        let EventPair { request, response } = events.metering;
        let (exchange_request, exchange_response) = match events.exchange {
            Some(EventPair { request, response }) => (Some(request), Some(response)),
            None => (None, None),
        };

        send(&senders.metering, request, "metering")?;
        stats.metering_events += 1;
        send_exchange(senders, exchange_request, stats)?;

        send(&senders.metering, response, "metering")?;
        stats.metering_events += 1;
        send_exchange(senders, exchange_response, stats)?;
    }

    Ok(())
}

fn send_exchange(
    senders: &PipelineSenders, event: Option<ExchangeEvent>, stats: &mut DriverStats,
) -> Result<(), DriverError> {
    if let (Some(tx), Some(event)) = (senders.exchange.as_ref(), event) {
        send(tx, event, "exchange")?;
        stats.exchange_events += 1;
    }
    Ok(())
}

fn send<T>(tx: &Sender<T>, item: T, channel: &'static str) -> Result<(), DriverError> {
    tx.send(item).map_err(|_| SinkDisconnected { channel }.build())
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng as _};

    use super::*;
    use crate::sampler::Sampler;

    fn catalog() -> Catalog {
        Catalog::from_json_str(r#"{"op": {"HTTPMethod": "GET", "Path": "/x/{id}"}}"#).unwrap()
    }

    fn builder() -> EventBuilder<StdRng> {
        EventBuilder::new(Sampler::ViolationFree, StdRng::seed_from_u64(1))
    }

    #[test]
    fn cycles_from_event_count() {
        let config = |events| DriverConfig { events, pause: None };
        assert_eq!(config(5).cycles(), Some(5));
        assert_eq!(config(0).cycles(), None);
        assert_eq!(config(-1).cycles(), None);
    }

    #[test]
    fn exchange_follows_pipeline_shape() {
        let (senders, _receivers) = pipeline(true);
        let driver = Driver::new(catalog(), builder(), DriverConfig::default(), senders);
        assert!(driver.builder.exchange_enabled());

        let (senders, _receivers) = pipeline(false);
        let driver = Driver::new(catalog(), builder().with_exchange(true), DriverConfig::default(), senders);
        assert!(!driver.builder.exchange_enabled());
    }

    #[test]
    fn disconnected_sink_stops_generation() {
        let (senders, receivers) = pipeline(false);
        let stop = receivers.stop.clone();
        drop(receivers);

        let config = DriverConfig { events: 3, pause: None };
        match Driver::new(catalog(), builder(), config, senders).run() {
            Err(DriverError::SinkDisconnected { channel }) => assert_eq!(channel, "traffic"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(stop.is_triggered());
    }
}
