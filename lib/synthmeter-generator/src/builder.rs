//! Event construction.

use std::{sync::LazyLock, time::Duration};

use chrono::{DateTime, Utc};
use rand::{distr::Alphanumeric, Rng};
use regex::{Captures, Regex};

use crate::{
    catalog::Operation,
    event::{
        AgentMetricSample, ExchangeEvent, MeteringEvent, RequestPhase, ResponsePhase, TrafficSample, SYNTHETIC_RAW_TAG,
    },
    sampler::Sampler,
};

/// Synthetic address of the client issuing every metered request.
pub const CLIENT_ADDRESS: &str = "127.0.0.1:40123";

const PEER_HOST: &str = "127.0.0.1";
const PEER_PORT_STEP: u32 = 1000;
const PEER_PORT_SLOTS: u32 = 36;

const MAX_TRAFFIC_BATCH: usize = 10;
const MAX_TRAFFIC_BYTES: u64 = 4096;
const MAX_MESSAGE_LENGTH: u64 = 1024;
const MAX_PLACEHOLDER_VALUE: u32 = 1000;
const FALLBACK_LATENCY_NANOS: u64 = 1_000_000;
const EXCHANGE_BODY_LENGTH: std::ops::Range<usize> = 100..1124;

static PATH_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*\}").expect("placeholder pattern should always be valid"));

/// The request and response side of a metered call.
#[derive(Clone, Debug, PartialEq)]
pub struct EventPair<T> {
    /// Request side.
    pub request: T,

    /// Response side.
    pub response: T,
}

/// Everything generated for one operation in one cycle.
#[derive(Clone, Debug)]
pub struct OperationEvents {
    /// Traffic sample batch. May be empty.
    pub traffic: Vec<TrafficSample>,

    /// One sample per non-`responseTime` property.
    pub agent_metrics: Vec<AgentMetricSample>,

    /// Metering request/response pair.
    pub metering: EventPair<MeteringEvent>,

    /// Exchange request/response pair, when the exchange is enabled.
    pub exchange: Option<EventPair<ExchangeEvent>>,
}

/// Builds the events for each operation.
///
/// The builder owns the random source, so a builder created from a seeded RNG produces a reproducible sequence of
/// values and request identifiers.
pub struct EventBuilder<R> {
    sampler: Sampler,
    rng: R,
    exchange_enabled: bool,
}

impl<R> EventBuilder<R>
where
    R: Rng,
{
    /// Creates a new `EventBuilder` with the given sampler and random source.
    ///
    /// Exchange events are disabled by default.
    pub fn new(sampler: Sampler, rng: R) -> Self {
        Self {
            sampler,
            rng,
            exchange_enabled: false,
        }
    }

    /// Sets whether exchange events are built.
    pub fn with_exchange(mut self, enabled: bool) -> Self {
        self.exchange_enabled = enabled;
        self
    }

    /// Returns `true` if exchange events are built.
    pub fn exchange_enabled(&self) -> bool {
        self.exchange_enabled
    }

    /// Returns the configured sampler.
    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Builds every event for the given operation.
    pub fn build_cycle(&mut self, operation_id: &str, operation: &Operation) -> OperationEvents {
        let now = Utc::now();
        let traffic = self.traffic_batch(now);
        let agent_metrics = self.agent_metrics(operation_id, operation, now);
        let metering = self.metering_pair(operation_id, operation);
        let exchange = if self.exchange_enabled {
            Some(self.exchange_pair(&metering))
        } else {
            None
        };

        OperationEvents {
            traffic,
            agent_metrics,
            metering,
            exchange,
        }
    }

    /// Builds a batch of between zero and nine traffic samples, all stamped with `now`.
    pub fn traffic_batch(&mut self, now: DateTime<Utc>) -> Vec<TrafficSample> {
        let size = self.rng.random_range(0..MAX_TRAFFIC_BATCH);
        let rng = &mut self.rng;

        (0..size)
            .map(|_| {
                let send = rng.random_range(0..MAX_TRAFFIC_BYTES);
                let received = rng.random_range(0..MAX_TRAFFIC_BYTES);
                let port = PEER_PORT_STEP * rng.random_range(0..PEER_PORT_SLOTS);
                TrafficSample::new(now, format!("{}:{}", PEER_HOST, port), send, received)
            })
            .collect()
    }

    /// Samples every property of the operation except `responseTime`.
    pub fn agent_metrics(
        &mut self, operation_id: &str, operation: &Operation, now: DateTime<Utc>,
    ) -> Vec<AgentMetricSample> {
        let sampler = self.sampler;
        let rng = &mut self.rng;

        operation
            .metric_properties()
            .map(|(name, property)| AgentMetricSample {
                timestamp: now,
                operation_id: operation_id.to_string(),
                name: name.to_string(),
                value: sampler.sample(property, rng).as_payload(),
                unit: property.unit.clone(),
                raw: SYNTHETIC_RAW_TAG.to_string(),
            })
            .collect()
    }

    /// Builds the metering request/response pair for one simulated call.
    ///
    /// The latency comes from the `responseTime` property, interpreted in seconds, or is drawn from `[0, 1ms)` when the
    /// operation declares none.
    pub fn metering_pair(&mut self, operation_id: &str, operation: &Operation) -> EventPair<MeteringEvent> {
        let request_time = match operation.response_time() {
            Some(property) => self.sampler.sample(property, &mut self.rng).as_duration(),
            None => Duration::from_nanos(self.rng.random_range(0..FALLBACK_LATENCY_NANOS)),
        };
        let request_id = self.request_id();
        let timestamp = Utc::now();

        let request = RequestPhase {
            client: CLIENT_ADDRESS.to_string(),
            operation_id: operation_id.to_string(),
            path: self.normalize_path(&operation.path),
            method: operation.http_method.clone(),
            request_length: self.rng.random_range(0..MAX_MESSAGE_LENGTH),
            request_time,
            request_id: request_id.clone(),
            timestamp,
        };

        let response = ResponsePhase {
            request_id,
            operation_id: operation_id.to_string(),
            request_time,
            response_length: self.rng.random_range(0..MAX_MESSAGE_LENGTH),
            response_code: (2 + self.rng.random_range(0..3u16)) * 100,
            timestamp,
        };

        EventPair {
            request: MeteringEvent::Request(request),
            response: MeteringEvent::Response(response),
        }
    }

    /// Mirrors a metering pair as exchange events, each carrying a random body.
    pub fn exchange_pair(&mut self, metering: &EventPair<MeteringEvent>) -> EventPair<ExchangeEvent> {
        let request_body = self.random_body();
        let response_body = self.random_body();

        EventPair {
            request: ExchangeEvent::new(metering.request.clone(), request_body),
            response: ExchangeEvent::new(metering.response.clone(), response_body),
        }
    }

    /// Replaces every `{param}` placeholder in the path with a random integer in `[0, 1000)`.
    ///
    /// Nested placeholders are replaced from the innermost outwards until no braced segment is left.
    pub fn normalize_path(&mut self, path: &str) -> String {
        let rng = &mut self.rng;
        let mut normalized = path.to_string();
        while PATH_PLACEHOLDER.is_match(&normalized) {
            normalized = PATH_PLACEHOLDER
                .replace_all(&normalized, |_: &Captures<'_>| {
                    rng.random_range(0..MAX_PLACEHOLDER_VALUE).to_string()
                })
                .into_owned();
        }
        normalized
    }

    /// Generates a random (version 4) request identifier.
    pub fn request_id(&mut self) -> String {
        let mut bytes = [0u8; 16];
        self.rng.fill(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
    }

    fn random_body(&mut self) -> String {
        let length = self.rng.random_range(EXCHANGE_BODY_LENGTH);
        (&mut self.rng)
            .sample_iter(Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }
}
