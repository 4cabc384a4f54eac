//! Generated events.
//!
//! Every event is created at the start of a generation cycle, handed to exactly one sink worker, and dropped once the
//! worker has forwarded it.

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Tracing header carrying the request identifier.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Tracing header carrying the operation identifier.
pub const OPERATION_ID_HEADER: &str = "X-Operation-ID";

/// Raw tag attached to every agent metric sample.
pub const SYNTHETIC_RAW_TAG: &str = "fake value";

/// A raw traffic sample.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrafficSample {
    /// Time the sample was taken.
    pub timestamp: DateTime<Utc>,

    /// Synthetic peer address.
    pub component: String,

    /// Bytes sent.
    pub send: u64,

    /// Bytes received.
    pub received: u64,

    /// Total bytes exchanged.
    pub total: u64,
}

impl TrafficSample {
    /// Creates a new `TrafficSample`, deriving the total from the sent and received byte counts.
    pub fn new(timestamp: DateTime<Utc>, component: String, send: u64, received: u64) -> Self {
        Self {
            timestamp,
            component,
            send,
            received,
            total: send + received,
        }
    }
}

/// A business metric sample, reported through the metric agent.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentMetricSample {
    /// Time the sample was taken.
    pub timestamp: DateTime<Utc>,

    /// Operation the metric belongs to.
    pub operation_id: String,

    /// Property name.
    pub name: String,

    /// Sampled value.
    pub value: serde_json::Value,

    /// Unit of measurement.
    pub unit: String,

    /// Raw/debug tag.
    pub raw: String,
}

/// Request phase of a metered call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RequestPhase {
    /// Synthetic client address.
    pub client: String,

    /// Operation identifier.
    pub operation_id: String,

    /// Path with every placeholder replaced.
    pub path: String,

    /// HTTP method.
    pub method: String,

    /// Request size, in bytes.
    pub request_length: u64,

    /// Simulated latency.
    #[serde(serialize_with = "serialize_nanos")]
    pub request_time: Duration,

    /// Correlation key shared with the response phase.
    pub request_id: String,

    /// Time the event was built.
    pub timestamp: DateTime<Utc>,
}

/// Response phase of a metered call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResponsePhase {
    /// Correlation key shared with the request phase.
    pub request_id: String,

    /// Operation identifier.
    pub operation_id: String,

    /// Simulated latency.
    #[serde(serialize_with = "serialize_nanos")]
    pub request_time: Duration,

    /// Response size, in bytes.
    pub response_length: u64,

    /// HTTP status code.
    pub response_code: u16,

    /// Time the event was built.
    pub timestamp: DateTime<Utc>,
}

/// A metering event.
///
/// Each metered call produces a request phase followed by a response phase sharing the same request identifier.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum MeteringEvent {
    /// Request phase.
    Request(RequestPhase),

    /// Response phase.
    Response(ResponsePhase),
}

impl MeteringEvent {
    /// Returns the request identifier.
    pub fn request_id(&self) -> &str {
        match self {
            Self::Request(phase) => &phase.request_id,
            Self::Response(phase) => &phase.request_id,
        }
    }

    /// Returns the operation identifier.
    pub fn operation_id(&self) -> &str {
        match self {
            Self::Request(phase) => &phase.operation_id,
            Self::Response(phase) => &phase.operation_id,
        }
    }

    /// Returns the simulated latency.
    pub fn request_time(&self) -> Duration {
        match self {
            Self::Request(phase) => phase.request_time,
            Self::Response(phase) => phase.request_time,
        }
    }

    /// Returns `true` if this is the request phase.
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}

/// Opaque payload attached to an exchange event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ExchangeBody {
    /// Body of the request phase.
    #[serde(rename = "request_body")]
    Request(String),

    /// Body of the response phase.
    #[serde(rename = "response_body")]
    Response(String),
}

impl ExchangeBody {
    /// Returns the payload.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Request(body) | Self::Response(body) => body,
        }
    }
}

/// A metering event enriched with a payload and tracing headers, for the message-bus exchange.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExchangeEvent {
    /// The metering phase this event mirrors.
    #[serde(flatten)]
    pub meter: MeteringEvent,

    /// Opaque payload.
    #[serde(flatten)]
    pub body: ExchangeBody,

    /// Tracing headers.
    pub headers: BTreeMap<String, Vec<String>>,
}

impl ExchangeEvent {
    /// Creates a new `ExchangeEvent` for the given metering phase.
    ///
    /// The body is attached to the side matching the phase, and the tracing headers are derived from the phase's
    /// request and operation identifiers.
    pub fn new(meter: MeteringEvent, body: String) -> Self {
        let headers = BTreeMap::from([
            (REQUEST_ID_HEADER.to_string(), vec![meter.request_id().to_string()]),
            (OPERATION_ID_HEADER.to_string(), vec![meter.operation_id().to_string()]),
        ]);
        let body = if meter.is_request() {
            ExchangeBody::Request(body)
        } else {
            ExchangeBody::Response(body)
        };

        Self { meter, body, headers }
    }

    /// Returns the operation identifier.
    pub fn operation_id(&self) -> &str {
        self.meter.operation_id()
    }
}

fn serialize_nanos<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use serde_json::json;

    use super::*;

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn request() -> MeteringEvent {
        MeteringEvent::Request(RequestPhase {
            client: "127.0.0.1:40123".to_string(),
            operation_id: "getVisits".to_string(),
            path: "/doctor/17/visits".to_string(),
            method: "GET".to_string(),
            request_length: 12,
            request_time: Duration::from_millis(250),
            request_id: "abc".to_string(),
            timestamp: timestamp(),
        })
    }

    fn response() -> MeteringEvent {
        MeteringEvent::Response(ResponsePhase {
            request_id: "abc".to_string(),
            operation_id: "getVisits".to_string(),
            request_time: Duration::from_millis(250),
            response_length: 512,
            response_code: 200,
            timestamp: timestamp(),
        })
    }

    #[test]
    fn traffic_total_is_sum() {
        let sample = TrafficSample::new(timestamp(), "127.0.0.1:3000".to_string(), 100, 23);
        assert_eq!(sample.total, 123);
    }

    #[test]
    fn metering_phases_expose_correlation_keys() {
        let (request, response) = (request(), response());
        assert_eq!(request.request_id(), response.request_id());
        assert_eq!(request.operation_id(), response.operation_id());
        assert!(request.is_request());
        assert!(!response.is_request());
    }

    #[test]
    fn metering_event_serializes_with_phase_tag() {
        let value = serde_json::to_value(request()).unwrap();
        assert_eq!(value["phase"], json!("request"));
        assert_eq!(value["request_time"], json!(250_000_000u64));
        assert_eq!(value["path"], json!("/doctor/17/visits"));
        assert_eq!(value["timestamp"], json!("2024-03-01T12:00:00Z"));
    }

    #[test]
    fn exchange_event_attaches_body_to_matching_phase() {
        let event = ExchangeEvent::new(response(), "payload".to_string());
        assert_eq!(event.body, ExchangeBody::Response("payload".to_string()));
        assert_eq!(event.headers[REQUEST_ID_HEADER], vec!["abc".to_string()]);
        assert_eq!(event.headers[OPERATION_ID_HEADER], vec!["getVisits".to_string()]);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["phase"], json!("response"));
        assert_eq!(value["response_body"], json!("payload"));
        assert_eq!(value["response_code"], json!(200));
        assert!(value.get("request_body").is_none());
    }
}
