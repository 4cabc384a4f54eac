use serde::Serialize;
use serde_json::json;
use synthmeter_generator::{
    event::{AgentMetricSample, MeteringEvent, TrafficSample},
    sink::{BulkInsert, MetricAgent, Reporter, TrafficStore},
    GenericError,
};
use tracing::debug;

use super::{index_name, Backend};

/// Number of metering events buffered before they are flushed as one bulk request.
const METERING_FLUSH_THRESHOLD: usize = 100;

/// Renders documents as a newline-delimited bulk request targeting `index`.
pub fn render_bulk<'a, T, I>(index: &str, documents: I) -> Result<String, GenericError>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let action = serde_json::to_string(&json!({ "index": { "_index": index } }))?;

    let mut body = String::new();
    for document in documents {
        body.push_str(&action);
        body.push('\n');
        body.push_str(&serde_json::to_string(document)?);
        body.push('\n');
    }
    Ok(body)
}

/// Traffic store writing each batch as one bulk request into `<tenant>-traffic`.
pub struct ElasticTrafficStore {
    backend: Backend,
    index: String,
}

impl ElasticTrafficStore {
    pub fn new(backend: Backend, tenant: &str) -> Self {
        Self {
            backend,
            index: index_name(tenant, "traffic"),
        }
    }
}

impl TrafficStore for ElasticTrafficStore {
    fn begin_bulk(&mut self) -> Box<dyn BulkInsert + '_> {
        Box::new(ElasticBulk {
            store: self,
            samples: Vec::new(),
        })
    }
}

struct ElasticBulk<'a> {
    store: &'a ElasticTrafficStore,
    samples: Vec<TrafficSample>,
}

impl BulkInsert for ElasticBulk<'_> {
    fn append(&mut self, sample: &TrafficSample) {
        self.samples.push(sample.clone());
    }

    fn commit(self: Box<Self>) -> Result<usize, GenericError> {
        if self.samples.is_empty() {
            return Ok(0);
        }

        let body = render_bulk(&self.store.index, &self.samples)?;
        self.store.backend.bulk(body)?;
        Ok(self.samples.len())
    }
}

/// Metric agent indexing each sample as a document in `<tenant>-metrics`.
pub struct ElasticMetricAgent {
    backend: Backend,
    index: String,
}

impl ElasticMetricAgent {
    pub fn new(backend: Backend, tenant: &str) -> Self {
        Self {
            backend,
            index: index_name(tenant, "metrics"),
        }
    }
}

impl MetricAgent for ElasticMetricAgent {
    fn send(&mut self, sample: &AgentMetricSample) -> Result<(), GenericError> {
        self.backend.index(&self.index, sample)
    }
}

/// Metering reporter buffering events and flushing them in bulk into `<tenant>-requests`.
pub struct ElasticMeteringReporter {
    backend: Backend,
    index: String,
    pending: Vec<MeteringEvent>,
}

impl ElasticMeteringReporter {
    pub fn new(backend: Backend, tenant: &str) -> Self {
        Self {
            backend,
            index: index_name(tenant, "requests"),
            pending: Vec::with_capacity(METERING_FLUSH_THRESHOLD),
        }
    }

    fn flush(&mut self) -> Result<(), GenericError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        // Drained up front: a failed request drops the batch.
        let events = std::mem::take(&mut self.pending);
        let body = render_bulk(&self.index, &events)?;
        self.backend.bulk(body)?;

        debug!(events = events.len(), index = %self.index, "Flushed metering events.");
        Ok(())
    }
}

impl Reporter<MeteringEvent> for ElasticMeteringReporter {
    fn report(&mut self, event: MeteringEvent) -> Result<(), GenericError> {
        self.pending.push(event);
        if self.pending.len() >= METERING_FLUSH_THRESHOLD {
            self.flush()?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), GenericError> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone as _, Utc};
    use synthmeter_generator::event::ResponsePhase;

    use super::*;
    use crate::config::Config;

    fn unreachable_backend() -> Backend {
        let config = Config {
            backend_url: "http://127.0.0.1:1/".to_string(),
            ..Default::default()
        };
        Backend::from_config(&config).unwrap()
    }

    fn sample(component: &str) -> TrafficSample {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TrafficSample::new(timestamp, component.to_string(), 10, 20)
    }

    #[test]
    fn bulk_body_pairs_actions_and_documents() {
        let samples = vec![sample("127.0.0.1:1000"), sample("127.0.0.1:2000")];
        let body = render_bulk("demo-traffic", &samples).unwrap();

        let lines = body.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 4);
        assert!(body.ends_with('\n'));

        let action: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action, json!({ "index": { "_index": "demo-traffic" } }));

        let document: serde_json::Value = serde_json::from_str(lines[3]).unwrap();
        assert_eq!(document["component"], "127.0.0.1:2000");
        assert_eq!(document["total"], 30);
    }

    #[test]
    fn empty_bulk_commits_without_a_request() {
        let mut store = ElasticTrafficStore::new(unreachable_backend(), "Demo");
        assert_eq!(store.index, "demo-traffic");

        let bulk = store.begin_bulk();
        assert_eq!(bulk.commit().unwrap(), 0);
    }

    #[test]
    fn metering_events_are_buffered_below_threshold() {
        let mut reporter = ElasticMeteringReporter::new(unreachable_backend(), "demo");
        let event = MeteringEvent::Response(ResponsePhase {
            request_id: "3f1c2a9e-0000-4000-8000-000000000000".to_string(),
            operation_id: "getPatient".to_string(),
            request_time: Duration::from_millis(12),
            response_length: 512,
            response_code: 200,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        });

        // Nothing is sent to the (unreachable) backend until the threshold is reached.
        for _ in 0..METERING_FLUSH_THRESHOLD - 1 {
            reporter.report(event.clone()).unwrap();
        }
        assert_eq!(reporter.pending.len(), METERING_FLUSH_THRESHOLD - 1);

        // Stopping flushes, and a failed flush still drains the buffer.
        assert!(reporter.stop().is_err());
        assert!(reporter.pending.is_empty());
        assert!(reporter.stop().is_ok());
    }
}
