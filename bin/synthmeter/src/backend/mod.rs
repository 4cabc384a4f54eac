//! Delivery backends.
//!
//! Traffic samples, agent metrics and metering events are written to an Elasticsearch-compatible storage backend.
//! Exchange events are posted to a separate message-bus endpoint.

use std::time::Duration;

use anyhow::{bail, Context as _};
use backon::{BackoffBuilder, BlockingRetryable as _, ConstantBuilder};
use reqwest::{
    blocking::{Client, RequestBuilder},
    header::CONTENT_TYPE,
    Method,
};
use serde::Deserialize;
use synthmeter_generator::{
    driver::PipelineReceivers,
    event::{ExchangeEvent, MeteringEvent},
    sink::{
        spawn_agent_worker, spawn_metering_worker, spawn_traffic_worker, ExchangeLane, MetricAgent, Reporter,
        TrafficStore, WorkerHandle,
    },
    GenericError,
};
use tracing::{info, warn};

use crate::config::Config;

mod dry_run;
use self::dry_run::{LogMetricAgent, LogReporter, LogTrafficStore};

mod elastic;
use self::elastic::{ElasticMeteringReporter, ElasticMetricAgent, ElasticTrafficStore};

mod exchange;
use self::exchange::HttpExchangeReporter;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the storage backend.
#[derive(Clone)]
pub struct Backend {
    client: Client,
    base_url: String,
    auth: Option<(String, Option<String>)>,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
}

impl Backend {
    /// Creates a new `Backend` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the HTTP client cannot be built, an error is returned.
    pub fn from_config(config: &Config) -> Result<Self, GenericError> {
        Ok(Self {
            client: http_client()?,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            auth: config.basic_auth(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}/{}", self.base_url, path));
        match &self.auth {
            Some((user, password)) => builder.basic_auth(user, password.as_ref()),
            None => builder,
        }
    }

    /// Checks that the backend answers requests.
    pub fn check_ready(&self) -> Result<(), GenericError> {
        self.request(Method::GET, "").send()?.error_for_status()?;
        Ok(())
    }

    /// Sends a newline-delimited bulk request.
    pub fn bulk(&self, body: String) -> Result<(), GenericError> {
        let response: BulkResponse = self
            .request(Method::POST, "_bulk")
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()?
            .error_for_status()?
            .json()?;

        if response.errors {
            bail!("Backend rejected one or more bulk items.");
        }
        Ok(())
    }

    /// Indexes a single document.
    pub fn index<T>(&self, index: &str, document: &T) -> Result<(), GenericError>
    where
        T: serde::Serialize + ?Sized,
    {
        self.request(Method::POST, &format!("{}/_doc", index))
            .json(document)
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

fn http_client() -> Result<Client, GenericError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client.")
}

/// Backoff used while waiting for a backend to become reachable.
pub struct Readiness {
    attempts: usize,
    delay: Duration,
}

impl Readiness {
    /// Creates a new `Readiness` retrying up to `attempts` times, `delay` apart.
    pub fn new(attempts: usize, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

impl BackoffBuilder for &Readiness {
    type Backoff = <ConstantBuilder as BackoffBuilder>::Backoff;

    fn build(self) -> Self::Backoff {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.attempts)
            .build()
    }
}

/// Runs `check` until it succeeds, retrying with the given backoff.
///
/// # Errors
///
/// If `check` still fails once the retries are exhausted, the last error is returned.
pub fn wait_until_ready<F>(name: &str, readiness: &Readiness, check: F) -> Result<(), GenericError>
where
    F: FnMut() -> Result<(), GenericError>,
{
    check
        .retry(readiness)
        .notify(|e, delay| {
            warn!(backend = name, error = %e, "Backend not reachable yet. Retrying in {:?}...", delay);
        })
        .call()
        .with_context(|| format!("Backend '{}' did not become reachable.", name))?;

    info!(backend = name, "Backend is reachable.");
    Ok(())
}

/// The collaborators of every sink worker.
pub struct Sinks {
    traffic: Box<dyn TrafficStore>,
    agent: Box<dyn MetricAgent>,
    metering: Box<dyn Reporter<MeteringEvent>>,
    exchange: Option<Box<dyn Reporter<ExchangeEvent>>>,
}

impl Sinks {
    /// Builds the collaborators described by the configuration.
    ///
    /// Unless running dry, this waits for the storage backend, and the exchange endpoint if one is configured, to be
    /// reachable.
    ///
    /// # Errors
    ///
    /// If a backend client cannot be built, or a backend never becomes reachable, an error is returned.
    pub fn from_config(config: &Config) -> Result<Self, GenericError> {
        if config.dry_run {
            info!("Dry run: events will be logged instead of delivered.");
            return Ok(Self {
                traffic: Box::new(LogTrafficStore),
                agent: Box::new(LogMetricAgent),
                metering: Box::new(LogReporter::new("metering")),
                exchange: config
                    .exchange_enabled()
                    .then(|| Box::new(LogReporter::new("exchange")) as Box<dyn Reporter<ExchangeEvent>>),
            });
        }

        let readiness = Readiness::new(config.wait_attempts, config.wait_delay);
        let backend = Backend::from_config(config)?;
        wait_until_ready(&config.backend_url, &readiness, || backend.check_ready())?;

        let exchange = if config.exchange_enabled() {
            let reporter = HttpExchangeReporter::new(http_client()?, config.exchange.trim());
            wait_until_ready(&config.exchange, &readiness, || reporter.check_ready())?;
            Some(Box::new(reporter) as Box<dyn Reporter<ExchangeEvent>>)
        } else {
            None
        };

        Ok(Self {
            traffic: Box::new(ElasticTrafficStore::new(backend.clone(), &config.tenant)),
            agent: Box::new(ElasticMetricAgent::new(backend.clone(), &config.tenant)),
            metering: Box::new(ElasticMeteringReporter::new(backend, &config.tenant)),
            exchange,
        })
    }

    /// Spawns one sink worker per collaborator.
    ///
    /// # Errors
    ///
    /// If a worker cannot be started, an error is returned.
    pub fn spawn(self, receivers: PipelineReceivers) -> Result<Vec<WorkerHandle>, GenericError> {
        let exchange = match (self.exchange, receivers.exchange) {
            (Some(reporter), Some(queue)) => Some(ExchangeLane::new(reporter, queue)),
            _ => None,
        };

        Ok(vec![
            spawn_traffic_worker(self.traffic, receivers.traffic, receivers.stop.clone())?,
            spawn_agent_worker(self.agent, receivers.agent, receivers.stop.clone())?,
            spawn_metering_worker(self.metering, receivers.metering, exchange, receivers.stop)?,
        ])
    }
}

/// Names the index holding one kind of document for a tenant.
pub fn index_name(tenant: &str, kind: &str) -> String {
    format!("{}-{}", tenant.trim().to_lowercase(), kind)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use anyhow::anyhow;

    use super::*;

    #[test]
    fn index_names_are_lowercase() {
        assert_eq!(index_name("Clinic", "traffic"), "clinic-traffic");
        assert_eq!(index_name(" demo ", "requests"), "demo-requests");
    }

    #[test]
    fn waits_until_check_succeeds() {
        let readiness = Readiness::new(5, Duration::from_millis(1));
        let calls = Cell::new(0);

        wait_until_ready("test", &readiness, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(anyhow!("connection refused"))
            } else {
                Ok(())
            }
        })
        .unwrap();

        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_exhausting_retries() {
        let readiness = Readiness::new(2, Duration::from_millis(1));
        let calls = Cell::new(0);

        let result = wait_until_ready("test", &readiness, || {
            calls.set(calls.get() + 1);
            Err(anyhow!("connection refused"))
        });

        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn dry_run_sinks_need_no_backend() {
        let config = Config {
            dry_run: true,
            exchange: "http://bus:8080".to_string(),
            backend_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        };

        let sinks = Sinks::from_config(&config).unwrap();
        assert!(sinks.exchange.is_some());
    }
}
