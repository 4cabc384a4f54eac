use reqwest::blocking::Client;
use synthmeter_generator::{event::ExchangeEvent, sink::Reporter, GenericError};
use tracing::debug;

/// Number of exchange events buffered before they are posted.
const EXCHANGE_FLUSH_THRESHOLD: usize = 50;

/// Exchange reporter posting batches of events, as a JSON array, to the message-bus endpoint.
pub struct HttpExchangeReporter {
    client: Client,
    url: String,
    pending: Vec<ExchangeEvent>,
}

impl HttpExchangeReporter {
    pub fn new(client: Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
            pending: Vec::with_capacity(EXCHANGE_FLUSH_THRESHOLD),
        }
    }

    /// Checks that the endpoint answers requests.
    ///
    /// Any HTTP response counts: the endpoint may not serve anything but event batches.
    pub fn check_ready(&self) -> Result<(), GenericError> {
        self.client.head(&self.url).send()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), GenericError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let events = std::mem::take(&mut self.pending);
        self.client.post(&self.url).json(&events).send()?.error_for_status()?;

        debug!(events = events.len(), "Posted exchange events.");
        Ok(())
    }
}

impl Reporter<ExchangeEvent> for HttpExchangeReporter {
    fn report(&mut self, event: ExchangeEvent) -> Result<(), GenericError> {
        self.pending.push(event);
        if self.pending.len() >= EXCHANGE_FLUSH_THRESHOLD {
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
    use chrono::{TimeZone as _, Utc};
    use synthmeter_generator::event::{MeteringEvent, RequestPhase};

    use super::*;

    fn event(request_id: &str) -> ExchangeEvent {
        let meter = MeteringEvent::Request(RequestPhase {
            client: "127.0.0.1:40123".to_string(),
            operation_id: "listPatients".to_string(),
            path: "/patients".to_string(),
            method: "GET".to_string(),
            request_length: 128,
            request_time: std::time::Duration::from_millis(3),
            request_id: request_id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        });
        ExchangeEvent::new(meter, "abc".to_string())
    }

    #[test]
    fn flushes_only_at_threshold_or_stop() {
        let mut reporter = HttpExchangeReporter::new(Client::new(), "http://127.0.0.1:1/events");

        for i in 0..EXCHANGE_FLUSH_THRESHOLD - 1 {
            reporter.report(event(&i.to_string())).unwrap();
        }
        assert_eq!(reporter.pending.len(), EXCHANGE_FLUSH_THRESHOLD - 1);

        // The endpoint is unreachable, so the flush at the threshold fails, but the buffer is drained regardless.
        assert!(reporter.report(event("last")).is_err());
        assert!(reporter.pending.is_empty());
        assert!(reporter.stop().is_ok());
    }
}
