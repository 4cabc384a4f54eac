//! Synthetic telemetry generator.
//!
//! Generates traffic samples, business metrics, metering events and exchange events for every operation of an API
//! catalog, and streams them to a storage backend and an optional message-bus endpoint.

use anyhow::Context as _;
use clap::Parser as _;
use rand::{rngs::StdRng, SeedableRng as _};
use synthmeter_generator::{
    builder::EventBuilder,
    catalog::Catalog,
    driver::{pipeline, Driver},
    sampler::Sampler,
    GenericError,
};
use tracing::{error, info, warn};

mod backend;
use self::backend::Sinks;

mod cli;
use self::cli::Cli;

mod config;
use self::config::Config;

mod logging;
use self::logging::initialize_logging;

fn main() {
    let cli = Cli::parse();
    let loaded = Config::load(&cli);

    let (directives, json) = match &loaded {
        Ok(config) => (config.log_level.clone(), config.log_format_json),
        Err(_) => (cli.log_level.clone().unwrap_or_else(|| "info".to_string()), cli.log_format_json),
    };
    if let Err(e) = initialize_logging(&directives, json) {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }

    let result = loaded.and_then(run);
    match result {
        Ok(()) => info!("synthmeter stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

fn run(config: Config) -> Result<(), GenericError> {
    info!("synthmeter starting...");

    let catalog = Catalog::from_file(&config.catalog)
        .with_context(|| format!("Failed to load catalog from '{}'.", config.catalog.display()))?;
    info!(
        path = %config.catalog.display(),
        operations = catalog.len(),
        metric_properties = catalog.metric_property_count(),
        "Loaded catalog."
    );

    let sampler = Sampler::from_kind(config.sampler, &config.sampler_args);
    let rng = match config.seed {
        Some(seed) => {
            info!(seed, "Seeding random number generator.");
            StdRng::seed_from_u64(seed)
        }
        None => StdRng::from_os_rng(),
    };

    let (senders, receivers) = pipeline(config.exchange_enabled());
    let workers = Sinks::from_config(&config)?.spawn(receivers)?;

    let driver = Driver::new(catalog, EventBuilder::new(sampler, rng), config.driver_config(), senders);
    let outcome = driver.run();

    for worker in workers {
        let name = worker.name();
        match worker.join() {
            Ok(stats) => info!(worker = name, ?stats, "Sink worker finished."),
            Err(e) => warn!(worker = name, error = %e, "Sink worker did not finish cleanly."),
        }
    }

    let stats = outcome.context("Generation failed.")?;
    info!(
        cycles = stats.cycles,
        traffic_samples = stats.traffic_samples,
        agent_metrics = stats.agent_metrics,
        metering_events = stats.metering_events,
        exchange_events = stats.exchange_events,
        "Generation summary."
    );

    Ok(())
}
