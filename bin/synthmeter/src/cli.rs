use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

/// Generates synthetic telemetry for the operations of an API catalog and streams it to storage and reporting
/// backends.
#[derive(Clone, Debug, Default, Parser)]
#[command(about, version)]
pub struct Cli {
    /// Path to a YAML configuration file.
    ///
    /// Values from the file are overridden by `SYNTHMETER_*` environment variables, which are in turn overridden by the
    /// flags below.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Base URL of the storage backend.
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Basic authentication for the storage backend, as `user:password`.
    #[arg(long)]
    pub backend_auth: Option<String>,

    /// Path to the operation catalog (`.json`, `.yaml` or `.yml`).
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Deployment/tenant name, used to name the backend indices.
    #[arg(long)]
    pub tenant: Option<String>,

    /// Number of generation cycles to run. Zero or less runs until stopped.
    #[arg(long, allow_negative_numbers = true)]
    pub events: Option<i64>,

    /// Whether to pause between cycles.
    #[arg(long)]
    pub pause: Option<bool>,

    /// How long to pause between cycles, such as `10s` or `500ms`.
    #[arg(long)]
    pub wait_time: Option<String>,

    /// Exchange endpoint URL. Exchange events are only generated when this is set.
    #[arg(long)]
    pub exchange: Option<String>,

    /// Sampler strategy: `random`, `violation-free` or `timed-violation` (or `0`, `1`, `2`).
    #[arg(long)]
    pub sampler: Option<String>,

    /// Seed for the random number generator, for reproducible runs.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Replace every backend with a sink that only logs what it receives.
    #[arg(long)]
    pub dry_run: bool,

    /// Log filter directives, such as `info` or `synthmeter=debug`.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    pub log_format_json: bool,

    /// Sampler arguments, such as the violation delay (`30s`) of the timed violation sampler.
    #[arg(trailing_var_arg = true)]
    pub sampler_args: Vec<String>,
}

/// Configuration values set on the command line.
///
/// Only the values that were actually given are serialized, so that they only override what they name.
#[derive(Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    backend_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    backend_auth: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    catalog: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tenant: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pause: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    wait_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    exchange: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    sampler: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    sampler_args: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    dry_run: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    log_level: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    log_format_json: Option<bool>,
}

impl Cli {
    /// Returns the configuration values set on the command line.
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            backend_url: self.backend_url.clone(),
            backend_auth: self.backend_auth.clone(),
            catalog: self.catalog.clone(),
            tenant: self.tenant.clone(),
            events: self.events,
            pause: self.pause,
            wait_time: self.wait_time.clone(),
            exchange: self.exchange.clone(),
            sampler: self.sampler.clone(),
            sampler_args: self.sampler_args.clone(),
            seed: self.seed,
            dry_run: self.dry_run.then_some(true),
            log_level: self.log_level.clone(),
            log_format_json: self.log_format_json.then_some(true),
        }
    }
}
