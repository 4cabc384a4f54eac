use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context as _};
use figment::{
    providers::{Env, Format as _, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use synthmeter_generator::{driver::DriverConfig, sampler::SamplerKind, GenericError};

use crate::cli::Cli;

/// Prefix of the environment variables that configure `synthmeter`.
const ENV_PREFIX: &str = "SYNTHMETER_";

/// Runtime configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Base URL of the storage backend receiving traffic samples, agent metrics and metering events.
    pub backend_url: String,

    /// Basic authentication for the storage backend, as `user:password`. Empty disables authentication.
    pub backend_auth: String,

    /// Path to the operation catalog.
    pub catalog: PathBuf,

    /// Deployment/tenant name.
    ///
    /// Backend indices are named after it: `<tenant>-traffic`, `<tenant>-metrics` and `<tenant>-requests`.
    pub tenant: String,

    /// Number of generation cycles. Zero or less runs until stopped.
    pub events: i64,

    /// Whether to pause between cycles.
    pub pause: bool,

    /// How long to pause between cycles.
    #[serde(with = "humantime_serde")]
    pub wait_time: Duration,

    /// Exchange endpoint URL. Empty disables exchange events entirely.
    pub exchange: String,

    /// Sampler strategy.
    pub sampler: SamplerKind,

    /// Strategy-specific sampler arguments.
    pub sampler_args: Vec<String>,

    /// Seed for the random number generator. Seeded from the OS when unset.
    pub seed: Option<u64>,

    /// Number of times to check that a backend is reachable before giving up.
    pub wait_attempts: usize,

    /// Delay between two reachability checks.
    #[serde(with = "humantime_serde")]
    pub wait_delay: Duration,

    /// Log every event instead of delivering it.
    pub dry_run: bool,

    /// Log filter directives.
    pub log_level: String,

    /// Emit logs as JSON.
    pub log_format_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:9200".to_string(),
            backend_auth: String::new(),
            catalog: PathBuf::from("resources/catalog.json"),
            tenant: "synthmeter".to_string(),
            events: 100,
            pause: true,
            wait_time: Duration::from_secs(10),
            exchange: String::new(),
            sampler: SamplerKind::ViolationFree,
            sampler_args: Vec::new(),
            seed: None,
            wait_attempts: 30,
            wait_delay: Duration::from_secs(2),
            dry_run: false,
            log_level: "info".to_string(),
            log_format_json: false,
        }
    }
}

impl Config {
    /// Loads the configuration, layering defaults, the configuration file, the environment and the command line.
    ///
    /// # Errors
    ///
    /// If the configuration file does not exist, or any layer holds an invalid value, an error is returned.
    pub fn load(cli: &Cli) -> Result<Self, GenericError> {
        Self::load_with_env_prefix(cli, ENV_PREFIX)
    }

    fn load_with_env_prefix(cli: &Cli, env_prefix: &str) -> Result<Self, GenericError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = &cli.config {
            if !path.is_file() {
                bail!("Configuration file '{}' does not exist.", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }

        figment
            .merge(Env::prefixed(env_prefix))
            .merge(Serialized::defaults(cli.overrides()))
            .extract()
            .context("Failed to load configuration.")
    }

    /// Returns `true` if exchange events should be generated.
    pub fn exchange_enabled(&self) -> bool {
        !self.exchange.trim().is_empty()
    }

    /// Returns the basic authentication credentials for the storage backend, if configured.
    pub fn basic_auth(&self) -> Option<(String, Option<String>)> {
        if self.backend_auth.is_empty() {
            return None;
        }

        match self.backend_auth.split_once(':') {
            Some((user, password)) => Some((user.to_string(), Some(password.to_string()))),
            None => Some((self.backend_auth.clone(), None)),
        }
    }

    /// Returns the driver configuration.
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            events: self.events,
            pause: self.pause.then_some(self.wait_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use clap::Parser as _;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("synthmeter").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let config = Config::load_with_env_prefix(&cli(&[]), "SYNTHMETER_TEST_DEFAULTS_").unwrap();
        assert_eq!(config, Config::default());
        assert!(!config.exchange_enabled());
        assert!(config.basic_auth().is_none());

        let driver = config.driver_config();
        assert_eq!(driver.events, 100);
        assert_eq!(driver.pause, Some(Duration::from_secs(10)));
    }

    #[test]
    fn layering_precedence() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "tenant: from-file\nevents: 5\nwait_time: 250ms\nsampler: 2\nsampler_args: [\"45s\"]\nbackend_url: http://file:9200"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        std::env::set_var("SYNTHMETER_TEST_LAYERS_TENANT", "from-env");
        std::env::set_var("SYNTHMETER_TEST_LAYERS_EVENTS", "7");

        let config = Config::load_with_env_prefix(
            &cli(&["--config", &path, "--events", "9", "--pause", "false"]),
            "SYNTHMETER_TEST_LAYERS_",
        )
        .unwrap();

        assert_eq!(config.backend_url, "http://file:9200");
        assert_eq!(config.tenant, "from-env");
        assert_eq!(config.events, 9);
        assert_eq!(config.wait_time, Duration::from_millis(250));
        assert_eq!(config.sampler, SamplerKind::TimedViolation);
        assert_eq!(config.sampler_args, vec!["45s".to_string()]);
        assert_eq!(config.driver_config().pause, None);
    }

    #[test]
    fn cli_wait_time_and_sampler_args() {
        let config = Config::load_with_env_prefix(
            &cli(&["--wait-time", "1m", "--sampler", "timed-violation", "--exchange", "http://bus:8080", "30s"]),
            "SYNTHMETER_TEST_CLI_",
        )
        .unwrap();

        assert_eq!(config.wait_time, Duration::from_secs(60));
        assert_eq!(config.sampler, SamplerKind::TimedViolation);
        assert_eq!(config.sampler_args, vec!["30s".to_string()]);
        assert!(config.exchange_enabled());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let result = Config::load_with_env_prefix(
            &cli(&["--config", "/nonexistent/synthmeter.yaml"]),
            "SYNTHMETER_TEST_MISSING_",
        );
        assert!(result.is_err());
    }

    #[test]
    fn invalid_duration_is_an_error() {
        let result = Config::load_with_env_prefix(&cli(&["--wait-time", "soon"]), "SYNTHMETER_TEST_INVALID_");
        assert!(result.is_err());
    }

    #[test]
    fn bundled_resources_load() {
        let resources = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../resources");
        let path = resources.join("synthmeter.yaml");

        let config = Config::load_with_env_prefix(
            &cli(&["--config", path.to_str().unwrap()]),
            "SYNTHMETER_TEST_BUNDLED_",
        )
        .unwrap();
        assert_eq!(config, Config::default());

        let catalog = synthmeter_generator::catalog::Catalog::from_file(resources.join("catalog.json")).unwrap();
        assert_eq!(catalog.len(), 4);
    }

    #[test]
    fn basic_auth_parsing() {
        let mut config = Config {
            backend_auth: "elastic:changeme".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.basic_auth(),
            Some(("elastic".to_string(), Some("changeme".to_string())))
        );

        config.backend_auth = "token-only".to_string();
        assert_eq!(config.basic_auth(), Some(("token-only".to_string(), None)));
    }
}
