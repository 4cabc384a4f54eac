//! Operation catalog.
//!
//! The catalog is the read-only description of the API operations to generate telemetry for. It is loaded once at
//! startup and shared, immutably, for the lifetime of the process.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};

/// Name of the property that drives the simulated latency of metering events.
///
/// This property is never emitted as an agent metric.
pub const RESPONSE_TIME: &str = "responseTime";

const DEFAULT_MINIMUM: f64 = 0.0;
const DEFAULT_MAXIMUM: f64 = 100.0;

/// A catalog loading error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[snafu(display("Failed to read operation catalog '{}'.", path.display()))]
    Io {
        /// Path of the catalog file.
        path: PathBuf,

        /// Error source.
        source: std::io::Error,
    },

    /// The catalog could not be parsed as JSON.
    #[snafu(display("Failed to parse operation catalog as JSON."))]
    Json {
        /// Error source.
        source: serde_json::Error,
    },

    /// The catalog could not be parsed as YAML.
    #[snafu(display("Failed to parse operation catalog as YAML."))]
    Yaml {
        /// Error source.
        source: serde_yaml::Error,
    },

    /// The catalog file extension does not map to a supported format.
    #[snafu(display(
        "Unsupported operation catalog format for '{}'. Expected a .json, .yaml or .yml file.",
        path.display()
    ))]
    UnsupportedFormat {
        /// Path of the catalog file.
        path: PathBuf,
    },

    /// The catalog declares no operations.
    #[snafu(display("Operation catalog contains no operations."))]
    Empty,

    /// A property declares a minimum that is greater than its maximum.
    #[snafu(display(
        "Property '{}' of operation '{}' declares a minimum ({}) greater than its maximum ({}).",
        property,
        operation,
        minimum,
        maximum
    ))]
    InvalidRange {
        /// Operation identifier.
        operation: String,

        /// Property name.
        property: String,

        /// Declared minimum.
        minimum: f64,

        /// Declared maximum.
        maximum: f64,
    },
}

/// The constraint a property places on its values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Constraint<'a> {
    /// No bounds and no fixed value.
    Unconstrained,

    /// At least one bound is declared.
    Range {
        /// Declared lower bound, if any.
        minimum: Option<f64>,

        /// Declared upper bound, if any.
        maximum: Option<f64>,
    },

    /// A single fixed value, echoed back verbatim.
    Exact(&'a serde_json::Value),
}

/// A named utility dimension of an operation, such as `responseTime` or `availability`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Property {
    /// Lower bound for generated values.
    #[serde(default, rename = "Minimum", alias = "minimum")]
    pub minimum: Option<f64>,

    /// Upper bound for generated values.
    #[serde(default, rename = "Maximum", alias = "maximum")]
    pub maximum: Option<f64>,

    /// Fixed value. Takes precedence over any bounds.
    #[serde(default, rename = "Value", alias = "value")]
    pub value: Option<serde_json::Value>,

    /// Unit of measurement.
    #[serde(default, rename = "Unit", alias = "unit")]
    pub unit: String,
}

impl Property {
    /// Classifies the constraint declared by this property.
    ///
    /// An equality constraint wins over a range when both are declared.
    pub fn constraint(&self) -> Constraint<'_> {
        if let Some(value) = &self.value {
            return Constraint::Exact(value);
        }

        match (self.minimum, self.maximum) {
            (None, None) => Constraint::Unconstrained,
            (minimum, maximum) => Constraint::Range { minimum, maximum },
        }
    }

    /// Returns the inclusive range values are drawn from when no equality constraint applies.
    ///
    /// Missing bounds default to `0` and `100`. A defaulted bound never crosses a declared one: a lone minimum of
    /// `150` yields `[150, 150]` rather than an inverted range.
    pub fn effective_range(&self) -> (f64, f64) {
        match (self.minimum, self.maximum) {
            (Some(minimum), Some(maximum)) => (minimum, maximum),
            (Some(minimum), None) => (minimum, DEFAULT_MAXIMUM.max(minimum)),
            (None, Some(maximum)) => (DEFAULT_MINIMUM.min(maximum), maximum),
            (None, None) => (DEFAULT_MINIMUM, DEFAULT_MAXIMUM),
        }
    }
}

/// A documented API action.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Operation {
    /// HTTP method, such as `GET`.
    #[serde(rename = "HTTPMethod", alias = "method")]
    pub http_method: String,

    /// Path template, possibly containing `{param}` placeholders.
    #[serde(rename = "Path", alias = "path")]
    pub path: String,

    /// Utility properties, keyed by name.
    #[serde(default, rename = "Properties", alias = "properties")]
    pub properties: IndexMap<String, Property>,
}

impl Operation {
    /// Returns the `responseTime` property, if declared.
    pub fn response_time(&self) -> Option<&Property> {
        self.properties.get(RESPONSE_TIME)
    }

    /// Returns every property except `responseTime`.
    pub fn metric_properties(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.properties
            .iter()
            .filter(|(name, _)| name.as_str() != RESPONSE_TIME)
            .map(|(name, property)| (name.as_str(), property))
    }
}

/// The set of operations to generate telemetry for, keyed by operation identifier.
#[derive(Clone, Debug, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    operations: IndexMap<String, Operation>,
}

impl Catalog {
    /// Creates a catalog from already-parsed operations.
    ///
    /// # Errors
    ///
    /// If there are no operations, or a property declares an inverted range, an error is returned.
    pub fn new(operations: IndexMap<String, Operation>) -> Result<Self, CatalogError> {
        Self { operations }.validated()
    }

    /// Loads a catalog from the given file.
    ///
    /// The format is chosen by file extension: `.json` for JSON, `.yaml` or `.yml` for YAML.
    ///
    /// # Errors
    ///
    /// If the file cannot be read, has an unsupported extension, or does not contain a valid catalog, an error is
    /// returned.
    pub fn from_file<P>(path: P) -> Result<Self, CatalogError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("json") => {
                let raw = std::fs::read_to_string(path).context(Io { path })?;
                Self::from_json_str(&raw)
            }
            Some("yaml" | "yml") => {
                let raw = std::fs::read_to_string(path).context(Io { path })?;
                Self::from_yaml_str(&raw)
            }
            _ => UnsupportedFormat { path }.fail(),
        }
    }

    /// Parses a catalog from a JSON document.
    ///
    /// # Errors
    ///
    /// If the document is malformed or fails validation, an error is returned.
    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_json::from_str(raw).context(Json)?;
        catalog.validated()
    }

    /// Parses a catalog from a YAML document.
    ///
    /// # Errors
    ///
    /// If the document is malformed or fails validation, an error is returned.
    pub fn from_yaml_str(raw: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_yaml::from_str(raw).context(Yaml)?;
        catalog.validated()
    }

    fn validated(self) -> Result<Self, CatalogError> {
        if self.operations.is_empty() {
            return Empty.fail();
        }

        for (operation_id, operation) in &self.operations {
            for (name, property) in &operation.properties {
                if let (Some(minimum), Some(maximum)) = (property.minimum, property.maximum) {
                    if minimum > maximum {
                        return InvalidRange {
                            operation: operation_id.clone(),
                            property: name.clone(),
                            minimum,
                            maximum,
                        }
                        .fail();
                    }
                }
            }
        }

        Ok(self)
    }

    /// Returns the number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns `true` if the catalog has no operations.
    ///
    /// A validated catalog is never empty.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Looks up an operation by identifier.
    pub fn get(&self, operation_id: &str) -> Option<&Operation> {
        self.operations.get(operation_id)
    }

    /// Iterates over all operations, in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Operation)> {
        self.operations.iter().map(|(id, operation)| (id.as_str(), operation))
    }

    /// Returns the total number of agent metric properties across all operations.
    ///
    /// This is the number of agent metric samples produced per generation cycle.
    pub fn metric_property_count(&self) -> usize {
        self.operations.values().map(|op| op.metric_properties().count()).sum()
    }
}
