//! Value samplers.
//!
//! A sampler turns the constraints declared by a [`Property`] into one concrete value. The strategy is selected once at
//! startup and stays fixed for the life of the process.

use std::{
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

use rand::Rng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use tracing::{error, warn};

use crate::catalog::{Constraint, Property};

/// Delay before a timed violation kicks in, when none (or an invalid one) is configured.
pub const DEFAULT_VIOLATION_DELAY: Duration = Duration::from_secs(60);

/// Exclusive upper bound of values produced by the random strategy.
const RANDOM_UPPER_BOUND: i64 = 1000;

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// A sampled value.
#[derive(Clone, Debug, PartialEq)]
pub enum SampledValue {
    /// An unconstrained integer.
    Integer(i64),

    /// A numeric value drawn from a range, or the fixed violation value.
    Number(f64),

    /// A fixed value declared by the property, passed through unmodified.
    Exact(serde_json::Value),
}

impl SampledValue {
    /// Returns the value as a float.
    ///
    /// Non-numeric exact values yield NaN.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Integer(value) => *value as f64,
            Self::Number(value) => *value,
            Self::Exact(value) => value.as_f64().unwrap_or(f64::NAN),
        }
    }

    /// Returns the value truncated to an integer.
    ///
    /// Non-numeric exact values yield `-1`.
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Integer(value) => (*value).clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            Self::Number(value) => *value as i32,
            Self::Exact(value) => value.as_f64().map(|n| n as i32).unwrap_or(-1),
        }
    }

    /// Returns the value, denominated in seconds, as a duration with nanosecond resolution.
    ///
    /// Negative, non-finite and non-numeric values yield a zero duration.
    pub fn as_duration(&self) -> Duration {
        let seconds = self.as_f64();
        if !seconds.is_finite() || seconds <= 0.0 {
            return Duration::ZERO;
        }

        Duration::from_nanos((seconds * NANOS_PER_SECOND) as u64)
    }

    /// Returns the value as a generic payload.
    pub fn as_payload(&self) -> serde_json::Value {
        match self {
            Self::Integer(value) => serde_json::Value::from(*value),
            Self::Number(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Exact(value) => value.clone(),
        }
    }
}

/// Sampler strategy selector.
///
/// Accepts the strategy name (`random`, `violation-free`, `timed-violation`) or its legacy index (`0`, `1`, `2`).
/// Unknown selectors fall back to [`SamplerKind::ViolationFree`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SamplerKind {
    /// Uniform integers, ignoring constraints.
    Random,

    /// Values that always honor the declared constraints.
    #[default]
    ViolationFree,

    /// Violation-free values until a deadline, then a fixed violating value.
    TimedViolation,
}

impl SamplerKind {
    /// Resolves a selector, falling back to the default strategy when it is not recognized.
    pub fn from_selector(selector: &str) -> Self {
        match selector.trim().to_ascii_lowercase().as_str() {
            "0" | "random" => Self::Random,
            "1" | "violation-free" | "violation_free" | "violationfree" => Self::ViolationFree,
            "2" | "timed-violation" | "timed_violation" | "timedviolation" => Self::TimedViolation,
            _ => {
                warn!(selector, "Unknown sampler selector. Falling back to violation-free sampler.");
                Self::ViolationFree
            }
        }
    }

    /// Returns the canonical name of this strategy.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::ViolationFree => "violation-free",
            Self::TimedViolation => "timed-violation",
        }
    }
}

impl fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplerKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_selector(s))
    }
}

impl Serialize for SamplerKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SamplerKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SelectorVisitor;

        impl de::Visitor<'_> for SelectorVisitor {
            type Value = SamplerKind;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a sampler name or index")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(SamplerKind::from_selector(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(SamplerKind::from_selector(&v.to_string()))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(SamplerKind::from_selector(&v.to_string()))
            }
        }

        deserializer.deserialize_any(SelectorVisitor)
    }
}

/// A value sampler.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sampler {
    /// Returns a uniform integer in `[0, 1000)`, ignoring all constraints.
    Random,

    /// Returns the declared exact value, or a value drawn uniformly from the property's effective range.
    ViolationFree,

    /// Behaves like [`Sampler::ViolationFree`] until `trigger_at`, then always returns `0`.
    TimedViolation {
        /// Instant after which every sample is a violation.
        trigger_at: Instant,
    },
}

impl Sampler {
    /// Creates a sampler for the given strategy.
    ///
    /// For [`SamplerKind::TimedViolation`], `args[0]` is parsed as a human-readable delay (`30s`, `2m`, `1h30m`). A
    /// missing or unparsable delay is logged and replaced by [`DEFAULT_VIOLATION_DELAY`].
    pub fn from_kind(kind: SamplerKind, args: &[String]) -> Self {
        match kind {
            SamplerKind::Random => Self::Random,
            SamplerKind::ViolationFree => Self::ViolationFree,
            SamplerKind::TimedViolation => {
                let delay = parse_violation_delay(args);
                Self::TimedViolation {
                    trigger_at: violation_trigger(Instant::now(), delay),
                }
            }
        }
    }

    /// Creates a timed violation sampler that triggers at the given instant.
    pub fn timed_violation_at(trigger_at: Instant) -> Self {
        Self::TimedViolation { trigger_at }
    }

    /// Returns the strategy of this sampler.
    pub fn kind(&self) -> SamplerKind {
        match self {
            Self::Random => SamplerKind::Random,
            Self::ViolationFree => SamplerKind::ViolationFree,
            Self::TimedViolation { .. } => SamplerKind::TimedViolation,
        }
    }

    /// Samples a value for the given property.
    pub fn sample<R>(&self, property: &Property, rng: &mut R) -> SampledValue
    where
        R: Rng + ?Sized,
    {
        match self {
            Self::Random => SampledValue::Integer(rng.random_range(0..RANDOM_UPPER_BOUND)),
            Self::ViolationFree => sample_within_constraints(property, rng),
            Self::TimedViolation { trigger_at } => {
                if Instant::now() >= *trigger_at {
                    SampledValue::Number(0.0)
                } else {
                    sample_within_constraints(property, rng)
                }
            }
        }
    }
}

fn sample_within_constraints<R>(property: &Property, rng: &mut R) -> SampledValue
where
    R: Rng + ?Sized,
{
    if let Constraint::Exact(value) = property.constraint() {
        return SampledValue::Exact(value.clone());
    }

    let (minimum, maximum) = property.effective_range();
    let unit: f64 = rng.random();
    SampledValue::Number((minimum + unit * (maximum - minimum)).min(maximum))
}

fn violation_trigger(now: Instant, delay: Duration) -> Instant {
    match now.checked_add(delay) {
        Some(trigger_at) => trigger_at,
        None => {
            error!(
                delay = %humantime::format_duration(delay),
                default = %humantime::format_duration(DEFAULT_VIOLATION_DELAY),
                "Violation delay is out of range. Using default."
            );
            now.checked_add(DEFAULT_VIOLATION_DELAY).unwrap_or(now)
        }
    }
}

fn parse_violation_delay(args: &[String]) -> Duration {
    let Some(raw) = args.first() else {
        error!(
            default = %humantime::format_duration(DEFAULT_VIOLATION_DELAY),
            "No violation delay given. Using default."
        );
        return DEFAULT_VIOLATION_DELAY;
    };

    match humantime::parse_duration(raw.trim()) {
        Ok(delay) => delay,
        Err(e) => {
            error!(
                error = %e,
                delay = raw.as_str(),
                default = %humantime::format_duration(DEFAULT_VIOLATION_DELAY),
                "Failed to parse violation delay. Using default."
            );
            DEFAULT_VIOLATION_DELAY
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng as _};
    use serde_json::json;

    use super::*;

    fn ranged(minimum: Option<f64>, maximum: Option<f64>) -> Property {
        Property {
            minimum,
            maximum,
            value: None,
            unit: String::new(),
        }
    }

    fn exact(value: serde_json::Value) -> Property {
        Property {
            minimum: Some(0.0),
            maximum: Some(1.0),
            value: Some(value),
            unit: String::new(),
        }
    }

    fn arb_exact_value() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            any::<i64>().prop_map(serde_json::Value::from),
            any::<bool>().prop_map(serde_json::Value::from),
            "[a-z0-9-]{0,16}".prop_map(serde_json::Value::from),
            (-1.0e9..1.0e9f64).prop_map(serde_json::Value::from),
        ]
    }

    proptest! {
        #[test]
        fn property_test_violation_free_within_bounds(
            minimum in -1.0e6..1.0e6f64,
            span in 0.0..1.0e6f64,
            seed in any::<u64>()
        ) {
            let maximum = minimum + span;
            let property = ranged(Some(minimum), Some(maximum));
            let mut rng = StdRng::seed_from_u64(seed);

            for _ in 0..16 {
                let value = Sampler::ViolationFree.sample(&property, &mut rng).as_f64();
                prop_assert!(minimum <= value && value <= maximum, "{} not in [{}, {}]", value, minimum, maximum);
            }
        }

        #[test]
        fn property_test_timed_violation_within_bounds_before_trigger(
            minimum in -1.0e3..1.0e3f64,
            span in 0.0..1.0e3f64,
            seed in any::<u64>()
        ) {
            let maximum = minimum + span;
            let property = ranged(Some(minimum), Some(maximum));
            let sampler = Sampler::timed_violation_at(Instant::now() + Duration::from_secs(3600));
            let mut rng = StdRng::seed_from_u64(seed);

            let value = sampler.sample(&property, &mut rng).as_f64();
            prop_assert!(minimum <= value && value <= maximum);
        }

        #[test]
        fn property_test_equality_passthrough(value in arb_exact_value(), seed in any::<u64>()) {
            let property = exact(value.clone());
            let mut rng = StdRng::seed_from_u64(seed);

            let sampled = Sampler::ViolationFree.sample(&property, &mut rng);
            prop_assert_eq!(sampled.as_payload(), value.clone());
            prop_assert_eq!(sampled, SampledValue::Exact(value));
        }

        #[test]
        fn property_test_violation_after_trigger(
            minimum in 1.0..1.0e3f64,
            span in 0.0..1.0e3f64,
            seed in any::<u64>()
        ) {
            let property = ranged(Some(minimum), Some(minimum + span));
            let sampler = Sampler::timed_violation_at(Instant::now());
            let mut rng = StdRng::seed_from_u64(seed);

            prop_assert_eq!(sampler.sample(&property, &mut rng), SampledValue::Number(0.0));
        }

        #[test]
        fn property_test_random_ignores_constraints(seed in any::<u64>()) {
            let property = ranged(Some(5.0), Some(6.0));
            let mut rng = StdRng::seed_from_u64(seed);

            match Sampler::Random.sample(&property, &mut rng) {
                SampledValue::Integer(value) => prop_assert!((0..1000).contains(&value)),
                other => prop_assert!(false, "unexpected sample: {:?}", other),
            }
        }
    }

    #[test]
    fn violation_after_trigger_ignores_equality() {
        let sampler = Sampler::timed_violation_at(Instant::now());
        let mut rng = StdRng::seed_from_u64(7);
        let sampled = sampler.sample(&exact(json!("gold")), &mut rng);
        assert_eq!(sampled.as_f64(), 0.0);
        assert_eq!(sampled.as_duration(), Duration::ZERO);
    }

    #[test]
    fn unconstrained_defaults_to_zero_through_hundred() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..256 {
            let value = Sampler::ViolationFree.sample(&Property::default(), &mut rng).as_f64();
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn numeric_interpretations() {
        let value = SampledValue::Number(0.25);
        assert_eq!(value.as_duration(), Duration::from_millis(250));
        assert_eq!(value.as_i32(), 0);
        assert_eq!(value.as_payload(), json!(0.25));

        let value = SampledValue::Integer(3);
        assert_eq!(value.as_duration(), Duration::from_secs(3));
        assert_eq!(value.as_f64(), 3.0);
        assert_eq!(value.as_payload(), json!(3));

        let value = SampledValue::Number(-2.7);
        assert_eq!(value.as_i32(), -2);
        assert_eq!(value.as_duration(), Duration::ZERO);
    }

    #[test]
    fn non_numeric_exact_interpretations() {
        let value = SampledValue::Exact(json!("gold"));
        assert!(value.as_f64().is_nan());
        assert_eq!(value.as_i32(), -1);
        assert_eq!(value.as_duration(), Duration::ZERO);
        assert_eq!(value.as_payload(), json!("gold"));

        let value = SampledValue::Exact(json!(1.5));
        assert_eq!(value.as_f64(), 1.5);
        assert_eq!(value.as_i32(), 1);
        assert_eq!(value.as_duration(), Duration::from_millis(1500));
    }

    #[test]
    fn selector_parsing() {
        assert_eq!(SamplerKind::from_selector("random"), SamplerKind::Random);
        assert_eq!(SamplerKind::from_selector("0"), SamplerKind::Random);
        assert_eq!(SamplerKind::from_selector("Violation-Free"), SamplerKind::ViolationFree);
        assert_eq!(SamplerKind::from_selector("1"), SamplerKind::ViolationFree);
        assert_eq!(SamplerKind::from_selector("timed_violation"), SamplerKind::TimedViolation);
        assert_eq!(SamplerKind::from_selector(" 2 "), SamplerKind::TimedViolation);
        assert_eq!(SamplerKind::from_selector("chaos"), SamplerKind::ViolationFree);
    }

    #[test]
    fn selector_deserializes_from_name_or_index() {
        let kind: SamplerKind = serde_json::from_value(json!("timed-violation")).unwrap();
        assert_eq!(kind, SamplerKind::TimedViolation);

        let kind: SamplerKind = serde_json::from_value(json!(0)).unwrap();
        assert_eq!(kind, SamplerKind::Random);

        assert_eq!(serde_json::to_value(SamplerKind::ViolationFree).unwrap(), json!("violation-free"));
    }

    #[test]
    fn violation_delay_parsing() {
        assert_eq!(parse_violation_delay(&["30s".to_string()]), Duration::from_secs(30));
        assert_eq!(parse_violation_delay(&["1h30m".to_string()]), Duration::from_secs(5400));
        assert_eq!(parse_violation_delay(&[]), DEFAULT_VIOLATION_DELAY);
        assert_eq!(parse_violation_delay(&["soon".to_string()]), DEFAULT_VIOLATION_DELAY);
    }

    #[test]
    fn out_of_range_violation_delay_uses_default() {
        let now = Instant::now();
        assert_eq!(violation_trigger(now, Duration::MAX), now + DEFAULT_VIOLATION_DELAY);
        assert_eq!(violation_trigger(now, Duration::from_secs(5)), now + Duration::from_secs(5));

        let before = Instant::now();
        match Sampler::from_kind(SamplerKind::TimedViolation, &["500000000000years".to_string()]) {
            Sampler::TimedViolation { trigger_at } => {
                assert!(trigger_at >= before + DEFAULT_VIOLATION_DELAY);
                assert!(trigger_at <= Instant::now() + DEFAULT_VIOLATION_DELAY);
            }
            other => panic!("unexpected sampler: {:?}", other),
        }
    }

    #[test]
    fn from_kind_builds_matching_sampler() {
        assert_eq!(Sampler::from_kind(SamplerKind::Random, &[]), Sampler::Random);
        assert_eq!(Sampler::from_kind(SamplerKind::ViolationFree, &[]), Sampler::ViolationFree);

        let before = Instant::now();
        let sampler = Sampler::from_kind(SamplerKind::TimedViolation, &["10s".to_string()]);
        match sampler {
            Sampler::TimedViolation { trigger_at } => {
                assert!(trigger_at >= before + Duration::from_secs(10));
                assert!(trigger_at <= Instant::now() + Duration::from_secs(10));
            }
            other => panic!("unexpected sampler: {:?}", other),
        }
        assert_eq!(sampler.kind(), SamplerKind::TimedViolation);
    }
}
