//! Configuration loading.
//!
//! All options come from environment variables via figment. Duration fields
//! accept both numeric values (interpreted as seconds) and duration strings
//! with units ("30s", "5 m", "1500ms").

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Main application configuration.
#[derive(Deserialize)]
pub struct Config {
    /// Log level for this application's own targets.
    ///
    /// Valid values: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port for the HTTP API (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Primary store connection string
    pub database_url: String,
    /// Cache address (e.g. "redis://localhost:6379"). When absent or
    /// unreachable, the no-op cache is substituted.
    pub cache_url: Option<String>,
    /// Optional AMQP broker URL for claim notifications.
    pub broker_url: Option<String>,
    /// Queue name for job notifications.
    #[serde(default = "default_broker_queue")]
    pub broker_queue: String,
    /// API token. Absent token disables authentication entirely.
    pub api_token: Option<String>,
    /// Cadence of the worker liveness sweep (default 10s).
    #[serde(
        default = "default_heartbeat_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub heartbeat_interval: Duration,
    /// Silence threshold after which a worker is marked offline (default 30s).
    #[serde(
        default = "default_heartbeat_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub heartbeat_timeout: Duration,
    /// Deadline for streaming downloads (default 5m).
    #[serde(
        default = "default_download_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub download_timeout: Duration,
    /// Request body cap in bytes (default 10 MiB).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Offline workers older than this are pruned (default 24h).
    #[serde(
        default = "default_worker_retention",
        deserialize_with = "deserialize_duration"
    )]
    pub worker_retention: Duration,
    /// Graceful shutdown timeout (default 8s).
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
    /// Worker process spawner backend. Recognized for forward compatibility;
    /// only `none` ships in this build.
    #[serde(default)]
    pub spawner: SpawnerBackend,
}

/// Backend used to launch worker processes on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpawnerBackend {
    #[default]
    None,
    ContainerLocal,
    ContainerCluster,
    FunctionAsAService,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_broker_queue() -> String {
    "mapharvest.jobs".to_string()
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_worker_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

/// Default shutdown timeout of 8 seconds
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

/// Duration parser configured to handle various time units with seconds as default
///
/// Supports seconds (default), milliseconds, minutes and hours; allows
/// whitespace between number and unit and multiple summed units
/// (e.g. "2m 10s" = 130 seconds).
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[
        TimeUnit::Second,
        TimeUnit::MilliSecond,
        TimeUnit::Minute,
        TimeUnit::Hour,
    ])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Custom deserializer for duration fields that accepts both numeric and
/// string values.
///
/// # Examples
///
/// - `1` -> 1 second
/// - `"30s"` -> 30 seconds
/// - `"2 m"` -> 2 minutes
/// - `"1500ms"` -> 1.5 seconds
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "Invalid duration format '{}': {}. Examples: '5' (5 seconds), '3500ms', '30s', '2m'",
                        value, e
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("Duration conversion error: {}", e)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("Duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Figment;
    use figment::providers::Serialized;

    fn base() -> Figment {
        Figment::new().merge(Serialized::default(
            "database_url",
            "postgres://localhost/test",
        ))
    }

    #[test]
    fn defaults_applied() {
        let config: Config = base().extract().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(config.download_timeout, Duration::from_secs(300));
        assert_eq!(config.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(config.spawner, SpawnerBackend::None);
        assert!(config.api_token.is_none());
    }

    #[test]
    fn duration_strings_parse() {
        let config: Config = base()
            .merge(Serialized::default("heartbeat_timeout", "45s"))
            .merge(Serialized::default("download_timeout", "2m"))
            .extract()
            .unwrap();
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(45));
        assert_eq!(config.download_timeout, Duration::from_secs(120));
    }

    #[test]
    fn numeric_durations_are_seconds() {
        let config: Config = base()
            .merge(Serialized::default("heartbeat_interval", 25))
            .extract()
            .unwrap();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(25));
    }

    #[test]
    fn spawner_backend_parses_kebab_case() {
        let config: Config = base()
            .merge(Serialized::default("spawner", "container-local"))
            .extract()
            .unwrap();
        assert_eq!(config.spawner, SpawnerBackend::ContainerLocal);
    }
}
