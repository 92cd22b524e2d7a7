//! Configuration types for the topic repository.
//!
//! Configuration is loaded from YAML files and validated before use.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::partitioning::{CalibrationTable, CalibrationTier};
use crate::repository::RepositorySettings;

/// Root configuration for the repository.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepositoryConfig {
    /// Kafka cluster connection configuration.
    pub kafka: KafkaConfig,

    /// Batch publishing configuration.
    #[serde(default)]
    pub publishing: PublishingConfig,

    /// Partition sizing configuration.
    pub partitioning: PartitioningConfig,

    /// Consumer configuration.
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Kafka cluster connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Bootstrap server addresses. `${VAR}` references are expanded.
    pub bootstrap_servers: Vec<String>,

    /// Client id sent with every request.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Interval in seconds for background metadata refresh.
    /// Set to 0 to disable background refresh.
    #[serde(default = "default_metadata_refresh_interval_secs")]
    pub metadata_refresh_interval_secs: u64,

    /// Produce acknowledgements: -1 (all in-sync replicas) or 1 (leader only).
    #[serde(default = "default_acks")]
    pub acks: i16,

    /// Sends accepted but not yet confirmed before new sends are refused.
    #[serde(default = "default_max_in_flight_sends")]
    pub max_in_flight_sends: usize,
}

impl KafkaConfig {
    /// Bootstrap servers with environment variables expanded.
    #[must_use]
    pub fn bootstrap_servers(&self) -> Vec<String> {
        self.bootstrap_servers
            .iter()
            .map(|s| expand_env_vars(s))
            .filter(|s| !s.trim().is_empty())
            .collect()
    }

    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable `VAR_NAME`.
/// If the variable is not set, replaces with an empty string.
fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

/// Batch publishing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishingConfig {
    /// Time to wait for each send confirmation, in milliseconds.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

/// Partition sizing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartitioningConfig {
    /// Upper bound for the partition count of any topic.
    pub max_partitions: u32,

    /// Byte-rate tiers, ascending.
    pub calibration: Vec<CalibrationTier>,
}

/// Consumer configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConsumerConfig {
    /// Poll timeout handed to consumers, in milliseconds.
    #[serde(default)]
    pub poll_timeout_ms: u64,
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether to collect metrics.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format (for production).
    #[serde(default)]
    pub json: bool,
}

// Default value functions

fn default_client_id() -> String {
    "topic-repository".to_string()
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_metadata_refresh_interval_secs() -> u64 {
    30
}

fn default_acks() -> i16 {
    -1
}

fn default_max_in_flight_sends() -> usize {
    1024
}

fn default_send_timeout_ms() -> u64 {
    30_000
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Configuration loading and validation

impl RepositoryConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&content)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation check fails.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.kafka.bootstrap_servers().is_empty() {
            return Err(ConfigError::NoBootstrapServers);
        }
        if self.kafka.max_in_flight_sends == 0 {
            return Err(ConfigError::InvalidInFlightLimit);
        }
        if !matches!(self.kafka.acks, -1 | 1) {
            return Err(ConfigError::InvalidAcks(self.kafka.acks));
        }
        self.partitioning.validate()
    }

    /// Settings for a [`TopicRepository`](crate::repository::TopicRepository).
    ///
    /// # Errors
    ///
    /// Returns an error if the calibration table is invalid.
    pub fn repository_settings(&self) -> ConfigResult<RepositorySettings> {
        Ok(RepositorySettings {
            send_timeout: Duration::from_millis(self.publishing.send_timeout_ms),
            max_partitions: self.partitioning.max_partitions,
            poll_timeout: Duration::from_millis(self.consumer.poll_timeout_ms),
            calibration: self.partitioning.calibration_table()?,
        })
    }
}

impl PartitioningConfig {
    /// Validate the partitioning configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_partitions` is zero or the calibration
    /// table is invalid.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_partitions == 0 {
            return Err(ConfigError::InvalidMaxPartitions(self.max_partitions));
        }
        self.calibration_table().map(|_| ())
    }

    /// Build the validated calibration table.
    ///
    /// # Errors
    ///
    /// Returns an error if the tiers are empty or out of order.
    pub fn calibration_table(&self) -> ConfigResult<CalibrationTable> {
        CalibrationTable::new(self.calibration.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RepositoryConfig {
        RepositoryConfig {
            kafka: KafkaConfig {
                bootstrap_servers: vec!["localhost:9092".to_string()],
                client_id: default_client_id(),
                connection_timeout_ms: 10_000,
                request_timeout_ms: 30_000,
                metadata_refresh_interval_secs: 30,
                acks: -1,
                max_in_flight_sends: 1024,
            },
            publishing: PublishingConfig::default(),
            partitioning: PartitioningConfig {
                max_partitions: 100,
                calibration: vec![
                    CalibrationTier::new(1_048_576, 1),
                    CalibrationTier::new(4_194_304, 2),
                ],
            },
            consumer: ConsumerConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes_validation() {
        let config = valid_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_max_partitions() {
        let mut config = valid_config();
        config.partitioning.max_partitions = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMaxPartitions(0))
        ));
    }

    #[test]
    fn test_empty_calibration() {
        let mut config = valid_config();
        config.partitioning.calibration.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyCalibrationTable)
        ));
    }

    #[test]
    fn test_no_bootstrap_servers() {
        let mut config = valid_config();
        config.kafka.bootstrap_servers = vec!["${TOPIC_REPO_UNSET_VAR}".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoBootstrapServers)
        ));
    }

    #[test]
    fn test_zero_in_flight_limit() {
        let mut config = valid_config();
        config.kafka.max_in_flight_sends = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInFlightLimit)
        ));
    }

    #[test]
    fn test_unacknowledged_produce_rejected() {
        let mut config = valid_config();
        config.kafka.acks = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAcks(0))));
    }

    #[test]
    fn test_from_yaml_string() {
        let yaml = r"
kafka:
  bootstrap_servers:
    - 'localhost:9092'
publishing:
  send_timeout_ms: 500
partitioning:
  max_partitions: 1000
  calibration:
    - { bytes_per_second: 1048576, partitions: 1 }
    - { bytes_per_second: 67108864, partitions: 6 }
";
        let config = RepositoryConfig::from_str(yaml).unwrap();
        assert_eq!(config.partitioning.max_partitions, 1000);
        assert_eq!(config.partitioning.calibration.len(), 2);

        let settings = config.repository_settings().unwrap();
        assert_eq!(settings.send_timeout, Duration::from_millis(500));
        assert_eq!(settings.calibration.partitions_for(u64::MAX), 6);
    }

    #[test]
    fn test_default_values_applied() {
        let yaml = r"
kafka:
  bootstrap_servers:
    - 'localhost:9092'
partitioning:
  max_partitions: 10
  calibration:
    - { bytes_per_second: 1048576, partitions: 1 }
";
        let config = RepositoryConfig::from_str(yaml).unwrap();
        assert_eq!(config.kafka.client_id, "topic-repository");
        assert_eq!(config.kafka.acks, -1);
        assert_eq!(config.kafka.max_in_flight_sends, 1024);
        assert_eq!(config.kafka.metadata_refresh_interval_secs, 30);
        assert_eq!(config.publishing.send_timeout_ms, 30_000);
        assert_eq!(config.consumer.poll_timeout_ms, 0);
        assert!(config.metrics.enabled);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_unordered_calibration_in_yaml() {
        let yaml = r"
kafka:
  bootstrap_servers: ['localhost:9092']
partitioning:
  max_partitions: 10
  calibration:
    - { bytes_per_second: 4194304, partitions: 2 }
    - { bytes_per_second: 1048576, partitions: 1 }
";
        assert!(matches!(
            RepositoryConfig::from_str(yaml),
            Err(ConfigError::UnorderedCalibrationTier { index: 1, .. })
        ));
    }

    #[test]
    fn test_missing_partitioning_is_parse_error() {
        let yaml = r"
kafka:
  bootstrap_servers: ['localhost:9092']
";
        assert!(matches!(
            RepositoryConfig::from_str(yaml),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("TEST_TOPIC_REPO_BROKER", "kafka-1:9092");

        let mut config = valid_config();
        config.kafka.bootstrap_servers = vec!["${TEST_TOPIC_REPO_BROKER}".to_string()];
        assert_eq!(config.kafka.bootstrap_servers(), vec!["kafka-1:9092"]);

        std::env::remove_var("TEST_TOPIC_REPO_BROKER");
    }

    #[test]
    fn test_env_var_expansion_missing_var() {
        assert_eq!(expand_env_vars("${NONEXISTENT_TOPIC_REPO_VAR}:9092"), ":9092");
        assert_eq!(expand_env_vars("literal:9092"), "literal:9092");
    }
}
