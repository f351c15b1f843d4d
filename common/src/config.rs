// Configuration management with layered configuration (file, env)

use crate::errors::ConfigError;
use crate::models::{InFlightPolicy, QueryJob};
use config::{Config, Environment, File};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

lazy_static! {
    static ref METRIC_NAME: Regex = Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").unwrap();
    static ref LABEL_NAME: Regex = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap();
}

/// Environment variable naming an extra configuration file layered over `config/`
pub const CONFIG_FILE_ENV: &str = "APP_CONFIG_FILE";

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

/// Address of the `/metrics` exposition endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Upper bound on the drain once shutdown is requested
    pub grace_period_seconds: u64,
    #[serde(default)]
    pub in_flight: InFlightPolicy,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_seconds: 5,
            in_flight: InFlightPolicy::Finish,
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    #[serde(default)]
    pub help: String,
    pub statement: String,
    pub interval_seconds: u64,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Settings {
    /// Load configuration with layered precedence:
    /// `config/default` → `config/local` → `$APP_CONFIG_FILE` → env
    pub fn load() -> Result<Self, ConfigError> {
        let extra = std::env::var(CONFIG_FILE_ENV).ok();
        Self::load_from_path("config", extra.as_deref().map(Path::new))
    }

    /// Load configuration from a specific directory plus an optional explicit file
    pub fn load_from_path<P: AsRef<Path>>(
        config_dir: P,
        config_file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let mut builder = Config::builder()
            // Start with default configuration
            .add_source(File::with_name(&config_dir.join("default").to_string_lossy()).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::with_name(&config_dir.join("local").to_string_lossy()).required(false));

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let builder = builder.add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port", "must be greater than 0"));
        }
        if self.shutdown.grace_period_seconds == 0 {
            return Err(ConfigError::invalid(
                "shutdown.grace_period_seconds",
                "must be greater than 0",
            ));
        }
        if self.databases.is_empty() {
            return Err(ConfigError::NoDatabases);
        }

        let mut database_names = HashSet::new();
        for (i, database) in self.databases.iter().enumerate() {
            let field = |name: &str| format!("databases[{}].{}", i, name);

            if database.name.is_empty() {
                return Err(ConfigError::invalid(field("name"), "cannot be empty"));
            }
            if !database_names.insert(database.name.as_str()) {
                return Err(ConfigError::DuplicateDatabase(database.name.clone()));
            }
            if database.url.is_empty() {
                return Err(ConfigError::invalid(field("url"), "cannot be empty"));
            }
            if database.max_connections == 0 {
                return Err(ConfigError::invalid(
                    field("max_connections"),
                    "must be greater than 0",
                ));
            }

            for (j, metric) in database.metrics.iter().enumerate() {
                metric.validate(&format!("databases[{}].metrics[{}]", i, j))?;
            }
        }

        if self.databases.iter().all(|d| d.metrics.is_empty()) {
            return Err(ConfigError::NoMetrics);
        }

        Ok(())
    }

    /// Flatten the configured metrics into query jobs bound to their database.
    ///
    /// Duplicate metric names are not rejected here; the value sink refuses the
    /// second registration at startup.
    pub fn query_jobs(&self) -> Vec<QueryJob> {
        self.databases
            .iter()
            .flat_map(|database| {
                database
                    .metrics
                    .iter()
                    .map(move |metric| metric.to_job(&database.name))
            })
            .collect()
    }
}

impl MetricConfig {
    fn validate(&self, path: &str) -> Result<(), ConfigError> {
        if !METRIC_NAME.is_match(&self.name) {
            return Err(ConfigError::invalid(
                format!("{}.name", path),
                format!("'{}' is not a valid metric name", self.name),
            ));
        }
        if self.statement.trim().is_empty() {
            return Err(ConfigError::invalid(
                format!("{}.statement", path),
                "cannot be empty",
            ));
        }
        if self.interval_seconds == 0 {
            return Err(ConfigError::invalid(
                format!("{}.interval_seconds", path),
                "must be greater than 0",
            ));
        }
        if self.timeout_seconds == Some(0) {
            return Err(ConfigError::invalid(
                format!("{}.timeout_seconds", path),
                "must be greater than 0",
            ));
        }
        for label in self.labels.keys() {
            if !LABEL_NAME.is_match(label) || label.starts_with("__") {
                return Err(ConfigError::invalid(
                    format!("{}.labels", path),
                    format!("'{}' is not a valid label name", label),
                ));
            }
        }
        Ok(())
    }

    fn to_job(&self, database: &str) -> QueryJob {
        QueryJob {
            name: self.name.clone(),
            help: self.help.clone(),
            database: database.to_string(),
            statement: self.statement.clone(),
            interval: Duration::from_secs(self.interval_seconds),
            timeout: self.timeout_seconds.map(Duration::from_secs),
            labels: self.labels.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn metric(name: &str) -> MetricConfig {
        MetricConfig {
            name: name.to_string(),
            help: String::new(),
            statement: "SELECT COUNT(*) FROM orders".to_string(),
            interval_seconds: 1,
            timeout_seconds: None,
            labels: BTreeMap::new(),
        }
    }

    fn settings() -> Settings {
        Settings {
            databases: vec![DatabaseConfig {
                name: "shop".to_string(),
                url: "mysql://root@localhost/shop".to_string(),
                max_connections: 5,
                connect_timeout_seconds: 10,
                metrics: vec![metric("orders_total")],
            }],
            ..Settings::default()
        }
    }

    #[test]
    fn test_valid_settings() {
        assert!(settings().validate().is_ok());
    }

    #[test]
    fn test_validation_catches_no_databases() {
        let settings = Settings::default();
        assert!(matches!(settings.validate(), Err(ConfigError::NoDatabases)));
    }

    #[test]
    fn test_validation_catches_no_metrics() {
        let mut settings = settings();
        settings.databases[0].metrics.clear();
        assert!(matches!(settings.validate(), Err(ConfigError::NoMetrics)));
    }

    #[test]
    fn test_validation_catches_duplicate_database() {
        let mut settings = settings();
        let copy = settings.databases[0].clone();
        settings.databases.push(copy);
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::DuplicateDatabase(name)) if name == "shop"
        ));
    }

    #[test]
    fn test_validation_catches_zero_interval() {
        let mut settings = settings();
        settings.databases[0].metrics[0].interval_seconds = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("interval_seconds"));
    }

    #[test]
    fn test_validation_catches_bad_names() {
        let mut settings = settings();
        settings.databases[0].metrics[0].name = "orders-total".to_string();
        assert!(settings.validate().is_err());

        let mut settings = self::settings();
        settings.databases[0].metrics[0]
            .labels
            .insert("__reserved".to_string(), "x".to_string());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_empty_statement_and_zero_timeout() {
        let mut settings = settings();
        settings.databases[0].metrics[0].statement = "  ".to_string();
        assert!(settings.validate().is_err());

        let mut settings = self::settings();
        settings.databases[0].metrics[0].timeout_seconds = Some(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_query_jobs_carry_database_reference() {
        let mut settings = settings();
        settings.databases[0].metrics.push(MetricConfig {
            timeout_seconds: Some(3),
            ..metric("orders_avg_price")
        });

        let jobs = settings.query_jobs();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|job| job.database == "shop"));
        assert_eq!(jobs[1].timeout, Some(Duration::from_secs(3)));
        assert_eq!(jobs[0].interval, Duration::from_secs(1));
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exporter.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
server:
  host: 127.0.0.1
  port: 9187
shutdown:
  grace_period_seconds: 3
  in_flight: abort
databases:
  - name: shop
    url: mysql://root@localhost:3306/shop
    metrics:
      - name: orders_total
        help: Number of orders
        statement: SELECT COUNT(*) FROM orders
        interval_seconds: 1
        labels:
          env: prod
      - name: orders_avg_price
        statement: SELECT AVG(price) FROM orders
        interval_seconds: 2
"#
        )
        .unwrap();

        let settings = Settings::load_from_path(dir.path(), Some(&path)).unwrap();
        assert_eq!(settings.server.port, 9187);
        assert_eq!(settings.shutdown.in_flight, InFlightPolicy::Abort);
        assert_eq!(settings.shutdown.grace_period(), Duration::from_secs(3));
        assert_eq!(settings.databases[0].max_connections, 5);

        let jobs = settings.query_jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].labels.get("env").map(String::as_str), Some("prod"));
        assert_eq!(jobs[1].interval, Duration::from_secs(2));
    }

    #[test]
    fn test_load_without_databases_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Settings::load_from_path(dir.path(), None);
        assert!(matches!(result, Err(ConfigError::NoDatabases)));
    }
}
