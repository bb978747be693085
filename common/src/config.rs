// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable that overrides the configuration directory
pub const CONFIG_DIR_ENV: &str = "APP_CONFIG_DIR";

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub nats: NatsConfig,
    pub scheduler: SchedulerConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    /// Name of the job table
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    pub stream_name: String,
    /// Subjects are `<subject_prefix>.<routing_key>`
    pub subject_prefix: String,
    pub publish_timeout_seconds: u64,
    pub max_age_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on broker publishes running at the same time
    pub max_concurrent_publishes: usize,
    /// Pause before re-querying the job table after a store error
    pub error_backoff_millis: u64,
    /// How long `stop` waits for in-flight publishes
    pub shutdown_timeout_seconds: u64,
}

impl SchedulerConfig {
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_millis)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        let dir = std::env::var(CONFIG_DIR_ENV).unwrap_or_else(|_| "config".to_string());
        Self::load_from_path(dir)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if !is_sql_identifier(&self.database.table) {
            return Err(format!(
                "Database table '{}' must be a plain SQL identifier",
                self.database.table
            ));
        }

        if self.nats.url.is_empty() {
            return Err("NATS URL cannot be empty".to_string());
        }
        if self.nats.stream_name.is_empty() {
            return Err("NATS stream_name cannot be empty".to_string());
        }
        if !crate::queue::nats::is_literal_subject(&self.nats.subject_prefix) {
            return Err("NATS subject_prefix must be a non-empty literal subject".to_string());
        }

        if self.scheduler.max_concurrent_publishes == 0 {
            return Err("Scheduler max_concurrent_publishes must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Letters, digits and underscores, not starting with a digit
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 17500,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/scheduler".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_seconds: 30,
            table: "jobs".to_string(),
        }
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_name: "SCHEDULED".to_string(),
            subject_prefix: "scheduled".to_string(),
            publish_timeout_seconds: 5,
            max_age_seconds: 86400, // 24 hours
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_publishes: 32,
            error_backoff_millis: 1000,
            shutdown_timeout_seconds: 10,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            tracing_endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_database_url() {
        let mut settings = Settings::default();
        settings.database.url = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_port() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_unsafe_table_name() {
        let mut settings = Settings::default();
        settings.database.table = "jobs; DROP TABLE users".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_wildcard_subject_prefix() {
        let mut settings = Settings::default();
        settings.nats.subject_prefix = "scheduled.>".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_publish_bound() {
        let mut settings = Settings::default();
        settings.scheduler.max_concurrent_publishes = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_sql_identifier() {
        assert!(is_sql_identifier("jobs"));
        assert!(is_sql_identifier("_jobs_2"));
        assert!(!is_sql_identifier(""));
        assert!(!is_sql_identifier("2jobs"));
        assert!(!is_sql_identifier("public.jobs"));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            file,
            "[server]\nhost = \"127.0.0.1\"\nport = 18000\n\n[database]\nurl = \"postgresql://db/test\"\nmax_connections = 3\nmin_connections = 1\nconnect_timeout_seconds = 5\ntable = \"dalga\""
        )
        .unwrap();

        let settings = Settings::load_from_path(dir.path()).unwrap();
        assert_eq!(settings.server.port, 18000);
        assert_eq!(settings.database.table, "dalga");
        assert_eq!(settings.nats.subject_prefix, "scheduled");
    }

    #[test]
    fn test_partial_section_keeps_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "[database]\nurl = \"postgresql://db/partial\"\n\n[scheduler]\nmax_concurrent_publishes = 4\n",
        )
        .unwrap();

        let settings = Settings::load_from_path(dir.path()).unwrap();
        assert_eq!(settings.database.url, "postgresql://db/partial");
        assert_eq!(settings.database.max_connections, 10);
        assert_eq!(settings.database.table, "jobs");
        assert_eq!(settings.scheduler.max_concurrent_publishes, 4);
        assert_eq!(settings.scheduler.error_backoff_millis, 1000);
        assert!(settings.validate().is_ok());
    }
}
