// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub nats: NatsConfig,
    pub smtp: SmtpConfig,
    pub webhooks: WebhooksConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    pub url: String,
    pub stream_name: String,
    pub consumer_name: String,
}

/// SMTP transport settings for the outbound mailer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub from_name: String,
}

/// Shared secrets for inbound webhook signature verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhooksConfig {
    pub identity_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub poll_interval_seconds: u64,
    pub max_runs_per_poll: usize,
    /// IANA time zone used for every calendar-date decision (due-today
    /// comparison, dates rendered into email bodies)
    pub timezone: String,
}

impl SchedulerConfig {
    /// Parse the configured calendar zone
    pub fn timezone(&self) -> Result<chrono_tz::Tz, String> {
        chrono_tz::Tz::from_str(&self.timezone)
            .map_err(|_| format!("Invalid timezone: {}", self.timezone))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Bounded in-process retries for a single email before the failure is
    /// logged and swallowed
    pub mail_max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment-specific configuration
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

        if self.nats.url.is_empty() {
            return Err("NATS URL cannot be empty".to_string());
        }
        if self.nats.stream_name.is_empty() {
            return Err("NATS stream_name cannot be empty".to_string());
        }

        if self.smtp.host.is_empty() {
            return Err("SMTP host cannot be empty".to_string());
        }
        if self.smtp.from_address.is_empty() {
            return Err("SMTP from_address cannot be empty".to_string());
        }

        if self.webhooks.identity_secret.is_empty() {
            return Err("Identity webhook secret cannot be empty".to_string());
        }

        if self.scheduler.poll_interval_seconds == 0 {
            return Err("Scheduler poll_interval_seconds must be greater than 0".to_string());
        }
        if self.scheduler.max_runs_per_poll == 0 {
            return Err("Scheduler max_runs_per_poll must be greater than 0".to_string());
        }
        self.scheduler.timezone()?;

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/taskpulse".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
            },
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                stream_name: "events".to_string(),
                consumer_name: "event_workers".to_string(),
            },
            smtp: SmtpConfig {
                host: "localhost".to_string(),
                port: 587,
                username: "taskpulse".to_string(),
                password: "change-me-in-production".to_string(),
                from_address: "notifications@taskpulse.local".to_string(),
                from_name: "Taskpulse".to_string(),
            },
            webhooks: WebhooksConfig {
                identity_secret: "change-me-in-production".to_string(),
            },
            scheduler: SchedulerConfig {
                poll_interval_seconds: 10,
                max_runs_per_poll: 100,
                timezone: "UTC".to_string(),
            },
            worker: WorkerConfig {
                mail_max_retries: 3,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
                tracing_endpoint: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_validation_catches_bad_timezone() {
        let mut settings = Settings::default();
        settings.scheduler.timezone = "Mars/Olympus_Mons".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_timezone_parses_named_zone() {
        let mut settings = Settings::default();
        settings.scheduler.timezone = "Asia/Ho_Chi_Minh".to_string();
        assert!(settings.scheduler.timezone().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_webhook_secret() {
        let mut settings = Settings::default();
        settings.webhooks.identity_secret = String::new();
        assert!(settings.validate().is_err());
    }
}
