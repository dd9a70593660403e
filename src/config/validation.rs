//! Configuration validation
//!
//! Checks a loaded configuration before the service starts:
//! - The bind address parses
//! - TTLs, timeouts and the sweep interval are non-zero
//! - Paths are non-empty

use super::stats_config::{CacheBackend, GesStatsConfig};
use crate::StatsError;
use std::net::SocketAddr;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub section: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            section: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn in_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref section) = self.section {
            write!(f, "[{}] {}: {}", section, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a ges-stats configuration, collecting every problem
pub fn validate_config(config: &GesStatsConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.server.bind.parse::<SocketAddr>().is_err() {
        errors.push(
            ValidationError::new(
                "bind",
                format!("Not a socket address: {}", config.server.bind),
            )
            .in_section("server"),
        );
    }

    if config.database.path.as_os_str().is_empty() {
        errors.push(ValidationError::new("path", "Database path is empty").in_section("database"));
    }

    if config.cache.backend == CacheBackend::Sqlite && config.cache.path.as_os_str().is_empty() {
        errors.push(
            ValidationError::new("path", "The sqlite cache backend needs a path")
                .in_section("cache"),
        );
    }

    if config.cache.sweep_interval_secs == 0 {
        errors.push(
            ValidationError::new("sweep_interval_secs", "Must be greater than zero")
                .in_section("cache"),
        );
    }

    if config.stats.ttl_secs == 0 {
        errors.push(
            ValidationError::new("ttl_secs", "Must be greater than zero").in_section("stats"),
        );
    }

    if config.stats.query_timeout_secs == 0 {
        errors.push(
            ValidationError::new("query_timeout_secs", "Must be greater than zero")
                .in_section("stats"),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate and convert errors to a single crate error
pub fn validate_config_result(config: &GesStatsConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        StatsError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
