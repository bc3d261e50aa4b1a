//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and formats (URLs, socket addresses, ports)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before a document is accepted into the system
//! - Not a full schema check; only values that would break a running node

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::Level;
use url::Url;

use crate::config::schema::ServerConfig;

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration document.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let site_url = &config.service.site_url;
    if !site_url.is_empty() {
        match Url::parse(site_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
            Ok(_) => errors.push(ValidationError::new(
                "service.site_url",
                "must be an absolute http or https URL",
            )),
            Err(e) => errors.push(ValidationError::new("service.site_url", e.to_string())),
        }
    }

    if config.metrics.listen_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "metrics.listen_address",
            format!("invalid socket address {:?}", config.metrics.listen_address),
        ));
    }

    if config.admin.listen_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "admin.listen_address",
            format!("invalid socket address {:?}", config.admin.listen_address),
        ));
    }

    let port = &config.email.smtp_port;
    if !port.is_empty() && port.parse::<u16>().map_or(true, |p| p == 0) {
        errors.push(ValidationError::new(
            "email.smtp_port",
            format!("invalid port {:?}", port),
        ));
    }

    if !matches!(config.email.connection_security.as_str(), "" | "TLS" | "STARTTLS") {
        errors.push(ValidationError::new(
            "email.connection_security",
            "must be empty, TLS or STARTTLS",
        ));
    }

    if config.message_export.export_from_timestamp < 0 {
        errors.push(ValidationError::new(
            "message_export.export_from_timestamp",
            "must not be negative",
        ));
    }

    if config.message_export.batch_size == 0 {
        errors.push(ValidationError::new(
            "message_export.batch_size",
            "must be greater than zero",
        ));
    }

    if Level::from_str(&config.log.console_level).is_err() {
        errors.push(ValidationError::new(
            "log.console_level",
            format!("unknown level {:?}", config.log.console_level),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
