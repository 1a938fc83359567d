use std::net::IpAddr;

use crate::config::models::{ServerConfig, SocketOption};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid bind host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration, collecting every problem.
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_host(&config.host) {
            errors.push(e);
        }

        if config.backlog <= 0 {
            errors.push(Self::invalid("backlog", "must be greater than 0"));
        }

        if config.connection_limit == 0 {
            errors.push(Self::invalid(
                "connection_limit",
                "must be at least 1 or no connection will ever be accepted",
            ));
        }

        if config.recv_bytes == 0 {
            errors.push(Self::invalid("recv_bytes", "must be greater than 0"));
        }

        if config.max_request_header_size == 0 {
            errors.push(Self::invalid(
                "max_request_header_size",
                "must be greater than 0",
            ));
        }

        if config.poll_interval_ms == 0 {
            errors.push(Self::invalid("poll_interval_ms", "must be greater than 0"));
        }

        if config.ident.trim().is_empty() {
            errors.push(Self::invalid("ident", "must not be empty"));
        }

        for (i, option) in config.socket_options.iter().enumerate() {
            if let Err(e) = Self::validate_socket_option(i, option) {
                errors.push(e);
            }
        }

        if let Err(e) = tracing_subscriber::EnvFilter::try_new(&config.logging.level) {
            errors.push(Self::invalid("logging.level", &e.to_string()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// An empty host means "all interfaces"; anything else must be an IP
    /// literal or a plausible hostname.
    fn validate_host(host: &str) -> ValidationResult<()> {
        if host.is_empty() || host.parse::<IpAddr>().is_ok() {
            return Ok(());
        }

        let valid_hostname = host.len() <= 253
            && host.split('.').all(|label| {
                !label.is_empty()
                    && label.len() <= 63
                    && !label.starts_with('-')
                    && !label.ends_with('-')
                    && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            });

        if valid_hostname {
            Ok(())
        } else {
            Err(ValidationError::InvalidHost {
                host: host.to_string(),
                reason: "Must be empty, an IP address, or a hostname (e.g. '127.0.0.1' or 'localhost')"
                    .to_string(),
            })
        }
    }

    fn validate_socket_option(index: usize, option: &SocketOption) -> ValidationResult<()> {
        match option {
            SocketOption::RecvBufferSize(0) | SocketOption::SendBufferSize(0) => Err(
                Self::invalid(&format!("socket_options[{index}]"), "buffer size must be > 0"),
            ),
            _ => Ok(()),
        }
    }

    fn invalid(field: &str, message: &str) -> ValidationError {
        ValidationError::InvalidField {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_defaults() {
        assert!(ServerConfigValidator::validate(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn validate_accepts_empty_host_and_hostnames() {
        for host in ["", "localhost", "api.example.com", "::1", "10.0.0.1"] {
            let config = ServerConfig {
                host: host.to_string(),
                ..ServerConfig::default()
            };
            assert!(
                ServerConfigValidator::validate(&config).is_ok(),
                "host {host:?} should be valid"
            );
        }
    }

    #[test]
    fn validate_rejects_bad_host() {
        let config = ServerConfig {
            host: "not a host!".to_string(),
            ..ServerConfig::default()
        };
        assert!(ServerConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_zero_connection_limit() {
        let config = ServerConfig {
            connection_limit: 0,
            ..ServerConfig::default()
        };
        assert!(ServerConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_allows_inline_execution() {
        let config = ServerConfig {
            threads: 0,
            ..ServerConfig::default()
        };
        assert!(ServerConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn validate_reports_every_error() {
        let config = ServerConfig {
            backlog: 0,
            connection_limit: 0,
            socket_options: vec![SocketOption::SendBufferSize(0)],
            ..ServerConfig::default()
        };
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("Found 3 validation errors"));
    }
}
