//! Configuration validation
//!
//! Validates configuration and reports issues.

use secrecy::ExposeSecret;

use super::types::BotConfig;
use crate::transport::{TransportMode, DEFAULT_RESERVED_SYNC_ID};

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Validate the configuration
pub fn validate_config(config: &BotConfig) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_identity(config, result);
    result = validate_endpoint(config, result);
    result = validate_timing(config, result);

    result
}

fn validate_identity(config: &BotConfig, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.account_id <= 0 {
        result = result.with_error(
            ValidationIssue::new("account_id", "Bot account is not set")
                .with_suggestion("Set MIRAI_QQ or account_id to the bot's QQ number"),
        );
    }

    if config.verify_key.expose_secret().is_empty() {
        result = result.with_warning(
            ValidationIssue::new(
                "verify_key",
                "No verify key configured; only gateways with key verification disabled will accept the session",
            )
            .with_suggestion("Set MIRAI_VERIFY_KEY to the gateway's verifyKey"),
        );
    }

    result
}

fn validate_endpoint(config: &BotConfig, mut result: ConfigValidationResult) -> ConfigValidationResult {
    match config.endpoint.scheme() {
        "http" | "https" => {}
        other => {
            result = result.with_error(
                ValidationIssue::new(
                    "endpoint",
                    format!("Unsupported endpoint scheme '{}'", other),
                )
                .with_suggestion("Use the gateway's HTTP base URL, e.g. http://127.0.0.1:8080"),
            );
        }
    }

    if config.transport != TransportMode::Poll && config.endpoint.scheme() == "https" {
        result = result.with_error(
            ValidationIssue::new(
                "endpoint",
                "Secure WebSocket channels are not supported",
            )
            .with_suggestion("Use the poll transport or a plain-HTTP endpoint"),
        );
    }

    if let Some(version) = config.protocol_version {
        if version.is_legacy() && config.transport != TransportMode::Poll {
            result = result.with_error(
                ValidationIssue::new(
                    "transport",
                    format!("Protocol {} has no WebSocket channel", version),
                )
                .with_suggestion("Use transport = \"poll\" with 1.x gateways"),
            );
        }
    }

    if config.reserved_sync_id != DEFAULT_RESERVED_SYNC_ID {
        result = result.with_warning(ValidationIssue::new(
            "reserved_sync_id",
            format!(
                "Reserved sync id {} differs from the gateway default; it must match the gateway's setting",
                config.reserved_sync_id
            ),
        ));
    }

    result
}

fn validate_timing(config: &BotConfig, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.fetch_count == 0 {
        result = result.with_error(ValidationIssue::new(
            "fetch_count",
            "Fetch count must be at least 1",
        ));
    }

    if config.call_timeout.is_zero() {
        result = result.with_error(ValidationIssue::new(
            "call_timeout",
            "Call timeout must be greater than zero",
        ));
    }

    if config.poll_interval.is_zero() && config.transport == TransportMode::Poll {
        result = result.with_warning(
            ValidationIssue::new("poll_interval", "Zero poll interval fetches in a tight loop")
                .with_suggestion("Use the default of 200ms"),
        );
    }

    result
}
