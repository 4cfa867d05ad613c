//! Configuration types module

pub mod log;

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::ProtocolVersion;
use crate::transport::{TransportMode, DEFAULT_RESERVED_SYNC_ID};

pub use log::{LogConfig, LogFormat};

/// Everything needed to drive one bot account through a gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Gateway base URL (HTTP routes; the WebSocket URL is derived from it)
    pub endpoint: Url,

    /// Gateway credential (`verifyKey`, or `authKey` on 1.x gateways)
    #[serde(skip_serializing, default = "default_secret")]
    pub verify_key: SecretString,

    /// Bot account
    pub account_id: i64,

    /// Channel used to reach the gateway
    pub transport: TransportMode,

    /// Push sync id the gateway uses for unsolicited events
    pub reserved_sync_id: i64,

    /// Pause between two event fetches (poll mode)
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Events drained per fetch (poll mode)
    pub fetch_count: usize,

    /// Upper bound on one call, HTTP or push
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// Gateway protocol version; detected through `/about` when unset
    pub protocol_version: Option<ProtocolVersion>,

    /// Logging
    pub log: LogConfig,
}

fn default_secret() -> SecretString {
    SecretString::from(String::new())
}

fn default_endpoint() -> Url {
    Url::parse(DEFAULT_ENDPOINT).unwrap_or_else(|_| unreachable!("constant URL"))
}

/// Where a gateway listens out of the box
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080/";

impl Default for BotConfig {
    fn default() -> Self {
        BotConfig {
            endpoint: default_endpoint(),
            verify_key: default_secret(),
            account_id: 0,
            transport: TransportMode::default(),
            reserved_sync_id: DEFAULT_RESERVED_SYNC_ID,
            poll_interval: Duration::from_millis(200),
            fetch_count: 10,
            call_timeout: Duration::from_secs(10),
            protocol_version: None,
            log: LogConfig::default(),
        }
    }
}

impl BotConfig {
    /// Defaults plus the three values every deployment has to provide
    pub fn minimal(endpoint: &str, verify_key: impl Into<String>, account_id: i64) -> Result<Self> {
        Ok(BotConfig {
            endpoint: Url::parse(endpoint)?,
            verify_key: SecretString::from(verify_key.into()),
            account_id,
            ..Default::default()
        })
    }

    /// Builder-style transport selection
    pub fn with_transport(mut self, transport: TransportMode) -> Self {
        self.transport = transport;
        self
    }

    /// Builder-style protocol version pin
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = Some(version);
        self
    }

    /// Reject configurations the bot cannot start with
    ///
    /// Warnings are logged; the first error is returned.
    pub fn validate(&self) -> Result<()> {
        let report = crate::config::validate_config(self);
        for warning in &report.warnings {
            tracing::warn!(path = %warning.path, "{}", warning.message);
        }
        match report.errors.first() {
            Some(issue) => Err(Error::Config(format!("{}: {}", issue.path, issue.message))),
            None => Ok(()),
        }
    }
}
