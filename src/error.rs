use std::time::Duration;
use thiserror::Error;

/// Failure of a single request against a Shelly device.
#[derive(Debug, Error)]
pub enum ShellyError {
    #[error("Request timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("HTTP {status} for {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid JSON from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Digest authentication failed: {0}")]
    Digest(String),

    #[error("Invalid device URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ShellyError {
    /// True when the device rejected our credentials (HTTP 401).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ShellyError::Http { status: 401, .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ShellyError::Timeout(_))
    }
}

/// A device entry that cannot be turned into a usable `DeviceConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Device configuration missing required \"name\" parameter")]
    MissingName,

    #[error("Device \"{name}\" is missing required \"ip\" parameter")]
    MissingAddress { name: String },

    #[error("[{name}] update_interval should be a number greater than timeout (ms)")]
    IntervalNotAboveTimeout { name: String },

    #[error("[{name}] update_interval must not exceed {max_ms} ms")]
    IntervalTooLong { name: String, max_ms: u128 },

    #[error("Device \"{name}\" ({ip}) has authentication enabled but no password provided")]
    MissingPassword { name: String, ip: String },

    #[error(
        "Device \"{name}\" ({ip}) has custom_script enabled but is missing required field(s): {}",
        .fields.join(", ")
    )]
    IncompleteCustomScript {
        name: String,
        ip: String,
        fields: Vec<&'static str>,
    },

    #[error("Device entry is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Outcome of the discovery-time `Sys.GetConfig` check that prevents accessory creation,
/// or downgrades to a warning in the `Unreachable` case.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(
        "Device \"{name}\" ({ip}) authentication failed. \
         Please enable authentication and provide correct password in config"
    )]
    Authentication { name: String, ip: String },

    #[error("Device \"{name}\" ({ip}) does not provide a MAC address")]
    MissingMac { name: String, ip: String },

    #[error("Device \"{name}\" config mismatch: Plugin:{configured}, Shelly:{reported}")]
    ProfileMismatch {
        name: String,
        configured: bool,
        reported: String,
    },

    #[error("Device \"{name}\" ({ip}) validation warning: {source}")]
    Unreachable {
        name: String,
        ip: String,
        #[source]
        source: ShellyError,
    },
}

impl DiscoveryError {
    /// Only transient reachability problems still allow the device's accessories to be created.
    pub fn skips_device(&self) -> bool {
        !matches!(self, DiscoveryError::Unreachable { .. })
    }
}
