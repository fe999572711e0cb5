//! Shelly 3EM Energy Meter Library
//!
//! Polls Shelly 3EM energy meters over their local HTTP RPC API and publishes power, energy,
//! current and voltage as power-meter accessories on a smart-home host, one accessory per
//! meter view (total, returned energy, or a single phase).

pub mod accessory_poller;
pub mod characteristics;
pub mod config;
pub mod digest_auth;
pub mod error;
pub mod host;
pub mod logging_host;
pub mod platform;
pub mod reading_reconciler;
pub mod shelly_3em_client;
pub mod shelly_types;
pub mod topology;

// Re-export commonly used types for easier access
pub use accessory_poller::{AccessoryPoller, PollOutcome};
pub use config::{DeviceConfig, PlatformConfig};
pub use error::{ConfigError, DiscoveryError, ShellyError};
pub use host::{AccessoryHost, AccessoryInfo, CharacteristicSurface, HistoryEntry, HistorySink};
pub use logging_host::LoggingHost;
pub use platform::{Platform, PollerRegistry};
pub use reading_reconciler::ReadingState;
pub use shelly_3em_client::{MeterApi, Shelly3EMClient};
pub use topology::{AccessoryRole, Phase};
