//! Interfaces of the smart-home host runtime the bridge publishes into.

use crate::characteristics::{CharacteristicDescriptor, ServiceDescriptor};
use crate::config::DeviceConfig;
use crate::topology::AccessoryRole;
use uuid::Uuid;

pub const MANUFACTURER: &str = "Shelly";
pub const MODEL: &str = "3EM";

/// Everything the host needs to know about one logical accessory.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessoryInfo {
    pub uuid: Uuid,
    pub display_name: String,
    pub role: AccessoryRole,
    pub serial_number: String,
    pub device: DeviceConfig,
}

impl AccessoryInfo {
    /// `identity` is the device MAC address, or its address when the MAC is unknown.
    pub fn new(
        identity: &str,
        role: AccessoryRole,
        display_name: String,
        device: DeviceConfig,
    ) -> Self {
        let identifier = format!("{identity}{}", role.suffix());
        Self {
            uuid: accessory_uuid(&identifier),
            display_name,
            role,
            serial_number: identifier,
            device,
        }
    }

    pub fn manufacturer(&self) -> &'static str {
        MANUFACTURER
    }

    pub fn model(&self) -> &'static str {
        MODEL
    }
}

/// Stable accessory UUID derived from the accessory identifier.
pub fn accessory_uuid(identifier: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, identifier.as_bytes())
}

/// One point of the energy history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
    /// Unix timestamp in seconds.
    pub time: i64,
    /// W
    pub power: f64,
    /// kWh
    pub total_energy: f64,
}

/// Live characteristic values of accessories.
pub trait CharacteristicSurface: Send + Sync {
    fn register_characteristic(
        &self,
        accessory: &AccessoryInfo,
        service: &ServiceDescriptor,
        characteristic: &'static CharacteristicDescriptor,
    ) -> anyhow::Result<()>;

    fn update_characteristic(
        &self,
        accessory: &AccessoryInfo,
        characteristic: &'static CharacteristicDescriptor,
        value: f64,
    ) -> anyhow::Result<()>;
}

/// Persistent energy history of accessories.
pub trait HistorySink: Send + Sync {
    fn add_entry(&self, accessory: &AccessoryInfo, entry: HistoryEntry) -> anyhow::Result<()>;
}

/// Accessory lifecycle of the host runtime.
pub trait AccessoryHost: CharacteristicSurface + HistorySink {
    fn register_accessory(&self, accessory: &AccessoryInfo);

    /// Re-applies configuration to an accessory the host restored from its cache.
    fn update_accessory(&self, accessory: &AccessoryInfo);

    fn unregister_accessory(&self, accessory: &AccessoryInfo);
}
