//! Static descriptions of the power meter service and its Eve-compatible characteristics.

use crate::config::DeviceConfig;
use crate::topology::AccessoryRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicFormat {
    UInt16,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    PairedRead,
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharacteristicDescriptor {
    pub name: &'static str,
    pub uuid: &'static str,
    pub format: CharacteristicFormat,
    pub unit: &'static str,
    pub min_value: f64,
    pub max_value: f64,
    pub min_step: f64,
    pub perms: &'static [Permission],
}

impl CharacteristicDescriptor {
    pub fn accepts(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min_value && value <= self.max_value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub uuid: &'static str,
}

const READ_NOTIFY: &[Permission] = &[Permission::PairedRead, Permission::Notify];
const MAX_VALUE: f64 = 1_000_000_000.0;
const MIN_STEP: f64 = 0.001;

pub const POWER_METER_SERVICE: ServiceDescriptor = ServiceDescriptor {
    uuid: "00000001-0000-1777-8000-775D67EC4377",
};

pub const POWER: CharacteristicDescriptor = CharacteristicDescriptor {
    name: "Consumption",
    uuid: "E863F10D-079E-48FF-8F27-9C2605A29F52",
    format: CharacteristicFormat::UInt16,
    unit: "W",
    min_value: 0.0,
    max_value: MAX_VALUE,
    min_step: MIN_STEP,
    perms: READ_NOTIFY,
};

pub const ENERGY: CharacteristicDescriptor = CharacteristicDescriptor {
    name: "Energy",
    uuid: "E863F10C-079E-48FF-8F27-9C2605A29F52",
    format: CharacteristicFormat::UInt16,
    unit: "kWh",
    min_value: 0.0,
    max_value: MAX_VALUE,
    min_step: MIN_STEP,
    perms: READ_NOTIFY,
};

pub const CURRENT: CharacteristicDescriptor = CharacteristicDescriptor {
    name: "Ampere",
    uuid: "E863F126-079E-48FF-8F27-9C2605A29F52",
    format: CharacteristicFormat::Float,
    unit: "A",
    min_value: 0.0,
    max_value: MAX_VALUE,
    min_step: MIN_STEP,
    perms: READ_NOTIFY,
};

pub const VOLTAGE: CharacteristicDescriptor = CharacteristicDescriptor {
    name: "Volt",
    uuid: "E863F10A-079E-48FF-8F27-9C2605A29F52",
    format: CharacteristicFormat::Float,
    unit: "V",
    min_value: 0.0,
    max_value: MAX_VALUE,
    min_step: MIN_STEP,
    perms: READ_NOTIFY,
};

/// Whether the current characteristic is published for this accessory.
pub fn shows_current(role: AccessoryRole, device: &DeviceConfig) -> bool {
    device.display_current_values && role.shows_electrical_values()
}

pub fn shows_voltage(role: AccessoryRole, device: &DeviceConfig) -> bool {
    device.display_voltage_values && role.shows_electrical_values()
}

/// Characteristics registered on the power meter service, in publish order.
pub fn characteristics_for(
    role: AccessoryRole,
    device: &DeviceConfig,
) -> Vec<&'static CharacteristicDescriptor> {
    let mut list = vec![&POWER];
    if shows_current(role, device) {
        list.push(&CURRENT);
    }
    if shows_voltage(role, device) {
        list.push(&VOLTAGE);
    }
    list.push(&ENERGY);
    list
}
