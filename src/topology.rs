//! Maps one physical Shelly 3EM onto the logical accessories it is published as.

use crate::config::DeviceConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three measured lines of a 3EM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    A,
    B,
    C,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::A, Phase::B, Phase::C];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Phase::A => "A",
            Phase::B => "B",
            Phase::C => "C",
        };
        f.write_str(letter)
    }
}

/// What a logical accessory measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessoryRole {
    /// Triphase aggregate (net import).
    Main,
    /// Triphase aggregate export.
    Return,
    PhaseA,
    PhaseB,
    PhaseC,
}

impl AccessoryRole {
    /// Suffix appended to the device identity to build the accessory identifier.
    pub fn suffix(&self) -> &'static str {
        match self {
            AccessoryRole::Main => "",
            AccessoryRole::Return => "-return",
            AccessoryRole::PhaseA => "-phaseA",
            AccessoryRole::PhaseB => "-phaseB",
            AccessoryRole::PhaseC => "-phaseC",
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            AccessoryRole::PhaseA => Some(Phase::A),
            AccessoryRole::PhaseB => Some(Phase::B),
            AccessoryRole::PhaseC => Some(Phase::C),
            AccessoryRole::Main | AccessoryRole::Return => None,
        }
    }

    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::A => AccessoryRole::PhaseA,
            Phase::B => AccessoryRole::PhaseB,
            Phase::C => AccessoryRole::PhaseC,
        }
    }

    /// The export accessory only carries power and energy.
    pub fn shows_electrical_values(&self) -> bool {
        !matches!(self, AccessoryRole::Return)
    }
}

/// A logical accessory the planner decided to create for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAccessory {
    pub role: AccessoryRole,
    pub suffix: &'static str,
    pub display_name: String,
}

impl PlannedAccessory {
    fn new(role: AccessoryRole, display_name: String) -> Self {
        Self {
            role,
            suffix: role.suffix(),
            display_name,
        }
    }
}

/// Decides which logical accessories a device contributes.
///
/// Triphase devices get a `Main` accessory plus an optional `Return` one; monophase devices
/// get one accessory per phase and fold return handling into each phase's energy reading.
/// A device with no usable phase mode contributes nothing.
pub fn plan(device: &DeviceConfig) -> Vec<PlannedAccessory> {
    match device.monophase {
        Some(false) => {
            let mut accessories = vec![PlannedAccessory::new(
                AccessoryRole::Main,
                device.name.clone(),
            )];
            if device.enable_triphase_return {
                accessories.push(PlannedAccessory::new(
                    AccessoryRole::Return,
                    format!("{} Return", device.name),
                ));
            }
            accessories
        }
        Some(true) => Phase::ALL
            .iter()
            .map(|phase| {
                PlannedAccessory::new(
                    AccessoryRole::for_phase(*phase),
                    format!("{} Phase {}", device.name, phase),
                )
            })
            .collect(),
        None => Vec::new(),
    }
}
