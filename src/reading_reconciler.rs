use crate::config::DeviceConfig;
use crate::error::ShellyError;
use crate::shelly_types::{CustomScriptData, EnergyPayload, ShellyEMDataStatus, ShellyEMStatus};
use crate::topology::AccessoryRole;
use tracing::error;

const WH_TO_KWH: f64 = 1000.0;

/// Normalized readings of one logical accessory.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ReadingState {
    /// Active power in W, never negative.
    pub power: f64,
    /// Cumulative energy in kWh.
    pub energy: f64,
    pub current: f64,
    pub voltage: f64,
}

/// Combines the outcome of both fetches of one poll cycle into the next reading set.
///
/// The telemetry half and the energy half are applied independently (telemetry first), so a
/// failure of one source only zeroes the readings it feeds.
pub fn reconcile(
    role: AccessoryRole,
    status: &Result<ShellyEMStatus, ShellyError>,
    energy: &Result<EnergyPayload, ShellyError>,
    device: &DeviceConfig,
    previous: ReadingState,
) -> ReadingState {
    let mut next = previous;
    apply_status(&mut next, role, status, device);
    apply_energy(&mut next, role, energy, device);
    next
}

fn failure_message(source: &str, e: &ShellyError) -> String {
    if e.is_timeout() {
        format!("Request timeout ({source})")
    } else {
        format!("Request failed ({source}): {e}")
    }
}

fn positive_or_zero(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v > 0.0 => v,
        _ => 0.0,
    }
}

/// Mean of the phase voltages that are actually reported.
pub fn average_voltage(status: &ShellyEMStatus) -> f64 {
    let valid: Vec<f64> = [status.a_voltage, status.b_voltage, status.c_voltage]
        .into_iter()
        .flatten()
        .filter(|v| *v > 0.0)
        .collect();
    if valid.is_empty() {
        0.0
    } else {
        valid.iter().sum::<f64>() / valid.len() as f64
    }
}

fn apply_status(
    state: &mut ReadingState,
    role: AccessoryRole,
    result: &Result<ShellyEMStatus, ShellyError>,
    device: &DeviceConfig,
) {
    let data = match result {
        Ok(data) => data,
        Err(e) => {
            error!("{}", failure_message("status", e));
            state.current = 0.0;
            state.voltage = 0.0;
            state.power = 0.0;
            return;
        }
    };

    match (role, role.phase()) {
        (_, Some(phase)) => {
            let phase = data.phase(phase);
            if device.display_current_values {
                state.current = phase.current.unwrap_or_default();
            }
            if device.display_voltage_values {
                state.voltage = phase.voltage.unwrap_or_default();
            }
            state.power = positive_or_zero(phase.act_power);
        }
        (AccessoryRole::Return, _) => {
            // Negative total power means the installation is exporting
            state.power = match data.total_act_power {
                Some(p) if p < 0.0 => p.abs(),
                _ => 0.0,
            };
        }
        _ => {
            if device.display_current_values {
                state.current = data.total_current.unwrap_or_default();
            }
            if device.display_voltage_values {
                state.voltage = average_voltage(data);
            }
            state.power = positive_or_zero(data.total_act_power);
        }
    }
}

fn apply_energy(
    state: &mut ReadingState,
    role: AccessoryRole,
    result: &Result<EnergyPayload, ShellyError>,
    device: &DeviceConfig,
) {
    state.energy = match result {
        Ok(EnergyPayload::Standard(data)) => standard_energy(role, data, device),
        Ok(EnergyPayload::CustomScript(data)) => custom_script_energy(role, data, device),
        Err(e) => {
            if device.custom_script.is_some() {
                error!("{}", failure_message("custom script data", e));
            } else {
                error!("{}", failure_message("data", e));
            }
            0.0
        }
    };
}

fn standard_energy(role: AccessoryRole, data: &ShellyEMDataStatus, device: &DeviceConfig) -> f64 {
    let watt_hours = match (role, role.phase()) {
        (_, Some(phase)) => {
            let (energy, returned) = data.phase_energy(phase);
            if device.phase_return_enabled(phase) {
                returned
            } else {
                energy
            }
        }
        (AccessoryRole::Return, _) => data.total_act_ret.unwrap_or_default(),
        _ => data.total_act.unwrap_or_default(),
    };
    watt_hours / WH_TO_KWH
}

/// Custom scripts already report kWh under the configured keys.
fn custom_script_energy(role: AccessoryRole, data: &CustomScriptData, device: &DeviceConfig) -> f64 {
    let Some(script) = &device.custom_script else {
        return 0.0;
    };
    let key = if role == AccessoryRole::Return {
        &script.return_energy_key
    } else {
        &script.energy_key
    };
    data.get(key).and_then(|v| v.as_f64()).unwrap_or_default()
}
