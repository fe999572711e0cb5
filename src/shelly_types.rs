use crate::topology::Phase;
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload returned by a custom script endpoint: a flat object of named values.
pub type CustomScriptData = Map<String, Value>;

/// `Sys.GetConfig` response, reduced to what discovery needs.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellySysConfig {
    pub device: ShellyDeviceInfo,
    #[serde(default)]
    pub cfg_rev: Option<u64>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellyDeviceInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub fw_id: Option<String>,
    #[serde(default)]
    pub eco_mode: Option<bool>,
    /// `"monophase"` or `"triphase"`
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub discoverable: Option<bool>,
}

/// Instantaneous readings of one phase.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct PhaseStatus {
    pub current: Option<f64>,
    pub voltage: Option<f64>,
    pub act_power: Option<f64>,
}

/// `EM.GetStatus` response.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellyEMStatus {
    pub id: Option<u32>,
    pub a_current: Option<f64>,
    pub a_voltage: Option<f64>,
    pub a_act_power: Option<f64>,
    pub a_aprt_power: Option<f64>,
    pub a_pf: Option<f64>,
    pub a_freq: Option<f64>,
    pub b_current: Option<f64>,
    pub b_voltage: Option<f64>,
    pub b_act_power: Option<f64>,
    pub b_aprt_power: Option<f64>,
    pub b_pf: Option<f64>,
    pub b_freq: Option<f64>,
    pub c_current: Option<f64>,
    pub c_voltage: Option<f64>,
    pub c_act_power: Option<f64>,
    pub c_aprt_power: Option<f64>,
    pub c_pf: Option<f64>,
    pub c_freq: Option<f64>,
    pub n_current: Option<f64>,
    pub total_current: Option<f64>,
    pub total_act_power: Option<f64>,
    pub total_aprt_power: Option<f64>,
    pub user_calibrated_phase: Option<Vec<String>>,
    pub errors: Option<Vec<String>>,
}

impl ShellyEMStatus {
    pub fn phase(&self, phase: Phase) -> PhaseStatus {
        match phase {
            Phase::A => PhaseStatus {
                current: self.a_current,
                voltage: self.a_voltage,
                act_power: self.a_act_power,
            },
            Phase::B => PhaseStatus {
                current: self.b_current,
                voltage: self.b_voltage,
                act_power: self.b_act_power,
            },
            Phase::C => PhaseStatus {
                current: self.c_current,
                voltage: self.c_voltage,
                act_power: self.c_act_power,
            },
        }
    }
}

/// `EMData.GetStatus` response. Energies are in Wh.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellyEMDataStatus {
    pub id: Option<u32>,
    pub a_total_act_energy: Option<f64>,
    pub a_total_act_ret_energy: Option<f64>,
    pub b_total_act_energy: Option<f64>,
    pub b_total_act_ret_energy: Option<f64>,
    pub c_total_act_energy: Option<f64>,
    pub c_total_act_ret_energy: Option<f64>,
    pub total_act: Option<f64>,
    pub total_act_ret: Option<f64>,
}

impl ShellyEMDataStatus {
    /// Forward and returned energy of one phase, missing values read as zero.
    pub fn phase_energy(&self, phase: Phase) -> (f64, f64) {
        let (energy, returned) = match phase {
            Phase::A => (self.a_total_act_energy, self.a_total_act_ret_energy),
            Phase::B => (self.b_total_act_energy, self.b_total_act_ret_energy),
            Phase::C => (self.c_total_act_energy, self.c_total_act_ret_energy),
        };
        (energy.unwrap_or_default(), returned.unwrap_or_default())
    }
}

/// Cumulative energy as delivered by whichever source the device is configured for.
#[derive(Debug, Clone, PartialEq)]
pub enum EnergyPayload {
    Standard(ShellyEMDataStatus),
    CustomScript(CustomScriptData),
}
