use crate::error::ConfigError;
use crate::topology::Phase;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Top level of the JSON configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Device entries are decoded one by one so a broken entry only skips itself.
    #[serde(default)]
    pub devices: Vec<Value>,
}

impl PlatformConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Cannot parse config file {}", path.display()))
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Script endpoint that replaces `EMData.GetStatus` as the energy source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomScript {
    pub id: u32,
    pub endpoint: String,
    pub energy_key: String,
    pub return_energy_key: String,
}

/// A validated device entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    /// Host (and optional port) the device answers on.
    pub ip: String,
    /// `None` when the entry did not carry a boolean phase mode.
    pub monophase: Option<bool>,
    /// Set when digest authentication is enabled.
    pub password: Option<String>,
    pub update_interval: Duration,
    pub timeout: Duration,
    pub enable_triphase_return: bool,
    pub enable_phase_a_return: bool,
    pub enable_phase_b_return: bool,
    pub enable_phase_c_return: bool,
    pub display_current_values: bool,
    pub display_voltage_values: bool,
    pub custom_script: Option<CustomScript>,
}

impl DeviceConfig {
    /// Decodes and validates one entry of the `devices` list.
    pub fn from_entry(entry: &Value) -> Result<Self, ConfigError> {
        let raw: RawDeviceEntry = serde_json::from_value(entry.clone())?;
        raw.validate()
    }

    pub fn auth_enabled(&self) -> bool {
        self.password.is_some()
    }

    pub fn phase_return_enabled(&self, phase: Phase) -> bool {
        match phase {
            Phase::A => self.enable_phase_a_return,
            Phase::B => self.enable_phase_b_return,
            Phase::C => self.enable_phase_c_return,
        }
    }
}

/// Device entry as found in the file. Every field is decoded leniently: a value of the
/// wrong JSON type reads as absent.
#[derive(Debug, Default, Deserialize)]
struct RawDeviceEntry {
    #[serde(default, deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    ip: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    monophase: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    auth: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pass: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    update_interval: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    timeout: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    enable_triphase_return: Option<bool>,
    #[serde(default, rename = "enable_phaseA_return", deserialize_with = "lenient")]
    enable_phase_a_return: Option<bool>,
    #[serde(default, rename = "enable_phaseB_return", deserialize_with = "lenient")]
    enable_phase_b_return: Option<bool>,
    #[serde(default, rename = "enable_phaseC_return", deserialize_with = "lenient")]
    enable_phase_c_return: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    display_current_values: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    display_voltage_values: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    custom_script: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    custom_script_id: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    custom_script_endpoint: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    custom_script_energy_key: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    custom_script_ret_energy_key: Option<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Longest accepted update interval, one day.
pub const MAX_UPDATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

fn millis(ms: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(ms / 1000.0).ok()
}

impl RawDeviceEntry {
    fn validate(self) -> Result<DeviceConfig, ConfigError> {
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .ok_or(ConfigError::MissingName)?;
        let ip = match self.ip.filter(|ip| !ip.is_empty()) {
            Some(ip) => ip,
            None => return Err(ConfigError::MissingAddress { name }),
        };

        let (update_interval, timeout) = match (self.update_interval, self.timeout) {
            (Some(interval), Some(timeout)) if timeout > 0.0 && interval > timeout => {
                match (millis(interval), millis(timeout)) {
                    (Some(interval), Some(timeout)) if interval <= MAX_UPDATE_INTERVAL => {
                        (interval, timeout)
                    }
                    _ => {
                        return Err(ConfigError::IntervalTooLong {
                            name,
                            max_ms: MAX_UPDATE_INTERVAL.as_millis(),
                        })
                    }
                }
            }
            _ => return Err(ConfigError::IntervalNotAboveTimeout { name }),
        };

        let password = if self.auth == Some(true) {
            match non_blank(self.pass) {
                Some(pass) => Some(pass),
                None => return Err(ConfigError::MissingPassword { name, ip }),
            }
        } else {
            None
        };

        let custom_script = if self.custom_script == Some(true) {
            let id = self
                .custom_script_id
                .filter(|id| *id >= 0.0 && id.fract() == 0.0 && *id <= u32::MAX as f64);
            let endpoint = non_blank(self.custom_script_endpoint);
            let energy_key = non_blank(self.custom_script_energy_key);
            let return_energy_key = non_blank(self.custom_script_ret_energy_key);

            match (id, endpoint, energy_key, return_energy_key) {
                (Some(id), Some(endpoint), Some(energy_key), Some(return_energy_key)) => {
                    Some(CustomScript {
                        id: id as u32,
                        endpoint,
                        energy_key,
                        return_energy_key,
                    })
                }
                (id, endpoint, energy_key, return_energy_key) => {
                    let mut fields = Vec::new();
                    if id.is_none() {
                        fields.push("custom_script_id");
                    }
                    if endpoint.is_none() {
                        fields.push("custom_script_endpoint");
                    }
                    if energy_key.is_none() {
                        fields.push("custom_script_energy_key");
                    }
                    if return_energy_key.is_none() {
                        fields.push("custom_script_ret_energy_key");
                    }
                    return Err(ConfigError::IncompleteCustomScript { name, ip, fields });
                }
            }
        } else {
            None
        };

        Ok(DeviceConfig {
            name,
            ip,
            monophase: self.monophase,
            password,
            update_interval,
            timeout,
            enable_triphase_return: self.enable_triphase_return.unwrap_or_default(),
            enable_phase_a_return: self.enable_phase_a_return.unwrap_or_default(),
            enable_phase_b_return: self.enable_phase_b_return.unwrap_or_default(),
            enable_phase_c_return: self.enable_phase_c_return.unwrap_or_default(),
            display_current_values: self.display_current_values.unwrap_or_default(),
            display_voltage_values: self.display_voltage_values.unwrap_or_default(),
            custom_script,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// A valid triphase device; tweak it through the closure.
    pub(crate) fn device_with(tweak: impl FnOnce(&mut DeviceConfig)) -> DeviceConfig {
        let mut device = DeviceConfig {
            name: "Meter".to_string(),
            ip: "192.168.1.50".to_string(),
            monophase: Some(false),
            password: None,
            update_interval: Duration::from_millis(10_000),
            timeout: Duration::from_millis(5_000),
            enable_triphase_return: false,
            enable_phase_a_return: false,
            enable_phase_b_return: false,
            enable_phase_c_return: false,
            display_current_values: true,
            display_voltage_values: true,
            custom_script: None,
        };
        tweak(&mut device);
        device
    }

    fn base_entry() -> Value {
        json!({
            "name": "House",
            "ip": "192.168.1.50",
            "monophase": false,
            "auth": false,
            "update_interval": 10000,
            "timeout": 5000
        })
    }

    fn entry_with(patch: Value) -> Value {
        let mut entry = base_entry();
        let map = entry.as_object_mut().unwrap();
        for (k, v) in patch.as_object().unwrap() {
            map.insert(k.clone(), v.clone());
        }
        entry
    }

    #[test]
    fn test_valid_entry() {
        let device = DeviceConfig::from_entry(&entry_with(json!({
            "enable_triphase_return": true,
            "enable_phaseB_return": true,
            "display_voltage_values": true
        })))
        .unwrap();

        assert_eq!(device.name, "House");
        assert_eq!(device.ip, "192.168.1.50");
        assert_eq!(device.monophase, Some(false));
        assert_eq!(device.update_interval, Duration::from_millis(10_000));
        assert_eq!(device.timeout, Duration::from_millis(5_000));
        assert!(device.enable_triphase_return);
        assert!(device.phase_return_enabled(Phase::B));
        assert!(!device.phase_return_enabled(Phase::A));
        assert!(device.display_voltage_values);
        assert!(!device.display_current_values);
        assert!(!device.auth_enabled());
        assert!(device.custom_script.is_none());
    }

    #[test]
    fn test_missing_name_and_ip() {
        let mut entry = base_entry();
        entry.as_object_mut().unwrap().remove("name");
        assert!(matches!(
            DeviceConfig::from_entry(&entry),
            Err(ConfigError::MissingName)
        ));

        let entry = entry_with(json!({ "name": 42 }));
        assert!(matches!(
            DeviceConfig::from_entry(&entry),
            Err(ConfigError::MissingName)
        ));

        let entry = entry_with(json!({ "ip": "" }));
        assert!(matches!(
            DeviceConfig::from_entry(&entry),
            Err(ConfigError::MissingAddress { name }) if name == "House"
        ));
    }

    #[test]
    fn test_interval_must_exceed_timeout() {
        for (interval, timeout) in [(5000, 5000), (1000, 5000)] {
            let entry = entry_with(json!({ "update_interval": interval, "timeout": timeout }));
            assert!(matches!(
                DeviceConfig::from_entry(&entry),
                Err(ConfigError::IntervalNotAboveTimeout { .. })
            ));
        }

        let entry = entry_with(json!({ "update_interval": "10000" }));
        assert!(matches!(
            DeviceConfig::from_entry(&entry),
            Err(ConfigError::IntervalNotAboveTimeout { .. })
        ));

        let entry = entry_with(json!({ "timeout": 0 }));
        assert!(matches!(
            DeviceConfig::from_entry(&entry),
            Err(ConfigError::IntervalNotAboveTimeout { .. })
        ));
    }

    #[test]
    fn test_interval_must_be_schedulable() {
        let entry = entry_with(json!({ "update_interval": 1e25, "timeout": 5000 }));
        assert!(matches!(
            DeviceConfig::from_entry(&entry),
            Err(ConfigError::IntervalTooLong { name, .. }) if name == "House"
        ));

        let entry = entry_with(json!({ "update_interval": 86_400_001, "timeout": 5000 }));
        assert!(matches!(
            DeviceConfig::from_entry(&entry),
            Err(ConfigError::IntervalTooLong { .. })
        ));

        let entry = entry_with(json!({ "update_interval": 86_400_000, "timeout": 5000 }));
        let device = DeviceConfig::from_entry(&entry).unwrap();
        assert_eq!(device.update_interval, MAX_UPDATE_INTERVAL);
    }

    #[test]
    fn test_auth_requires_password() {
        for pass in [json!(null), json!(""), json!("   ")] {
            let entry = entry_with(json!({ "auth": true, "pass": pass }));
            assert!(matches!(
                DeviceConfig::from_entry(&entry),
                Err(ConfigError::MissingPassword { .. })
            ));
        }

        let device =
            DeviceConfig::from_entry(&entry_with(json!({ "auth": true, "pass": "secret" })))
                .unwrap();
        assert_eq!(device.password.as_deref(), Some("secret"));

        // A password without auth is ignored
        let device =
            DeviceConfig::from_entry(&entry_with(json!({ "auth": false, "pass": "secret" })))
                .unwrap();
        assert!(!device.auth_enabled());
    }

    #[test]
    fn test_custom_script_requires_all_fields() {
        let entry = entry_with(json!({
            "custom_script": true,
            "custom_script_id": "1",
            "custom_script_endpoint": "energy",
            "custom_script_ret_energy_key": " "
        }));
        match DeviceConfig::from_entry(&entry) {
            Err(ConfigError::IncompleteCustomScript { fields, .. }) => assert_eq!(
                fields,
                vec![
                    "custom_script_id",
                    "custom_script_energy_key",
                    "custom_script_ret_energy_key"
                ]
            ),
            other => panic!("Expected IncompleteCustomScript, got {other:?}"),
        }

        let device = DeviceConfig::from_entry(&entry_with(json!({
            "custom_script": true,
            "custom_script_id": 1,
            "custom_script_endpoint": "energy",
            "custom_script_energy_key": "energyWh",
            "custom_script_ret_energy_key": "retEnergyWh"
        })))
        .unwrap();
        assert_eq!(
            device.custom_script,
            Some(CustomScript {
                id: 1,
                endpoint: "energy".to_string(),
                energy_key: "energyWh".to_string(),
                return_energy_key: "retEnergyWh".to_string(),
            })
        );
    }

    #[test]
    fn test_invalid_phase_mode_reads_as_absent() {
        let device =
            DeviceConfig::from_entry(&entry_with(json!({ "monophase": "yes" }))).unwrap();
        assert_eq!(device.monophase, None);

        let mut entry = base_entry();
        entry.as_object_mut().unwrap().remove("monophase");
        assert_eq!(DeviceConfig::from_entry(&entry).unwrap().monophase, None);
    }

    #[test]
    fn test_non_object_entry_is_malformed() {
        assert!(matches!(
            DeviceConfig::from_entry(&json!("not a device")),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_platform_config_from_json() {
        let config = PlatformConfig::from_json(
            r#"{ "platform": "ShellyEnergyMeter", "devices": [ { "name": "a" }, 3 ] }"#,
        )
        .unwrap();
        assert_eq!(config.platform.as_deref(), Some("ShellyEnergyMeter"));
        assert_eq!(config.devices.len(), 2);

        let empty = PlatformConfig::from_json("{}").unwrap();
        assert!(empty.devices.is_empty());
    }
}
