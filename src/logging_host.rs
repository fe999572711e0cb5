use crate::characteristics::{CharacteristicDescriptor, ServiceDescriptor};
use crate::host::{AccessoryHost, AccessoryInfo, CharacteristicSurface, HistoryEntry, HistorySink};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_HISTORY_CAPACITY: usize = 4032;

#[derive(Debug, Default)]
struct AccessoryRecord {
    display_name: String,
    services: Vec<&'static str>,
    values: HashMap<&'static str, f64>,
    history: VecDeque<HistoryEntry>,
}

/// Stand-alone host: logs every published value and keeps a bounded history in memory.
pub struct LoggingHost {
    accessories: Mutex<HashMap<Uuid, AccessoryRecord>>,
    history_capacity: usize,
}

impl Default for LoggingHost {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl LoggingHost {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            accessories: Mutex::new(HashMap::new()),
            history_capacity: history_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, AccessoryRecord>> {
        self.accessories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn accessory_count(&self) -> usize {
        self.lock().len()
    }

    /// Last value published for a characteristic, by characteristic name.
    pub fn value(&self, accessory: Uuid, characteristic: &str) -> Option<f64> {
        self.lock()
            .get(&accessory)
            .and_then(|record| record.values.get(characteristic).copied())
    }

    pub fn history(&self, accessory: Uuid) -> Vec<HistoryEntry> {
        self.lock()
            .get(&accessory)
            .map(|record| record.history.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl CharacteristicSurface for LoggingHost {
    fn register_characteristic(
        &self,
        accessory: &AccessoryInfo,
        service: &ServiceDescriptor,
        characteristic: &'static CharacteristicDescriptor,
    ) -> anyhow::Result<()> {
        let mut accessories = self.lock();
        let record = accessories.entry(accessory.uuid).or_default();
        if !record.services.contains(&service.uuid) {
            record.services.push(service.uuid);
        }
        record.values.entry(characteristic.name).or_insert(0.0);
        Ok(())
    }

    fn update_characteristic(
        &self,
        accessory: &AccessoryInfo,
        characteristic: &'static CharacteristicDescriptor,
        value: f64,
    ) -> anyhow::Result<()> {
        if !characteristic.accepts(value) {
            anyhow::bail!(
                "{} value {} is outside {}..={} {}",
                characteristic.name,
                value,
                characteristic.min_value,
                characteristic.max_value,
                characteristic.unit
            );
        }
        let mut accessories = self.lock();
        let record = accessories
            .get_mut(&accessory.uuid)
            .ok_or_else(|| anyhow::anyhow!("Unknown accessory {}", accessory.display_name))?;
        if !record.values.contains_key(characteristic.name) {
            anyhow::bail!(
                "{} is not registered on {}",
                characteristic.name,
                accessory.display_name
            );
        }
        record.values.insert(characteristic.name, value);
        debug!(
            "[{}] {} = {} {}",
            accessory.display_name, characteristic.name, value, characteristic.unit
        );
        Ok(())
    }
}

impl HistorySink for LoggingHost {
    fn add_entry(&self, accessory: &AccessoryInfo, entry: HistoryEntry) -> anyhow::Result<()> {
        let mut accessories = self.lock();
        let record = accessories
            .get_mut(&accessory.uuid)
            .ok_or_else(|| anyhow::anyhow!("Unknown accessory {}", accessory.display_name))?;
        if record.history.len() == self.history_capacity {
            record.history.pop_front();
        }
        record.history.push_back(entry);
        info!(
            "[{}] {}W, {}kWh",
            record.display_name, entry.power, entry.total_energy
        );
        Ok(())
    }
}

impl AccessoryHost for LoggingHost {
    fn register_accessory(&self, accessory: &AccessoryInfo) {
        info!(
            "Registered accessory {} ({} {}, serial {})",
            accessory.display_name,
            accessory.manufacturer(),
            accessory.model(),
            accessory.serial_number
        );
        let mut accessories = self.lock();
        let record = accessories.entry(accessory.uuid).or_default();
        record.display_name = accessory.display_name.clone();
    }

    fn update_accessory(&self, accessory: &AccessoryInfo) {
        info!("Updated accessory {}", accessory.display_name);
        let mut accessories = self.lock();
        let record = accessories.entry(accessory.uuid).or_default();
        record.display_name = accessory.display_name.clone();
    }

    fn unregister_accessory(&self, accessory: &AccessoryInfo) {
        info!("Unregistered accessory {}", accessory.display_name);
        self.lock().remove(&accessory.uuid);
    }
}
