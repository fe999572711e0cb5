use crate::accessory_poller::AccessoryPoller;
use crate::config::{DeviceConfig, PlatformConfig};
use crate::error::DiscoveryError;
use crate::host::{AccessoryHost, AccessoryInfo};
use crate::shelly_3em_client::Shelly3EMClient;
use crate::topology::{plan, PlannedAccessory};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Running pollers keyed by accessory UUID.
///
/// Entries come and go together with the accessories they belong to; `stop_all` is what
/// shutdown uses so no timer outlives the platform.
#[derive(Default)]
pub struct PollerRegistry {
    pollers: HashMap<Uuid, AccessoryPoller>,
}

impl PollerRegistry {
    /// Adds a poller, stopping any previous one registered for the same accessory.
    pub fn insert(&mut self, poller: AccessoryPoller) {
        if let Some(previous) = self.pollers.insert(poller.accessory().uuid, poller) {
            previous.stop();
        }
    }

    /// Stops and forgets the poller of an accessory. Returns whether one was registered.
    pub fn remove(&mut self, uuid: &Uuid) -> bool {
        match self.pollers.remove(uuid) {
            Some(poller) => {
                poller.stop();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&AccessoryPoller> {
        self.pollers.get(uuid)
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.pollers.contains_key(uuid)
    }

    pub fn len(&self) -> usize {
        self.pollers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pollers.is_empty()
    }

    pub fn stop_all(&mut self) {
        for (_, poller) in self.pollers.drain() {
            poller.stop();
        }
    }
}

/// Checks that a device answers, belongs to the configured phase mode and tells us its MAC,
/// which becomes the identity of its accessories.
pub async fn validate_device(client: &Shelly3EMClient) -> Result<String, DiscoveryError> {
    let device = client.device();
    let sys_config = client.sys_config().await.map_err(|source| {
        if source.is_unauthorized() {
            DiscoveryError::Authentication {
                name: device.name.clone(),
                ip: device.ip.clone(),
            }
        } else {
            DiscoveryError::Unreachable {
                name: device.name.clone(),
                ip: device.ip.clone(),
                source,
            }
        }
    })?;

    let profile = sys_config.device.profile;
    debug!(
        "Device \"{}\" ({}) profile: {}",
        device.name,
        device.ip,
        profile.as_deref().unwrap_or("not set")
    );

    let mac = sys_config
        .device
        .mac
        .filter(|mac| !mac.is_empty())
        .ok_or_else(|| DiscoveryError::MissingMac {
            name: device.name.clone(),
            ip: device.ip.clone(),
        })?;

    if let (Some(monophase), Some(profile)) = (device.monophase, profile) {
        let expected = if monophase { "monophase" } else { "triphase" };
        if profile != expected {
            return Err(DiscoveryError::ProfileMismatch {
                name: device.name.clone(),
                configured: monophase,
                reported: profile,
            });
        }
    }

    Ok(mac)
}

/// Turns the configured devices into accessories on the host and keeps them polled.
pub struct Platform<H: AccessoryHost + 'static> {
    config: PlatformConfig,
    host: Arc<H>,
    accessories: HashMap<Uuid, AccessoryInfo>,
    discovered: HashSet<Uuid>,
    pollers: PollerRegistry,
}

impl<H: AccessoryHost + 'static> Platform<H> {
    pub fn new(config: PlatformConfig, host: Arc<H>) -> Self {
        debug!("Finished initializing platform: Shelly 3EM");
        Self {
            config,
            host,
            accessories: HashMap::new(),
            discovered: HashSet::new(),
            pollers: PollerRegistry::default(),
        }
    }

    /// Called by the host for every accessory it restored from its cache at startup.
    pub fn configure_accessory(&mut self, accessory: AccessoryInfo) {
        info!("Loading accessory from cache: {}", accessory.display_name);
        self.accessories.insert(accessory.uuid, accessory);
    }

    /// Host finished restoring cached accessories; new ones may be registered from now on.
    pub async fn did_finish_launching(&mut self) {
        debug!("Executed didFinishLaunching callback");
        self.discover_devices().await;
    }

    pub async fn discover_devices(&mut self) {
        if self.config.devices.is_empty() {
            warn!("No devices configured. Please add at least one device in the plugin settings.");
            return;
        }
        self.discovered.clear();

        let entries = self.config.devices.clone();
        for entry in &entries {
            let device = match DeviceConfig::from_entry(entry) {
                Ok(device) => device,
                Err(e) => {
                    error!("{}. Skipping device.", e);
                    continue;
                }
            };

            let client = Arc::new(Shelly3EMClient::new(device.clone()));
            let identity = match validate_device(&client).await {
                Ok(mac) => mac,
                Err(e) if e.skips_device() => {
                    error!("{}. Skipping device.", e);
                    continue;
                }
                Err(e) => {
                    warn!("{}. Will retry during polling.", e);
                    device.ip.clone()
                }
            };

            let planned = plan(&device);
            if planned.is_empty() {
                warn!(
                    "Device \"{}\" ({}) has no valid \"monophase\" setting, no accessory created.",
                    device.name, device.ip
                );
            }
            for accessory in planned {
                self.create_or_restore_accessory(&identity, accessory, &device, &client);
            }
        }

        self.remove_stale_accessories();
    }

    fn create_or_restore_accessory(
        &mut self,
        identity: &str,
        planned: PlannedAccessory,
        device: &DeviceConfig,
        client: &Arc<Shelly3EMClient>,
    ) {
        let candidate =
            AccessoryInfo::new(identity, planned.role, planned.display_name, device.clone());
        let uuid = candidate.uuid;

        let accessory = match self.accessories.get_mut(&uuid) {
            Some(existing) => {
                info!(
                    "Restoring existing accessory from cache: {}",
                    existing.display_name
                );
                // The user may have changed settings since the accessory was cached
                existing.device = device.clone();
                existing.role = planned.role;
                self.host.update_accessory(existing);
                existing.clone()
            }
            None => {
                info!("Adding new accessory: {}", candidate.display_name);
                self.host.register_accessory(&candidate);
                self.accessories.insert(uuid, candidate.clone());
                candidate
            }
        };

        let poller = AccessoryPoller::start(
            accessory,
            client.clone(),
            self.host.clone(),
            self.host.clone(),
        );
        self.pollers.insert(poller);
        self.discovered.insert(uuid);
    }

    fn remove_stale_accessories(&mut self) {
        let stale: Vec<Uuid> = self
            .accessories
            .keys()
            .filter(|uuid| !self.discovered.contains(uuid))
            .copied()
            .collect();

        for uuid in stale {
            if let Some(accessory) = self.accessories.remove(&uuid) {
                info!(
                    "Removing existing accessory from cache: {}",
                    accessory.display_name
                );
                self.pollers.remove(&uuid);
                self.host.unregister_accessory(&accessory);
            }
        }
    }

    /// Host is shutting down: stop polling every accessory.
    pub fn shutdown(&mut self) {
        info!("Shutdown: stopping all accessory polling");
        self.pollers.stop_all();
    }

    pub fn accessories(&self) -> impl Iterator<Item = &AccessoryInfo> {
        self.accessories.values()
    }

    pub fn pollers(&self) -> &PollerRegistry {
        &self.pollers
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }
}
