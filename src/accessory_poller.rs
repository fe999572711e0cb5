use crate::characteristics::{
    characteristics_for, shows_current, shows_voltage, CURRENT, ENERGY, POWER,
    POWER_METER_SERVICE, VOLTAGE,
};
use crate::host::{AccessoryInfo, CharacteristicSurface, HistoryEntry, HistorySink};
use crate::reading_reconciler::{reconcile, ReadingState};
use crate::shelly_3em_client::MeterApi;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info_span, warn, Instrument};

/// Result of one trigger of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollOutcome {
    Completed(ReadingState),
    /// A previous cycle was still in flight; this trigger was dropped.
    Skipped,
}

/// Drives the periodic refresh of one logical accessory.
pub struct AccessoryPoller {
    shared: Arc<PollerShared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

struct PollerShared {
    accessory: AccessoryInfo,
    api: Arc<dyn MeterApi>,
    surface: Arc<dyn CharacteristicSurface>,
    history: Arc<dyn HistorySink>,
    readings: Mutex<ReadingState>,
    in_flight: AtomicBool,
}

/// Holds the in-flight flag for the duration of one cycle; releasing happens on drop so no
/// exit path can leave the accessory stuck.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AccessoryPoller {
    /// Creates the poller and registers the accessory's characteristics, without polling.
    pub fn new(
        accessory: AccessoryInfo,
        api: Arc<dyn MeterApi>,
        surface: Arc<dyn CharacteristicSurface>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        for characteristic in characteristics_for(accessory.role, &accessory.device) {
            if let Err(e) =
                surface.register_characteristic(&accessory, &POWER_METER_SERVICE, characteristic)
            {
                warn!(
                    "[{}] Cannot register characteristic {}: {:#}",
                    accessory.display_name, characteristic.name, e
                );
            }
        }

        Self {
            shared: Arc::new(PollerShared {
                accessory,
                api,
                surface,
                history,
                readings: Mutex::new(ReadingState::default()),
                in_flight: AtomicBool::new(false),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Creates the poller, runs a first cycle right away and then one every update interval.
    pub fn start(
        accessory: AccessoryInfo,
        api: Arc<dyn MeterApi>,
        surface: Arc<dyn CharacteristicSurface>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        let poller = Self::new(accessory, api, surface, history);
        poller.spawn_timer();
        poller
    }

    fn spawn_timer(&self) {
        let shared = Arc::clone(&self.shared);
        let period = shared.accessory.device.update_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                // A slow cycle must not hold back the timer, overlap is settled by the guard
                let cycle = Arc::clone(&shared);
                tokio::spawn(async move {
                    cycle.poll_once().await;
                });
            }
        });

        let previous = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Runs one poll cycle unless one is already in flight.
    pub async fn poll_once(&self) -> PollOutcome {
        self.shared.poll_once().await
    }

    /// Latest reconciled readings, as served to the host on read requests.
    pub fn readings(&self) -> ReadingState {
        *self
            .shared
            .readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn accessory(&self) -> &AccessoryInfo {
        &self.shared.accessory
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Cancels the recurring timer. A cycle already in flight runs to completion.
    pub fn stop(&self) {
        let handle = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("[{}] Data polling stopped.", self.shared.accessory.display_name);
        }
    }
}

impl Drop for AccessoryPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PollerShared {
    async fn poll_once(&self) -> PollOutcome {
        let span = info_span!("poll", accessory = %self.accessory.display_name);
        self.cycle().instrument(span).await
    }

    async fn cycle(&self) -> PollOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!(
                "[{}] Skipping update - previous update still in progress",
                self.accessory.display_name
            );
            return PollOutcome::Skipped;
        };

        // Both requests always settle; each outcome is handled on its own
        let (status, energy) = tokio::join!(self.api.em_status(), self.api.energy_payload());

        let next = {
            let mut readings = self.readings.lock().unwrap_or_else(PoisonError::into_inner);
            *readings = reconcile(
                self.accessory.role,
                &status,
                &energy,
                &self.accessory.device,
                *readings,
            );
            *readings
        };

        self.publish(next);
        PollOutcome::Completed(next)
    }

    /// Pushes the readings to the host, then appends one history entry. A rejected value
    /// only loses that value.
    fn publish(&self, readings: ReadingState) {
        let accessory = &self.accessory;

        let mut updates = vec![(&POWER, readings.power)];
        if shows_current(accessory.role, &accessory.device) {
            updates.push((&CURRENT, readings.current));
        }
        if shows_voltage(accessory.role, &accessory.device) {
            updates.push((&VOLTAGE, readings.voltage));
        }
        updates.push((&ENERGY, readings.energy));

        for (characteristic, value) in updates {
            if let Err(e) = self
                .surface
                .update_characteristic(accessory, characteristic, value)
            {
                error!(
                    "[{}] Cannot update {}: {:#}",
                    accessory.display_name, characteristic.name, e
                );
            }
        }

        let entry = HistoryEntry {
            time: chrono::Utc::now().timestamp(),
            power: readings.power,
            total_energy: readings.energy,
        };
        if let Err(e) = self.history.add_entry(accessory, entry) {
            error!(
                "[{}] Cannot add history entry: {:#}",
                accessory.display_name, e
            );
        }
    }
}
