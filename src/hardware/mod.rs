//! Actuation boundary: the actuator contract, channel registrations and write
//! serialization.
//!
//! The engine never talks to a controller directly. Everything goes through
//! the [`Actuator`] trait, which addresses a channel by controller address and
//! channel number. [`ChannelRegistry`] maps logical channel ids onto those
//! addresses together with each channel's physical output range, and keeps a
//! per-channel record of the last write.
//!
//! ## Write serialization
//!
//! The scheduler loop and ramp tasks both write to hardware. [`ChannelWriteLocks`]
//! hands out one mutex per `(controller_address, channel_number)` so that two
//! writes to the same physical channel never overlap. It does not order whole
//! sequences: an iteration may still write between two ramp steps, and the
//! next ramp step then overwrites it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::constants::*;
use crate::common::error::{HardwareError, LightingError};
use crate::common::utils::clamp_unit;
use crate::model::ChannelId;

pub mod simulated;
pub mod timeout;

pub use self::simulated::{SimulatedActuator, WriteRecord};
pub use self::timeout::TimeoutActuator;

/// Physical address of one output: `(controller_address, channel_number)`.
pub type ChannelKey = (u8, u8);

/// Trait for hardware that can drive addressed output channels.
///
/// Implementations must be safe to call from the scheduler thread and from
/// ramp threads at the same time.
#[cfg_attr(any(test, feature = "testing-support"), mockall::automock)]
pub trait Actuator: Send + Sync {
    /// Drive one channel to a hardware-facing intensity.
    ///
    /// # Arguments
    /// * `controller_address` - Bus address of the controller (0x40-0x7F)
    /// * `channel_number` - Output on that controller (0-15)
    /// * `intensity` - Fraction of full output in [0,1]
    fn write_channel_intensity(
        &self,
        controller_address: u8,
        channel_number: u8,
        intensity: f64,
    ) -> Result<(), HardwareError>;

    /// Read back the current output of one channel as a fraction in [0,1].
    fn read_channel_intensity(
        &self,
        controller_address: u8,
        channel_number: u8,
    ) -> Result<f64, HardwareError>;

    /// Write raw duty values to several channels of one controller at once.
    ///
    /// # Arguments
    /// * `controller_address` - Bus address of the controller
    /// * `duties` - Channel number to 16-bit duty value
    fn write_many(
        &self,
        controller_address: u8,
        duties: &BTreeMap<u8, u16>,
    ) -> Result<(), HardwareError>;
}

/// Convert a [0,1] fraction into the actuator's 16-bit duty range.
pub fn fraction_to_duty(fraction: f64) -> u16 {
    (clamp_unit(fraction) * f64::from(MAXIMUM_DUTY)).round() as u16
}

/// Convert a 0-100 percentage into the actuator's 16-bit duty range.
pub fn percent_to_duty(percent: f64) -> u16 {
    fraction_to_duty(percent / MAXIMUM_PHYSICAL_PERCENT)
}

pub fn duty_to_fraction(duty: u16) -> f64 {
    f64::from(duty) / f64::from(MAXIMUM_DUTY)
}

/// Mapping of a logical channel onto a physical output and its range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelRegistration {
    pub channel_id: ChannelId,
    pub controller_address: u8,
    pub channel_number: u8,
    /// Physical output (percent) at logical intensity 0.
    pub min_value: f64,
    /// Physical output (percent) at logical intensity 1.
    pub max_value: f64,
}

impl ChannelRegistration {
    /// Validate a registration.
    pub fn new(
        channel_id: ChannelId,
        controller_address: u8,
        channel_number: u8,
        min_value: f64,
        max_value: f64,
    ) -> Result<Self, LightingError> {
        if !(MINIMUM_CONTROLLER_ADDRESS..=MAXIMUM_CONTROLLER_ADDRESS).contains(&controller_address)
        {
            return Err(LightingError::validation(
                "controller_address",
                format!(
                    "{controller_address:#04x} is outside {MINIMUM_CONTROLLER_ADDRESS:#04x}-{MAXIMUM_CONTROLLER_ADDRESS:#04x}"
                ),
            ));
        }
        if channel_number > MAXIMUM_CHANNEL_NUMBER {
            return Err(LightingError::validation(
                "channel_number",
                format!("{channel_number} is outside 0-{MAXIMUM_CHANNEL_NUMBER}"),
            ));
        }
        for (field, value) in [("min_value", min_value), ("max_value", max_value)] {
            if !(MINIMUM_PHYSICAL_PERCENT..=MAXIMUM_PHYSICAL_PERCENT).contains(&value) {
                return Err(LightingError::validation(
                    field,
                    format!(
                        "{value} is outside {MINIMUM_PHYSICAL_PERCENT}-{MAXIMUM_PHYSICAL_PERCENT}"
                    ),
                ));
            }
        }
        if min_value >= max_value {
            return Err(LightingError::validation(
                "min_value",
                format!("{min_value} must be below max_value {max_value}"),
            ));
        }

        Ok(Self {
            channel_id,
            controller_address,
            channel_number,
            min_value,
            max_value,
        })
    }

    pub fn key(&self) -> ChannelKey {
        (self.controller_address, self.channel_number)
    }

    /// `min + (max - min) * logical`, in percent.
    pub fn to_physical_percent(&self, logical: f64) -> f64 {
        self.min_value + (self.max_value - self.min_value) * clamp_unit(logical)
    }
}

/// What the registry knows about a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatus {
    #[serde(flatten)]
    pub registration: ChannelRegistration,
    pub last_logical_intensity: Option<f64>,
    pub last_physical_percent: Option<f64>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl ChannelStatus {
    fn new(registration: ChannelRegistration) -> Self {
        Self {
            registration,
            last_logical_intensity: None,
            last_physical_percent: None,
            last_success: None,
            last_error: None,
            last_error_at: None,
            consecutive_failures: 0,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }
}

/// Registered channels keyed by logical id.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Mutex<BTreeMap<ChannelId, ChannelStatus>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, BTreeMap<ChannelId, ChannelStatus>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a registration, replacing any earlier one for the same channel.
    ///
    /// Fails if another channel already drives the same physical output.
    pub fn register(&self, registration: ChannelRegistration) -> Result<(), LightingError> {
        let mut channels = self.channels();
        if let Some(other) = channels.values().find(|status| {
            status.registration.key() == registration.key()
                && status.registration.channel_id != registration.channel_id
        }) {
            return Err(LightingError::validation(
                "channel_number",
                format!(
                    "controller {:#04x} channel {} is already registered to channel {}",
                    registration.controller_address,
                    registration.channel_number,
                    other.registration.channel_id
                ),
            ));
        }
        channels.insert(registration.channel_id, ChannelStatus::new(registration));
        Ok(())
    }

    pub fn unregister(&self, channel_id: ChannelId) -> Option<ChannelRegistration> {
        self.channels()
            .remove(&channel_id)
            .map(|status| status.registration)
    }

    pub fn get(&self, channel_id: ChannelId) -> Option<ChannelRegistration> {
        self.channels()
            .get(&channel_id)
            .map(|status| status.registration)
    }

    pub fn is_registered(&self, channel_id: ChannelId) -> bool {
        self.channels().contains_key(&channel_id)
    }

    /// Logical channel driving a physical output, if any.
    pub fn find_by_key(&self, key: ChannelKey) -> Option<ChannelRegistration> {
        self.channels()
            .values()
            .map(|status| status.registration)
            .find(|registration| registration.key() == key)
    }

    pub fn registrations(&self) -> Vec<ChannelRegistration> {
        self.channels()
            .values()
            .map(|status| status.registration)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.channels().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels().is_empty()
    }

    pub fn record_success(
        &self,
        channel_id: ChannelId,
        logical: f64,
        physical_percent: f64,
        at: DateTime<Utc>,
    ) {
        if let Some(status) = self.channels().get_mut(&channel_id) {
            status.last_logical_intensity = Some(logical);
            status.last_physical_percent = Some(physical_percent);
            status.last_success = Some(at);
            status.consecutive_failures = 0;
        }
    }

    pub fn record_failure(&self, channel_id: ChannelId, error: &HardwareError, at: DateTime<Utc>) {
        if let Some(status) = self.channels().get_mut(&channel_id) {
            status.last_error = Some(error.to_string());
            status.last_error_at = Some(at);
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        }
    }

    /// Snapshot of every channel, ordered by id.
    pub fn status(&self) -> Vec<ChannelStatus> {
        self.channels().values().cloned().collect()
    }
}

/// One mutex per physical output, shared by every writer.
#[derive(Debug, Default)]
pub struct ChannelWriteLocks {
    locks: Mutex<HashMap<ChannelKey, Arc<Mutex<()>>>>,
}

impl ChannelWriteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding writes to `key`. Hold its guard for the duration of
    /// one hardware write.
    pub fn lock_for(&self, key: ChannelKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key).or_default())
    }

    /// Run `write` while holding the lock for `key`.
    pub fn with_lock<T>(&self, key: ChannelKey, write: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(key);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::constants::test_constants::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_registration_validation() {
        assert!(ChannelRegistration::new(1, TEST_CONTROLLER, 0, 0.0, 100.0).is_ok());
        assert!(ChannelRegistration::new(1, 0x3F, 0, 0.0, 100.0).is_err());
        assert!(ChannelRegistration::new(1, 0x80, 0, 0.0, 100.0).is_err());
        assert!(ChannelRegistration::new(1, TEST_CONTROLLER, 16, 0.0, 100.0).is_err());
        assert!(ChannelRegistration::new(1, TEST_CONTROLLER, 0, 50.0, 50.0).is_err());
        assert!(ChannelRegistration::new(1, TEST_CONTROLLER, 0, -1.0, 50.0).is_err());
        assert!(ChannelRegistration::new(1, TEST_CONTROLLER, 0, 10.0, 101.0).is_err());
        assert!(ChannelRegistration::new(1, TEST_CONTROLLER, 0, f64::NAN, 50.0).is_err());
    }

    #[test]
    fn test_physical_mapping() {
        let reg = ChannelRegistration::new(1, TEST_CONTROLLER, 2, 20.0, 80.0).unwrap();
        assert_eq!(reg.to_physical_percent(0.0), 20.0);
        assert_eq!(reg.to_physical_percent(0.5), 50.0);
        assert_eq!(reg.to_physical_percent(1.0), 80.0);
        assert_eq!(reg.to_physical_percent(3.0), 80.0);
    }

    #[test]
    fn test_duty_conversion() {
        assert_eq!(percent_to_duty(0.0), 0);
        assert_eq!(percent_to_duty(100.0), u16::MAX);
        assert_eq!(percent_to_duty(150.0), u16::MAX);
        assert_eq!(fraction_to_duty(0.5), 32768);
        assert!((duty_to_fraction(u16::MAX) - 1.0).abs() < TEST_EPSILON);
    }

    #[test]
    fn test_registry_rejects_shared_output() {
        let registry = ChannelRegistry::new();
        let first = ChannelRegistration::new(1, TEST_CONTROLLER, 3, 0.0, 100.0).unwrap();
        let clash = ChannelRegistration::new(2, TEST_CONTROLLER, 3, 0.0, 100.0).unwrap();
        registry.register(first).unwrap();
        assert!(registry.register(clash).is_err());

        // Re-registering the same channel may move it
        let moved = ChannelRegistration::new(1, TEST_CONTROLLER, 4, 0.0, 100.0).unwrap();
        registry.register(moved).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find_by_key((TEST_CONTROLLER, 4)), Some(moved));
        assert!(registry.find_by_key((TEST_CONTROLLER, 3)).is_none());
    }

    #[test]
    fn test_status_tracks_write_outcomes() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let registry = ChannelRegistry::new();
        registry
            .register(ChannelRegistration::new(TEST_CHANNEL_ID, TEST_CONTROLLER, 0, 0.0, 100.0).unwrap())
            .unwrap();

        let err = HardwareError::Unavailable {
            address: TEST_CONTROLLER,
        };
        registry.record_failure(TEST_CHANNEL_ID, &err, at);
        registry.record_failure(TEST_CHANNEL_ID, &err, at);
        let status = &registry.status()[0];
        assert_eq!(status.consecutive_failures, 2);
        assert!(!status.is_healthy());

        registry.record_success(TEST_CHANNEL_ID, 0.4, 40.0, at);
        let status = &registry.status()[0];
        assert!(status.is_healthy());
        assert_eq!(status.last_physical_percent, Some(40.0));
        assert_eq!(status.last_error.as_deref(), Some(err.to_string().as_str()));
    }

    #[test]
    fn test_write_locks_serialize_same_key() {
        let locks = Arc::new(ChannelWriteLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    for _ in 0..10 {
                        locks.with_lock((TEST_CONTROLLER, 0), || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(1));
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
