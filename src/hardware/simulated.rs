//! In-process actuator used for dry runs and tests.
//!
//! Keeps a 16-bit duty register per output and a log of every accepted
//! write. Failures can be injected per output or per controller.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{Actuator, ChannelKey, duty_to_fraction, fraction_to_duty};
use crate::common::error::HardwareError;

/// One accepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteRecord {
    pub controller_address: u8,
    pub channel_number: u8,
    pub duty: u16,
}

#[derive(Debug, Default)]
struct SimulatedState {
    registers: HashMap<ChannelKey, u16>,
    writes: Vec<WriteRecord>,
    pending_failures: HashMap<ChannelKey, u32>,
    offline: HashSet<u8>,
}

#[derive(Debug, Default)]
pub struct SimulatedActuator {
    state: Mutex<SimulatedState>,
    latency: Option<Duration>,
}

impl SimulatedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, e.g. to exercise timeouts.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
    }

    /// Make the next `count` writes touching this output fail.
    pub fn fail_next_writes(&self, controller_address: u8, channel_number: u8, count: u32) {
        self.state()
            .pending_failures
            .insert((controller_address, channel_number), count);
    }

    /// Take a whole controller off (or back onto) the bus.
    pub fn set_offline(&self, controller_address: u8, offline: bool) {
        let mut state = self.state();
        if offline {
            state.offline.insert(controller_address);
        } else {
            state.offline.remove(&controller_address);
        }
    }

    pub fn duty(&self, controller_address: u8, channel_number: u8) -> Option<u16> {
        self.state()
            .registers
            .get(&(controller_address, channel_number))
            .copied()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state().writes.clone()
    }

    /// Duty values written to one output, oldest first.
    pub fn writes_for(&self, controller_address: u8, channel_number: u8) -> Vec<u16> {
        self.state()
            .writes
            .iter()
            .filter(|w| w.controller_address == controller_address && w.channel_number == channel_number)
            .map(|w| w.duty)
            .collect()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    fn apply(&self, controller_address: u8, duties: &BTreeMap<u8, u16>) -> Result<(), HardwareError> {
        let mut state = self.state();
        if state.offline.contains(&controller_address) {
            return Err(HardwareError::Unavailable {
                address: controller_address,
            });
        }

        let mut failed = None;
        for channel_number in duties.keys() {
            if let Some(remaining) = state
                .pending_failures
                .get_mut(&(controller_address, *channel_number))
                && *remaining > 0
            {
                *remaining -= 1;
                failed.get_or_insert(*channel_number);
            }
        }
        if let Some(channel) = failed {
            return Err(HardwareError::WriteFailed {
                address: controller_address,
                channel,
                reason: "injected failure".to_string(),
            });
        }

        for (channel_number, duty) in duties {
            state
                .registers
                .insert((controller_address, *channel_number), *duty);
            state.writes.push(WriteRecord {
                controller_address,
                channel_number: *channel_number,
                duty: *duty,
            });
        }
        Ok(())
    }
}

impl Actuator for SimulatedActuator {
    fn write_channel_intensity(
        &self,
        controller_address: u8,
        channel_number: u8,
        intensity: f64,
    ) -> Result<(), HardwareError> {
        self.simulate_latency();
        if !intensity.is_finite() {
            return Err(HardwareError::WriteFailed {
                address: controller_address,
                channel: channel_number,
                reason: format!("intensity {intensity} is not finite"),
            });
        }
        let duties = BTreeMap::from([(channel_number, fraction_to_duty(intensity))]);
        self.apply(controller_address, &duties)
    }

    fn read_channel_intensity(
        &self,
        controller_address: u8,
        channel_number: u8,
    ) -> Result<f64, HardwareError> {
        self.simulate_latency();
        let state = self.state();
        if state.offline.contains(&controller_address) {
            return Err(HardwareError::Unavailable {
                address: controller_address,
            });
        }
        // Outputs power up dark
        let duty = state
            .registers
            .get(&(controller_address, channel_number))
            .copied()
            .unwrap_or(0);
        Ok(duty_to_fraction(duty))
    }

    fn write_many(
        &self,
        controller_address: u8,
        duties: &BTreeMap<u8, u16>,
    ) -> Result<(), HardwareError> {
        self.simulate_latency();
        self.apply(controller_address, duties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::constants::test_constants::TEST_CONTROLLER;

    #[test]
    fn test_writes_are_recorded_and_readable() {
        let actuator = SimulatedActuator::new();
        actuator
            .write_channel_intensity(TEST_CONTROLLER, 2, 0.25)
            .unwrap();
        actuator
            .write_many(TEST_CONTROLLER, &BTreeMap::from([(3, 100), (4, 200)]))
            .unwrap();

        assert_eq!(actuator.duty(TEST_CONTROLLER, 2), Some(16384));
        assert_eq!(actuator.writes().len(), 3);
        assert_eq!(actuator.writes_for(TEST_CONTROLLER, 4), vec![200]);
        let read = actuator.read_channel_intensity(TEST_CONTROLLER, 2).unwrap();
        assert!((read - 0.25).abs() < 1e-4);
        assert_eq!(actuator.read_channel_intensity(TEST_CONTROLLER, 9).unwrap(), 0.0);
    }

    #[test]
    fn test_injected_failures_are_consumed() {
        let actuator = SimulatedActuator::new();
        actuator.fail_next_writes(TEST_CONTROLLER, 1, 2);

        assert!(actuator.write_channel_intensity(TEST_CONTROLLER, 1, 0.5).is_err());
        assert!(actuator.write_channel_intensity(TEST_CONTROLLER, 1, 0.5).is_err());
        assert!(actuator.write_channel_intensity(TEST_CONTROLLER, 1, 0.5).is_ok());
        assert_eq!(actuator.writes().len(), 1);
    }

    #[test]
    fn test_offline_controller() {
        let actuator = SimulatedActuator::new();
        actuator.set_offline(TEST_CONTROLLER, true);
        assert_eq!(
            actuator.write_channel_intensity(TEST_CONTROLLER, 0, 0.5),
            Err(HardwareError::Unavailable {
                address: TEST_CONTROLLER
            })
        );
        actuator.set_offline(TEST_CONTROLLER, false);
        assert!(actuator.write_channel_intensity(TEST_CONTROLLER, 0, 0.5).is_ok());
    }
}
