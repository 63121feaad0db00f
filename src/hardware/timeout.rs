//! Deadline decorator for actuators.
//!
//! Each call runs on a worker thread and the caller waits on a channel with
//! `recv_timeout`. A call that misses the deadline is reported as
//! [`HardwareError::Timeout`] and its late result is discarded.
//!
//! A controller has at most one call in flight. Callers queue for the slot
//! within the same deadline, and the slot is released by the worker when the
//! inner call returns, not by the caller when it gives up. Writes behind a
//! timed-out write therefore never overlap it: they wait, and if the stuck
//! call outlasts their deadline they fail with [`HardwareError::Busy`]. A hung
//! controller pins one thread instead of one per attempt.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use super::Actuator;
use crate::common::error::HardwareError;

/// Busy flag of one controller plus the condvar its waiters park on.
type Slot = Arc<(Mutex<bool>, Condvar)>;

pub struct TimeoutActuator {
    inner: Arc<dyn Actuator>,
    timeout: Duration,
    slots: Mutex<HashMap<u8, Slot>>,
}

/// Frees a controller's slot when the worker finishes, even if the inner
/// call panics.
struct InFlight(Slot);

impl Drop for InFlight {
    fn drop(&mut self) {
        let (busy, freed) = &*self.0;
        *busy.lock().unwrap_or_else(|e| e.into_inner()) = false;
        freed.notify_one();
    }
}

impl TimeoutActuator {
    pub fn new(inner: Arc<dyn Actuator>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait up to `wait` for the controller's call slot.
    fn claim(&self, controller_address: u8, wait: Duration) -> Option<InFlight> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(controller_address).or_default())
        };
        {
            let (busy, freed) = &*slot;
            let guard = busy.lock().unwrap_or_else(|e| e.into_inner());
            let (mut guard, _) = freed
                .wait_timeout_while(guard, wait, |busy| *busy)
                .unwrap_or_else(|e| e.into_inner());
            if *guard {
                return None;
            }
            *guard = true;
        }
        Some(InFlight(slot))
    }

    fn call<T, F>(&self, controller_address: u8, op: F) -> Result<T, HardwareError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Actuator) -> Result<T, HardwareError> + Send + 'static,
    {
        let started = Instant::now();
        let Some(slot) = self.claim(controller_address, self.timeout) else {
            log_debug!("Controller {controller_address:#04x} still busy with a stuck call");
            return Err(HardwareError::Busy {
                address: controller_address,
            });
        };
        let remaining = self.timeout.saturating_sub(started.elapsed());

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("actuator-call".to_string())
            .spawn(move || {
                let _slot = slot;
                // The receiver is gone if the caller already timed out
                let _ = tx.send(op(inner.as_ref()));
            });
        if let Err(e) = spawned {
            return Err(HardwareError::WriteFailed {
                address: controller_address,
                channel: 0,
                reason: format!("could not spawn actuator worker: {e}"),
            });
        }

        match rx.recv_timeout(remaining) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log_debug!(
                    "Actuator call to {controller_address:#04x} exceeded {} ms",
                    self.timeout.as_millis()
                );
                Err(HardwareError::Timeout {
                    address: controller_address,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(HardwareError::Unavailable {
                address: controller_address,
            }),
        }
    }
}

impl Actuator for TimeoutActuator {
    fn write_channel_intensity(
        &self,
        controller_address: u8,
        channel_number: u8,
        intensity: f64,
    ) -> Result<(), HardwareError> {
        self.call(controller_address, move |inner| {
            inner.write_channel_intensity(controller_address, channel_number, intensity)
        })
    }

    fn read_channel_intensity(
        &self,
        controller_address: u8,
        channel_number: u8,
    ) -> Result<f64, HardwareError> {
        self.call(controller_address, move |inner| {
            inner.read_channel_intensity(controller_address, channel_number)
        })
    }

    fn write_many(
        &self,
        controller_address: u8,
        duties: &BTreeMap<u8, u16>,
    ) -> Result<(), HardwareError> {
        let duties = duties.clone();
        self.call(controller_address, move |inner| {
            inner.write_many(controller_address, &duties)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::constants::test_constants::TEST_CONTROLLER;
    use crate::hardware::{ChannelWriteLocks, MockActuator, SimulatedActuator};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fast_calls_pass_through() {
        let inner = Arc::new(SimulatedActuator::new());
        let actuator = TimeoutActuator::new(inner.clone(), Duration::from_millis(500));
        actuator
            .write_channel_intensity(TEST_CONTROLLER, 1, 1.0)
            .unwrap();
        assert_eq!(inner.duty(TEST_CONTROLLER, 1), Some(u16::MAX));
    }

    #[test]
    fn test_slow_calls_time_out() {
        let inner = Arc::new(SimulatedActuator::with_latency(Duration::from_millis(300)));
        let actuator = TimeoutActuator::new(inner, Duration::from_millis(20));
        assert_eq!(
            actuator.write_many(TEST_CONTROLLER, &BTreeMap::from([(0, 1)])),
            Err(HardwareError::Timeout {
                address: TEST_CONTROLLER,
                timeout_ms: 20
            })
        );
    }

    /// Inner actuator that sleeps on every write and records how many writes
    /// were running at once.
    struct OverlapCounter {
        latency: Duration,
        running: AtomicUsize,
        max_running: AtomicUsize,
        completed: AtomicUsize,
    }

    impl OverlapCounter {
        fn new(latency: Duration) -> Self {
            Self {
                latency,
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            }
        }
    }

    impl Actuator for OverlapCounter {
        fn write_channel_intensity(&self, _: u8, _: u8, _: f64) -> Result<(), HardwareError> {
            let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now_running, Ordering::SeqCst);
            thread::sleep(self.latency);
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn read_channel_intensity(&self, _: u8, _: u8) -> Result<f64, HardwareError> {
            Ok(0.0)
        }

        fn write_many(&self, _: u8, _: &BTreeMap<u8, u16>) -> Result<(), HardwareError> {
            Ok(())
        }
    }

    #[test]
    fn test_timed_out_writes_never_overlap() {
        let inner = Arc::new(OverlapCounter::new(Duration::from_millis(200)));
        let actuator = TimeoutActuator::new(inner.clone(), Duration::from_millis(20));
        let locks = ChannelWriteLocks::new();

        let results: Vec<_> = (0..3)
            .map(|_| {
                locks.with_lock((TEST_CONTROLLER, 1), || {
                    actuator.write_channel_intensity(TEST_CONTROLLER, 1, 0.5)
                })
            })
            .collect();

        assert!(matches!(results[0], Err(HardwareError::Timeout { .. })));
        assert_eq!(
            results[1],
            Err(HardwareError::Busy {
                address: TEST_CONTROLLER
            })
        );
        assert_eq!(results[1], results[2]);

        // Once the stuck write returns the controller accepts calls again
        thread::sleep(Duration::from_millis(300));
        assert_eq!(inner.completed.load(Ordering::SeqCst), 1);
        assert!(matches!(
            actuator.write_channel_intensity(TEST_CONTROLLER, 1, 0.5),
            Err(HardwareError::Timeout { .. })
        ));
        thread::sleep(Duration::from_millis(300));
        assert_eq!(inner.max_running.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_healthy_calls_queue_instead_of_failing() {
        let inner = Arc::new(OverlapCounter::new(Duration::from_millis(30)));
        let actuator = Arc::new(TimeoutActuator::new(inner.clone(), Duration::from_millis(500)));

        let handles: Vec<_> = (0..3)
            .map(|channel| {
                let actuator = Arc::clone(&actuator);
                thread::spawn(move || actuator.write_channel_intensity(TEST_CONTROLLER, channel, 0.5))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok(()));
        }
        assert_eq!(inner.completed.load(Ordering::SeqCst), 3);
        assert_eq!(inner.max_running.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_busy_controller_does_not_block_others() {
        let inner = Arc::new(SimulatedActuator::with_latency(Duration::from_millis(150)));
        let actuator = TimeoutActuator::new(inner, Duration::from_millis(20));
        assert!(actuator.write_channel_intensity(TEST_CONTROLLER, 0, 1.0).is_err());
        assert!(matches!(
            actuator.write_channel_intensity(TEST_CONTROLLER + 1, 0, 1.0),
            Err(HardwareError::Timeout { .. })
        ));
    }

    #[test]
    fn test_inner_errors_are_preserved() {
        let mut mock = MockActuator::new();
        mock.expect_read_channel_intensity()
            .returning(|address, channel| {
                Err(HardwareError::ReadFailed {
                    address,
                    channel,
                    reason: "nack".to_string(),
                })
            });
        let actuator = TimeoutActuator::new(Arc::new(mock), Duration::from_millis(500));
        assert!(matches!(
            actuator.read_channel_intensity(TEST_CONTROLLER, 5),
            Err(HardwareError::ReadFailed { channel: 5, .. })
        ));
    }
}
