// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide driver context
//!
//! Sessions may ask how many devices are attached before any of them starts
//! streaming, so one driver context is kept for the whole process and
//! created on first use. Each session's background task still owns its own
//! context for event processing; this one only answers device queries.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{error, info, warn};

use super::driver::{Driver, DriverContext};

/// Lazily initialized driver context shared by all sessions
pub struct DeviceContext {
    context: Mutex<Option<Box<dyn DriverContext>>>,
}

static SHARED_CONTEXT: OnceLock<DeviceContext> = OnceLock::new();

impl DeviceContext {
    /// Create an uninitialized context
    pub fn new() -> Self {
        Self {
            context: Mutex::new(None),
        }
    }

    /// The process-wide instance
    pub fn shared() -> &'static DeviceContext {
        SHARED_CONTEXT.get_or_init(DeviceContext::new)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn DriverContext>>> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize the driver
    ///
    /// Returns true only for the call that created the context. A second
    /// call is a logged no-op. On failure the context stays uninitialized
    /// and the call may be retried.
    pub fn init(&self, driver: &dyn Driver) -> bool {
        let mut guard = self.lock();
        if guard.is_some() {
            warn!(driver = driver.name(), "Device context already initialized");
            return false;
        }

        match driver.init() {
            Ok(context) => {
                info!(driver = driver.name(), "Device context initialized");
                *guard = Some(context);
                true
            }
            Err(e) => {
                error!(driver = driver.name(), error = %e, "Failed to initialize device context");
                false
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    /// Number of attached devices, or 0 if the context is not initialized
    pub fn num_devices(&self) -> usize {
        match self.lock().as_ref() {
            Some(context) => match context.num_devices() {
                Ok(count) => count,
                Err(e) => {
                    error!(error = %e, "Failed to query device count");
                    0
                }
            },
            None => {
                error!("Device context not initialized");
                0
            }
        }
    }
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::driver::{SimulatedDriver, SimulatorConfig};

    #[test]
    fn test_uninitialized_reports_zero() {
        let context = DeviceContext::new();
        assert!(!context.is_initialized());
        assert_eq!(context.num_devices(), 0);
    }

    #[test]
    fn test_init_is_idempotent() {
        let driver = SimulatedDriver::new(SimulatorConfig::small());
        let context = DeviceContext::new();
        assert!(context.init(&driver));
        assert!(!context.init(&driver));
        assert!(context.is_initialized());
        assert_eq!(driver.stats().init_calls, 1);
        assert_eq!(context.num_devices(), 1);
    }

    #[test]
    fn test_failed_init_can_be_retried() {
        let driver = SimulatedDriver::new(SimulatorConfig::small());
        driver.set_fail_init(true);
        let context = DeviceContext::new();
        assert!(!context.init(&driver));
        assert!(!context.is_initialized());

        driver.set_fail_init(false);
        assert!(context.init(&driver));
        assert!(context.is_initialized());
        assert_eq!(driver.stats().init_calls, 2);
    }

    #[test]
    fn test_device_count_follows_driver() {
        let driver = SimulatedDriver::new(SimulatorConfig::small());
        let context = DeviceContext::new();
        context.init(&driver);
        driver.set_device_count(3);
        assert_eq!(context.num_devices(), 3);
    }
}
