//! Exclusive ownership of one hardware unit.
//!
//! A [`DeviceSession`] is the only way to reach an opened device. It
//! claims the unit for the whole process, routes every driver call
//! through the [`ErrorReporter`], and halts and frees the device when
//! closed or dropped.

use crate::error::DeviceError;
use crate::report::{ErrorReporter, StatusPolicy, StatusProbe};
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, PoisonError};

/// Opaque identifier of an allocated hardware unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(u64);

impl DeviceHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Lifecycle surface every device driver provides.
///
/// Calls do not return a status; the session asks the driver's
/// [`StatusProbe`] right after each one.
pub trait DeviceDriver: StatusProbe {
    /// Device class name used in logs and in the per-process claim.
    const KIND: &'static str;

    /// Allocate `unit`. The handle is only considered held when the
    /// status check that follows succeeds.
    fn open(&mut self, unit: u32) -> DeviceHandle;

    /// Stop any activity on the device.
    fn halt(&mut self, handle: DeviceHandle);

    /// Release the device. The handle is invalid afterwards.
    fn free(&mut self, handle: DeviceHandle);
}

static CLAIMS: OnceLock<Mutex<HashSet<(&'static str, u32)>>> = OnceLock::new();

fn claims() -> &'static Mutex<HashSet<(&'static str, u32)>> {
    CLAIMS.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Process-wide reservation of one physical unit.
#[derive(Debug)]
struct UnitClaim {
    kind: &'static str,
    unit: u32,
}

impl UnitClaim {
    fn acquire(kind: &'static str, unit: u32) -> Result<Self, DeviceError> {
        let mut held = claims().lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert((kind, unit)) {
            return Err(DeviceError::Busy { kind, unit });
        }
        Ok(Self { kind, unit })
    }
}

impl Drop for UnitClaim {
    fn drop(&mut self) {
        claims()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(self.kind, self.unit));
    }
}

/// An opened device plus the driver that talks to it.
pub struct DeviceSession<D: DeviceDriver> {
    driver: D,
    handle: Option<DeviceHandle>,
    reporter: ErrorReporter,
    unit: u32,
    claim: Option<UnitClaim>,
}

impl<D: DeviceDriver> DeviceSession<D> {
    /// Claim and allocate `unit`. On failure nothing is held: the claim
    /// is released and the driver is not asked to free anything.
    pub fn open(mut driver: D, unit: u32, policy: StatusPolicy) -> Result<Self, DeviceError> {
        let claim = UnitClaim::acquire(D::KIND, unit)?;
        let reporter = ErrorReporter::new(policy);

        let handle = driver.open(unit);
        reporter.check(&mut driver, "open device")?;

        tracing::info!(kind = D::KIND, unit, handle = handle.raw(), "device opened");

        Ok(Self {
            driver,
            handle: Some(handle),
            reporter,
            unit,
            claim: Some(claim),
        })
    }

    /// Run one driver call against the held handle and check its status.
    pub fn call<T>(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&mut D, DeviceHandle) -> T,
    ) -> Result<T, DeviceError> {
        let handle = self.handle.ok_or(DeviceError::SessionClosed)?;
        let value = f(&mut self.driver, handle);
        self.reporter.check(&mut self.driver, operation)?;
        Ok(value)
    }

    /// Halt then free the device. Safe to call any number of times;
    /// only the first call touches the hardware.
    pub fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        tracing::info!(kind = D::KIND, unit = self.unit, "closing device");

        self.driver.halt(handle);
        if let Err(e) = self.reporter.check(&mut self.driver, "halt device") {
            tracing::warn!(kind = D::KIND, error = %e, "halt failed; freeing anyway");
        }

        self.driver.free(handle);
        if let Err(e) = self.reporter.check(&mut self.driver, "free device") {
            tracing::warn!(kind = D::KIND, error = %e, "free failed");
        }

        self.claim = None;
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: DeviceDriver> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        self.close();
    }
}
