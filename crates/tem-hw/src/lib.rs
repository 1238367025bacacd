//! tem-hw: device control for a microscope camera and a DMD mirror array.
//!
//! Wraps vendor SDKs behind driver traits, checks the status of every
//! device call, and guarantees the device is released on every exit path.

pub mod camera;
pub mod config;
pub mod emulated;
pub mod error;
mod input;
pub mod mirror;
pub mod report;
pub mod session;
pub mod threshold;
#[cfg(feature = "ueye")]
pub mod ueye;

#[cfg(test)]
mod fake;

pub use camera::{CameraController, CameraDriver, ConfigReport, SensorGeometry};
pub use config::{AcquisitionConfig, CameraSettings, TriggerMode};
pub use error::{DeviceError, OperationResult, Severity, ValidationError, ValidationErrors};
pub use mirror::{BatchPause, BatchReport, DmdType, MirrorController, MirrorDriver, MirrorGeometry};
pub use report::{ErrorReporter, StatusPolicy, StatusProbe};
pub use session::{DeviceDriver, DeviceHandle, DeviceSession};
pub use threshold::BinaryFrame;
