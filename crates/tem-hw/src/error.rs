//! Error taxonomy shared by the camera and mirror subsystems.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single rejected acquisition parameter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("exposure time must be a positive number of milliseconds (got {0})")]
    ExposureNotPositive(f64),
    #[error("gain must be between 0 and 100 (got {0})")]
    GainOutOfRange(i64),
    #[error("black level must be between 0 and 255 (got {0})")]
    BlackLevelOutOfRange(i64),
}

/// Every parameter that failed validation, in field order.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("{operation} failed (status {code}): {message}")]
    Hardware {
        operation: &'static str,
        code: i32,
        message: String,
    },
    #[error("{operation}: device status could not be queried (query returned {query_code})")]
    StatusUnavailable {
        operation: &'static str,
        query_code: i32,
    },
    #[error("DMD type {0} is not a known panel")]
    UnknownDmdType(i64),
    #[error("{kind} unit {unit} is already held by this process")]
    Busy { kind: &'static str, unit: u32 },
    #[error("device session already closed")]
    SessionClosed,
    #[error("{operation} needs a configured camera")]
    NotConfigured { operation: &'static str },
    #[error("cannot read image {}: {source}", .path.display())]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// How bad a failure is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// The operation was skipped; the session stays usable.
    Recoverable,
    /// The session must be torn down.
    Fatal,
    /// The device could not even report what went wrong.
    Undiagnosable,
}

impl DeviceError {
    pub fn severity(&self) -> Severity {
        match self {
            DeviceError::ImageLoad { .. } => Severity::Recoverable,
            DeviceError::StatusUnavailable { .. } => Severity::Undiagnosable,
            DeviceError::Hardware { .. }
            | DeviceError::UnknownDmdType(_)
            | DeviceError::Busy { .. }
            | DeviceError::SessionClosed
            | DeviceError::NotConfigured { .. } => Severity::Fatal,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.severity() == Severity::Recoverable
    }
}

/// Tagged outcome of one hardware-facing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    Success,
    RecoverableFailure(String),
    FatalFailure(String),
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Success)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, OperationResult::FatalFailure(_))
    }
}

impl From<&DeviceError> for OperationResult {
    fn from(err: &DeviceError) -> Self {
        match err.severity() {
            Severity::Recoverable => OperationResult::RecoverableFailure(err.to_string()),
            Severity::Fatal | Severity::Undiagnosable => {
                OperationResult::FatalFailure(err.to_string())
            }
        }
    }
}

impl<T> From<&Result<T, DeviceError>> for OperationResult {
    fn from(result: &Result<T, DeviceError>) -> Self {
        match result {
            Ok(_) => OperationResult::Success,
            Err(e) => e.into(),
        }
    }
}
