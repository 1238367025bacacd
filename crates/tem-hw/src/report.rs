//! Post-call status checks.
//!
//! Every driver call is followed by a status query. The reporter turns
//! the answer into `Ok(())` or a [`DeviceError`] carrying the status
//! code and whatever text the device supplies.

use crate::error::DeviceError;

/// Last-error query surface of a device driver.
pub trait StatusProbe {
    /// Status of the most recent driver call.
    ///
    /// `Err` carries the code returned by the status query itself when
    /// the query failed.
    fn last_status(&mut self) -> Result<i32, i32>;

    /// Human-readable text for a status code. `Err` carries the code
    /// returned by the text lookup when it failed.
    fn status_text(&mut self, code: i32) -> Result<String, i32>;
}

/// How a subsystem classifies status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPolicy {
    /// The one code that means success.
    pub success: i32,
    /// Status meaning the call went through but its diagnostic text was
    /// cut short. Downgraded to a warning.
    pub truncated: Option<i32>,
}

impl StatusPolicy {
    /// Anything but the success sentinel is a failure.
    pub const STRICT: Self = Self {
        success: 0,
        truncated: None,
    };

    pub const fn tolerating_truncation(success: i32, truncated: i32) -> Self {
        Self {
            success,
            truncated: Some(truncated),
        }
    }
}

/// Converts post-call device status into a result.
#[derive(Debug, Clone, Copy)]
pub struct ErrorReporter {
    policy: StatusPolicy,
}

impl ErrorReporter {
    pub fn new(policy: StatusPolicy) -> Self {
        Self { policy }
    }

    /// Query `probe` for the status of the call just made as `operation`.
    pub fn check<P: StatusProbe + ?Sized>(
        &self,
        probe: &mut P,
        operation: &'static str,
    ) -> Result<(), DeviceError> {
        let code = probe
            .last_status()
            .map_err(|query_code| DeviceError::StatusUnavailable {
                operation,
                query_code,
            })?;

        if code == self.policy.success {
            tracing::debug!(operation, "success");
            return Ok(());
        }

        if self.policy.truncated == Some(code) {
            tracing::warn!(operation, code, "device status text truncated");
            return Ok(());
        }

        // A failed text lookup still leaves the status code to report.
        let message = probe.status_text(code).unwrap_or_else(|text_code| {
            format!("no description available (text lookup returned {text_code})")
        });

        Err(DeviceError::Hardware {
            operation,
            code,
            message,
        })
    }
}
