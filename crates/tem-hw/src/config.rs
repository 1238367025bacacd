//! Acquisition parameters and per-device settings.

use crate::error::{ValidationError, ValidationErrors};
use serde::Serialize;

/// How a capture is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerMode {
    /// The sensor starts exposing on its own.
    FreeRun,
    /// Each exposure waits for a software trigger.
    Software,
}

/// Validated camera acquisition parameters.
///
/// The only constructor is [`AcquisitionConfig::validate`], so a value
/// of this type is always in range and safe to hand to the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AcquisitionConfig {
    exposure_ms: f64,
    gain: u8,
    black_level: u8,
    trigger: TriggerMode,
}

impl AcquisitionConfig {
    pub const MAX_GAIN: i64 = 100;
    pub const MAX_BLACK_LEVEL: i64 = 255;

    /// Check every field and report all that are out of range.
    pub fn validate(
        exposure_ms: f64,
        gain: i64,
        black_level: i64,
        trigger: TriggerMode,
    ) -> Result<Self, ValidationErrors> {
        let mut errors = Vec::new();

        // NaN fails this comparison too.
        if !(exposure_ms > 0.0 && exposure_ms.is_finite()) {
            errors.push(ValidationError::ExposureNotPositive(exposure_ms));
        }
        let gain = match u8::try_from(gain) {
            Ok(g) if i64::from(g) <= Self::MAX_GAIN => Some(g),
            _ => {
                errors.push(ValidationError::GainOutOfRange(gain));
                None
            }
        };
        let black_level = match u8::try_from(black_level) {
            Ok(b) => Some(b),
            Err(_) => {
                errors.push(ValidationError::BlackLevelOutOfRange(black_level));
                None
            }
        };

        match (gain, black_level) {
            (Some(gain), Some(black_level)) if errors.is_empty() => Ok(Self {
                exposure_ms,
                gain,
                black_level,
                trigger,
            }),
            _ => Err(ValidationErrors(errors)),
        }
    }

    pub fn exposure_ms(&self) -> f64 {
        self.exposure_ms
    }

    pub fn gain(&self) -> u8 {
        self.gain
    }

    pub fn black_level(&self) -> u8 {
        self.black_level
    }

    pub fn trigger(&self) -> TriggerMode {
        self.trigger
    }
}

/// Camera settings that are not part of the validated acquisition config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    /// Camera unit passed to device open.
    pub camera_id: u32,
    /// Pixel clock applied before any other setting, in MHz.
    pub pixel_clock_mhz: u32,
    /// Frames frozen and discarded right after configuration.
    pub warmup_frames: usize,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            camera_id: 1,
            pixel_clock_mhz: 10,
            warmup_frames: 0,
        }
    }
}
