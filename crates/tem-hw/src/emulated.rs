//! Software stand-ins for the camera and mirror SDKs.
//!
//! Used when no vendor library is linked. They keep the same status
//! discipline as the real drivers: every call leaves a status code and
//! message behind for the next status query.

use crate::camera::{CameraDriver, ExposureRange, FrameBuffer, LogMode, SensorInfo, ShutterMode};
use crate::config::TriggerMode;
use crate::mirror::{DmdType, MirrorDriver, MIRROR_SUCCESS};
use crate::report::StatusProbe;
use crate::session::{DeviceDriver, DeviceHandle};
use crate::threshold::BinaryFrame;
use image::{ColorType, ImageFormat};
use std::path::Path;
use std::time::Duration;

const CAMERA_SUCCESS: i32 = 0;
const CAMERA_NO_SUCCESS: i32 = -1;
const CAMERA_INVALID_PARAMETER: i32 = 125;

const MIRROR_INVALID_PARAMETER: i32 = -1005;

/// Emulated camera producing a moving gradient.
pub struct EmulatedCamera {
    width: u32,
    height: u32,
    status: i32,
    message: String,
    frame_rate: f64,
    exposure_ms: f64,
    long_exposure: bool,
    pixel_clock_mhz: u32,
    gain: i32,
    black_level: i32,
    trigger: TriggerMode,
    frames: u32,
}

impl Default for EmulatedCamera {
    fn default() -> Self {
        Self::new(1280, 1024)
    }
}

impl EmulatedCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            status: CAMERA_SUCCESS,
            message: String::new(),
            frame_rate: 25.0,
            exposure_ms: 10.0,
            long_exposure: false,
            pixel_clock_mhz: 30,
            gain: 0,
            black_level: 0,
            trigger: TriggerMode::FreeRun,
            frames: 0,
        }
    }

    pub fn frames_captured(&self) -> u32 {
        self.frames
    }

    pub fn pixel_clock_mhz(&self) -> u32 {
        self.pixel_clock_mhz
    }

    pub fn trigger(&self) -> TriggerMode {
        self.trigger
    }

    fn ok(&mut self) {
        self.status = CAMERA_SUCCESS;
        self.message.clear();
    }

    fn fail(&mut self, code: i32, message: impl Into<String>) {
        self.status = code;
        self.message = message.into();
    }

    fn range(&self) -> ExposureRange {
        let max_ms = if self.long_exposure {
            30_000.0
        } else {
            1000.0 / self.frame_rate
        };
        ExposureRange {
            min_ms: 0.01,
            max_ms,
            increment_ms: 0.01,
        }
    }
}

impl StatusProbe for EmulatedCamera {
    fn last_status(&mut self) -> Result<i32, i32> {
        Ok(self.status)
    }

    fn status_text(&mut self, code: i32) -> Result<String, i32> {
        if code == self.status {
            Ok(self.message.clone())
        } else {
            Ok(format!("status {code}"))
        }
    }
}

impl DeviceDriver for EmulatedCamera {
    const KIND: &'static str = "camera";

    fn open(&mut self, unit: u32) -> DeviceHandle {
        self.ok();
        DeviceHandle::new(u64::from(unit))
    }

    fn halt(&mut self, _handle: DeviceHandle) {
        self.ok();
    }

    fn free(&mut self, _handle: DeviceHandle) {
        self.ok();
    }
}

impl CameraDriver for EmulatedCamera {
    fn sensor_info(&mut self, _handle: DeviceHandle) -> SensorInfo {
        self.ok();
        SensorInfo {
            name: "emulated".into(),
            max_width: self.width,
            max_height: self.height,
        }
    }

    fn bind_buffer(&mut self, _handle: DeviceHandle, buffer: &mut FrameBuffer) {
        let g = buffer.geometry();
        if g.width != self.width || g.height != self.height {
            self.fail(
                CAMERA_INVALID_PARAMETER,
                format!("buffer is {}x{}, sensor is {}x{}", g.width, g.height, self.width, self.height),
            );
        } else {
            self.ok();
        }
    }

    fn frame_rate(&mut self, _handle: DeviceHandle) -> f64 {
        self.ok();
        self.frame_rate
    }

    fn exposure(&mut self, _handle: DeviceHandle) -> f64 {
        self.ok();
        self.exposure_ms
    }

    fn exposure_range(&mut self, _handle: DeviceHandle) -> ExposureRange {
        self.ok();
        self.range()
    }

    fn set_pixel_clock(&mut self, _handle: DeviceHandle, mhz: u32) {
        self.pixel_clock_mhz = mhz;
        self.ok();
    }

    fn set_long_exposure(&mut self, _handle: DeviceHandle, enabled: bool) {
        self.long_exposure = enabled;
        self.ok();
    }

    fn set_log_mode(&mut self, _handle: DeviceHandle, _mode: LogMode) {
        self.ok();
    }

    fn set_shutter_mode(&mut self, _handle: DeviceHandle, _mode: ShutterMode) {
        self.ok();
    }

    fn set_exposure(&mut self, _handle: DeviceHandle, ms: f64) {
        let range = self.range();
        if range.contains(ms) {
            self.exposure_ms = ms;
            self.ok();
        } else {
            self.fail(
                CAMERA_INVALID_PARAMETER,
                format!("exposure {ms} ms outside {}..{} ms", range.min_ms, range.max_ms),
            );
        }
    }

    fn gain(&mut self, _handle: DeviceHandle) -> i32 {
        self.ok();
        self.gain
    }

    fn set_gain(&mut self, _handle: DeviceHandle, gain: u8) {
        if gain > 100 {
            self.fail(CAMERA_INVALID_PARAMETER, format!("gain {gain} above 100"));
        } else {
            self.gain = i32::from(gain);
            self.ok();
        }
    }

    fn black_level(&mut self, _handle: DeviceHandle) -> i32 {
        self.ok();
        self.black_level
    }

    fn set_black_level(&mut self, _handle: DeviceHandle, level: u8) {
        self.black_level = i32::from(level);
        self.ok();
    }

    fn set_trigger(&mut self, _handle: DeviceHandle, mode: TriggerMode) {
        self.trigger = mode;
        self.ok();
    }

    fn freeze(&mut self, _handle: DeviceHandle, buffer: &mut FrameBuffer) {
        std::thread::sleep(Duration::from_secs_f64(self.exposure_ms / 1000.0));

        let width = buffer.geometry().width as usize;
        let bpp = buffer.geometry().bytes_per_pixel();
        let offset = self.frames.wrapping_mul(8) as usize + self.black_level as usize;
        for (i, px) in buffer.as_mut_bytes().chunks_exact_mut(bpp).enumerate() {
            let (x, y) = (i % width, i / width);
            px.fill(((x + y + offset) % 256) as u8);
        }

        self.frames = self.frames.wrapping_add(1);
        self.ok();
    }

    fn save_image(&mut self, _handle: DeviceHandle, path: &Path, buffer: &FrameBuffer) {
        let g = buffer.geometry();
        let color = match g.bytes_per_pixel() {
            1 => ColorType::L8,
            3 => ColorType::Rgb8,
            4 => ColorType::Rgba8,
            other => {
                self.fail(
                    CAMERA_INVALID_PARAMETER,
                    format!("cannot save {other} bytes per pixel"),
                );
                return;
            }
        };
        match image::save_buffer_with_format(
            path,
            buffer.as_bytes(),
            g.width,
            g.height,
            color,
            ImageFormat::Png,
        ) {
            Ok(()) => self.ok(),
            Err(e) => self.fail(CAMERA_NO_SUCCESS, e.to_string()),
        }
    }
}

/// Emulated DMD that keeps the last frame it was sent.
pub struct EmulatedMirror {
    dmd_code: i64,
    serial: u64,
    status: i32,
    message: String,
    last_frame: Option<BinaryFrame>,
    resets: u32,
}

impl Default for EmulatedMirror {
    fn default() -> Self {
        Self::new(DmdType::Disconnected.code())
    }
}

impl EmulatedMirror {
    /// A mirror that reports `dmd_code` as its panel type.
    pub fn new(dmd_code: i64) -> Self {
        Self {
            dmd_code,
            serial: 0,
            status: MIRROR_SUCCESS,
            message: String::new(),
            last_frame: None,
            resets: 0,
        }
    }

    pub fn last_frame(&self) -> Option<&BinaryFrame> {
        self.last_frame.as_ref()
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    fn ok(&mut self) {
        self.status = MIRROR_SUCCESS;
        self.message.clear();
    }

    fn fail(&mut self, code: i32, message: impl Into<String>) {
        self.status = code;
        self.message = message.into();
    }
}

impl StatusProbe for EmulatedMirror {
    fn last_status(&mut self) -> Result<i32, i32> {
        Ok(self.status)
    }

    fn status_text(&mut self, code: i32) -> Result<String, i32> {
        if code == self.status {
            Ok(self.message.clone())
        } else {
            Ok(format!("status {code}"))
        }
    }
}

impl DeviceDriver for EmulatedMirror {
    const KIND: &'static str = "mirror";

    fn open(&mut self, unit: u32) -> DeviceHandle {
        self.serial = 10_000 + u64::from(unit);
        self.ok();
        DeviceHandle::new(u64::from(unit))
    }

    fn halt(&mut self, _handle: DeviceHandle) {
        self.ok();
    }

    fn free(&mut self, _handle: DeviceHandle) {
        self.last_frame = None;
        self.ok();
    }
}

impl MirrorDriver for EmulatedMirror {
    fn serial_number(&mut self, _handle: DeviceHandle) -> u64 {
        self.ok();
        self.serial
    }

    fn dmd_type(&mut self, _handle: DeviceHandle) -> i64 {
        self.ok();
        self.dmd_code
    }

    fn load_rows(
        &mut self,
        _handle: DeviceHandle,
        frame: &BinaryFrame,
        first_row: u32,
        last_row: u32,
    ) {
        let height = frame.geometry().height;
        if first_row > last_row || last_row >= height {
            self.fail(
                MIRROR_INVALID_PARAMETER,
                format!("row range {first_row}..={last_row} outside 0..{height}"),
            );
            return;
        }
        self.last_frame = Some(frame.clone());
        self.ok();
    }

    fn reset(&mut self, _handle: DeviceHandle) {
        self.resets += 1;
        self.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraController;
    use crate::config::{AcquisitionConfig, CameraSettings};
    use crate::fake;
    use crate::mirror::{MirrorController, MirrorGeometry};
    use image::{GrayImage, Luma};

    #[test]
    fn test_emulated_camera_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emulated.png");
        let settings = CameraSettings {
            camera_id: fake::unit(),
            warmup_frames: 1,
            ..CameraSettings::default()
        };
        let mut camera = CameraController::initialize(EmulatedCamera::new(32, 16), settings).unwrap();

        let config = AcquisitionConfig::validate(1.0, 20, 4, TriggerMode::Software).unwrap();
        assert!(camera.apply_config(&config).is_success());
        assert_eq!(camera.driver().trigger(), TriggerMode::Software);
        assert_eq!(camera.driver().pixel_clock_mhz(), 10);

        camera.warm_up().unwrap();
        camera.capture_and_save(&path).unwrap();
        assert_eq!(camera.driver().frames_captured(), 2);
        camera.shutdown();

        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (32, 16));
    }

    #[test]
    fn test_emulated_camera_rejects_out_of_range_exposure() {
        let settings = CameraSettings {
            camera_id: fake::unit(),
            ..CameraSettings::default()
        };
        let mut camera = CameraController::initialize(EmulatedCamera::new(8, 8), settings).unwrap();
        let config = AcquisitionConfig::validate(60_000.0, 0, 0, TriggerMode::FreeRun).unwrap();

        let report = camera.apply_config(&config);
        let failed: Vec<_> = report.failures().map(|(op, _)| op).collect();
        assert_eq!(failed, vec!["set exposure"]);
    }

    #[test]
    fn test_emulated_camera_save_failure_reports_text() {
        let settings = CameraSettings {
            camera_id: fake::unit(),
            ..CameraSettings::default()
        };
        let mut camera = CameraController::initialize(EmulatedCamera::new(8, 8), settings).unwrap();
        let config = AcquisitionConfig::validate(1.0, 0, 0, TriggerMode::FreeRun).unwrap();
        camera.apply_config(&config);

        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("no-such-dir").join("frame.png");
        let err = camera.capture_and_save(&bad).unwrap_err();
        assert!(matches!(
            err,
            crate::DeviceError::Hardware {
                code: CAMERA_NO_SUCCESS,
                ..
            }
        ));
    }

    #[test]
    fn test_emulated_mirror_defaults_to_disconnected_panel() {
        let mut mirror = MirrorController::initialize(EmulatedMirror::default(), fake::unit()).unwrap();
        assert_eq!(
            mirror.geometry(),
            MirrorGeometry {
                width: 1920,
                height: 1080
            }
        );

        mirror
            .upload_raster(&GrayImage::from_pixel(10, 10, Luma([255])))
            .unwrap();
        let shown = mirror.driver().last_frame().unwrap();
        assert_eq!(shown.count_on(), 100);
        assert_eq!(mirror.driver().resets(), 1);
    }

    #[test]
    fn test_emulated_mirror_unknown_type() {
        let result = MirrorController::initialize(EmulatedMirror::new(99), fake::unit());
        assert!(matches!(result, Err(crate::DeviceError::UnknownDmdType(99))));
    }
}
