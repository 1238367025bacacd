//! Camera sessions: configure the sensor, freeze frames, save them.

use crate::config::{AcquisitionConfig, CameraSettings, TriggerMode};
use crate::error::{DeviceError, OperationResult};
use crate::input::PathLines;
use crate::report::StatusPolicy;
use crate::session::{DeviceDriver, DeviceHandle, DeviceSession};
use serde::Serialize;
use std::io::BufRead;
use std::path::Path;
use std::time::{Duration, Instant};

/// Bit depth the frame buffer is sized for, whatever the sensor reports.
pub const ASSUMED_BITS_PER_PIXEL: u32 = 24;

/// Full-resolution frame layout, queried once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorGeometry {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
}

impl SensorGeometry {
    pub fn bytes_per_pixel(&self) -> usize {
        self.bits_per_pixel.div_ceil(8) as usize
    }

    pub fn buffer_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel()
    }
}

/// Raw answer of the sensor-info query.
#[derive(Debug, Clone, Default)]
pub struct SensorInfo {
    pub name: String,
    pub max_width: u32,
    pub max_height: u32,
}

/// Exposure limits reported by the device, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExposureRange {
    pub min_ms: f64,
    pub max_ms: f64,
    pub increment_ms: f64,
}

impl ExposureRange {
    pub fn contains(&self, ms: f64) -> bool {
        ms >= self.min_ms && ms <= self.max_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterMode {
    Rolling,
    Global,
}

/// On-sensor automatic correction ("log") mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    FactoryDefault,
    Off,
    Manual,
}

/// Contiguous pixel memory the sensor reads out into.
///
/// One per session, reused for every capture.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    geometry: SensorGeometry,
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(geometry: SensorGeometry) -> Self {
        Self {
            geometry,
            data: vec![0; geometry.buffer_len()],
        }
    }

    pub fn geometry(&self) -> SensorGeometry {
        self.geometry
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Camera SDK surface. Status of each call is read back through the
/// [`StatusProbe`](crate::report::StatusProbe) supertrait.
pub trait CameraDriver: DeviceDriver {
    fn sensor_info(&mut self, handle: DeviceHandle) -> SensorInfo;
    /// Make `buffer` the capture target. The driver may keep a pointer
    /// into it until the device is freed.
    fn bind_buffer(&mut self, handle: DeviceHandle, buffer: &mut FrameBuffer);
    fn frame_rate(&mut self, handle: DeviceHandle) -> f64;
    fn exposure(&mut self, handle: DeviceHandle) -> f64;
    fn exposure_range(&mut self, handle: DeviceHandle) -> ExposureRange;
    fn set_pixel_clock(&mut self, handle: DeviceHandle, mhz: u32);
    fn set_long_exposure(&mut self, handle: DeviceHandle, enabled: bool);
    fn set_log_mode(&mut self, handle: DeviceHandle, mode: LogMode);
    fn set_shutter_mode(&mut self, handle: DeviceHandle, mode: ShutterMode);
    fn set_exposure(&mut self, handle: DeviceHandle, ms: f64);
    fn gain(&mut self, handle: DeviceHandle) -> i32;
    fn set_gain(&mut self, handle: DeviceHandle, gain: u8);
    fn black_level(&mut self, handle: DeviceHandle) -> i32;
    fn set_black_level(&mut self, handle: DeviceHandle, level: u8);
    fn set_trigger(&mut self, handle: DeviceHandle, mode: TriggerMode);
    /// Capture one frame into the bound buffer. Blocks until exposure
    /// and readout are complete.
    fn freeze(&mut self, handle: DeviceHandle, buffer: &mut FrameBuffer);
    /// Write `buffer` to `path` as a lossless PNG.
    fn save_image(&mut self, handle: DeviceHandle, path: &Path, buffer: &FrameBuffer);
}

/// Device state read back while configuring.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Readback {
    pub frame_rate: Option<f64>,
    pub exposure_ms: Option<f64>,
    pub exposure_range: Option<ExposureRange>,
    pub gain_before: Option<i32>,
    pub gain_after: Option<i32>,
    pub black_level_before: Option<i32>,
    pub black_level_after: Option<i32>,
}

/// Outcome of every call made while applying an [`AcquisitionConfig`].
#[derive(Debug, Default)]
pub struct ConfigReport {
    steps: Vec<(&'static str, Result<(), DeviceError>)>,
    pub readback: Readback,
}

impl ConfigReport {
    fn record(&mut self, operation: &'static str, result: Result<(), DeviceError>) {
        self.steps.push((operation, result));
    }

    pub fn steps(&self) -> impl Iterator<Item = (&'static str, OperationResult)> + '_ {
        self.steps
            .iter()
            .map(|(op, result)| (*op, OperationResult::from(result)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&'static str, &DeviceError)> + '_ {
        self.steps
            .iter()
            .filter_map(|(op, result)| result.as_ref().err().map(|e| (*op, e)))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// The most severe failure, earliest first among equals.
    pub fn into_result(self) -> Result<(), DeviceError> {
        let mut worst: Option<DeviceError> = None;
        for (_, result) in self.steps {
            if let Err(e) = result {
                if worst.as_ref().map_or(true, |w| e.severity() > w.severity()) {
                    worst = Some(e);
                }
            }
        }
        worst.map_or(Ok(()), Err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    /// Buffer bound, configuration not yet applied.
    Open,
    Idle,
    Capturing,
    Closed,
}

/// Owns a camera session and its frame buffer.
pub struct CameraController<D: CameraDriver> {
    // Declared before `buffer` so the device lets go of the memory first.
    session: DeviceSession<D>,
    buffer: FrameBuffer,
    geometry: SensorGeometry,
    settings: CameraSettings,
    state: CameraState,
    trigger: TriggerMode,
    opened_at: Instant,
}

impl<D: CameraDriver> CameraController<D> {
    /// Open the camera, size a frame buffer to the full sensor and bind it.
    pub fn initialize(driver: D, settings: CameraSettings) -> Result<Self, DeviceError> {
        let opened_at = Instant::now();
        tracing::info!(camera_id = settings.camera_id, "initializing camera");

        let mut session = DeviceSession::open(driver, settings.camera_id, StatusPolicy::STRICT)?;

        let info = session.call("get sensor info", |d, h| d.sensor_info(h))?;
        let geometry = SensorGeometry {
            width: info.max_width,
            height: info.max_height,
            bits_per_pixel: ASSUMED_BITS_PER_PIXEL,
        };
        tracing::info!(
            sensor = %info.name,
            width = geometry.width,
            height = geometry.height,
            bits_per_pixel = geometry.bits_per_pixel,
            "sensor geometry"
        );

        let mut buffer = FrameBuffer::new(geometry);
        session.call("set image memory", |d, h| d.bind_buffer(h, &mut buffer))?;

        Ok(Self {
            session,
            buffer,
            geometry,
            settings,
            state: CameraState::Open,
            trigger: TriggerMode::FreeRun,
            opened_at,
        })
    }

    pub fn geometry(&self) -> SensorGeometry {
        self.geometry
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn driver(&self) -> &D {
        self.session.driver()
    }

    /// Apply `config` one setting at a time.
    ///
    /// A failed setting does not stop the ones after it; every call
    /// and its outcome lands in the returned report so a partial
    /// configuration is visible to the caller.
    pub fn apply_config(&mut self, config: &AcquisitionConfig) -> ConfigReport {
        let mut report = ConfigReport::default();

        report.readback.frame_rate = self.step(&mut report, "get frame rate", |d, h| d.frame_rate(h));
        report.readback.exposure_ms = self.step(&mut report, "get exposure", |d, h| d.exposure(h));
        tracing::info!(
            frame_rate = ?report.readback.frame_rate,
            exposure_ms = ?report.readback.exposure_ms,
            "current acquisition state"
        );

        let mhz = self.settings.pixel_clock_mhz;
        self.step(&mut report, "set pixel clock", |d, h| d.set_pixel_clock(h, mhz));
        self.step(&mut report, "enable long exposure", |d, h| d.set_long_exposure(h, true));
        self.step(&mut report, "set log mode", |d, h| d.set_log_mode(h, LogMode::Off));
        self.step(&mut report, "set shutter mode", |d, h| {
            d.set_shutter_mode(h, ShutterMode::Rolling)
        });

        let exposure = config.exposure_ms();
        let range = self.step(&mut report, "get exposure range", |d, h| d.exposure_range(h));
        if let Some(range) = range {
            tracing::info!(
                min_ms = range.min_ms,
                max_ms = range.max_ms,
                increment_ms = range.increment_ms,
                "valid exposure range"
            );
            if !range.contains(exposure) {
                tracing::warn!(
                    exposure_ms = exposure,
                    min_ms = range.min_ms,
                    max_ms = range.max_ms,
                    "requested exposure outside device range"
                );
            }
        }
        report.readback.exposure_range = range;
        tracing::info!(exposure_ms = exposure, "setting exposure");
        self.step(&mut report, "set exposure", |d, h| d.set_exposure(h, exposure));

        let gain = config.gain();
        report.readback.gain_before = self.step(&mut report, "get gain", |d, h| d.gain(h));
        tracing::info!(current = ?report.readback.gain_before, requested = gain, "setting gain");
        self.step(&mut report, "set gain", |d, h| d.set_gain(h, gain));
        report.readback.gain_after = self.step(&mut report, "get gain", |d, h| d.gain(h));

        let level = config.black_level();
        report.readback.black_level_before =
            self.step(&mut report, "get black level", |d, h| d.black_level(h));
        tracing::info!(
            current = ?report.readback.black_level_before,
            requested = level,
            "setting black level"
        );
        self.step(&mut report, "set black level", |d, h| d.set_black_level(h, level));
        report.readback.black_level_after =
            self.step(&mut report, "get black level", |d, h| d.black_level(h));

        if config.trigger() == TriggerMode::Software {
            self.step(&mut report, "set external trigger", |d, h| {
                d.set_trigger(h, TriggerMode::Software)
            });
        }

        if self.state != CameraState::Closed {
            self.trigger = config.trigger();
            self.state = CameraState::Idle;
        }
        report
    }

    fn step<T>(
        &mut self,
        report: &mut ConfigReport,
        operation: &'static str,
        f: impl FnOnce(&mut D, DeviceHandle) -> T,
    ) -> Option<T> {
        match self.session.call(operation, f) {
            Ok(value) => {
                report.record(operation, Ok(()));
                Some(value)
            }
            Err(e) => {
                report.record(operation, Err(e));
                None
            }
        }
    }

    /// Freeze and discard the configured number of warm-up frames; at
    /// least one under software trigger.
    ///
    /// Returns the time from initialization to the first completed frame.
    pub fn warm_up(&mut self) -> Result<Option<Duration>, DeviceError> {
        self.ensure_configured("warm up")?;
        let frames = match self.trigger {
            TriggerMode::Software => self.settings.warmup_frames.max(1),
            TriggerMode::FreeRun => self.settings.warmup_frames,
        };
        let mut first = None;
        for _ in 0..frames {
            self.freeze()?;
            if first.is_none() {
                let elapsed = self.opened_at.elapsed();
                tracing::info!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "first frame since initialization"
                );
                first = Some(elapsed);
            }
        }
        Ok(first)
    }

    /// Capture one frame and save it to `path`.
    ///
    /// Succeeds only if both the freeze and the save succeed.
    pub fn capture_and_save(&mut self, path: &Path) -> Result<(), DeviceError> {
        self.ensure_configured("capture")?;
        self.state = CameraState::Capturing;
        let result = self.freeze().and_then(|()| self.save(path));
        self.state = CameraState::Idle;
        result
    }

    /// Prompt for destination names and capture one frame per name.
    ///
    /// Stops at an empty line or end of input. Returns the number of
    /// frames saved.
    pub fn run_interactive<R: BufRead>(
        &mut self,
        input: R,
        mut prompt: impl FnMut(),
    ) -> Result<usize, DeviceError> {
        let mut saved = 0;
        let mut lines = PathLines::new(input);
        loop {
            prompt();
            let path = match lines.next() {
                Some(Ok(path)) => path,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "cannot read file name; stopping");
                    break;
                }
                None => break,
            };
            if path.as_os_str().is_empty() {
                break;
            }
            self.capture_and_save(&path)?;
            saved += 1;
        }
        Ok(saved)
    }

    /// Release the camera. Safe after any earlier failure and safe to repeat.
    pub fn shutdown(&mut self) {
        if self.state != CameraState::Closed {
            tracing::info!("shutting down camera");
        }
        self.state = CameraState::Closed;
        self.session.close();
    }

    fn ensure_configured(&self, operation: &'static str) -> Result<(), DeviceError> {
        match self.state {
            CameraState::Idle | CameraState::Capturing => Ok(()),
            CameraState::Open => Err(DeviceError::NotConfigured { operation }),
            CameraState::Closed => Err(DeviceError::SessionClosed),
        }
    }

    fn freeze(&mut self) -> Result<(), DeviceError> {
        tracing::info!("freezing video");
        let buffer = &mut self.buffer;
        self.session.call("freeze video", |d, h| d.freeze(h, buffer))
    }

    fn save(&mut self, path: &Path) -> Result<(), DeviceError> {
        tracing::info!(path = %path.display(), "saving image");
        let buffer = &self.buffer;
        self.session
            .call("save image", |d, h| d.save_image(h, path, buffer))
    }
}
