//! DMD sessions: resolve the panel, threshold images, upload them.

use crate::error::{DeviceError, OperationResult};
use crate::input::PathLines;
use crate::report::StatusPolicy;
use crate::session::{DeviceDriver, DeviceHandle, DeviceSession};
use crate::threshold::{threshold_into, BinaryFrame, Raster};
use serde::Serialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// Success code of the mirror SDK.
pub const MIRROR_SUCCESS: i32 = 0;
/// Mirror SDK status meaning the call worked but its text was truncated.
pub const MIRROR_SUCC_PARTIAL: i32 = 1;

/// Mirror pixel grid size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MirrorGeometry {
    pub width: u32,
    pub height: u32,
}

impl MirrorGeometry {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Known DMD panel types, keyed by the code the device reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DmdType {
    /// No panel answered. Treated as an emulated 1080p panel.
    Disconnected,
    Xga,
    Hd1080p095A,
    Xga07A,
    Xga055A,
    Xga055X,
    Wuxga096A,
}

impl DmdType {
    pub const ALL: [DmdType; 7] = [
        DmdType::Disconnected,
        DmdType::Xga,
        DmdType::Hd1080p095A,
        DmdType::Xga07A,
        DmdType::Xga055A,
        DmdType::Xga055X,
        DmdType::Wuxga096A,
    ];

    pub const fn code(self) -> i64 {
        match self {
            DmdType::Xga => 1,
            DmdType::Hd1080p095A => 3,
            DmdType::Xga07A => 4,
            DmdType::Xga055A => 5,
            DmdType::Xga055X => 6,
            DmdType::Wuxga096A => 7,
            DmdType::Disconnected => 255,
        }
    }

    /// Look up a device-reported type code. Codes outside the table are
    /// an error, never a default.
    pub fn from_code(code: i64) -> Result<Self, DeviceError> {
        Self::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or(DeviceError::UnknownDmdType(code))
    }

    pub const fn geometry(self) -> MirrorGeometry {
        let (width, height) = match self {
            DmdType::Disconnected | DmdType::Hd1080p095A => (1920, 1080),
            DmdType::Wuxga096A => (1920, 1200),
            DmdType::Xga | DmdType::Xga07A | DmdType::Xga055A | DmdType::Xga055X => (1024, 768),
        };
        MirrorGeometry { width, height }
    }

    pub const fn description(self) -> &'static str {
        match self {
            DmdType::Disconnected => "DMD disconnected or not recognized",
            DmdType::Xga => "XGA",
            DmdType::Hd1080p095A => "1080p .95\" Type-A",
            DmdType::Xga07A => "XGA .7\" Type-A",
            DmdType::Xga055A => "XGA .55\" Type-A",
            DmdType::Xga055X => "XGA .55\" Type-X",
            DmdType::Wuxga096A => "WUXGA .96\" Type-A",
        }
    }
}

/// Mirror SDK surface. Status of each call is read back through the
/// [`StatusProbe`](crate::report::StatusProbe) supertrait.
pub trait MirrorDriver: DeviceDriver {
    fn serial_number(&mut self, handle: DeviceHandle) -> u64;
    /// Raw panel type code.
    fn dmd_type(&mut self, handle: DeviceHandle) -> i64;
    /// Transfer rows `first_row..=last_row` of `frame`. Blocks until done.
    fn load_rows(&mut self, handle: DeviceHandle, frame: &BinaryFrame, first_row: u32, last_row: u32);
    /// Global reset: make the loaded rows visible on the mirrors.
    fn reset(&mut self, handle: DeviceHandle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    Ready,
    Uploading,
    Closed,
}

/// What the user is told while a batch waits between images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPause {
    NextImage,
    Quit,
}

/// Per-path outcomes of a batch or stream run.
#[derive(Debug, Default, Clone)]
pub struct BatchReport {
    pub entries: Vec<(PathBuf, OperationResult)>,
}

impl BatchReport {
    pub fn uploaded(&self) -> usize {
        self.entries.iter().filter(|(_, r)| r.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.entries.len() - self.uploaded()
    }
}

/// Owns a DMD session and the binary frame uploaded through it.
pub struct MirrorController<D: MirrorDriver> {
    session: DeviceSession<D>,
    frame: BinaryFrame,
    dmd_type: DmdType,
    serial: u64,
    state: MirrorState,
}

impl<D: MirrorDriver> MirrorController<D> {
    /// Open the DMD, resolve its panel geometry and allocate the frame.
    ///
    /// Any failure after the device is allocated still halts and frees it.
    pub fn initialize(driver: D, device_number: u32) -> Result<Self, DeviceError> {
        let policy = StatusPolicy::tolerating_truncation(MIRROR_SUCCESS, MIRROR_SUCC_PARTIAL);
        let mut session = DeviceSession::open(driver, device_number, policy)?;

        let serial = session.call("inquire serial number", |d, h| d.serial_number(h))?;
        tracing::info!(serial, "mirror allocated");

        let code = session.call("inquire DMD type", |d, h| d.dmd_type(h))?;
        let dmd_type = DmdType::from_code(code)?;
        let geometry = dmd_type.geometry();

        if dmd_type == DmdType::Disconnected {
            tracing::warn!(
                width = geometry.width,
                height = geometry.height,
                "DMD disconnected or not recognized; emulating 1080p"
            );
        } else {
            tracing::info!(
                dmd_type = dmd_type.description(),
                width = geometry.width,
                height = geometry.height,
                "mirror contacted"
            );
        }

        Ok(Self {
            session,
            frame: BinaryFrame::new(geometry),
            dmd_type,
            serial,
            state: MirrorState::Ready,
        })
    }

    pub fn geometry(&self) -> MirrorGeometry {
        self.frame.geometry()
    }

    pub fn dmd_type(&self) -> DmdType {
        self.dmd_type
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn state(&self) -> MirrorState {
        self.state
    }

    /// The frame most recently thresholded for upload.
    pub fn frame(&self) -> &BinaryFrame {
        &self.frame
    }

    pub fn driver(&self) -> &D {
        self.session.driver()
    }

    /// Load `path`, threshold it and show it on the mirrors.
    ///
    /// An unreadable image is recoverable: nothing reaches the device
    /// and the controller stays ready for the next path.
    pub fn upload_image(&mut self, path: &Path) -> Result<(), DeviceError> {
        let image = image::open(path).map_err(|source| DeviceError::ImageLoad {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            "image loaded"
        );
        self.upload_raster(&image)
    }

    /// Threshold `source` into the frame, upload all rows, then reset.
    pub fn upload_raster<R: Raster + ?Sized>(&mut self, source: &R) -> Result<(), DeviceError> {
        if self.state == MirrorState::Closed {
            return Err(DeviceError::SessionClosed);
        }
        self.state = MirrorState::Uploading;
        threshold_into(source, &mut self.frame);

        let result = self.write_frame();
        if self.state == MirrorState::Uploading {
            self.state = MirrorState::Ready;
        }
        result
    }

    fn write_frame(&mut self) -> Result<(), DeviceError> {
        let last_row = self.frame.geometry().height.saturating_sub(1);
        let frame = &self.frame;
        tracing::debug!(lit = frame.count_on(), last_row, "writing frame to mirror");

        self.session
            .call("load rows", |d, h| d.load_rows(h, frame, 0, last_row))?;
        self.session.call("reset", |d, h| d.reset(h))
    }

    /// Upload each path in order, pausing after every image.
    ///
    /// Unreadable images are skipped; a device fault ends the run.
    pub fn run_batch<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
        mut pause: impl FnMut(BatchPause),
    ) -> Result<BatchReport, DeviceError> {
        let mut report = BatchReport::default();
        for (i, path) in paths.iter().enumerate() {
            let path = path.as_ref();
            tracing::info!(path = %path.display(), "image");
            self.process(path, &mut report)?;
            pause(if i + 1 < paths.len() {
                BatchPause::NextImage
            } else {
                BatchPause::Quit
            });
        }
        Ok(report)
    }

    /// Upload one path per input line until end of input. Empty lines
    /// are skipped; names are taken byte for byte.
    pub fn run_stream<R: BufRead>(&mut self, input: R) -> Result<BatchReport, DeviceError> {
        let mut report = BatchReport::default();
        for path in PathLines::new(input) {
            let path = match path {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot read image path; stopping");
                    break;
                }
            };
            if path.as_os_str().is_empty() {
                continue;
            }
            self.process(&path, &mut report)?;
        }
        Ok(report)
    }

    fn process(&mut self, path: &Path, report: &mut BatchReport) -> Result<(), DeviceError> {
        let result = self.upload_image(path);
        report
            .entries
            .push((path.to_path_buf(), OperationResult::from(&result)));
        match result {
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error = %e, "skipping image");
                Ok(())
            }
            other => other,
        }
    }

    /// Halt and free the DMD. Safe to repeat.
    pub fn close(&mut self) {
        self.state = MirrorState::Closed;
        self.session.close();
    }
}
