//! Recording drivers for unit tests.
//!
//! Every driver call is logged by name into a shared [`Spy`]. A test can
//! script the status a named call reports, or make the status query
//! itself fail after it.

use crate::camera::{
    CameraDriver, ExposureRange, FrameBuffer, LogMode, SensorGeometry, SensorInfo, ShutterMode,
};
use crate::config::TriggerMode;
use crate::mirror::MirrorDriver;
use crate::report::StatusProbe;
use crate::session::{DeviceDriver, DeviceHandle};
use crate::threshold::BinaryFrame;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_UNIT: AtomicU32 = AtomicU32::new(1000);

/// A unit number no other test in this process uses.
pub(crate) fn unit() -> u32 {
    NEXT_UNIT.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone)]
pub(crate) struct SavedFrame {
    pub path: PathBuf,
    pub geometry: SensorGeometry,
    pub len: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct LoadedRows {
    pub first_row: u32,
    pub last_row: u32,
    pub frame: BinaryFrame,
}

struct SpyState {
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, i32>,
    blind: Vec<&'static str>,
    status: Result<i32, i32>,
    bound_len: Option<usize>,
    saves: Vec<SavedFrame>,
    loads: Vec<LoadedRows>,
}

impl Default for SpyState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            failures: HashMap::new(),
            blind: Vec::new(),
            status: Ok(0),
            bound_len: None,
            saves: Vec::new(),
            loads: Vec::new(),
        }
    }
}

/// Shared call log; clones observe the same state.
#[derive(Clone, Default)]
pub(crate) struct Spy(Rc<RefCell<SpyState>>);

impl Spy {
    pub fn calls(&self) -> Vec<&'static str> {
        self.0.borrow().calls.clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.0.borrow().calls.iter().filter(|c| **c == name).count()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().calls.clear();
    }

    /// Make every later `name` call report status `code`.
    pub fn fail_on(&self, name: &'static str, code: i32) {
        self.0.borrow_mut().failures.insert(name, code);
    }

    /// Make the status query after every later `name` call fail.
    pub fn break_status_query_on(&self, name: &'static str) {
        self.0.borrow_mut().blind.push(name);
    }

    pub fn bound_len(&self) -> Option<usize> {
        self.0.borrow().bound_len
    }

    pub fn saves(&self) -> Vec<SavedFrame> {
        self.0.borrow().saves.clone()
    }

    pub fn loads(&self) -> Vec<LoadedRows> {
        self.0.borrow().loads.clone()
    }

    fn record(&self, name: &'static str) {
        let mut state = self.0.borrow_mut();
        state.calls.push(name);
        state.status = if state.blind.contains(&name) {
            Err(-1)
        } else {
            Ok(state.failures.get(name).copied().unwrap_or(0))
        };
    }
}

impl StatusProbe for Spy {
    fn last_status(&mut self) -> Result<i32, i32> {
        self.0.borrow().status
    }

    fn status_text(&mut self, code: i32) -> Result<String, i32> {
        Ok(format!("scripted failure {code}"))
    }
}

pub(crate) struct FakeCamera {
    spy: Spy,
    width: u32,
    height: u32,
    gain: i32,
    black_level: i32,
}

impl FakeCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            spy: Spy::default(),
            width,
            height,
            gain: 0,
            black_level: 0,
        }
    }

    pub fn spy(&self) -> Spy {
        self.spy.clone()
    }
}

impl StatusProbe for FakeCamera {
    fn last_status(&mut self) -> Result<i32, i32> {
        self.spy.last_status()
    }

    fn status_text(&mut self, code: i32) -> Result<String, i32> {
        self.spy.status_text(code)
    }
}

impl DeviceDriver for FakeCamera {
    const KIND: &'static str = "fake camera";

    fn open(&mut self, unit: u32) -> DeviceHandle {
        self.spy.record("open");
        DeviceHandle::new(u64::from(unit))
    }

    fn halt(&mut self, _handle: DeviceHandle) {
        self.spy.record("halt");
    }

    fn free(&mut self, _handle: DeviceHandle) {
        self.spy.record("free");
    }
}

impl CameraDriver for FakeCamera {
    fn sensor_info(&mut self, _handle: DeviceHandle) -> SensorInfo {
        self.spy.record("sensor_info");
        SensorInfo {
            name: "fake".into(),
            max_width: self.width,
            max_height: self.height,
        }
    }

    fn bind_buffer(&mut self, _handle: DeviceHandle, buffer: &mut FrameBuffer) {
        self.spy.record("bind_buffer");
        self.spy.0.borrow_mut().bound_len = Some(buffer.as_bytes().len());
    }

    fn frame_rate(&mut self, _handle: DeviceHandle) -> f64 {
        self.spy.record("frame_rate");
        25.0
    }

    fn exposure(&mut self, _handle: DeviceHandle) -> f64 {
        self.spy.record("exposure");
        33.0
    }

    fn exposure_range(&mut self, _handle: DeviceHandle) -> ExposureRange {
        self.spy.record("exposure_range");
        ExposureRange {
            min_ms: 0.01,
            max_ms: 2000.0,
            increment_ms: 0.01,
        }
    }

    fn set_pixel_clock(&mut self, _handle: DeviceHandle, _mhz: u32) {
        self.spy.record("set_pixel_clock");
    }

    fn set_long_exposure(&mut self, _handle: DeviceHandle, _enabled: bool) {
        self.spy.record("set_long_exposure");
    }

    fn set_log_mode(&mut self, _handle: DeviceHandle, _mode: LogMode) {
        self.spy.record("set_log_mode");
    }

    fn set_shutter_mode(&mut self, _handle: DeviceHandle, _mode: ShutterMode) {
        self.spy.record("set_shutter_mode");
    }

    fn set_exposure(&mut self, _handle: DeviceHandle, _ms: f64) {
        self.spy.record("set_exposure");
    }

    fn gain(&mut self, _handle: DeviceHandle) -> i32 {
        self.spy.record("gain");
        self.gain
    }

    fn set_gain(&mut self, _handle: DeviceHandle, gain: u8) {
        self.spy.record("set_gain");
        self.gain = i32::from(gain);
    }

    fn black_level(&mut self, _handle: DeviceHandle) -> i32 {
        self.spy.record("black_level");
        self.black_level
    }

    fn set_black_level(&mut self, _handle: DeviceHandle, level: u8) {
        self.spy.record("set_black_level");
        self.black_level = i32::from(level);
    }

    fn set_trigger(&mut self, _handle: DeviceHandle, _mode: TriggerMode) {
        self.spy.record("set_trigger");
    }

    fn freeze(&mut self, _handle: DeviceHandle, buffer: &mut FrameBuffer) {
        self.spy.record("freeze");
        buffer.as_mut_bytes().fill(0x7f);
    }

    fn save_image(&mut self, _handle: DeviceHandle, path: &Path, buffer: &FrameBuffer) {
        self.spy.record("save_image");
        if self.spy.0.borrow().status == Ok(0) {
            self.spy.0.borrow_mut().saves.push(SavedFrame {
                path: path.to_path_buf(),
                geometry: buffer.geometry(),
                len: buffer.as_bytes().len(),
            });
        }
    }
}

pub(crate) struct FakeMirror {
    spy: Spy,
    dmd_code: i64,
}

impl FakeMirror {
    pub fn new(dmd_code: i64) -> Self {
        Self {
            spy: Spy::default(),
            dmd_code,
        }
    }

    pub fn spy(&self) -> Spy {
        self.spy.clone()
    }
}

impl StatusProbe for FakeMirror {
    fn last_status(&mut self) -> Result<i32, i32> {
        self.spy.last_status()
    }

    fn status_text(&mut self, code: i32) -> Result<String, i32> {
        self.spy.status_text(code)
    }
}

impl DeviceDriver for FakeMirror {
    const KIND: &'static str = "fake mirror";

    fn open(&mut self, unit: u32) -> DeviceHandle {
        self.spy.record("open");
        DeviceHandle::new(u64::from(unit))
    }

    fn halt(&mut self, _handle: DeviceHandle) {
        self.spy.record("halt");
    }

    fn free(&mut self, _handle: DeviceHandle) {
        self.spy.record("free");
    }
}

impl MirrorDriver for FakeMirror {
    fn serial_number(&mut self, _handle: DeviceHandle) -> u64 {
        self.spy.record("serial_number");
        4242
    }

    fn dmd_type(&mut self, _handle: DeviceHandle) -> i64 {
        self.spy.record("dmd_type");
        self.dmd_code
    }

    fn load_rows(
        &mut self,
        _handle: DeviceHandle,
        frame: &BinaryFrame,
        first_row: u32,
        last_row: u32,
    ) {
        self.spy.record("load_rows");
        self.spy.0.borrow_mut().loads.push(LoadedRows {
            first_row,
            last_row,
            frame: frame.clone(),
        });
    }

    fn reset(&mut self, _handle: DeviceHandle) {
        self.spy.record("reset");
    }
}
