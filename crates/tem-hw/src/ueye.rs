//! IDS uEye camera driver over the vendor C API.
//!
//! Built only with the `ueye` feature; links `ueye_api` (`uEye_api_64`
//! on Windows). Every wrapper stores the call's return code;
//! [`StatusProbe::last_status`] asks `is_GetError` for the API's own error
//! number and falls back to that stored code.

use crate::camera::{CameraDriver, ExposureRange, FrameBuffer, LogMode, SensorInfo, ShutterMode};
use crate::config::TriggerMode;
use crate::report::StatusProbe;
use crate::session::{DeviceDriver, DeviceHandle};
use std::ffi::CStr;
use std::path::Path;
use std::ptr;

type Hids = u32;

const IS_SUCCESS: libc::c_int = 0;
const IS_NO_SUCCESS: libc::c_int = -1;
const IS_WAIT: libc::c_int = 1;
const IS_FORCE_VIDEO_STOP: libc::c_int = 0x4000;
const IS_IGNORE_PARAMETER: libc::c_int = -1;

const IS_GET_FRAMERATE: libc::c_int = 0x8000;
const IS_GET_MASTER_GAIN: libc::c_int = 0x8000;

const IS_SET_TRIGGER_OFF: libc::c_int = 0;
const IS_SET_TRIGGER_SOFTWARE: libc::c_int = 0x1008;

// is_Exposure commands
const IS_EXPOSURE_CMD_GET_EXPOSURE: libc::c_uint = 3;
const IS_EXPOSURE_CMD_GET_EXPOSURE_RANGE: libc::c_uint = 7;
const IS_EXPOSURE_CMD_SET_EXPOSURE: libc::c_uint = 12;
const IS_EXPOSURE_CMD_SET_LONG_EXPOSURE_ENABLE: libc::c_uint = 18;

const IS_PIXELCLOCK_CMD_SET: libc::c_uint = 6;

const IS_BLACKLEVEL_CMD_GET_OFFSET: libc::c_uint = 7;
const IS_BLACKLEVEL_CMD_SET_OFFSET: libc::c_uint = 8;

// is_DeviceFeature commands and values
const IS_DEVICE_FEATURE_CMD_SET_SHUTTER_MODE: libc::c_uint = 6;
const IS_DEVICE_FEATURE_CMD_SET_LOG_MODE: libc::c_uint = 13;
const IS_DEVICE_FEATURE_CAP_SHUTTER_MODE_ROLLING: libc::c_uint = 0x1;
const IS_DEVICE_FEATURE_CAP_SHUTTER_MODE_GLOBAL: libc::c_uint = 0x2;
const IS_LOG_MODE_FACTORY_DEFAULT: libc::c_uint = 0;
const IS_LOG_MODE_OFF: libc::c_uint = 1;
const IS_LOG_MODE_MANUAL: libc::c_uint = 2;

const IS_IMAGE_FILE_CMD_SAVE: libc::c_uint = 2;
const IS_IMG_PNG: libc::c_uint = 2;

/// Mirrors `SENSORINFO` from uEye.h.
#[repr(C)]
#[allow(dead_code)]
struct SensorInfoRaw {
    sensor_id: u16,
    sensor_name: [libc::c_char; 32],
    color_mode: libc::c_char,
    max_width: u32,
    max_height: u32,
    master_gain: libc::c_int,
    red_gain: libc::c_int,
    green_gain: libc::c_int,
    blue_gain: libc::c_int,
    global_shutter: libc::c_int,
    pixel_size: u16,
    upper_left_bayer_pixel: libc::c_char,
    reserved: [libc::c_char; 13],
}

/// Mirrors `IMAGE_FILE_PARAMS` from uEye.h.
#[repr(C)]
struct ImageFileParams {
    file_name: *const libc::wchar_t,
    file_type: libc::c_uint,
    quality: libc::c_uint,
    image_mem: *mut *mut libc::c_char,
    image_id: *mut libc::c_uint,
    reserved: [u8; 32],
}

#[cfg_attr(windows, link(name = "uEye_api_64"))]
#[cfg_attr(not(windows), link(name = "ueye_api"))]
extern "system" {
    fn is_InitCamera(cam: *mut Hids, hwnd: *mut libc::c_void) -> libc::c_int;
    fn is_ExitCamera(cam: Hids) -> libc::c_int;
    fn is_StopLiveVideo(cam: Hids, wait: libc::c_int) -> libc::c_int;
    fn is_GetError(cam: Hids, err: *mut libc::c_int, text: *mut *mut libc::c_char) -> libc::c_int;
    fn is_GetSensorInfo(cam: Hids, info: *mut SensorInfoRaw) -> libc::c_int;
    fn is_SetAllocatedImageMem(
        cam: Hids,
        width: libc::c_int,
        height: libc::c_int,
        bits_per_pixel: libc::c_int,
        mem: *mut libc::c_char,
        id: *mut libc::c_int,
    ) -> libc::c_int;
    fn is_SetImageMem(cam: Hids, mem: *mut libc::c_char, id: libc::c_int) -> libc::c_int;
    fn is_FreeImageMem(cam: Hids, mem: *mut libc::c_char, id: libc::c_int) -> libc::c_int;
    fn is_SetFrameRate(cam: Hids, fps: f64, new_fps: *mut f64) -> libc::c_int;
    fn is_Exposure(
        cam: Hids,
        command: libc::c_uint,
        param: *mut libc::c_void,
        size: libc::c_uint,
    ) -> libc::c_int;
    fn is_PixelClock(
        cam: Hids,
        command: libc::c_uint,
        param: *mut libc::c_void,
        size: libc::c_uint,
    ) -> libc::c_int;
    fn is_DeviceFeature(
        cam: Hids,
        command: libc::c_uint,
        param: *mut libc::c_void,
        size: libc::c_uint,
    ) -> libc::c_int;
    fn is_SetHardwareGain(
        cam: Hids,
        master: libc::c_int,
        red: libc::c_int,
        green: libc::c_int,
        blue: libc::c_int,
    ) -> libc::c_int;
    fn is_Blacklevel(
        cam: Hids,
        command: libc::c_uint,
        param: *mut libc::c_void,
        size: libc::c_uint,
    ) -> libc::c_int;
    fn is_SetExternalTrigger(cam: Hids, mode: libc::c_int) -> libc::c_int;
    fn is_FreezeVideo(cam: Hids, wait: libc::c_int) -> libc::c_int;
    fn is_ImageFile(
        cam: Hids,
        command: libc::c_uint,
        param: *mut libc::c_void,
        size: libc::c_uint,
    ) -> libc::c_int;
}

fn size_of_val<T>(_: &T) -> libc::c_uint {
    std::mem::size_of::<T>() as libc::c_uint
}

fn sensor_name(raw: &SensorInfoRaw) -> String {
    let name: Vec<u8> = raw
        .sensor_name
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&name).into_owned()
}

/// NUL-terminated wide string for `IMAGE_FILE_PARAMS`.
fn wide_path(path: &Path) -> Vec<libc::wchar_t> {
    let text = path.to_string_lossy();
    #[cfg(windows)]
    let wide: Vec<libc::wchar_t> = text.encode_utf16().collect();
    #[cfg(not(windows))]
    let wide: Vec<libc::wchar_t> = text.chars().map(|c| c as libc::wchar_t).collect();
    wide.into_iter().chain(std::iter::once(0)).collect()
}

/// A camera opened through the uEye API.
pub struct UeyeCamera {
    cam: Hids,
    status: libc::c_int,
    memory: Option<(*mut libc::c_char, libc::c_int)>,
}

impl Default for UeyeCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl UeyeCamera {
    pub fn new() -> Self {
        Self {
            cam: 0,
            status: IS_SUCCESS,
            memory: None,
        }
    }
}

/// Picks the status of the last call from the `is_GetError` query.
///
/// A failed query is `Err` with the query's return code. A successful call
/// is reported as success even when the API still holds an older error.
fn reconcile_status(query_rc: i32, api_error: i32, call_rc: i32) -> Result<i32, i32> {
    if query_rc != IS_SUCCESS {
        return Err(query_rc);
    }
    if call_rc == IS_SUCCESS || api_error == IS_SUCCESS {
        Ok(call_rc)
    } else {
        Ok(api_error)
    }
}

impl StatusProbe for UeyeCamera {
    fn last_status(&mut self) -> Result<i32, i32> {
        let mut err: libc::c_int = IS_SUCCESS;
        let mut text: *mut libc::c_char = ptr::null_mut();
        // SAFETY: both out-pointers refer to live locals.
        let rc = unsafe { is_GetError(self.cam, &mut err, &mut text) };
        reconcile_status(rc, err, self.status)
    }

    fn status_text(&mut self, code: i32) -> Result<String, i32> {
        let mut err: libc::c_int = 0;
        let mut text: *mut libc::c_char = ptr::null_mut();
        // SAFETY: both out-pointers refer to live locals.
        let rc = unsafe { is_GetError(self.cam, &mut err, &mut text) };
        if rc != IS_SUCCESS || text.is_null() {
            return Err(rc);
        }
        // SAFETY: the API returns a NUL-terminated string it owns.
        let message = unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned();
        if err == code {
            Ok(message)
        } else {
            Ok(format!("{message} (last API error {err})"))
        }
    }
}

impl DeviceDriver for UeyeCamera {
    const KIND: &'static str = "camera";

    fn open(&mut self, unit: u32) -> DeviceHandle {
        self.cam = unit;
        // SAFETY: `self.cam` is a live out-pointer; no window handle is used.
        self.status = unsafe { is_InitCamera(&mut self.cam, ptr::null_mut()) };
        DeviceHandle::new(u64::from(self.cam))
    }

    fn halt(&mut self, _handle: DeviceHandle) {
        // SAFETY: plain value arguments.
        self.status = unsafe { is_StopLiveVideo(self.cam, IS_FORCE_VIDEO_STOP) };
    }

    fn free(&mut self, _handle: DeviceHandle) {
        if let Some((mem, id)) = self.memory.take() {
            // SAFETY: `mem`/`id` came from is_SetAllocatedImageMem on this camera.
            let rc = unsafe { is_FreeImageMem(self.cam, mem, id) };
            if rc != IS_SUCCESS {
                tracing::warn!(code = rc, "cannot release image memory");
            }
        }
        // SAFETY: plain value argument.
        self.status = unsafe { is_ExitCamera(self.cam) };
    }
}

impl CameraDriver for UeyeCamera {
    fn sensor_info(&mut self, _handle: DeviceHandle) -> SensorInfo {
        // SAFETY: SENSORINFO is plain data; zero is a valid bit pattern.
        let mut raw: SensorInfoRaw = unsafe { std::mem::zeroed() };
        // SAFETY: `raw` is a live, correctly laid out SENSORINFO.
        self.status = unsafe { is_GetSensorInfo(self.cam, &mut raw) };
        SensorInfo {
            name: sensor_name(&raw),
            max_width: raw.max_width,
            max_height: raw.max_height,
        }
    }

    fn bind_buffer(&mut self, _handle: DeviceHandle, buffer: &mut FrameBuffer) {
        let g = buffer.geometry();
        let mem = buffer.as_mut_bytes().as_mut_ptr().cast::<libc::c_char>();
        let mut id: libc::c_int = 0;
        // SAFETY: `mem` spans width * height * bytes_per_pixel bytes and
        // outlives the camera, which is freed before the buffer drops.
        self.status = unsafe {
            is_SetAllocatedImageMem(
                self.cam,
                g.width as libc::c_int,
                g.height as libc::c_int,
                g.bits_per_pixel as libc::c_int,
                mem,
                &mut id,
            )
        };
        if self.status != IS_SUCCESS {
            return;
        }
        self.memory = Some((mem, id));
        // SAFETY: `mem`/`id` were just registered with this camera.
        self.status = unsafe { is_SetImageMem(self.cam, mem, id) };
    }

    fn frame_rate(&mut self, _handle: DeviceHandle) -> f64 {
        let mut fps = 0.0;
        // SAFETY: `fps` is a live out-pointer.
        self.status = unsafe { is_SetFrameRate(self.cam, f64::from(IS_GET_FRAMERATE), &mut fps) };
        fps
    }

    fn exposure(&mut self, _handle: DeviceHandle) -> f64 {
        let mut ms = 0.0f64;
        // SAFETY: the command reads one double into `ms`.
        self.status = unsafe {
            is_Exposure(
                self.cam,
                IS_EXPOSURE_CMD_GET_EXPOSURE,
                ptr::addr_of_mut!(ms).cast(),
                size_of_val(&ms),
            )
        };
        ms
    }

    fn exposure_range(&mut self, _handle: DeviceHandle) -> ExposureRange {
        let mut range = [0.0f64; 3];
        // SAFETY: the command writes min, max and increment into `range`.
        self.status = unsafe {
            is_Exposure(
                self.cam,
                IS_EXPOSURE_CMD_GET_EXPOSURE_RANGE,
                range.as_mut_ptr().cast(),
                size_of_val(&range),
            )
        };
        ExposureRange {
            min_ms: range[0],
            max_ms: range[1],
            increment_ms: range[2],
        }
    }

    fn set_pixel_clock(&mut self, _handle: DeviceHandle, mhz: u32) {
        let mut value: libc::c_uint = mhz;
        // SAFETY: the command reads one UINT from `value`.
        self.status = unsafe {
            is_PixelClock(
                self.cam,
                IS_PIXELCLOCK_CMD_SET,
                ptr::addr_of_mut!(value).cast(),
                size_of_val(&value),
            )
        };
    }

    fn set_long_exposure(&mut self, _handle: DeviceHandle, enabled: bool) {
        let mut value: libc::c_uint = enabled.into();
        // SAFETY: the command reads one UINT from `value`.
        self.status = unsafe {
            is_Exposure(
                self.cam,
                IS_EXPOSURE_CMD_SET_LONG_EXPOSURE_ENABLE,
                ptr::addr_of_mut!(value).cast(),
                size_of_val(&value),
            )
        };
    }

    fn set_log_mode(&mut self, _handle: DeviceHandle, mode: LogMode) {
        let mut value = match mode {
            LogMode::FactoryDefault => IS_LOG_MODE_FACTORY_DEFAULT,
            LogMode::Off => IS_LOG_MODE_OFF,
            LogMode::Manual => IS_LOG_MODE_MANUAL,
        };
        // SAFETY: the command reads one UINT from `value`.
        self.status = unsafe {
            is_DeviceFeature(
                self.cam,
                IS_DEVICE_FEATURE_CMD_SET_LOG_MODE,
                ptr::addr_of_mut!(value).cast(),
                size_of_val(&value),
            )
        };
    }

    fn set_shutter_mode(&mut self, _handle: DeviceHandle, mode: ShutterMode) {
        let mut value = match mode {
            ShutterMode::Rolling => IS_DEVICE_FEATURE_CAP_SHUTTER_MODE_ROLLING,
            ShutterMode::Global => IS_DEVICE_FEATURE_CAP_SHUTTER_MODE_GLOBAL,
        };
        // SAFETY: the command reads one UINT from `value`.
        self.status = unsafe {
            is_DeviceFeature(
                self.cam,
                IS_DEVICE_FEATURE_CMD_SET_SHUTTER_MODE,
                ptr::addr_of_mut!(value).cast(),
                size_of_val(&value),
            )
        };
    }

    fn set_exposure(&mut self, _handle: DeviceHandle, ms: f64) {
        let mut value = ms;
        // SAFETY: the command reads one double from `value` and writes
        // back the exposure actually set.
        self.status = unsafe {
            is_Exposure(
                self.cam,
                IS_EXPOSURE_CMD_SET_EXPOSURE,
                ptr::addr_of_mut!(value).cast(),
                size_of_val(&value),
            )
        };
        if self.status == IS_SUCCESS && value != ms {
            tracing::debug!(requested_ms = ms, actual_ms = value, "exposure rounded by device");
        }
    }

    fn gain(&mut self, _handle: DeviceHandle) -> i32 {
        // SAFETY: plain value arguments.
        let gain = unsafe {
            is_SetHardwareGain(
                self.cam,
                IS_GET_MASTER_GAIN,
                IS_IGNORE_PARAMETER,
                IS_IGNORE_PARAMETER,
                IS_IGNORE_PARAMETER,
            )
        };
        // The query returns the gain itself; negative values are errors.
        self.status = if gain < 0 { gain } else { IS_SUCCESS };
        gain
    }

    fn set_gain(&mut self, _handle: DeviceHandle, gain: u8) {
        // SAFETY: plain value arguments.
        self.status = unsafe {
            is_SetHardwareGain(
                self.cam,
                libc::c_int::from(gain),
                IS_IGNORE_PARAMETER,
                IS_IGNORE_PARAMETER,
                IS_IGNORE_PARAMETER,
            )
        };
    }

    fn black_level(&mut self, _handle: DeviceHandle) -> i32 {
        let mut level: libc::c_int = 0;
        // SAFETY: the command writes one INT into `level`.
        self.status = unsafe {
            is_Blacklevel(
                self.cam,
                IS_BLACKLEVEL_CMD_GET_OFFSET,
                ptr::addr_of_mut!(level).cast(),
                size_of_val(&level),
            )
        };
        level
    }

    fn set_black_level(&mut self, _handle: DeviceHandle, level: u8) {
        let mut value = libc::c_int::from(level);
        // SAFETY: the command reads one INT from `value`.
        self.status = unsafe {
            is_Blacklevel(
                self.cam,
                IS_BLACKLEVEL_CMD_SET_OFFSET,
                ptr::addr_of_mut!(value).cast(),
                size_of_val(&value),
            )
        };
    }

    fn set_trigger(&mut self, _handle: DeviceHandle, mode: TriggerMode) {
        let value = match mode {
            TriggerMode::FreeRun => IS_SET_TRIGGER_OFF,
            TriggerMode::Software => IS_SET_TRIGGER_SOFTWARE,
        };
        // SAFETY: plain value arguments.
        self.status = unsafe { is_SetExternalTrigger(self.cam, value) };
    }

    fn freeze(&mut self, _handle: DeviceHandle, _buffer: &mut FrameBuffer) {
        if self.memory.is_none() {
            self.status = IS_NO_SUCCESS;
            return;
        }
        // SAFETY: the bound buffer is borrowed mutably for this call.
        self.status = unsafe { is_FreezeVideo(self.cam, IS_WAIT) };
    }

    fn save_image(&mut self, _handle: DeviceHandle, path: &Path, _buffer: &FrameBuffer) {
        let name = wide_path(path);
        let mut params = ImageFileParams {
            file_name: name.as_ptr(),
            file_type: IS_IMG_PNG,
            quality: 100,
            // Null selects the active image memory.
            image_mem: ptr::null_mut(),
            image_id: ptr::null_mut(),
            reserved: [0; 32],
        };
        // SAFETY: `params` and the file name it points to outlive the call.
        self.status = unsafe {
            is_ImageFile(
                self.cam,
                IS_IMAGE_FILE_CMD_SAVE,
                ptr::addr_of_mut!(params).cast(),
                size_of_val(&params),
            )
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_status_query_is_error() {
        assert_eq!(reconcile_status(IS_NO_SUCCESS, 0, IS_SUCCESS), Err(IS_NO_SUCCESS));
        assert_eq!(reconcile_status(IS_NO_SUCCESS, 125, 125), Err(IS_NO_SUCCESS));
    }

    #[test]
    fn test_api_error_number_preferred_after_failed_call() {
        assert_eq!(reconcile_status(IS_SUCCESS, 125, IS_NO_SUCCESS), Ok(125));
    }

    #[test]
    fn test_call_code_used_when_api_has_no_error() {
        assert_eq!(reconcile_status(IS_SUCCESS, IS_SUCCESS, 3), Ok(3));
    }

    #[test]
    fn test_stale_api_error_ignored_after_success() {
        assert_eq!(reconcile_status(IS_SUCCESS, 125, IS_SUCCESS), Ok(IS_SUCCESS));
    }

    #[test]
    fn test_wide_path_is_nul_terminated() {
        let wide = wide_path(Path::new("a.png"));
        assert_eq!(wide.len(), 6);
        assert_eq!(wide[0], 'a' as libc::wchar_t);
        assert_eq!(wide[5], 0);
    }

    #[test]
    fn test_sensor_name_stops_at_nul() {
        // SAFETY: SENSORINFO is plain data.
        let mut raw: SensorInfoRaw = unsafe { std::mem::zeroed() };
        for (dst, src) in raw.sensor_name.iter_mut().zip(b"UI324xCP-M") {
            *dst = *src as libc::c_char;
        }
        assert_eq!(sensor_name(&raw), "UI324xCP-M");
    }
}
