use tem_hw::mirror::DmdType;
use tem_hw::CameraSettings;

/// Device settings loaded from `TEM_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Camera unit passed to device open (default: 1).
    pub camera_id: u32,
    /// Pixel clock applied before any other setting (default: 10 MHz).
    pub pixel_clock_mhz: u32,
    /// Frames frozen and discarded after configuration.
    pub warmup_frames: usize,
    /// DMD device number (default: 0).
    pub mirror_device: u32,
    /// Panel type code the emulated mirror reports.
    pub emulated_dmd_type: i64,
}

impl Config {
    /// Load configuration from `TEM_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = CameraSettings::default();
        Self {
            camera_id: parse_or(&lookup, "TEM_CAMERA_ID", defaults.camera_id),
            pixel_clock_mhz: parse_or(&lookup, "TEM_PIXEL_CLOCK_MHZ", defaults.pixel_clock_mhz),
            warmup_frames: parse_or(&lookup, "TEM_WARMUP_FRAMES", defaults.warmup_frames),
            mirror_device: parse_or(&lookup, "TEM_MIRROR_DEVICE", 0),
            emulated_dmd_type: parse_or(
                &lookup,
                "TEM_EMULATED_DMD_TYPE",
                DmdType::Disconnected.code(),
            ),
        }
    }

    pub fn camera_settings(&self) -> CameraSettings {
        CameraSettings {
            camera_id: self.camera_id,
            pixel_clock_mhz: self.pixel_clock_mhz,
            warmup_frames: self.warmup_frames,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable setting");
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]);
        assert_eq!(config.camera_id, 1);
        assert_eq!(config.pixel_clock_mhz, 10);
        assert_eq!(config.warmup_frames, 0);
        assert_eq!(config.mirror_device, 0);
        assert_eq!(config.emulated_dmd_type, DmdType::Disconnected.code());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("TEM_CAMERA_ID", "3"),
            ("TEM_PIXEL_CLOCK_MHZ", " 24 "),
            ("TEM_WARMUP_FRAMES", "1"),
            ("TEM_MIRROR_DEVICE", "2"),
            ("TEM_EMULATED_DMD_TYPE", "7"),
        ]);
        assert_eq!(config.camera_id, 3);
        assert_eq!(config.pixel_clock_mhz, 24);
        assert_eq!(config.warmup_frames, 1);
        assert_eq!(config.mirror_device, 2);
        assert_eq!(config.emulated_dmd_type, 7);
    }

    #[test]
    fn test_unparsable_value_falls_back() {
        let config = load(&[("TEM_CAMERA_ID", "first"), ("TEM_WARMUP_FRAMES", "-1")]);
        assert_eq!(config.camera_id, 1);
        assert_eq!(config.warmup_frames, 0);
    }

    #[test]
    fn test_camera_settings() {
        let settings = load(&[("TEM_CAMERA_ID", "5")]).camera_settings();
        assert_eq!(settings.camera_id, 5);
        assert_eq!(settings.pixel_clock_mhz, 10);
    }
}
