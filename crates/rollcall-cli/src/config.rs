use rollcall_core::ChannelOrder;
use serde::Deserialize;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("attendance date must not be empty")]
    EmptyDate,
}

/// Runtime configuration: TOML file, then `ROLLCALL_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Frames to discard at startup while auto-exposure settles.
    pub warmup_frames: usize,
    /// SCRFD ONNX model file.
    pub detector_model: PathBuf,
    pub detection_threshold: f32,
    /// Directory of per-identity `.npy` sample stacks.
    pub gallery_dir: PathBuf,
    /// Attendance CSV.
    pub ledger_path: PathBuf,
    /// Neighbors consulted per classification.
    pub k: usize,
    /// Side length of the square face crop fed to the classifier.
    pub face_size: u32,
    /// Pixels added around each detected face before cropping.
    pub crop_margin: u32,
    /// Channel layout of gallery samples; `bgr` matches OpenCV captures.
    pub channel_order: ChannelOrder,
    /// Where to write the latest annotated frame, if anywhere.
    pub snapshot_path: Option<PathBuf>,
    /// Stop after this many frames; 0 runs until interrupted.
    pub max_frames: u64,
    pub enroll_samples: usize,
    /// Keep every Nth frame with a face while enrolling.
    pub enroll_stride: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            warmup_frames: 4,
            detector_model: PathBuf::from("models/det_10g.onnx"),
            detection_threshold: rollcall_core::detector::DEFAULT_CONFIDENCE_THRESHOLD,
            gallery_dir: PathBuf::from("face_dataset"),
            ledger_path: PathBuf::from("Student.csv"),
            k: rollcall_core::DEFAULT_K,
            face_size: 100,
            crop_margin: 5,
            channel_order: ChannelOrder::Bgr,
            snapshot_path: None,
            max_frames: 0,
            enroll_samples: 10,
            enroll_stride: 10,
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override fields from `ROLLCALL_*` variables resolved through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let path = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE").filter(|v| !v.is_empty()) {
            self.camera_device = v;
        }
        if let Some(v) = path("ROLLCALL_DETECTOR_MODEL") {
            self.detector_model = v;
        }
        if let Some(v) = path("ROLLCALL_GALLERY_DIR") {
            self.gallery_dir = v;
        }
        if let Some(v) = path("ROLLCALL_LEDGER_PATH") {
            self.ledger_path = v;
        }
        if let Some(v) = path("ROLLCALL_SNAPSHOT_PATH") {
            self.snapshot_path = Some(v);
        }
        env_parse(&lookup, "ROLLCALL_CAMERA_WIDTH", &mut self.camera_width);
        env_parse(&lookup, "ROLLCALL_CAMERA_HEIGHT", &mut self.camera_height);
        env_parse(&lookup, "ROLLCALL_WARMUP_FRAMES", &mut self.warmup_frames);
        env_parse(&lookup, "ROLLCALL_DETECTION_THRESHOLD", &mut self.detection_threshold);
        env_parse(&lookup, "ROLLCALL_K", &mut self.k);
        env_parse(&lookup, "ROLLCALL_FACE_SIZE", &mut self.face_size);
        env_parse(&lookup, "ROLLCALL_CROP_MARGIN", &mut self.crop_margin);
        env_parse(&lookup, "ROLLCALL_CHANNEL_ORDER", &mut self.channel_order);
        env_parse(&lookup, "ROLLCALL_MAX_FRAMES", &mut self.max_frames);
        env_parse(&lookup, "ROLLCALL_ENROLL_SAMPLES", &mut self.enroll_samples);
        env_parse(&lookup, "ROLLCALL_ENROLL_STRIDE", &mut self.enroll_stride);
    }
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}

/// Ask the operator for the session date. An empty answer means `today`.
pub fn prompt_date(
    mut input: impl BufRead,
    mut output: impl Write,
    today: &str,
) -> std::io::Result<String> {
    write!(output, "Enter today's date [{today}]: ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let answer = line.trim();
    Ok(if answer.is_empty() { today.to_string() } else { answer.to_string() })
}

/// Trim a date supplied on the command line, rejecting a blank one.
pub fn check_date(date: &str) -> Result<&str, ConfigError> {
    let date = date.trim();
    if date.is_empty() {
        return Err(ConfigError::EmptyDate);
    }
    Ok(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.k, 5);
        assert_eq!(config.face_size, 100);
        assert_eq!(config.crop_margin, 5);
        assert_eq!(config.ledger_path, PathBuf::from("Student.csv"));
        assert!(config.snapshot_path.is_none());
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(
            &path,
            "gallery_dir = \"/srv/faces\"\nk = 3\nsnapshot_path = \"/tmp/last.png\"\n",
        )
        .unwrap();

        let config: Config = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(config.gallery_dir, PathBuf::from("/srv/faces"));
        assert_eq!(config.k, 3);
        assert_eq!(config.snapshot_path, Some(PathBuf::from("/tmp/last.png")));
        assert_eq!(config.face_size, 100);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "gallery = \"typo\"\n").unwrap();
        assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.toml");
        assert!(matches!(Config::load(Some(&missing)), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ROLLCALL_K", "7"),
            ("ROLLCALL_LEDGER_PATH", "/data/att.csv"),
            ("ROLLCALL_CAMERA_DEVICE", "/dev/video4"),
            ("ROLLCALL_FACE_SIZE", "not-a-number"),
            ("ROLLCALL_GALLERY_DIR", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.k, 7);
        assert_eq!(config.ledger_path, PathBuf::from("/data/att.csv"));
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.face_size, 100);
        assert_eq!(config.gallery_dir, PathBuf::from("face_dataset"));
    }

    #[test]
    fn test_prompt_date_answer() {
        let mut out = Vec::new();
        let date = prompt_date(&b"  2024-03-05 \n"[..], &mut out, "2026-01-01").unwrap();
        assert_eq!(date, "2024-03-05");
        assert_eq!(String::from_utf8(out).unwrap(), "Enter today's date [2026-01-01]: ");
    }

    #[test]
    fn test_check_date() {
        assert_eq!(check_date(" 2024-03-05 ").unwrap(), "2024-03-05");
        assert!(matches!(check_date(""), Err(ConfigError::EmptyDate)));
        assert!(matches!(check_date("   "), Err(ConfigError::EmptyDate)));
    }

    #[test]
    fn test_channel_order_setting() {
        assert_eq!(Config::default().channel_order, ChannelOrder::Bgr);
        let config: Config = toml::from_str("channel_order = \"rgb\"\n").unwrap();
        assert_eq!(config.channel_order, ChannelOrder::Rgb);

        let mut config = Config::default();
        config.apply_env(|key| (key == "ROLLCALL_CHANNEL_ORDER").then(|| "RGB".to_string()));
        assert_eq!(config.channel_order, ChannelOrder::Rgb);
    }

    #[test]
    fn test_prompt_date_empty_uses_today() {
        let date = prompt_date(&b"\n"[..], std::io::sink(), "2026-01-01").unwrap();
        assert_eq!(date, "2026-01-01");
        let date = prompt_date(&b""[..], std::io::sink(), "2026-01-01").unwrap();
        assert_eq!(date, "2026-01-01");
    }
}
