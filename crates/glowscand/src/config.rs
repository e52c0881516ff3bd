use glowscan_core::{DetectorParams, Thresholds};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::advisor::{DEFAULT_MODEL, GEMINI_API_BASE_URL};
use crate::session::{DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS};

/// Environment variable naming an optional TOML config file.
pub const CONFIG_PATH_VAR: &str = "GLOWSCAN_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Layered as built-in defaults, then an optional TOML file named by
/// `GLOWSCAN_CONFIG`, then `GLOWSCAN_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen address.
    pub bind: String,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// OpenCV Haar cascade XML for frontal faces.
    pub cascade_path: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub detector: DetectorParams,
    pub classifier: Thresholds,
    /// JPEG quality (1-100) for streamed and published frames.
    pub jpeg_quality: u8,
    /// Number of warmup frames to discard after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Encoded chunks buffered per stream before frames are dropped.
    pub stream_buffer: usize,
    /// Generative model used for consultations.
    pub gemini_model: String,
    pub gemini_base_url: String,
    /// Timeout in seconds for one consultation request.
    pub advisor_timeout_secs: u64,
    /// Sessions unused for this many seconds are discarded.
    pub session_idle_secs: u64,
    /// Upper bound on live sessions; the least recently used is evicted past it.
    pub max_sessions: usize,
    /// Read from the environment only, never from the config file.
    #[serde(skip)]
    pub gemini_api_key: Option<String>,
    /// Read from the environment only, never from the config file.
    #[serde(skip)]
    pub admin_password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
            camera_device: "/dev/video0".to_string(),
            cascade_path: PathBuf::from(
                "/usr/share/opencv4/haarcascades/haarcascade_frontalface_default.xml",
            ),
            db_path: default_data_dir().join("glowscan.db"),
            detector: DetectorParams::default(),
            classifier: Thresholds::default(),
            jpeg_quality: 80,
            warmup_frames: 2,
            stream_buffer: 2,
            gemini_model: DEFAULT_MODEL.to_string(),
            gemini_base_url: GEMINI_API_BASE_URL.to_string(),
            advisor_timeout_secs: 30,
            session_idle_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            gemini_api_key: None,
            admin_password: None,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and `GLOWSCAN_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Toml {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply environment overrides read through `var`.
    ///
    /// Unparseable values are ignored with a warning and the previous value kept.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("GLOWSCAN_BIND") {
            self.bind = v;
        }
        if let Some(v) = var("GLOWSCAN_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("GLOWSCAN_CASCADE_PATH") {
            self.cascade_path = PathBuf::from(v);
        }
        if let Some(v) = var("GLOWSCAN_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }

        env_parse(&var, "GLOWSCAN_SCALE_FACTOR", &mut self.detector.scale_factor);
        env_parse(&var, "GLOWSCAN_MIN_NEIGHBORS", &mut self.detector.min_neighbors);
        env_parse(&var, "GLOWSCAN_MIN_FACE_SIZE", &mut self.detector.min_face_size);
        env_parse(&var, "GLOWSCAN_GLOWING_ABOVE", &mut self.classifier.glowing_above);
        env_parse(&var, "GLOWSCAN_NORMAL_ABOVE", &mut self.classifier.normal_above);
        env_parse(&var, "GLOWSCAN_DULL_ABOVE", &mut self.classifier.dull_above);
        env_parse(&var, "GLOWSCAN_JPEG_QUALITY", &mut self.jpeg_quality);
        env_parse(&var, "GLOWSCAN_WARMUP_FRAMES", &mut self.warmup_frames);
        env_parse(&var, "GLOWSCAN_STREAM_BUFFER", &mut self.stream_buffer);
        env_parse(&var, "GLOWSCAN_ADVISOR_TIMEOUT_SECS", &mut self.advisor_timeout_secs);
        env_parse(&var, "GLOWSCAN_SESSION_IDLE_SECS", &mut self.session_idle_secs);
        env_parse(&var, "GLOWSCAN_MAX_SESSIONS", &mut self.max_sessions);

        if let Some(v) = var("GLOWSCAN_GEMINI_MODEL") {
            self.gemini_model = v;
        }
        if let Some(v) = var("GLOWSCAN_GEMINI_BASE_URL") {
            self.gemini_base_url = v;
        }

        self.gemini_api_key = var("GEMINI_API_KEY").filter(|v| !v.is_empty());
        self.admin_password = var("GLOWSCAN_ADMIN_PASSWORD").filter(|v| !v.is_empty());
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("glowscan")
}

fn env_parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = var(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind, "127.0.0.1:5000");
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.detector.scale_factor, 1.3);
        assert_eq!(config.detector.min_neighbors, 5);
        assert_eq!(config.classifier, Thresholds::default());
        assert_eq!(config.jpeg_quality, 80);
        assert!(config.db_path.ends_with("glowscan/glowscan.db"));
        assert!(config.gemini_api_key.is_none());
        assert_eq!(config.gemini_model, crate::advisor::DEFAULT_MODEL);
        assert_eq!(config.gemini_base_url, crate::advisor::GEMINI_API_BASE_URL);
        assert_eq!(config.session_idle_secs, 24 * 60 * 60);
        assert_eq!(config.max_sessions, 10_000);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[
            ("GLOWSCAN_BIND", "0.0.0.0:8080"),
            ("GLOWSCAN_SCALE_FACTOR", "1.1"),
            ("GLOWSCAN_MIN_NEIGHBORS", "3"),
            ("GLOWSCAN_DULL_ABOVE", "70.5"),
            ("GEMINI_API_KEY", "secret"),
            ("GLOWSCAN_SESSION_IDLE_SECS", "600"),
        ]));
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.session_idle_secs, 600);
        assert_eq!(config.detector.scale_factor, 1.1);
        assert_eq!(config.detector.min_neighbors, 3);
        assert_eq!(config.classifier.dull_above, 70.5);
        assert_eq!(config.gemini_api_key.as_deref(), Some("secret"));
        assert!(config.admin_password.is_none());
    }

    #[test]
    fn test_bad_override_keeps_previous_value() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[
            ("GLOWSCAN_JPEG_QUALITY", "very high"),
            ("GLOWSCAN_MIN_NEIGHBORS", "-1"),
        ]));
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.detector.min_neighbors, 5);
    }

    #[test]
    fn test_empty_secret_is_unset() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[("GEMINI_API_KEY", ""), ("GLOWSCAN_ADMIN_PASSWORD", "")]));
        assert!(config.gemini_api_key.is_none());
        assert!(config.admin_password.is_none());
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glowscan.toml");
        std::fs::write(
            &path,
            r#"
camera_device = "/dev/video4"
jpeg_quality = 65

[detector]
min_neighbors = 2

[classifier]
glowing_above = 170.0
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.jpeg_quality, 65);
        assert_eq!(config.detector.min_neighbors, 2);
        assert_eq!(config.detector.scale_factor, 1.3, "unset key keeps default");
        assert_eq!(config.classifier.glowing_above, 170.0);
        assert_eq!(config.classifier.normal_above, 120.0);
        assert_eq!(config.bind, "127.0.0.1:5000");
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(Config::from_file(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "jpeg_quality = \"high\"").unwrap();
        assert!(matches!(Config::from_file(&bad), Err(ConfigError::Toml { .. })));
    }
}
