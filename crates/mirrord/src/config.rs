use mirror_core::{DuplicatePolicy, RecognitionConfig, RecognitionOptions};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Recognition(#[from] mirror_core::ConfigError),
    #[error("no embedder command configured (set MIRROR_EMBEDDER or `embedder` in the config file)")]
    NoEmbedder,
}

/// Which D-Bus bus the control interface is published on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Session,
    System,
}

/// Daemon configuration: optional TOML file, overridden by `MIRROR_*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory of `<identity>.json` reference encodings.
    pub gallery_dir: PathBuf,
    pub duplicate_policy: DuplicatePolicy,
    /// Embedder helper: program followed by its fixed arguments.
    pub embedder: Vec<String>,
    /// Optional JSON-lines file receiving every emitted event.
    pub event_log: Option<PathBuf>,
    /// Frames discarded after opening the camera (exposure settling).
    pub warmup_frames: usize,
    pub bus: BusKind,
    pub recognition: RecognitionOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_width: 640,
            capture_height: 480,
            gallery_dir: data_dir().join("gallery"),
            duplicate_policy: DuplicatePolicy::Reject,
            embedder: Vec::new(),
            event_log: None,
            warmup_frames: 4,
            bus: BusKind::Session,
            recognition: RecognitionOptions::default(),
        }
    }
}

impl Config {
    /// Load from `MIRROR_CONFIG` (or the default config path, if present)
    /// and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("MIRROR_CONFIG").ok().map(PathBuf::from);
        let path = explicit.clone().unwrap_or_else(default_config_path);

        let file = if explicit.is_some() || path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            tracing::info!(path = %path.display(), "loaded config file");
            Some((path, raw))
        } else {
            None
        };

        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Build a config from optional `(path, toml)` contents and an
    /// environment lookup.
    pub fn from_sources<F>(file: Option<(PathBuf, String)>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match file {
            Some((path, raw)) => {
                toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?
            }
            None => Self::default(),
        };

        if let Some(v) = env("MIRROR_CAMERA_DEVICE") {
            config.camera_device = v;
        }
        if let Some(v) = env("MIRROR_GALLERY_DIR") {
            config.gallery_dir = PathBuf::from(v);
        }
        if let Some(v) = env("MIRROR_EMBEDDER") {
            config.embedder = v.split_whitespace().map(str::to_owned).collect();
        }
        if let Some(v) = env("MIRROR_EVENT_LOG") {
            config.event_log = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = env("MIRROR_BUS") {
            match v.as_str() {
                "session" => config.bus = BusKind::Session,
                "system" => config.bus = BusKind::System,
                other => tracing::warn!(value = other, "ignoring unknown MIRROR_BUS"),
            }
        }
        override_parsed(&env, "MIRROR_DUPLICATE_POLICY", &mut config.duplicate_policy);
        override_parsed(&env, "MIRROR_WARMUP_FRAMES", &mut config.warmup_frames);
        override_parsed(&env, "MIRROR_THRESHOLD", &mut config.recognition.threshold);
        override_parsed(&env, "MIRROR_COOLDOWN_SECS", &mut config.recognition.cooldown_seconds);
        override_parsed(&env, "MIRROR_DOWNSAMPLE_FACTOR", &mut config.recognition.downsample_factor);

        Ok(config)
    }

    /// Validated recognition tuning.
    pub fn recognition(&self) -> Result<RecognitionConfig, ConfigError> {
        Ok(RecognitionConfig::try_from(self.recognition.clone())?)
    }

    /// Embedder program and its fixed arguments.
    pub fn embedder_command(&self) -> Result<(&str, &[String]), ConfigError> {
        let (program, args) = self.embedder.split_first().ok_or(ConfigError::NoEmbedder)?;
        Ok((program.as_str(), args))
    }
}

/// Overwrite `slot` with the parsed value of `key`, keeping it on parse failure.
fn override_parsed<F, T>(env: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = env(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable override"),
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("smart-mirror")
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("smart-mirror")
        .join("mirrord.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(None, env_of(&[])).unwrap();
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.warmup_frames, 4);
        assert_eq!(config.bus, BusKind::Session);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.recognition().unwrap(), RecognitionConfig::default());
        assert!(matches!(config.embedder_command(), Err(ConfigError::NoEmbedder)));
    }

    #[test]
    fn test_toml_file() {
        let raw = r#"
            camera_device = "/dev/video2"
            gallery_dir = "/srv/mirror/gallery"
            duplicate_policy = "keep-last"
            embedder = ["python3", "/opt/mirror/embed_faces.py"]
            bus = "system"

            [recognition]
            threshold = 0.5
            cooldown_seconds = 30.0
        "#;
        let config =
            Config::from_sources(Some(("mirrord.toml".into(), raw.to_string())), env_of(&[]))
                .unwrap();
        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.gallery_dir, PathBuf::from("/srv/mirror/gallery"));
        assert_eq!(config.duplicate_policy, DuplicatePolicy::KeepLast);
        assert_eq!(config.bus, BusKind::System);

        let (program, args) = config.embedder_command().unwrap();
        assert_eq!(program, "python3");
        assert_eq!(args, ["/opt/mirror/embed_faces.py".to_string()]);

        let recognition = config.recognition().unwrap();
        assert_eq!(recognition.threshold(), 0.5);
        assert_eq!(recognition.cooldown(), Duration::from_secs(30));
        assert_eq!(recognition.downsample_factor(), 0.25);
    }

    #[test]
    fn test_env_overrides_file() {
        let raw = "camera_device = \"/dev/video2\"\n[recognition]\nthreshold = 0.5\n";
        let env = env_of(&[
            ("MIRROR_CAMERA_DEVICE", "/dev/video4"),
            ("MIRROR_THRESHOLD", "0.45"),
            ("MIRROR_DOWNSAMPLE_FACTOR", "0.5"),
            ("MIRROR_EMBEDDER", "embed-faces --model small"),
            ("MIRROR_DUPLICATE_POLICY", "keep-first"),
            ("MIRROR_EVENT_LOG", "/var/log/mirror/events.jsonl"),
        ]);
        let config =
            Config::from_sources(Some(("mirrord.toml".into(), raw.to_string())), env).unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.recognition.threshold, 0.45);
        assert_eq!(config.recognition.downsample_factor, 0.5);
        assert_eq!(config.embedder, vec!["embed-faces", "--model", "small"]);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::KeepFirst);
        assert_eq!(
            config.event_log,
            Some(PathBuf::from("/var/log/mirror/events.jsonl"))
        );
    }

    #[test]
    fn test_bad_override_is_ignored() {
        let env = env_of(&[("MIRROR_THRESHOLD", "strict"), ("MIRROR_WARMUP_FRAMES", "-3")]);
        let config = Config::from_sources(None, env).unwrap();
        assert_eq!(config.recognition.threshold, 0.6);
        assert_eq!(config.warmup_frames, 4);
    }

    #[test]
    fn test_invalid_recognition_values_rejected() {
        let env = env_of(&[("MIRROR_DOWNSAMPLE_FACTOR", "2.0")]);
        let config = Config::from_sources(None, env).unwrap();
        assert!(matches!(
            config.recognition(),
            Err(ConfigError::Recognition(
                mirror_core::ConfigError::InvalidDownsampleFactor(_)
            ))
        ));
    }

    #[test]
    fn test_bad_toml_reports_path() {
        let err = Config::from_sources(
            Some(("broken.toml".into(), "threshold = [".to_string())),
            env_of(&[]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
