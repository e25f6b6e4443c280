use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VeracamConfig {
    pub source: SourceConfig,
    pub detector: DetectorConfig,
    pub verify: VerifyConfig,
    pub history: HistoryConfig,
    pub system: SystemConfig,
}

/// Which way the preferred capture device faces.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    /// Front-facing (selfie) camera
    User,
    /// Rear-facing camera
    Environment,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    /// Preferred camera facing
    #[serde(default = "default_source_facing")]
    pub facing: CameraFacing,

    /// Ideal capture resolution (width, height)
    #[serde(default = "default_source_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second requested from the device
    #[serde(default = "default_source_fps")]
    pub fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectorConfig {
    /// Base URL of the inference engine
    #[serde(default = "default_detector_endpoint")]
    pub endpoint: String,

    /// Detection tick interval in milliseconds (display refresh cadence)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Raw detections at or below this confidence are discarded
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Interpolation weight toward each new observation when a class
    /// label carries over from the previous tick
    #[serde(default = "default_smoothing_factor")]
    pub smoothing_factor: f32,

    /// Per-attempt inference request timeout in seconds
    #[serde(default = "default_detector_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VerifyConfig {
    /// Base URL of the verification service
    #[serde(default = "default_verify_endpoint")]
    pub endpoint: String,

    /// Verification request timeout in seconds
    #[serde(default = "default_verify_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Agent used when the caller does not name one
    #[serde(default = "default_verify_agent")]
    pub default_agent: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    /// Emit append-history side effects for identified results
    #[serde(default = "default_history_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Grace period when joining background tasks at shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_source_facing() -> CameraFacing {
    CameraFacing::Environment
}

fn default_source_resolution() -> (u32, u32) {
    (1920, 1080)
}

fn default_source_fps() -> u32 {
    30
}

fn default_detector_endpoint() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_tick_interval_ms() -> u64 {
    33
}

fn default_confidence_threshold() -> f32 {
    0.6
}

fn default_smoothing_factor() -> f32 {
    0.2
}

fn default_detector_timeout_secs() -> u64 {
    10
}

fn default_verify_endpoint() -> String {
    "http://127.0.0.1:8600".to_string()
}

fn default_verify_timeout_secs() -> u64 {
    30
}

fn default_verify_agent() -> String {
    "general_purpose".to_string()
}

fn default_history_enabled() -> bool {
    true
}

fn default_shutdown_timeout_secs() -> u64 {
    3
}

impl VeracamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("veracam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("source.facing", "environment")?
            .set_default(
                "source.resolution",
                vec![
                    default_source_resolution().0,
                    default_source_resolution().1,
                ],
            )?
            .set_default("source.fps", default_source_fps())?
            .set_default("detector.endpoint", default_detector_endpoint())?
            .set_default("detector.tick_interval_ms", default_tick_interval_ms())?
            .set_default(
                "detector.confidence_threshold",
                default_confidence_threshold() as f64,
            )?
            .set_default(
                "detector.smoothing_factor",
                default_smoothing_factor() as f64,
            )?
            .set_default(
                "detector.request_timeout_secs",
                default_detector_timeout_secs(),
            )?
            .set_default("verify.endpoint", default_verify_endpoint())?
            .set_default(
                "verify.request_timeout_secs",
                default_verify_timeout_secs(),
            )?
            .set_default("verify.default_agent", default_verify_agent())?
            .set_default("history.enabled", default_history_enabled())?
            .set_default(
                "system.shutdown_timeout_secs",
                default_shutdown_timeout_secs(),
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with VERACAM_ prefix
            .add_source(Environment::with_prefix("VERACAM").separator("_"))
            .build()?;

        let config: VeracamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.resolution.0 == 0 || self.source.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Source resolution must be greater than 0".to_string(),
            ));
        }

        if self.source.fps == 0 {
            return Err(ConfigError::Message(
                "Source fps must be greater than 0".to_string(),
            ));
        }

        if self.detector.tick_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Detector tick_interval_ms must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(ConfigError::Message(
                "Detector confidence_threshold must be within [0, 1]".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detector.smoothing_factor)
            || self.detector.smoothing_factor == 0.0
        {
            return Err(ConfigError::Message(
                "Detector smoothing_factor must be within (0, 1]".to_string(),
            ));
        }

        if self.detector.endpoint.is_empty() {
            return Err(ConfigError::Message(
                "Detector endpoint must not be empty".to_string(),
            ));
        }

        if self.verify.endpoint.is_empty() {
            return Err(ConfigError::Message(
                "Verify endpoint must not be empty".to_string(),
            ));
        }

        if self.verify.default_agent.is_empty() {
            return Err(ConfigError::Message(
                "Verify default_agent must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for VeracamConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                facing: default_source_facing(),
                resolution: default_source_resolution(),
                fps: default_source_fps(),
            },
            detector: DetectorConfig {
                endpoint: default_detector_endpoint(),
                tick_interval_ms: default_tick_interval_ms(),
                confidence_threshold: default_confidence_threshold(),
                smoothing_factor: default_smoothing_factor(),
                request_timeout_secs: default_detector_timeout_secs(),
            },
            verify: VerifyConfig {
                endpoint: default_verify_endpoint(),
                request_timeout_secs: default_verify_timeout_secs(),
                default_agent: default_verify_agent(),
            },
            history: HistoryConfig {
                enabled: default_history_enabled(),
            },
            system: SystemConfig {
                shutdown_timeout_secs: default_shutdown_timeout_secs(),
            },
        }
    }
}
