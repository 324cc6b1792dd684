use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SentrycamConfig {
    pub source: SourceConfig,
    pub recording: RecordingConfig,
    pub classifier: ClassifierConfig,
    pub notify: NotifyConfig,
    pub retention: RetentionConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    /// Frame source URL (e.g. an IP webcam MJPEG endpoint)
    #[serde(default = "default_source_url")]
    pub url: String,

    /// Delay between reconnect/read-retry attempts in seconds
    #[serde(default = "default_reconnect_delay_seconds")]
    pub reconnect_delay_seconds: u64,

    /// Transient read failures tolerated before a full reconnect
    #[serde(default = "default_max_reconnect_retries")]
    pub max_reconnect_retries: u32,

    /// Seconds without stream data before a read counts as failed
    #[serde(default = "default_read_timeout_seconds")]
    pub read_timeout_seconds: u64,
}

/// How segment boundaries are decided
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    /// Record while the classifier reports activity, with hysteresis
    Activity,
    /// Rotate fixed-length segments regardless of activity
    Continuous,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Recording mode
    #[serde(default = "default_recording_mode")]
    pub mode: RecordingMode,

    /// Directory that receives finished clip files
    #[serde(default = "default_storage_directory")]
    pub storage_directory: String,

    /// Clip filename prefix; empty selects a per-mode default
    #[serde(default = "default_filename_prefix")]
    pub filename_prefix: String,

    /// Clip file extension
    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    /// Hysteresis window: seconds a clip stays open past the last activity
    #[serde(default = "default_min_record_seconds")]
    pub min_record_seconds: u64,

    /// Segment length in continuous mode, seconds
    #[serde(default = "default_segment_duration_seconds")]
    pub segment_duration_seconds: u64,

    /// Optional hard cap on any single segment, seconds
    pub max_segment_seconds: Option<u64>,

    /// Minimum activity score that counts as a trigger
    #[serde(default = "default_activity_threshold")]
    pub activity_threshold: f64,

    /// IANA timezone used when formatting clip filenames
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifierConfig {
    /// Per-pixel delta threshold for the background difference
    #[serde(default = "default_delta_threshold")]
    pub delta_threshold: u32,

    /// Analysis downscale factor (1=full, 2=1/2, 4=1/4, 8=1/8)
    #[serde(default = "default_decode_scale")]
    pub decode_scale: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotifyConfig {
    /// Upload endpoint that relays finished clips
    #[serde(default = "default_notify_url")]
    pub url: String,

    /// Recipient identifier forwarded with each clip
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Delivery attempts per clip before the job is abandoned
    #[serde(default = "default_max_dispatch_attempts")]
    pub max_dispatch_attempts: u32,

    /// Base backoff between delivery attempts, seconds
    #[serde(default = "default_dispatch_backoff_seconds")]
    pub dispatch_backoff_seconds: u64,

    /// Backoff ceiling, seconds
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: u64,

    /// Per-request timeout for uploads, seconds
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Seconds the dispatcher gets to drain its queue at shutdown
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetentionConfig {
    /// Clip age in days beyond which the sweeper deletes
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Interval between sweeps, seconds
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,

    /// Delay before the first sweep after startup, seconds
    #[serde(default = "default_sweep_initial_delay_seconds")]
    pub initial_delay_seconds: u64,

    /// Ceiling for the failure backoff of the sweep interval, seconds
    #[serde(default = "default_sweep_max_interval_seconds")]
    pub max_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Per-component stop timeout during shutdown, seconds
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,

    /// Optional directory for rolling log files
    pub log_directory: Option<String>,
}

impl SentrycamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("sentrycam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("source.url", default_source_url())?
            .set_default(
                "source.reconnect_delay_seconds",
                default_reconnect_delay_seconds(),
            )?
            .set_default(
                "source.max_reconnect_retries",
                default_max_reconnect_retries(),
            )?
            .set_default("source.read_timeout_seconds", default_read_timeout_seconds())?
            .set_default("recording.mode", "activity")?
            .set_default("recording.storage_directory", default_storage_directory())?
            .set_default("recording.filename_prefix", default_filename_prefix())?
            .set_default("recording.file_extension", default_file_extension())?
            .set_default("recording.min_record_seconds", default_min_record_seconds())?
            .set_default(
                "recording.segment_duration_seconds",
                default_segment_duration_seconds(),
            )?
            .set_default("recording.activity_threshold", default_activity_threshold())?
            .set_default("recording.timezone", default_timezone())?
            .set_default("classifier.delta_threshold", default_delta_threshold())?
            .set_default("classifier.decode_scale", default_decode_scale())?
            .set_default("notify.url", default_notify_url())?
            .set_default("notify.user_id", default_user_id())?
            .set_default(
                "notify.max_dispatch_attempts",
                default_max_dispatch_attempts(),
            )?
            .set_default(
                "notify.dispatch_backoff_seconds",
                default_dispatch_backoff_seconds(),
            )?
            .set_default("notify.max_backoff_seconds", default_max_backoff_seconds())?
            .set_default(
                "notify.request_timeout_seconds",
                default_request_timeout_seconds(),
            )?
            .set_default(
                "notify.shutdown_grace_seconds",
                default_shutdown_grace_seconds(),
            )?
            .set_default("retention.retention_days", default_retention_days())?
            .set_default(
                "retention.sweep_interval_seconds",
                default_sweep_interval_seconds(),
            )?
            .set_default(
                "retention.initial_delay_seconds",
                default_sweep_initial_delay_seconds(),
            )?
            .set_default(
                "retention.max_interval_seconds",
                default_sweep_max_interval_seconds(),
            )?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "system.shutdown_timeout_seconds",
                default_shutdown_timeout_seconds(),
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with SENTRYCAM_ prefix
            .add_source(Environment::with_prefix("SENTRYCAM").separator("_"))
            .build()?;

        let config: SentrycamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate source settings
        if self.source.url.is_empty() {
            return Err(ConfigError::Message(
                "source.url must be set (SENTRYCAM_SOURCE_URL)".to_string(),
            ));
        }

        if self.source.reconnect_delay_seconds == 0 {
            return Err(ConfigError::Message(
                "source.reconnect_delay_seconds must be greater than 0".to_string(),
            ));
        }

        if self.source.read_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "source.read_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        // Validate recording settings
        if self.recording.storage_directory.is_empty() {
            return Err(ConfigError::Message(
                "recording.storage_directory must not be empty".to_string(),
            ));
        }

        if self.recording.file_extension.is_empty() {
            return Err(ConfigError::Message(
                "recording.file_extension must not be empty".to_string(),
            ));
        }

        if self.recording.min_record_seconds == 0 {
            return Err(ConfigError::Message(
                "recording.min_record_seconds must be greater than 0".to_string(),
            ));
        }

        if self.recording.segment_duration_seconds == 0 {
            return Err(ConfigError::Message(
                "recording.segment_duration_seconds must be greater than 0".to_string(),
            ));
        }

        if let Some(cap) = self.recording.max_segment_seconds {
            if cap == 0 {
                return Err(ConfigError::Message(
                    "recording.max_segment_seconds must be greater than 0 when set".to_string(),
                ));
            }
        }

        if self.recording.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::Message(format!(
                "recording.timezone is not a valid IANA timezone: {}",
                self.recording.timezone
            )));
        }

        if self.classifier.decode_scale == 0 {
            return Err(ConfigError::Message(
                "classifier.decode_scale must be greater than 0".to_string(),
            ));
        }

        // The dispatcher only exists in activity mode; its endpoint is
        // required exactly then.
        if self.recording.mode == RecordingMode::Activity && self.notify.url.is_empty() {
            return Err(ConfigError::Message(
                "notify.url must be set in activity mode (SENTRYCAM_NOTIFY_URL)".to_string(),
            ));
        }

        if self.notify.max_dispatch_attempts == 0 {
            return Err(ConfigError::Message(
                "notify.max_dispatch_attempts must be greater than 0".to_string(),
            ));
        }

        // Validate retention settings
        if self.retention.retention_days == 0 {
            return Err(ConfigError::Message(
                "retention.retention_days must be greater than 0".to_string(),
            ));
        }

        if self.retention.sweep_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "retention.sweep_interval_seconds must be greater than 0".to_string(),
            ));
        }

        // Validate system settings
        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.shutdown_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "system.shutdown_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl SourceConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }
}

impl RecordingConfig {
    /// Prefix used for clip filenames; falls back to a per-mode default
    pub fn resolved_prefix(&self) -> &str {
        if !self.filename_prefix.is_empty() {
            return &self.filename_prefix;
        }
        match self.mode {
            RecordingMode::Activity => "motion",
            RecordingMode::Continuous => "continuous",
        }
    }

    pub fn min_record_duration(&self) -> Duration {
        Duration::from_secs(self.min_record_seconds)
    }

    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.segment_duration_seconds)
    }

    pub fn max_segment_duration(&self) -> Option<Duration> {
        self.max_segment_seconds.map(Duration::from_secs)
    }
}

impl NotifyConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_secs(self.dispatch_backoff_seconds)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Default for SentrycamConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                url: default_source_url(),
                reconnect_delay_seconds: default_reconnect_delay_seconds(),
                max_reconnect_retries: default_max_reconnect_retries(),
                read_timeout_seconds: default_read_timeout_seconds(),
            },
            recording: RecordingConfig {
                mode: default_recording_mode(),
                storage_directory: default_storage_directory(),
                filename_prefix: default_filename_prefix(),
                file_extension: default_file_extension(),
                min_record_seconds: default_min_record_seconds(),
                segment_duration_seconds: default_segment_duration_seconds(),
                max_segment_seconds: None,
                activity_threshold: default_activity_threshold(),
                timezone: default_timezone(),
            },
            classifier: ClassifierConfig {
                delta_threshold: default_delta_threshold(),
                decode_scale: default_decode_scale(),
            },
            notify: NotifyConfig {
                url: default_notify_url(),
                user_id: default_user_id(),
                max_dispatch_attempts: default_max_dispatch_attempts(),
                dispatch_backoff_seconds: default_dispatch_backoff_seconds(),
                max_backoff_seconds: default_max_backoff_seconds(),
                request_timeout_seconds: default_request_timeout_seconds(),
                shutdown_grace_seconds: default_shutdown_grace_seconds(),
            },
            retention: RetentionConfig {
                retention_days: default_retention_days(),
                sweep_interval_seconds: default_sweep_interval_seconds(),
                initial_delay_seconds: default_sweep_initial_delay_seconds(),
                max_interval_seconds: default_sweep_max_interval_seconds(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
                log_directory: None,
            },
        }
    }
}

// Default value functions
fn default_source_url() -> String {
    String::new()
}
fn default_reconnect_delay_seconds() -> u64 {
    5
}
fn default_max_reconnect_retries() -> u32 {
    3
}
fn default_read_timeout_seconds() -> u64 {
    30
}

fn default_recording_mode() -> RecordingMode {
    RecordingMode::Activity
}
fn default_storage_directory() -> String {
    "./clips".to_string()
}
fn default_filename_prefix() -> String {
    String::new()
}
fn default_file_extension() -> String {
    "mjpeg".to_string()
}
fn default_min_record_seconds() -> u64 {
    30
}
fn default_segment_duration_seconds() -> u64 {
    3600
}
fn default_activity_threshold() -> f64 {
    500.0
}
fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_delta_threshold() -> u32 {
    25
}
fn default_decode_scale() -> u32 {
    4
} // Default to 1/4 resolution for efficiency

fn default_notify_url() -> String {
    String::new()
}
fn default_user_id() -> String {
    String::new()
}
fn default_max_dispatch_attempts() -> u32 {
    3
}
fn default_dispatch_backoff_seconds() -> u64 {
    10
}
fn default_max_backoff_seconds() -> u64 {
    300
}
fn default_request_timeout_seconds() -> u64 {
    60
}
fn default_shutdown_grace_seconds() -> u64 {
    20
}

fn default_retention_days() -> u32 {
    14
}
fn default_sweep_interval_seconds() -> u64 {
    3600
}
fn default_sweep_initial_delay_seconds() -> u64 {
    60
}
fn default_sweep_max_interval_seconds() -> u64 {
    86400
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_shutdown_timeout_seconds() -> u64 {
    30
}
