use serde::Deserialize;
use std::{path::Path, time::Duration};
use thiserror::Error;
use tokio::fs;

// -----------------------------------------------------------------------------
// ----- Defaults --------------------------------------------------------------

const DEFAULT_OUTBOUND_BUFFER_CAPACITY: usize = 64;
const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(30);
const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);
const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

const DEFAULT_JOBS_TOPIC: &str = "platform.receptor-controller.jobs";
const DEFAULT_RESPONSES_TOPIC: &str = "platform.receptor-controller.responses";
const DEFAULT_EVENTS_TOPIC: &str = "platform.receptor-controller.events";

// -----------------------------------------------------------------------------
// ----- Settings --------------------------------------------------------------

/// Everything read from the settings file. Missing keys take defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub gateway: GatewaySettings,
    pub queue: QueueSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Frames a connection may hold before writes fail with backpressure.
    pub outbound_buffer_capacity: usize,
    pub default_job_timeout: Duration,
    /// Granularity of the reactor's expiry sweep.
    pub sweep_interval: Duration,
    pub handshake_timeout: Duration,
    pub ping_period: Duration,
    /// Silence longer than this closes the session.
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub max_frame_size: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            outbound_buffer_capacity: DEFAULT_OUTBOUND_BUFFER_CAPACITY,
            default_job_timeout: DEFAULT_JOB_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            ping_period: DEFAULT_PING_PERIOD,
            pong_wait: DEFAULT_PONG_WAIT,
            write_wait: DEFAULT_WRITE_WAIT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub jobs_topic: String,
    pub responses_topic: String,
    pub events_topic: String,
    pub dispatched_topic: Option<String>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            jobs_topic: DEFAULT_JOBS_TOPIC.to_string(),
            responses_topic: DEFAULT_RESPONSES_TOPIC.to_string(),
            events_topic: DEFAULT_EVENTS_TOPIC.to_string(),
            dispatched_topic: None,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Settings: Static ------------------------------------------------------

impl Settings {
    pub async fn from_file(path: &Path) -> Result<Settings, SettingsError> {
        let raw = fs::read_to_string(path).await.map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Settings, SettingsError> {
        let doc: SettingsFile = toml::from_str(raw).map_err(|e| SettingsError::Toml { source: e })?;

        let gateway = doc.gateway.into_settings()?;
        gateway.validate()?;

        let queue = doc.queue.into_settings()?;

        Ok(Settings { gateway, queue })
    }
}

// -----------------------------------------------------------------------------
// ----- GatewaySettings: Private ----------------------------------------------

impl GatewaySettings {
    fn validate(&self) -> Result<(), SettingsError> {
        if self.outbound_buffer_capacity == 0 {
            return Err(SettingsError::Invalid {
                key: "gateway.outbound_buffer_capacity",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.max_frame_size < 64 {
            return Err(SettingsError::Invalid {
                key: "gateway.max_frame_size",
                reason: "must be at least 64 bytes".to_string(),
            });
        }

        // the length prefix is a u32
        if self.max_frame_size > u32::MAX as usize {
            return Err(SettingsError::Invalid {
                key: "gateway.max_frame_size",
                reason: format!("must be at most {} bytes", u32::MAX),
            });
        }

        for (key, value) in [
            ("gateway.default_job_timeout", self.default_job_timeout),
            ("gateway.sweep_interval", self.sweep_interval),
            ("gateway.handshake_timeout", self.handshake_timeout),
            ("gateway.ping_period", self.ping_period),
            ("gateway.write_wait", self.write_wait),
        ] {
            if value.is_zero() {
                return Err(SettingsError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.pong_wait <= self.ping_period {
            return Err(SettingsError::Invalid {
                key: "gateway.pong_wait",
                reason: "must be longer than gateway.ping_period".to_string(),
            });
        }

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    #[serde(default)]
    gateway: GatewayFileEntry,
    #[serde(default)]
    queue: QueueFileEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GatewayFileEntry {
    outbound_buffer_capacity: Option<usize>,
    default_job_timeout: Option<String>,
    sweep_interval: Option<String>,
    handshake_timeout: Option<String>,
    ping_period: Option<String>,
    pong_wait: Option<String>,
    write_wait: Option<String>,
    max_frame_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueueFileEntry {
    jobs_topic: Option<String>,
    responses_topic: Option<String>,
    events_topic: Option<String>,
    dispatched_topic: Option<String>,
}

impl GatewayFileEntry {
    fn into_settings(self) -> Result<GatewaySettings, SettingsError> {
        let defaults = GatewaySettings::default();

        Ok(GatewaySettings {
            outbound_buffer_capacity: self
                .outbound_buffer_capacity
                .unwrap_or(defaults.outbound_buffer_capacity),
            default_job_timeout: duration_or(
                "gateway.default_job_timeout",
                self.default_job_timeout,
                defaults.default_job_timeout,
            )?,
            sweep_interval: duration_or(
                "gateway.sweep_interval",
                self.sweep_interval,
                defaults.sweep_interval,
            )?,
            handshake_timeout: duration_or(
                "gateway.handshake_timeout",
                self.handshake_timeout,
                defaults.handshake_timeout,
            )?,
            ping_period: duration_or("gateway.ping_period", self.ping_period, defaults.ping_period)?,
            pong_wait: duration_or("gateway.pong_wait", self.pong_wait, defaults.pong_wait)?,
            write_wait: duration_or("gateway.write_wait", self.write_wait, defaults.write_wait)?,
            max_frame_size: self.max_frame_size.unwrap_or(defaults.max_frame_size),
        })
    }
}

impl QueueFileEntry {
    fn into_settings(self) -> Result<QueueSettings, SettingsError> {
        let defaults = QueueSettings::default();

        Ok(QueueSettings {
            jobs_topic: topic_or("queue.jobs_topic", self.jobs_topic, defaults.jobs_topic)?,
            responses_topic: topic_or(
                "queue.responses_topic",
                self.responses_topic,
                defaults.responses_topic,
            )?,
            events_topic: topic_or("queue.events_topic", self.events_topic, defaults.events_topic)?,
            dispatched_topic: match self.dispatched_topic {
                Some(topic) => Some(topic_or("queue.dispatched_topic", Some(topic), String::new())?),
                None => None,
            },
        })
    }
}

fn duration_or(
    key: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, SettingsError> {
    let Some(raw) = raw else {
        return Ok(default);
    };

    humantime::parse_duration(raw.trim()).map_err(|e| SettingsError::Invalid {
        key,
        reason: format!("{raw:?} is not a duration: {e}"),
    })
}

fn topic_or(key: &'static str, raw: Option<String>, default: String) -> Result<String, SettingsError> {
    let Some(raw) = raw else {
        return Ok(default);
    };

    if raw.trim().is_empty() {
        return Err(SettingsError::Invalid {
            key,
            reason: "topic must not be empty".to_string(),
        });
    }

    Ok(raw)
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("read error for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.gateway.outbound_buffer_capacity, 64);
        assert_eq!(settings.queue.jobs_topic, DEFAULT_JOBS_TOPIC);
    }

    #[test]
    fn parses_humantime_durations() {
        let raw = r#"
            [gateway]
            outbound_buffer_capacity = 8
            default_job_timeout = "5s"
            sweep_interval = "100ms"
            ping_period = "1s"
            pong_wait = "3s"

            [queue]
            dispatched_topic = "jobs.dispatched"
        "#;

        let settings = Settings::parse(raw).unwrap();
        assert_eq!(settings.gateway.outbound_buffer_capacity, 8);
        assert_eq!(settings.gateway.default_job_timeout, Duration::from_secs(5));
        assert_eq!(settings.gateway.sweep_interval, Duration::from_millis(100));
        assert_eq!(settings.gateway.pong_wait, Duration::from_secs(3));
        assert_eq!(settings.gateway.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
        assert_eq!(
            settings.queue.dispatched_topic.as_deref(),
            Some("jobs.dispatched")
        );
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = Settings::parse("[gateway]\noutbound_buffer_capacity = 0\n").unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                key: "gateway.outbound_buffer_capacity",
                ..
            }
        ));
    }

    #[test]
    fn rejects_frame_limit_beyond_length_prefix() {
        let raw = format!("[gateway]\nmax_frame_size = {}\n", u32::MAX as u64 + 1);
        let err = Settings::parse(&raw).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                key: "gateway.max_frame_size",
                ..
            }
        ));
    }

    #[test]
    fn rejects_pong_wait_not_longer_than_ping_period() {
        let raw = "[gateway]\nping_period = \"10s\"\npong_wait = \"10s\"\n";
        let err = Settings::parse(raw).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                key: "gateway.pong_wait",
                ..
            }
        ));
    }

    #[test]
    fn rejects_bad_duration() {
        let err = Settings::parse("[gateway]\nsweep_interval = \"soon\"\n").unwrap_err();
        assert!(err.to_string().contains("gateway.sweep_interval"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = Settings::parse("[gateway]\nbuffer = 3\n").unwrap_err();
        assert!(matches!(err, SettingsError::Toml { .. }));
    }

    #[test]
    fn rejects_blank_topic() {
        let err = Settings::parse("[queue]\nevents_topic = \" \"\n").unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                key: "queue.events_topic",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gateway]\nhandshake_timeout = \"2s\"").unwrap();

        let settings = Settings::from_file(file.path()).await.unwrap();
        assert_eq!(settings.gateway.handshake_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = Settings::from_file(Path::new("/nonexistent/receptor.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
