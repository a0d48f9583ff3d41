//! 采集配置（TOML）
//!
//! ```toml
//! [main]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [sub]
//! port = "/dev/ttyUSB1"
//! baud_rate = 115200
//!
//! [sync]
//! policy = "latest"        # 或 "mean"
//! hold_timeout_ms = 5000   # 省略表示不限
//!
//! [recording]
//! log_dir = "./sessions"
//! sync_each_record = true
//! ```

use crate::sync::{HoldPolicy, SyncOptions};
use oxilog_serial::{DEFAULT_BAUD_RATE, PortSettings};
use oxilog_tools::{EnvironmentParams, GasCalibration, RecorderConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 单通道串口配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// 端口标识；`None` 表示未配置
    pub port: Option<String>,
    pub baud_rate: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl ChannelConfig {
    pub fn port_settings(&self) -> Option<PortSettings> {
        self.port
            .as_ref()
            .map(|port| PortSettings::new(port.clone(), self.baud_rate))
    }
}

/// 同步配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub policy: HoldPolicy,
    /// 配对读数允许的最大滞后（毫秒）
    pub hold_timeout_ms: Option<u64>,
}

impl SyncConfig {
    pub fn hold_timeout(&self) -> Option<Duration> {
        self.hold_timeout_ms.map(Duration::from_millis)
    }
}

/// 运行时参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 读取线程空闲轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 断线后重连间隔（毫秒）
    pub reconnect_interval_ms: u64,
    /// 会话命令应答超时（毫秒）
    pub command_timeout_ms: u64,
    /// 事件通道容量
    pub event_capacity: usize,
    /// 读取缓冲区大小（字节）
    pub read_buffer_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5,
            reconnect_interval_ms: 1000,
            command_timeout_ms: 2000,
            event_capacity: 1024,
            read_buffer_size: 4096,
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// 完整采集配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub main: ChannelConfig,
    pub sub: ChannelConfig,
    pub calibration: GasCalibration,
    pub sync: SyncConfig,
    pub recording: RecorderConfig,
    pub environment: EnvironmentParams,
    pub pipeline: PipelineConfig,
}

impl AcquisitionConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text).map_err(io_error)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.calibration
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        for (name, channel) in [("main", &self.main), ("sub", &self.sub)] {
            if channel.baud_rate == 0 {
                return Err(ConfigError::Invalid(format!("{}.baud_rate must be positive", name)));
            }
            if channel.port.as_deref().is_some_and(|p| p.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!("{}.port is empty", name)));
            }
        }

        let p = &self.pipeline;
        if p.poll_interval_ms == 0 || p.reconnect_interval_ms == 0 || p.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline intervals must be positive".to_string(),
            ));
        }
        if p.event_capacity == 0 || p.read_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "pipeline capacities must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// 同步器参数
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            policy: self.sync.policy,
            hold_timeout: self.sync.hold_timeout(),
            environment: Some(self.environment),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AcquisitionConfig::default();
        assert_eq!(config.main.baud_rate, 115_200);
        assert!(config.main.port.is_none());
        assert_eq!(config.sync.policy, HoldPolicy::Latest);
        assert_eq!(config.sync.hold_timeout(), None);
        assert_eq!(config.pipeline.poll_interval(), Duration::from_millis(5));
        assert_eq!(config.pipeline.event_capacity, 1024);
        assert!(config.recording.sync_each_record);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let text = r#"
            [main]
            port = "COM3"

            [sync]
            policy = "mean"
            hold_timeout_ms = 2500

            [recording]
            log_dir = "sessions"
        "#;
        let config: AcquisitionConfig = toml::from_str(text).unwrap();
        assert_eq!(config.main.port.as_deref(), Some("COM3"));
        assert_eq!(config.main.baud_rate, 115_200);
        assert_eq!(config.sync.policy, HoldPolicy::Mean);
        assert_eq!(config.sync.hold_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.recording.log_dir, PathBuf::from("sessions"));
        assert_eq!(config.calibration, GasCalibration::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AcquisitionConfig::default();
        config.sub.port = Some("/dev/ttyUSB1".into());
        config.environment.body_temp_c = 38.5;
        config.save(&path).unwrap();

        let loaded = AcquisitionConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[calibration]\nadc_bits = 40\n").unwrap();
        assert!(matches!(
            AcquisitionConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));

        fs::write(&path, "[main\n").unwrap();
        assert!(matches!(
            AcquisitionConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));

        assert!(matches!(
            AcquisitionConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_zero_intervals_rejected() {
        for text in [
            "[pipeline]\npoll_interval_ms = 0\n",
            "[pipeline]\nreconnect_interval_ms = 0\n",
            "[pipeline]\ncommand_timeout_ms = 0\n",
            "[pipeline]\nevent_capacity = 0\n",
        ] {
            let config: AcquisitionConfig = toml::from_str(text).unwrap();
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn test_port_settings() {
        let channel = ChannelConfig {
            port: Some("COM5".into()),
            baud_rate: 9600,
        };
        let settings = channel.port_settings().unwrap();
        assert_eq!(settings.name, "COM5");
        assert_eq!(settings.baud_rate, 9600);
        assert!(ChannelConfig::default().port_settings().is_none());
    }
}
