//! Builder 模式实现
//!
//! 提供链式构造 [`Acquisition`] 的方式。

use crate::acquisition::Acquisition;
use crate::config::{AcquisitionConfig, PipelineConfig};
use crate::error::DriverError;
use crate::sync::HoldPolicy;
use oxilog_protocol::validate_status_table;
use oxilog_serial::{SerialPortTransport, SerialTransport};
use oxilog_tools::{ConcentrationConverter, EnvironmentParams, GasCalibration};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// 采集构建器
///
/// Main 通道必须配置（端口或传输二选一）；Sub 通道可选，未配置时气体字段为 `N/A`。
///
/// # Example
///
/// ```rust
/// use oxilog_driver::AcquisitionBuilder;
/// use std::time::Duration;
///
/// let builder = AcquisitionBuilder::new()
///     .main_port("COM3")
///     .baud_rate(115_200)
///     .hold_timeout(Duration::from_secs(5))
///     .log_dir("sessions");
/// assert_eq!(builder.config().main.port.as_deref(), Some("COM3"));
/// ```
pub struct AcquisitionBuilder {
    config: AcquisitionConfig,
    main_transport: Option<Box<dyn SerialTransport>>,
    sub_transport: Option<Box<dyn SerialTransport>>,
}

impl AcquisitionBuilder {
    pub fn new() -> Self {
        Self::from_config(AcquisitionConfig::default())
    }

    /// 从已加载的配置开始
    pub fn from_config(config: AcquisitionConfig) -> Self {
        Self {
            config,
            main_transport: None,
            sub_transport: None,
        }
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Main 通道串口
    pub fn main_port(mut self, port: impl Into<String>) -> Self {
        self.config.main.port = Some(port.into());
        self
    }

    /// Sub 通道串口
    pub fn sub_port(mut self, port: impl Into<String>) -> Self {
        self.config.sub.port = Some(port.into());
        self
    }

    /// 两个通道使用同一波特率
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.main.baud_rate = baud_rate;
        self.config.sub.baud_rate = baud_rate;
        self
    }

    /// 使用现成的 Main 传输（优先于端口配置）
    pub fn main_transport(mut self, transport: impl SerialTransport + 'static) -> Self {
        self.main_transport = Some(Box::new(transport));
        self
    }

    /// 使用现成的 Sub 传输（优先于端口配置）
    pub fn sub_transport(mut self, transport: impl SerialTransport + 'static) -> Self {
        self.sub_transport = Some(Box::new(transport));
        self
    }

    pub fn calibration(mut self, calibration: GasCalibration) -> Self {
        self.config.calibration = calibration;
        self
    }

    /// 配对读数的最大滞后，超过后气体字段记为不可用
    pub fn hold_timeout(mut self, timeout: Duration) -> Self {
        self.config.sync.hold_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn hold_policy(mut self, policy: HoldPolicy) -> Self {
        self.config.sync.policy = policy;
        self
    }

    /// 会话文件目录
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.recording.log_dir = dir.into();
        self
    }

    pub fn sync_each_record(mut self, enabled: bool) -> Self {
        self.config.recording.sync_each_record = enabled;
        self
    }

    pub fn environment(mut self, environment: EnvironmentParams) -> Self {
        self.config.environment = environment;
        self
    }

    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.config.pipeline = config;
        self
    }

    /// 校验配置、打开串口并启动线程
    pub fn build(self) -> Result<Acquisition, DriverError> {
        validate_status_table()?;
        self.config.validate()?;
        let converter = ConcentrationConverter::new(self.config.calibration)?;

        let main = match self.main_transport {
            Some(transport) => transport,
            None => {
                let settings = self
                    .config
                    .main
                    .port_settings()
                    .ok_or(DriverError::NotConfigured("main"))?;
                debug!("Opening main channel on {}", settings.name);
                Box::new(SerialPortTransport::open(settings)?)
            },
        };

        let sub = match self.sub_transport {
            Some(transport) => Some(transport),
            None => match self.config.sub.port_settings() {
                Some(settings) => {
                    debug!("Opening sub channel on {}", settings.name);
                    let transport: Box<dyn SerialTransport> =
                        Box::new(SerialPortTransport::open(settings)?);
                    Some(transport)
                },
                None => None,
            },
        };

        Acquisition::spawn(self.config, main, sub, converter)
    }
}

impl Default for AcquisitionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
