//! 驱动层错误类型定义

use crate::config::ConfigError;
use oxilog_protocol::ProtocolError;
use oxilog_serial::TransportError;
use oxilog_tools::{CalibrationError, RecorderError};
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 串口传输错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 协议错误（启动时状态表校验失败）
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 校准参数错误
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// 会话记录错误
    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 通道未配置
    #[error("Channel not configured: {0}")]
    NotConfigured(&'static str),

    /// 命令通道已关闭（同步线程退出）
    #[error("Command channel closed")]
    ChannelClosed,

    /// 操作超时
    #[error("Operation timeout")]
    Timeout,

    /// 线程启动失败
    #[error("Thread spawn failed: {0}")]
    Spawn(#[source] std::io::Error),
}

impl DriverError {
    /// 是否为 `SessionNotOpen`
    pub fn is_session_not_open(&self) -> bool {
        matches!(self, DriverError::Recorder(RecorderError::SessionNotOpen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::Transport(TransportError::Disconnected {
            port: "COM4".into(),
        });
        assert_eq!(
            err.to_string(),
            "Transport error: Serial port COM4 disconnected"
        );

        let err = DriverError::from(RecorderError::InvalidMetadata("subject id is empty".into()));
        assert!(err.to_string().contains("subject id is empty"));
    }

    #[test]
    fn test_session_not_open_classification() {
        assert!(DriverError::from(RecorderError::SessionNotOpen).is_session_not_open());
        assert!(!DriverError::Timeout.is_session_not_open());
    }
}
