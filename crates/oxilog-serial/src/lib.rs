//! # Oxilog Serial Transport Layer
//!
//! 串口传输抽象：每个通道一个传输实例，由该通道的读取线程独占。
//!
//! - [`SerialTransport`]: 非阻塞读取已到达字节、连接状态查询、重连
//! - [`SerialPortTransport`]: 基于 `serialport` 的实现
//! - [`list_ports`]: 枚举系统串口
//! - `mock`（feature `mock`）: 脚本化传输，用于测试

use std::time::Duration;
use thiserror::Error;

pub mod port;

#[cfg(feature = "mock")]
pub mod mock;

pub use port::{PortInfo, PortKind, SerialPortTransport, list_ports};

#[cfg(feature = "mock")]
pub use mock::{MockHandle, MockTransport};

/// 默认波特率
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// 串口底层读超时（`read_available` 只读取已到达的字节，一般不会触发）
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port {port} not found")]
    NotFound { port: String },

    #[error("Failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Serial port {port} disconnected")]
    Disconnected { port: String },

    #[error("Transport {port} does not support reconnect")]
    ReconnectUnsupported { port: String },

    #[error("Port enumeration failed: {0}")]
    Enumerate(#[source] serialport::Error),
}

impl TransportError {
    /// 是否为断线类错误（读取线程据此进入重连流程）
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::Disconnected { .. } | TransportError::NotFound { .. }
        )
    }
}

/// 单个串口的打开参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    /// 端口标识（如 `/dev/ttyUSB0`、`COM3`）
    pub name: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl PortSettings {
    pub fn new(name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            name: name.into(),
            baud_rate,
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// 串口传输
///
/// 实现必须是非阻塞的：`read_available` 只返回已经到达的字节，没有数据时返回 `Ok(0)`。
pub trait SerialTransport: Send {
    /// 端口标识（用于日志和事件）
    fn port_name(&self) -> &str;

    /// 读取已到达的字节，返回写入 `buf` 的字节数
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// 当前是否连接
    fn is_connected(&self) -> bool;

    /// 尝试重新打开端口
    fn reconnect(&mut self) -> Result<(), TransportError> {
        Err(TransportError::ReconnectUnsupported {
            port: self.port_name().to_string(),
        })
    }
}

impl<T: SerialTransport + ?Sized> SerialTransport for Box<T> {
    fn port_name(&self) -> &str {
        (**self).port_name()
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read_available(buf)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        (**self).reconnect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl SerialTransport for Fixed {
        fn port_name(&self) -> &str {
            "fixed"
        }

        fn read_available(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
            Ok(0)
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_default_reconnect_unsupported() {
        let mut transport: Box<dyn SerialTransport> = Box::new(Fixed);
        let err = transport.reconnect().unwrap_err();
        assert!(matches!(err, TransportError::ReconnectUnsupported { .. }));
        assert!(!err.is_disconnect());
        assert_eq!(transport.port_name(), "fixed");
    }

    #[test]
    fn test_disconnect_classification() {
        let err = TransportError::Disconnected {
            port: "COM3".into(),
        };
        assert!(err.is_disconnect());
        assert_eq!(err.to_string(), "Serial port COM3 disconnected");
    }

    #[test]
    fn test_port_settings_defaults() {
        let settings = PortSettings::new("/dev/ttyUSB0", DEFAULT_BAUD_RATE);
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.timeout, DEFAULT_READ_TIMEOUT);
    }
}
