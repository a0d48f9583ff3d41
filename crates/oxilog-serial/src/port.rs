//! 基于 `serialport` 的串口传输

use crate::{PortSettings, SerialTransport, TransportError};
use serialport::{SerialPort, SerialPortType};
use std::io::{ErrorKind, Read};
use tracing::{debug, info, warn};

/// 真实串口
///
/// 断线后内部端口句柄被释放，`reconnect` 按原参数重新打开。
pub struct SerialPortTransport {
    settings: PortSettings,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortTransport {
    /// 打开串口
    pub fn open(settings: PortSettings) -> Result<Self, TransportError> {
        let port = open_port(&settings)?;
        info!(
            "Opened serial port {} @ {} bps",
            settings.name, settings.baud_rate
        );
        Ok(Self {
            settings,
            port: Some(port),
        })
    }

    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    fn mark_disconnected(&mut self, reason: &dyn std::fmt::Display) -> TransportError {
        warn!("Serial port {} lost: {}", self.settings.name, reason);
        self.port = None;
        TransportError::Disconnected {
            port: self.settings.name.clone(),
        }
    }
}

fn open_port(settings: &PortSettings) -> Result<Box<dyn SerialPort>, TransportError> {
    serialport::new(&settings.name, settings.baud_rate)
        .timeout(settings.timeout)
        .open()
        .map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => TransportError::NotFound {
                port: settings.name.clone(),
            },
            _ => TransportError::Open {
                port: settings.name.clone(),
                source: e,
            },
        })
}

impl SerialTransport for SerialPortTransport {
    fn port_name(&self) -> &str {
        &self.settings.name
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let Some(port) = self.port.as_mut() else {
            return Err(TransportError::Disconnected {
                port: self.settings.name.clone(),
            });
        };

        let available = match port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(e) => return Err(self.mark_disconnected(&e)),
        };
        if available == 0 || buf.is_empty() {
            return Ok(0);
        }

        let want = available.min(buf.len());
        match port.read(&mut buf[..want]) {
            Ok(0) => Err(self.mark_disconnected(&"end of stream")),
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            },
            Err(e) => Err(self.mark_disconnected(&e)),
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        self.port = None;
        let port = open_port(&self.settings)?;
        if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
            debug!("Failed to clear input buffer of {}: {}", self.settings.name, e);
        }
        self.port = Some(port);
        info!("Reconnected serial port {}", self.settings.name);
        Ok(())
    }
}

/// 串口类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortKind {
    Usb {
        vid: u16,
        pid: u16,
        manufacturer: Option<String>,
        product: Option<String>,
        serial_number: Option<String>,
    },
    Pci,
    Bluetooth,
    Unknown,
}

/// 枚举得到的串口
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub kind: PortKind,
}

impl PortInfo {
    /// 一行描述（CLI `ports` 输出）
    pub fn description(&self) -> String {
        match &self.kind {
            PortKind::Usb {
                vid,
                pid,
                manufacturer,
                product,
                ..
            } => {
                let label = [manufacturer.as_deref(), product.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                if label.is_empty() {
                    format!("USB {:04x}:{:04x}", vid, pid)
                } else {
                    format!("USB {:04x}:{:04x} {}", vid, pid, label)
                }
            },
            PortKind::Pci => "PCI".to_string(),
            PortKind::Bluetooth => "Bluetooth".to_string(),
            PortKind::Unknown => "Unknown".to_string(),
        }
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let kind = match info.port_type {
            SerialPortType::UsbPort(usb) => PortKind::Usb {
                vid: usb.vid,
                pid: usb.pid,
                manufacturer: usb.manufacturer,
                product: usb.product,
                serial_number: usb.serial_number,
            },
            SerialPortType::PciPort => PortKind::Pci,
            SerialPortType::BluetoothPort => PortKind::Bluetooth,
            SerialPortType::Unknown => PortKind::Unknown,
        };
        Self {
            name: info.port_name,
            kind,
        }
    }
}

/// 枚举系统串口（按名称排序）
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .map_err(TransportError::Enumerate)?
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ports)
}
