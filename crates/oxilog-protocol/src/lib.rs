//! # Oxilog Protocol
//!
//! 双通道串口传感器协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `constants`: 帧长度、起始标记、取值范围等协议常量
//! - `status`: Main 通道状态字解析（Status Interpreter）
//! - `main_frame`: Main 通道（血氧仪，~0.5 Hz）帧编解码
//! - `sub_frame`: Sub 通道（气体分析仪，~100 Hz）帧编解码
//! - `decoder`: 通用帧解码器（跨读取缓冲、校验失败后逐字节重同步）
//!
//! ## 字节序
//!
//! 协议使用大端字节序（高位在前）。校验和为起始标记与校验字节之间
//! 所有字节的 8 位回绕和。

pub mod constants;
pub mod decoder;
pub mod main_frame;
pub mod status;
pub mod sub_frame;

// 重新导出常用类型
pub use constants::*;
pub use decoder::{DecoderStats, FrameCodec, FrameDecoder, MainDecoder, Samples, SubDecoder};
pub use main_frame::{MainCodec, MainSample};
pub use status::{StatusCode, StatusSet, StatusWord, validate_status_table};
pub use sub_frame::{SubCodec, SubSample};

use std::fmt;
use thiserror::Error;

/// 传感器通道标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Channel {
    /// 血氧仪（低速、权威时钟）
    Main,
    /// 气体分析仪（高速、降采样）
    Sub,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Main => "main",
            Channel::Sub => "sub",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次传输读取得到的原始字节块
///
/// 带通道标识和到达时间戳，交给对应通道的解码器后即被消费。
/// 一个块可能只包含半帧，也可能包含多帧。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// 来源通道
    pub channel: Channel,
    /// 到达时间戳（Unix 纪元，微秒）
    pub arrival_us: u64,
    /// 原始字节
    pub bytes: Vec<u8>,
}

impl RawFrame {
    pub fn new(channel: Channel, arrival_us: u64, bytes: &[u8]) -> Self {
        Self {
            channel,
            arrival_us,
            bytes: bytes.to_vec(),
        }
    }
}

/// 协议解析错误类型
///
/// 解码器内部使用，对调用方不可见：坏帧只计数，不上抛。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Missing start marker")]
    MissingStartMarker,

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: &'static str, value: i32 },
}

/// 8 位回绕和校验
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// 大端字节序转 u16
pub fn bytes_to_u16_be(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

/// 大端字节序转 i16
pub fn bytes_to_i16_be(bytes: [u8; 2]) -> i16 {
    i16::from_be_bytes(bytes)
}

/// u16 转大端字节序
pub fn u16_to_bytes_be(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// i16 转大端字节序
pub fn i16_to_bytes_be(value: i16) -> [u8; 2] {
    value.to_be_bytes()
}
