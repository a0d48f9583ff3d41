//! Sub 通道（气体分析仪）帧定义
//!
//! ```text
//! Byte 0:   起始标记 0xAA
//! Byte 1-2: O2 ADC 码（有符号，大端）
//! Byte 3-4: CO2 ADC 码（有符号，大端）
//! Byte 5:   校验和（Byte 1-4 的 8 位回绕和）
//! ```
//!
//! ADC 码不在协议层做范围检查：模拟线路上的瞬时尖峰在换算阶段被钳位。

use crate::decoder::FrameCodec;
use crate::{
    Channel, ProtocolError, SUB_FRAME_LEN, SUB_START_MARKER, bytes_to_i16_be, checksum,
    i16_to_bytes_be,
};

/// 气体分析仪原始样本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubSample {
    /// 到达时间戳（Unix 纪元，微秒）
    pub timestamp_us: u64,
    /// O2 传感器 ADC 原始码
    pub o2_adc: i32,
    /// CO2 传感器 ADC 原始码
    pub co2_adc: i32,
}

/// Sub 帧编解码器
pub struct SubCodec;

impl SubCodec {
    /// 将 ADC 码编码为完整帧
    ///
    /// 超出 i16 范围的值被饱和到 i16 边界。
    pub fn encode(o2_adc: i32, co2_adc: i32) -> [u8; SUB_FRAME_LEN] {
        let o2 = o2_adc.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        let co2 = co2_adc.clamp(i16::MIN as i32, i16::MAX as i32) as i16;

        let mut frame = [0u8; SUB_FRAME_LEN];
        frame[0] = SUB_START_MARKER[0];
        frame[1..3].copy_from_slice(&i16_to_bytes_be(o2));
        frame[3..5].copy_from_slice(&i16_to_bytes_be(co2));
        frame[5] = checksum(&frame[1..5]);
        frame
    }
}

impl FrameCodec for SubCodec {
    type Sample = SubSample;

    const CHANNEL: Channel = Channel::Sub;
    const FRAME_LEN: usize = SUB_FRAME_LEN;
    const START_MARKER: &'static [u8] = &SUB_START_MARKER;

    fn parse(frame: &[u8], timestamp_us: u64) -> Result<SubSample, ProtocolError> {
        if frame.len() != SUB_FRAME_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: SUB_FRAME_LEN,
                actual: frame.len(),
            });
        }

        if frame[0] != SUB_START_MARKER[0] {
            return Err(ProtocolError::MissingStartMarker);
        }

        let expected = checksum(&frame[1..5]);
        if frame[5] != expected {
            return Err(ProtocolError::ChecksumMismatch {
                expected,
                actual: frame[5],
            });
        }

        Ok(SubSample {
            timestamp_us,
            o2_adc: bytes_to_i16_be([frame[1], frame[2]]) as i32,
            co2_adc: bytes_to_i16_be([frame[3], frame[4]]) as i32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let frame = SubCodec::encode(877, 1229);
        assert_eq!(frame[0], 0xAA);
        assert_eq!(frame[1..3], [0x03, 0x6D]);
        assert_eq!(frame[3..5], [0x04, 0xCD]);
        assert_eq!(frame[5], checksum(&frame[1..5]));
    }

    #[test]
    fn test_parse_roundtrip() {
        let frame = SubCodec::encode(877, 1229);
        let sample = SubCodec::parse(&frame, 42).unwrap();
        assert_eq!(
            sample,
            SubSample {
                timestamp_us: 42,
                o2_adc: 877,
                co2_adc: 1229
            }
        );
    }

    #[test]
    fn test_negative_codes_survive() {
        let frame = SubCodec::encode(-12, 5000);
        let sample = SubCodec::parse(&frame, 0).unwrap();
        assert_eq!(sample.o2_adc, -12);
        assert_eq!(sample.co2_adc, 5000);
    }

    #[test]
    fn test_encode_saturates() {
        let frame = SubCodec::encode(100_000, -100_000);
        let sample = SubCodec::parse(&frame, 0).unwrap();
        assert_eq!(sample.o2_adc, i16::MAX as i32);
        assert_eq!(sample.co2_adc, i16::MIN as i32);
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        let mut frame = SubCodec::encode(1, 2);
        frame[5] = frame[5].wrapping_add(1);
        assert!(matches!(
            SubCodec::parse(&frame, 0),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_missing_marker() {
        let mut frame = SubCodec::encode(1, 2);
        frame[0] = 0x00;
        assert_eq!(
            SubCodec::parse(&frame, 0),
            Err(ProtocolError::MissingStartMarker)
        );
    }
}
