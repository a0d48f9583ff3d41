//! Main 通道（血氧仪）帧定义
//!
//! ```text
//! Byte 0-1: 起始标记 0xA5 0x5A
//! Byte 2:   SpO2（%，0-100）
//! Byte 3-4: 心率（bpm，大端，0-350）
//! Byte 5:   脉搏幅度（原始值）
//! Byte 6-7: 状态字（大端，见 status 模块）
//! Byte 8:   校验和（Byte 2-7 的 8 位回绕和）
//! ```

use crate::decoder::FrameCodec;
use crate::status::StatusSet;
use crate::{
    Channel, HEART_RATE_MAX, MAIN_FRAME_LEN, MAIN_START_MARKER, ProtocolError, SPO2_MAX,
    bytes_to_u16_be, checksum, u16_to_bytes_be,
};

/// 血氧仪样本
///
/// 每个有效 Main 帧产生一个，产生后不可变。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MainSample {
    /// 到达时间戳（Unix 纪元，微秒）
    pub timestamp_us: u64,
    /// 血氧饱和度（%，0-100）
    pub spo2: u8,
    /// 心率（bpm）
    pub heart_rate: u16,
    /// 脉搏幅度
    pub pulse_amplitude: u8,
    /// 状态码集合
    pub status: StatusSet,
}

/// Main 帧编解码器
pub struct MainCodec;

impl MainCodec {
    /// 将样本编码为完整帧（保留位恒为 0）
    ///
    /// 超出范围的 SpO2/心率不做截断，编码出的帧会在解码端被判为结构错误。
    pub fn encode(sample: &MainSample) -> [u8; MAIN_FRAME_LEN] {
        Self::encode_raw(
            sample.spo2,
            sample.heart_rate,
            sample.pulse_amplitude,
            sample.status.to_word(),
        )
    }

    /// 以原始状态字编码（测试保留位时使用）
    pub fn encode_raw(
        spo2: u8,
        heart_rate: u16,
        pulse_amplitude: u8,
        status_word: u16,
    ) -> [u8; MAIN_FRAME_LEN] {
        let mut frame = [0u8; MAIN_FRAME_LEN];
        frame[..2].copy_from_slice(&MAIN_START_MARKER);
        frame[2] = spo2;
        frame[3..5].copy_from_slice(&u16_to_bytes_be(heart_rate));
        frame[5] = pulse_amplitude;
        frame[6..8].copy_from_slice(&u16_to_bytes_be(status_word));
        frame[8] = checksum(&frame[2..8]);
        frame
    }
}

impl FrameCodec for MainCodec {
    type Sample = MainSample;

    const CHANNEL: Channel = Channel::Main;
    const FRAME_LEN: usize = MAIN_FRAME_LEN;
    const START_MARKER: &'static [u8] = &MAIN_START_MARKER;

    fn parse(frame: &[u8], timestamp_us: u64) -> Result<MainSample, ProtocolError> {
        if frame.len() != MAIN_FRAME_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: MAIN_FRAME_LEN,
                actual: frame.len(),
            });
        }

        if frame[..2] != MAIN_START_MARKER {
            return Err(ProtocolError::MissingStartMarker);
        }

        let expected = checksum(&frame[2..8]);
        if frame[8] != expected {
            return Err(ProtocolError::ChecksumMismatch {
                expected,
                actual: frame[8],
            });
        }

        let spo2 = frame[2];
        if spo2 > SPO2_MAX {
            return Err(ProtocolError::InvalidValue {
                field: "spo2",
                value: spo2 as i32,
            });
        }

        let heart_rate = bytes_to_u16_be([frame[3], frame[4]]);
        if heart_rate > HEART_RATE_MAX {
            return Err(ProtocolError::InvalidValue {
                field: "heart_rate",
                value: heart_rate as i32,
            });
        }

        Ok(MainSample {
            timestamp_us,
            spo2,
            heart_rate,
            pulse_amplitude: frame[5],
            status: StatusSet::from_word(bytes_to_u16_be([frame[6], frame[7]])),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusCode;

    fn sample() -> MainSample {
        MainSample {
            timestamp_us: 1_000,
            spo2: 98,
            heart_rate: 72,
            pulse_amplitude: 45,
            status: [StatusCode::AlarmOff].into_iter().collect(),
        }
    }

    #[test]
    fn test_encode_layout() {
        let frame = MainCodec::encode(&sample());
        assert_eq!(frame[..2], [0xA5, 0x5A]);
        assert_eq!(frame[2], 98);
        assert_eq!(frame[3..5], [0x00, 72]);
        assert_eq!(frame[5], 45);
        assert_eq!(frame[6..8], [0x00, 0x01]);
        assert_eq!(frame[8], 98u8.wrapping_add(72).wrapping_add(45).wrapping_add(1));
    }

    #[test]
    fn test_parse_roundtrip() {
        let original = sample();
        let frame = MainCodec::encode(&original);
        let parsed = MainCodec::parse(&frame, 1_000).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        let mut frame = MainCodec::encode(&sample());
        frame[8] ^= 0xFF;
        assert!(matches!(
            MainCodec::parse(&frame, 0),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_out_of_range_spo2() {
        let frame = MainCodec::encode_raw(101, 72, 45, 0);
        assert_eq!(
            MainCodec::parse(&frame, 0),
            Err(ProtocolError::InvalidValue {
                field: "spo2",
                value: 101
            })
        );
    }

    #[test]
    fn test_parse_rejects_out_of_range_heart_rate() {
        let frame = MainCodec::encode_raw(97, 351, 45, 0);
        assert!(matches!(
            MainCodec::parse(&frame, 0),
            Err(ProtocolError::InvalidValue {
                field: "heart_rate",
                ..
            })
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let frame = MainCodec::encode(&sample());
        assert_eq!(
            MainCodec::parse(&frame[..8], 0),
            Err(ProtocolError::InvalidLength {
                expected: 9,
                actual: 8
            })
        );
    }

    #[test]
    fn test_parse_ignores_reserved_status_bits() {
        let frame = MainCodec::encode_raw(95, 80, 10, 0x8005);
        let parsed = MainCodec::parse(&frame, 0).unwrap();
        assert_eq!(
            parsed.status.codes(),
            vec![StatusCode::AlarmOff, StatusCode::LowBattery]
        );
    }
}
