//! 状态字解析（Status Interpreter）
//!
//! Main 帧携带 16 位状态字，每个已定义位对应一个命名状态码，
//! 多个状态码可同时有效（例如低电量 + 探头脱落）。保留位（9-15）
//! 解码时忽略，以兼容固件新增的未用位。

use crate::ProtocolError;
use bilge::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// 状态字位域（16 位，LSB first）
///
/// - Bit 0: AO 报警关闭
/// - Bit 1: BU 电池供电
/// - Bit 2: LB 低电量
/// - Bit 3: LP 脉搏丢失
/// - Bit 4: MO 患者移动
/// - Bit 5: PS 脉搏搜索
/// - Bit 6: SD 探头脱落
/// - Bit 7: SH 饱和度上限报警
/// - Bit 8: SL 饱和度下限报警
/// - Bit 9-15: 保留
#[bitsize(16)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct StatusWord {
    pub alarm_off: bool,         // Bit 0
    pub battery_in_use: bool,    // Bit 1
    pub low_battery: bool,       // Bit 2
    pub loss_of_pulse: bool,     // Bit 3
    pub patient_motion: bool,    // Bit 4
    pub pulse_search: bool,      // Bit 5
    pub sensor_disconnect: bool, // Bit 6
    pub saturation_high: bool,   // Bit 7
    pub saturation_low: bool,    // Bit 8
    pub reserved: u7,            // Bit 9-15: 保留
}

/// 状态码（判别值即位序号）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum StatusCode {
    /// AO
    AlarmOff = 0,
    /// BU
    BatteryInUse = 1,
    /// LB
    LowBattery = 2,
    /// LP
    LossOfPulse = 3,
    /// MO
    PatientMotion = 4,
    /// PS
    PulseSearch = 5,
    /// SD
    SensorDisconnect = 6,
    /// SH
    SaturationHigh = 7,
    /// SL
    SaturationLow = 8,
}

impl StatusCode {
    /// 全部状态码（按位序）
    pub const ALL: [StatusCode; 9] = [
        StatusCode::AlarmOff,
        StatusCode::BatteryInUse,
        StatusCode::LowBattery,
        StatusCode::LossOfPulse,
        StatusCode::PatientMotion,
        StatusCode::PulseSearch,
        StatusCode::SensorDisconnect,
        StatusCode::SaturationHigh,
        StatusCode::SaturationLow,
    ];

    /// 位序号
    pub fn bit(self) -> u8 {
        self.into()
    }

    /// 状态字中的掩码
    pub fn mask(self) -> u16 {
        1u16 << self.bit()
    }

    /// 两字母代码
    pub fn code(self) -> &'static str {
        match self {
            StatusCode::AlarmOff => "AO",
            StatusCode::BatteryInUse => "BU",
            StatusCode::LowBattery => "LB",
            StatusCode::LossOfPulse => "LP",
            StatusCode::PatientMotion => "MO",
            StatusCode::PulseSearch => "PS",
            StatusCode::SensorDisconnect => "SD",
            StatusCode::SaturationHigh => "SH",
            StatusCode::SaturationLow => "SL",
        }
    }

    /// 人类可读含义（写入 CSV 的 Status 列）
    pub fn meaning(self) -> &'static str {
        match self {
            StatusCode::AlarmOff => "Alarm off",
            StatusCode::BatteryInUse => "Battery in use",
            StatusCode::LowBattery => "Low battery",
            StatusCode::LossOfPulse => "Loss of pulse",
            StatusCode::PatientMotion => "Patient motion",
            StatusCode::PulseSearch => "Pulse search",
            StatusCode::SensorDisconnect => "Sensor disconnect",
            StatusCode::SaturationHigh => "Saturation upper limit alarm",
            StatusCode::SaturationLow => "Saturation lower limit alarm",
        }
    }

    /// 按含义文本反查（读取 CSV 时使用）
    pub fn from_meaning(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.meaning() == text)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 同时有效的状态码集合
///
/// 内部只保存已定义位，保留位在构造时即被丢弃。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusSet {
    bits: u16,
}

impl StatusSet {
    /// 所有已定义位的掩码
    pub const DEFINED_MASK: u16 = 0x01FF;

    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// 从原始状态字解析（纯函数，保留位忽略）
    pub fn from_word(raw: u16) -> Self {
        Self::from(StatusWord::from(raw))
    }

    /// 编码为状态字（保留位恒为 0）
    pub fn to_word(self) -> u16 {
        self.bits
    }

    pub fn insert(&mut self, code: StatusCode) {
        self.bits |= code.mask();
    }

    pub fn remove(&mut self, code: StatusCode) {
        self.bits &= !code.mask();
    }

    pub fn contains(&self, code: StatusCode) -> bool {
        self.bits & code.mask() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// 按位序遍历有效状态码
    pub fn iter(&self) -> impl Iterator<Item = StatusCode> + '_ {
        StatusCode::ALL.into_iter().filter(|code| self.contains(*code))
    }

    pub fn codes(&self) -> Vec<StatusCode> {
        self.iter().collect()
    }
}

impl From<StatusWord> for StatusSet {
    fn from(word: StatusWord) -> Self {
        let flags = [
            (word.alarm_off(), StatusCode::AlarmOff),
            (word.battery_in_use(), StatusCode::BatteryInUse),
            (word.low_battery(), StatusCode::LowBattery),
            (word.loss_of_pulse(), StatusCode::LossOfPulse),
            (word.patient_motion(), StatusCode::PatientMotion),
            (word.pulse_search(), StatusCode::PulseSearch),
            (word.sensor_disconnect(), StatusCode::SensorDisconnect),
            (word.saturation_high(), StatusCode::SaturationHigh),
            (word.saturation_low(), StatusCode::SaturationLow),
        ];

        let mut set = StatusSet::empty();
        for (active, code) in flags {
            if active {
                set.insert(code);
            }
        }
        set
    }
}

impl FromIterator<StatusCode> for StatusSet {
    fn from_iter<I: IntoIterator<Item = StatusCode>>(iter: I) -> Self {
        let mut set = StatusSet::empty();
        for code in iter {
            set.insert(code);
        }
        set
    }
}

/// 显示为含义列表，以 `"; "` 分隔（CSV 字段内不出现逗号）
impl fmt::Display for StatusSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, code) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            f.write_str(code.meaning())?;
        }
        Ok(())
    }
}

/// 启动时校验状态表
///
/// 每个状态码必须占用唯一的位，且单独置位的状态字必须恰好解码为该状态码。
/// 驱动层在启动任何线程之前调用此函数。
pub fn validate_status_table() -> Result<(), ProtocolError> {
    let mut seen = 0u16;

    for code in StatusCode::ALL {
        let bit = code.bit();
        let invalid = ProtocolError::InvalidValue {
            field: "status_table",
            value: bit as i32,
        };

        if bit >= 16 || seen & code.mask() != 0 {
            return Err(invalid);
        }
        seen |= code.mask();

        if StatusCode::try_from(bit).ok() != Some(code) {
            return Err(invalid);
        }

        let decoded = StatusSet::from_word(code.mask());
        if decoded.codes() != [code] {
            return Err(invalid);
        }
    }

    if seen != StatusSet::DEFINED_MASK {
        return Err(ProtocolError::InvalidValue {
            field: "status_table",
            value: seen as i32,
        });
    }

    Ok(())
}
