//! 协议常量定义

// ============================================================================
// Main 通道（血氧仪）
// ============================================================================

/// Main 帧起始标记
pub const MAIN_START_MARKER: [u8; 2] = [0xA5, 0x5A];

/// Main 帧总长度（字节）
///
/// ```text
/// [A5 5A][SpO2][HR_H HR_L][PA][ST_H ST_L][CS]
/// ```
pub const MAIN_FRAME_LEN: usize = 9;

/// SpO2 有效上限（%）
pub const SPO2_MAX: u8 = 100;

/// 心率有效上限（bpm），超过视为结构错误
pub const HEART_RATE_MAX: u16 = 350;

/// Main 通道标称帧率（Hz）
pub const MAIN_NOMINAL_RATE_HZ: f64 = 0.5;

// ============================================================================
// Sub 通道（气体分析仪）
// ============================================================================

/// Sub 帧起始标记
pub const SUB_START_MARKER: [u8; 1] = [0xAA];

/// Sub 帧总长度（字节）
///
/// ```text
/// [AA][O2_H O2_L][CO2_H CO2_L][CS]
/// ```
pub const SUB_FRAME_LEN: usize = 6;

/// Sub 通道标称帧率（Hz）
pub const SUB_NOMINAL_RATE_HZ: f64 = 100.0;
