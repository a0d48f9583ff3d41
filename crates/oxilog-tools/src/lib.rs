//! # Oxilog Tools
//!
//! 与硬件无关的数据工具：
//!
//! - `converter`: 气体 ADC 码 → 浓度（%）
//! - `estimate`: 由呼气末气体浓度估算 SpO2（Severinghaus 模型）
//! - `recording`: 会话 CSV 的写入与回读
//! - `timestamp`: 微秒时间戳与本地时间的转换
//!
//! 只依赖 `oxilog-protocol`，不依赖串口与驱动层。

pub mod converter;
pub mod estimate;
pub mod recording;
pub mod timestamp;

pub use converter::{
    CO2_RANGE, CalibrationError, ConcentrationConverter, GasCalibration, GasReading, O2_RANGE,
};
pub use estimate::{EnvironmentParams, Spo2Estimate, estimate, estimate_reading};
pub use recording::{
    CSV_HEADER, RecorderConfig, RecorderError, SessionHandle, SessionLog, SessionLogError,
    SessionRecorder, SessionRow, SessionSummary, Stat, SyncedRecord, UNAVAILABLE,
    validate_subject_id,
};
pub use timestamp::{format_row_time, now_us};
