//! # 时间戳处理
//!
//! 管线内部统一使用 Unix 纪元微秒（`u64`）；只有写 CSV 与生成文件名时
//! 才转换为本地时间。

use chrono::{DateTime, Local, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// CSV 行时间戳格式
pub const ROW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 文件名时间格式
pub const FILE_TIME_FORMAT: &str = "%y%m%d_%H%M";

/// 获取当前时间（微秒）
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// 微秒时间戳 → 本地时间（超出 chrono 范围时退回纪元零点）
pub fn local_datetime(timestamp_us: u64) -> DateTime<Local> {
    let micros = i64::try_from(timestamp_us).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp_micros(micros)
        .unwrap_or_default()
        .with_timezone(&Local)
}

/// 本地时间 → 微秒时间戳（纪元之前返回 0）
pub fn datetime_to_us(datetime: &DateTime<Local>) -> u64 {
    u64::try_from(datetime.timestamp_micros()).unwrap_or(0)
}

/// 格式化为 `YYYY-MM-DD HH:MM:SS`（本地时间）
pub fn format_row_time(timestamp_us: u64) -> String {
    local_datetime(timestamp_us).format(ROW_TIME_FORMAT).to_string()
}

/// 格式化为 `YYMMDD_HHMM`（本地时间）
pub fn format_file_time(datetime: &DateTime<Local>) -> String {
    datetime.format(FILE_TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_is_after_2020() {
        assert!(now_us() > 1_577_836_800_000_000);
    }

    #[test]
    fn test_roundtrip_through_local() {
        let datetime = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let us = datetime_to_us(&datetime);
        assert_eq!(format_row_time(us), "2024-03-09 14:05:07");
        assert_eq!(format_file_time(&datetime), "240309_1405");
    }

    #[test]
    fn test_out_of_range_does_not_panic() {
        let text = format_row_time(u64::MAX);
        assert_eq!(text.len(), "YYYY-MM-DD HH:MM:SS".len());
    }
}
