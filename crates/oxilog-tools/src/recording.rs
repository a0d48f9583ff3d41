//! # 会话记录（Session Recorder）
//!
//! 每个会话对应一个 CSV 文件：
//!
//! ```text
//! Timestamp, SpO2(%), HR(BPM), PA, Status, O2_Sat(%), CO2_Sat(%), Comment
//! 2024-03-09 14:05:07, 98, 72, 45, Alarm off, 21.0, 4.5,
//! ```
//!
//! - 文件名 `Subject_<id>_<YYMMDD_HHMM>.csv`，取会话开始的本地时间；同名文件已存在时
//!   依次尝试 `_2`、`_3` 后缀，不覆盖旧数据
//! - 文件在第一次 `append` 时创建（若整个会话没有记录，则在 `close` 时创建）
//! - 每次 `append` 写一行并立即 flush，进程中断最多丢失正在写的一行
//! - 写入失败后会话进入失败状态，之后的 `append` 一律返回 `StorageFailure`

use crate::converter::GasReading;
use crate::timestamp::{self, format_file_time, format_row_time};
use chrono::{DateTime, Local, NaiveDateTime};
use oxilog_protocol::{MainSample, StatusCode, StatusSet};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// CSV 表头（列顺序固定）
pub const CSV_HEADER: &str = "Timestamp, SpO2(%), HR(BPM), PA, Status, O2_Sat(%), CO2_Sat(%), Comment";

/// 列分隔符
pub const FIELD_SEPARATOR: &str = ", ";

/// 气体数据不可用时的占位符
pub const UNAVAILABLE: &str = "N/A";

/// 受试者编号最大长度（字符）
pub const MAX_SUBJECT_ID_LEN: usize = 64;

const COLUMN_COUNT: usize = 8;

/// 记录器错误
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Invalid session metadata: {0}")]
    InvalidMetadata(String),

    #[error("No session is open")]
    SessionNotOpen,

    #[error("A session is already open for subject {0}")]
    SessionAlreadyOpen(String),

    #[error("Storage failure on {}: {source}", .path.display())]
    StorageFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 同步后的记录：一次 Main 采样 + 当时最新的气体读数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedRecord {
    /// Main 采样时间戳（微秒）
    pub timestamp_us: u64,
    pub spo2: u8,
    pub heart_rate: u16,
    pub pulse_amplitude: u8,
    pub status: StatusSet,
    /// O2 浓度（%），`None` 表示不可用
    pub o2_pct: Option<f64>,
    /// CO2 浓度（%），`None` 表示不可用
    pub co2_pct: Option<f64>,
    /// 配对的气体读数时间戳
    pub gas_timestamp_us: Option<u64>,
    /// Severinghaus 估算值（不写入 CSV）
    pub estimated_spo2: Option<f64>,
    pub comment: String,
}

impl SyncedRecord {
    /// 由 Main 样本与（可选）气体读数组装
    pub fn new(main: &MainSample, gas: Option<&GasReading>) -> Self {
        Self {
            timestamp_us: main.timestamp_us,
            spo2: main.spo2,
            heart_rate: main.heart_rate,
            pulse_amplitude: main.pulse_amplitude,
            status: main.status,
            o2_pct: gas.map(|g| g.o2_pct),
            co2_pct: gas.map(|g| g.co2_pct),
            gas_timestamp_us: gas.map(|g| g.timestamp_us),
            estimated_spo2: None,
            comment: String::new(),
        }
    }

    pub fn has_gas(&self) -> bool {
        self.o2_pct.is_some() && self.co2_pct.is_some()
    }

    /// 格式化为一行 CSV（不含换行）
    pub fn to_csv_row(&self) -> String {
        [
            format_row_time(self.timestamp_us),
            self.spo2.to_string(),
            self.heart_rate.to_string(),
            self.pulse_amplitude.to_string(),
            self.status.to_string(),
            format_percent(self.o2_pct),
            format_percent(self.co2_pct),
            sanitize_comment(&self.comment),
        ]
        .join(FIELD_SEPARATOR)
    }
}

fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}", v),
        None => UNAVAILABLE.to_string(),
    }
}

/// 注释内的换行替换为空格
fn sanitize_comment(comment: &str) -> String {
    comment.replace(['\r', '\n'], " ")
}

/// 校验受试者编号（返回去除首尾空白后的编号）
pub fn validate_subject_id(subject_id: &str) -> Result<String, RecorderError> {
    let id = subject_id.trim();
    if id.is_empty() {
        return Err(RecorderError::InvalidMetadata(
            "subject id is empty".to_string(),
        ));
    }
    if id.chars().count() > MAX_SUBJECT_ID_LEN {
        return Err(RecorderError::InvalidMetadata(format!(
            "subject id longer than {} characters",
            MAX_SUBJECT_ID_LEN
        )));
    }
    if let Some(c) = id
        .chars()
        .find(|c| c.is_control() || matches!(*c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
    {
        return Err(RecorderError::InvalidMetadata(format!(
            "subject id contains forbidden character {:?}",
            c
        )));
    }
    Ok(id.to_string())
}

/// 会话文件名（不含后缀序号）
pub fn session_file_name(subject_id: &str, started_at: &DateTime<Local>) -> String {
    format!("Subject_{}_{}.csv", subject_id, format_file_time(started_at))
}

/// 记录器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// 输出目录（不存在时自动创建）
    pub log_dir: PathBuf,
    /// 每行写入后调用 `sync_data`
    pub sync_each_record: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("."),
            sync_each_record: true,
        }
    }
}

/// `open` 返回的会话信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub subject_id: String,
    pub started_at: DateTime<Local>,
}

impl SessionHandle {
    pub fn file_name(&self) -> String {
        session_file_name(&self.subject_id, &self.started_at)
    }
}

struct OpenSession {
    handle: SessionHandle,
    file: Option<(PathBuf, File)>,
    pending_comment: Option<String>,
    records: u64,
    failed: bool,
}

enum RecorderState {
    Idle,
    Open(OpenSession),
    Closed(PathBuf),
}

/// 会话记录器
///
/// 由同步线程独占；`append` 与 `close` 天然串行。
pub struct SessionRecorder {
    config: RecorderConfig,
    state: RecorderState,
}

impl SessionRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            state: RecorderState::Idle,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, RecorderState::Open(_))
    }

    /// 当前会话已写入的记录数
    pub fn record_count(&self) -> u64 {
        match &self.state {
            RecorderState::Open(session) => session.records,
            _ => 0,
        }
    }

    /// 当前会话文件路径（文件创建之后才有）
    pub fn current_path(&self) -> Option<&Path> {
        match &self.state {
            RecorderState::Open(session) => session.file.as_ref().map(|(path, _)| path.as_path()),
            RecorderState::Closed(path) => Some(path.as_path()),
            RecorderState::Idle => None,
        }
    }

    /// 开始会话（开始时间取当前本地时间）
    ///
    /// `comment` 标注在会话的第一条记录上。
    pub fn open(
        &mut self,
        subject_id: &str,
        comment: Option<&str>,
    ) -> Result<SessionHandle, RecorderError> {
        self.open_at(subject_id, comment, Local::now())
    }

    /// 以指定开始时间开始会话
    pub fn open_at(
        &mut self,
        subject_id: &str,
        comment: Option<&str>,
        started_at: DateTime<Local>,
    ) -> Result<SessionHandle, RecorderError> {
        if let RecorderState::Open(session) = &self.state {
            return Err(RecorderError::SessionAlreadyOpen(
                session.handle.subject_id.clone(),
            ));
        }

        let subject_id = validate_subject_id(subject_id)?;
        let handle = SessionHandle {
            subject_id,
            started_at,
        };

        info!(
            "Session opened: subject {}, file {}",
            handle.subject_id,
            handle.file_name()
        );

        self.state = RecorderState::Open(OpenSession {
            handle: handle.clone(),
            file: None,
            pending_comment: comment
                .map(sanitize_comment)
                .filter(|c| !c.trim().is_empty()),
            records: 0,
            failed: false,
        });
        Ok(handle)
    }

    /// 设置注释，标注在下一条写入的记录上
    pub fn set_comment(&mut self, comment: &str) -> Result<(), RecorderError> {
        match &mut self.state {
            RecorderState::Open(session) => {
                session.pending_comment = Some(sanitize_comment(comment));
                Ok(())
            },
            _ => Err(RecorderError::SessionNotOpen),
        }
    }

    /// 写入一条记录，返回实际落盘的记录（含注释）
    pub fn append(&mut self, mut record: SyncedRecord) -> Result<SyncedRecord, RecorderError> {
        let config = &self.config;
        let RecorderState::Open(session) = &mut self.state else {
            return Err(RecorderError::SessionNotOpen);
        };

        if session.failed {
            return Err(RecorderError::StorageFailure {
                path: planned_path(config, &session.handle),
                source: io::Error::other("session storage failed earlier"),
            });
        }

        if let Some(comment) = session.pending_comment.take() {
            if record.comment.is_empty() {
                record.comment = comment;
            }
        }

        let line = record.to_csv_row();
        let result = ensure_file(config, session).and_then(|(path, file)| {
            write_line(file, &line, config.sync_each_record)
                .map_err(|source| RecorderError::StorageFailure {
                    path: path.clone(),
                    source,
                })
        });

        if let Err(e) = result {
            error!("Session {} storage failure: {}", session.handle.subject_id, e);
            session.failed = true;
            return Err(e);
        }

        session.records += 1;
        Ok(record)
    }

    /// 结束会话，返回文件路径
    ///
    /// 幂等：重复调用返回同一路径，不重复写入。
    pub fn close(&mut self) -> Result<PathBuf, RecorderError> {
        let session = match std::mem::replace(&mut self.state, RecorderState::Idle) {
            RecorderState::Open(session) => session,
            RecorderState::Closed(path) => {
                self.state = RecorderState::Closed(path.clone());
                return Ok(path);
            },
            RecorderState::Idle => return Err(RecorderError::SessionNotOpen),
        };

        let mut session = session;
        let result = if session.failed {
            Ok(())
        } else {
            ensure_file(&self.config, &mut session).and_then(|(path, file)| {
                file.sync_all().map_err(|source| RecorderError::StorageFailure {
                    path: path.clone(),
                    source,
                })
            })
        };

        // 文件未能创建时不保留路径，再次 close 返回 SessionNotOpen
        let result = match result {
            Err(e) if session.file.is_none() => {
                error!("Session {} closed without a file: {}", session.handle.subject_id, e);
                return Err(e);
            },
            other => other,
        };

        let path = match &session.file {
            Some((path, _)) => path.clone(),
            None => planned_path(&self.config, &session.handle),
        };
        self.state = RecorderState::Closed(path.clone());

        info!(
            "Session closed: subject {}, {} records, {}",
            session.handle.subject_id,
            session.records,
            path.display()
        );

        result.map(|_| path)
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                error!("Failed to close session on drop: {}", e);
            }
        }
    }
}

fn planned_path(config: &RecorderConfig, handle: &SessionHandle) -> PathBuf {
    config.log_dir.join(handle.file_name())
}

/// 确保会话文件已创建（含表头），返回路径与文件句柄
fn ensure_file<'a>(
    config: &RecorderConfig,
    session: &'a mut OpenSession,
) -> Result<&'a mut (PathBuf, File), RecorderError> {
    if session.file.is_none() {
        let created = create_session_file(config, &session.handle)?;
        session.file = Some(created);
    }
    session
        .file
        .as_mut()
        .ok_or(RecorderError::SessionNotOpen)
}

fn create_session_file(
    config: &RecorderConfig,
    handle: &SessionHandle,
) -> Result<(PathBuf, File), RecorderError> {
    let failure = |path: &Path, source: io::Error| RecorderError::StorageFailure {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(&config.log_dir).map_err(|e| failure(&config.log_dir, e))?;

    let stem = format!(
        "Subject_{}_{}",
        handle.subject_id,
        format_file_time(&handle.started_at)
    );

    let mut suffix = 1u32;
    loop {
        let name = if suffix == 1 {
            format!("{}.csv", stem)
        } else {
            format!("{}_{}.csv", stem, suffix)
        };
        let path = config.log_dir.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                write_line(&mut file, CSV_HEADER, config.sync_each_record)
                    .map_err(|e| failure(&path, e))?;
                debug!("Created session file {}", path.display());
                return Ok((path, file));
            },
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                suffix += 1;
            },
            Err(e) => return Err(failure(&path, e)),
        }
    }
}

fn write_line(file: &mut File, line: &str, sync: bool) -> io::Result<()> {
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

// ============================================================================
// 会话文件回读
// ============================================================================

/// 会话文件解析错误
#[derive(Error, Debug)]
pub enum SessionLogError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("Unexpected header: {0:?}")]
    BadHeader(String),

    #[error("Line {line}: {reason}")]
    BadRow { line: usize, reason: String },
}

/// 回读得到的一行
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    /// 原始时间戳文本（本地时间）
    pub timestamp: String,
    pub spo2: u8,
    pub heart_rate: u16,
    pub pulse_amplitude: u8,
    pub status: StatusSet,
    /// 原始状态文本
    pub status_text: String,
    pub o2_pct: Option<f64>,
    pub co2_pct: Option<f64>,
    pub comment: String,
}

impl SessionRow {
    pub fn parse(line: &str, line_no: usize) -> Result<Self, SessionLogError> {
        let bad = |reason: String| SessionLogError::BadRow {
            line: line_no,
            reason,
        };

        let fields: Vec<&str> = line.splitn(COLUMN_COUNT, FIELD_SEPARATOR).collect();
        if fields.len() < COLUMN_COUNT - 1 {
            return Err(bad(format!(
                "expected {} columns, found {}",
                COLUMN_COUNT,
                fields.len()
            )));
        }

        let number = |index: usize, name: &str| -> Result<u64, SessionLogError> {
            fields[index]
                .trim()
                .parse::<u64>()
                .map_err(|e| bad(format!("{}: {}", name, e)))
        };

        let percent = |index: usize, name: &str| -> Result<Option<f64>, SessionLogError> {
            let text = fields[index].trim();
            if text == UNAVAILABLE {
                return Ok(None);
            }
            text.parse::<f64>()
                .map(Some)
                .map_err(|e| bad(format!("{}: {}", name, e)))
        };

        let status_text = fields[4].trim().to_string();
        let mut status = StatusSet::empty();
        for meaning in status_text.split("; ").filter(|m| !m.is_empty()) {
            let code = StatusCode::from_meaning(meaning)
                .ok_or_else(|| bad(format!("unknown status {:?}", meaning)))?;
            status.insert(code);
        }

        let spo2 = number(1, "spo2")?;
        let heart_rate = number(2, "heart_rate")?;
        let pulse_amplitude = number(3, "pulse_amplitude")?;

        Ok(Self {
            timestamp: fields[0].trim().to_string(),
            spo2: u8::try_from(spo2).map_err(|e| bad(format!("spo2: {}", e)))?,
            heart_rate: u16::try_from(heart_rate)
                .map_err(|e| bad(format!("heart_rate: {}", e)))?,
            pulse_amplitude: u8::try_from(pulse_amplitude)
                .map_err(|e| bad(format!("pulse_amplitude: {}", e)))?,
            status,
            status_text,
            o2_pct: percent(5, "o2")?,
            co2_pct: percent(6, "co2")?,
            comment: fields.get(7).map(|c| c.to_string()).unwrap_or_default(),
        })
    }

    /// 解析时间戳文本
    pub fn datetime(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, timestamp::ROW_TIME_FORMAT).ok()
    }
}

/// 已记录的会话文件
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLog {
    pub path: PathBuf,
    pub rows: Vec<SessionRow>,
}

impl SessionLog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionLogError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut lines = reader.lines();

        let header = lines.next().transpose()?.unwrap_or_default();
        if header.trim_end() != CSV_HEADER {
            return Err(SessionLogError::BadHeader(header));
        }

        let mut rows = Vec::new();
        for (index, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(SessionRow::parse(line.trim_end_matches('\r'), index + 2)?);
        }

        Ok(Self {
            path: path.to_path_buf(),
            rows,
        })
    }

    pub fn summary(&self) -> SessionSummary {
        let span = match (
            self.rows.first().and_then(SessionRow::datetime),
            self.rows.last().and_then(SessionRow::datetime),
        ) {
            (Some(first), Some(last)) => (last - first).to_std().ok(),
            _ => None,
        };

        SessionSummary {
            rows: self.rows.len(),
            first_timestamp: self.rows.first().map(|r| r.timestamp.clone()),
            last_timestamp: self.rows.last().map(|r| r.timestamp.clone()),
            span,
            spo2: Stat::collect(self.rows.iter().map(|r| r.spo2 as f64)),
            heart_rate: Stat::collect(self.rows.iter().map(|r| r.heart_rate as f64)),
            o2_pct: Stat::collect(self.rows.iter().filter_map(|r| r.o2_pct)),
            co2_pct: Stat::collect(self.rows.iter().filter_map(|r| r.co2_pct)),
            gas_unavailable: self.rows.iter().filter(|r| r.o2_pct.is_none()).count(),
            comments: self.rows.iter().filter(|r| !r.comment.is_empty()).count(),
        }
    }
}

/// 最小/平均/最大
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stat {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
    pub count: usize,
}

impl Stat {
    pub fn collect(values: impl Iterator<Item = f64>) -> Option<Self> {
        let mut stat: Option<Stat> = None;
        let mut sum = 0.0;
        for v in values {
            sum += v;
            stat = Some(match stat {
                None => Stat {
                    min: v,
                    mean: 0.0,
                    max: v,
                    count: 1,
                },
                Some(s) => Stat {
                    min: s.min.min(v),
                    max: s.max.max(v),
                    count: s.count + 1,
                    ..s
                },
            });
        }
        stat.map(|s| Stat {
            mean: sum / s.count as f64,
            ..s
        })
    }
}

/// 会话统计
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub rows: usize,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
    pub span: Option<Duration>,
    pub spo2: Option<Stat>,
    pub heart_rate: Option<Stat>,
    pub o2_pct: Option<Stat>,
    pub co2_pct: Option<Stat>,
    /// 气体不可用的行数
    pub gas_unavailable: usize,
    /// 带注释的行数
    pub comments: usize,
}
