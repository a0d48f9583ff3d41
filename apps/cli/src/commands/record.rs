//! 录制命令
//!
//! 打开两个串口，开始会话并实时打印记录。Ctrl+C 或时长到达时结束会话。
//! 录制期间标准输入的每一行作为注释标注在下一条记录上。

use super::config::load_config;
use anyhow::{Context, Result};
use clap::Args;
use crossbeam_channel::{Receiver, bounded, select};
use oxilog_driver::{Acquisition, AcquisitionBuilder, AcquisitionConfig, HoldPolicy, PipelineEvent};
use oxilog_tools::{SyncedRecord, format_row_time};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

/// 主循环检查退出条件的间隔
const TICK: Duration = Duration::from_millis(200);

/// 录制命令参数
#[derive(Args, Debug)]
pub struct RecordCommand {
    /// 受试者编号（用于文件名）
    #[arg(short, long)]
    pub subject: String,

    /// 会话注释（标注在第一条记录上）
    #[arg(short, long)]
    pub comment: Option<String>,

    /// Main 通道（血氧仪）串口（覆盖配置）
    #[arg(long)]
    pub main_port: Option<String>,

    /// Sub 通道（气体分析仪）串口（覆盖配置）
    #[arg(long)]
    pub sub_port: Option<String>,

    /// 两个通道的波特率（覆盖配置）
    #[arg(short, long)]
    pub baud_rate: Option<u32>,

    /// 会话文件目录（覆盖配置）
    #[arg(short, long)]
    pub log_dir: Option<PathBuf>,

    /// 配对读数最大滞后（毫秒）
    #[arg(long)]
    pub hold_timeout_ms: Option<u64>,

    /// 使用节拍区间均值而不是最新读数
    #[arg(long)]
    pub mean: bool,

    /// 录制时长（秒），0 表示直到 Ctrl+C
    #[arg(short, long, default_value_t = 0)]
    pub duration: u64,

    /// 以 JSON 行输出记录
    #[arg(long)]
    pub json: bool,
}

impl RecordCommand {
    /// 命令行参数覆盖配置文件
    pub fn apply_overrides(&self, mut config: AcquisitionConfig) -> AcquisitionConfig {
        if let Some(port) = &self.main_port {
            config.main.port = Some(port.clone());
        }
        if let Some(port) = &self.sub_port {
            config.sub.port = Some(port.clone());
        }
        if let Some(baud_rate) = self.baud_rate {
            config.main.baud_rate = baud_rate;
            config.sub.baud_rate = baud_rate;
        }
        if let Some(dir) = &self.log_dir {
            config.recording.log_dir = dir.clone();
        }
        if let Some(ms) = self.hold_timeout_ms {
            config.sync.hold_timeout_ms = Some(ms);
        }
        if self.mean {
            config.sync.policy = HoldPolicy::Mean;
        }
        config
    }

    /// 执行录制
    pub fn execute(&self, config_path: Option<&Path>) -> Result<()> {
        let (_, config) = load_config(config_path)?;
        let config = self.apply_overrides(config);

        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        ctrlc::set_handler(move || {
            r.store(false, Ordering::SeqCst);
        })?;

        eprintln!(
            "⏳ Opening main={} sub={}",
            config.main.port.as_deref().unwrap_or("-"),
            config.sub.port.as_deref().unwrap_or("-")
        );
        let mut acq = AcquisitionBuilder::from_config(config)
            .build()
            .context("failed to start acquisition")?;
        let events = acq.events();

        let handle = acq.start_session(&self.subject, self.comment.as_deref())?;
        eprintln!(
            "✅ Recording subject {} → {} (Ctrl+C to stop, type a line to add a comment)",
            handle.subject_id,
            handle.file_name()
        );

        let comments = spawn_stdin_reader();
        let result = self.run_loop(&acq, &events, &comments, &running);

        let stopped = acq.stop_session();
        for event in events.try_iter() {
            self.print_event(&event)?;
        }
        let snapshot = acq.metrics().snapshot();
        acq.shutdown();

        result?;
        let path = stopped?;
        eprintln!("💾 Saved {} records to {}", snapshot.records_persisted, path.display());
        eprintln!(
            "   main: {} frames, {} corrupt | sub: {} frames, {} corrupt ({:.2}%)",
            snapshot.main.frames_decoded,
            snapshot.main.corrupt_frames,
            snapshot.sub.frames_decoded,
            snapshot.sub.corrupt_frames,
            snapshot.sub.corrupt_rate()
        );
        if snapshot.events_dropped > 0 {
            warn!("{} events dropped while printing", snapshot.events_dropped);
        }
        Ok(())
    }

    fn run_loop(
        &self,
        acq: &Acquisition,
        events: &Receiver<PipelineEvent>,
        comments: &Receiver<String>,
        running: &AtomicBool,
    ) -> Result<()> {
        let deadline = (self.duration > 0)
            .then(|| Instant::now() + Duration::from_secs(self.duration));
        let mut stdin_open = true;

        while running.load(Ordering::SeqCst) {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                eprintln!("⏱️  Duration reached");
                break;
            }

            let comment_rx = if stdin_open {
                comments.clone()
            } else {
                crossbeam_channel::never()
            };
            select! {
                recv(events) -> event => match event {
                    Ok(event) => self.print_event(&event)?,
                    Err(_) => break,
                },
                recv(comment_rx) -> line => match line {
                    Ok(text) => {
                        acq.set_comment(&text)?;
                        eprintln!("📝 Comment queued: {}", text);
                    },
                    // 标准输入结束
                    Err(_) => stdin_open = false,
                },
                default(TICK) => {},
            }
        }
        Ok(())
    }

    fn print_event(&self, event: &PipelineEvent) -> Result<()> {
        match event {
            PipelineEvent::Record(record) if self.json => {
                println!("{}", serde_json::to_string(record)?);
            },
            PipelineEvent::Record(record) => println!("{}", format_record(record)),
            PipelineEvent::SessionOpened { .. } | PipelineEvent::SessionClosed { .. } => {},
            PipelineEvent::ChannelDisconnected { channel, port } => {
                eprintln!("⚠️  {} channel disconnected ({}), retrying...", channel, port);
            },
            PipelineEvent::ChannelReconnected { channel, port } => {
                eprintln!("✅ {} channel reconnected ({})", channel, port);
            },
            PipelineEvent::SessionStalled => {
                eprintln!("⚠️  Main channel lost, no records until it returns");
            },
            PipelineEvent::StorageFailed { message } => {
                eprintln!("❌ Recording to disk failed: {}", message);
            },
        }
        Ok(())
    }
}

/// 终端显示格式
fn format_record(record: &SyncedRecord) -> String {
    let gas = match (record.o2_pct, record.co2_pct) {
        (Some(o2), Some(co2)) => format!("O2 {:>5.1}%  CO2 {:>4.1}%", o2, co2),
        _ => "O2   N/A   CO2  N/A ".to_string(),
    };
    let estimate = record
        .estimated_spo2
        .map(|v| format!("  est {:.1}%", v))
        .unwrap_or_default();
    let status = if record.status.is_empty() {
        String::new()
    } else {
        format!("  [{}]", record.status)
    };
    let comment = if record.comment.is_empty() {
        String::new()
    } else {
        format!("  \"{}\"", record.comment)
    };

    format!(
        "{}  SpO2 {:>3}%  HR {:>3}  PA {:>3}  {}{}{}{}",
        format_row_time(record.timestamp_us),
        record.spo2,
        record.heart_rate,
        record.pulse_amplitude,
        gas,
        estimate,
        status,
        comment
    )
}

/// 标准输入读取线程（阻塞读，进程退出时随之结束）
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = bounded(16);
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let text = line.trim().to_string();
            if text.is_empty() {
                continue;
            }
            if tx.send(text).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxilog_protocol::{MainSample, StatusCode, StatusSet};
    use oxilog_tools::GasReading;

    fn command() -> RecordCommand {
        RecordCommand {
            subject: "P001".to_string(),
            comment: None,
            main_port: Some("COM3".to_string()),
            sub_port: None,
            baud_rate: Some(9600),
            log_dir: Some(PathBuf::from("out")),
            hold_timeout_ms: Some(3000),
            mean: true,
            duration: 10,
            json: false,
        }
    }

    fn record(gas: bool) -> SyncedRecord {
        let mut status = StatusSet::empty();
        status.insert(StatusCode::AlarmOff);
        let main = MainSample {
            timestamp_us: 1_700_000_000_000_000,
            spo2: 98,
            heart_rate: 72,
            pulse_amplitude: 45,
            status,
        };
        let reading = GasReading {
            timestamp_us: main.timestamp_us,
            o2_pct: 21.0,
            co2_pct: 4.5,
        };
        SyncedRecord::new(&main, gas.then_some(&reading))
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let mut config = AcquisitionConfig::default();
        config.sub.port = Some("COM4".to_string());

        let config = command().apply_overrides(config);
        assert_eq!(config.main.port.as_deref(), Some("COM3"));
        assert_eq!(config.sub.port.as_deref(), Some("COM4"));
        assert_eq!(config.main.baud_rate, 9600);
        assert_eq!(config.sub.baud_rate, 9600);
        assert_eq!(config.recording.log_dir, PathBuf::from("out"));
        assert_eq!(config.sync.hold_timeout_ms, Some(3000));
        assert_eq!(config.sync.policy, HoldPolicy::Mean);
    }

    #[test]
    fn test_format_record() {
        let text = format_record(&record(true));
        assert!(text.contains("SpO2  98%"));
        assert!(text.contains("O2  21.0%  CO2  4.5%"));
        assert!(text.contains("[Alarm off]"));

        let mut r = record(false);
        r.comment = "mask on".to_string();
        let text = format_record(&r);
        assert!(text.contains("N/A"));
        assert!(text.ends_with("\"mask on\""));
    }

    #[test]
    fn test_json_record() {
        let json = serde_json::to_value(record(true)).unwrap();
        assert_eq!(json["spo2"], 98);
        assert_eq!(json["o2_pct"], 21.0);
    }
}
