//! 会话统计命令

use anyhow::{Context, Result};
use clap::Args;
use oxilog_tools::{SessionLog, SessionSummary, Stat};
use std::path::PathBuf;

/// 统计命令参数
#[derive(Args, Debug)]
pub struct SummaryCommand {
    /// 会话 CSV 文件
    pub file: PathBuf,
}

impl SummaryCommand {
    pub fn execute(&self) -> Result<()> {
        let log = SessionLog::load(&self.file)
            .with_context(|| format!("failed to read {}", self.file.display()))?;
        println!("{}", self.file.display());
        print!("{}", render(&log.summary()));
        Ok(())
    }
}

fn render_stat(name: &str, stat: Option<Stat>, unit: &str) -> String {
    match stat {
        Some(s) => format!(
            "  {:<6} min {:>6.1}{unit}  mean {:>6.1}{unit}  max {:>6.1}{unit}  (n={})\n",
            name, s.min, s.mean, s.max, s.count
        ),
        None => format!("  {:<6} no data\n", name),
    }
}

fn render(summary: &SessionSummary) -> String {
    let mut out = format!("  rows   {}\n", summary.rows);
    if let (Some(first), Some(last)) = (&summary.first_timestamp, &summary.last_timestamp) {
        out.push_str(&format!("  from   {}\n  to     {}\n", first, last));
    }
    if let Some(span) = summary.span {
        let secs = span.as_secs();
        out.push_str(&format!(
            "  span   {:02}:{:02}:{:02}\n",
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        ));
    }
    out.push_str(&render_stat("SpO2", summary.spo2, "%"));
    out.push_str(&render_stat("HR", summary.heart_rate, ""));
    out.push_str(&render_stat("O2", summary.o2_pct, "%"));
    out.push_str(&render_stat("CO2", summary.co2_pct, "%"));
    if summary.gas_unavailable > 0 {
        out.push_str(&format!("  gas unavailable in {} rows\n", summary.gas_unavailable));
    }
    out.push_str(&format!("  comments {}\n", summary.comments));
    out
}
