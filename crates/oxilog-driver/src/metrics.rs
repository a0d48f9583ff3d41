//! 采集链路指标
//!
//! 所有计数器都使用原子操作，可以在任何线程安全地读取，不会引入锁竞争。

use oxilog_protocol::{Channel, DecoderStats};
use std::sync::atomic::{AtomicU64, Ordering};

/// 单通道计数器
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    /// 收到的总字节数
    pub bytes_received: AtomicU64,
    /// 成功解码的帧数
    pub frames_decoded: AtomicU64,
    /// 坏帧数（校验/结构错误）
    pub corrupt_frames: AtomicU64,
    /// 对齐与重同步丢弃的字节数
    pub discarded_bytes: AtomicU64,
    /// 断线次数
    pub disconnects: AtomicU64,
    /// 重连成功次数
    pub reconnects: AtomicU64,
}

impl ChannelMetrics {
    /// 以解码器的累计计数覆盖
    pub(crate) fn record_decoder(&self, stats: &DecoderStats) {
        self.bytes_received
            .store(stats.bytes_received, Ordering::Relaxed);
        self.frames_decoded
            .store(stats.frames_decoded, Ordering::Relaxed);
        self.corrupt_frames
            .store(stats.corrupt_frames, Ordering::Relaxed);
        self.discarded_bytes
            .store(stats.discarded_bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            corrupt_frames: self.corrupt_frames.load(Ordering::Relaxed),
            discarded_bytes: self.discarded_bytes.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// 采集运行时指标
///
/// ```rust
/// use oxilog_driver::AcquisitionMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = AcquisitionMetrics::default();
/// metrics.records_emitted.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().records_emitted, 1);
/// ```
#[derive(Debug, Default)]
pub struct AcquisitionMetrics {
    pub main: ChannelMetrics,
    pub sub: ChannelMetrics,
    /// 同步器输出的记录数
    pub records_emitted: AtomicU64,
    /// 成功写入文件的记录数
    pub records_persisted: AtomicU64,
    /// 事件通道满而丢弃的事件数
    pub events_dropped: AtomicU64,
}

impl AcquisitionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self, channel: Channel) -> &ChannelMetrics {
        match channel {
            Channel::Main => &self.main,
            Channel::Sub => &self.sub,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            main: self.main.snapshot(),
            sub: self.sub.snapshot(),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            records_persisted: self.records_persisted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// 单通道快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub bytes_received: u64,
    pub frames_decoded: u64,
    pub corrupt_frames: u64,
    pub discarded_bytes: u64,
    pub disconnects: u64,
    pub reconnects: u64,
}

impl ChannelSnapshot {
    /// 坏帧率（百分比），没有帧时为 0
    pub fn corrupt_rate(&self) -> f64 {
        let total = self.frames_decoded + self.corrupt_frames;
        if total == 0 {
            return 0.0;
        }
        self.corrupt_frames as f64 / total as f64 * 100.0
    }
}

/// 指标快照（不可变）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub main: ChannelSnapshot,
    pub sub: ChannelSnapshot,
    pub records_emitted: u64,
    pub records_persisted: u64,
    pub events_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_decoder_overwrites() {
        let metrics = AcquisitionMetrics::new();
        let stats = DecoderStats {
            bytes_received: 60,
            frames_decoded: 9,
            corrupt_frames: 1,
            discarded_bytes: 6,
        };
        metrics.channel(Channel::Sub).record_decoder(&stats);
        metrics.channel(Channel::Sub).record_decoder(&stats);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sub.frames_decoded, 9);
        assert_eq!(snapshot.sub.bytes_received, 60);
        assert_eq!(snapshot.main, ChannelSnapshot::default());
        assert!((snapshot.sub.corrupt_rate() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_corrupt_rate_empty() {
        assert_eq!(ChannelSnapshot::default().corrupt_rate(), 0.0);
    }
}
