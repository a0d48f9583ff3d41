//! 推送给展示层的事件

use crate::metrics::AcquisitionMetrics;
use crossbeam_channel::{Sender, TrySendError};
use oxilog_protocol::Channel;
use oxilog_tools::SyncedRecord;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::trace;

/// 管线事件
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// 会话开始
    SessionOpened {
        subject_id: String,
        file_name: String,
    },
    /// 新记录（已交给记录器）
    Record(SyncedRecord),
    /// 会话结束
    SessionClosed { path: PathBuf, records: u64 },
    /// 通道断开
    ChannelDisconnected { channel: Channel, port: String },
    /// 通道恢复
    ChannelReconnected { channel: Channel, port: String },
    /// 会话进行中 Main 通道丢失，记录输出暂停（会话不自动关闭）
    SessionStalled,
    /// 会话文件写入失败，之后的记录不再落盘
    StorageFailed { message: String },
}

/// 非阻塞投递；通道满时计数并丢弃
pub(crate) fn publish(tx: &Sender<PipelineEvent>, metrics: &AcquisitionMetrics, event: PipelineEvent) {
    match tx.try_send(event) {
        Ok(()) => {},
        Err(TrySendError::Full(_)) => {
            metrics.events_dropped.fetch_add(1, Ordering::Relaxed);
        },
        Err(TrySendError::Disconnected(_)) => {
            trace!("Event receiver dropped");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_publish_counts_overflow() {
        let (tx, rx) = bounded(1);
        let metrics = AcquisitionMetrics::new();

        publish(&tx, &metrics, PipelineEvent::SessionStalled);
        publish(&tx, &metrics, PipelineEvent::SessionStalled);
        assert_eq!(metrics.snapshot().events_dropped, 1);
        assert_eq!(rx.try_recv(), Ok(PipelineEvent::SessionStalled));

        drop(rx);
        publish(&tx, &metrics, PipelineEvent::SessionStalled);
        assert_eq!(metrics.snapshot().events_dropped, 1);
    }
}
