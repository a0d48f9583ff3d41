//! 采集运行时
//!
//! 本 crate 把两个串口通道接成一条完整的采集管线：
//! - 每通道一个读取线程（独占传输与帧解码器）
//! - 流同步（Main 节拍驱动，Sub 读数 last-value-hold 降采样）
//! - 会话录制（同步线程独占 [`SessionRecorder`](oxilog_tools::SessionRecorder)）
//! - 事件推送（有界通道，满时丢弃并计数）
//! - 原子指标（任意线程无锁读取）
//!
//! # 使用场景
//!
//! 展示层（CLI 或 GUI）通过 [`AcquisitionBuilder`] 构造 [`Acquisition`]，
//! 发送会话命令并消费 [`PipelineEvent`]。

mod acquisition;
mod builder;
pub mod config;
mod error;
pub mod events;
pub mod metrics;
mod pipeline;
pub mod sync;

pub use acquisition::Acquisition;
pub use builder::AcquisitionBuilder;
pub use config::{AcquisitionConfig, ChannelConfig, ConfigError, PipelineConfig, SyncConfig};
pub use error::DriverError;
pub use events::PipelineEvent;
pub use metrics::{AcquisitionMetrics, ChannelMetrics, ChannelSnapshot, MetricsSnapshot};
pub use sync::{HoldPolicy, SyncInput, SyncOptions, SyncState, Synchronizer};

pub use oxilog_tools::{SessionHandle, SyncedRecord};
