//! 双通道流同步（Stream Synchronizer）
//!
//! Main 通道（~0.5 Hz）驱动时钟：每个 Main 样本到达时，取时间戳不晚于它的
//! 最新气体读数配对，输出一条 [`SyncedRecord`]。Sub 通道（~100 Hz）在每个
//! Main 节拍被降采样（last-value-hold），不会等待 Sub 通道。
//!
//! 本模块是纯状态机，不含线程；由同步线程独占调用。

use oxilog_protocol::{Channel, MainSample};
use oxilog_tools::{EnvironmentParams, GasReading, SyncedRecord, estimate_reading};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace};

/// 最多缓冲的气体读数（Main 停止时约 40 秒的 Sub 数据）
const MAX_BUFFERED_GAS: usize = 4096;

/// 降采样策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldPolicy {
    /// 取不晚于节拍的最新读数
    #[default]
    Latest,
    /// 取 (上一节拍, 当前节拍] 内读数的均值；区间内无读数时沿用上一次输出的均值
    Mean,
}

/// 同步器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// 无会话，输入被丢弃
    Idle,
    /// 会话进行中，正在配对
    Running,
}

/// 同步器输入
#[derive(Debug, Clone, PartialEq)]
pub enum SyncInput {
    Main(MainSample),
    Gas(GasReading),
    /// 通道断开
    LinkDown(Channel),
    /// 通道恢复
    LinkUp(Channel),
}

/// 同步器配置
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SyncOptions {
    pub policy: HoldPolicy,
    /// 配对读数允许的最大滞后；`None` 表示不限
    pub hold_timeout: Option<Duration>,
    /// 设置后为每条记录附加 SpO2 估算值
    pub environment: Option<EnvironmentParams>,
}

/// 流同步器
pub struct Synchronizer {
    options: SyncOptions,
    state: SyncState,
    /// 尚未被节拍消费的读数（按时间戳顺序）
    pending_gas: VecDeque<GasReading>,
    /// 最近一次被选中的读数
    held: Option<GasReading>,
    /// 最近一次输出的区间均值（`HoldPolicy::Mean`）
    last_mean: Option<GasReading>,
    last_tick_us: Option<u64>,
    last_record_us: u64,
    main_connected: bool,
    sub_connected: bool,
}

impl Synchronizer {
    pub fn new(options: SyncOptions) -> Self {
        Self {
            options,
            state: SyncState::Idle,
            pending_gas: VecDeque::new(),
            held: None,
            last_mean: None,
            last_tick_us: None,
            last_record_us: 0,
            main_connected: true,
            sub_connected: true,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn is_connected(&self, channel: Channel) -> bool {
        match channel {
            Channel::Main => self.main_connected,
            Channel::Sub => self.sub_connected,
        }
    }

    /// 会话开始：Idle → Running
    pub fn start(&mut self) {
        self.clear();
        self.state = SyncState::Running;
        debug!("Synchronizer running");
    }

    /// 会话结束：Running → Idle
    pub fn stop(&mut self) {
        self.clear();
        self.state = SyncState::Idle;
        debug!("Synchronizer idle");
    }

    fn clear(&mut self) {
        self.pending_gas.clear();
        self.held = None;
        self.last_mean = None;
        self.last_tick_us = None;
        self.last_record_us = 0;
    }

    /// 处理一条输入，Main 节拍时返回配对后的记录
    pub fn handle(&mut self, input: SyncInput) -> Option<SyncedRecord> {
        match input {
            SyncInput::Main(sample) => self.on_main(&sample),
            SyncInput::Gas(reading) => {
                self.on_gas(reading);
                None
            },
            SyncInput::LinkDown(channel) => {
                self.on_link(channel, false);
                None
            },
            SyncInput::LinkUp(channel) => {
                self.on_link(channel, true);
                None
            },
        }
    }

    pub fn on_gas(&mut self, reading: GasReading) {
        if self.state == SyncState::Idle {
            return;
        }
        if self.pending_gas.len() >= MAX_BUFFERED_GAS {
            // 缓冲满：最旧的读数直接成为保持值
            if let Some(dropped) = self.pending_gas.pop_front() {
                self.held = Some(dropped);
            }
        }
        match self.pending_gas.back() {
            Some(last) if last.timestamp_us > reading.timestamp_us => {
                let at = self
                    .pending_gas
                    .partition_point(|r| r.timestamp_us <= reading.timestamp_us);
                self.pending_gas.insert(at, reading);
            },
            _ => self.pending_gas.push_back(reading),
        }
    }

    pub fn on_link(&mut self, channel: Channel, connected: bool) {
        match channel {
            Channel::Main => self.main_connected = connected,
            Channel::Sub => {
                self.sub_connected = connected;
                if !connected {
                    self.pending_gas.clear();
                    self.held = None;
                    self.last_mean = None;
                }
            },
        }
    }

    pub fn on_main(&mut self, sample: &MainSample) -> Option<SyncedRecord> {
        if self.state == SyncState::Idle {
            return None;
        }

        let tick = sample.timestamp_us;
        let window_start = self.last_tick_us;
        let mut sum = (0.0, 0.0);
        let mut count = 0usize;

        while let Some(front) = self.pending_gas.front()
            && front.timestamp_us <= tick
        {
            let reading = *front;
            self.pending_gas.pop_front();
            if window_start.is_none_or(|start| reading.timestamp_us > start) {
                sum.0 += reading.o2_pct;
                sum.1 += reading.co2_pct;
                count += 1;
            }
            self.held = Some(reading);
        }

        let chosen = match (self.options.policy, self.held) {
            (HoldPolicy::Mean, Some(latest)) if count > 0 => {
                let mean = GasReading {
                    timestamp_us: latest.timestamp_us,
                    o2_pct: sum.0 / count as f64,
                    co2_pct: sum.1 / count as f64,
                };
                self.last_mean = Some(mean);
                Some(mean)
            },
            (HoldPolicy::Mean, held) => self.last_mean.or(held),
            (HoldPolicy::Latest, held) => held,
        };

        let gas = chosen.filter(|reading| match self.options.hold_timeout {
            Some(timeout) => {
                let age_us = tick.saturating_sub(reading.timestamp_us);
                age_us <= timeout.as_micros() as u64
            },
            None => true,
        });

        self.last_tick_us = Some(tick);

        let mut record = SyncedRecord::new(sample, gas.as_ref());
        record.timestamp_us = tick.max(self.last_record_us);
        self.last_record_us = record.timestamp_us;

        if let (Some(env), Some(reading)) = (self.options.environment.as_ref(), gas.as_ref()) {
            record.estimated_spo2 = Some(estimate_reading(env, reading));
        }

        trace!(
            "Tick {} paired with gas {:?} ({} readings in window)",
            tick, record.gas_timestamp_us, count
        );
        Some(record)
    }
}
