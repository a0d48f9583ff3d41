//! 采集管线线程
//!
//! - 读取线程（每通道一个）：独占传输与解码器，非阻塞读取 → 解码 → 投递 [`SyncInput`]
//! - 同步线程：独占 [`Synchronizer`] 与 [`SessionRecorder`]，串行处理数据与会话命令

use crate::config::PipelineConfig;
use crate::events::{PipelineEvent, publish};
use crate::metrics::AcquisitionMetrics;
use crate::sync::{SyncInput, SyncState, Synchronizer};
use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, Sender, never, select};
use oxilog_protocol::{Channel, FrameCodec, FrameDecoder};
use oxilog_serial::{SerialTransport, TransportError};
use oxilog_tools::{RecorderError, SessionHandle, SessionRecorder, SyncedRecord, now_us};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// 会话命令（由 [`Acquisition`](crate::Acquisition) 发往同步线程）
#[derive(Debug)]
pub(crate) enum Command {
    Start {
        subject_id: String,
        comment: Option<String>,
        reply: Sender<Result<SessionHandle, RecorderError>>,
    },
    SetComment {
        text: String,
        reply: Sender<Result<(), RecorderError>>,
    },
    Stop {
        reply: Sender<Result<PathBuf, RecorderError>>,
    },
    Shutdown,
}

/// 读取线程共享的上下文
pub(crate) struct ReaderContext {
    pub channel: Channel,
    pub config: PipelineConfig,
    pub is_running: Arc<AtomicBool>,
    pub metrics: Arc<AcquisitionMetrics>,
    pub data_tx: Sender<SyncInput>,
    pub event_tx: Sender<PipelineEvent>,
}

impl ReaderContext {
    fn running(&self) -> bool {
        // Acquire: 看到 false 时，关闭前的写入都已可见
        self.is_running.load(Ordering::Acquire)
    }

    /// 分段睡眠，期间持续检查运行标志
    fn sleep_while_running(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        let step = self.config.poll_interval();
        while self.running() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(step.min(deadline - now));
        }
        false
    }
}

/// 读取线程主循环
///
/// # 参数
/// - `transport`: 本通道的串口（独占）
/// - `decoder`: 本通道的帧解码器（独占）
/// - `ctx`: 通道标识、配置、运行标志与输出通道
/// - `map`: 样本 → 同步器输入（Sub 通道在这里完成浓度换算）
pub(crate) fn reader_loop<T, C, F>(
    mut transport: T,
    mut decoder: FrameDecoder<C>,
    ctx: ReaderContext,
    mut map: F,
) where
    T: SerialTransport,
    C: FrameCodec,
    F: FnMut(C::Sample) -> SyncInput,
{
    let channel = ctx.channel;
    let port = transport.port_name().to_string();
    let channel_metrics = ctx.metrics.channel(channel);
    let mut buf = vec![0u8; ctx.config.read_buffer_size];

    info!("{} reader started on {}", channel, port);

    while ctx.running() {
        match transport.read_available(&mut buf) {
            Ok(0) => thread::sleep(ctx.config.poll_interval()),
            Ok(n) => {
                let arrival_us = now_us();
                let mut decoded = 0usize;
                for sample in decoder.feed(&buf[..n], arrival_us) {
                    decoded += 1;
                    if ctx.data_tx.send(map(sample)).is_err() {
                        trace!("{} reader: synchronizer gone, exiting", channel);
                        return;
                    }
                }
                channel_metrics.record_decoder(&decoder.stats());
                if decoded > 0 {
                    debug!("{} reader: {} frames from {} bytes", channel, decoded, n);
                }
            },
            Err(e) if e.is_disconnect() => {
                warn!("{} channel ({}) disconnected: {}", channel, port, e);
                channel_metrics.disconnects.fetch_add(1, Ordering::Relaxed);
                decoder.reset();
                let _ = ctx.data_tx.send(SyncInput::LinkDown(channel));
                publish(
                    &ctx.event_tx,
                    &ctx.metrics,
                    PipelineEvent::ChannelDisconnected {
                        channel,
                        port: port.clone(),
                    },
                );

                if !wait_for_reconnect(&mut transport, &ctx) {
                    break;
                }

                info!("{} channel ({}) reconnected", channel, port);
                channel_metrics.reconnects.fetch_add(1, Ordering::Relaxed);
                let _ = ctx.data_tx.send(SyncInput::LinkUp(channel));
                publish(
                    &ctx.event_tx,
                    &ctx.metrics,
                    PipelineEvent::ChannelReconnected {
                        channel,
                        port: port.clone(),
                    },
                );
            },
            Err(e) => {
                warn!("{} reader: transient read error: {}", channel, e);
                thread::sleep(ctx.config.poll_interval());
            },
        }
    }

    trace!("{} reader: loop exited", channel);
}

/// 按 `reconnect_interval` 重试，直到成功或关闭；关闭时返回 false
fn wait_for_reconnect<T: SerialTransport>(transport: &mut T, ctx: &ReaderContext) -> bool {
    let mut unsupported_logged = false;
    loop {
        if !ctx.sleep_while_running(ctx.config.reconnect_interval()) {
            return false;
        }
        match transport.reconnect() {
            Ok(()) => return true,
            Err(e @ TransportError::ReconnectUnsupported { .. }) => {
                if !unsupported_logged {
                    warn!("{} reader: {}", ctx.channel, e);
                    unsupported_logged = true;
                }
            },
            Err(e) => debug!("{} reader: reconnect failed: {}", ctx.channel, e),
        }
    }
}

/// 同步线程状态
pub(crate) struct SyncWorker {
    synchronizer: Synchronizer,
    recorder: SessionRecorder,
    metrics: Arc<AcquisitionMetrics>,
    event_tx: Sender<PipelineEvent>,
    latest: Arc<ArcSwapOption<SyncedRecord>>,
    /// 本会话是否已上报过存储失败
    storage_failed: bool,
}

impl SyncWorker {
    pub(crate) fn new(
        synchronizer: Synchronizer,
        recorder: SessionRecorder,
        metrics: Arc<AcquisitionMetrics>,
        event_tx: Sender<PipelineEvent>,
        latest: Arc<ArcSwapOption<SyncedRecord>>,
    ) -> Self {
        Self {
            synchronizer,
            recorder,
            metrics,
            event_tx,
            latest,
            storage_failed: false,
        }
    }

    /// 同步线程主循环
    ///
    /// 收到 `Shutdown` 或命令通道断开时退出；退出前排空数据并关闭会话。
    pub(crate) fn run(mut self, cmd_rx: Receiver<Command>, data_rx: Receiver<SyncInput>) {
        let mut readers_alive = true;

        loop {
            let live_rx = if readers_alive {
                data_rx.clone()
            } else {
                never()
            };
            select! {
                recv(cmd_rx) -> cmd => match cmd {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(cmd) => self.handle_command(cmd, &data_rx),
                },
                recv(live_rx) -> input => match input {
                    Ok(input) => self.process(input),
                    // 所有读取线程都已退出
                    Err(_) => readers_alive = false,
                },
            }
        }

        self.drain(&data_rx);
        if self.recorder.is_open() {
            let _ = self.close_session();
        }
        trace!("Sync thread: loop exited");
    }

    fn handle_command(&mut self, cmd: Command, data_rx: &Receiver<SyncInput>) {
        // 命令之前已排队的输入先处理完
        self.drain(data_rx);

        match cmd {
            Command::Start {
                subject_id,
                comment,
                reply,
            } => {
                let result = self.open_session(&subject_id, comment.as_deref());
                let _ = reply.send(result);
            },
            Command::SetComment { text, reply } => {
                let _ = reply.send(self.recorder.set_comment(&text));
            },
            Command::Stop { reply } => {
                let _ = reply.send(self.close_session());
            },
            Command::Shutdown => {},
        }
    }

    fn drain(&mut self, data_rx: &Receiver<SyncInput>) {
        while let Ok(input) = data_rx.try_recv() {
            self.process(input);
        }
    }

    fn open_session(
        &mut self,
        subject_id: &str,
        comment: Option<&str>,
    ) -> Result<SessionHandle, RecorderError> {
        let handle = self.recorder.open(subject_id, comment)?;
        self.synchronizer.start();
        self.storage_failed = false;

        self.emit(PipelineEvent::SessionOpened {
            subject_id: handle.subject_id.clone(),
            file_name: handle.file_name(),
        });
        if !self.synchronizer.is_connected(Channel::Main) {
            self.emit(PipelineEvent::SessionStalled);
        }
        Ok(handle)
    }

    fn close_session(&mut self) -> Result<PathBuf, RecorderError> {
        let was_open = self.recorder.is_open();
        let records = self.recorder.record_count();
        let result = self.recorder.close();
        self.synchronizer.stop();

        match &result {
            Ok(path) if was_open => {
                info!("Session closed: {} ({} records)", path.display(), records);
                self.emit(PipelineEvent::SessionClosed {
                    path: path.clone(),
                    records,
                });
            },
            Ok(_) => {},
            Err(e) => warn!("Stop rejected: {}", e),
        }
        result
    }

    fn process(&mut self, input: SyncInput) {
        let main_lost = matches!(input, SyncInput::LinkDown(Channel::Main));

        let Some(record) = self.synchronizer.handle(input) else {
            if main_lost && self.synchronizer.state() == SyncState::Running {
                warn!("Main channel lost, session stalled");
                self.emit(PipelineEvent::SessionStalled);
            }
            return;
        };
        self.metrics.records_emitted.fetch_add(1, Ordering::Relaxed);

        let record = match self.recorder.append(record.clone()) {
            Ok(persisted) => {
                self.metrics
                    .records_persisted
                    .fetch_add(1, Ordering::Relaxed);
                persisted
            },
            Err(e) => {
                if !self.storage_failed {
                    error!("Recording failed: {}", e);
                    self.storage_failed = true;
                    self.emit(PipelineEvent::StorageFailed {
                        message: e.to_string(),
                    });
                }
                record
            },
        };

        self.latest.store(Some(Arc::new(record.clone())));
        self.emit(PipelineEvent::Record(record));
    }

    fn emit(&self, event: PipelineEvent) {
        publish(&self.event_tx, &self.metrics, event);
    }
}
