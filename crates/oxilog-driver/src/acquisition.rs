//! 采集运行时对外接口

use crate::config::AcquisitionConfig;
use crate::error::DriverError;
use crate::events::PipelineEvent;
use crate::metrics::AcquisitionMetrics;
use crate::pipeline::{Command, ReaderContext, SyncWorker, reader_loop};
use crate::sync::{SyncInput, Synchronizer};
use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use oxilog_protocol::{Channel, MainDecoder, SubDecoder};
use oxilog_serial::SerialTransport;
use oxilog_tools::{
    ConcentrationConverter, RecorderError, SessionHandle, SessionRecorder, SyncedRecord,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};

/// 命令通道容量
const COMMAND_CAPACITY: usize = 16;

/// 双通道采集
///
/// 持有两个读取线程和一个同步线程。展示层通过会话命令控制录制，
/// 通过 [`events`](Self::events) 接收记录与状态通知。
///
/// ```rust,no_run
/// use oxilog_driver::AcquisitionBuilder;
///
/// let mut acq = AcquisitionBuilder::new()
///     .main_port("/dev/ttyUSB0")
///     .sub_port("/dev/ttyUSB1")
///     .log_dir("sessions")
///     .build()?;
///
/// acq.start_session("P001", Some("baseline"))?;
/// for event in acq.events().iter().take(10) {
///     println!("{:?}", event);
/// }
/// let path = acq.stop_session()?;
/// println!("saved to {}", path.display());
/// # Ok::<(), oxilog_driver::DriverError>(())
/// ```
pub struct Acquisition {
    cmd_tx: Sender<Command>,
    event_rx: Receiver<PipelineEvent>,
    latest: Arc<ArcSwapOption<SyncedRecord>>,
    metrics: Arc<AcquisitionMetrics>,
    is_running: Arc<AtomicBool>,
    readers: Vec<JoinHandle<()>>,
    sync_thread: Option<JoinHandle<()>>,
    command_timeout: Duration,
}

impl Acquisition {
    /// 启动全部线程
    pub(crate) fn spawn(
        config: AcquisitionConfig,
        main: Box<dyn SerialTransport>,
        sub: Option<Box<dyn SerialTransport>>,
        converter: ConcentrationConverter,
    ) -> Result<Self, DriverError> {
        let pipeline = config.pipeline;
        let (cmd_tx, cmd_rx) = bounded(COMMAND_CAPACITY);
        let (event_tx, event_rx) = bounded(pipeline.event_capacity);
        let (data_tx, data_rx) = unbounded::<SyncInput>();

        let is_running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(AcquisitionMetrics::new());
        let latest = Arc::new(ArcSwapOption::empty());

        let mut acquisition = Self {
            cmd_tx,
            event_rx,
            latest: latest.clone(),
            metrics: metrics.clone(),
            is_running: is_running.clone(),
            readers: Vec::with_capacity(2),
            sync_thread: None,
            command_timeout: pipeline.command_timeout(),
        };

        let worker = SyncWorker::new(
            Synchronizer::new(config.sync_options()),
            SessionRecorder::new(config.recording.clone()),
            metrics.clone(),
            event_tx.clone(),
            latest,
        );
        let sync_data_rx = data_rx.clone();
        acquisition.sync_thread = Some(
            thread::Builder::new()
                .name("oxilog-sync".into())
                .spawn(move || worker.run(cmd_rx, sync_data_rx))
                .map_err(DriverError::Spawn)?,
        );
        // 同步线程之外不再持有接收端
        drop(data_rx);

        let context = |channel| ReaderContext {
            channel,
            config: pipeline,
            is_running: is_running.clone(),
            metrics: metrics.clone(),
            data_tx: data_tx.clone(),
            event_tx: event_tx.clone(),
        };

        let ctx = context(Channel::Main);
        acquisition.readers.push(
            thread::Builder::new()
                .name("oxilog-main".into())
                .spawn(move || reader_loop(main, MainDecoder::new(), ctx, SyncInput::Main))
                .map_err(DriverError::Spawn)?,
        );

        match sub {
            Some(sub) => {
                let ctx = context(Channel::Sub);
                acquisition.readers.push(
                    thread::Builder::new()
                        .name("oxilog-sub".into())
                        .spawn(move || {
                            reader_loop(sub, SubDecoder::new(), ctx, |sample| {
                                SyncInput::Gas(converter.convert(&sample))
                            })
                        })
                        .map_err(DriverError::Spawn)?,
                );
            },
            None => info!("Sub channel not configured, gas fields will be unavailable"),
        }

        info!("Acquisition started ({} reader threads)", acquisition.readers.len());
        Ok(acquisition)
    }

    /// 开始会话
    ///
    /// `comment` 标注在会话第一条记录上。`subject_id` 不合法时返回
    /// `InvalidMetadata`，已有会话时返回 `SessionAlreadyOpen`。
    pub fn start_session(
        &self,
        subject_id: &str,
        comment: Option<&str>,
    ) -> Result<SessionHandle, DriverError> {
        self.request(|reply| Command::Start {
            subject_id: subject_id.to_string(),
            comment: comment.map(str::to_string),
            reply,
        })
    }

    /// 设置注释，标注在下一条记录上
    pub fn set_comment(&self, text: &str) -> Result<(), DriverError> {
        self.request(|reply| Command::SetComment {
            text: text.to_string(),
            reply,
        })
    }

    /// 结束会话，返回会话文件路径
    ///
    /// 已排队的输入先被配对写入，然后才关闭文件。
    pub fn stop_session(&self) -> Result<PathBuf, DriverError> {
        self.request(|reply| Command::Stop { reply })
    }

    fn request<T>(
        &self,
        make: impl FnOnce(Sender<Result<T, RecorderError>>) -> Command,
    ) -> Result<T, DriverError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.cmd_tx
            .send_timeout(make(reply_tx), self.command_timeout)
            .map_err(|e| {
                if e.is_timeout() {
                    DriverError::Timeout
                } else {
                    DriverError::ChannelClosed
                }
            })?;

        match reply_rx.recv_timeout(self.command_timeout) {
            Ok(result) => result.map_err(DriverError::from),
            Err(e) if e.is_timeout() => Err(DriverError::Timeout),
            Err(_) => Err(DriverError::ChannelClosed),
        }
    }

    /// 事件接收端（可克隆，多个消费者竞争同一队列）
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.event_rx.clone()
    }

    /// 最近一条记录（无锁读取）
    pub fn latest_record(&self) -> Option<Arc<SyncedRecord>> {
        self.latest.load_full()
    }

    pub fn metrics(&self) -> &AcquisitionMetrics {
        &self.metrics
    }

    /// 运行标志
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// 停止所有线程
    ///
    /// 读取线程先退出，同步线程随后排空已排队的输入并关闭未结束的会话。
    /// 重复调用无副作用。
    pub fn shutdown(&mut self) {
        if self.sync_thread.is_none() {
            return;
        }

        // Release: 关闭前的写入对读取线程可见
        self.is_running.store(false, Ordering::Release);

        for handle in self.readers.drain(..) {
            let name = handle.thread().name().unwrap_or("reader").to_string();
            if handle.join().is_err() {
                error!("{} thread panicked", name);
            }
        }

        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(handle) = self.sync_thread.take()
            && handle.join().is_err()
        {
            error!("Sync thread panicked");
        }
        info!("Acquisition stopped");
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.shutdown();
    }
}
