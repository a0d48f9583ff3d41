//! 脚本化 Mock 传输
//!
//! 传输本体交给读取线程，测试侧保留 [`MockHandle`] 推送字节、模拟断线与重连。

use crate::{SerialTransport, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct MockState {
    chunks: VecDeque<Vec<u8>>,
    connected: bool,
    allow_reconnect: bool,
    reconnects: u32,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock 串口
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockState>>,
}

/// Mock 串口的控制句柄
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// 创建一对（传输, 控制句柄），初始为已连接
    pub fn new(name: impl Into<String>) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            chunks: VecDeque::new(),
            connected: true,
            allow_reconnect: true,
            reconnects: 0,
        }));
        (
            Self {
                name: name.into(),
                state: state.clone(),
            },
            MockHandle { state },
        )
    }
}

impl SerialTransport for MockTransport {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(TransportError::Disconnected {
                port: self.name.clone(),
            });
        }

        let Some(mut chunk) = state.chunks.pop_front() else {
            return Ok(0);
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunk.drain(..n);
            state.chunks.push_front(chunk);
        }
        Ok(n)
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.allow_reconnect {
            return Err(TransportError::NotFound {
                port: self.name.clone(),
            });
        }
        state.connected = true;
        state.reconnects += 1;
        Ok(())
    }
}

impl MockHandle {
    /// 推送一次读取可得到的字节块
    pub fn push(&self, bytes: impl Into<Vec<u8>>) {
        lock(&self.state).chunks.push_back(bytes.into());
    }

    /// 模拟拔线：未读字节丢失，后续读取返回 `Disconnected`
    pub fn disconnect(&self) {
        let mut state = lock(&self.state);
        state.connected = false;
        state.chunks.clear();
    }

    /// 控制 `reconnect` 是否成功
    pub fn set_reconnectable(&self, allow: bool) {
        lock(&self.state).allow_reconnect = allow;
    }

    /// 尚未被读取的块数
    pub fn queued(&self) -> usize {
        lock(&self.state).chunks.len()
    }

    pub fn reconnects(&self) -> u32 {
        lock(&self.state).reconnects
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}
