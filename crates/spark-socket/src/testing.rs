//! # testing 模块说明
//!
//! ## 角色定位（Why）
//! - 提供不依赖内核网络栈的内存连接 [`MemoryConn`]，让套接字层的并发、关闭与池化语义
//!   可以在单元测试和下游集成测试中确定性地复现；
//! - 通过 `test-util` feature 对外暴露，正式构建不会包含本模块。
//!
//! ## 行为约定（What）
//! - [`memory_pair`] 返回双向连通的两端，一端写入的字节按序出现在另一端；
//! - `close` 幂等，并唤醒本端所有阻塞中的读写：阻塞读返回 `ConnectionAborted`，
//!   阻塞写返回 `ConnectionAborted`；对端随后读到 EOF，写入得到 `BrokenPipe`；
//! - [`memory_pair_with_capacity`] 限制单向缓冲容量，写满后 `write` 会阻塞，
//!   用于构造“写阻塞期间被关闭”的竞态；
//! - 截止时间到期后读写返回 `TimedOut`，设置截止时间会唤醒阻塞中的调用以重新计时。
//!
//! ## 调优探针（How）
//! - 默认不暴露 keepalive/缓冲区能力，与不支持调优的传输一致；
//! - 调用 [`MemoryConn::enable_tuning_probe`] 后才暴露能力，并按调用顺序记录每次下发。

use crate::conn::{BufferControl, KeepAliveControl, StreamConn};
use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicU16, Ordering},
    },
    time::{Duration, Instant},
};

static NEXT_PORT: AtomicU16 = AtomicU16::new(20_000);

/// 探针记录的一次调优调用。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TuningCall {
    KeepAlive(bool),
    KeepAlivePeriod(Duration),
    ReadBuffer(usize),
    WriteBuffer(usize),
}

/// 可克隆的调优记录句柄。
#[derive(Clone, Debug, Default)]
pub struct TuningProbe {
    calls: Arc<Mutex<Vec<TuningCall>>>,
}

impl TuningProbe {
    /// 按调用顺序返回已记录的调优。
    pub fn calls(&self) -> Vec<TuningCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: TuningCall) {
        self.calls.lock().push(call);
    }
}

#[derive(Default)]
struct PipeState {
    buf: VecDeque<u8>,
    reader_closed: bool,
    writer_closed: bool,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

/// 单向字节管道，读端与写端各属于一个 [`MemoryConn`]。
struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
    writable: Condvar,
    capacity: Option<usize>,
}

impl Pipe {
    fn new(capacity: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PipeState::default()),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
        })
    }

    fn wake_all(&self) {
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

/// 内存连接的一端。
pub struct MemoryConn {
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
    local: SocketAddr,
    remote: SocketAddr,
    closed: AtomicBool,
    probe: OnceLock<TuningProbe>,
}

/// 创建一对不限容量的内存连接，地址为互不重复的回环端口。
pub fn memory_pair() -> (MemoryConn, MemoryConn) {
    let (a, b) = next_addrs();
    build_pair(None, a, b)
}

/// 创建单向缓冲容量受限的内存连接，写满后 `write` 阻塞。
pub fn memory_pair_with_capacity(capacity: usize) -> (MemoryConn, MemoryConn) {
    let (a, b) = next_addrs();
    build_pair(Some(capacity.max(1)), a, b)
}

/// 创建使用指定地址的内存连接；第一个返回值的本地地址为 `a`。
pub fn memory_pair_with_addrs(a: SocketAddr, b: SocketAddr) -> (MemoryConn, MemoryConn) {
    build_pair(None, a, b)
}

fn next_addrs() -> (SocketAddr, SocketAddr) {
    let port = NEXT_PORT.fetch_add(2, Ordering::Relaxed);
    let addr = |port| SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
    (addr(port), addr(port.wrapping_add(1)))
}

fn build_pair(capacity: Option<usize>, a: SocketAddr, b: SocketAddr) -> (MemoryConn, MemoryConn) {
    let a_to_b = Pipe::new(capacity);
    let b_to_a = Pipe::new(capacity);
    let left = MemoryConn::new(Arc::clone(&b_to_a), Arc::clone(&a_to_b), a, b);
    let right = MemoryConn::new(a_to_b, b_to_a, b, a);
    (left, right)
}

impl MemoryConn {
    fn new(inbound: Arc<Pipe>, outbound: Arc<Pipe>, local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            inbound,
            outbound,
            local,
            remote,
            closed: AtomicBool::new(false),
            probe: OnceLock::new(),
        }
    }

    /// 开启调优探针并返回记录句柄；重复调用返回同一份记录。
    pub fn enable_tuning_probe(&self) -> TuningProbe {
        self.probe.get_or_init(TuningProbe::default).clone()
    }

    /// 本端是否已被关闭。
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 读端尚未取走的字节数。
    pub fn pending_inbound(&self) -> usize {
        self.inbound.state.lock().buf.len()
    }

    fn record(&self, call: TuningCall) {
        if let Some(probe) = self.probe.get() {
            probe.record(call);
        }
    }
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "memory conn deadline exceeded")
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "memory conn closed")
}

impl StreamConn for MemoryConn {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let pipe = &self.inbound;
        let mut state = pipe.state.lock();
        loop {
            if state.reader_closed {
                return Err(aborted());
            }
            if !state.buf.is_empty() {
                let n = buf.len().min(state.buf.len());
                for (slot, byte) in buf.iter_mut().zip(state.buf.drain(..n)) {
                    *slot = byte;
                }
                pipe.writable.notify_all();
                return Ok(n);
            }
            if state.writer_closed {
                return Ok(0);
            }
            let deadline = state.read_deadline;
            match deadline {
                Some(deadline) if Instant::now() >= deadline => return Err(timed_out()),
                Some(deadline) => {
                    pipe.readable.wait_until(&mut state, deadline);
                }
                None => pipe.readable.wait(&mut state),
            }
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let pipe = &self.outbound;
        let mut state = pipe.state.lock();
        loop {
            if state.writer_closed {
                return Err(aborted());
            }
            if state.reader_closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"));
            }
            let room = match pipe.capacity {
                Some(capacity) => capacity.saturating_sub(state.buf.len()),
                None => buf.len(),
            };
            if room > 0 {
                let n = room.min(buf.len());
                state.buf.extend(&buf[..n]);
                pipe.readable.notify_all();
                return Ok(n);
            }
            let deadline = state.write_deadline;
            match deadline {
                Some(deadline) if Instant::now() >= deadline => return Err(timed_out()),
                Some(deadline) => {
                    pipe.writable.wait_until(&mut state, deadline);
                }
                None => pipe.writable.wait(&mut state),
            }
        }
    }

    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::Release);
        self.inbound.state.lock().reader_closed = true;
        self.inbound.wake_all();
        self.outbound.state.lock().writer_closed = true;
        self.outbound.wake_all();
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.inbound.state.lock().read_deadline = deadline;
        self.inbound.readable.notify_all();
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.outbound.state.lock().write_deadline = deadline;
        self.outbound.writable.notify_all();
        Ok(())
    }

    fn keepalive_control(&self) -> Option<&dyn KeepAliveControl> {
        self.probe.get().map(|_| self as &dyn KeepAliveControl)
    }

    fn buffer_control(&self) -> Option<&dyn BufferControl> {
        self.probe.get().map(|_| self as &dyn BufferControl)
    }
}

impl KeepAliveControl for MemoryConn {
    fn set_keepalive(&self, enabled: bool) -> io::Result<()> {
        self.record(TuningCall::KeepAlive(enabled));
        Ok(())
    }

    fn set_keepalive_period(&self, period: Duration) -> io::Result<()> {
        self.record(TuningCall::KeepAlivePeriod(period));
        Ok(())
    }
}

impl BufferControl for MemoryConn {
    fn set_read_buffer(&self, bytes: usize) -> io::Result<()> {
        self.record(TuningCall::ReadBuffer(bytes));
        Ok(())
    }

    fn set_write_buffer(&self, bytes: usize) -> io::Result<()> {
        self.record(TuningCall::WriteBuffer(bytes));
        Ok(())
    }
}
