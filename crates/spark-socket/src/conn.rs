use socket2::{SockRef, TcpKeepalive};
use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    time::{Duration, Instant},
};

/// 面向字节流的连接契约，套接字层只通过它访问底层传输。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“读、写、关闭、地址、截止时间”收敛为一个对象安全的 trait，
///   使 TCP、内存管道或测试桩都能被 [`Socket`](crate::Socket) 统一包装；
/// - 所有方法只借用 `&self`，多个线程可以同时读写同一连接，与协议的流水线需求一致。
///
/// ## 契约说明（What）
/// - `read`/`write`：执行一次 IO，语义与 [`std::io::Read`]/[`std::io::Write`] 相同；
/// - `close`：关闭连接，**必须**唤醒其他线程上阻塞中的读写并使其返回错误；
/// - `set_*deadline`：`None` 表示取消超时；截止时间作用于之后的所有读写；
/// - `keepalive_control`/`buffer_control`：可选能力探测，默认返回 `None`。
///
/// ## 风险提示（Trade-offs）
/// - 标准库的超时是相对时长，实现需要在设置时把绝对截止时间换算为剩余时长；
///   因此截止时间只在设置时刻生效一次，长时间阻塞的调用不会随时间重新计算。
pub trait StreamConn: Send + Sync + 'static {
    /// 从连接读取数据。
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// 向连接写入数据。
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// 关闭连接，唤醒阻塞中的读写。
    fn close(&self) -> io::Result<()>;

    /// 本地地址。
    fn local_addr(&self) -> Option<SocketAddr>;

    /// 对端地址。
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// 同时设置读写截止时间。
    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.set_read_deadline(deadline)?;
        self.set_write_deadline(deadline)
    }

    /// 设置读截止时间。
    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    /// 设置写截止时间。
    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    /// keepalive 调优能力。
    fn keepalive_control(&self) -> Option<&dyn KeepAliveControl> {
        None
    }

    /// 收发缓冲区调优能力。
    fn buffer_control(&self) -> Option<&dyn BufferControl> {
        None
    }
}

/// 控制 TCP keepalive 的能力。
pub trait KeepAliveControl {
    /// 开启或关闭 `SO_KEEPALIVE`。
    fn set_keepalive(&self, enabled: bool) -> io::Result<()>;

    /// 设置 keepalive 探测周期。
    fn set_keepalive_period(&self, period: Duration) -> io::Result<()>;
}

/// 控制内核收发缓冲区大小的能力。
pub trait BufferControl {
    /// 设置 `SO_RCVBUF`。
    fn set_read_buffer(&self, bytes: usize) -> io::Result<()>;

    /// 设置 `SO_SNDBUF`。
    fn set_write_buffer(&self, bytes: usize) -> io::Result<()>;
}

impl StreamConn for TcpStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream: &TcpStream = self;
        Read::read(&mut stream, buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut stream: &TcpStream = self;
        Write::write(&mut stream, buf)
    }

    fn close(&self) -> io::Result<()> {
        // 对端已先行断开时 shutdown 会返回 NotConnected，此时连接已处于关闭状态。
        match self.shutdown(Shutdown::Both) {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.set_read_timeout(deadline.map(remaining_until))
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.set_write_timeout(deadline.map(remaining_until))
    }

    fn keepalive_control(&self) -> Option<&dyn KeepAliveControl> {
        Some(self)
    }

    fn buffer_control(&self) -> Option<&dyn BufferControl> {
        Some(self)
    }
}

impl KeepAliveControl for TcpStream {
    fn set_keepalive(&self, enabled: bool) -> io::Result<()> {
        SockRef::from(self).set_keepalive(enabled)
    }

    fn set_keepalive_period(&self, period: Duration) -> io::Result<()> {
        let keepalive = TcpKeepalive::new().with_time(period);
        SockRef::from(self).set_tcp_keepalive(&keepalive)
    }
}

impl BufferControl for TcpStream {
    fn set_read_buffer(&self, bytes: usize) -> io::Result<()> {
        SockRef::from(self).set_recv_buffer_size(bytes)
    }

    fn set_write_buffer(&self, bytes: usize) -> io::Result<()> {
        SockRef::from(self).set_send_buffer_size(bytes)
    }
}

/// 把绝对截止时间换算为标准库使用的相对超时。
///
/// 已过期的截止时间换算为 1ns，标准库拒绝零时长超时。
pub(crate) fn remaining_until(deadline: Instant) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .max(Duration::from_nanos(1))
}
