use crate::{
    config::SocketConfig,
    conn::StreamConn,
    error::{self, SocketError, describe, not_connected},
    metadata::Metadata,
    packet::{CODEC_ID_NONE, Packet},
    pool::SocketPool,
    proto::{Proto, ProtoFunc},
};
use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use std::{
    fmt,
    io::{self, Read, Write},
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicU8, Ordering},
    },
    time::Instant,
};

/// 关闭状态：连接正常可用。
const NORMAL: u8 = 0;
/// 关闭状态：本端已主动关闭（`close` 或 `reset` 进行中）。
const ACTIVE_CLOSED: u8 = 1;

/// 工厂级共享数据：每次绑定时读取的配置与默认协议。
pub(crate) struct SocketShared {
    pub(crate) config: SocketConfig,
    pub(crate) default_proto: ProtoFunc,
}

/// 连接与协议必须作为一个整体替换。
#[derive(Default)]
struct Binding {
    conn: Option<Arc<dyn StreamConn>>,
    proto: Option<Arc<dyn Proto>>,
}

/// 对单条字节流连接的并发安全包装。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 在原始连接之上补齐三件事：可热替换的分帧协议、实例池化复用、
///   能区分“主动关闭”与“意外故障”的幂等关闭；
/// - 作为 RPC/消息层之下的连接生命周期层，被多个线程同时驱动收发包。
///
/// ## 逻辑 (How)
/// - **生命周期锁**（`RwLock<Binding>`）：读锁只用来快照协议或连接引用，随即释放；
///   写锁仅在 `reset`/`close` 中持有，保证连接与协议成对替换；
/// - **标识锁**（`RwLock<String>`）：独立于生命周期锁，`id`/`set_id` 不与收发包竞争；
/// - **关闭状态**（`AtomicU8`）：无锁读取，`close` 快速路径与写路径错误映射均依赖它；
///   状态总是在关闭连接**之前**置为 `ACTIVE_CLOSED`；
/// - **公共数据**（`ArcSwapOption<Metadata>`）：首次访问时创建，归还池时整体丢弃。
///
/// ## 契约 (What)
/// - `write_packet`/`read_packet`：委托给当前协议，可与 `reset`/`close` 并发；
/// - `reset`：先关闭旧连接再取写锁，确保阻塞在旧连接上的 IO 立即返回；
/// - `close`：幂等；池化实例在完全解除绑定后归还所属池；
/// - **前置条件**：池化实例在 `close` 之前由调用方独占，`close` 之后不得再使用。
///
/// ## 注意事项 (Trade-offs)
/// - 写路径只要在关闭状态下失败就返回 [`SocketError::ProactivelyClosed`]，
///   即便真实原因是与关闭无关的非法帧；这是已知的不精确之处，为保持行为兼容而保留；
/// - `close` 与 `reset` 并发时可能直接返回而不关闭任何连接，见 [`Socket::close`]；
/// - 本层不提供任何重试与超时，超时完全依赖连接的截止时间。
pub struct Socket {
    binding: RwLock<Binding>,
    id: RwLock<String>,
    public: ArcSwapOption<Metadata>,
    state: AtomicU8,
    shared: Arc<SocketShared>,
    recycler: Option<Weak<SocketPool>>,
}

impl Socket {
    /// 构造未绑定连接的实例；`recycler` 仅由池在创建池化实例时提供。
    pub(crate) fn unbound(shared: Arc<SocketShared>, recycler: Option<Weak<SocketPool>>) -> Self {
        Self {
            binding: RwLock::new(Binding::default()),
            id: RwLock::new(String::new()),
            public: ArcSwapOption::empty(),
            state: AtomicU8::new(NORMAL),
            shared,
            recycler,
        }
    }

    /// 写出一个包。
    ///
    /// 包未声明 `body_codec` 时填充工厂配置的默认编解码器。
    pub fn write_packet(&self, packet: &mut Packet) -> Result<(), SocketError> {
        let proto = self.binding.read().proto.clone();
        if packet.body_codec() == CODEC_ID_NONE {
            packet.set_body_codec(self.shared.config.default_body_codec());
        }
        let Some(proto) = proto else {
            return Err(if self.is_active_closed() {
                SocketError::ProactivelyClosed
            } else {
                SocketError::Unbound
            });
        };
        match proto.pack(packet) {
            Ok(()) => Ok(()),
            Err(_) if self.is_active_closed() => Err(SocketError::ProactivelyClosed),
            Err(err) => {
                let err = SocketError::from(err);
                tracing::trace!(detail = %describe(error::WRITE_PACKET, &err), "write packet failed");
                Err(err)
            }
        }
    }

    /// 读取一个包。读路径的错误不做任何映射。
    pub fn read_packet(&self, packet: &mut Packet) -> Result<(), SocketError> {
        let proto = self.binding.read().proto.clone();
        let proto = proto.ok_or(SocketError::Unbound)?;
        proto.unpack(packet).map_err(|err| {
            let err = SocketError::from(err);
            tracing::trace!(detail = %describe(error::READ_PACKET, &err), "read packet failed");
            err
        })
    }

    /// 直接从连接读取原始字节。
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.conn()?.read(buf)
    }

    /// 直接向连接写入原始字节。
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.conn()?.write(buf)
    }

    /// 同时设置读写截止时间，`None` 表示不超时。
    pub fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.conn()?.set_deadline(deadline)
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.conn()?.set_read_deadline(deadline)
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.conn()?.set_write_deadline(deadline)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.binding.read().conn.as_ref()?.local_addr()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.binding.read().conn.as_ref()?.remote_addr()
    }

    /// 返回套接字标识；未设置时实时回落到对端地址。
    pub fn id(&self) -> String {
        {
            let id = self.id.read();
            if !id.is_empty() {
                return id.clone();
            }
        }
        // 先释放标识锁再读取连接：`reset` 持有生命周期写锁时会获取标识写锁。
        self.remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default()
    }

    pub fn set_id(&self, id: impl Into<String>) {
        *self.id.write() = id.into();
    }

    /// 返回连接级公共数据，首次访问时创建。
    pub fn public(&self) -> Arc<Metadata> {
        loop {
            if let Some(existing) = self.public.load_full() {
                return existing;
            }
            let fresh = Arc::new(Metadata::new());
            let previous = self
                .public
                .compare_and_swap(&None::<Arc<Metadata>>, Some(Arc::clone(&fresh)));
            if previous.is_none() {
                return fresh;
            }
        }
    }

    /// 公共数据条目数；从未创建时返回 0 且不会触发创建。
    pub fn public_len(&self) -> usize {
        match &*self.public.load() {
            Some(metadata) => metadata.len(),
            None => 0,
        }
    }

    /// 当前协议的标识，未绑定时为 `None`。
    pub fn protocol_version(&self) -> Option<(u8, &'static str)> {
        self.binding.read().proto.as_ref().map(|proto| proto.version())
    }

    /// 是否处于主动关闭状态。
    pub fn is_active_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE_CLOSED
    }

    /// 是否由池创建、关闭时归还池。
    pub fn is_pooled(&self) -> bool {
        self.recycler.is_some()
    }

    /// 重新绑定连接与协议。
    ///
    /// # 教案级注释
    ///
    /// ## 意图（Why）
    /// - 池化实例借此重新变为可用；非池化实例也可借此切换到新连接。
    ///
    /// ## 逻辑（How）
    /// 1. 立即置为 `ACTIVE_CLOSED` 并关闭旧连接（不等待写锁），阻塞在旧连接上的 IO 随即失败；
    /// 2. 获取生命周期写锁；
    /// 3. 安装新连接、清空标识、按 `proto_func`（缺省用工厂默认协议）构造新协议、
    ///    恢复 `NORMAL`，并对新连接落地内核调优；
    /// 4. 释放写锁。
    ///
    /// ## 契约（What）
    /// - 关闭旧连接失败只记录日志，重绑定总会完成；
    /// - 这是唯一能撤销 `ACTIVE_CLOSED` 的路径。
    pub fn reset(&self, conn: Arc<dyn StreamConn>, proto_func: Option<ProtoFunc>) {
        self.state.store(ACTIVE_CLOSED, Ordering::Release);
        let previous = self.binding.read().conn.clone();
        if let Some(previous) = previous
            && let Err(err) = previous.close()
        {
            tracing::debug!(error = %err, "close previous connection failed during reset");
        }

        let mut binding = self.binding.write();
        let factory = proto_func.unwrap_or_else(|| Arc::clone(&self.shared.default_proto));
        binding.proto = Some(factory(Arc::clone(&conn)));
        binding.conn = Some(Arc::clone(&conn));
        self.set_id(String::new());
        self.state.store(NORMAL, Ordering::Release);
        self.shared.config.apply(&*conn);
        drop(binding);

        tracing::debug!(
            remote = ?conn.remote_addr(),
            pooled = self.is_pooled(),
            "socket bound to connection"
        );
    }

    /// 关闭套接字。
    ///
    /// 重复调用直接返回 `Ok(())`。池化实例在解除连接、协议与公共数据后归还所属池；
    /// 返回值为底层连接的关闭结果，归还池本身不会失败。
    ///
    /// # 注意事项
    /// - 与 `reset` 并发时，`reset` 已先行置为 `ACTIVE_CLOSED`，`close` 会命中快速路径直接返回
    ///   `Ok(())` 而不关闭任何连接；`reset` 完成后套接字仍绑定在新连接上、处于可用状态。
    ///   需要确定关闭时，调用方应保证 `close` 与 `reset` 不并发。
    pub fn close(self: &Arc<Self>) -> Result<(), SocketError> {
        if self.is_active_closed() {
            return Ok(());
        }
        let mut binding = self.binding.write();
        if self.is_active_closed() {
            return Ok(());
        }
        self.state.store(ACTIVE_CLOSED, Ordering::Release);

        let result = match binding.conn.as_ref() {
            Some(conn) => conn.close(),
            None => Ok(()),
        };

        let pool = self.recycler.as_ref().map(Weak::upgrade);
        if pool.is_some() {
            binding.conn = None;
            binding.proto = None;
            self.public.store(None);
        }
        drop(binding);

        if let Some(pool) = pool.flatten() {
            pool.recycle(Arc::clone(self));
        }

        result.map_err(|err| {
            let err = SocketError::Io(err);
            tracing::debug!(detail = %describe(error::CLOSE, &err), "close connection failed");
            err
        })
    }

    fn conn(&self) -> io::Result<Arc<dyn StreamConn>> {
        self.binding.read().conn.clone().ok_or_else(not_connected)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id())
            .field("active_closed", &self.is_active_closed())
            .field("pooled", &self.is_pooled())
            .field("public_len", &self.public_len())
            .finish()
    }
}

impl Read for &Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Socket::read(*self, buf)
    }
}

impl Write for &Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Socket::write(*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
