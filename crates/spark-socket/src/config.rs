use crate::conn::StreamConn;
use crate::packet::CODEC_ID_JSON;
use std::time::Duration;

/// 读缓冲未配置时快速协议使用的默认读缓冲大小。
pub const DEFAULT_FAST_PROTO_READ_BUF_SIZE: usize = 1024 * 4;
/// 读缓冲被显式配置为 0 时快速协议使用的读缓冲大小。
pub const ZERO_READ_BUFFER_FAST_PROTO_READ_BUF_SIZE: usize = 1024 * 35;
/// 默认池化空闲实例上限。
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// 套接字绑定时使用的内核调优与协议配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把 keepalive、收发缓冲区等“每次绑定连接都要落地”的内核选项显式配置化，
///   避免调用方直接操作 `socket2` 或平台相关常量；
/// - 以值对象代替进程级可变全局量：每个 [`SocketFactory`](crate::SocketFactory) 持有自己的配置，
///   测试可各自构造互不干扰的工厂。
///
/// ## 体系定位（Architecture）
/// - 由 `SocketFactory::new` 接收并只读共享；
/// - `Socket` 在构造与每次 `reset` 时调用 [`SocketConfig::apply`]，配置变更只影响之后的绑定。
///
/// ## 核心逻辑（How）
/// - 所有内核选项均为 `Option`：`None` 表示沿用内核默认，`Some(0)` 是有意义的显式取值；
/// - `fast_proto_read_buf_size` 由读缓冲配置推导，每次调用 `with_read_buffer` 都会重算：
///   未配置为 4096，显式 0 为 35840，其余取读缓冲的一半。
///
/// ## 契约说明（What）
/// - `apply`：按能力探测结果尽力落地配置，能力缺失时静默跳过，设置失败只记录日志；
/// - **后置条件**：`apply` 从不让绑定失败。
///
/// ## 设计取舍与注意事项（Trade-offs）
/// - keepalive 周期仅在 keepalive 未被显式关闭时下发，与“关闭 keepalive 后周期无意义”一致；
/// - 缓冲区大小最终由内核裁剪（Linux 会翻倍并受 `rmem_max` 限制），读回值可能与配置不同。
#[derive(Clone, Debug)]
pub struct SocketConfig {
    keepalive: Option<bool>,
    keepalive_period: Option<Duration>,
    read_buffer: Option<usize>,
    write_buffer: Option<usize>,
    fast_proto_read_buf_size: usize,
    default_body_codec: u8,
    packet_size_limit: Option<usize>,
    pool_capacity: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketConfig {
    /// 创建默认配置：所有内核选项沿用系统默认值。
    pub const fn new() -> Self {
        Self {
            keepalive: None,
            keepalive_period: None,
            read_buffer: None,
            write_buffer: None,
            fast_proto_read_buf_size: derive_fast_proto_read_buf_size(None),
            default_body_codec: CODEC_ID_JSON,
            packet_size_limit: None,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }

    /// 显式开启或关闭 `SO_KEEPALIVE`；未调用时保持内核默认。
    pub fn with_keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = Some(keepalive);
        self
    }

    /// 设置 keepalive 探测周期，`None` 表示沿用内核默认。
    pub fn with_keepalive_period(mut self, period: Option<Duration>) -> Self {
        self.keepalive_period = period;
        self
    }

    /// 设置接收缓冲区大小，并重算快速协议读缓冲大小。
    pub fn with_read_buffer(mut self, bytes: Option<usize>) -> Self {
        self.read_buffer = bytes;
        self.fast_proto_read_buf_size = derive_fast_proto_read_buf_size(bytes);
        self
    }

    /// 设置发送缓冲区大小，`None` 表示沿用内核默认。
    pub fn with_write_buffer(mut self, bytes: Option<usize>) -> Self {
        self.write_buffer = bytes;
        self
    }

    /// 设置包未声明编解码器时填充的默认编解码器标识。
    pub fn with_default_body_codec(mut self, codec_id: u8) -> Self {
        self.default_body_codec = codec_id;
        self
    }

    /// 设置单帧大小上限，`None` 表示不限制。
    pub fn with_packet_size_limit(mut self, limit: Option<usize>) -> Self {
        self.packet_size_limit = limit;
        self
    }

    /// 设置池中最多缓存的空闲实例数。
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn keepalive(&self) -> Option<bool> {
        self.keepalive
    }

    pub fn keepalive_period(&self) -> Option<Duration> {
        self.keepalive_period
    }

    pub fn read_buffer(&self) -> Option<usize> {
        self.read_buffer
    }

    pub fn write_buffer(&self) -> Option<usize> {
        self.write_buffer
    }

    /// 快速协议内部读缓冲的推荐容量。
    pub fn fast_proto_read_buf_size(&self) -> usize {
        self.fast_proto_read_buf_size
    }

    pub fn default_body_codec(&self) -> u8 {
        self.default_body_codec
    }

    pub fn packet_size_limit(&self) -> Option<usize> {
        self.packet_size_limit
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool_capacity
    }

    /// 将内核调优尽力落地到刚绑定的连接上。
    pub(crate) fn apply(&self, conn: &dyn StreamConn) {
        if let Some(ctrl) = conn.keepalive_control() {
            if let Some(enabled) = self.keepalive {
                if let Err(err) = ctrl.set_keepalive(enabled) {
                    tracing::debug!(error = %err, enabled, "set keepalive failed");
                }
            }
            if let Some(period) = self.keepalive_period
                && self.keepalive.unwrap_or(true)
                && let Err(err) = ctrl.set_keepalive_period(period)
            {
                tracing::debug!(error = %err, ?period, "set keepalive period failed");
            }
        } else {
            tracing::trace!("connection has no keepalive control, skipped");
        }

        if let Some(ctrl) = conn.buffer_control() {
            if let Some(bytes) = self.read_buffer
                && let Err(err) = ctrl.set_read_buffer(bytes)
            {
                tracing::debug!(error = %err, bytes, "set read buffer failed");
            }
            if let Some(bytes) = self.write_buffer
                && let Err(err) = ctrl.set_write_buffer(bytes)
            {
                tracing::debug!(error = %err, bytes, "set write buffer failed");
            }
        } else {
            tracing::trace!("connection has no buffer control, skipped");
        }
    }
}

const fn derive_fast_proto_read_buf_size(read_buffer: Option<usize>) -> usize {
    match read_buffer {
        None => DEFAULT_FAST_PROTO_READ_BUF_SIZE,
        Some(0) => ZERO_READ_BUFFER_FAST_PROTO_READ_BUF_SIZE,
        Some(bytes) => bytes / 2,
    }
}
