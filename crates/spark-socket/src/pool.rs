use crate::socket::{Socket, SocketShared};
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// `SocketPool` 基于自由链表复用 [`Socket`] 实例，减少高频建连/断连场景下的分配。
///
/// # 模块角色（Why）
/// - 作为 [`SocketFactory::get_socket`](crate::SocketFactory::get_socket) 的实例来源；
/// - 池化实例持有指向本池的弱引用作为“归还凭证”，`close` 时据此回到自由链表；
///   非池化实例没有该凭证，关闭后直接随最后一个引用释放。
///
/// # 核心机制（How）
/// - 内部维护 `parking_lot::Mutex<Vec<Arc<Socket>>>` 作为自由链表，取出时优先复用；
/// - `PoolMetrics` 以原子计数跟踪创建、复用、归还与丢弃次数，支撑 [`SocketPool::stats`] 快照；
/// - 空闲实例数达到 `capacity` 后，新归还的实例直接丢弃。
///
/// # 契约说明（What）
/// - **前置条件**：归还的实例已经解除连接、协议与公共数据的引用（由 `Socket::close` 保证）；
/// - **后置条件**：`checkout` 返回的实例尚未绑定连接，调用方需立即 `reset`。
///
/// # 设计权衡（Trade-offs）
/// - 使用全局互斥锁保护自由链表，临界区只有一次 `push`/`pop`；
/// - 池不感知调用方是否仍持有已归还实例的克隆，这一点依赖“关闭后不再使用”的约定。
pub struct SocketPool {
    free_list: Mutex<Vec<Arc<Socket>>>,
    capacity: usize,
    metrics: PoolMetrics,
}

/// 池统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 当前空闲实例数。
    pub idle: usize,
    /// 累计新建的池化实例数。
    pub created: usize,
    /// 累计从自由链表复用的次数。
    pub reused: usize,
    /// 累计归还到自由链表的次数。
    pub recycled: usize,
    /// 因容量已满而丢弃的次数。
    pub discarded: usize,
}

impl SocketPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            free_list: Mutex::new(Vec::new()),
            capacity,
            metrics: PoolMetrics::default(),
        }
    }

    /// 取出一个空闲实例，链表为空时新建池化实例。
    pub(crate) fn checkout(self: &Arc<Self>, shared: &Arc<SocketShared>) -> Arc<Socket> {
        let reused = self.free_list.lock().pop();
        match reused {
            Some(socket) => {
                self.metrics.reused.fetch_add(1, Ordering::Relaxed);
                socket
            }
            None => {
                self.metrics.created.fetch_add(1, Ordering::Relaxed);
                Arc::new(Socket::unbound(
                    Arc::clone(shared),
                    Some(Arc::downgrade(self)),
                ))
            }
        }
    }

    /// 归还已解除绑定的实例。
    pub(crate) fn recycle(&self, socket: Arc<Socket>) {
        let mut list = self.free_list.lock();
        if list.len() >= self.capacity {
            drop(list);
            self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(capacity = self.capacity, "socket pool full, instance discarded");
            return;
        }
        list.push(socket);
        let idle = list.len();
        drop(list);
        self.metrics.recycled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(idle, "socket returned to pool");
    }

    /// 清空自由链表，返回释放的实例数。
    pub fn shrink_to_fit(&self) -> usize {
        let mut list = self.free_list.lock();
        let released = list.len();
        list.clear();
        released
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.free_list.lock().len(),
            created: self.metrics.created.load(Ordering::Relaxed),
            reused: self.metrics.reused.load(Ordering::Relaxed),
            recycled: self.metrics.recycled.load(Ordering::Relaxed),
            discarded: self.metrics.discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct PoolMetrics {
    created: AtomicUsize,
    reused: AtomicUsize,
    recycled: AtomicUsize,
    discarded: AtomicUsize,
}
