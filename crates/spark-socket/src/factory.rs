use crate::{
    config::SocketConfig,
    conn::StreamConn,
    pool::SocketPool,
    proto::{FastProto, ProtoFunc},
    socket::{Socket, SocketShared},
};
use std::sync::Arc;

/// 套接字工厂：持有配置、默认协议与实例池。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 以显式传入的工厂取代进程级全局配置与全局池：不同组件、不同测试可以各自持有
///   互不影响的工厂；
/// - 统一两条获取路径：`get_socket` 走池化复用，`new_socket` 构造独占的非池化实例。
///
/// ## 契约（What）
/// - 两种方式返回的实例均已绑定连接、构造协议并落地内核调优，行为除关闭后的去向外完全一致；
/// - `proto_func` 为 `None` 时使用工厂默认协议（缺省为 [`FastProto`]）；
/// - 工厂可廉价克隆，克隆体共享同一池。
#[derive(Clone)]
pub struct SocketFactory {
    shared: Arc<SocketShared>,
    pool: Arc<SocketPool>,
}

impl Default for SocketFactory {
    fn default() -> Self {
        Self::new(SocketConfig::new())
    }
}

impl SocketFactory {
    /// 以 [`FastProto`] 作为默认协议创建工厂。
    pub fn new(config: SocketConfig) -> Self {
        let default_proto = FastProto::factory(&config);
        Self::with_default_proto(config, default_proto)
    }

    /// 指定默认协议创建工厂。
    pub fn with_default_proto(config: SocketConfig, default_proto: ProtoFunc) -> Self {
        let pool = Arc::new(SocketPool::new(config.pool_capacity()));
        Self {
            shared: Arc::new(SocketShared {
                config,
                default_proto,
            }),
            pool,
        }
    }

    pub fn config(&self) -> &SocketConfig {
        &self.shared.config
    }

    pub fn pool(&self) -> &SocketPool {
        &self.pool
    }

    /// 从池中取出实例并绑定到 `conn`。
    pub fn get_socket(&self, conn: Arc<dyn StreamConn>, proto_func: Option<ProtoFunc>) -> Arc<Socket> {
        let socket = self.pool.checkout(&self.shared);
        socket.reset(conn, proto_func);
        socket
    }

    /// 构造绕过池的独占实例。
    pub fn new_socket(&self, conn: Arc<dyn StreamConn>, proto_func: Option<ProtoFunc>) -> Arc<Socket> {
        let socket = Arc::new(Socket::unbound(Arc::clone(&self.shared), None));
        socket.reset(conn, proto_func);
        socket
    }
}
