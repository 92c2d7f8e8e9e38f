//! `spark-socket` 在原始字节流连接之上提供可热替换协议、可池化、可区分主动关闭的套接字包装。
//!
//! # 模块定位（Why）
//! - 为 RPC/消息层提供统一的连接生命周期层：多个线程同时收发包，连接可被关闭或替换，
//!   而“本端主动关闭”导致的写失败需要与真实的传输故障区分开；
//! - 高频建连/断连场景下通过实例池复用 [`Socket`]，降低分配开销。
//!
//! # 设计概要（How）
//! - `conn` 定义 [`StreamConn`] 连接契约与可选的调优能力，并为 `TcpStream` 实现；
//! - `proto` 定义 [`Proto`] 分帧契约与默认实现 [`FastProto`]；
//! - `socket` 实现 [`Socket`]：生命周期读写锁、独立的标识锁、无锁关闭状态三者配合；
//! - `pool` 与 `factory` 负责池化复用与实例获取，配置经由 [`SocketConfig`] 显式传入；
//! - `testing`（`test-util` feature）提供内存连接，便于下游编写确定性测试。
//!
//! # 使用示例
//! ```no_run
//! use spark_socket::{Packet, SocketConfig, SocketFactory};
//! use std::{net::TcpStream, sync::Arc, time::Duration};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = SocketFactory::new(
//!     SocketConfig::new()
//!         .with_keepalive(true)
//!         .with_keepalive_period(Some(Duration::from_secs(60))),
//! );
//! let stream = TcpStream::connect("127.0.0.1:9090")?;
//! let socket = factory.get_socket(Arc::new(stream), None);
//! socket.write_packet(&mut Packet::new().with_uri("/home/ping"))?;
//! socket.close()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod conn;
mod error;
mod factory;
mod metadata;
mod packet;
mod pool;
mod proto;
mod socket;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{
    DEFAULT_FAST_PROTO_READ_BUF_SIZE, DEFAULT_POOL_CAPACITY, SocketConfig,
    ZERO_READ_BUFFER_FAST_PROTO_READ_BUF_SIZE,
};
pub use conn::{BufferControl, KeepAliveControl, StreamConn};
pub use error::{ProtoError, SocketError};
pub use factory::SocketFactory;
pub use metadata::Metadata;
pub use packet::{CODEC_ID_JSON, CODEC_ID_NONE, CODEC_ID_PLAIN, CODEC_ID_PROTOBUF, Packet};
pub use pool::{PoolStats, SocketPool};
pub use proto::{FastProto, Proto, ProtoFunc};
pub use socket::Socket;
