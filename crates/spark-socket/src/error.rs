//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义套接字层对外暴露的错误语义，区分“本端主动关闭”与“真实传输故障”；
//! - 为每类错误提供稳定错误码（`spark.socket.*`），便于日志与告警按码聚合。
//!
//! ## 设计要求（What）
//! - 传输错误保持 `io::Error` 原样透传，不做二次包装或重试；
//! - 协议错误由 [`ProtoError`] 描述，读路径原样返回；
//! - 写路径在主动关闭后失败时，统一映射为 [`SocketError::ProactivelyClosed`]。

use std::io;

use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const WRITE_PACKET: OperationKind = OperationKind {
    code: "spark.socket.write_packet_failed",
    message: "socket write_packet",
};
pub(crate) const READ_PACKET: OperationKind = OperationKind {
    code: "spark.socket.read_packet_failed",
    message: "socket read_packet",
};
pub(crate) const CLOSE: OperationKind = OperationKind {
    code: "spark.socket.close_failed",
    message: "socket close",
};

const IO_CODE: &str = "spark.socket.io_failed";
const PROACTIVELY_CLOSED_CODE: &str = "spark.socket.proactively_closed";
const UNBOUND_CODE: &str = "spark.socket.unbound";
const PROTO_OVERSIZED_CODE: &str = "spark.socket.proto.oversized";
const PROTO_MALFORMED_CODE: &str = "spark.socket.proto.malformed";
const PROTO_IO_CODE: &str = "spark.socket.proto.io_failed";

/// 协议层（`Proto::pack`/`Proto::unpack`）可能返回的错误。
///
/// # 教案式说明
/// - **意图 (Why)**：协议实现对套接字层是不透明的，但仍需一个统一的错误形态，
///   让调用方区分“字节流中断”与“帧内容非法”；
/// - **契约 (What)**：`Io` 承载底层读写失败，`Oversized` 与 `Malformed` 表示帧本身的问题；
/// - **风险 (Trade-offs)**：`Malformed` 只携带静态描述，不保留原始字节，避免在错误路径上复制大块数据。
#[derive(Debug, Error)]
pub enum ProtoError {
    /// 底层连接读写失败。
    #[error("protocol io: {0}")]
    Io(#[from] io::Error),

    /// 帧长度超出配置的上限。
    #[error("packet size {size} exceeds limit {limit}")]
    Oversized { size: usize, limit: usize },

    /// 帧结构不完整或字段不一致。
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

impl ProtoError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ProtoError::Io(_) => PROTO_IO_CODE,
            ProtoError::Oversized { .. } => PROTO_OVERSIZED_CODE,
            ProtoError::Malformed(_) => PROTO_MALFORMED_CODE,
        }
    }
}

/// 套接字层错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：聚合包读写、原始字节读写与关闭流程的全部失败路径；
///   其中 `ProactivelyClosed` 是调用方判断“这是我方关闭导致的预期失败”的唯一信号。
/// - **契约 (What)**：
///   - `Io`：传输错误，原样来自 [`StreamConn`](crate::StreamConn)；
///   - `Proto`：协议错误，原样来自 [`Proto`](crate::Proto)；
///   - `ProactivelyClosed`：`write_packet` 在关闭状态下失败时返回；
///   - `Unbound`：套接字当前没有绑定任何连接（已归还到池中后仍被使用）。
/// - **风险 (Trade-offs)**：写路径在关闭后会把**任何** `pack` 失败都映射为
///   `ProactivelyClosed`，包括与关闭无关的非法帧；关闭竞态期间的协议缺陷因此可能被掩盖。
#[derive(Debug, Error)]
pub enum SocketError {
    /// 底层传输错误。
    #[error(transparent)]
    Io(#[from] io::Error),

    /// 协议编解码错误。
    #[error(transparent)]
    Proto(#[from] ProtoError),

    /// 套接字已被本端主动关闭。
    #[error("socket is closed proactively")]
    ProactivelyClosed,

    /// 套接字未绑定连接。
    #[error("socket is not bound to a connection")]
    Unbound,
}

impl SocketError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            SocketError::Io(_) => IO_CODE,
            SocketError::Proto(err) => err.code(),
            SocketError::ProactivelyClosed => PROACTIVELY_CLOSED_CODE,
            SocketError::Unbound => UNBOUND_CODE,
        }
    }

    /// 是否为本端主动关闭导致的预期失败。
    pub fn is_proactive_close(&self) -> bool {
        matches!(self, SocketError::ProactivelyClosed)
    }

    /// 是否为截止时间触发的超时。
    pub fn is_timeout(&self) -> bool {
        let io_err = match self {
            SocketError::Io(err) | SocketError::Proto(ProtoError::Io(err)) => err,
            _ => return false,
        };
        matches!(
            io_err.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
        )
    }
}

/// 为日志输出附带操作语义的简短描述。
pub(crate) fn describe(kind: OperationKind, error: &SocketError) -> String {
    format!("{} [{}]: {}", kind.message, kind.code, error)
}

/// 构造“未绑定连接”的 IO 错误，供原始读写透传路径使用。
pub(crate) fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket is not bound to a connection")
}
