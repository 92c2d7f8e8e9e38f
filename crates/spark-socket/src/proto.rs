//! # proto 模块说明
//!
//! ## 角色定位（Why）
//! - 定义套接字层与分帧协议之间的唯一接缝：[`Proto`] 负责把 [`Packet`] 写成字节帧或从字节流还原；
//! - 提供默认实现 [`FastProto`]，作为 [`SocketFactory`](crate::SocketFactory) 未指定协议时的兜底。
//!
//! ## 帧格式（What）
//! ```text
//! u32 frame_len | u8 ptype | u64 seq | u16 uri_len | uri | u8 body_codec | body
//! ```
//! - 全部整数为大端序，`frame_len` 统计其后的全部字节；
//! - 帧长超过配置上限时两端都返回 [`ProtoError::Oversized`]。
//!
//! ## 并发策略（How）
//! - 写路径在写锁内完成“编码 + 整帧写出”，并发 `pack` 不会交错；
//! - 读路径在读锁内经由 `BufReader` 读取，缓冲容量取自 `SocketConfig::fast_proto_read_buf_size`；
//! - 读写各自持锁，一个线程阻塞在读上不会妨碍其他线程写。

use crate::{config::SocketConfig, conn::StreamConn, error::ProtoError, packet::Packet};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::{
    io::{self, BufReader, Read},
    sync::Arc,
};

/// 分帧协议契约。
///
/// 实现必须可以被多个线程同时调用 `pack`/`unpack`。
pub trait Proto: Send + Sync {
    /// 协议标识与名称。
    fn version(&self) -> (u8, &'static str);

    /// 把包编码并写入绑定的连接。
    fn pack(&self, packet: &mut Packet) -> Result<(), ProtoError>;

    /// 从绑定的连接读取一帧并填充到包中。
    fn unpack(&self, packet: &mut Packet) -> Result<(), ProtoError>;
}

/// 协议工厂：给定原始连接，构造与之绑定的协议实例。
pub type ProtoFunc = Arc<dyn Fn(Arc<dyn StreamConn>) -> Arc<dyn Proto> + Send + Sync>;

const FRAME_LEN_BYTES: usize = 4;
// ptype + seq + uri_len + body_codec
const MIN_FRAME_LEN: usize = 1 + 8 + 2 + 1;
const MAX_PREALLOC: usize = 64 * 1024;

/// 长度前缀的默认分帧协议。
pub struct FastProto {
    conn: Arc<dyn StreamConn>,
    reader: Mutex<BufReader<ConnReader>>,
    writer: Mutex<BytesMut>,
    size_limit: Option<usize>,
}

impl FastProto {
    /// 构造绑定到 `conn` 的协议实例。
    pub fn new(conn: Arc<dyn StreamConn>, read_buf_size: usize, size_limit: Option<usize>) -> Self {
        let reader = BufReader::with_capacity(read_buf_size.max(1), ConnReader(conn.clone()));
        Self {
            conn,
            reader: Mutex::new(reader),
            writer: Mutex::new(BytesMut::new()),
            size_limit,
        }
    }

    /// 生成按 `config` 设定读缓冲与帧上限的协议工厂。
    pub fn factory(config: &SocketConfig) -> ProtoFunc {
        let read_buf_size = config.fast_proto_read_buf_size();
        let size_limit = config.packet_size_limit();
        Arc::new(move |conn: Arc<dyn StreamConn>| -> Arc<dyn Proto> {
            Arc::new(FastProto::new(conn, read_buf_size, size_limit))
        })
    }

    fn check_size(&self, size: usize) -> Result<(), ProtoError> {
        let limit = self.size_limit.unwrap_or(u32::MAX as usize);
        if size > limit {
            return Err(ProtoError::Oversized { size, limit });
        }
        Ok(())
    }
}

impl Proto for FastProto {
    fn version(&self) -> (u8, &'static str) {
        (b'f', "fast")
    }

    fn pack(&self, packet: &mut Packet) -> Result<(), ProtoError> {
        let uri = packet.uri().as_bytes();
        let uri_len =
            u16::try_from(uri.len()).map_err(|_| ProtoError::Malformed("uri exceeds 65535 bytes"))?;
        let frame_len = MIN_FRAME_LEN + uri.len() + packet.body().len();
        self.check_size(frame_len)?;

        let mut buf = self.writer.lock();
        buf.clear();
        buf.reserve(FRAME_LEN_BYTES + frame_len);
        buf.put_u32(frame_len as u32);
        buf.put_u8(packet.ptype());
        buf.put_u64(packet.seq());
        buf.put_u16(uri_len);
        buf.put_slice(uri);
        buf.put_u8(packet.body_codec());
        buf.put_slice(packet.body());
        write_all(&*self.conn, &buf)?;
        Ok(())
    }

    fn unpack(&self, packet: &mut Packet) -> Result<(), ProtoError> {
        let mut reader = self.reader.lock();

        let mut len_buf = [0u8; FRAME_LEN_BYTES];
        reader.read_exact(&mut len_buf)?;
        let frame_len = u32::from_be_bytes(len_buf) as usize;
        if frame_len < MIN_FRAME_LEN {
            return Err(ProtoError::Malformed("frame shorter than header"));
        }
        self.check_size(frame_len)?;

        // 帧长来自对端，缓冲随实际到达的字节增长，不按声明长度预分配。
        let mut frame = Vec::with_capacity(frame_len.min(MAX_PREALLOC));
        (&mut *reader)
            .take(frame_len as u64)
            .read_to_end(&mut frame)?;
        drop(reader);
        if frame.len() < frame_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed in the middle of a frame",
            )
            .into());
        }

        let mut frame = Bytes::from(frame);
        let ptype = frame.get_u8();
        let seq = frame.get_u64();
        let uri_len = frame.get_u16() as usize;
        if frame.remaining() < uri_len + 1 {
            return Err(ProtoError::Malformed("uri length exceeds frame"));
        }
        let uri = frame.split_to(uri_len);
        let uri = std::str::from_utf8(&uri)
            .map_err(|_| ProtoError::Malformed("uri is not valid utf-8"))?;
        let body_codec = frame.get_u8();

        packet.set_ptype(ptype);
        packet.set_seq(seq);
        packet.set_uri(uri);
        packet.set_body_codec(body_codec);
        packet.set_body(frame);
        Ok(())
    }
}

/// 让 `BufReader` 可以直接读取共享连接。
struct ConnReader(Arc<dyn StreamConn>);

impl Read for ConnReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

fn write_all(conn: &dyn StreamConn, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match conn.write(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole frame",
                ));
            }
            Ok(n) => buf = &buf[n..],
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
