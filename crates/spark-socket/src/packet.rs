use bytes::Bytes;

/// 未声明包体编解码器。
pub const CODEC_ID_NONE: u8 = 0;
/// JSON 包体。
pub const CODEC_ID_JSON: u8 = b'j';
/// Protobuf 包体。
pub const CODEC_ID_PROTOBUF: u8 = b'p';
/// 纯文本包体。
pub const CODEC_ID_PLAIN: u8 = b's';

/// 协议层收发的基本单元：包头字段加一段不透明的包体字节。
///
/// # 教案式说明
/// - **意图 (Why)**：套接字层只关心 `body_codec` 一个字段（写出前补全默认编解码器），
///   其余字段由协议实现负责序列化，包体内容对本层完全不透明；
/// - **契约 (What)**：`seq`、`ptype`、`uri` 构成包头，`body` 使用 [`Bytes`] 以便零拷贝共享；
/// - **风险 (Trade-offs)**：`uri` 使用 `String` 存储，单包会有一次堆分配；
///   需要复用时可调用 [`Packet::reset`] 保留容量。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    seq: u64,
    ptype: u8,
    uri: String,
    body_codec: u8,
    body: Bytes,
}

impl Packet {
    /// 创建空包，`body_codec` 为 [`CODEC_ID_NONE`]。
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_ptype(mut self, ptype: u8) -> Self {
        self.ptype = ptype;
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn with_body_codec(mut self, codec_id: u8) -> Self {
        self.body_codec = codec_id;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    pub fn ptype(&self) -> u8 {
        self.ptype
    }

    pub fn set_ptype(&mut self, ptype: u8) {
        self.ptype = ptype;
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: impl Into<String>) {
        self.uri = uri.into();
    }

    /// 包体编解码器标识，[`CODEC_ID_NONE`] 表示未声明。
    pub fn body_codec(&self) -> u8 {
        self.body_codec
    }

    pub fn set_body_codec(&mut self, codec_id: u8) {
        self.body_codec = codec_id;
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// 清空全部字段，保留 `uri` 的容量以便复用。
    pub fn reset(&mut self) {
        self.seq = 0;
        self.ptype = 0;
        self.uri.clear();
        self.body_codec = CODEC_ID_NONE;
        self.body = Bytes::new();
    }
}
