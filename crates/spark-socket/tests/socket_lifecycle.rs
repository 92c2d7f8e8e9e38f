//! `socket_lifecycle` 集成测试：从公开 API 视角验证 `Socket` 的绑定、重绑定与关闭语义。
//!
//! # 测试目标（Why）
//! - 重绑定必须成对替换连接与协议，并关闭旧连接；
//! - 标识在未显式设置时实时回落到当前对端地址；
//! - 关闭幂等，且写路径能把关闭竞态中的失败识别为主动关闭，读路径保持原样；
//! - 多线程并发收发时帧不交错。
//!
//! # 结构安排（How）
//! - 全部使用 `testing::memory_pair` 构造内存连接，避免依赖网络环境；
//! - 阻塞写场景使用限容管道，保证关闭发生时写线程确实阻塞在连接上。

use spark_socket::{
    Packet, Proto, ProtoError, ProtoFunc, SocketError, SocketFactory, StreamConn,
    testing::{MemoryConn, memory_pair, memory_pair_with_addrs, memory_pair_with_capacity},
};
use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

fn addr(text: &str) -> SocketAddr {
    text.parse().expect("非法测试地址")
}

/// 记录调用次数、不产生任何字节的协议桩。
struct CountingProto {
    packs: Arc<AtomicUsize>,
}

impl Proto for CountingProto {
    fn version(&self) -> (u8, &'static str) {
        (b'c', "counting")
    }

    fn pack(&self, _packet: &mut Packet) -> Result<(), ProtoError> {
        self.packs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unpack(&self, _packet: &mut Packet) -> Result<(), ProtoError> {
        Err(ProtoError::Malformed("counting proto never reads"))
    }
}

/// 首次 `close` 时在两道屏障处停住的连接，用来把 `reset` 卡在关闭旧连接的阶段。
struct GatedConn {
    inner: MemoryConn,
    armed: AtomicBool,
    gate: Arc<Barrier>,
}

impl StreamConn for GatedConn {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn close(&self) -> io::Result<()> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.gate.wait();
            self.gate.wait();
        }
        self.inner.close()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr()
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.inner.set_read_deadline(deadline)
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.inner.set_write_deadline(deadline)
    }
}

fn counting_proto(packs: Arc<AtomicUsize>) -> ProtoFunc {
    Arc::new(move |_conn: Arc<dyn StreamConn>| -> Arc<dyn Proto> {
        Arc::new(CountingProto {
            packs: Arc::clone(&packs),
        })
    })
}

#[test]
fn reset_replaces_connection_and_closes_previous() {
    let factory = SocketFactory::default();
    let (first, _first_peer) = memory_pair_with_addrs(addr("10.0.0.1:1000"), addr("10.0.0.2:2000"));
    let (second, _second_peer) =
        memory_pair_with_addrs(addr("10.0.0.1:1001"), addr("10.0.0.3:3000"));
    let first = Arc::new(first);
    let second = Arc::new(second);

    let socket = factory.new_socket(first.clone(), None);
    assert_eq!(socket.remote_addr(), Some(addr("10.0.0.2:2000")));

    socket.reset(second.clone(), None);
    assert!(first.is_closed(), "重绑定必须关闭旧连接");
    assert!(!second.is_closed());
    assert_eq!(socket.local_addr(), Some(addr("10.0.0.1:1001")));
    assert_eq!(socket.remote_addr(), Some(addr("10.0.0.3:3000")));
    assert!(!socket.is_active_closed(), "重绑定完成后应恢复可用状态");
}

#[test]
fn id_falls_back_to_current_remote_address() {
    let factory = SocketFactory::default();
    let (first, _first_peer) = memory_pair_with_addrs(addr("10.0.1.1:1000"), addr("10.0.1.2:2000"));
    let socket = factory.new_socket(Arc::new(first), None);
    assert_eq!(socket.id(), "10.0.1.2:2000");

    socket.set_id("session-7");
    assert_eq!(socket.id(), "session-7");

    let (second, _second_peer) =
        memory_pair_with_addrs(addr("10.0.1.1:1001"), addr("10.0.1.9:9000"));
    socket.reset(Arc::new(second), None);
    assert_eq!(socket.id(), "10.0.1.9:9000", "重绑定会清空显式标识");
}

#[test]
fn reset_installs_requested_protocol() {
    let factory = SocketFactory::default();
    let (left, _right) = memory_pair();
    let socket = factory.new_socket(Arc::new(left), None);
    assert_eq!(socket.protocol_version(), Some((b'f', "fast")));

    let packs = Arc::new(AtomicUsize::new(0));
    let (left, _right) = memory_pair();
    socket.reset(Arc::new(left), Some(counting_proto(Arc::clone(&packs))));
    assert_eq!(socket.protocol_version(), Some((b'c', "counting")));

    socket
        .write_packet(&mut Packet::new().with_uri("/count"))
        .expect("写包失败");
    assert_eq!(packs.load(Ordering::SeqCst), 1);

    let err = socket
        .read_packet(&mut Packet::new())
        .expect_err("桩协议不支持读取");
    assert!(matches!(err, SocketError::Proto(ProtoError::Malformed(_))));
}

#[test]
fn factory_default_protocol_is_used_when_unspecified() {
    let packs = Arc::new(AtomicUsize::new(0));
    let factory =
        SocketFactory::with_default_proto(Default::default(), counting_proto(Arc::clone(&packs)));
    let (left, _right) = memory_pair();
    let socket = factory.get_socket(Arc::new(left), None);
    socket
        .write_packet(&mut Packet::new())
        .expect("写包失败");
    assert_eq!(packs.load(Ordering::SeqCst), 1);
    assert_eq!(socket.protocol_version(), Some((b'c', "counting")));
}

#[test]
fn close_is_idempotent() {
    let factory = SocketFactory::default();
    let (left, _right) = memory_pair();
    let left = Arc::new(left);
    let socket = factory.new_socket(left.clone(), None);

    socket.close().expect("首次关闭失败");
    socket.close().expect("重复关闭应直接成功");
    assert!(left.is_closed());
    assert!(socket.is_active_closed());

    let err = socket
        .write_packet(&mut Packet::new())
        .expect_err("关闭后写包应失败");
    assert!(err.is_proactive_close());
    assert_eq!(err.code(), "spark.socket.proactively_closed");
}

#[test]
fn concurrent_close_runs_once() {
    let factory = SocketFactory::default();
    let (left, _right) = memory_pair();
    let socket = factory.get_socket(Arc::new(left), None);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let socket = Arc::clone(&socket);
            thread::spawn(move || socket.close())
        })
        .collect();
    for handle in handles {
        handle.join().expect("关闭线程异常退出").expect("关闭失败");
    }

    let stats = factory.pool().stats();
    assert_eq!(stats.recycled, 1, "并发关闭只能归还一次");
    assert_eq!(stats.idle, 1);
}

#[test]
fn close_during_blocked_write_reports_proactive_close() {
    let factory = SocketFactory::default();
    let (left, right) = memory_pair_with_capacity(16);
    let socket = factory.new_socket(Arc::new(left), None);

    let writer = {
        let socket = Arc::clone(&socket);
        thread::spawn(move || {
            let mut packet = Packet::new().with_uri("/blocked").with_body(vec![1u8; 1024]);
            socket.write_packet(&mut packet)
        })
    };
    let waited = Instant::now();
    while right.pending_inbound() < 16 {
        assert!(waited.elapsed() < Duration::from_secs(5), "写线程未能写满管道");
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(20));

    socket.close().expect("关闭失败");
    let result = writer.join().expect("写线程异常退出");
    assert!(
        matches!(result, Err(SocketError::ProactivelyClosed)),
        "关闭导致的写失败应识别为主动关闭: {result:?}"
    );
}

#[test]
fn reset_during_blocked_write_fails_on_previous_connection() {
    let factory = SocketFactory::default();
    let (first, first_peer) = memory_pair_with_capacity(16);
    let socket = factory.new_socket(Arc::new(first), None);

    let writer = {
        let socket = Arc::clone(&socket);
        thread::spawn(move || {
            let mut packet = Packet::new().with_uri("/blocked").with_body(vec![1u8; 1024]);
            let started = Instant::now();
            (socket.write_packet(&mut packet), started.elapsed())
        })
    };
    let waited = Instant::now();
    while first_peer.pending_inbound() < 16 {
        assert!(waited.elapsed() < Duration::from_secs(5), "写线程未能写满管道");
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(20));

    let (second, second_peer) = memory_pair();
    socket.reset(Arc::new(second), None);

    let (result, elapsed) = writer.join().expect("写线程异常退出");
    assert!(result.is_err(), "阻塞在旧连接上的写必须失败: {result:?}");
    assert!(elapsed < Duration::from_secs(5), "重绑定应让阻塞写及时返回");
    assert_eq!(second_peer.pending_inbound(), 0, "旧写入不得落到新连接上");
    assert_eq!(first_peer.pending_inbound(), 16);

    socket
        .write_packet(&mut Packet::new().with_uri("/fresh"))
        .expect("重绑定后写包失败");
    assert!(second_peer.pending_inbound() > 0, "新写入应落到新连接上");
}

#[test]
fn close_racing_reset_returns_without_closing() {
    let factory = SocketFactory::default();
    let gate = Arc::new(Barrier::new(2));
    let (first, _first_peer) = memory_pair();
    let first = Arc::new(GatedConn {
        inner: first,
        armed: AtomicBool::new(true),
        gate: Arc::clone(&gate),
    });
    let socket = factory.new_socket(first.clone(), None);

    let (second, _second_peer) = memory_pair();
    let second = Arc::new(second);
    let resetter = {
        let socket = Arc::clone(&socket);
        let second = second.clone();
        thread::spawn(move || socket.reset(second, None))
    };

    // reset 已置为主动关闭，正卡在关闭旧连接处。
    gate.wait();
    assert!(socket.is_active_closed());
    socket.close().expect("快速路径应直接成功");
    gate.wait();
    resetter.join().expect("重绑定线程异常退出");

    assert!(first.inner.is_closed());
    assert!(!second.is_closed(), "并发的 close 不会关闭新连接");
    assert!(!socket.is_active_closed(), "重绑定完成后套接字仍可用");
    socket
        .write_packet(&mut Packet::new().with_uri("/still-open"))
        .expect("重绑定后写包失败");
}

#[test]
fn read_errors_are_not_remapped_after_close() {
    let factory = SocketFactory::default();
    let (left, _right) = memory_pair();
    let socket = factory.new_socket(Arc::new(left), None);

    let reader = {
        let socket = Arc::clone(&socket);
        thread::spawn(move || socket.read_packet(&mut Packet::new()))
    };
    thread::sleep(Duration::from_millis(30));
    socket.close().expect("关闭失败");

    let err = reader
        .join()
        .expect("读线程异常退出")
        .expect_err("关闭后阻塞读应失败");
    assert!(!err.is_proactive_close(), "读路径不做主动关闭映射");
    assert!(matches!(err, SocketError::Proto(ProtoError::Io(_))));
}

#[test]
fn read_deadline_surfaces_timeout() {
    let factory = SocketFactory::default();
    let (left, _right) = memory_pair();
    let socket = factory.new_socket(Arc::new(left), None);
    socket
        .set_read_deadline(Some(Instant::now() + Duration::from_millis(20)))
        .expect("设置截止时间失败");

    let err = socket
        .read_packet(&mut Packet::new())
        .expect_err("截止时间到期后应失败");
    assert!(err.is_timeout());
}

#[test]
fn concurrent_writers_produce_whole_frames() {
    const WRITERS: usize = 4;
    const PER_WRITER: usize = 50;

    let factory = SocketFactory::default();
    let (left, right) = memory_pair();
    let client = factory.new_socket(Arc::new(left), None);
    let server = factory.new_socket(Arc::new(right), None);

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for seq in 0..PER_WRITER {
                    let body = vec![writer as u8; 64 + seq];
                    let mut packet = Packet::new()
                        .with_seq(seq as u64)
                        .with_uri(format!("/writer/{writer}"))
                        .with_body(body);
                    client.write_packet(&mut packet).expect("并发写包失败");
                }
            })
        })
        .collect();

    let mut seen: HashMap<String, usize> = HashMap::new();
    for _ in 0..WRITERS * PER_WRITER {
        let mut packet = Packet::new();
        server.read_packet(&mut packet).expect("读包失败");
        let writer: u8 = packet
            .uri()
            .trim_start_matches("/writer/")
            .parse()
            .expect("uri 被破坏");
        assert_eq!(packet.body().len(), 64 + packet.seq() as usize);
        assert!(packet.body().iter().all(|byte| *byte == writer), "包体发生交错");
        *seen.entry(packet.uri().to_owned()).or_default() += 1;
    }
    for handle in handles {
        handle.join().expect("写线程异常退出");
    }

    assert_eq!(seen.len(), WRITERS);
    assert!(seen.values().all(|count| *count == PER_WRITER));
}

#[test]
fn writes_racing_with_reset_never_see_torn_binding() {
    let factory = SocketFactory::default();
    let (left, _right) = memory_pair();
    let socket = factory.new_socket(Arc::new(left), None);

    let writer = {
        let socket = Arc::clone(&socket);
        thread::spawn(move || {
            for _ in 0..500 {
                match socket.write_packet(&mut Packet::new().with_uri("/race")) {
                    Ok(()) | Err(SocketError::ProactivelyClosed) => {}
                    Err(SocketError::Proto(ProtoError::Io(_))) => {}
                    Err(other) => panic!("出现意外错误: {other:?}"),
                }
            }
        })
    };

    let mut peers = Vec::new();
    let mut last_remote = None;
    for _ in 0..50 {
        let (left, right) = memory_pair();
        last_remote = left.remote_addr();
        socket.reset(Arc::new(left), None);
        peers.push(right);
    }
    writer.join().expect("写线程异常退出");

    assert_eq!(socket.remote_addr(), last_remote);
    assert_eq!(socket.protocol_version(), Some((b'f', "fast")));
    socket
        .write_packet(&mut Packet::new().with_uri("/after"))
        .expect("重绑定结束后写包应成功");
}

#[test]
fn raw_bytes_pass_through() {
    let factory = SocketFactory::default();
    let (left, right) = memory_pair();
    let socket = factory.new_socket(Arc::new(left), None);

    right.write(b"raw").expect("对端写入失败");
    let mut buf = [0u8; 3];
    let mut filled = 0;
    while filled < buf.len() {
        filled += socket.read(&mut buf[filled..]).expect("原始读取失败");
    }
    assert_eq!(&buf, b"raw");

    assert_eq!(socket.write(b"ok").expect("原始写入失败"), 2);
    let mut echo = [0u8; 2];
    assert_eq!(right.read(&mut echo).expect("对端读取失败"), 2);
    assert_eq!(&echo, b"ok");
}
