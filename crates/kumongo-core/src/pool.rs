//! 连接池模块
//!
//! 池中共有 `max_connections × 副本数` 个槽位。每个槽位由一个专属的
//! 工作任务驱动,工作任务独占一条套接字和两条有界通道:
//!
//! - `writer`: 调用方送入已组帧的出站消息,工作任务逐条转发到套接字
//! - `reader`: 工作任务把解析好的回复送回持有槽位的调用方
//!
//! 获取/释放协议保证同一时刻只有一个调用方持有槽位,因此槽位内的
//! 请求/回复严格先进先出。套接字出错时工作任务向等待方投递
//! `Communication` 错误后退出,该槽位随客户端一起报废(不做静默重连)。

use crate::wire::{self, Reply};
use kumongo_common::{MongoError, MongoResult, Replica};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// 池满时获取槽位的轮询间隔
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// 明文或 TLS 封装的字节双工流
pub(crate) enum WireStream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for WireStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            WireStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            WireStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for WireStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            WireStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            WireStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            WireStream::Plain(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            WireStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            WireStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            WireStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// 打开到指定副本的流,按需完成 TLS 握手
pub(crate) async fn open_stream(
    replica: &Replica,
    #[cfg(feature = "tls")] tls_config: Option<&Arc<rustls::ClientConfig>>,
) -> MongoResult<WireStream> {
    let stream = TcpStream::connect((replica.host.as_str(), replica.port))
        .await
        .map_err(|e| {
            MongoError::Communication(format!("Failed to connect to {}: {}", replica, e))
        })?;
    let _ = stream.set_nodelay(true);

    if replica.tls {
        #[cfg(feature = "tls")]
        {
            let config = tls_config.ok_or_else(|| {
                MongoError::Config(format!("Replica {} requires TLS but no TLS context", replica))
            })?;
            let connector = tokio_rustls::TlsConnector::from(config.clone());
            let name = rustls::pki_types::ServerName::try_from(replica.host.clone())
                .map_err(|e| MongoError::Config(format!("Bad TLS server name: {}", e)))?;
            let tls_stream = connector.connect(name, stream).await.map_err(|e| {
                MongoError::Communication(format!("TLS handshake with {} failed: {}", replica, e))
            })?;
            return Ok(WireStream::Tls(Box::new(tls_stream)));
        }
        #[cfg(not(feature = "tls"))]
        return Err(MongoError::Config(format!(
            "Replica {} requires TLS but the tls feature is disabled",
            replica
        )));
    }

    Ok(WireStream::Plain(stream))
}

/// 在一条流上完成一次 发送 → 读长度前缀 → 读余下字节 → 解析 的往返
///
/// `one_way` 为 true 时 (OP_KILL_CURSORS) 只发送不读回复。
pub(crate) async fn exchange(
    stream: &mut WireStream,
    packet: &[u8],
    one_way: bool,
) -> MongoResult<Option<Reply>> {
    stream
        .write_all(packet)
        .await
        .map_err(|e| MongoError::Communication(format!("Socket write failed: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| MongoError::Communication(format!("Socket flush failed: {}", e)))?;

    if one_way {
        return Ok(None);
    }

    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| MongoError::Communication(format!("Socket read failed: {}", e)))?;
    let total = i32::from_le_bytes(len_buf);
    if (total as usize) < wire::HEADER_SIZE || total as usize > wire::MAX_MESSAGE_SIZE {
        return Err(MongoError::Protocol(format!("Bad reply length: {}", total)));
    }

    let mut frame = vec![0u8; total as usize];
    frame[..4].copy_from_slice(&len_buf);
    stream
        .read_exact(&mut frame[4..])
        .await
        .map_err(|e| MongoError::Communication(format!("Socket read failed: {}", e)))?;

    Ok(Some(wire::parse_reply(&frame)?))
}

/// 槽位工作任务
///
/// 循环: 从 writer 收一条消息;空消息表示退出。否则转发到套接字并把
/// 回复送回 reader。套接字错误向等待方投递错误后终止。
pub(crate) async fn worker(
    mut stream: WireStream,
    mut requests: mpsc::Receiver<Vec<u8>>,
    replies: mpsc::Sender<MongoResult<Reply>>,
    slot: usize,
) {
    while let Some(packet) = requests.recv().await {
        if packet.is_empty() {
            break;
        }
        let one_way = wire::packet_op_code(&packet) == Some(wire::OP_KILL_CURSORS);
        match exchange(&mut stream, &packet, one_way).await {
            Ok(None) => {}
            Ok(Some(reply)) => {
                if replies.send(Ok(reply)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("Worker {} connection failed: {}", slot, e);
                let _ = replies.send(Err(e)).await;
                break;
            }
        }
    }
    debug!("Worker {} terminated", slot);
}

pub(crate) struct PoolSlot {
    pub writer: mpsc::Sender<Vec<u8>>,
    pub reader: Arc<tokio::sync::Mutex<mpsc::Receiver<MongoResult<Reply>>>>,
    pub in_use: bool,
    pub authenticated: bool,
}

impl PoolSlot {
    pub fn new(
        writer: mpsc::Sender<Vec<u8>>,
        reader: mpsc::Receiver<MongoResult<Reply>>,
    ) -> Self {
        Self {
            writer,
            reader: Arc::new(tokio::sync::Mutex::new(reader)),
            in_use: false,
            authenticated: false,
        }
    }
}

struct PoolState {
    slots: Vec<PoolSlot>,
    last_used: usize,
}

pub(crate) struct ConnectionPool {
    state: Arc<Mutex<PoolState>>,
}

impl ConnectionPool {
    pub fn new(slots: Vec<PoolSlot>) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                slots,
                last_used: 0,
            })),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// 获取一个空闲槽位
    ///
    /// 从上次使用的槽位之后开始轮转扫描,全部占用时短暂休眠后重试。
    pub async fn acquire(&self) -> SlotHandle {
        loop {
            {
                let mut state = self.state.lock();
                let n = state.slots.len();
                for step in 0..n {
                    let idx = (state.last_used + 1 + step) % n;
                    if !state.slots[idx].in_use {
                        state.slots[idx].in_use = true;
                        state.last_used = idx;
                        let slot = &state.slots[idx];
                        return SlotHandle {
                            state: self.state.clone(),
                            index: idx,
                            needs_auth: !slot.authenticated,
                            writer: slot.writer.clone(),
                            reader: slot.reader.clone(),
                            released: false,
                        };
                    }
                }
            }
            tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
        }
    }

    /// 释放槽位;重复释放返回 `InvalidState`
    pub fn release(&self, index: usize) -> MongoResult<()> {
        release_slot(&self.state, index)
    }

    pub fn mark_authenticated(&self, index: usize) {
        if let Some(slot) = self.state.lock().slots.get_mut(index) {
            slot.authenticated = true;
        }
    }

    /// 向所有工作任务发送退出消息
    pub async fn shutdown(&self) {
        let writers: Vec<mpsc::Sender<Vec<u8>>> = {
            let state = self.state.lock();
            state.slots.iter().map(|s| s.writer.clone()).collect()
        };
        for writer in writers {
            let _ = writer.send(Vec::new()).await;
        }
    }
}

fn release_slot(state: &Mutex<PoolState>, index: usize) -> MongoResult<()> {
    let mut state = state.lock();
    let slot = state
        .slots
        .get_mut(index)
        .ok_or_else(|| MongoError::InvalidState(format!("No such pool slot: {}", index)))?;
    if !slot.in_use {
        return Err(MongoError::InvalidState(format!(
            "Pool slot {} released twice",
            index
        )));
    }
    slot.in_use = false;
    Ok(())
}

/// 已获取的槽位句柄
///
/// 持有期间独占该槽位的请求/回复通道。显式 `release` 可捕获重复释放;
/// 句柄被丢弃时兜底归还槽位。
pub(crate) struct SlotHandle {
    state: Arc<Mutex<PoolState>>,
    pub index: usize,
    pub needs_auth: bool,
    writer: mpsc::Sender<Vec<u8>>,
    reader: Arc<tokio::sync::Mutex<mpsc::Receiver<MongoResult<Reply>>>>,
    released: bool,
}

impl SlotHandle {
    pub async fn round_trip(&self, packet: Vec<u8>) -> MongoResult<Reply> {
        self.writer.send(packet).await.map_err(|_| {
            MongoError::Communication("Connection worker terminated".to_string())
        })?;
        let mut reader = self.reader.lock().await;
        match reader.recv().await {
            Some(result) => result,
            None => Err(MongoError::Communication(
                "Connection worker closed the reply channel".to_string(),
            )),
        }
    }

    pub async fn send_only(&self, packet: Vec<u8>) -> MongoResult<()> {
        self.writer.send(packet).await.map_err(|_| {
            MongoError::Communication("Connection worker terminated".to_string())
        })
    }

    pub fn release(mut self) -> MongoResult<()> {
        self.released = true;
        release_slot(&self.state, self.index)
    }
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        if !self.released {
            let _ = release_slot(&self.state, self.index);
        }
    }
}

/// 单连接模式:无池,操作在互斥保护下内联执行
pub(crate) struct DirectConnection {
    stream: tokio::sync::Mutex<WireStream>,
    authenticated: AtomicBool,
}

impl DirectConnection {
    pub fn new(stream: WireStream) -> Self {
        Self {
            stream: tokio::sync::Mutex::new(stream),
            authenticated: AtomicBool::new(false),
        }
    }

    pub async fn round_trip(&self, packet: Vec<u8>) -> MongoResult<Reply> {
        let mut stream = self.stream.lock().await;
        match exchange(&mut stream, &packet, false).await? {
            Some(reply) => Ok(reply),
            None => Err(MongoError::Protocol("Reply expected".to_string())),
        }
    }

    pub async fn send_only(&self, packet: Vec<u8>) -> MongoResult<()> {
        let mut stream = self.stream.lock().await;
        exchange(&mut stream, &packet, true).await.map(|_| ())
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
    }
}
