//! 客户端模块
//!
//! 提供面向副本集的异步客户端。连接方式有两种:
//!
//! - **池化** (默认): `max_connections × 副本数` 个槽位,每个槽位一个
//!   工作任务独占一条套接字,通过有界通道收发
//! - **单连接** (`direct`): 不建池,所有操作在一条连接上内联执行
//!
//! 槽位选择、请求 ID 分配和认证标记都在客户端内部的锁下完成,
//! 不依赖任何全局状态。
//!
//! # 示例
//!
//! ```rust,ignore
//! use kumongo_core::Client;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::connect("mongodb://localhost:27017").await?;
//!     let coll = client.database("app").collection("users");
//!     let users = coll.find(kumongo_bson::doc! {}).all().await?;
//! }
//! ```

use crate::auth;
use crate::connection::{ClientOptions, ConnectionString, Credentials};
use crate::database::Database;
use crate::pool::{self, ConnectionPool, DirectConnection, PoolSlot, SlotHandle};
use crate::srv::{DnsSrvResolver, SrvResolver};
use crate::wire::{self, Reply};
use kumongo_bson::{doc, Document};
use kumongo_common::{MongoError, MongoResult, Replica};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// 派发器:池化或单连接,对应两种调度模式
pub(crate) enum Executor {
    Pooled(ConnectionPool),
    Direct(Arc<DirectConnection>),
}

/// 一条已获取的请求/回复通道
pub(crate) enum Channel {
    Pooled(SlotHandle),
    Direct(Arc<DirectConnection>),
}

impl Channel {
    pub async fn round_trip(&self, packet: Vec<u8>) -> MongoResult<Reply> {
        match self {
            Channel::Pooled(handle) => handle.round_trip(packet).await,
            Channel::Direct(conn) => conn.round_trip(packet).await,
        }
    }

    pub async fn send_only(&self, packet: Vec<u8>) -> MongoResult<()> {
        match self {
            Channel::Pooled(handle) => handle.send_only(packet).await,
            Channel::Direct(conn) => conn.send_only(packet).await,
        }
    }
}

struct ClientInner {
    replicas: Vec<Replica>,
    options: ClientOptions,
    credentials: Option<Credentials>,
    auth_db: Option<String>,
    request_id: Mutex<i32>,
    authenticated: AtomicBool,
    executor: Executor,
}

/// MongoDB 客户端句柄
///
/// 内部为引用计数,克隆代价极低;`Database` 和 `Collection`
/// 都只是名字加句柄。
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// 按 URI 连接,使用默认选项和默认 SRV 解析器
    pub async fn connect(uri: &str) -> MongoResult<Self> {
        Self::connect_with_options(uri, ClientOptions::default()).await
    }

    pub async fn connect_with_options(uri: &str, options: ClientOptions) -> MongoResult<Self> {
        Self::connect_with_resolver(uri, options, &DnsSrvResolver::from_env()).await
    }

    /// 按 URI 连接,SRV 方案使用给定的解析器
    pub async fn connect_with_resolver(
        uri: &str,
        options: ClientOptions,
        resolver: &dyn SrvResolver,
    ) -> MongoResult<Self> {
        let conn = ConnectionString::parse(uri)?;

        let replicas = if conn.srv {
            resolver.resolve(&conn.replicas[0].host).await?
        } else {
            conn.replicas.clone()
        };
        if replicas.is_empty() {
            return Err(MongoError::Config("No replicas to connect to".to_string()));
        }

        #[cfg(feature = "tls")]
        let tls_config = if replicas.iter().any(|r| r.tls) {
            Some(crate::tls::build_client_config(&options.tls)?)
        } else {
            None
        };
        #[cfg(not(feature = "tls"))]
        if replicas.iter().any(|r| r.tls) {
            return Err(MongoError::Config(
                "Replica requires TLS but the tls feature is disabled".to_string(),
            ));
        }

        let executor = if options.direct {
            #[cfg(feature = "tls")]
            let stream = pool::open_stream(&replicas[0], tls_config.as_ref()).await?;
            #[cfg(not(feature = "tls"))]
            let stream = pool::open_stream(&replicas[0]).await?;
            info!("Opened direct connection to {}", replicas[0]);
            Executor::Direct(Arc::new(DirectConnection::new(stream)))
        } else {
            let mut slots = Vec::with_capacity(options.max_connections * replicas.len());
            for replica in &replicas {
                for _ in 0..options.max_connections {
                    #[cfg(feature = "tls")]
                    let stream = pool::open_stream(replica, tls_config.as_ref()).await?;
                    #[cfg(not(feature = "tls"))]
                    let stream = pool::open_stream(replica).await?;

                    let (writer_tx, writer_rx) = mpsc::channel(1);
                    let (reader_tx, reader_rx) = mpsc::channel(1);
                    tokio::spawn(pool::worker(stream, writer_rx, reader_tx, slots.len()));
                    slots.push(PoolSlot::new(writer_tx, reader_rx));
                }
            }
            info!(
                "Opened {} pooled connections across {} replicas",
                slots.len(),
                replicas.len()
            );
            Executor::Pooled(ConnectionPool::new(slots))
        };

        Ok(Self {
            inner: Arc::new(ClientInner {
                replicas,
                options,
                credentials: conn.credentials,
                auth_db: conn.auth_db,
                request_id: Mutex::new(0),
                authenticated: AtomicBool::new(false),
                executor,
            }),
        })
    }

    /// 获取数据库句柄(轻量,不访问网络)
    pub fn database(&self, name: &str) -> Database {
        Database::new(self.clone(), name)
    }

    pub fn replicas(&self) -> &[Replica] {
        &self.inner.replicas
    }

    /// 首次认证操作成功后置位
    pub fn authenticated(&self) -> bool {
        self.inner.authenticated.load(Ordering::SeqCst)
    }

    pub(crate) fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub(crate) fn write_concern(&self) -> &Document {
        &self.inner.options.write_concern
    }

    /// 分配请求 ID: 单调递增,模 INT32_MAX-1 回绕
    pub(crate) fn next_request_id(&self) -> i32 {
        let mut id = self.inner.request_id.lock();
        *id = advance_request_id(*id);
        *id
    }

    /// 获取一条通道;凭据存在且槽位未认证时先完成 SCRAM 握手
    pub(crate) async fn acquire_channel(&self) -> MongoResult<Channel> {
        match &self.inner.executor {
            Executor::Pooled(pool) => {
                let handle = pool.acquire().await;
                let needs_auth = handle.needs_auth;
                let index = handle.index;
                let channel = Channel::Pooled(handle);
                if needs_auth {
                    if let (Some(creds), Some(db)) =
                        (&self.inner.credentials, &self.inner.auth_db)
                    {
                        auth::authenticate(
                            self,
                            &channel,
                            creds,
                            db,
                            self.inner.options.auth_mechanism,
                        )
                        .await?;
                        pool.mark_authenticated(index);
                        self.inner.authenticated.store(true, Ordering::SeqCst);
                    }
                }
                Ok(channel)
            }
            Executor::Direct(conn) => {
                let channel = Channel::Direct(conn.clone());
                if !conn.is_authenticated() {
                    if let (Some(creds), Some(db)) =
                        (&self.inner.credentials, &self.inner.auth_db)
                    {
                        auth::authenticate(
                            self,
                            &channel,
                            creds,
                            db,
                            self.inner.options.auth_mechanism,
                        )
                        .await?;
                        conn.mark_authenticated();
                        self.inner.authenticated.store(true, Ordering::SeqCst);
                    }
                }
                Ok(channel)
            }
        }
    }

    pub(crate) fn release_channel(&self, channel: Channel) -> MongoResult<()> {
        match channel {
            Channel::Pooled(handle) => handle.release(),
            Channel::Direct(_) => Ok(()),
        }
    }

    /// 在指定通道上对 `<db>.$cmd` 发出命令并取回首个回复文档
    pub(crate) async fn run_command_on_channel(
        &self,
        channel: &Channel,
        db: &str,
        cmd: Document,
    ) -> MongoResult<Document> {
        let request_id = self.next_request_id();
        let packet = wire::build_query(
            request_id,
            self.inner.options.query_flags,
            &format!("{}.$cmd", db),
            0,
            -1,
            &cmd,
            None,
        )?;
        let reply = channel.round_trip(packet).await?;
        reply
            .documents
            .into_iter()
            .next()
            .ok_or_else(|| MongoError::Protocol("Command reply carried no document".to_string()))
    }

    /// 获取通道、执行命令、释放通道
    pub(crate) async fn run_command(&self, db: &str, cmd: Document) -> MongoResult<Document> {
        let channel = self.acquire_channel().await?;
        let result = self.run_command_on_channel(&channel, db, cmd).await;
        let released = self.release_channel(channel);
        let doc = result?;
        released?;
        Ok(doc)
    }

    /// 列出服务器上的数据库名 (admin listDatabases)
    pub async fn list_database_names(&self) -> MongoResult<Vec<String>> {
        let reply = self.run_command("admin", doc! { "listDatabases": 1 }).await?;
        let mut names = Vec::new();
        if let Some(databases) = reply.get_array("databases") {
            for entry in databases {
                if let Some(name) = entry.as_document().and_then(|d| d.get_str("name")) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// 服务器握手信息
    pub async fn is_master(&self) -> MongoResult<Document> {
        self.run_command("admin", doc! { "isMaster": 1 }).await
    }

    /// 通知所有工作任务退出
    pub async fn close(&self) {
        if let Executor::Pooled(pool) = &self.inner.executor {
            pool.shutdown().await;
        }
    }
}

/// 请求 ID 步进: 1, 2, …, INT32_MAX-1, 1, …
pub(crate) fn advance_request_id(current: i32) -> i32 {
    if current >= i32::MAX - 1 {
        1
    } else {
        current + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};
    use kumongo_bson::codec;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_request_id_monotonic() {
        let mut id = 0;
        for expected in 1..=100 {
            id = advance_request_id(id);
            assert_eq!(id, expected);
        }
    }

    #[test]
    fn test_request_id_wraparound() {
        assert_eq!(advance_request_id(i32::MAX - 2), i32::MAX - 1);
        assert_eq!(advance_request_id(i32::MAX - 1), 1);
        assert_eq!(advance_request_id(i32::MAX), 1);
    }

    fn encode_reply(response_to: i32, docs: &[Document], cursor_id: i64) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.put_i32_le(0);
        body.put_i64_le(cursor_id);
        body.put_i32_le(0);
        body.put_i32_le(docs.len() as i32);
        for doc in docs {
            codec::encode(doc, &mut body).unwrap();
        }
        let mut frame = BytesMut::new();
        frame.put_i32_le((wire::HEADER_SIZE + body.len()) as i32);
        frame.put_i32_le(1);
        frame.put_i32_le(response_to);
        frame.put_i32_le(wire::OP_REPLY);
        frame.put_slice(&body);
        frame.to_vec()
    }

    /// 假服务器:按顺序对每条进来的消息回放一组预置文档
    async fn fake_server(scripted: Vec<(Vec<Document>, i64)>) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            for (docs, cursor_id) in scripted {
                let mut len_buf = [0u8; 4];
                if sock.read_exact(&mut len_buf).await.is_err() {
                    return;
                }
                let len = i32::from_le_bytes(len_buf) as usize;
                let mut rest = vec![0u8; len - 4];
                sock.read_exact(&mut rest).await.unwrap();
                let request_id = i32::from_le_bytes(rest[0..4].try_into().unwrap());

                let reply = encode_reply(request_id, &docs, cursor_id);
                sock.write_all(&reply).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_connect_and_run_command() {
        let addr = fake_server(vec![(vec![doc! { "ok": 1.0 }], 0)]).await;
        let uri = format!("mongodb://{}", addr);
        let options = ClientOptions::builder().max_connections(1).build();
        let client = Client::connect_with_options(&uri, options).await.unwrap();

        let reply = client.run_command("test", doc! { "ping": 1 }).await.unwrap();
        assert_eq!(reply.get_f64("ok"), Some(1.0));
        assert!(!client.authenticated());
        client.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_direct_mode_command() {
        let addr = fake_server(vec![(vec![doc! { "ok": 1.0, "n": 5i64 }], 0)]).await;
        let uri = format!("mongodb://{}", addr);
        let options = ClientOptions::builder().direct(true).build();
        let client = Client::connect_with_options(&uri, options).await.unwrap();

        let reply = client.run_command("test", doc! { "count": "c" }).await.unwrap();
        assert_eq!(reply.get_i64("n"), Some(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_client_request_ids_advance() {
        let addr = fake_server(vec![
            (vec![doc! { "ok": 1.0 }], 0),
            (vec![doc! { "ok": 1.0 }], 0),
        ])
        .await;
        let uri = format!("mongodb://{}", addr);
        let options = ClientOptions::builder().max_connections(1).build();
        let client = Client::connect_with_options(&uri, options).await.unwrap();

        client.run_command("t", doc! { "ping": 1 }).await.unwrap();
        client.run_command("t", doc! { "ping": 1 }).await.unwrap();
        assert_eq!(client.next_request_id(), 3);
    }
}
