//! # KuMongo
//!
//! 通过遗留线协议 (OP_QUERY / OP_GET_MORE) 访问 MongoDB 的异步客户端。
//!
//! - **连接池**: 每个 (副本 × 槽位) 一个专属工作任务,独占套接字,
//!   通道收发,槽位内请求严格先进先出
//! - **游标引擎**: 惰性批量拉取,支持 limit/skip/排序/投影和
//!   固定集合上的尾随游标
//! - **认证**: SCRAM-SHA-1 (含服务器签名校验) 与遗留 MONGODB-CR
//! - **TLS**: rustls,支持 `mongodb+srv://` 方案与 DNS SRV 发现
//!
//! ## 快速开始
//!
//! ```rust,ignore
//! use kumongo_bson::doc;
//! use kumongo_core::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect("mongodb://localhost:27017").await?;
//!     let coll = client.database("app").collection("events");
//!
//!     coll.insert(vec![doc! { "iter": 0, "label": "l" }]).await?;
//!     let found = coll.find(doc! { "label": "l" }).all().await?;
//!     println!("{} documents", found.len());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod collection;
pub mod connection;
pub mod cursor;
pub mod database;
pub mod pool;
pub mod srv;
#[cfg(feature = "tls")]
pub mod tls;
pub mod wire;

pub use kumongo_bson as bson;
pub use kumongo_common as common;
pub use kumongo_query as query;

pub use client::Client;
pub use collection::Collection;
pub use connection::{
    AuthMechanism, ClientOptions, ClientOptionsBuilder, ConnectionString, Credentials,
    TlsOptions, TlsProtocol,
};
pub use cursor::Cursor;
pub use database::{Database, StatusReply};
pub use srv::{DnsSrvResolver, SrvResolver};

pub use bson::{Bson, Document};
pub use common::{MongoError, MongoResult, ObjectId, Replica, DEFAULT_PORT};
pub use query::{compile, Expression};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 初始化 tracing 日志;环境变量 RUST_LOG 控制过滤
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}
