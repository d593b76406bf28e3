//! # KuMongo BSON
//!
//! BSON 1.1 值模型与二进制编解码，是 KuMongo 驱动的数据底座。
//!
//! - **完整类型集**：覆盖 BSON 1.1 的全部元素类型（含废弃的
//!   Undefined、DBPointer 等），任意构造出的值都能无损往返
//! - **有序文档**：`Document` 保持插入顺序并允许重复键往返
//! - **Serde 集成**：`to_bson` / `from_bson` 完成对象映射，
//!   serde 属性即字段标签指令
//! - **JSON 互转**：非 JSON 原生类型以 `$oid`、`$date` 等扩展形式表达
//!
//! ## 快速开始
//!
//! ```rust,ignore
//! use kumongo_bson::{doc, Document};
//!
//! let mut doc = doc! { "name": "kumongo", "version": 1 };
//!
//! // 序列化
//! let bytes = doc.to_bytes().unwrap();
//!
//! // 反序列化
//! let parsed = Document::from_bytes(&bytes).unwrap();
//! assert_eq!(parsed, doc);
//! ```

pub mod codec;
pub mod de;
pub mod document;
pub mod json;
pub mod ser;
pub mod spec;
pub mod value;

pub use codec::{decode, decode_prefix, encode, encode_to_vec};
pub use de::{from_bson, from_document, serde_helpers};
pub use document::Document;
pub use ser::{to_bson, to_document};
pub use spec::BinarySubtype;
pub use value::{
    merge, merge_into, Binary, Bson, DbPointerValue, JsCodeWithScope, RegexValue, TimestampValue,
};

use thiserror::Error;

/// BSON 操作的错误类型
///
/// 包含编解码、对象映射过程中可能出现的所有错误情况
#[derive(Error, Debug)]
pub enum BsonError {
    /// IO 操作错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 无效的元素标记字节
    #[error("Invalid type marker: {0:#04x}")]
    InvalidTypeMarker(u8),

    /// 字符串不是有效的 UTF-8 编码
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// 意外的输入结束
    #[error("Unexpected end of input")]
    UnexpectedEof,

    /// 文档格式无效
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// 嵌套层级过深
    #[error("Nesting too deep: max {0}")]
    NestingTooDeep(usize),

    /// 文档体积超出限制
    #[error("Document too large: max {0} bytes")]
    DocumentTooLarge(usize),

    /// 类型化访问器作用在错误的类型上
    #[error("Kind mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: String, actual: String },

    /// 对象映射所需的键缺失
    #[error("Missing key: {0}")]
    MissingKey(String),

    /// 序列化过程错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 反序列化过程错误
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<BsonError> for kumongo_common::MongoError {
    fn from(e: BsonError) -> Self {
        match e {
            BsonError::KindMismatch { expected, actual } => {
                kumongo_common::MongoError::KindMismatch { expected, actual }
            }
            BsonError::MissingKey(key) => kumongo_common::MongoError::MissingKey(key),
            other => kumongo_common::MongoError::Protocol(other.to_string()),
        }
    }
}

/// BSON 操作的 Result 类型别名
pub type BsonResult<T> = Result<T, BsonError>;
