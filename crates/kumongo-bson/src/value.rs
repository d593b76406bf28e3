//! BSON 值类型定义模块
//!
//! 定义 BSON 1.1 支持的所有数据类型，包括基础类型和复合类型。
//! 使用 `CompactString` 优化短字符串的内存占用。

use crate::document::Document;
use crate::spec::BinarySubtype;
use crate::{BsonError, BsonResult};
use chrono::{DateTime, TimeZone, Utc};
use compact_str::CompactString;
use kumongo_common::ObjectId;
use std::fmt;
use uuid::Uuid;

/// BSON 值的枚举类型
///
/// 表示 BSON 1.1 格式支持的所有数据类型。变体顺序与元素标记一致。
///
/// # 支持的类型
///
/// - **基础类型**: Double, String, Boolean, Int32, Int64, Null
/// - **标识类型**: ObjectId, Binary (含 Uuid 子类型)
/// - **时间类型**: DateTime (秒级精度), Timestamp (内部复制时间戳)
/// - **复合类型**: Array, Document
/// - **遗留类型**: Undefined, Regex, DbPointer, JavaScript(WithScope), MinKey, MaxKey
///
/// # 示例
///
/// ```rust,ignore
/// use kumongo_bson::Bson;
///
/// let value = Bson::String("hello".into());
/// assert_eq!(value.type_name(), "string");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Bson {
    /// 64 位浮点数
    Double(f64),
    /// UTF-8 字符串（使用 CompactString 优化短字符串）
    String(CompactString),
    /// 文档（有序键值对，允许重复键）
    Document(Document),
    /// 值数组
    Array(Vec<Bson>),
    /// 二进制数据（带子类型字节）
    Binary(Binary),
    /// Undefined（已废弃类型，保留往返能力）
    Undefined,
    /// 12 字节的唯一对象标识符
    ObjectId(ObjectId),
    /// 布尔值
    Boolean(bool),
    /// UTC 日期时间（内存中为秒级精度，线上为 int64 毫秒）
    DateTime(DateTime<Utc>),
    /// 空值
    Null,
    /// 正则表达式
    Regex(RegexValue),
    /// DBPointer（已废弃：命名空间 + ObjectId）
    DbPointer(DbPointerValue),
    /// JavaScript 代码
    JavaScript(CompactString),
    /// 带作用域的 JavaScript 代码（作用域仅存储，不解释）
    JavaScriptWithScope(JsCodeWithScope),
    /// 32 位有符号整数
    Int32(i32),
    /// 内部时间戳
    Timestamp(TimestampValue),
    /// 64 位有符号整数
    Int64(i64),
    /// 比任何值都小的哨兵
    MinKey,
    /// 比任何值都大的哨兵
    MaxKey,
}

/// 二进制值
///
/// 子类型字节 + 原始负载。`UuidOld`、`Function`、`BinaryOld` 作为不透明字节往返。
#[derive(Debug, Clone, PartialEq)]
pub struct Binary {
    /// 二进制子类型
    pub subtype: BinarySubtype,
    /// 负载字节
    pub bytes: Vec<u8>,
}

/// 正则表达式值
///
/// 包含正则表达式的模式和选项（如 i, m, s 等）
#[derive(Debug, Clone, PartialEq)]
pub struct RegexValue {
    /// 正则表达式模式
    pub pattern: CompactString,
    /// 正则表达式选项
    pub options: CompactString,
}

/// DBPointer 值（已废弃类型）
#[derive(Debug, Clone, PartialEq)]
pub struct DbPointerValue {
    /// 指向的命名空间 "<db>.<collection>"
    pub namespace: CompactString,
    /// 指向的文档 ObjectId
    pub id: ObjectId,
}

/// 带作用域的 JavaScript 代码值
///
/// 作用域为变量绑定文档，本库只负责无损往返。
#[derive(Debug, Clone, PartialEq)]
pub struct JsCodeWithScope {
    /// JavaScript 代码
    pub code: CompactString,
    /// 作用域（变量绑定）
    pub scope: Document,
}

/// 内部时间戳值
///
/// 线上形式为单个小端 int64：低 32 位为 increment，高 32 位为 timestamp。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampValue {
    /// 同一秒内的序号
    pub increment: i32,
    /// 秒级 Unix 时间
    pub timestamp: i32,
}

impl TimestampValue {
    pub fn to_i64(self) -> i64 {
        ((self.timestamp as i64) << 32) | (self.increment as u32 as i64)
    }

    pub fn from_i64(raw: i64) -> Self {
        Self {
            increment: raw as i32,
            timestamp: (raw >> 32) as i32,
        }
    }
}

impl Bson {
    /// 创建空文档值
    ///
    /// # Brief
    /// 返回一个不含任何字段的 `Bson::Document`
    ///
    /// # Returns
    /// 空文档值
    pub fn document() -> Self {
        Bson::Document(Document::new())
    }

    /// 创建秒级精度的 UTC 时间值
    ///
    /// # Brief
    /// 截断亚秒部分后包装为 `Bson::DateTime`；线上编码会无损加宽为毫秒
    ///
    /// # Arguments
    /// * `dt` - 任意精度的 UTC 时间
    ///
    /// # Returns
    /// 秒级精度的时间值
    pub fn datetime(dt: DateTime<Utc>) -> Self {
        Bson::DateTime(truncate_to_seconds(dt))
    }

    /// 获取值的类型名称
    ///
    /// # Brief
    /// 返回 BSON 值的类型名称字符串
    ///
    /// # Returns
    /// 类型名称的静态字符串引用
    pub fn type_name(&self) -> &'static str {
        match self {
            Bson::Double(_) => "double",
            Bson::String(_) => "string",
            Bson::Document(_) => "document",
            Bson::Array(_) => "array",
            Bson::Binary(_) => "binary",
            Bson::Undefined => "undefined",
            Bson::ObjectId(_) => "objectId",
            Bson::Boolean(_) => "boolean",
            Bson::DateTime(_) => "dateTime",
            Bson::Null => "null",
            Bson::Regex(_) => "regex",
            Bson::DbPointer(_) => "dbPointer",
            Bson::JavaScript(_) => "javascript",
            Bson::JavaScriptWithScope(_) => "javascriptWithScope",
            Bson::Int32(_) => "int32",
            Bson::Timestamp(_) => "timestamp",
            Bson::Int64(_) => "int64",
            Bson::MinKey => "minKey",
            Bson::MaxKey => "maxKey",
        }
    }

    /// 检查值是否为 Null
    pub fn is_null(&self) -> bool {
        matches!(self, Bson::Null)
    }

    fn kind_mismatch(&self, expected: &str) -> BsonError {
        BsonError::KindMismatch {
            expected: expected.to_string(),
            actual: self.type_name().to_string(),
        }
    }

    /// 尝试获取布尔值
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Bson::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// 尝试获取 i32 值
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Bson::Int32(n) => Some(*n),
            _ => None,
        }
    }

    /// 尝试获取 i64 值
    ///
    /// # Brief
    /// 如果值是整数类型（Int32 或 Int64），返回 i64 值
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Bson::Int32(n) => Some(*n as i64),
            Bson::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// 尝试获取 f64 值
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Bson::Double(n) => Some(*n),
            _ => None,
        }
    }

    /// 尝试获取字符串引用
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bson::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 尝试获取数组引用
    pub fn as_array(&self) -> Option<&Vec<Bson>> {
        match self {
            Bson::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// 尝试获取数组可变引用
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Bson>> {
        match self {
            Bson::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// 尝试获取文档引用
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Bson::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// 尝试获取文档可变引用
    pub fn as_document_mut(&mut self) -> Option<&mut Document> {
        match self {
            Bson::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// 尝试获取 ObjectId
    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Bson::ObjectId(id) => Some(*id),
            _ => None,
        }
    }

    /// 强制取整数值 (Int32 或 Int64)
    ///
    /// # Brief
    /// 类型不符时返回 `KindMismatch`
    pub fn to_int(&self) -> BsonResult<i64> {
        self.as_i64().ok_or_else(|| self.kind_mismatch("int32|int64"))
    }

    /// 强制取 Int32 值
    pub fn to_int32(&self) -> BsonResult<i32> {
        self.as_i32().ok_or_else(|| self.kind_mismatch("int32"))
    }

    /// 强制取 Int64 值
    pub fn to_int64(&self) -> BsonResult<i64> {
        match self {
            Bson::Int64(n) => Ok(*n),
            _ => Err(self.kind_mismatch("int64")),
        }
    }

    /// 强制取浮点值 (仅 Double)
    pub fn to_float(&self) -> BsonResult<f64> {
        self.as_f64().ok_or_else(|| self.kind_mismatch("double"))
    }

    /// 强制取布尔值
    pub fn to_bool(&self) -> BsonResult<bool> {
        self.as_bool().ok_or_else(|| self.kind_mismatch("boolean"))
    }

    /// 强制取字符串切片
    pub fn to_str(&self) -> BsonResult<&str> {
        self.as_str().ok_or_else(|| self.kind_mismatch("string"))
    }

    /// 强制取 ObjectId
    pub fn to_oid(&self) -> BsonResult<ObjectId> {
        self.as_object_id().ok_or_else(|| self.kind_mismatch("objectId"))
    }

    /// 强制取 UTC 时间
    pub fn to_time(&self) -> BsonResult<DateTime<Utc>> {
        match self {
            Bson::DateTime(dt) => Ok(*dt),
            _ => Err(self.kind_mismatch("dateTime")),
        }
    }

    /// 强制取二进制负载
    pub fn to_binary(&self) -> BsonResult<&[u8]> {
        match self {
            Bson::Binary(b) => Ok(&b.bytes),
            _ => Err(self.kind_mismatch("binary")),
        }
    }

    /// 容器元素个数
    ///
    /// # Brief
    /// 文档返回字段数，数组返回元素数；标量返回 `KindMismatch`
    pub fn len(&self) -> BsonResult<usize> {
        match self {
            Bson::Document(doc) => Ok(doc.len()),
            Bson::Array(arr) => Ok(arr.len()),
            _ => Err(self.kind_mismatch("document|array")),
        }
    }

    /// 检查文档是否包含指定键
    ///
    /// 仅当值为文档且键存在时返回 true。
    pub fn contains(&self, key: &str) -> bool {
        match self {
            Bson::Document(doc) => doc.contains_key(key),
            _ => false,
        }
    }

    /// 获取指定键的值
    ///
    /// # Brief
    /// 从文档中获取指定键的值，或从数组中获取指定索引的值
    ///
    /// # Arguments
    /// * `key` - 键名（文档）或索引字符串（数组）
    ///
    /// # Returns
    /// `Some(&Bson)` 如果找到，否则 `None`
    pub fn get(&self, key: &str) -> Option<&Bson> {
        match self {
            Bson::Document(doc) => doc.get(key),
            Bson::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get(i)),
            _ => None,
        }
    }

    /// 按数组下标取值（带边界检查）
    pub fn at(&self, index: usize) -> BsonResult<&Bson> {
        match self {
            Bson::Array(arr) => arr.get(index).ok_or_else(|| {
                BsonError::InvalidDocument(format!(
                    "Index {} out of bounds (len {})",
                    index,
                    arr.len()
                ))
            }),
            _ => Err(self.kind_mismatch("array")),
        }
    }

    /// 按路径获取嵌套值
    ///
    /// # Brief
    /// 使用点分隔的路径向下逐层访问嵌套文档；任意一步缺失或
    /// 不是文档时返回 None
    ///
    /// # Arguments
    /// * `path` - 点分隔的路径，如 "user.address.city"
    pub fn get_path(&self, path: &str) -> Option<&Bson> {
        let mut current = self;
        for part in path.split('.') {
            current = current.as_document()?.get(part)?;
        }
        Some(current)
    }

    /// 按路径写入嵌套值
    ///
    /// # Brief
    /// 自动创建缺失的中间文档；已有的非文档中间节点会被替换为文档
    ///
    /// # Arguments
    /// * `path` - 点分隔的路径
    /// * `value` - 要写入的值
    pub fn set_path(&mut self, path: &str, value: Bson) {
        let mut parts = path.split('.').peekable();
        let mut current = self;
        while let Some(part) = parts.next() {
            if !matches!(current, Bson::Document(_)) {
                *current = Bson::document();
            }
            let doc = current.as_document_mut().unwrap();
            if parts.peek().is_none() {
                doc.insert(part, value);
                return;
            }
            if doc.get(part).is_none() {
                doc.insert(part, Bson::document());
            }
            current = doc.get_mut(part).unwrap();
        }
    }

    /// 向数组追加元素
    pub fn push(&mut self, value: impl Into<Bson>) -> BsonResult<()> {
        match self {
            Bson::Array(arr) => {
                arr.push(value.into());
                Ok(())
            }
            _ => Err(self.kind_mismatch("array")),
        }
    }

    /// 向文档插入字段（替换首个同名字段，否则追加）
    pub fn insert(&mut self, key: impl Into<CompactString>, value: impl Into<Bson>) -> BsonResult<()> {
        match self {
            Bson::Document(doc) => {
                doc.insert(key, value);
                Ok(())
            }
            _ => Err(self.kind_mismatch("document")),
        }
    }
}

/// 深度合并两个值
///
/// # Brief
/// 文档对文档、数组对数组递归合并：a 的每个键若也在 b 中则递归合并，
/// 否则取 a 的值；随后追加仅在 b 中的键。非容器输入直接返回 a。
///
/// # Arguments
/// * `a` - 合并基准值
/// * `b` - 补充值
///
/// # Returns
/// 合并后的新值
pub fn merge(a: &Bson, b: &Bson) -> Bson {
    match (a, b) {
        (Bson::Document(da), Bson::Document(db)) => {
            let mut out = Document::with_capacity(da.len() + db.len());
            for (k, va) in da.iter() {
                match db.get(k) {
                    Some(vb) => out.push(k, merge(va, vb)),
                    None => out.push(k, va.clone()),
                }
            }
            for (k, vb) in db.iter() {
                if !da.contains_key(k) {
                    out.push(k, vb.clone());
                }
            }
            Bson::Document(out)
        }
        (Bson::Array(xa), Bson::Array(xb)) => {
            let mut out = Vec::with_capacity(xa.len().max(xb.len()));
            for (i, va) in xa.iter().enumerate() {
                match xb.get(i) {
                    Some(vb) => out.push(merge(va, vb)),
                    None => out.push(va.clone()),
                }
            }
            out.extend(xb.iter().skip(xa.len()).cloned());
            Bson::Array(out)
        }
        _ => a.clone(),
    }
}

/// 就地合并：按 `merge` 的规则将 b 并入 a
pub fn merge_into(a: &mut Bson, b: &Bson) {
    *a = merge(a, b);
}

fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(dt.timestamp(), 0).single().unwrap_or(dt)
}

impl Default for Bson {
    fn default() -> Self {
        Bson::Null
    }
}

impl fmt::Display for Bson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bson::Double(n) => write!(f, "{}", n),
            Bson::String(s) => write!(f, "\"{}\"", s),
            Bson::Document(doc) => write!(f, "{}", doc),
            Bson::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Bson::Binary(b) => write!(f, "<binary:{:#04x}:{} bytes>", b.subtype.to_u8(), b.bytes.len()),
            Bson::Undefined => write!(f, "undefined"),
            Bson::ObjectId(id) => write!(f, "ObjectId(\"{}\")", id),
            Bson::Boolean(b) => write!(f, "{}", b),
            Bson::DateTime(dt) => write!(f, "DateTime(\"{}\")", dt),
            Bson::Null => write!(f, "null"),
            Bson::Regex(r) => write!(f, "/{}/{}", r.pattern, r.options),
            Bson::DbPointer(p) => write!(f, "DBPointer(\"{}\", \"{}\")", p.namespace, p.id),
            Bson::JavaScript(code) => write!(f, "JavaScript({})", code),
            Bson::JavaScriptWithScope(js) => write!(f, "JavaScript({}, scope: {})", js.code, js.scope),
            Bson::Int32(n) => write!(f, "{}", n),
            Bson::Timestamp(ts) => write!(f, "Timestamp({}, {})", ts.timestamp, ts.increment),
            Bson::Int64(n) => write!(f, "{}", n),
            Bson::MinKey => write!(f, "MinKey"),
            Bson::MaxKey => write!(f, "MaxKey"),
        }
    }
}

// ============================================================================
// From 特征实现 - 支持从各种 Rust 类型转换为 Bson
// ============================================================================

impl From<bool> for Bson {
    fn from(v: bool) -> Self {
        Bson::Boolean(v)
    }
}

impl From<i32> for Bson {
    fn from(v: i32) -> Self {
        Bson::Int32(v)
    }
}

impl From<i64> for Bson {
    fn from(v: i64) -> Self {
        Bson::Int64(v)
    }
}

impl From<f64> for Bson {
    fn from(v: f64) -> Self {
        Bson::Double(v)
    }
}

impl From<&str> for Bson {
    fn from(v: &str) -> Self {
        Bson::String(CompactString::from(v))
    }
}

impl From<String> for Bson {
    fn from(v: String) -> Self {
        Bson::String(CompactString::from(v))
    }
}

impl From<CompactString> for Bson {
    fn from(v: CompactString) -> Self {
        Bson::String(v)
    }
}

impl From<Vec<u8>> for Bson {
    fn from(v: Vec<u8>) -> Self {
        Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: v,
        })
    }
}

impl From<ObjectId> for Bson {
    fn from(v: ObjectId) -> Self {
        Bson::ObjectId(v)
    }
}

impl From<Uuid> for Bson {
    fn from(v: Uuid) -> Self {
        Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: v.as_bytes().to_vec(),
        })
    }
}

impl From<DateTime<Utc>> for Bson {
    fn from(v: DateTime<Utc>) -> Self {
        Bson::datetime(v)
    }
}

impl From<Document> for Bson {
    fn from(v: Document) -> Self {
        Bson::Document(v)
    }
}

impl<T: Into<Bson>> From<Vec<T>> for Bson {
    fn from(v: Vec<T>) -> Self {
        Bson::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Bson>> From<Option<T>> for Bson {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Bson::Null,
        }
    }
}

/// 构造 Bson 的便捷宏
///
/// # 示例
///
/// ```rust,ignore
/// use kumongo_bson::bson;
///
/// let null = bson!(null);
/// let number = bson!(42);
/// let array = bson!([1, 2, 3]);
/// let doc = bson!({ "name": "test", "value": 123 });
/// let single = bson!("name": "test"); // 单键简写，同样得到单字段文档
/// ```
#[macro_export]
macro_rules! bson {
    (null) => {
        $crate::Bson::Null
    };
    (true) => {
        $crate::Bson::Boolean(true)
    };
    (false) => {
        $crate::Bson::Boolean(false)
    };
    ([ $($elem:tt),* $(,)? ]) => {
        $crate::Bson::Array(vec![ $($crate::bson!($elem)),* ])
    };
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        {
            let mut doc = $crate::Document::new();
            $(
                doc.push($key, $crate::bson!($value));
            )*
            $crate::Bson::Document(doc)
        }
    };
    ($key:literal : $value:tt) => {
        {
            let mut doc = $crate::Document::new();
            doc.push($key, $crate::bson!($value));
            $crate::Bson::Document(doc)
        }
    };
    ($e:expr) => {
        $crate::Bson::from($e)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_type_names() {
        assert_eq!(Bson::Null.type_name(), "null");
        assert_eq!(Bson::Int32(1).type_name(), "int32");
        assert_eq!(Bson::from("x").type_name(), "string");
        assert_eq!(Bson::document().type_name(), "document");
    }

    #[test]
    fn test_typed_accessors() {
        assert_eq!(Bson::Int32(7).to_int().unwrap(), 7);
        assert_eq!(Bson::Int64(7).to_int().unwrap(), 7);
        assert!(Bson::Double(7.0).to_int().is_err());
        assert!(Bson::Int32(7).to_float().is_err());
        assert_eq!(Bson::Double(1.5).to_float().unwrap(), 1.5);
        assert!(Bson::Int32(7).to_int64().is_err());
        assert_eq!(Bson::Int32(7).to_int32().unwrap(), 7);
    }

    #[test]
    fn test_kind_mismatch_message() {
        let err = Bson::Null.to_bool().unwrap_err();
        match err {
            BsonError::KindMismatch { expected, actual } => {
                assert_eq!(expected, "boolean");
                assert_eq!(actual, "null");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_len_and_contains() {
        let v = bson!({ "a": 1, "b": 2 });
        assert_eq!(v.len().unwrap(), 2);
        assert!(v.contains("a"));
        assert!(!v.contains("c"));
        assert!(!Bson::Int32(1).contains("a"));
        assert!(Bson::Int32(1).len().is_err());

        let arr = bson!([1, 2, 3]);
        assert_eq!(arr.len().unwrap(), 3);
    }

    #[test]
    fn test_array_index() {
        let arr = bson!([10, 20]);
        assert_eq!(arr.at(1).unwrap().to_int().unwrap(), 20);
        assert!(arr.at(2).is_err());
        assert!(Bson::Null.at(0).is_err());
    }

    #[test]
    fn test_path_accessors() {
        let mut v = bson!({ "user": { "address": { "city": "Wuhan" } } });
        assert_eq!(
            v.get_path("user.address.city").unwrap().to_str().unwrap(),
            "Wuhan"
        );
        assert!(v.get_path("user.address.zip").is_none());
        assert!(v.get_path("user.address.city.deeper").is_none());

        v.set_path("user.profile.age", Bson::Int32(17));
        assert_eq!(v.get_path("user.profile.age").unwrap().to_int().unwrap(), 17);
        // 原有的兄弟字段不受影响
        assert!(v.get_path("user.address.city").is_some());
    }

    #[test]
    fn test_merge_identity() {
        let a = bson!({ "x": 1, "y": { "z": 2 } });
        let empty = Bson::document();
        assert_eq!(merge(&a, &empty), a);
        assert_eq!(merge(&empty, &a), a);
    }

    #[test]
    fn test_merge_deep() {
        let a = bson!({ "x": 1, "nest": { "a": 1, "b": 2 } });
        let b = bson!({ "y": 3, "nest": { "b": 9, "c": 4 } });
        let merged = merge(&a, &b);
        assert_eq!(merged.get_path("nest.a").unwrap().to_int().unwrap(), 1);
        // 冲突键取 a 侧（递归后 b 只补充缺失键）
        assert_eq!(merged.get_path("nest.b").unwrap().to_int().unwrap(), 2);
        assert_eq!(merged.get_path("nest.c").unwrap().to_int().unwrap(), 4);
        assert_eq!(merged.get("x").unwrap().to_int().unwrap(), 1);
        assert_eq!(merged.get("y").unwrap().to_int().unwrap(), 3);
    }

    #[test]
    fn test_merge_arrays() {
        let a = bson!([1, 2]);
        let b = bson!([9, 8, 7]);
        let merged = merge(&a, &b);
        let arr = merged.as_array().unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr[0].to_int().unwrap(), 1);
        assert_eq!(arr[2].to_int().unwrap(), 7);
    }

    #[test]
    fn test_merge_scalar_returns_a() {
        let a = Bson::Int32(1);
        let b = bson!({ "x": 2 });
        assert_eq!(merge(&a, &b), a);
    }

    #[test]
    fn test_merge_into() {
        let mut a = bson!({ "x": 1 });
        merge_into(&mut a, &bson!({ "y": 2 }));
        assert_eq!(a.len().unwrap(), 2);
    }

    #[test]
    fn test_datetime_truncation() {
        let dt = Utc.timestamp_millis_opt(1_500_000_123_456).single().unwrap();
        let v = Bson::datetime(dt);
        assert_eq!(v.to_time().unwrap().timestamp(), 1_500_000_123);
        assert_eq!(v.to_time().unwrap().timestamp_subsec_millis(), 0);
    }

    #[test]
    fn test_timestamp_punning() {
        let ts = TimestampValue {
            increment: 7,
            timestamp: 1_600_000_000,
        };
        assert_eq!(TimestampValue::from_i64(ts.to_i64()), ts);

        let neg = TimestampValue {
            increment: -1,
            timestamp: -2,
        };
        assert_eq!(TimestampValue::from_i64(neg.to_i64()), neg);
    }

    #[test]
    fn test_bson_macro_single_pair() {
        // 单键简写与完整写法等价
        let short = bson!("foo": 3);
        let full = bson!({ "foo": 3 });
        assert_eq!(short, full);
    }

    #[test]
    fn test_bson_macro_nested() {
        let v = bson!({
            "name": "kumongo",
            "tags": ["db", "driver"],
            "meta": { "stars": 128 },
        });
        assert_eq!(v.get("name").unwrap().to_str().unwrap(), "kumongo");
        assert_eq!(v.get_path("meta.stars").unwrap().to_int().unwrap(), 128);
        assert_eq!(v.get("tags").unwrap().len().unwrap(), 2);
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Bson::from(Option::<i32>::None), Bson::Null);
        assert_eq!(Bson::from(Some(3i32)), Bson::Int32(3));
    }

    #[test]
    fn test_from_uuid() {
        let u = Uuid::new_v4();
        match Bson::from(u) {
            Bson::Binary(b) => {
                assert_eq!(b.subtype, BinarySubtype::Uuid);
                assert_eq!(b.bytes.len(), 16);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_doc_macro() {
        let d = doc! { "a": 1, "b": "two" };
        assert_eq!(d.len(), 2);
        assert_eq!(d.get_i32("a"), Some(1));
        assert_eq!(d.get_str("b"), Some("two"));
    }
}
