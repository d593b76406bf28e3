//! BSON 文档结构模块
//!
//! 提供插入有序的 Document 结构。与哈希表不同，Document 以
//! `Vec<(键, 值)>` 存储：键保持插入顺序，且允许重复键往返
//! （键有序而非唯一）。

use crate::value::Bson;
use compact_str::CompactString;
use kumongo_common::ObjectId;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// BSON 文档
///
/// 字符串键到 Bson 值的插入有序映射。`insert` 表现为映射语义
/// （替换首个同名键），`push` 表现为追加语义（允许产生重复键）。
/// `get` 总是返回首个匹配键的值。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    entries: Vec<(CompactString, Bson)>,
}

impl Document {
    /// 创建空文档
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// 创建带预分配容量的空文档
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// 插入字段
    ///
    /// # Brief
    /// 替换首个同名字段的值；不存在则追加到末尾
    ///
    /// # Arguments
    /// * `key` - 字段名
    /// * `value` - 字段值
    ///
    /// # Returns
    /// 被替换的旧值（如有）
    pub fn insert(
        &mut self,
        key: impl Into<CompactString>,
        value: impl Into<Bson>,
    ) -> Option<Bson> {
        let key = key.into();
        let value = value.into();
        for (k, v) in self.entries.iter_mut() {
            if *k == key {
                return Some(std::mem::replace(v, value));
            }
        }
        self.entries.push((key, value));
        None
    }

    /// 追加字段
    ///
    /// # Brief
    /// 无条件追加到末尾，同名字段会产生重复键
    pub fn push(&mut self, key: impl Into<CompactString>, value: impl Into<Bson>) {
        self.entries.push((key.into(), value.into()));
    }

    /// 获取字段值（首个匹配）
    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// 获取字段的可变引用（首个匹配）
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Bson> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// 移除首个同名字段并返回其值
    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// 检查字段是否存在
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Bson> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bson)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(|v| v.as_i32())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_array(&self, key: &str) -> Option<&Vec<Bson>> {
        self.get(key).and_then(|v| v.as_array())
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(|v| v.as_document())
    }

    pub fn get_object_id(&self, key: &str) -> Option<ObjectId> {
        self.get(key).and_then(|v| v.as_object_id())
    }

    /// 按路径获取嵌套值
    ///
    /// # Brief
    /// 使用点分隔的路径访问嵌套文档中的值
    ///
    /// # Arguments
    /// * `path` - 点分隔的路径，如 "user.address.city"
    pub fn get_path(&self, path: &str) -> Option<&Bson> {
        match path.split_once('.') {
            None => self.get(path),
            Some((head, rest)) => self.get(head)?.get_path(rest),
        }
    }

    /// 深度合并另一个文档
    ///
    /// # Brief
    /// 按 `value::merge` 的规则：自身键优先（容器递归），
    /// 再追加 other 独有的键
    pub fn merge_from(&mut self, other: &Document) {
        let merged = crate::value::merge(
            &Bson::Document(self.clone()),
            &Bson::Document(other.clone()),
        );
        if let Bson::Document(doc) = merged {
            *self = doc;
        }
    }

    /// 序列化为 BSON 字节
    pub fn to_bytes(&self) -> crate::BsonResult<Vec<u8>> {
        crate::codec::encode_to_vec(self)
    }

    /// 从 BSON 字节解析文档
    pub fn from_bytes(data: &[u8]) -> crate::BsonResult<Self> {
        crate::codec::decode(data)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "\"{}\": {}", k, v)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(CompactString, Bson)> for Document {
    fn from_iter<I: IntoIterator<Item = (CompactString, Bson)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = (CompactString, Bson);
    type IntoIter = std::vec::IntoIter<(CompactString, Bson)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k.as_str(), v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DocVisitor;

        impl<'de> Visitor<'de> for DocVisitor {
            type Value = Document;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a BSON document")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Document, A::Error> {
                let mut doc = Document::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<CompactString, Bson>()? {
                    doc.push(key, value);
                }
                Ok(doc)
            }
        }

        deserializer.deserialize_map(DocVisitor)
    }
}

/// 构造 Document 的便捷宏
///
/// # 示例
///
/// ```rust,ignore
/// use kumongo_bson::doc;
///
/// let empty = doc! {};
/// let doc = doc! {
///     "name": "test",
///     "value": 123
/// };
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ($($key:tt : $value:tt),* $(,)?) => {
        {
            let mut doc = $crate::Document::new();
            $(
                doc.push($key, $crate::bson!($value));
            )*
            doc
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut doc = Document::new();
        doc.insert("name", "kumongo");
        doc.insert("version", 3i32);
        assert_eq!(doc.get_str("name"), Some("kumongo"));
        assert_eq!(doc.get_i32("version"), Some(3));
        assert_eq!(doc.get("missing"), None);
    }

    #[test]
    fn test_insert_replaces_first() {
        let mut doc = Document::new();
        doc.insert("k", 1i32);
        let old = doc.insert("k", 2i32);
        assert_eq!(old, Some(Bson::Int32(1)));
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.get_i32("k"), Some(2));
    }

    #[test]
    fn test_push_allows_duplicates() {
        let mut doc = Document::new();
        doc.push("k", 1i32);
        doc.push("k", 2i32);
        assert_eq!(doc.len(), 2);
        // get 返回首个匹配
        assert_eq!(doc.get_i32("k"), Some(1));
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["k", "k"]);
    }

    #[test]
    fn test_insertion_order() {
        let mut doc = Document::new();
        for k in ["z", "a", "m", "b"] {
            doc.push(k, 1i32);
        }
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["z", "a", "m", "b"]);
    }

    #[test]
    fn test_remove() {
        let mut doc = Document::new();
        doc.push("a", 1i32);
        doc.push("b", 2i32);
        assert_eq!(doc.remove("a"), Some(Bson::Int32(1)));
        assert_eq!(doc.remove("a"), None);
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_get_path() {
        let mut inner = Document::new();
        inner.insert("city", "Shenzhen");
        let mut doc = Document::new();
        doc.insert("address", inner);
        assert_eq!(
            doc.get_path("address.city").unwrap().to_str().unwrap(),
            "Shenzhen"
        );
        assert!(doc.get_path("address.zip").is_none());
        assert!(doc.get_path("nope.city").is_none());
    }

    #[test]
    fn test_merge_from() {
        let mut a = Document::new();
        a.insert("x", 1i32);
        let mut b = Document::new();
        b.insert("x", 9i32);
        b.insert("y", 2i32);
        a.merge_from(&b);
        assert_eq!(a.get_i32("x"), Some(1));
        assert_eq!(a.get_i32("y"), Some(2));
    }
}
