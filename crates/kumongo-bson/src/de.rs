//! Serde 反序列化模块
//!
//! 实现 Serde Deserializer trait,将 Bson 值树反序列化为 Rust 数据结构。
//!
//! 支持所有标准 Rust 类型的反序列化:
//! - 基本类型: bool, 整数, 浮点数, 字符串
//! - 复合类型: 结构体, 枚举, 数组, 元组, HashMap
//! - 自动类型转换: Int32 -> i64 等 (在范围内)
//!
//! ObjectId、日期等特殊类型以扩展形式(`$oid`、`$date` 等)呈现给
//! visitor,与序列化侧的折叠规则对应。非 omitempty 字段缺失时
//! 返回 `MissingKey`。

use crate::document::Document;
use crate::value::{Bson, DbPointerValue, JsCodeWithScope, RegexValue};
use crate::BsonError;
use serde::de::value::{BoolDeserializer, I32Deserializer, I64Deserializer, StringDeserializer};
use serde::de::{
    self, DeserializeSeed, IntoDeserializer, MapAccess, SeqAccess, Visitor,
};
use serde::forward_to_deserialize_any;
use serde::Deserialize;
use std::fmt;

pub struct Deserializer<'de> {
    input: &'de Bson,
}

impl<'de> Deserializer<'de> {
    pub fn from_bson(input: &'de Bson) -> Self {
        Deserializer { input }
    }
}

/// 将 Bson 值反序列化为任意 Rust 类型
pub fn from_bson<'a, T: Deserialize<'a>>(value: &'a Bson) -> Result<T, BsonError> {
    let deserializer = Deserializer::from_bson(value);
    T::deserialize(deserializer)
}

/// 将 Document 反序列化为任意 Rust 类型
pub fn from_document<'a, T: Deserialize<'a>>(doc: &'a Document) -> Result<T, BsonError> {
    T::deserialize(DocumentDeserializer { doc })
}

impl de::Error for BsonError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        BsonError::Deserialization(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        BsonError::MissingKey(field.to_string())
    }
}

impl<'de> de::Deserializer<'de> for Deserializer<'de> {
    type Error = BsonError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Double(n) => visitor.visit_f64(*n),
            Bson::String(s) => visitor.visit_str(s.as_str()),
            Bson::Document(doc) => visitor.visit_map(MapDeserializer::new(doc)),
            Bson::Array(arr) => visitor.visit_seq(SeqDeserializer::new(arr.iter())),
            Bson::Binary(b) => visitor.visit_bytes(&b.bytes),
            Bson::Undefined => {
                visitor.visit_map(ExtendedAccess::new(vec![("$undefined", ExtValue::Bool(true))]))
            }
            Bson::ObjectId(id) => visitor.visit_map(ExtendedAccess::new(vec![(
                "$oid",
                ExtValue::String(id.to_hex()),
            )])),
            Bson::Boolean(b) => visitor.visit_bool(*b),
            Bson::DateTime(dt) => visitor.visit_map(ExtendedAccess::new(vec![(
                "$date",
                ExtValue::I64(dt.timestamp() * 1000),
            )])),
            Bson::Null => visitor.visit_unit(),
            Bson::Regex(RegexValue { pattern, options }) => {
                visitor.visit_map(ExtendedAccess::new(vec![
                    ("$regex", ExtValue::Str(pattern.as_str())),
                    ("$options", ExtValue::Str(options.as_str())),
                ]))
            }
            Bson::DbPointer(DbPointerValue { namespace, id }) => {
                visitor.visit_map(ExtendedAccess::new(vec![
                    ("$ref", ExtValue::Str(namespace.as_str())),
                    ("$id", ExtValue::String(id.to_hex())),
                ]))
            }
            Bson::JavaScript(code) => visitor.visit_map(ExtendedAccess::new(vec![(
                "$code",
                ExtValue::Str(code.as_str()),
            )])),
            Bson::JavaScriptWithScope(JsCodeWithScope { code, scope }) => {
                visitor.visit_map(ExtendedAccess::new(vec![
                    ("$code", ExtValue::Str(code.as_str())),
                    ("$scope", ExtValue::Doc(scope)),
                ]))
            }
            Bson::Int32(n) => visitor.visit_i32(*n),
            Bson::Timestamp(ts) => visitor.visit_map(ExtendedAccess::new(vec![(
                "$timestamp",
                ExtValue::I64(ts.to_i64()),
            )])),
            Bson::Int64(n) => visitor.visit_i64(*n),
            Bson::MinKey => {
                visitor.visit_map(ExtendedAccess::new(vec![("$minKey", ExtValue::I32(1))]))
            }
            Bson::MaxKey => {
                visitor.visit_map(ExtendedAccess::new(vec![("$maxKey", ExtValue::I32(1))]))
            }
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Boolean(b) => visitor.visit_bool(*b),
            _ => Err(BsonError::Deserialization(format!(
                "Expected boolean, got {}",
                self.input.type_name()
            ))),
        }
    }

    fn deserialize_i8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_i16<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_i32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_i64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Int32(n) => visitor.visit_i32(*n),
            Bson::Int64(n) => visitor.visit_i64(*n),
            _ => Err(BsonError::Deserialization(format!(
                "Expected integer, got {}",
                self.input.type_name()
            ))),
        }
    }

    fn deserialize_u8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_u64(visitor)
    }

    fn deserialize_u16<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_u64(visitor)
    }

    fn deserialize_u32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_u64(visitor)
    }

    fn deserialize_u64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Int32(n) if *n >= 0 => visitor.visit_u64(*n as u64),
            Bson::Int64(n) if *n >= 0 => visitor.visit_u64(*n as u64),
            _ => Err(BsonError::Deserialization(format!(
                "Expected unsigned integer, got {}",
                self.input.type_name()
            ))),
        }
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_f64(visitor)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Double(n) => visitor.visit_f64(*n),
            Bson::Int32(n) => visitor.visit_f64(*n as f64),
            Bson::Int64(n) => visitor.visit_f64(*n as f64),
            _ => Err(BsonError::Deserialization(format!(
                "Expected float, got {}",
                self.input.type_name()
            ))),
        }
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::String(s) if s.chars().count() == 1 => {
                visitor.visit_char(s.chars().next().unwrap())
            }
            _ => Err(BsonError::Deserialization(format!(
                "Expected char, got {}",
                self.input.type_name()
            ))),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::String(s) => visitor.visit_str(s.as_str()),
            Bson::JavaScript(code) => visitor.visit_str(code.as_str()),
            _ => Err(BsonError::Deserialization(format!(
                "Expected string, got {}",
                self.input.type_name()
            ))),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Binary(b) => visitor.visit_bytes(&b.bytes),
            _ => Err(BsonError::Deserialization(format!(
                "Expected binary, got {}",
                self.input.type_name()
            ))),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Null | Bson::Undefined => visitor.visit_unit(),
            _ => Err(BsonError::Deserialization(format!(
                "Expected null, got {}",
                self.input.type_name()
            ))),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Array(arr) => visitor.visit_seq(SeqDeserializer::new(arr.iter())),
            _ => Err(BsonError::Deserialization(format!(
                "Expected array, got {}",
                self.input.type_name()
            ))),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Document(doc) => visitor.visit_map(MapDeserializer::new(doc)),
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::String(s) => visitor.visit_enum(s.as_str().into_deserializer()),
            Bson::Document(doc) if doc.len() == 1 => {
                let (key, value) = doc.iter().next().unwrap();
                visitor.visit_enum(EnumDeserializer {
                    variant: key,
                    value,
                })
            }
            _ => Err(BsonError::Deserialization(format!(
                "Expected string or document for enum, got {}",
                self.input.type_name()
            ))),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }
}

/// 以文档为根的反序列化入口
struct DocumentDeserializer<'de> {
    doc: &'de Document,
}

impl<'de> de::Deserializer<'de> for DocumentDeserializer<'de> {
    type Error = BsonError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_map(MapDeserializer::new(self.doc))
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

struct SeqDeserializer<'de, I> {
    iter: I,
    _marker: std::marker::PhantomData<&'de ()>,
}

impl<'de, I: Iterator<Item = &'de Bson>> SeqDeserializer<'de, I> {
    fn new(iter: I) -> Self {
        Self {
            iter,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<'de, I: Iterator<Item = &'de Bson>> SeqAccess<'de> for SeqDeserializer<'de, I> {
    type Error = BsonError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, Self::Error> {
        match self.iter.next() {
            Some(value) => seed.deserialize(Deserializer::from_bson(value)).map(Some),
            None => Ok(None),
        }
    }
}

struct MapDeserializer<'de> {
    iter: Box<dyn Iterator<Item = (&'de str, &'de Bson)> + 'de>,
    value: Option<&'de Bson>,
}

impl<'de> MapDeserializer<'de> {
    fn new(doc: &'de Document) -> Self {
        Self {
            iter: Box::new(doc.iter()),
            value: None,
        }
    }
}

impl<'de> MapAccess<'de> for MapDeserializer<'de> {
    type Error = BsonError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Self::Error> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(key.into_deserializer()).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> Result<V::Value, Self::Error> {
        let value = self
            .value
            .take()
            .ok_or_else(|| BsonError::Deserialization("No value".to_string()))?;
        seed.deserialize(Deserializer::from_bson(value))
    }
}

/// 扩展形式条目值
enum ExtValue<'de> {
    Str(&'de str),
    String(String),
    I32(i32),
    I64(i64),
    Bool(bool),
    Doc(&'de Document),
}

/// 将特殊 Bson 类型呈现为扩展形式映射的 MapAccess
struct ExtendedAccess<'de> {
    entries: std::vec::IntoIter<(&'static str, ExtValue<'de>)>,
    value: Option<ExtValue<'de>>,
}

impl<'de> ExtendedAccess<'de> {
    fn new(entries: Vec<(&'static str, ExtValue<'de>)>) -> Self {
        Self {
            entries: entries.into_iter(),
            value: None,
        }
    }
}

impl<'de> MapAccess<'de> for ExtendedAccess<'de> {
    type Error = BsonError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Self::Error> {
        match self.entries.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(key.into_deserializer()).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> Result<V::Value, Self::Error> {
        let value = self
            .value
            .take()
            .ok_or_else(|| BsonError::Deserialization("No value".to_string()))?;
        match value {
            ExtValue::Str(s) => seed.deserialize(s.into_deserializer()),
            ExtValue::String(s) => {
                let d: StringDeserializer<BsonError> = s.into_deserializer();
                seed.deserialize(d)
            }
            ExtValue::I32(n) => {
                let d: I32Deserializer<BsonError> = n.into_deserializer();
                seed.deserialize(d)
            }
            ExtValue::I64(n) => {
                let d: I64Deserializer<BsonError> = n.into_deserializer();
                seed.deserialize(d)
            }
            ExtValue::Bool(b) => {
                let d: BoolDeserializer<BsonError> = b.into_deserializer();
                seed.deserialize(d)
            }
            ExtValue::Doc(doc) => seed.deserialize(DocumentDeserializer { doc }),
        }
    }
}

struct EnumDeserializer<'de> {
    variant: &'de str,
    value: &'de Bson,
}

impl<'de> de::EnumAccess<'de> for EnumDeserializer<'de> {
    type Error = BsonError;
    type Variant = VariantDeserializer<'de>;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, Self::Variant), Self::Error> {
        use serde::de::value::StrDeserializer;
        let deserializer: StrDeserializer<'de, BsonError> = self.variant.into_deserializer();
        let variant: V::Value = seed.deserialize(deserializer)?;
        Ok((variant, VariantDeserializer { value: self.value }))
    }
}

struct VariantDeserializer<'de> {
    value: &'de Bson,
}

impl<'de> de::VariantAccess<'de> for VariantDeserializer<'de> {
    type Error = BsonError;

    fn unit_variant(self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(
        self,
        seed: T,
    ) -> Result<T::Value, Self::Error> {
        seed.deserialize(Deserializer::from_bson(self.value))
    }

    fn tuple_variant<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        de::Deserializer::deserialize_seq(Deserializer::from_bson(self.value), visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        de::Deserializer::deserialize_map(Deserializer::from_bson(self.value), visitor)
    }
}

// Bson 自身的 Deserialize:visitor 收集任意自描述输入,
// 映射经 fold_extended 折叠回特殊类型。
impl<'de> Deserialize<'de> for Bson {
    fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BsonVisitor;

        impl<'de> Visitor<'de> for BsonVisitor {
            type Value = Bson;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("any BSON value")
            }

            fn visit_bool<E>(self, v: bool) -> Result<Bson, E> {
                Ok(Bson::Boolean(v))
            }

            fn visit_i8<E>(self, v: i8) -> Result<Bson, E> {
                Ok(Bson::Int32(v as i32))
            }

            fn visit_i16<E>(self, v: i16) -> Result<Bson, E> {
                Ok(Bson::Int32(v as i32))
            }

            fn visit_i32<E>(self, v: i32) -> Result<Bson, E> {
                Ok(Bson::Int32(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Bson, E> {
                Ok(Bson::Int64(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Bson, E> {
                if v <= i64::MAX as u64 {
                    Ok(Bson::Int64(v as i64))
                } else {
                    Err(E::custom("u64 too large for int64"))
                }
            }

            fn visit_f64<E>(self, v: f64) -> Result<Bson, E> {
                Ok(Bson::Double(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Bson, E> {
                Ok(Bson::from(v))
            }

            fn visit_string<E>(self, v: String) -> Result<Bson, E> {
                Ok(Bson::from(v))
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Bson, E> {
                Ok(Bson::from(v.to_vec()))
            }

            fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Bson, E> {
                Ok(Bson::from(v))
            }

            fn visit_none<E>(self) -> Result<Bson, E> {
                Ok(Bson::Null)
            }

            fn visit_unit<E>(self) -> Result<Bson, E> {
                Ok(Bson::Null)
            }

            fn visit_some<D: de::Deserializer<'de>>(self, d: D) -> Result<Bson, D::Error> {
                Bson::deserialize(d)
            }

            fn visit_newtype_struct<D: de::Deserializer<'de>>(
                self,
                d: D,
            ) -> Result<Bson, D::Error> {
                Bson::deserialize(d)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<Bson, A::Error> {
                let mut arr = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(value) = access.next_element::<Bson>()? {
                    arr.push(value);
                }
                Ok(Bson::Array(arr))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Bson, A::Error> {
                let mut doc = Document::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) =
                    access.next_entry::<compact_str::CompactString, Bson>()?
                {
                    doc.push(key, value);
                }
                Ok(crate::json::fold_extended(doc))
            }
        }

        deserializer.deserialize_any(BsonVisitor)
    }
}

/// `#[serde(with = "...")]` 辅助模块
pub mod serde_helpers {
    /// chrono 时间字段按 BSON DateTime 往返
    ///
    /// ```rust,ignore
    /// #[derive(Serialize, Deserialize)]
    /// struct Event {
    ///     #[serde(with = "kumongo_bson::serde_helpers::bson_datetime")]
    ///     at: chrono::DateTime<chrono::Utc>,
    /// }
    /// ```
    pub mod bson_datetime {
        use chrono::{DateTime, TimeZone, Utc};
        use serde::de::Error as _;
        use serde::ser::SerializeMap;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            dt: &DateTime<Utc>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(1))?;
            map.serialize_entry("$date", &(dt.timestamp() * 1000))?;
            map.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<DateTime<Utc>, D::Error> {
            #[derive(Deserialize)]
            struct Ext {
                #[serde(rename = "$date")]
                date: i64,
            }
            let ext = Ext::deserialize(deserializer)?;
            Utc.timestamp_opt(ext.date.div_euclid(1000), 0)
                .single()
                .ok_or_else(|| D::Error::custom("invalid $date"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser::to_bson;
    use chrono::{TimeZone, Utc};
    use kumongo_common::ObjectId;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestStruct {
        name: String,
        value: i32,
        active: bool,
    }

    #[test]
    fn test_roundtrip_struct() {
        let original = TestStruct {
            name: "test".to_string(),
            value: 42,
            active: true,
        };

        let bson = to_bson(&original).unwrap();
        let restored: TestStruct = from_bson(&bson).unwrap();

        assert_eq!(original, restored);
    }

    #[test]
    fn test_missing_key() {
        let doc = crate::doc! { "name": "only" };
        let err = from_document::<TestStruct>(&doc).unwrap_err();
        assert!(matches!(err, BsonError::MissingKey(_)));
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OptField {
        #[serde(default)]
        note: Option<String>,
        keep: i32,
    }

    #[test]
    fn test_absent_omitempty_field_allowed() {
        let doc = crate::doc! { "keep": 3 };
        let v: OptField = from_document(&doc).unwrap();
        assert_eq!(v.note, None);
        assert_eq!(v.keep, 3);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Mode {
        Fast,
        Safe,
    }

    #[test]
    fn test_enum_roundtrip() {
        let bson = to_bson(&Mode::Safe).unwrap();
        assert_eq!(bson, Bson::from("Safe"));
        let back: Mode = from_bson(&bson).unwrap();
        assert_eq!(back, Mode::Safe);
        assert!(from_bson::<Mode>(&Bson::from("Unknown")).is_err());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct WithId {
        #[serde(rename = "_id")]
        id: ObjectId,
        label: String,
    }

    #[test]
    fn test_object_id_roundtrip() {
        let original = WithId {
            id: ObjectId::new(),
            label: "tagged".to_string(),
        };
        let bson = to_bson(&original).unwrap();
        assert_eq!(
            bson.get("_id").unwrap().as_object_id(),
            Some(original.id)
        );
        let back: WithId = from_bson(&bson).unwrap();
        assert_eq!(back, original);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Event {
        #[serde(with = "serde_helpers::bson_datetime")]
        at: chrono::DateTime<Utc>,
    }

    #[test]
    fn test_datetime_helper_roundtrip() {
        let original = Event {
            at: Utc.timestamp_opt(1_400_000_000, 0).single().unwrap(),
        };
        let bson = to_bson(&original).unwrap();
        assert!(matches!(bson.get("at"), Some(Bson::DateTime(_))));
        let back: Event = from_bson(&bson).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_bson_field_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Holder {
            any: Bson,
        }
        let original = Holder {
            any: Bson::ObjectId(ObjectId::new()),
        };
        let bson = to_bson(&original).unwrap();
        let back: Holder = from_bson(&bson).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_vec_and_map() {
        use std::collections::BTreeMap;

        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Bag {
            items: Vec<i64>,
            lookup: BTreeMap<String, String>,
        }
        let mut lookup = BTreeMap::new();
        lookup.insert("a".to_string(), "1".to_string());
        let original = Bag {
            items: vec![1, 2, 3],
            lookup,
        };
        let back: Bag = from_bson(&to_bson(&original).unwrap()).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_document_roundtrip_through_serde() {
        let doc = crate::doc! { "x": 1, "y": { "z": "deep" } };
        let bson = to_bson(&doc).unwrap();
        assert_eq!(bson, Bson::Document(doc.clone()));
        let back: crate::Document = from_bson(&bson).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_integer_narrowing() {
        // Int64 放入 i32 字段:范围内允许
        #[derive(Debug, Deserialize)]
        struct Small {
            n: i32,
        }
        let doc = crate::doc! { "n": 7i64 };
        let v: Small = from_document(&doc).unwrap();
        assert_eq!(v.n, 7);
    }
}
