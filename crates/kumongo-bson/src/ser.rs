//! Serde 序列化模块
//!
//! 实现 Serde Serializer trait,将任意 Rust 数据结构映射为 Bson 值树。
//!
//! 映射规则:
//! - 序列/集合 -> Array,字符串键映射 -> Document
//! - 结构体/元组 -> Document,字段名为键(`#[serde(rename)]` 即 dbKey)
//! - `#[serde(skip_serializing_if)]` + `#[serde(default)]` 即 omitempty
//! - 枚举单位变体 -> 变体名字符串
//! - ObjectId / 日期等特殊类型以扩展形式(`$oid`、`$date` 等)经过边界,
//!   在 Map 收尾时折叠回对应的 Bson 变体

use crate::document::Document;
use crate::json::fold_extended;
use crate::value::{Bson, DbPointerValue, JsCodeWithScope, RegexValue};
use crate::BsonError;
use compact_str::CompactString;
use serde::ser::{self, Serialize, SerializeMap as _};

pub struct Serializer {
    output: Bson,
}

impl Serializer {
    pub fn new() -> Self {
        Self { output: Bson::Null }
    }

    pub fn into_value(self) -> Bson {
        self.output
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

/// 将任意可序列化值转换为 Bson
pub fn to_bson<T: Serialize>(value: &T) -> Result<Bson, BsonError> {
    let mut serializer = Serializer::new();
    value.serialize(&mut serializer)?;
    Ok(serializer.into_value())
}

/// 将任意可序列化值转换为 Document
///
/// # Brief
/// 顶层必须映射为文档,否则返回 `KindMismatch`
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, BsonError> {
    match to_bson(value)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(BsonError::KindMismatch {
            expected: "document".to_string(),
            actual: other.type_name().to_string(),
        }),
    }
}

impl ser::Error for BsonError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        BsonError::Serialization(msg.to_string())
    }
}

impl<'a> ser::Serializer for &'a mut Serializer {
    type Ok = ();
    type Error = BsonError;
    type SerializeSeq = SeqSerializer<'a>;
    type SerializeTuple = SeqSerializer<'a>;
    type SerializeTupleStruct = SeqSerializer<'a>;
    type SerializeTupleVariant = SeqSerializer<'a>;
    type SerializeMap = MapSerializer<'a>;
    type SerializeStruct = MapSerializer<'a>;
    type SerializeStructVariant = MapSerializer<'a>;

    fn serialize_bool(self, v: bool) -> Result<Self::Ok, Self::Error> {
        self.output = Bson::Boolean(v);
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> Result<Self::Ok, Self::Error> {
        self.serialize_i32(v as i32)
    }

    fn serialize_i16(self, v: i16) -> Result<Self::Ok, Self::Error> {
        self.serialize_i32(v as i32)
    }

    fn serialize_i32(self, v: i32) -> Result<Self::Ok, Self::Error> {
        self.output = Bson::Int32(v);
        Ok(())
    }

    fn serialize_i64(self, v: i64) -> Result<Self::Ok, Self::Error> {
        self.output = Bson::Int64(v);
        Ok(())
    }

    fn serialize_u8(self, v: u8) -> Result<Self::Ok, Self::Error> {
        self.serialize_i32(v as i32)
    }

    fn serialize_u16(self, v: u16) -> Result<Self::Ok, Self::Error> {
        self.serialize_i32(v as i32)
    }

    fn serialize_u32(self, v: u32) -> Result<Self::Ok, Self::Error> {
        if v <= i32::MAX as u32 {
            self.serialize_i32(v as i32)
        } else {
            self.serialize_i64(v as i64)
        }
    }

    fn serialize_u64(self, v: u64) -> Result<Self::Ok, Self::Error> {
        if v <= i64::MAX as u64 {
            self.serialize_i64(v as i64)
        } else {
            Err(BsonError::Serialization("u64 too large for int64".to_string()))
        }
    }

    fn serialize_f32(self, v: f32) -> Result<Self::Ok, Self::Error> {
        self.serialize_f64(v as f64)
    }

    fn serialize_f64(self, v: f64) -> Result<Self::Ok, Self::Error> {
        self.output = Bson::Double(v);
        Ok(())
    }

    fn serialize_char(self, v: char) -> Result<Self::Ok, Self::Error> {
        self.serialize_str(&v.to_string())
    }

    fn serialize_str(self, v: &str) -> Result<Self::Ok, Self::Error> {
        self.output = Bson::String(CompactString::from(v));
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Self::Ok, Self::Error> {
        self.output = Bson::from(v.to_vec());
        Ok(())
    }

    fn serialize_none(self) -> Result<Self::Ok, Self::Error> {
        self.serialize_unit()
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Self::Ok, Self::Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Self::Ok, Self::Error> {
        self.output = Bson::Null;
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Self::Ok, Self::Error> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Self::Ok, Self::Error> {
        self.serialize_str(variant)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Self::Error> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Self::Error> {
        let mut doc = Document::new();
        let mut ser = Serializer::new();
        value.serialize(&mut ser)?;
        doc.push(variant, ser.into_value());
        self.output = Bson::Document(doc);
        Ok(())
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Ok(SeqSerializer {
            serializer: self,
            elements: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_map(self, len: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Ok(MapSerializer {
            serializer: self,
            doc: Document::with_capacity(len.unwrap_or(0)),
            current_key: None,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStruct, Self::Error> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        self.serialize_map(Some(len))
    }
}

pub struct SeqSerializer<'a> {
    serializer: &'a mut Serializer,
    elements: Vec<Bson>,
}

impl<'a> ser::SerializeSeq for SeqSerializer<'a> {
    type Ok = ();
    type Error = BsonError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        let mut ser = Serializer::new();
        value.serialize(&mut ser)?;
        self.elements.push(ser.into_value());
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        self.serializer.output = Bson::Array(self.elements);
        Ok(())
    }
}

impl<'a> ser::SerializeTuple for SeqSerializer<'a> {
    type Ok = ();
    type Error = BsonError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        ser::SerializeSeq::end(self)
    }
}

impl<'a> ser::SerializeTupleStruct for SeqSerializer<'a> {
    type Ok = ();
    type Error = BsonError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        ser::SerializeSeq::end(self)
    }
}

impl<'a> ser::SerializeTupleVariant for SeqSerializer<'a> {
    type Ok = ();
    type Error = BsonError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        ser::SerializeSeq::end(self)
    }
}

pub struct MapSerializer<'a> {
    serializer: &'a mut Serializer,
    doc: Document,
    current_key: Option<CompactString>,
}

impl<'a> ser::SerializeMap for MapSerializer<'a> {
    type Ok = ();
    type Error = BsonError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), Self::Error> {
        let mut ser = Serializer::new();
        key.serialize(&mut ser)?;
        self.current_key = match ser.into_value() {
            Bson::String(s) => Some(s),
            _ => {
                return Err(BsonError::Serialization(
                    "Map key must be string".to_string(),
                ))
            }
        };
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        let key = self
            .current_key
            .take()
            .ok_or_else(|| BsonError::Serialization("No key for value".to_string()))?;
        let mut ser = Serializer::new();
        value.serialize(&mut ser)?;
        self.doc.push(key, ser.into_value());
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        self.serializer.output = fold_extended(self.doc);
        Ok(())
    }
}

impl<'a> ser::SerializeStruct for MapSerializer<'a> {
    type Ok = ();
    type Error = BsonError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error> {
        let mut ser = Serializer::new();
        value.serialize(&mut ser)?;
        self.doc.push(key, ser.into_value());
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        self.serializer.output = fold_extended(self.doc);
        Ok(())
    }
}

impl<'a> ser::SerializeStructVariant for MapSerializer<'a> {
    type Ok = ();
    type Error = BsonError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error> {
        ser::SerializeStruct::serialize_field(self, key, value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        ser::SerializeStruct::end(self)
    }
}

// Bson 自身的 Serialize:非 JSON 原生的类型以扩展形式写出,
// 与 MapSerializer 收尾时的折叠规则一一对应。
impl Serialize for Bson {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Bson::Double(n) => serializer.serialize_f64(*n),
            Bson::String(s) => serializer.serialize_str(s.as_str()),
            Bson::Document(doc) => doc.serialize(serializer),
            Bson::Array(arr) => arr.serialize(serializer),
            Bson::Binary(b) => {
                use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("$binary", &BASE64.encode(&b.bytes))?;
                map.serialize_entry("$type", &format!("{:02x}", b.subtype.to_u8()))?;
                map.end()
            }
            Bson::Undefined => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$undefined", &true)?;
                map.end()
            }
            Bson::ObjectId(id) => id.serialize(serializer),
            Bson::Boolean(b) => serializer.serialize_bool(*b),
            Bson::DateTime(dt) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$date", &(dt.timestamp() * 1000))?;
                map.end()
            }
            Bson::Null => serializer.serialize_unit(),
            Bson::Regex(RegexValue { pattern, options }) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("$regex", pattern.as_str())?;
                map.serialize_entry("$options", options.as_str())?;
                map.end()
            }
            Bson::DbPointer(DbPointerValue { namespace, id }) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("$ref", namespace.as_str())?;
                map.serialize_entry("$id", &id.to_hex())?;
                map.end()
            }
            Bson::JavaScript(code) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$code", code.as_str())?;
                map.end()
            }
            Bson::JavaScriptWithScope(JsCodeWithScope { code, scope }) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("$code", code.as_str())?;
                map.serialize_entry("$scope", scope)?;
                map.end()
            }
            Bson::Int32(n) => serializer.serialize_i32(*n),
            Bson::Timestamp(ts) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$timestamp", &ts.to_i64())?;
                map.end()
            }
            Bson::Int64(n) => serializer.serialize_i64(*n),
            Bson::MinKey => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$minKey", &1i32)?;
                map.end()
            }
            Bson::MaxKey => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$maxKey", &1i32)?;
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumongo_common::ObjectId;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Plain {
        name: String,
        count: i32,
    }

    #[test]
    fn test_struct_to_document() {
        let v = Plain {
            name: "kumongo".to_string(),
            count: 9,
        };
        let doc = to_document(&v).unwrap();
        assert_eq!(doc.get_str("name"), Some("kumongo"));
        assert_eq!(doc.get_i32("count"), Some(9));
    }

    #[derive(Serialize)]
    struct Renamed {
        #[serde(rename = "userName")]
        user_name: String,
    }

    #[test]
    fn test_db_key_rename() {
        let doc = to_document(&Renamed {
            user_name: "aki".to_string(),
        })
        .unwrap();
        assert!(doc.contains_key("userName"));
        assert!(!doc.contains_key("user_name"));
    }

    #[derive(Serialize)]
    struct OmitEmpty {
        #[serde(skip_serializing_if = "String::is_empty")]
        note: String,
        keep: i32,
    }

    #[test]
    fn test_omitempty() {
        let doc = to_document(&OmitEmpty {
            note: String::new(),
            keep: 1,
        })
        .unwrap();
        assert!(!doc.contains_key("note"));
        assert!(doc.contains_key("keep"));
    }

    #[derive(Serialize)]
    enum Color {
        Red,
        Blue,
    }

    #[test]
    fn test_enum_as_string() {
        assert_eq!(to_bson(&Color::Red).unwrap(), Bson::from("Red"));
        assert_eq!(to_bson(&Color::Blue).unwrap(), Bson::from("Blue"));
    }

    #[test]
    fn test_option_as_null() {
        let none: Option<i32> = None;
        assert_eq!(to_bson(&none).unwrap(), Bson::Null);
        assert_eq!(to_bson(&Some(5i32)).unwrap(), Bson::Int32(5));
    }

    #[test]
    fn test_object_id_folds_back() {
        let id = ObjectId::new();
        assert_eq!(to_bson(&id).unwrap(), Bson::ObjectId(id));
    }

    #[derive(Serialize)]
    struct WithId {
        #[serde(rename = "_id")]
        id: ObjectId,
        label: String,
    }

    #[test]
    fn test_nested_object_id_field() {
        let id = ObjectId::new();
        let doc = to_document(&WithId {
            id,
            label: "x".to_string(),
        })
        .unwrap();
        assert_eq!(doc.get_object_id("_id"), Some(id));
    }

    #[test]
    fn test_bson_roundtrip_through_serializer() {
        let original = crate::bson!({
            "s": "str",
            "n": 3,
            "arr": [1, true, null],
        });
        assert_eq!(to_bson(&original).unwrap(), original);
    }

    #[test]
    fn test_map_key_must_be_string() {
        use std::collections::BTreeMap;
        let mut m: BTreeMap<i32, i32> = BTreeMap::new();
        m.insert(1, 2);
        assert!(to_bson(&m).is_err());
    }
}
