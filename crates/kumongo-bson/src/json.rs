//! JSON 互转模块
//!
//! Bson 与 `serde_json::Value` 的互相转换。JSON 无法原生表达的类型
//! 使用扩展形式编码:
//!
//! | Bson | JSON |
//! |---|---|
//! | ObjectId | `{"$oid": "<hex>"}` |
//! | DateTime | `{"$date": <毫秒>}` |
//! | Binary | `{"$binary": "<base64>", "$type": "<子类型十六进制>"}` |
//! | Regex | `{"$regex": "...", "$options": "..."}` |
//! | Timestamp | `{"$timestamp": <int64>}` |
//! | JavaScript | `{"$code": "..."}` (+ `"$scope"`) |
//! | DbPointer | `{"$ref": "...", "$id": "<hex>"}` |
//! | MinKey / MaxKey | `{"$minKey": 1}` / `{"$maxKey": 1}` |
//! | Undefined | `{"$undefined": true}` |

use crate::document::Document;
use crate::spec::BinarySubtype;
use crate::value::{
    Binary, Bson, DbPointerValue, JsCodeWithScope, RegexValue, TimestampValue,
};
use crate::{BsonError, BsonResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{TimeZone, Utc};
use compact_str::CompactString;
use kumongo_common::ObjectId;

/// 折叠扩展形式的文档
///
/// # Brief
/// 检查文档是否是某个特殊类型的扩展表示,是则还原为对应的
/// Bson 变体,否则原样返回 `Bson::Document`。序列化与反序列化
/// 两侧共用同一套规则。
pub(crate) fn fold_extended(doc: Document) -> Bson {
    let folded = match doc.len() {
        1 => fold_single(&doc),
        2 => fold_pair(&doc),
        _ => None,
    };
    folded.unwrap_or(Bson::Document(doc))
}

fn fold_single(doc: &Document) -> Option<Bson> {
    let (key, value) = doc.iter().next()?;
    match key {
        "$oid" => ObjectId::from_hex(value.as_str()?).ok().map(Bson::ObjectId),
        "$date" => {
            let millis = value.as_i64()?;
            Utc.timestamp_opt(millis.div_euclid(1000), 0)
                .single()
                .map(Bson::DateTime)
        }
        "$timestamp" => Some(Bson::Timestamp(TimestampValue::from_i64(value.as_i64()?))),
        "$code" => Some(Bson::JavaScript(CompactString::from(value.as_str()?))),
        "$minKey" => Some(Bson::MinKey),
        "$maxKey" => Some(Bson::MaxKey),
        "$undefined" => Some(Bson::Undefined),
        _ => None,
    }
}

fn fold_pair(doc: &Document) -> Option<Bson> {
    if let (Some(pattern), Some(options)) = (doc.get_str("$regex"), doc.get_str("$options")) {
        return Some(Bson::Regex(RegexValue {
            pattern: pattern.into(),
            options: options.into(),
        }));
    }
    if let (Some(payload), Some(subtype)) = (doc.get_str("$binary"), doc.get_str("$type")) {
        let bytes = BASE64.decode(payload).ok()?;
        let subtype = u8::from_str_radix(subtype, 16).ok()?;
        return Some(Bson::Binary(Binary {
            subtype: BinarySubtype::from_u8(subtype),
            bytes,
        }));
    }
    if let (Some(code), Some(scope)) = (doc.get_str("$code"), doc.get_document("$scope")) {
        return Some(Bson::JavaScriptWithScope(JsCodeWithScope {
            code: code.into(),
            scope: scope.clone(),
        }));
    }
    if let (Some(namespace), Some(id)) = (doc.get_str("$ref"), doc.get_str("$id")) {
        let id = ObjectId::from_hex(id).ok()?;
        return Some(Bson::DbPointer(DbPointerValue {
            namespace: namespace.into(),
            id,
        }));
    }
    None
}

impl From<serde_json::Value> for Bson {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Bson::Null,
            serde_json::Value::Bool(b) => Bson::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                        Bson::Int32(i as i32)
                    } else {
                        Bson::Int64(i)
                    }
                } else if let Some(f) = n.as_f64() {
                    Bson::Double(f)
                } else {
                    Bson::Null
                }
            }
            serde_json::Value::String(s) => Bson::String(CompactString::from(s)),
            serde_json::Value::Array(arr) => {
                Bson::Array(arr.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(obj) => {
                let mut doc = Document::with_capacity(obj.len());
                for (k, v) in obj {
                    doc.push(CompactString::from(k), Bson::from(v));
                }
                fold_extended(doc)
            }
        }
    }
}

impl From<Bson> for serde_json::Value {
    fn from(v: Bson) -> Self {
        match v {
            Bson::Double(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Bson::String(s) => serde_json::Value::String(s.to_string()),
            Bson::Document(doc) => {
                let mut map = serde_json::Map::new();
                for (k, v) in doc {
                    map.insert(k.to_string(), v.into());
                }
                serde_json::Value::Object(map)
            }
            Bson::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(Into::into).collect())
            }
            Bson::Binary(b) => object([
                ("$binary", serde_json::Value::String(BASE64.encode(&b.bytes))),
                (
                    "$type",
                    serde_json::Value::String(format!("{:02x}", b.subtype.to_u8())),
                ),
            ]),
            Bson::Undefined => object([("$undefined", serde_json::Value::Bool(true))]),
            Bson::ObjectId(id) => object([("$oid", serde_json::Value::String(id.to_hex()))]),
            Bson::Boolean(b) => serde_json::Value::Bool(b),
            Bson::DateTime(dt) => object([(
                "$date",
                serde_json::Value::Number((dt.timestamp() * 1000).into()),
            )]),
            Bson::Null => serde_json::Value::Null,
            Bson::Regex(r) => object([
                ("$regex", serde_json::Value::String(r.pattern.to_string())),
                ("$options", serde_json::Value::String(r.options.to_string())),
            ]),
            Bson::DbPointer(p) => object([
                ("$ref", serde_json::Value::String(p.namespace.to_string())),
                ("$id", serde_json::Value::String(p.id.to_hex())),
            ]),
            Bson::JavaScript(code) => {
                object([("$code", serde_json::Value::String(code.to_string()))])
            }
            Bson::JavaScriptWithScope(js) => object([
                ("$code", serde_json::Value::String(js.code.to_string())),
                ("$scope", Bson::Document(js.scope).into()),
            ]),
            Bson::Int32(n) => serde_json::Value::Number(n.into()),
            Bson::Timestamp(ts) => {
                object([("$timestamp", serde_json::Value::Number(ts.to_i64().into()))])
            }
            Bson::Int64(n) => serde_json::Value::Number(n.into()),
            Bson::MinKey => object([("$minKey", serde_json::Value::Number(1.into()))]),
            Bson::MaxKey => object([("$maxKey", serde_json::Value::Number(1.into()))]),
        }
    }
}

fn object<const N: usize>(entries: [(&str, serde_json::Value); N]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (k, v) in entries {
        map.insert(k.to_string(), v);
    }
    serde_json::Value::Object(map)
}

impl Document {
    /// 从 JSON 字符串创建文档
    ///
    /// # Brief
    /// 解析 JSON 字符串,识别扩展形式后创建文档
    ///
    /// # Arguments
    /// * `json` - JSON 格式的字符串
    ///
    /// # Returns
    /// 成功返回 Document,失败返回解析错误
    pub fn from_json(json: &str) -> BsonResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| BsonError::Deserialization(e.to_string()))?;
        match Bson::from(value) {
            Bson::Document(doc) => Ok(doc),
            other => Err(BsonError::KindMismatch {
                expected: "document".to_string(),
                actual: other.type_name().to_string(),
            }),
        }
    }

    /// 转换为 JSON 字符串
    pub fn to_json(&self) -> String {
        let json_value: serde_json::Value = Bson::Document(self.clone()).into();
        serde_json::to_string(&json_value).unwrap_or_default()
    }

    /// 转换为格式化的 JSON 字符串
    pub fn to_json_pretty(&self) -> String {
        let json_value: serde_json::Value = Bson::Document(self.clone()).into();
        serde_json::to_string_pretty(&json_value).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bson, doc};

    #[test]
    fn test_json_roundtrip_plain() {
        let doc = doc! { "name": "test", "n": 3, "ok": true, "pi": 3.5 };
        let parsed = Document::from_json(&doc.to_json()).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_json_extended_oid() {
        let id = ObjectId::new();
        let mut doc = Document::new();
        doc.insert("_id", id);
        let json = doc.to_json();
        assert!(json.contains("$oid"));
        let parsed = Document::from_json(&json).unwrap();
        assert_eq!(parsed.get_object_id("_id"), Some(id));
    }

    #[test]
    fn test_json_extended_datetime() {
        let mut doc = Document::new();
        doc.insert(
            "when",
            Bson::datetime(Utc.timestamp_opt(1_400_000_000, 0).single().unwrap()),
        );
        let parsed = Document::from_json(&doc.to_json()).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_json_extended_binary() {
        let mut doc = Document::new();
        doc.insert(
            "bin",
            Bson::Binary(Binary {
                subtype: BinarySubtype::UserDefined(0x85),
                bytes: vec![1, 2, 3, 255],
            }),
        );
        let parsed = Document::from_json(&doc.to_json()).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_json_extended_misc() {
        let mut scope = Document::new();
        scope.insert("x", 1i32);
        let mut doc = Document::new();
        doc.insert(
            "re",
            Bson::Regex(RegexValue {
                pattern: "^k".into(),
                options: "i".into(),
            }),
        );
        doc.insert(
            "ts",
            Bson::Timestamp(TimestampValue {
                increment: 1,
                timestamp: 2,
            }),
        );
        doc.insert("js", Bson::JavaScript("f()".into()));
        doc.insert(
            "jsws",
            Bson::JavaScriptWithScope(JsCodeWithScope {
                code: "g()".into(),
                scope,
            }),
        );
        doc.insert("min", Bson::MinKey);
        doc.insert("max", Bson::MaxKey);
        doc.insert("undef", Bson::Undefined);
        let parsed = Document::from_json(&doc.to_json()).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_json_number_widths() {
        let v = Bson::from(serde_json::json!({ "small": 1, "big": 5_000_000_000i64 }));
        assert!(matches!(v.get("small"), Some(Bson::Int32(1))));
        assert!(matches!(v.get("big"), Some(Bson::Int64(5_000_000_000))));
    }

    #[test]
    fn test_plain_dollar_doc_not_folded() {
        // 非扩展形式的 $ 键不折叠
        let v = bson!({ "$set": { "a": 1 } });
        let json: serde_json::Value = v.clone().into();
        assert_eq!(Bson::from(json), v);
    }
}
