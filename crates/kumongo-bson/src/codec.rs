//! BSON 编解码模块
//!
//! 提供 BSON 1.1 格式的二进制序列化和反序列化功能。
//! 所有整数均为小端；文档前 4 字节为含结尾 NUL 的总长度。

use crate::document::Document;
use crate::spec::*;
use crate::value::{Binary, Bson, DbPointerValue, JsCodeWithScope, RegexValue, TimestampValue};
use crate::{BsonError, BsonResult};
use bytes::{BufMut, BytesMut};
use chrono::{TimeZone, Utc};
use compact_str::CompactString;
use kumongo_common::ObjectId;

/// 编码 Document 到缓冲区
///
/// # Brief
/// 将文档序列化为 BSON 二进制格式写入缓冲区
///
/// # Arguments
/// * `doc` - 要编码的文档
/// * `buf` - 目标缓冲区
///
/// # Returns
/// 成功返回 Ok(()), 失败返回错误
pub fn encode(doc: &Document, buf: &mut BytesMut) -> BsonResult<()> {
    let start = buf.len();
    Encoder::new(buf).encode_document(doc)?;
    let total = buf.len() - start;
    if total > MAX_DOCUMENT_SIZE {
        return Err(BsonError::DocumentTooLarge(MAX_DOCUMENT_SIZE));
    }
    Ok(())
}

/// 编码 Document 到 Vec<u8>
pub fn encode_to_vec(doc: &Document) -> BsonResult<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(256);
    encode(doc, &mut buf)?;
    Ok(buf.to_vec())
}

/// 解码二进制数据为 Document
///
/// # Brief
/// 解析单个 BSON 文档，要求输入被完整消费
///
/// # Arguments
/// * `data` - 要解码的字节切片
///
/// # Returns
/// 成功返回 Document, 失败返回错误
pub fn decode(data: &[u8]) -> BsonResult<Document> {
    let (doc, consumed) = decode_prefix(data)?;
    if consumed != data.len() {
        return Err(BsonError::InvalidDocument(format!(
            "Trailing bytes after document: {}",
            data.len() - consumed
        )));
    }
    Ok(doc)
}

/// 解码字节流前缀中的一个文档
///
/// # Brief
/// 从流的开头解析一个文档，返回文档和消费的字节数。
/// 用于回复体中连续多个文档的解析。
pub fn decode_prefix(data: &[u8]) -> BsonResult<(Document, usize)> {
    let mut decoder = Decoder::new(data);
    let doc = decoder.decode_document()?;
    Ok((doc, decoder.pos))
}

fn element_type(value: &Bson) -> ElementType {
    match value {
        Bson::Double(_) => ElementType::Double,
        Bson::String(_) => ElementType::String,
        Bson::Document(_) => ElementType::Document,
        Bson::Array(_) => ElementType::Array,
        Bson::Binary(_) => ElementType::Binary,
        Bson::Undefined => ElementType::Undefined,
        Bson::ObjectId(_) => ElementType::ObjectId,
        Bson::Boolean(_) => ElementType::Boolean,
        Bson::DateTime(_) => ElementType::DateTime,
        Bson::Null => ElementType::Null,
        Bson::Regex(_) => ElementType::Regex,
        Bson::DbPointer(_) => ElementType::DbPointer,
        Bson::JavaScript(_) => ElementType::JavaScript,
        Bson::JavaScriptWithScope(_) => ElementType::JavaScriptWithScope,
        Bson::Int32(_) => ElementType::Int32,
        Bson::Timestamp(_) => ElementType::Timestamp,
        Bson::Int64(_) => ElementType::Int64,
        Bson::MinKey => ElementType::MinKey,
        Bson::MaxKey => ElementType::MaxKey,
    }
}

/// BSON 编码器
///
/// 内部结构，用于将 Document 序列化为二进制格式
struct Encoder<'a> {
    buf: &'a mut BytesMut,
    depth: usize,
}

impl<'a> Encoder<'a> {
    fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf, depth: 0 }
    }

    fn encode_document(&mut self, doc: &Document) -> BsonResult<()> {
        if self.depth > MAX_NESTING_DEPTH {
            return Err(BsonError::NestingTooDeep(MAX_NESTING_DEPTH));
        }

        let start = self.buf.len();
        self.buf.put_i32_le(0);

        self.depth += 1;
        for (key, value) in doc.iter() {
            self.encode_element(key, value)?;
        }
        self.depth -= 1;

        self.buf.put_u8(0x00);
        let total = (self.buf.len() - start) as i32;
        self.buf[start..start + 4].copy_from_slice(&total.to_le_bytes());
        Ok(())
    }

    fn encode_array(&mut self, arr: &[Bson]) -> BsonResult<()> {
        if self.depth > MAX_NESTING_DEPTH {
            return Err(BsonError::NestingTooDeep(MAX_NESTING_DEPTH));
        }

        let start = self.buf.len();
        self.buf.put_i32_le(0);

        self.depth += 1;
        for (i, value) in arr.iter().enumerate() {
            self.encode_element(&i.to_string(), value)?;
        }
        self.depth -= 1;

        self.buf.put_u8(0x00);
        let total = (self.buf.len() - start) as i32;
        self.buf[start..start + 4].copy_from_slice(&total.to_le_bytes());
        Ok(())
    }

    fn encode_element(&mut self, key: &str, value: &Bson) -> BsonResult<()> {
        self.buf.put_u8(element_type(value) as u8);
        self.encode_cstring(key)?;

        match value {
            Bson::Double(n) => self.buf.put_f64_le(*n),
            Bson::String(s) => self.encode_string(s),
            Bson::Document(doc) => self.encode_document(doc)?,
            Bson::Array(arr) => self.encode_array(arr)?,
            Bson::Binary(Binary { subtype, bytes }) => {
                self.buf.put_i32_le(bytes.len() as i32);
                self.buf.put_u8(subtype.to_u8());
                self.buf.put_slice(bytes);
            }
            Bson::Undefined => {}
            Bson::ObjectId(id) => self.buf.put_slice(id.as_bytes()),
            Bson::Boolean(b) => self.buf.put_u8(*b as u8),
            Bson::DateTime(dt) => {
                // 内存为秒级精度,线上加宽为毫秒
                self.buf.put_i64_le(dt.timestamp() * 1000);
            }
            Bson::Null => {}
            Bson::Regex(RegexValue { pattern, options }) => {
                self.encode_cstring(pattern)?;
                self.encode_cstring(options)?;
            }
            Bson::DbPointer(DbPointerValue { namespace, id }) => {
                self.encode_string(namespace);
                self.buf.put_slice(id.as_bytes());
            }
            Bson::JavaScript(code) => self.encode_string(code),
            Bson::JavaScriptWithScope(JsCodeWithScope { code, scope }) => {
                let start = self.buf.len();
                self.buf.put_i32_le(0);
                self.encode_string(code);
                self.encode_document(scope)?;
                let total = (self.buf.len() - start) as i32;
                self.buf[start..start + 4].copy_from_slice(&total.to_le_bytes());
            }
            Bson::Int32(n) => self.buf.put_i32_le(*n),
            Bson::Timestamp(ts) => self.buf.put_i64_le(ts.to_i64()),
            Bson::Int64(n) => self.buf.put_i64_le(*n),
            Bson::MinKey => {}
            Bson::MaxKey => {}
        }
        Ok(())
    }

    fn encode_string(&mut self, s: &str) {
        self.buf.put_i32_le(s.len() as i32 + 1);
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0x00);
    }

    fn encode_cstring(&mut self, s: &str) -> BsonResult<()> {
        if s.as_bytes().contains(&0) {
            return Err(BsonError::InvalidDocument(
                "cstring cannot contain NUL".to_string(),
            ));
        }
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0x00);
        Ok(())
    }
}

/// BSON 解码器
///
/// 内部结构，用于从二进制数据反序列化 Document
struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    fn decode_document(&mut self) -> BsonResult<Document> {
        if self.depth > MAX_NESTING_DEPTH {
            return Err(BsonError::NestingTooDeep(MAX_NESTING_DEPTH));
        }

        let start = self.pos;
        let total = self.read_i32()?;
        if total < MIN_DOCUMENT_SIZE as i32 || total as usize > MAX_DOCUMENT_SIZE {
            return Err(BsonError::InvalidDocument(format!(
                "Bad document length: {}",
                total
            )));
        }
        let end = start + total as usize;
        if end > self.data.len() {
            return Err(BsonError::UnexpectedEof);
        }

        let mut doc = Document::new();
        self.depth += 1;
        loop {
            let tag = self.read_u8()?;
            if tag == 0x00 {
                break;
            }
            let key = self.read_cstring()?;
            let value = self.decode_value(tag)?;
            doc.push(key, value);
        }
        self.depth -= 1;

        if self.pos != end {
            return Err(BsonError::InvalidDocument(format!(
                "Document length mismatch: expected end {}, got {}",
                end, self.pos
            )));
        }
        Ok(doc)
    }

    fn decode_array(&mut self) -> BsonResult<Vec<Bson>> {
        // 数组以 "0", "1", ... 为键的文档形式编码;解码时按出现顺序取值
        let doc = self.decode_document()?;
        Ok(doc.into_iter().map(|(_, v)| v).collect())
    }

    fn decode_value(&mut self, tag: u8) -> BsonResult<Bson> {
        match ElementType::from_u8(tag) {
            Some(ElementType::Double) => Ok(Bson::Double(self.read_f64()?)),
            Some(ElementType::String) => Ok(Bson::String(self.read_string()?)),
            Some(ElementType::Document) => Ok(Bson::Document(self.decode_document()?)),
            Some(ElementType::Array) => Ok(Bson::Array(self.decode_array()?)),
            Some(ElementType::Binary) => {
                let len = self.read_i32()?;
                if len < 0 {
                    return Err(BsonError::InvalidDocument(format!(
                        "Negative binary length: {}",
                        len
                    )));
                }
                let subtype = BinarySubtype::from_u8(self.read_u8()?);
                let bytes = self.read_bytes(len as usize)?;
                Ok(Bson::Binary(Binary { subtype, bytes }))
            }
            Some(ElementType::Undefined) => Ok(Bson::Undefined),
            Some(ElementType::ObjectId) => {
                let mut bytes = [0u8; 12];
                self.read_exact(&mut bytes)?;
                Ok(Bson::ObjectId(ObjectId::from_bytes(bytes)))
            }
            Some(ElementType::Boolean) => Ok(Bson::Boolean(self.read_u8()? != 0)),
            Some(ElementType::DateTime) => {
                let millis = self.read_i64()?;
                // 线上为毫秒,内存收窄为秒
                let dt = Utc
                    .timestamp_opt(millis.div_euclid(1000), 0)
                    .single()
                    .ok_or_else(|| BsonError::InvalidDocument("Invalid datetime".to_string()))?;
                Ok(Bson::DateTime(dt))
            }
            Some(ElementType::Null) => Ok(Bson::Null),
            Some(ElementType::Regex) => {
                let pattern = self.read_cstring()?;
                let options = self.read_cstring()?;
                Ok(Bson::Regex(RegexValue { pattern, options }))
            }
            Some(ElementType::DbPointer) => {
                let namespace = self.read_string()?;
                let mut bytes = [0u8; 12];
                self.read_exact(&mut bytes)?;
                Ok(Bson::DbPointer(DbPointerValue {
                    namespace,
                    id: ObjectId::from_bytes(bytes),
                }))
            }
            Some(ElementType::JavaScript) => Ok(Bson::JavaScript(self.read_string()?)),
            Some(ElementType::JavaScriptWithScope) => {
                let start = self.pos;
                let total = self.read_i32()?;
                let code = self.read_string()?;
                let scope = self.decode_document()?;
                if self.pos != start + total as usize {
                    return Err(BsonError::InvalidDocument(
                        "code_w_s length mismatch".to_string(),
                    ));
                }
                Ok(Bson::JavaScriptWithScope(JsCodeWithScope { code, scope }))
            }
            Some(ElementType::Int32) => Ok(Bson::Int32(self.read_i32()?)),
            Some(ElementType::Timestamp) => {
                Ok(Bson::Timestamp(TimestampValue::from_i64(self.read_i64()?)))
            }
            Some(ElementType::Int64) => Ok(Bson::Int64(self.read_i64()?)),
            Some(ElementType::MinKey) => Ok(Bson::MinKey),
            Some(ElementType::MaxKey) => Ok(Bson::MaxKey),
            None => Err(BsonError::InvalidTypeMarker(tag)),
        }
    }

    fn read_u8(&mut self) -> BsonResult<u8> {
        if self.pos >= self.data.len() {
            return Err(BsonError::UnexpectedEof);
        }
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> BsonResult<()> {
        if self.pos + buf.len() > self.data.len() {
            return Err(BsonError::UnexpectedEof);
        }
        buf.copy_from_slice(&self.data[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }

    fn read_bytes(&mut self, len: usize) -> BsonResult<Vec<u8>> {
        if self.pos + len > self.data.len() {
            return Err(BsonError::UnexpectedEof);
        }
        let bytes = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(bytes)
    }

    fn read_i32(&mut self) -> BsonResult<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_i64(&mut self) -> BsonResult<i64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    fn read_f64(&mut self) -> BsonResult<f64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    fn read_cstring(&mut self) -> BsonResult<CompactString> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos >= self.data.len() {
            return Err(BsonError::UnexpectedEof);
        }
        let s = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|e| BsonError::InvalidDocument(format!("Invalid UTF-8 in cstring: {}", e)))?;
        self.pos += 1;
        Ok(CompactString::from(s))
    }

    fn read_string(&mut self) -> BsonResult<CompactString> {
        let len = self.read_i32()?;
        if len < 1 {
            return Err(BsonError::InvalidDocument(format!(
                "Bad string length: {}",
                len
            )));
        }
        let bytes = self.read_bytes(len as usize - 1)?;
        let terminator = self.read_u8()?;
        if terminator != 0 {
            return Err(BsonError::InvalidDocument(
                "String missing NUL terminator".to_string(),
            ));
        }
        let s = String::from_utf8(bytes)?;
        Ok(CompactString::from(s))
    }
}
