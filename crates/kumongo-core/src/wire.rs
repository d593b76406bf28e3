use bytes::{BufMut, BytesMut};
use kumongo_bson::{codec, Document};
use kumongo_common::{MongoError, MongoResult};

pub const OP_REPLY: i32 = 1;
pub const OP_QUERY: i32 = 2004;
pub const OP_GET_MORE: i32 = 2005;
pub const OP_KILL_CURSORS: i32 = 2007;

/// 消息头长度 (messageLength + requestID + responseTo + opCode)
pub const HEADER_SIZE: usize = 16;

/// 单条消息上限 (48MB,服务器端同样限制)
pub const MAX_MESSAGE_SIZE: usize = 48 * 1024 * 1024;

/// OP_QUERY 标志位
pub mod query_flags {
    pub const TAILABLE_CURSOR: i32 = 1 << 1;
    pub const SLAVE_OK: i32 = 1 << 2;
    pub const NO_CURSOR_TIMEOUT: i32 = 1 << 4;
    pub const AWAIT_DATA: i32 = 1 << 5;
    pub const EXHAUST: i32 = 1 << 6;
    pub const PARTIAL: i32 = 1 << 7;
}

/// OP_REPLY 响应标志位
pub mod response_flags {
    pub const CURSOR_NOT_FOUND: i32 = 1;
    pub const QUERY_FAILURE: i32 = 1 << 1;
}

/// 16 字节消息头,小端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl MsgHeader {
    pub fn decode(data: &[u8]) -> MongoResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(MongoError::Protocol("Reply shorter than header".to_string()));
        }
        Ok(Self {
            message_length: i32::from_le_bytes(data[0..4].try_into().unwrap()),
            request_id: i32::from_le_bytes(data[4..8].try_into().unwrap()),
            response_to: i32::from_le_bytes(data[8..12].try_into().unwrap()),
            op_code: i32::from_le_bytes(data[12..16].try_into().unwrap()),
        })
    }
}

/// 从一个已组帧的出站消息中读取 op code
///
/// 工作连接用它区分单向消息 (OP_KILL_CURSORS 没有回复)。
pub fn packet_op_code(packet: &[u8]) -> Option<i32> {
    if packet.len() < HEADER_SIZE {
        return None;
    }
    Some(i32::from_le_bytes(packet[12..16].try_into().unwrap()))
}

fn put_header_placeholder(buf: &mut BytesMut, request_id: i32, op_code: i32) -> usize {
    let start = buf.len();
    buf.put_i32_le(0); // messageLength,收尾回填
    buf.put_i32_le(request_id);
    buf.put_i32_le(0); // responseTo
    buf.put_i32_le(op_code);
    start
}

fn finish_message(buf: &mut BytesMut, start: usize) -> MongoResult<Vec<u8>> {
    let total = buf.len() - start;
    if total > MAX_MESSAGE_SIZE {
        return Err(MongoError::Protocol(format!(
            "Message too large: {} bytes",
            total
        )));
    }
    buf[start..start + 4].copy_from_slice(&(total as i32).to_le_bytes());
    Ok(buf.split_off(start).to_vec())
}

fn put_cstring(buf: &mut BytesMut, s: &str) -> MongoResult<()> {
    if s.as_bytes().contains(&0) {
        return Err(MongoError::Protocol(
            "Collection name cannot contain NUL".to_string(),
        ));
    }
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    Ok(())
}

/// 组装 OP_QUERY 消息
///
/// # Brief
/// `{flags, fullCollectionName, numberToSkip, numberToReturn, query, [returnFields]}`
///
/// # Arguments
/// * `request_id` - 请求 ID
/// * `flags` - 查询标志位
/// * `full_collection_name` - "<db>.<collection>"
/// * `number_to_skip` - 跳过的文档数
/// * `number_to_return` - 本批请求的文档数
/// * `query` - 查询文档
/// * `return_fields` - 投影文档(可选)
pub fn build_query(
    request_id: i32,
    flags: i32,
    full_collection_name: &str,
    number_to_skip: i32,
    number_to_return: i32,
    query: &Document,
    return_fields: Option<&Document>,
) -> MongoResult<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(128);
    let start = put_header_placeholder(&mut buf, request_id, OP_QUERY);
    buf.put_i32_le(flags);
    put_cstring(&mut buf, full_collection_name)?;
    buf.put_i32_le(number_to_skip);
    buf.put_i32_le(number_to_return);
    codec::encode(query, &mut buf).map_err(kumongo_common::MongoError::from)?;
    if let Some(fields) = return_fields {
        codec::encode(fields, &mut buf).map_err(kumongo_common::MongoError::from)?;
    }
    finish_message(&mut buf, start)
}

/// 组装 OP_GET_MORE 消息
pub fn build_get_more(
    request_id: i32,
    full_collection_name: &str,
    number_to_return: i32,
    cursor_id: i64,
) -> MongoResult<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(64);
    let start = put_header_placeholder(&mut buf, request_id, OP_GET_MORE);
    buf.put_i32_le(0); // 保留字段
    put_cstring(&mut buf, full_collection_name)?;
    buf.put_i32_le(number_to_return);
    buf.put_i64_le(cursor_id);
    finish_message(&mut buf, start)
}

/// 组装 OP_KILL_CURSORS 消息(单向,无回复)
pub fn build_kill_cursors(request_id: i32, cursor_ids: &[i64]) -> MongoResult<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(32 + cursor_ids.len() * 8);
    let start = put_header_placeholder(&mut buf, request_id, OP_KILL_CURSORS);
    buf.put_i32_le(0); // 保留字段
    buf.put_i32_le(cursor_ids.len() as i32);
    for id in cursor_ids {
        buf.put_i64_le(*id);
    }
    finish_message(&mut buf, start)
}

/// 解析后的 OP_REPLY
#[derive(Debug, Clone)]
pub struct Reply {
    pub response_to: i32,
    pub response_flags: i32,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub documents: Vec<Document>,
}

impl Reply {
    pub fn cursor_not_found(&self) -> bool {
        self.response_flags & response_flags::CURSOR_NOT_FOUND != 0
    }

    pub fn query_failure(&self) -> bool {
        self.response_flags & response_flags::QUERY_FAILURE != 0
    }
}

/// 解析完整的 OP_REPLY 帧(含消息头)
///
/// # Brief
/// 校验 op code 与长度,解出响应标志、游标 ID 和文档序列。
/// `CursorNotFound` 置位时游标 ID 强制为零(游标已终结)。
pub fn parse_reply(frame: &[u8]) -> MongoResult<Reply> {
    let header = MsgHeader::decode(frame)?;
    if header.op_code != OP_REPLY {
        return Err(MongoError::Protocol(format!(
            "Expected OP_REPLY, got op code {}",
            header.op_code
        )));
    }
    if header.message_length as usize != frame.len() {
        return Err(MongoError::Protocol(format!(
            "Reply length mismatch: header says {}, got {}",
            header.message_length,
            frame.len()
        )));
    }
    if frame.len() < HEADER_SIZE + 20 {
        return Err(MongoError::Protocol("Reply body truncated".to_string()));
    }

    let body = &frame[HEADER_SIZE..];
    let response_flags = i32::from_le_bytes(body[0..4].try_into().unwrap());
    let mut cursor_id = i64::from_le_bytes(body[4..12].try_into().unwrap());
    let starting_from = i32::from_le_bytes(body[12..16].try_into().unwrap());
    let number_returned = i32::from_le_bytes(body[16..20].try_into().unwrap());
    if number_returned < 0 {
        return Err(MongoError::Protocol(format!(
            "Negative numberReturned: {}",
            number_returned
        )));
    }

    let mut documents = Vec::with_capacity(number_returned as usize);
    let mut rest = &body[20..];
    for _ in 0..number_returned {
        let (doc, used) =
            codec::decode_prefix(rest).map_err(kumongo_common::MongoError::from)?;
        documents.push(doc);
        rest = &rest[used..];
    }
    if !rest.is_empty() {
        return Err(MongoError::Protocol(format!(
            "Trailing bytes after reply documents: {}",
            rest.len()
        )));
    }

    if response_flags & response_flags::CURSOR_NOT_FOUND != 0 {
        cursor_id = 0;
    }

    Ok(Reply {
        response_to: header.response_to,
        response_flags,
        cursor_id,
        starting_from,
        documents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumongo_bson::doc;

    fn fake_reply(
        response_flags: i32,
        cursor_id: i64,
        request_id: i32,
        docs: &[Document],
    ) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.put_i32_le(response_flags);
        body.put_i64_le(cursor_id);
        body.put_i32_le(0); // startingFrom
        body.put_i32_le(docs.len() as i32);
        for doc in docs {
            codec::encode(doc, &mut body).unwrap();
        }

        let mut frame = BytesMut::new();
        frame.put_i32_le((HEADER_SIZE + body.len()) as i32);
        frame.put_i32_le(77);
        frame.put_i32_le(request_id);
        frame.put_i32_le(OP_REPLY);
        frame.put_slice(&body);
        frame.to_vec()
    }

    #[test]
    fn test_build_query_layout() {
        let query = doc! { "a": 1 };
        let packet =
            build_query(42, query_flags::SLAVE_OK, "db.coll", 3, 7, &query, None).unwrap();

        assert_eq!(
            i32::from_le_bytes(packet[0..4].try_into().unwrap()),
            packet.len() as i32
        );
        assert_eq!(i32::from_le_bytes(packet[4..8].try_into().unwrap()), 42);
        assert_eq!(i32::from_le_bytes(packet[8..12].try_into().unwrap()), 0);
        assert_eq!(
            i32::from_le_bytes(packet[12..16].try_into().unwrap()),
            OP_QUERY
        );
        assert_eq!(
            i32::from_le_bytes(packet[16..20].try_into().unwrap()),
            query_flags::SLAVE_OK
        );
        assert_eq!(&packet[20..28], b"db.coll\0");
        assert_eq!(i32::from_le_bytes(packet[28..32].try_into().unwrap()), 3);
        assert_eq!(i32::from_le_bytes(packet[32..36].try_into().unwrap()), 7);
        assert_eq!(&packet[36..], &query.to_bytes().unwrap()[..]);
    }

    #[test]
    fn test_build_query_with_projection() {
        let query = doc! {};
        let fields = doc! { "name": 1 };
        let packet = build_query(1, 0, "db.c", 0, 0, &query, Some(&fields)).unwrap();
        let without = build_query(1, 0, "db.c", 0, 0, &query, None).unwrap();
        assert_eq!(
            packet.len(),
            without.len() + fields.to_bytes().unwrap().len()
        );
    }

    #[test]
    fn test_build_get_more_layout() {
        let packet = build_get_more(9, "db.coll", 101, 0x1122334455667788).unwrap();
        assert_eq!(
            i32::from_le_bytes(packet[12..16].try_into().unwrap()),
            OP_GET_MORE
        );
        // 保留字段
        assert_eq!(i32::from_le_bytes(packet[16..20].try_into().unwrap()), 0);
        assert_eq!(&packet[20..28], b"db.coll\0");
        assert_eq!(i32::from_le_bytes(packet[28..32].try_into().unwrap()), 101);
        assert_eq!(
            i64::from_le_bytes(packet[32..40].try_into().unwrap()),
            0x1122334455667788
        );
        assert_eq!(packet.len(), 40);
    }

    #[test]
    fn test_build_kill_cursors_layout() {
        let packet = build_kill_cursors(5, &[7, 8]).unwrap();
        assert_eq!(
            i32::from_le_bytes(packet[12..16].try_into().unwrap()),
            OP_KILL_CURSORS
        );
        assert_eq!(i32::from_le_bytes(packet[20..24].try_into().unwrap()), 2);
        assert_eq!(i64::from_le_bytes(packet[24..32].try_into().unwrap()), 7);
        assert_eq!(i64::from_le_bytes(packet[32..40].try_into().unwrap()), 8);
        assert_eq!(packet_op_code(&packet), Some(OP_KILL_CURSORS));
    }

    #[test]
    fn test_parse_reply_roundtrip() {
        let docs = vec![doc! { "x": 1 }, doc! { "y": "two" }];
        let frame = fake_reply(0, 99, 42, &docs);
        let reply = parse_reply(&frame).unwrap();
        assert_eq!(reply.response_to, 42);
        assert_eq!(reply.cursor_id, 99);
        assert_eq!(reply.documents, docs);
        assert!(!reply.cursor_not_found());
        assert!(!reply.query_failure());
    }

    #[test]
    fn test_parse_reply_cursor_not_found_forces_zero() {
        let frame = fake_reply(response_flags::CURSOR_NOT_FOUND, 555, 1, &[]);
        let reply = parse_reply(&frame).unwrap();
        assert!(reply.cursor_not_found());
        assert_eq!(reply.cursor_id, 0);
    }

    #[test]
    fn test_parse_reply_wrong_opcode() {
        let mut frame = fake_reply(0, 0, 1, &[]);
        frame[12..16].copy_from_slice(&OP_QUERY.to_le_bytes());
        assert!(matches!(
            parse_reply(&frame),
            Err(MongoError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_reply_truncated() {
        let frame = fake_reply(0, 0, 1, &[doc! { "x": 1 }]);
        for cut in 1..frame.len() {
            assert!(parse_reply(&frame[..cut]).is_err());
        }
    }
}
