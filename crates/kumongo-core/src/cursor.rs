//! 游标模块
//!
//! 查询结果的惰性迭代。游标缓存一批文档,耗尽时向服务器发
//! OP_QUERY / OP_GET_MORE 补批;服务器游标 ID 归零即终结。
//!
//! 尾随游标 (tailable) 在固定集合上保持服务器游标存活:取空一批
//! 不算终结,后续插入的文档会在下一次补批时出现;配合 await-data
//! 服务器会短暂阻塞以减少轮询。

use crate::client::Client;
use crate::wire::{self, query_flags};
use kumongo_bson::Document;
use kumongo_common::{MongoError, MongoResult};
use std::collections::VecDeque;
use tracing::debug;

pub struct Cursor {
    client: Client,
    namespace: String,
    query: Document,
    projection: Option<Document>,
    flags: i32,
    skip: i32,
    limit: i32,
    batch_size: i32,
    cursor_id: i64,
    delivered: i64,
    closed: bool,
    buffer: VecDeque<Document>,
}

impl Cursor {
    pub(crate) fn new(client: Client, namespace: String, filter: Document, flags: i32) -> Self {
        let mut query = Document::new();
        query.insert("$query", filter);
        Self {
            client,
            namespace,
            query,
            projection: None,
            flags,
            skip: 0,
            limit: 0,
            batch_size: 0,
            cursor_id: 0,
            delivered: 0,
            closed: false,
            buffer: VecDeque::new(),
        }
    }

    /// 跳过前 n 个文档
    pub fn skip(mut self, n: i32) -> Self {
        self.skip = n;
        self
    }

    /// 总共最多交付 n 个文档;负值表示单批硬上限
    pub fn limit(mut self, n: i32) -> Self {
        self.limit = n;
        self
    }

    /// 每批向服务器请求的文档数
    pub fn batch_size(mut self, n: i32) -> Self {
        self.batch_size = n;
        self
    }

    /// 注入 "$orderby" 排序文档
    pub fn order_by(mut self, sort: Document) -> Self {
        self.query.insert("$orderby", sort);
        self
    }

    /// 服务器端执行时限;超时以 `OperationTimeout` 浮出
    pub fn max_time_ms(mut self, ms: i64) -> Self {
        if ms > 0 {
            self.query.insert("$maxTimeMS", ms);
        }
        self
    }

    /// 字段投影,仅返回给定字段
    pub fn fields(mut self, names: &[&str]) -> Self {
        let mut projection = Document::with_capacity(names.len());
        for name in names {
            projection.insert(*name, 1i32);
        }
        self.projection = Some(projection);
        self
    }

    /// 自定义投影文档
    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    /// 尾随游标;`await_data` 让服务器在无数据时短暂阻塞
    pub fn tailable(mut self, await_data: bool) -> Self {
        self.flags |= query_flags::TAILABLE_CURSOR;
        if await_data {
            self.flags |= query_flags::AWAIT_DATA;
        }
        self
    }

    /// 叠加原始查询标志位
    pub fn with_flags(mut self, flags: i32) -> Self {
        self.flags |= flags;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn cursor_id(&self) -> i64 {
        self.cursor_id
    }

    pub fn delivered(&self) -> i64 {
        self.delivered
    }

    fn is_tailable(&self) -> bool {
        self.flags & query_flags::TAILABLE_CURSOR != 0
    }

    /// 向服务器请求下一批文档
    ///
    /// 首批走 OP_QUERY,其后按缓存的游标 ID 走 OP_GET_MORE。
    /// 回复中含 `$err` 且 code 为 50 时以 `OperationTimeout` 浮出;
    /// 单文档请求取空时返回 `NotFound`。
    pub async fn refresh(&mut self) -> MongoResult<Vec<Document>> {
        if self.closed {
            return Err(MongoError::Communication(
                "Cursor is already closed".to_string(),
            ));
        }

        let number_to_return =
            match compute_batch(self.limit, self.delivered, self.batch_size) {
                Some(n) => n,
                None => {
                    // 限额已交付完,无需再发请求
                    self.closed = true;
                    return Ok(Vec::new());
                }
            };

        let request_id = self.client.next_request_id();
        let packet = if self.cursor_id == 0 {
            wire::build_query(
                request_id,
                self.flags,
                &self.namespace,
                self.skip,
                number_to_return,
                &self.query,
                self.projection.as_ref(),
            )?
        } else {
            wire::build_get_more(request_id, &self.namespace, number_to_return, self.cursor_id)?
        };

        let channel = self.client.acquire_channel().await?;
        let result = channel.round_trip(packet).await;
        let released = self.client.release_channel(channel);
        let reply = result?;
        released?;

        if reply.cursor_id == 0 || !self.is_tailable() {
            self.cursor_id = reply.cursor_id;
            if self.cursor_id == 0 {
                self.closed = true;
            }
        }

        self.delivered += reply.documents.len() as i64;
        for doc in &reply.documents {
            if let Some(err) = doc.get_str("$err") {
                if doc.get_i64("code") == Some(50) {
                    return Err(MongoError::OperationTimeout(err.to_string()));
                }
                return Err(MongoError::Protocol(format!("Query failure: {}", err)));
            }
        }

        if reply.documents.is_empty() && number_to_return == 1 {
            return Err(MongoError::NotFound(format!(
                "No document matched in {}",
                self.namespace
            )));
        }

        Ok(reply.documents)
    }

    /// 取下一个文档
    ///
    /// 缓存取空时自动补批。普通游标返回 `None` 即终结;尾随游标
    /// 返回 `None` 表示暂无数据,之后可以再次调用。
    pub async fn next(&mut self) -> MongoResult<Option<Document>> {
        loop {
            if let Some(doc) = self.buffer.pop_front() {
                return Ok(Some(doc));
            }
            if self.closed {
                return Ok(None);
            }
            let batch = self.refresh().await?;
            if batch.is_empty() {
                if self.is_tailable() && !self.closed {
                    return Ok(None);
                }
                if self.closed {
                    return Ok(None);
                }
                continue;
            }
            self.buffer.extend(batch);
        }
    }

    /// 取回剩余的全部文档
    pub async fn all(&mut self) -> MongoResult<Vec<Document>> {
        let mut out = Vec::new();
        while let Some(doc) = self.next().await? {
            out.push(doc);
        }
        Ok(out)
    }

    /// 只取一个文档;没有匹配时返回 `NotFound`
    pub async fn first(mut self) -> MongoResult<Document> {
        self.limit = -1;
        let batch = self.refresh().await?;
        batch.into_iter().next().ok_or_else(|| {
            MongoError::NotFound(format!("No document matched in {}", self.namespace))
        })
    }

    /// `first` 的宽松变体:`NotFound` 转为 `None`
    pub async fn first_or_none(self) -> MongoResult<Option<Document>> {
        match self.first().await {
            Ok(doc) => Ok(Some(doc)),
            Err(MongoError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 关闭游标
    ///
    /// 本地标记终结并清空缓存;服务器游标仍存活时发一条
    /// OP_KILL_CURSORS(单向,尽力而为)。
    pub async fn close(&mut self) -> MongoResult<()> {
        let id = self.cursor_id;
        self.closed = true;
        self.cursor_id = 0;
        self.buffer.clear();

        if id != 0 {
            let request_id = self.client.next_request_id();
            let packet = wire::build_kill_cursors(request_id, &[id])?;
            let channel = self.client.acquire_channel().await?;
            if let Err(e) = channel.send_only(packet).await {
                debug!("killCursors for {} failed: {}", id, e);
            }
            let _ = self.client.release_channel(channel);
        }
        Ok(())
    }
}

/// 计算一次补批的 numberToReturn
///
/// - `limit == 0`: 请求 `batch_size`
/// - `limit < 0`: 请求 `limit` (单批硬上限)
/// - 其余: `limit - delivered`,`batch_size` 为正时再取两者较小;
///   结果非正表示限额已满,返回 None (游标应当关闭)
pub(crate) fn compute_batch(limit: i32, delivered: i64, batch_size: i32) -> Option<i32> {
    if limit == 0 {
        Some(batch_size)
    } else if limit < 0 {
        Some(limit)
    } else {
        let remaining = limit - delivered as i32;
        let n = if batch_size > 0 {
            remaining.min(batch_size)
        } else {
            remaining
        };
        if n <= 0 {
            None
        } else {
            Some(n)
        }
    }
}
