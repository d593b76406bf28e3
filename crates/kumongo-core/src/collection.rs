//! 集合模块
//!
//! `Collection` 是数据库句柄加名字;查询从这里进入游标引擎,
//! 写操作通过命令门面执行。`insert` 为缺少 `_id` 的文档生成
//! ObjectId 并在 `StatusReply::inserted_ids` 中报告。

use crate::cursor::Cursor;
use crate::database::{Database, StatusReply};
use kumongo_bson::{Bson, Document};
use kumongo_common::{MongoError, MongoResult, ObjectId};

#[derive(Clone)]
pub struct Collection {
    database: Database,
    name: String,
}

impl Collection {
    pub(crate) fn new(database: Database, name: &str) -> Self {
        Self {
            database,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// 全名 "<db>.<collection>",即 fullCollectionName
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database.name(), self.name)
    }

    /// 按过滤文档查询,返回可继续配置的游标
    pub fn find(&self, filter: Document) -> Cursor {
        Cursor::new(
            self.database.client().clone(),
            self.full_name(),
            filter,
            self.database.client().options().query_flags,
        )
    }

    /// 带投影与服务器时限的查询
    pub fn find_with(&self, filter: Document, fields: &[&str], max_time_ms: i64) -> Cursor {
        let mut cursor = self.find(filter).max_time_ms(max_time_ms);
        if !fields.is_empty() {
            cursor = cursor.fields(fields);
        }
        cursor
    }

    /// 插入一批文档
    ///
    /// 缺少 `_id` 的文档在发送前补上新生成的 ObjectId,
    /// 全部文档的 id 按原顺序报告在 `inserted_ids` 中。
    pub async fn insert(&self, docs: Vec<Document>) -> MongoResult<StatusReply> {
        let mut inserted_ids = Vec::with_capacity(docs.len());
        let mut prepared = Vec::with_capacity(docs.len());
        for mut doc in docs {
            match doc.get("_id") {
                Some(id) => inserted_ids.push(id.clone()),
                None => {
                    let id = ObjectId::new();
                    doc.insert("_id", id);
                    inserted_ids.push(Bson::ObjectId(id));
                }
            }
            prepared.push(doc);
        }

        let mut cmd = Document::new();
        cmd.insert("insert", self.name.as_str());
        cmd.insert(
            "documents",
            Bson::Array(prepared.into_iter().map(Bson::Document).collect()),
        );
        cmd.insert("writeConcern", self.database.client().write_concern().clone());

        let mut status = self.database.command(cmd).await?;
        status.inserted_ids = inserted_ids;
        Ok(status)
    }

    /// 插入单个文档
    pub async fn insert_one(&self, doc: Document) -> MongoResult<StatusReply> {
        self.insert(vec![doc]).await
    }

    /// 更新匹配的文档
    ///
    /// # Arguments
    /// * `selector` - 匹配条件
    /// * `update` - 更新文档 ($set 等操作符或整体替换)
    /// * `multi` - 是否更新全部匹配
    /// * `upsert` - 无匹配时是否插入
    pub async fn update(
        &self,
        selector: Document,
        update: Document,
        multi: bool,
        upsert: bool,
    ) -> MongoResult<StatusReply> {
        let mut entry = Document::new();
        entry.insert("q", selector);
        entry.insert("u", update);
        entry.insert("multi", multi);
        entry.insert("upsert", upsert);

        let mut cmd = Document::new();
        cmd.insert("update", self.name.as_str());
        cmd.insert("updates", Bson::Array(vec![Bson::Document(entry)]));
        cmd.insert("writeConcern", self.database.client().write_concern().clone());
        self.database.command(cmd).await
    }

    /// 删除匹配的文档;`multi` 为 false 时至多删一个
    pub async fn remove(&self, selector: Document, multi: bool) -> MongoResult<StatusReply> {
        let mut entry = Document::new();
        entry.insert("q", selector);
        entry.insert("limit", if multi { 0i32 } else { 1i32 });

        let mut cmd = Document::new();
        cmd.insert("delete", self.name.as_str());
        cmd.insert("deletes", Bson::Array(vec![Bson::Document(entry)]));
        cmd.insert("writeConcern", self.database.client().write_concern().clone());
        self.database.command(cmd).await
    }

    /// 统计匹配的文档数
    pub async fn count(&self, filter: Document) -> MongoResult<i64> {
        let mut cmd = Document::new();
        cmd.insert("count", self.name.as_str());
        cmd.insert("query", filter);
        let status = self.database.command(cmd).await?;
        if !status.ok {
            return Err(MongoError::Protocol(format!(
                "count failed: {}",
                status.err
            )));
        }
        Ok(status.n)
    }

    /// 字段去重取值
    pub async fn distinct(&self, key: &str, filter: Document) -> MongoResult<Vec<Bson>> {
        let mut cmd = Document::new();
        cmd.insert("distinct", self.name.as_str());
        cmd.insert("key", key);
        cmd.insert("query", filter);
        let reply = self.database.run_command(cmd).await?;
        Ok(reply.get_array("values").cloned().unwrap_or_default())
    }

    /// 原子查找并修改
    ///
    /// # Arguments
    /// * `query` - 匹配条件
    /// * `sort` - 多个匹配时的选取顺序
    /// * `update` - 更新文档;`remove` 为 true 时忽略
    /// * `remove` - 删除而非更新
    /// * `new` - 返回修改后而非修改前的文档
    /// * `upsert` - 无匹配时插入
    ///
    /// # Returns
    /// 被选中的文档;无匹配时为 `None`
    pub async fn find_and_modify(
        &self,
        query: Document,
        sort: Option<Document>,
        update: Option<Document>,
        remove: bool,
        new: bool,
        upsert: bool,
    ) -> MongoResult<Option<Document>> {
        let mut cmd = Document::new();
        cmd.insert("findAndModify", self.name.as_str());
        cmd.insert("query", query);
        if let Some(sort) = sort {
            cmd.insert("sort", sort);
        }
        if remove {
            cmd.insert("remove", true);
        } else if let Some(update) = update {
            cmd.insert("update", update);
        }
        cmd.insert("new", new);
        cmd.insert("upsert", upsert);

        let reply = self.database.run_command(cmd).await?;
        match reply.get("value") {
            Some(Bson::Document(doc)) => Ok(Some(doc.clone())),
            _ => Ok(None),
        }
    }

    /// 删除集合
    pub async fn drop(&self) -> MongoResult<StatusReply> {
        self.database.drop_collection(&self.name).await
    }

    /// 集合统计信息
    pub async fn stats(&self) -> MongoResult<Document> {
        self.database.coll_stats(&self.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::connection::ClientOptions;
    use bytes::{BufMut, BytesMut};
    use kumongo_bson::{codec, doc};
    use support::*;

    // 集合层的行为大多要靠命令往返验证;这里搭一个顺序回放的假服务器
    mod support {
        use super::*;
        use crate::wire;
        use std::net::SocketAddr;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        pub fn encode_reply(response_to: i32, docs: &[Document], cursor_id: i64) -> Vec<u8> {
            let mut body = BytesMut::new();
            body.put_i32_le(0);
            body.put_i64_le(cursor_id);
            body.put_i32_le(0);
            body.put_i32_le(docs.len() as i32);
            for doc in docs {
                codec::encode(doc, &mut body).unwrap();
            }
            let mut frame = BytesMut::new();
            frame.put_i32_le((wire::HEADER_SIZE + body.len()) as i32);
            frame.put_i32_le(1);
            frame.put_i32_le(response_to);
            frame.put_i32_le(wire::OP_REPLY);
            frame.put_slice(&body);
            frame.to_vec()
        }

        /// 回放脚本并把收到的每条消息体 (查询文档) 送回检查端
        pub async fn scripted_server(
            scripted: Vec<(Vec<Document>, i64)>,
            captured: tokio::sync::mpsc::Sender<Document>,
        ) -> SocketAddr {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                let (mut sock, _) = listener.accept().await.unwrap();
                for (docs, cursor_id) in scripted {
                    let mut len_buf = [0u8; 4];
                    if sock.read_exact(&mut len_buf).await.is_err() {
                        return;
                    }
                    let len = i32::from_le_bytes(len_buf) as usize;
                    let mut rest = vec![0u8; len - 4];
                    sock.read_exact(&mut rest).await.unwrap();
                    let request_id = i32::from_le_bytes(rest[0..4].try_into().unwrap());

                    // OP_QUERY 消息体: flags(4) cstring skip(4) nret(4) doc
                    let op_code = i32::from_le_bytes(rest[8..12].try_into().unwrap());
                    if op_code == wire::OP_QUERY {
                        let after_flags = &rest[16..];
                        let name_end = after_flags.iter().position(|b| *b == 0).unwrap();
                        let doc_start = name_end + 1 + 8;
                        let (query, _) =
                            kumongo_bson::decode_prefix(&after_flags[doc_start..]).unwrap();
                        let _ = captured.send(query).await;
                    }

                    let reply = encode_reply(request_id, &docs, cursor_id);
                    sock.write_all(&reply).await.unwrap();
                }
            });
            addr
        }
    }

    async fn test_client(addr: std::net::SocketAddr) -> Client {
        let uri = format!("mongodb://{}", addr);
        let options = ClientOptions::builder().max_connections(1).build();
        Client::connect_with_options(&uri, options).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_insert_generates_ids() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let addr = scripted_server(vec![(vec![doc! { "ok": 1.0, "n": 2 }], 0)], tx).await;
        let client = test_client(addr).await;
        let coll = client.database("testdb").collection("items");

        let preset = ObjectId::new();
        let mut with_id = Document::new();
        with_id.insert("_id", preset);
        with_id.insert("iter", 0i32);

        let status = coll
            .insert(vec![with_id, doc! { "iter": 1 }])
            .await
            .unwrap();
        assert!(status.ok);
        assert_eq!(status.n, 2);
        assert_eq!(status.inserted_ids.len(), 2);
        assert_eq!(status.inserted_ids[0], Bson::ObjectId(preset));
        assert!(matches!(status.inserted_ids[1], Bson::ObjectId(_)));

        // 服务器侧看到的命令带补全的 _id 和写关注
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.get_str("insert"), Some("items"));
        let sent_docs = seen.get_array("documents").unwrap();
        assert!(sent_docs[1].contains("_id"));
        assert!(seen
            .get_document("writeConcern")
            .map(|wc| wc.contains_key("w"))
            .unwrap_or(false));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_update_command_shape() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let addr = scripted_server(vec![(vec![doc! { "ok": 1.0, "n": 2 }], 0)], tx).await;
        let client = test_client(addr).await;
        let coll = client.database("testdb").collection("items");

        let status = coll
            .update(
                doc! { "integer": 100 },
                doc! { "$set": { "integer": 200 } },
                true,
                false,
            )
            .await
            .unwrap();
        assert!(status.ok);
        assert_eq!(status.n, 2);

        let seen = rx.recv().await.unwrap();
        let entry = seen.get_array("updates").unwrap()[0].as_document().unwrap();
        assert_eq!(entry.get_bool("multi"), Some(true));
        assert_eq!(entry.get_bool("upsert"), Some(false));
        assert_eq!(
            entry.get_path("u.$set.integer").unwrap().to_int().unwrap(),
            200
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_remove_limit_flag() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let addr = scripted_server(vec![(vec![doc! { "ok": 1.0, "n": 1 }], 0)], tx).await;
        let client = test_client(addr).await;
        let coll = client.database("testdb").collection("items");

        coll.remove(doc! { "x": 1 }, false).await.unwrap();
        let seen = rx.recv().await.unwrap();
        let entry = seen.get_array("deletes").unwrap()[0].as_document().unwrap();
        assert_eq!(entry.get_i32("limit"), Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_count() {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let addr = scripted_server(vec![(vec![doc! { "ok": 1.0, "n": 5 }], 0)], tx).await;
        let client = test_client(addr).await;
        let coll = client.database("testdb").collection("items");
        assert_eq!(coll.count(doc! { "label": "l" }).await.unwrap(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_find_drains_batches() {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let addr = scripted_server(
            vec![
                (vec![doc! { "iter": 0 }, doc! { "iter": 1 }], 33),
                (vec![doc! { "iter": 2 }], 0),
            ],
            tx,
        )
        .await;
        let client = test_client(addr).await;
        let coll = client.database("testdb").collection("items");

        let mut cursor = coll.find(doc! { "label": "l" });
        let docs = cursor.all().await.unwrap();
        assert_eq!(docs.len(), 3);
        let iters: Vec<i64> = docs.iter().map(|d| d.get_i64("iter").unwrap()).collect();
        assert_eq!(iters, vec![0, 1, 2]);
        assert!(cursor.is_closed());
        assert_eq!(cursor.delivered(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_find_limit_stops_early() {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let addr = scripted_server(
            vec![(vec![doc! { "iter": 0 }, doc! { "iter": 1 }], 33)],
            tx,
        )
        .await;
        let client = test_client(addr).await;
        let coll = client.database("testdb").collection("items");

        let mut cursor = coll.find(doc! {}).limit(2);
        let docs = cursor.all().await.unwrap();
        assert_eq!(docs.len(), 2);
        // 限额已满,未发第二次请求就终结
        assert!(cursor.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_first_not_found() {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let addr = scripted_server(vec![(vec![], 0)], tx).await;
        let client = test_client(addr).await;
        let coll = client.database("testdb").collection("items");

        let err = coll.find(doc! { "nope": 1 }).first().await.unwrap_err();
        assert!(matches!(err, MongoError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_first_or_none_converts() {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let addr = scripted_server(vec![(vec![], 0)], tx).await;
        let client = test_client(addr).await;
        let coll = client.database("testdb").collection("items");

        let found = coll.find(doc! {}).first_or_none().await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_query_document_shape() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let addr = scripted_server(vec![(vec![doc! { "i": 2 }], 0)], tx).await;
        let client = test_client(addr).await;
        let coll = client.database("testdb").collection("items");

        let mut cursor = coll
            .find_with(doc! { "label": "l" }, &[], 1500)
            .order_by(doc! { "i": 1 });
        cursor.all().await.unwrap();

        let seen = rx.recv().await.unwrap();
        assert_eq!(
            seen.get_path("$query.label").unwrap().to_str().unwrap(),
            "l"
        );
        assert_eq!(seen.get_path("$maxTimeMS").unwrap().to_int().unwrap(), 1500);
        assert_eq!(seen.get_path("$orderby.i").unwrap().to_int().unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_operation_timeout_surfaces() {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let addr = scripted_server(
            vec![(
                vec![doc! { "$err": "operation exceeded time limit", "code": 50 }],
                0,
            )],
            tx,
        )
        .await;
        let client = test_client(addr).await;
        let coll = client.database("testdb").collection("items");

        let mut cursor = coll.find(doc! {});
        let err = cursor.refresh().await.unwrap_err();
        assert!(matches!(err, MongoError::OperationTimeout(_)));
    }
}
