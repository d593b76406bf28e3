//! 数据库模块
//!
//! `Database` 是客户端句柄加名字的轻量组合。管理命令都通过对
//! `<db>.$cmd` 伪集合发一条单文档查询实现,结果包装为 `StatusReply`。

use crate::auth::password_digest;
use crate::client::Client;
use crate::collection::Collection;
use kumongo_bson::{doc, Bson, Document};
use kumongo_common::MongoResult;

/// 命令执行结果
///
/// `ok` 来自服务器回复的 ok 字段;`err` 拼接回复中出现的
/// errmsg / $err / writeErrors;`raw` 保留完整回复文档。
#[derive(Debug, Clone)]
pub struct StatusReply {
    pub ok: bool,
    pub err: String,
    pub n: i64,
    pub inserted_ids: Vec<Bson>,
    pub raw: Document,
}

impl StatusReply {
    pub(crate) fn from_document(raw: Document) -> Self {
        let ok = raw
            .get("ok")
            .and_then(numeric)
            .map(|v| v != 0.0)
            .unwrap_or(false);

        let mut err = String::new();
        for key in ["errmsg", "$err"] {
            if let Some(msg) = raw.get_str(key) {
                append_error(&mut err, msg);
            }
        }
        if let Some(write_errors) = raw.get_array("writeErrors") {
            for entry in write_errors {
                if let Some(msg) = entry.as_document().and_then(|d| d.get_str("errmsg")) {
                    append_error(&mut err, msg);
                }
            }
        }

        let n = raw.get("n").and_then(numeric).unwrap_or(0.0) as i64;

        Self {
            ok,
            err,
            n,
            inserted_ids: Vec::new(),
            raw,
        }
    }
}

fn numeric(value: &Bson) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_i64().map(|n| n as f64))
}

fn append_error(err: &mut String, msg: &str) {
    if !err.is_empty() {
        err.push_str("; ");
    }
    err.push_str(msg);
}

#[derive(Clone)]
pub struct Database {
    client: Client,
    name: String,
}

impl Database {
    pub(crate) fn new(client: Client, name: &str) -> Self {
        Self {
            client,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// 获取集合句柄(轻量,不访问网络)
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(self.clone(), name)
    }

    /// 执行命令并取回原始回复文档
    pub async fn run_command(&self, cmd: Document) -> MongoResult<Document> {
        self.client.run_command(&self.name, cmd).await
    }

    /// 执行命令并包装为 StatusReply
    pub async fn command(&self, cmd: Document) -> MongoResult<StatusReply> {
        Ok(StatusReply::from_document(self.run_command(cmd).await?))
    }

    /// 列出数据库中的集合名
    pub async fn list_collections(&self) -> MongoResult<Vec<String>> {
        let reply = self.run_command(doc! { "listCollections": 1 }).await?;
        let mut names = Vec::new();
        if let Some(batch) = reply
            .get_path("cursor.firstBatch")
            .and_then(|v| v.as_array())
        {
            for entry in batch {
                if let Some(name) = entry.as_document().and_then(|d| d.get_str("name")) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// 创建集合
    pub async fn create_collection(&self, name: &str) -> MongoResult<StatusReply> {
        self.command(doc! { "create": name }).await
    }

    /// 创建固定大小集合 (尾随游标的前提)
    pub async fn create_capped_collection(
        &self,
        name: &str,
        size_bytes: i64,
    ) -> MongoResult<StatusReply> {
        let mut cmd = Document::new();
        cmd.insert("create", name);
        cmd.insert("capped", true);
        cmd.insert("size", size_bytes);
        self.command(cmd).await
    }

    /// 删除集合
    pub async fn drop_collection(&self, name: &str) -> MongoResult<StatusReply> {
        self.command(doc! { "drop": name }).await
    }

    /// 删除整个数据库
    pub async fn drop(&self) -> MongoResult<StatusReply> {
        self.command(doc! { "dropDatabase": 1 }).await
    }

    /// 重命名集合;该命令必须发往 admin 数据库
    pub async fn rename_collection(
        &self,
        from: &str,
        to: &str,
        drop_target: bool,
    ) -> MongoResult<StatusReply> {
        let mut cmd = Document::new();
        cmd.insert("renameCollection", format!("{}.{}", self.name, from));
        cmd.insert("to", format!("{}.{}", self.name, to));
        cmd.insert("dropTarget", drop_target);
        let raw = self.client.run_command("admin", cmd).await?;
        Ok(StatusReply::from_document(raw))
    }

    /// 创建用户
    ///
    /// 口令以 `md5(user + ":mongo:" + pass)` 摘要形式发送
    /// (digestPassword: false)。
    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        roles: &[&str],
    ) -> MongoResult<StatusReply> {
        let mut cmd = Document::new();
        cmd.insert("createUser", username);
        cmd.insert("pwd", password_digest(username, password));
        cmd.insert("digestPassword", false);
        cmd.insert(
            "roles",
            Bson::Array(roles.iter().map(|r| Bson::from(*r)).collect()),
        );
        cmd.insert("writeConcern", self.client.write_concern().clone());
        self.command(cmd).await
    }

    /// 删除用户
    pub async fn drop_user(&self, username: &str) -> MongoResult<StatusReply> {
        let mut cmd = Document::new();
        cmd.insert("dropUser", username);
        cmd.insert("writeConcern", self.client.write_concern().clone());
        self.command(cmd).await
    }

    /// 取最近一次写操作的结果
    pub async fn get_last_error(&self) -> MongoResult<StatusReply> {
        self.command(doc! { "getLastError": 1 }).await
    }

    /// 服务器握手信息
    pub async fn is_master(&self) -> MongoResult<Document> {
        self.run_command(doc! { "isMaster": 1 }).await
    }

    /// 集合统计信息
    pub async fn coll_stats(&self, name: &str) -> MongoResult<Document> {
        self.run_command(doc! { "collStats": name }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reply_ok_variants() {
        // ok 字段可能是 Double 也可能是 Int32
        assert!(StatusReply::from_document(doc! { "ok": 1.0 }).ok);
        assert!(StatusReply::from_document(doc! { "ok": 1 }).ok);
        assert!(!StatusReply::from_document(doc! { "ok": 0.0 }).ok);
        assert!(!StatusReply::from_document(doc! {}).ok);
    }

    #[test]
    fn test_status_reply_error_concatenation() {
        let mut raw = Document::new();
        raw.insert("ok", 0.0f64);
        raw.insert("errmsg", "top level");
        raw.insert(
            "writeErrors",
            Bson::Array(vec![
                Bson::Document(doc! { "errmsg": "dup key" }),
                Bson::Document(doc! { "errmsg": "too big" }),
            ]),
        );
        let status = StatusReply::from_document(raw);
        assert_eq!(status.err, "top level; dup key; too big");
    }

    #[test]
    fn test_status_reply_n_field() {
        let status = StatusReply::from_document(doc! { "ok": 1.0, "n": 7 });
        assert_eq!(status.n, 7);
    }
}
