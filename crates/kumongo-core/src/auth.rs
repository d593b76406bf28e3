//! 认证模块
//!
//! 本模块实现每连接的认证状态机:
//! - SCRAM-SHA-1 (RFC 5802): 盐化质询应答,校验服务器签名
//! - MONGODB-CR: 3.0 之前服务器的 getnonce/authenticate 质询应答
//!
//! MongoDB 的 SCRAM 变体不直接使用明文口令,而是先计算
//! `md5(user + ":mongo:" + pass)` 的十六进制摘要,再以摘要作为
//! SCRAM 的口令输入。

use crate::client::{Channel, Client};
use crate::connection::{AuthMechanism, Credentials};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use kumongo_bson::{doc, Binary, BinarySubtype, Bson, Document};
use kumongo_common::{MongoError, MongoResult};
use md5::Md5;
use rand::Rng;
use sha1::{Digest, Sha1};
use tracing::debug;

type HmacSha1 = Hmac<Sha1>;

/// 计算 MongoDB 口令摘要: hex(md5(user + ":mongo:" + pass))
pub fn password_digest(username: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(username.as_bytes());
    hasher.update(b":mongo:");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn md5_hex(data: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> [u8; 20] {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// RFC 5802 的 Hi(): PBKDF2-HMAC-SHA1
fn salted_password(password: &str, salt: &[u8], iterations: u32) -> [u8; 20] {
    let mut mac = HmacSha1::new_from_slice(password.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    let mut round: [u8; 20] = mac.finalize().into_bytes().into();
    let mut result = round;
    for _ in 1..iterations {
        round = hmac_sha1(password.as_bytes(), &round);
        for (acc, byte) in result.iter_mut().zip(round.iter()) {
            *acc ^= byte;
        }
    }
    result
}

fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; 18];
    rand::thread_rng().fill(&mut bytes[..]);
    BASE64.encode(bytes)
}

/// 解析 "k=v,k=v" 形式的 SCRAM 消息字段
fn parse_scram_fields(message: &str) -> Vec<(&str, &str)> {
    message
        .split(',')
        .filter_map(|part| part.split_once('='))
        .collect()
}

fn scram_field<'a>(fields: &[(&'a str, &'a str)], key: &str) -> MongoResult<&'a str> {
    fields
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .ok_or_else(|| MongoError::Protocol(format!("SCRAM message missing field '{}'", key)))
}

/// SCRAM-SHA-1 会话的纯计算部分
///
/// 网络收发由 `authenticate` 驱动;拆出纯函数便于用
/// RFC 5802 的样例数据验证。
struct ScramState {
    digest: String,
    client_nonce: String,
    client_first_bare: String,
}

impl ScramState {
    fn new(username: &str, digest: String, client_nonce: String) -> Self {
        let client_first_bare = format!("n={},r={}", escape_username(username), client_nonce);
        Self {
            digest,
            client_nonce,
            client_first_bare,
        }
    }

    fn client_first_message(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// 由服务器的 server-first 消息计算 client-final 消息
    ///
    /// # Returns
    /// (client-final 消息, 期望的服务器签名 base64)
    fn client_final(&self, server_first: &str) -> MongoResult<(String, String)> {
        let fields = parse_scram_fields(server_first);
        let server_nonce = scram_field(&fields, "r")?;
        if !server_nonce.starts_with(self.client_nonce.as_str()) {
            return Err(MongoError::Protocol(
                "SCRAM server nonce does not extend client nonce".to_string(),
            ));
        }
        let salt = BASE64
            .decode(scram_field(&fields, "s")?)
            .map_err(|e| MongoError::Protocol(format!("Bad SCRAM salt: {}", e)))?;
        let iterations: u32 = scram_field(&fields, "i")?
            .parse()
            .map_err(|_| MongoError::Protocol("Bad SCRAM iteration count".to_string()))?;

        let salted = salted_password(&self.digest, &salt, iterations);
        let client_key = hmac_sha1(&salted, b"Client Key");
        let stored_key = sha1_digest(&client_key);

        let without_proof = format!("c=biws,r={}", server_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, without_proof
        );

        let client_signature = hmac_sha1(&stored_key, auth_message.as_bytes());
        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature.iter()) {
            *p ^= s;
        }

        let server_key = hmac_sha1(&salted, b"Server Key");
        let server_signature = BASE64.encode(hmac_sha1(&server_key, auth_message.as_bytes()));

        let client_final = format!("{},p={}", without_proof, BASE64.encode(proof));
        Ok((client_final, server_signature))
    }
}

fn binary_payload(value: String) -> Bson {
    Bson::Binary(Binary {
        subtype: BinarySubtype::Generic,
        bytes: value.into_bytes(),
    })
}

fn payload_str(doc: &Document) -> MongoResult<String> {
    match doc.get("payload") {
        Some(Bson::Binary(b)) => String::from_utf8(b.bytes.clone())
            .map_err(|e| MongoError::Protocol(format!("SCRAM payload is not UTF-8: {}", e))),
        Some(Bson::String(s)) => Ok(s.to_string()),
        _ => Err(MongoError::Protocol(
            "SASL reply carried no payload".to_string(),
        )),
    }
}

fn command_ok(doc: &Document) -> bool {
    doc.get("ok")
        .and_then(|v| v.as_f64().or_else(|| v.as_i64().map(|n| n as f64)))
        .unwrap_or(0.0)
        != 0.0
}

fn error_message(doc: &Document) -> String {
    doc.get_str("errmsg").unwrap_or("authentication failed").to_string()
}

/// 在指定通道上完成认证
///
/// 在首次使用某连接槽位且客户端带凭据时调用;成功后槽位被标记为
/// 已认证,后续获取不再重复握手。
pub(crate) async fn authenticate(
    client: &Client,
    channel: &Channel,
    credentials: &Credentials,
    auth_db: &str,
    mechanism: AuthMechanism,
) -> MongoResult<()> {
    match mechanism {
        AuthMechanism::ScramSha1 => {
            scram_sha1(client, channel, credentials, auth_db).await
        }
        AuthMechanism::MongodbCr => mongodb_cr(client, channel, credentials, auth_db).await,
    }
}

async fn scram_sha1(
    client: &Client,
    channel: &Channel,
    credentials: &Credentials,
    auth_db: &str,
) -> MongoResult<()> {
    let digest = password_digest(&credentials.username, &credentials.password);
    let state = ScramState::new(&credentials.username, digest, generate_nonce());

    let mut start = Document::new();
    start.insert("saslStart", 1i32);
    start.insert("mechanism", "SCRAM-SHA-1");
    start.insert("payload", binary_payload(state.client_first_message()));
    start.insert("autoAuthorize", 1i32);
    start.insert("options", doc! { "skipEmptyExchange": true });

    let first = client.run_command_on_channel(channel, auth_db, start).await?;
    if first.contains_key("code") || !command_ok(&first) {
        return Err(MongoError::Auth(error_message(&first)));
    }
    let conversation_id = first
        .get("conversationId")
        .cloned()
        .ok_or_else(|| MongoError::Protocol("saslStart reply missing conversationId".to_string()))?;
    let server_first = payload_str(&first)?;

    let (client_final, expected_signature) = state.client_final(&server_first)?;

    let mut cont = Document::new();
    cont.insert("saslContinue", 1i32);
    cont.insert("conversationId", conversation_id.clone());
    cont.insert("payload", binary_payload(client_final));

    let second = client.run_command_on_channel(channel, auth_db, cont).await?;
    if !command_ok(&second) {
        return Err(MongoError::Auth(error_message(&second)));
    }

    let server_final = payload_str(&second)?;
    let fields = parse_scram_fields(&server_final);
    let server_signature = scram_field(&fields, "v")?;
    if server_signature != expected_signature {
        return Err(MongoError::Protocol(
            "SCRAM server signature mismatch".to_string(),
        ));
    }

    if !second.get_bool("done").unwrap_or(false) {
        // 服务器未接受 skipEmptyExchange,补一轮空消息
        let mut finish = Document::new();
        finish.insert("saslContinue", 1i32);
        finish.insert("conversationId", conversation_id);
        finish.insert("payload", binary_payload(String::new()));

        let third = client.run_command_on_channel(channel, auth_db, finish).await?;
        if !command_ok(&third) || !third.get_bool("done").unwrap_or(false) {
            return Err(MongoError::Auth(
                "SASL conversation did not complete".to_string(),
            ));
        }
    }

    debug!("SCRAM-SHA-1 authentication succeeded for {}", credentials.username);
    Ok(())
}

/// 遗留 MONGODB-CR 机制 (3.0 之前的服务器)
async fn mongodb_cr(
    client: &Client,
    channel: &Channel,
    credentials: &Credentials,
    auth_db: &str,
) -> MongoResult<()> {
    let reply = client
        .run_command_on_channel(channel, auth_db, doc! { "getnonce": 1 })
        .await?;
    if !command_ok(&reply) {
        return Err(MongoError::Auth(error_message(&reply)));
    }
    let nonce = reply
        .get_str("nonce")
        .ok_or_else(|| MongoError::Protocol("getnonce reply missing nonce".to_string()))?
        .to_string();

    let digest = password_digest(&credentials.username, &credentials.password);
    let key = md5_hex(&format!("{}{}{}", nonce, credentials.username, digest));

    let mut auth = Document::new();
    auth.insert("authenticate", 1i32);
    auth.insert("user", credentials.username.as_str());
    auth.insert("nonce", nonce);
    auth.insert("key", key);

    let reply = client.run_command_on_channel(channel, auth_db, auth).await?;
    if !command_ok(&reply) {
        return Err(MongoError::Auth(error_message(&reply)));
    }

    debug!("MONGODB-CR authentication succeeded for {}", credentials.username);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 5802 第 5 节的样例会话 (SCRAM-SHA-1, 口令 "pencil")
    const RFC_NONCE: &str = "fyko+d2lbbFgONRv9qkxdawL";
    const RFC_SERVER_FIRST: &str =
        "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";

    #[test]
    fn test_rfc5802_client_final() {
        let state = ScramState::new("user", "pencil".to_string(), RFC_NONCE.to_string());
        assert_eq!(
            state.client_first_message(),
            "n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL"
        );

        let (client_final, server_signature) = state.client_final(RFC_SERVER_FIRST).unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts="
        );
        assert_eq!(server_signature, "rmF9pqV8S7suAoZWja4dJRkFsKQ=");
    }

    #[test]
    fn test_password_digest_vector() {
        // MongoDB 认证规范中的样例: user/pencil
        assert_eq!(
            password_digest("user", "pencil"),
            "1c33006ec1ffd90f9cadcbcc0e118200"
        );
    }

    #[test]
    fn test_nonce_extension_checked() {
        let state = ScramState::new("user", "pencil".to_string(), "abcdef".to_string());
        let err = state
            .client_final("r=XYZ123,s=QSXCR+Q6sek8bf92,i=4096")
            .unwrap_err();
        assert!(matches!(err, MongoError::Protocol(_)));
    }

    #[test]
    fn test_missing_fields_rejected() {
        let state = ScramState::new("user", "pencil".to_string(), "abc".to_string());
        assert!(state.client_final("r=abcdef,i=4096").is_err());
        assert!(state.client_final("garbage").is_err());
    }

    #[test]
    fn test_username_escaping() {
        assert_eq!(escape_username("a=b,c"), "a=3Db=2Cc");
        let state = ScramState::new("a,b", "x".to_string(), "n".to_string());
        assert_eq!(state.client_first_message(), "n,,n=a=2Cb,r=n");
    }

    #[test]
    fn test_generate_nonce_unique_and_clean() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
        assert!(!a.contains(','));
    }

    #[test]
    fn test_salted_password_iteration_count_matters() {
        let one = salted_password("pencil", b"salt", 1);
        let two = salted_password("pencil", b"salt", 2);
        assert_ne!(one, two);
    }

    #[test]
    fn test_mongodb_cr_key_shape() {
        let digest = password_digest("test1", "test");
        let key = md5_hex(&format!("{}{}{}", "abc123", "test1", digest));
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
