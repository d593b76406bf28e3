//! 公共类型定义模块
//!
//! 定义 KuMongo 的核心类型:
//! - ObjectId: 12 字节唯一标识符(MongoDB ObjectId)
//! - Replica: 一个可寻址的 MongoDB 端点(host, port, tls)

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::{SystemTime, UNIX_EPOCH};

/// ObjectId - 12 字节唯一标识符
///
/// 格式:
/// - 前 4 字节: 时间戳(秒,大端)
/// - 后 8 字节: 随机数(/dev/urandom 或系统熵)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as u32;
        bytes[0..4].copy_from_slice(&timestamp.to_be_bytes());
        let random: [u8; 8] = rand_bytes();
        bytes[4..12].copy_from_slice(&random);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, crate::error::MongoError> {
        let bytes = hex::decode(s).map_err(|e| {
            crate::error::MongoError::InvalidObjectId(format!("Invalid hex: {}", e))
        })?;
        if bytes.len() != 12 {
            return Err(crate::error::MongoError::InvalidObjectId(
                "ObjectId must be 12 bytes".to_string(),
            ));
        }
        let mut arr = [0u8; 12];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ObjectId 在 serde 边界上使用扩展 JSON 形式 {"$oid": "<hex>"},
// 与 kumongo-bson 的对象映射层互相识别。
impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("$oid", &self.to_hex())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Extended { #[serde(rename = "$oid")] oid: String },
            Hex(String),
        }
        let hex = match Repr::deserialize(deserializer)? {
            Repr::Extended { oid } => oid,
            Repr::Hex(s) => s,
        };
        ObjectId::from_hex(&hex).map_err(|e| D::Error::custom(e.to_string()))
    }
}

/// # Brief
/// 从系统熵源读取随机字节
///
/// Linux 下读取 /dev/urandom,其余平台退化为 RandomState 哈希熵。
fn rand_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    #[cfg(target_os = "linux")]
    {
        use std::fs::File;
        use std::io::Read;
        if let Ok(mut f) = File::open("/dev/urandom") {
            let _ = f.read_exact(&mut bytes);
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        use std::collections::hash_map::RandomState;
        use std::hash::{BuildHasher, Hasher};
        let state = RandomState::new();
        for chunk in bytes.chunks_mut(8) {
            let hash = state.build_hasher().finish().to_le_bytes();
            let len = chunk.len().min(8);
            chunk.copy_from_slice(&hash[..len]);
        }
    }
    bytes
}

/// 副本端点
///
/// 一个可连接的 MongoDB 端点。客户端可持有多个(副本集),
/// 连接池按 (副本 × 槽位) 建立工作连接。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Replica {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Replica {
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }
}

impl std::fmt::Display for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_roundtrip() {
        let id = ObjectId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 24);
        assert_eq!(ObjectId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn test_object_id_unique() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_object_id_bad_hex() {
        assert!(ObjectId::from_hex("zzzz").is_err());
        assert!(ObjectId::from_hex("0011").is_err());
    }

    #[test]
    fn test_object_id_timestamp() {
        let id = ObjectId::new();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as u32;
        assert!(now - id.timestamp() < 5);
    }

    #[test]
    fn test_replica_display() {
        let replica = Replica::new("localhost", 27017, false);
        assert_eq!(replica.to_string(), "localhost:27017");
    }
}
