//! DNS SRV 解析模块
//!
//! `mongodb+srv://` 方案通过 `_mongodb._tcp.<host>` 的 SRV 记录获得
//! 副本列表,每个副本强制启用 TLS。解析器可插拔;默认实现使用
//! `DNS_SERVER` 环境变量指定的服务器(缺省 8.8.8.8)。

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use kumongo_common::{MongoError, MongoResult, Replica};
use std::net::IpAddr;
use tracing::debug;

/// SRV 解析器接口
///
/// 返回 (host, port, tls) 三元组列表;`+srv` 下 tls 恒为 true。
#[async_trait]
pub trait SrvResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> MongoResult<Vec<Replica>>;
}

/// 默认 DNS SRV 解析器
pub struct DnsSrvResolver {
    server: IpAddr,
}

impl DnsSrvResolver {
    pub fn new(server: IpAddr) -> Self {
        Self { server }
    }

    /// 从 DNS_SERVER 环境变量构造,缺省使用 8.8.8.8
    pub fn from_env() -> Self {
        let server = std::env::var("DNS_SERVER")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| IpAddr::from([8, 8, 8, 8]));
        Self { server }
    }
}

impl Default for DnsSrvResolver {
    fn default() -> Self {
        Self::from_env()
    }
}

#[async_trait]
impl SrvResolver for DnsSrvResolver {
    async fn resolve(&self, host: &str) -> MongoResult<Vec<Replica>> {
        let group = NameServerConfigGroup::from_ips_clear(&[self.server], 53, true);
        let config = ResolverConfig::from_parts(None, vec![], group);
        let resolver = TokioAsyncResolver::tokio(config, ResolverOpts::default());

        let name = format!("_mongodb._tcp.{}", host);
        debug!("Resolving SRV record {} via {}", name, self.server);

        let lookup = resolver
            .srv_lookup(name.clone())
            .await
            .map_err(|e| MongoError::Config(format!("SRV lookup for {} failed: {}", name, e)))?;

        let replicas: Vec<Replica> = lookup
            .iter()
            .map(|srv| {
                let target = srv.target().to_utf8();
                Replica::new(target.trim_end_matches('.'), srv.port(), true)
            })
            .collect();

        if replicas.is_empty() {
            return Err(MongoError::Config(format!(
                "SRV record {} resolved to no hosts",
                name
            )));
        }

        debug!("SRV {} -> {} replicas", name, replicas.len());
        Ok(replicas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_default() {
        std::env::remove_var("DNS_SERVER");
        let resolver = DnsSrvResolver::from_env();
        assert_eq!(resolver.server, IpAddr::from([8, 8, 8, 8]));
    }

    #[test]
    fn test_from_env_override() {
        std::env::set_var("DNS_SERVER", "1.1.1.1");
        let resolver = DnsSrvResolver::from_env();
        assert_eq!(resolver.server, IpAddr::from([1, 1, 1, 1]));
        std::env::remove_var("DNS_SERVER");
    }
}
