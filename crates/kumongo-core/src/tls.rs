//! TLS/SSL 加密支持模块
//!
//! 本模块实现 KuMongo 客户端的 TLS 功能:
//! - 信任锚加载 (webpki 内置根证书或 CA 文件覆盖)
//! - 客户端证书/私钥 (双向认证)
//! - 对端验证开关 (默认开启)
//! - 协议版本选择 (自动 / TLS 1.2 / TLS 1.3)

#[cfg(feature = "tls")]
use crate::connection::{TlsOptions, TlsProtocol};
#[cfg(feature = "tls")]
use kumongo_common::{MongoError, MongoResult};
#[cfg(feature = "tls")]
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
#[cfg(feature = "tls")]
use rustls::{ClientConfig, RootCertStore};
#[cfg(feature = "tls")]
use rustls_pemfile::{certs, private_key};
#[cfg(feature = "tls")]
use std::fs::File;
#[cfg(feature = "tls")]
use std::io::BufReader;
#[cfg(feature = "tls")]
use std::path::Path;
#[cfg(feature = "tls")]
use std::sync::Arc;
#[cfg(feature = "tls")]
use tracing::{debug, warn};

/// 构建客户端 TLS 配置
///
/// # Arguments
/// * `options` - CA/证书/私钥路径、对端验证开关和协议版本
#[cfg(feature = "tls")]
pub fn build_client_config(options: &TlsOptions) -> MongoResult<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    match &options.ca_file {
        Some(path) => {
            for cert in load_certs(path)? {
                roots.add(cert).map_err(|e| {
                    MongoError::Config(format!("Failed to add CA certificate: {}", e))
                })?;
            }
            debug!("Loaded trust anchors from {}", path.display());
        }
        None => {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
    }

    let builder = match options.protocol {
        TlsProtocol::Auto => ClientConfig::builder(),
        TlsProtocol::Tls12 => {
            ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS12])
        }
        TlsProtocol::Tls13 => {
            ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        }
    };
    let builder = builder.with_root_certificates(roots);

    let mut config = match (&options.cert_file, &options.key_file) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(cert_path)?;
            let key = load_private_key(key_path)?;
            builder.with_client_auth_cert(certs, key).map_err(|e| {
                MongoError::Config(format!("Failed to load client certificate: {}", e))
            })?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(MongoError::Config(
                "Client cert and key must be provided together".to_string(),
            ))
        }
    };

    if !options.verify_peer {
        warn!("TLS peer verification disabled");
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerification::new()));
    }

    Ok(Arc::new(config))
}

#[cfg(feature = "tls")]
fn load_certs(path: &Path) -> MongoResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| MongoError::Config(format!("Failed to open certificate file: {}", e)))?;
    let mut reader = BufReader::new(file);

    certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MongoError::Config(format!("Failed to parse certificates: {}", e)))
}

#[cfg(feature = "tls")]
fn load_private_key(path: &Path) -> MongoResult<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| MongoError::Config(format!("Failed to open private key file: {}", e)))?;
    let mut reader = BufReader::new(file);

    private_key(&mut reader)
        .map_err(|e| MongoError::Config(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| MongoError::Config("No private key found in file".to_string()))
}

/// 跳过对端验证的证书校验器
#[cfg(feature = "tls")]
#[derive(Debug)]
struct NoVerification {
    provider: rustls::crypto::CryptoProvider,
}

#[cfg(feature = "tls")]
impl NoVerification {
    fn new() -> Self {
        Self {
            provider: rustls::crypto::ring::default_provider(),
        }
    }
}

#[cfg(feature = "tls")]
impl rustls::client::danger::ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(all(feature = "tls", test))]
mod tests {
    use super::*;
    use crate::connection::TlsOptions;

    #[test]
    fn test_default_config_builds() {
        let config = build_client_config(&TlsOptions::default()).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn test_no_verify_config_builds() {
        let options = TlsOptions {
            verify_peer: false,
            ..TlsOptions::default()
        };
        assert!(build_client_config(&options).is_ok());
    }

    #[test]
    fn test_cert_without_key_rejected() {
        let options = TlsOptions {
            cert_file: Some("client.pem".into()),
            ..TlsOptions::default()
        };
        assert!(build_client_config(&options).is_err());
    }
}
