//! 密钥管理（KMS）客户端
//!
//! 密文以 `kms:` 前缀标记；解密失败由调用方按“值未知”处理

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::env::constants::HTTP_TIMEOUT_SECS;
use crate::error::RemoteError;

use super::param_store::check_status;

/// 密文前缀
pub const CIPHERTEXT_PREFIX: &str = "kms:";

/// 值是否为密文
pub fn is_ciphertext(value: &str) -> bool {
    value.starts_with(CIPHERTEXT_PREFIX)
}

/// 密钥管理接口
#[async_trait]
pub trait KeyManagement: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> Result<String, RemoteError>;
    async fn decrypt(&self, ciphertext: &str) -> Result<String, RemoteError>;
}

/// HTTP KMS 客户端
#[derive(Clone)]
pub struct HttpKeyManagement {
    client: Client,
    base_url: String,
    key_id: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct CiphertextBody {
    ciphertext: String,
}

#[derive(Deserialize)]
struct PlaintextBody {
    plaintext: String,
}

impl HttpKeyManagement {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            key_id: key_id.into(),
            token,
        })
    }

    async fn post(
        &self,
        route: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, RemoteError> {
        let mut request = self
            .client
            .post(format!("{}/v1/{}", self.base_url, route))
            .json(&body);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        check_status("kms", request.send().await?).await
    }
}

#[async_trait]
impl KeyManagement for HttpKeyManagement {
    async fn encrypt(&self, plaintext: &str) -> Result<String, RemoteError> {
        let response = self
            .post(
                "encrypt",
                serde_json::json!({ "key_id": self.key_id, "plaintext": plaintext }),
            )
            .await?;
        let body: CiphertextBody = response.json().await?;
        if is_ciphertext(&body.ciphertext) {
            Ok(body.ciphertext)
        } else {
            Ok(format!("{}{}", CIPHERTEXT_PREFIX, body.ciphertext))
        }
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<String, RemoteError> {
        let blob = ciphertext.strip_prefix(CIPHERTEXT_PREFIX).unwrap_or(ciphertext);
        let response = self
            .post("decrypt", serde_json::json!({ "ciphertext": blob }))
            .await?;
        let body: PlaintextBody = response.json().await?;
        Ok(body.plaintext)
    }
}

/// 内存 KMS
///
/// 密文为 `kms:` + 明文 SHA-256，明文保存在表中
#[derive(Default)]
pub struct MemoryKeyManagement {
    keys: RwLock<HashMap<String, String>>,
    unreachable: AtomicBool,
}

impl MemoryKeyManagement {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟 KMS 不可达
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyManagement for MemoryKeyManagement {
    async fn encrypt(&self, plaintext: &str) -> Result<String, RemoteError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("kms unreachable".into()));
        }
        let digest = format!("{:x}", Sha256::digest(plaintext.as_bytes()));
        let ciphertext = format!("{}{}", CIPHERTEXT_PREFIX, digest);
        self.keys
            .write()
            .await
            .insert(ciphertext.clone(), plaintext.to_string());
        Ok(ciphertext)
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<String, RemoteError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("kms unreachable".into()));
        }
        self.keys
            .read()
            .await
            .get(ciphertext)
            .cloned()
            .ok_or_else(|| RemoteError::Unavailable(format!("unknown ciphertext {}", ciphertext)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_kms_round_trip() {
        let kms = MemoryKeyManagement::new();
        let ciphertext = kms.encrypt("s3cret").await.unwrap();

        assert!(is_ciphertext(&ciphertext));
        assert_ne!(ciphertext, "s3cret");
        assert_eq!(ciphertext.len(), CIPHERTEXT_PREFIX.len() + 64);
        assert!(ciphertext[CIPHERTEXT_PREFIX.len()..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(kms.decrypt(&ciphertext).await.unwrap(), "s3cret");
    }

    #[tokio::test]
    async fn test_unknown_ciphertext_fails() {
        let kms = MemoryKeyManagement::new();
        assert!(kms.decrypt("kms:deadbeef").await.is_err());
        assert!(!is_ciphertext("plain"));
    }
}
