//! 容器镜像仓库客户端（Docker Registry v2）

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::env::constants::HTTP_TIMEOUT_SECS;
use crate::error::RemoteError;

use super::param_store::check_status;

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
                               application/vnd.oci.image.index.v1+json";

/// 镜像标签
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageTag {
    pub tag: String,
    pub digest: String,
}

/// 镜像仓库接口
#[async_trait]
pub trait ContainerRegistry: Send + Sync {
    async fn list_tags(&self, repository: &str) -> Result<Vec<ImageTag>, RemoteError>;
}

/// 仓库中标签对应的 digest
pub fn digest_for<'a>(tags: &'a [ImageTag], tag: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.tag == tag)
        .map(|t| t.digest.as_str())
}

/// HTTP 仓库客户端
#[derive(Clone)]
pub struct HttpContainerRegistry {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl HttpContainerRegistry {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token,
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn manifest_digest(&self, repository: &str, tag: &str) -> Result<Option<String>, RemoteError> {
        let url = format!("{}/v2/{}/manifests/{}", self.base_url, repository, tag);
        let response = self
            .authorize(self.client.head(&url))
            .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await?;
        let response = check_status("container registry", response).await?;
        Ok(response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }
}

#[async_trait]
impl ContainerRegistry for HttpContainerRegistry {
    async fn list_tags(&self, repository: &str) -> Result<Vec<ImageTag>, RemoteError> {
        let url = format!("{}/v2/{}/tags/list", self.base_url, repository);
        let response = self.authorize(self.client.get(&url)).send().await?;
        let list: TagList = check_status("container registry", response).await?.json().await?;

        let mut tags = Vec::new();
        for tag in list.tags.unwrap_or_default() {
            match self.manifest_digest(repository, &tag).await? {
                Some(digest) => tags.push(ImageTag { tag, digest }),
                None => warn!(repository, tag = %tag, "Registry returned no digest for tag"),
            }
        }
        Ok(tags)
    }
}

/// 内存镜像仓库
#[derive(Default)]
pub struct MemoryContainerRegistry {
    repositories: RwLock<BTreeMap<String, Vec<ImageTag>>>,
}

impl MemoryContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 推送（或移动）标签
    pub async fn push(&self, repository: &str, tag: &str, digest: &str) {
        let mut repositories = self.repositories.write().await;
        let tags = repositories.entry(repository.to_string()).or_default();
        tags.retain(|t| t.tag != tag);
        tags.push(ImageTag {
            tag: tag.to_string(),
            digest: digest.to_string(),
        });
    }
}

#[async_trait]
impl ContainerRegistry for MemoryContainerRegistry {
    async fn list_tags(&self, repository: &str) -> Result<Vec<ImageTag>, RemoteError> {
        Ok(self
            .repositories
            .read()
            .await
            .get(repository)
            .cloned()
            .unwrap_or_default())
    }
}
