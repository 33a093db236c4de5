//! 模块部署记录
//!
//! 以 JSON 保存在参数存储的 `{prefix}/state/{module}` 下

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::variable::VarType;
use crate::error::RemoteError;
use crate::infra::ParameterStore;

/// 记录状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Deployed,
    InProgress,
    Failed,
}

/// 部署记录
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub status: RecordStatus,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_hash: Option<String>,
    pub deployed_at: DateTime<Utc>,
    pub deployed_by: String,
}

impl DeploymentRecord {
    pub fn new(status: RecordStatus, version: impl Into<String>, deployed_by: impl Into<String>) -> Self {
        Self {
            status,
            version: version.into(),
            image_digest: None,
            artifact_hash: None,
            deployed_at: Utc::now(),
            deployed_by: deployed_by.into(),
        }
    }

    pub fn with_image_digest(mut self, digest: Option<String>) -> Self {
        self.image_digest = digest;
        self
    }

    pub fn with_artifact_hash(mut self, hash: Option<String>) -> Self {
        self.artifact_hash = hash;
        self
    }

    /// 读取记录，不存在返回 None
    pub async fn load(store: &dyn ParameterStore, path: &str) -> Result<Option<Self>, RemoteError> {
        let Some(parameter) = store.get(path).await? else {
            return Ok(None);
        };
        serde_json::from_str(&parameter.value)
            .map(Some)
            .map_err(|source| RemoteError::Decode {
                what: path.to_string(),
                source,
            })
    }

    pub async fn store(&self, store: &dyn ParameterStore, path: &str) -> Result<(), RemoteError> {
        let value = serde_json::to_string(self).map_err(|source| RemoteError::Decode {
            what: path.to_string(),
            source,
        })?;
        store.put(path, &value, VarType::String).await
    }
}
