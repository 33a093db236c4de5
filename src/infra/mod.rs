//! 基础设施模块
//!
//! 封装外部依赖（参数存储、KMS、镜像仓库、子进程执行等）

pub mod command;
pub mod container_registry;
pub mod kms;
pub mod param_store;
pub mod process_registry;
pub mod provisioner;

use std::sync::Arc;

pub use command::{CommandRunner, CommandScope, CommandSpec};
pub use container_registry::{ContainerRegistry, HttpContainerRegistry, MemoryContainerRegistry};
pub use kms::{HttpKeyManagement, KeyManagement, MemoryKeyManagement};
pub use param_store::{HttpParameterStore, MemoryParameterStore, ParameterStore};
pub use process_registry::ProcessRegistry;
pub use provisioner::{Provisioner, StackVerb};

use crate::config::RemoteConfig;
use crate::error::RemoteError;

/// 远程协作方集合
#[derive(Clone)]
pub struct Remotes {
    pub params: Arc<dyn ParameterStore>,
    pub kms: Arc<dyn KeyManagement>,
    pub registry: Arc<dyn ContainerRegistry>,
}

impl Remotes {
    /// 按配置创建 HTTP 客户端
    pub fn from_config(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let params_url = config
            .param_store_url
            .clone()
            .ok_or(RemoteError::NotConfigured("FLEET_PARAM_STORE_URL"))?;
        let kms_url = config
            .kms_url
            .clone()
            .ok_or(RemoteError::NotConfigured("FLEET_KMS_URL"))?;
        let key_id = config
            .kms_key_id
            .clone()
            .ok_or(RemoteError::NotConfigured("FLEET_KMS_KEY_ID"))?;
        let registry_url = config
            .registry_url
            .clone()
            .ok_or(RemoteError::NotConfigured("FLEET_REGISTRY_URL"))?;

        Ok(Self {
            params: Arc::new(HttpParameterStore::new(params_url, config.api_token.clone())?),
            kms: Arc::new(HttpKeyManagement::new(kms_url, key_id, config.api_token.clone())?),
            registry: Arc::new(HttpContainerRegistry::new(
                registry_url,
                config.registry_token.clone(),
            )?),
        })
    }

    /// 内存实现（测试与演练用）
    pub fn in_memory() -> (Self, InMemoryRemotes) {
        let handles = InMemoryRemotes {
            params: Arc::new(MemoryParameterStore::new()),
            kms: Arc::new(MemoryKeyManagement::new()),
            registry: Arc::new(MemoryContainerRegistry::new()),
        };
        let remotes = Self {
            params: handles.params.clone(),
            kms: handles.kms.clone(),
            registry: handles.registry.clone(),
        };
        (remotes, handles)
    }
}

/// 内存协作方的具体类型句柄
#[derive(Clone)]
pub struct InMemoryRemotes {
    pub params: Arc<MemoryParameterStore>,
    pub kms: Arc<MemoryKeyManagement>,
    pub registry: Arc<MemoryContainerRegistry>,
}
