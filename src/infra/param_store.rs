//! 远程参数存储
//!
//! 提供两种读取：
//! - `get_by_path`: 当前存储的值（已推送）
//! - `get_materialized_by_path`: 当前生效配置版本中的值（已生效）

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::env::constants::HTTP_TIMEOUT_SECS;
use crate::domain::variable::{Namespace, VarType};
use crate::error::RemoteError;

/// 存储中的单个参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredParameter {
    pub path: String,
    pub value: String,
    #[serde(rename = "type", default)]
    pub var_type: VarType,
}

impl StoredParameter {
    pub fn new(path: impl Into<String>, value: impl Into<String>, var_type: VarType) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
            var_type,
        }
    }
}

/// 参数存储接口
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// 读取单个参数，不存在返回 None
    async fn get(&self, path: &str) -> Result<Option<StoredParameter>, RemoteError>;

    /// 读取前缀下所有已存储的参数
    async fn get_by_path(&self, prefix: &str) -> Result<Vec<StoredParameter>, RemoteError>;

    /// 读取前缀下当前生效的参数
    async fn get_materialized_by_path(
        &self,
        prefix: &str,
    ) -> Result<Vec<StoredParameter>, RemoteError>;

    async fn put(&self, path: &str, value: &str, var_type: VarType) -> Result<(), RemoteError>;

    async fn delete(&self, paths: &[String]) -> Result<(), RemoteError>;

    /// 以前缀下当前存储的参数生成新的生效版本
    async fn materialize(&self, prefix: &str) -> Result<(), RemoteError>;
}

/// HTTP 参数存储客户端
#[derive(Clone)]
pub struct HttpParameterStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ParameterList {
    #[serde(default)]
    parameters: Vec<StoredParameter>,
}

impl HttpParameterStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .pool_max_idle_per_host(5)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token,
        })
    }

    fn request(&self, method: reqwest::Method, route: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/v1/{}", self.base_url, route));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn list(&self, route: &str, prefix: &str) -> Result<Vec<StoredParameter>, RemoteError> {
        let response = self
            .request(reqwest::Method::GET, route)
            .query(&[("prefix", prefix), ("recursive", "true")])
            .send()
            .await?;
        let list: ParameterList = check_status("parameter store", response).await?.json().await?;
        debug!(prefix, count = list.parameters.len(), route, "Listed parameters");
        Ok(list.parameters)
    }
}

/// 非 2xx 响应转换为错误
pub(crate) async fn check_status(
    service: &'static str,
    response: Response,
) -> Result<Response, RemoteError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        service,
        status,
        body,
    })
}

#[async_trait]
impl ParameterStore for HttpParameterStore {
    async fn get(&self, path: &str) -> Result<Option<StoredParameter>, RemoteError> {
        let response = self
            .request(reqwest::Method::GET, "parameters")
            .query(&[("path", path)])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parameter = check_status("parameter store", response).await?.json().await?;
        Ok(Some(parameter))
    }

    async fn get_by_path(&self, prefix: &str) -> Result<Vec<StoredParameter>, RemoteError> {
        self.list("parameters", prefix).await
    }

    async fn get_materialized_by_path(
        &self,
        prefix: &str,
    ) -> Result<Vec<StoredParameter>, RemoteError> {
        self.list("materialized", prefix).await
    }

    async fn put(&self, path: &str, value: &str, var_type: VarType) -> Result<(), RemoteError> {
        let response = self
            .request(reqwest::Method::PUT, "parameters")
            .json(&StoredParameter::new(path, value, var_type))
            .send()
            .await?;
        check_status("parameter store", response).await?;
        Ok(())
    }

    async fn delete(&self, paths: &[String]) -> Result<(), RemoteError> {
        if paths.is_empty() {
            return Ok(());
        }
        let response = self
            .request(reqwest::Method::POST, "parameters/delete")
            .json(&serde_json::json!({ "paths": paths }))
            .send()
            .await?;
        check_status("parameter store", response).await?;
        Ok(())
    }

    async fn materialize(&self, prefix: &str) -> Result<(), RemoteError> {
        let response = self
            .request(reqwest::Method::POST, "materialize")
            .json(&serde_json::json!({ "prefix": prefix }))
            .send()
            .await?;
        check_status("parameter store", response).await?;
        Ok(())
    }
}

/// 内存参数存储
///
/// 生效版本按前缀保存快照；同名变量按命名空间优先级折叠为一条
#[derive(Default)]
pub struct MemoryParameterStore {
    stored: RwLock<BTreeMap<String, StoredParameter>>,
    /// 前缀 -> 生效快照
    materialized: RwLock<BTreeMap<String, Vec<StoredParameter>>>,
    unreachable: AtomicBool,
}

impl MemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可达
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> Result<(), RemoteError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("parameter store unreachable".into()));
        }
        Ok(())
    }

    /// 直接写入生效快照（用于构造漂移）
    pub async fn set_materialized(&self, prefix: &str, records: Vec<StoredParameter>) {
        self.materialized
            .write()
            .await
            .insert(prefix.to_string(), records);
    }
}

/// 折叠 `{prefix}/{namespace}/{name}` 形式的路径，按命名空间优先级保留一条
fn collapse_by_name(prefix: &str, records: Vec<StoredParameter>) -> Vec<StoredParameter> {
    let mut winners: BTreeMap<String, (usize, StoredParameter)> = BTreeMap::new();
    for record in records {
        let rest = record
            .path
            .strip_prefix(prefix)
            .unwrap_or(&record.path)
            .trim_start_matches('/');
        let (rank, name) = match rest.split_once('/') {
            Some((segment, name)) => match Namespace::from_segment(segment) {
                Some(ns) => (
                    Namespace::PRECEDENCE
                        .iter()
                        .position(|p| *p == ns)
                        .unwrap_or(usize::MAX),
                    name.to_string(),
                ),
                None => (usize::MAX, rest.to_string()),
            },
            None => (usize::MAX, rest.to_string()),
        };
        match winners.get(&name) {
            Some((best, _)) if *best <= rank => {}
            _ => {
                winners.insert(name, (rank, record));
            }
        }
    }
    winners.into_values().map(|(_, record)| record).collect()
}

#[async_trait]
impl ParameterStore for MemoryParameterStore {
    async fn get(&self, path: &str) -> Result<Option<StoredParameter>, RemoteError> {
        self.ensure_reachable()?;
        Ok(self.stored.read().await.get(path).cloned())
    }

    async fn get_by_path(&self, prefix: &str) -> Result<Vec<StoredParameter>, RemoteError> {
        self.ensure_reachable()?;
        let stored = self.stored.read().await;
        Ok(stored
            .values()
            .filter(|p| p.path.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get_materialized_by_path(
        &self,
        prefix: &str,
    ) -> Result<Vec<StoredParameter>, RemoteError> {
        self.ensure_reachable()?;
        let materialized = self.materialized.read().await;
        Ok(materialized
            .values()
            .flatten()
            .filter(|p| p.path.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn put(&self, path: &str, value: &str, var_type: VarType) -> Result<(), RemoteError> {
        self.ensure_reachable()?;
        self.stored
            .write()
            .await
            .insert(path.to_string(), StoredParameter::new(path, value, var_type));
        Ok(())
    }

    async fn delete(&self, paths: &[String]) -> Result<(), RemoteError> {
        self.ensure_reachable()?;
        let mut stored = self.stored.write().await;
        for path in paths {
            stored.remove(path);
        }
        Ok(())
    }

    async fn materialize(&self, prefix: &str) -> Result<(), RemoteError> {
        self.ensure_reachable()?;
        let records = self.get_by_path(prefix).await?;
        let snapshot = collapse_by_name(prefix, records);
        let mut materialized = self.materialized.write().await;
        if snapshot.is_empty() {
            materialized.remove(prefix);
        } else {
            materialized.insert(prefix.to_string(), snapshot);
        }
        Ok(())
    }
}
