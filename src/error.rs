//! 统一错误处理
//!
//! - `RemoteError`: 远程协作方（参数存储、KMS、镜像仓库）调用失败
//! - `FleetError`: 库入口返回的错误，附带进程退出码

use std::path::PathBuf;
use thiserror::Error;

use crate::config::env::constants::{
    EXIT_CONFIG_ERROR, EXIT_PRECONDITION_FAILED, EXIT_RUN_FAILED,
};
use crate::infra::command::CommandError;

/// 远程调用错误
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Remote value unavailable: {0}")]
    Unavailable(String),
}

/// 编排器错误
#[derive(Debug, Error)]
pub enum FleetError {
    /// 缺少必需的环境/身份信息，进程以专用退出码结束
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to read manifest {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("Unknown package: {0}")]
    UnknownPackage(String),

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FleetError {
    /// 进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            FleetError::Precondition(_) => EXIT_PRECONDITION_FAILED,
            FleetError::Config(_)
            | FleetError::ManifestRead { .. }
            | FleetError::Manifest(_)
            | FleetError::UnknownPackage(_)
            | FleetError::DependencyCycle(_) => EXIT_CONFIG_ERROR,
            _ => EXIT_RUN_FAILED,
        }
    }
}

/// 便捷类型别名
pub type FleetResult<T> = Result<T, FleetError>;
