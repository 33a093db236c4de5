//! 运行事件
//!
//! 子进程输出行与状态变更事件

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::package::PackageId;
use super::status::{EnvironmentStatus, ProcessStatus};

/// 日志行
#[derive(Clone, Debug, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: String, // stdout | stderr
    pub content: String,
}

impl LogLine {
    /// 创建新日志行
    pub fn new(stream: &str, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: stream.to_string(),
            content: content.into(),
        }
    }

    /// 创建 stdout 日志行
    pub fn stdout(content: impl Into<String>) -> Self {
        Self::new("stdout", content)
    }

    /// 创建 stderr 日志行
    pub fn stderr(content: impl Into<String>) -> Self {
        Self::new("stderr", content)
    }
}

/// 状态变更事件
#[derive(Clone, Debug, Serialize)]
pub struct StatusEvent {
    pub timestamp: DateTime<Utc>,
    pub package: PackageId,
    pub process: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentStatus>,
}

impl StatusEvent {
    pub fn process(package: PackageId, process: ProcessStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            package,
            process,
            environment: None,
        }
    }

    pub fn with_environment(mut self, environment: EnvironmentStatus) -> Self {
        self.environment = Some(environment);
        self
    }
}
