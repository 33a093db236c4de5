//! 状态相关领域模型
//!
//! 区分两类状态：
//! - `ProcessStatus`: 本次运行的进度（run-scoped）
//! - `EnvironmentStatus`: 目标环境的漂移状态（与本次运行无关）

use serde::{Deserialize, Serialize};
use std::fmt;

/// 运行模式
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Deploy,
    Destroy,
}

impl RunMode {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Deploy => "deploy",
            RunMode::Destroy => "destroy",
        }
    }

    /// 该模式下视为“已收敛”的环境状态
    pub fn target(&self) -> EnvironmentStatus {
        match self {
            RunMode::Deploy => EnvironmentStatus::UpToDate,
            RunMode::Destroy => EnvironmentStatus::NotDeployed,
        }
    }

    /// 由环境状态推导进程状态
    ///
    /// DEPLOY: `UP_TO_DATE` -> `COMPLETED`，否则 `PROCESSING`；DESTROY 对称使用 `NOT_DEPLOYED`
    pub fn process_status_for(&self, status: EnvironmentStatus) -> ProcessStatus {
        if status == self.target() {
            ProcessStatus::Completed
        } else {
            ProcessStatus::Processing
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 进程状态（本次运行）
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Initializing,
    StatusChk,
    Ready,
    HasPrereqs,
    Hashing,
    Bump,
    Building,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Initializing => "INITIALIZING",
            ProcessStatus::StatusChk => "STATUS_CHK",
            ProcessStatus::Ready => "READY",
            ProcessStatus::HasPrereqs => "HAS_PREREQS",
            ProcessStatus::Hashing => "HASHING",
            ProcessStatus::Bump => "BUMP",
            ProcessStatus::Building => "BUILDING",
            ProcessStatus::Processing => "PROCESSING",
            ProcessStatus::Completed => "COMPLETED",
            ProcessStatus::Failed => "FAILED",
            ProcessStatus::Cancelled => "CANCELLED",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Completed | ProcessStatus::Failed | ProcessStatus::Cancelled
        )
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 环境状态（漂移）
///
/// 每次检查都从头计算，不是严格的状态机
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvironmentStatus {
    None,
    Initializing,
    NotDeployed,
    NeedsUpdate,
    NeedsFix,
    Incomplete,
    UpToDate,
}

impl EnvironmentStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentStatus::None => "NONE",
            EnvironmentStatus::Initializing => "INITIALIZING",
            EnvironmentStatus::NotDeployed => "NOT_DEPLOYED",
            EnvironmentStatus::NeedsUpdate => "NEEDS_UPDATE",
            EnvironmentStatus::NeedsFix => "NEEDS_FIX",
            EnvironmentStatus::Incomplete => "INCOMPLETE",
            EnvironmentStatus::UpToDate => "UP_TO_DATE",
        }
    }
}

impl fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_status_is_terminal() {
        assert!(ProcessStatus::Completed.is_terminal());
        assert!(ProcessStatus::Failed.is_terminal());
        assert!(ProcessStatus::Cancelled.is_terminal());
        assert!(!ProcessStatus::HasPrereqs.is_terminal());
        assert!(!ProcessStatus::Processing.is_terminal());
    }

    #[test]
    fn test_process_status_for_mode() {
        assert_eq!(
            RunMode::Deploy.process_status_for(EnvironmentStatus::UpToDate),
            ProcessStatus::Completed
        );
        assert_eq!(
            RunMode::Deploy.process_status_for(EnvironmentStatus::NotDeployed),
            ProcessStatus::Processing
        );
        assert_eq!(
            RunMode::Destroy.process_status_for(EnvironmentStatus::NotDeployed),
            ProcessStatus::Completed
        );
        assert_eq!(
            RunMode::Destroy.process_status_for(EnvironmentStatus::UpToDate),
            ProcessStatus::Processing
        );
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ProcessStatus::HasPrereqs).unwrap();
        assert_eq!(json, "\"HAS_PREREQS\"");
        let json = serde_json::to_string(&EnvironmentStatus::UpToDate).unwrap();
        assert_eq!(json, "\"UP_TO_DATE\"");
    }
}
