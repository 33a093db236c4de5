//! 动作上下文
//!
//! 一次包动作所需的日志通道、进程注册表、取消令牌与超时

use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::domain::{LogLine, PackageId, ProcessStatus};
use crate::infra::{CommandScope, ProcessRegistry};
use crate::services::scheduler::ActionContext;

/// 包动作执行上下文
pub struct DeployContext<'a> {
    pub package: PackageId,
    pub action: &'a ActionContext,
    /// 日志发送通道
    pub log_tx: broadcast::Sender<LogLine>,
    pub processes: &'a ProcessRegistry,
    pub timeout: Option<Duration>,
    pub work_dir: &'a Path,
    /// 写入部署记录的身份
    pub identity: &'a str,
}

impl DeployContext<'_> {
    /// 发送日志
    pub fn log(&self, stream: &str, content: impl Into<String>) {
        let _ = self.log_tx.send(LogLine::new(stream, content));
    }

    /// 发送 stdout 日志
    pub fn log_stdout(&self, content: impl Into<String>) {
        self.log("stdout", content);
    }

    /// 发送 stderr 日志
    pub fn log_stderr(&self, content: impl Into<String>) {
        self.log("stderr", content);
    }

    /// 通过调度器更新进程状态
    pub fn set_status(&self, status: ProcessStatus) {
        self.action.set_status(status);
    }

    /// 检查是否被取消
    pub fn is_cancelled(&self) -> bool {
        self.action.is_cancelled()
    }

    /// 子进程执行范围
    pub fn scope(&self) -> CommandScope<'_> {
        CommandScope {
            owner: &self.package,
            processes: self.processes,
            log_tx: Some(self.log_tx.clone()),
            cancel: &self.action.cancel,
            timeout: self.timeout,
        }
    }
}
