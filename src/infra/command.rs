//! 命令执行器
//!
//! 提供统一的子进程执行接口，支持：
//! - 实时日志流式输出
//! - 可选超时
//! - 取消支持（进程注册到 ProcessRegistry，可被统一终止）
//! - stdout/stderr 分离

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::domain::{LogLine, PackageId};

use super::process_registry::ProcessRegistry;

/// 待执行的命令
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            work_dir: PathBuf::from("."),
            env: Vec::new(),
        }
    }

    /// 从 argv 形式构造（第一个元素为程序）
    pub fn from_argv(argv: &[String]) -> Result<Self, CommandError> {
        let (program, args) = argv.split_first().ok_or(CommandError::EmptyCommand)?;
        Ok(Self::new(program.clone(), args.iter().cloned()))
    }

    pub fn in_dir(mut self, work_dir: impl AsRef<Path>) -> Self {
        self.work_dir = work_dir.as_ref().to_path_buf();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// 命令执行器
pub struct CommandRunner;

/// 一次动作中共享的执行范围：归属包、进程注册表、日志通道、取消令牌与超时
#[derive(Clone)]
pub struct CommandScope<'a> {
    pub owner: &'a PackageId,
    pub processes: &'a ProcessRegistry,
    pub log_tx: Option<broadcast::Sender<LogLine>>,
    pub cancel: &'a CancellationToken,
    pub timeout: Option<Duration>,
}

impl CommandScope<'_> {
    pub async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, CommandError> {
        CommandRunner::run_with_streaming(
            spec,
            self.owner,
            self.processes,
            self.log_tx.clone(),
            self.cancel,
            self.timeout,
        )
        .await
    }
}

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 空命令
    EmptyCommand,
    /// 命令启动失败
    SpawnFailed(std::io::Error),
    /// 命令超时
    Timeout,
    /// 命令被取消
    Cancelled,
    /// 等待命令完成失败
    WaitFailed(std::io::Error),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::EmptyCommand => write!(f, "Command is empty"),
            CommandError::SpawnFailed(e) => write!(f, "Failed to spawn command: {}", e),
            CommandError::Timeout => write!(f, "Command timed out"),
            CommandError::Cancelled => write!(f, "Command was cancelled"),
            CommandError::WaitFailed(e) => write!(f, "Failed to wait for command: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed(e) | CommandError::WaitFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// 命令执行结果
#[derive(Debug)]
pub struct CommandResult {
    /// 退出状态
    pub status: ExitStatus,
    /// 是否因超时而终止
    pub timed_out: bool,
}

impl CommandResult {
    /// 只有退出码为 0 且未超时才算成功
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

impl CommandRunner {
    /// 执行命令并流式输出日志
    ///
    /// 子进程在运行期间注册在 `processes` 中归属 `owner`，
    /// 外部调用 `ProcessRegistry::cancel_all` 或取消 `cancel` 都会终止它。
    pub async fn run_with_streaming(
        spec: &CommandSpec,
        owner: &PackageId,
        processes: &ProcessRegistry,
        log_tx: Option<broadcast::Sender<LogLine>>,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, CommandError> {
        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled);
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.work_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(CommandError::SpawnFailed)?;
        let (process_id, token) = processes.register(owner, cancel).await;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // 启动 stdout 读取任务
        let stdout_task = tokio::spawn(forward_lines(stdout, "stdout", owner.clone(), log_tx.clone()));
        // 启动 stderr 读取任务
        let stderr_task = tokio::spawn(forward_lines(stderr, "stderr", owner.clone(), log_tx));

        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        // 等待命令完成，支持超时和取消
        let result = tokio::select! {
            _ = token.cancelled() => {
                warn!(package = %owner, command = %spec, "Command cancelled, killing process");
                let _ = child.kill().await;
                Err(CommandError::Cancelled)
            }
            _ = deadline => {
                error!(package = %owner, command = %spec, "Command timed out after {:?}", timeout);
                let _ = child.kill().await;
                // 等待进程实际终止
                match child.wait().await {
                    Ok(status) => Ok(CommandResult { status, timed_out: true }),
                    Err(e) => Err(CommandError::WaitFailed(e)),
                }
            }
            status = child.wait() => {
                status
                    .map(|status| CommandResult { status, timed_out: false })
                    .map_err(CommandError::WaitFailed)
            }
        };

        processes.unregister(owner, process_id).await;

        // 等待日志读取完成
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        result
    }
}

async fn forward_lines<R>(
    reader: Option<R>,
    stream: &'static str,
    owner: PackageId,
    log_tx: Option<broadcast::Sender<LogLine>>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(package = %owner, stream, "{}", line);
        if let Some(ref tx) = log_tx {
            let _ = tx.send(LogLine::new(stream, line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> PackageId {
        PackageId::new("test", "pkg")
    }

    #[tokio::test]
    async fn test_run_success_streams_output() {
        let processes = ProcessRegistry::new();
        let (tx, mut rx) = broadcast::channel(16);
        let spec = CommandSpec::new("echo", ["hello"]).in_dir(std::env::temp_dir());

        let result = CommandRunner::run_with_streaming(
            &spec,
            &owner(),
            &processes,
            Some(tx),
            &CancellationToken::new(),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();

        assert!(result.success());
        assert_eq!(rx.recv().await.unwrap().content, "hello");
        assert_eq!(processes.count().await, 0);
    }

    #[tokio::test]
    async fn test_run_not_found() {
        let processes = ProcessRegistry::new();
        let spec = CommandSpec::new("nonexistent_command_12345", Vec::<String>::new());

        let result = CommandRunner::run_with_streaming(
            &spec,
            &owner(),
            &processes,
            None,
            &CancellationToken::new(),
            None,
        )
        .await;

        assert!(matches!(result, Err(CommandError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_cancel_all_kills_running_process() {
        let processes = std::sync::Arc::new(ProcessRegistry::new());
        let spec = CommandSpec::new("sleep", ["30"]).in_dir(std::env::temp_dir());

        let registry = processes.clone();
        let handle = tokio::spawn(async move {
            CommandRunner::run_with_streaming(
                &spec,
                &owner(),
                &registry,
                None,
                &CancellationToken::new(),
                None,
            )
            .await
        });

        // 等待进程注册
        for _ in 0..50 {
            if processes.count().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        processes.cancel_all().await;

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(CommandError::Cancelled)));
    }

    #[test]
    fn test_from_argv() {
        let spec = CommandSpec::from_argv(&["make".to_string(), "build".to_string()]).unwrap();
        assert_eq!(spec.program, "make");
        assert_eq!(spec.to_string(), "make build");
        assert!(matches!(CommandSpec::from_argv(&[]), Err(CommandError::EmptyCommand)));
    }
}
