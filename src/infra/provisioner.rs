//! 基础设施工具调用
//!
//! 以子进程方式执行 `tool [args] <verb> <stack> -c key=value ...`，只看退出码

use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::manifest::StackDecl;
use crate::config::ProvisionerConfig;

use super::command::{CommandError, CommandScope, CommandSpec};

/// 工具动词
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackVerb {
    Deploy,
    Destroy,
    Synth,
}

impl StackVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackVerb::Deploy => "deploy",
            StackVerb::Destroy => "destroy",
            StackVerb::Synth => "synth",
        }
    }
}

/// 基础设施工具
#[derive(Clone, Debug)]
pub struct Provisioner {
    config: ProvisionerConfig,
    work_dir: PathBuf,
}

impl Provisioner {
    pub fn new(config: ProvisionerConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            work_dir: work_dir.into(),
        }
    }

    /// 构造某个动词的命令
    pub fn command(&self, verb: StackVerb, stack: &StackDecl) -> CommandSpec {
        let mut args = self.config.args.clone();
        args.push(verb.as_str().to_string());
        args.push(stack.name.clone());
        for (key, value) in &stack.context {
            args.push("-c".to_string());
            args.push(format!("{}={}", key, value));
        }
        // 非交互执行
        match verb {
            StackVerb::Deploy => {
                args.push("--require-approval".to_string());
                args.push("never".to_string());
            }
            StackVerb::Destroy => args.push("--force".to_string()),
            StackVerb::Synth => {}
        }
        CommandSpec::new(self.config.tool.clone(), args).in_dir(&self.work_dir)
    }

    /// 执行动词，返回是否成功（退出码为 0）
    pub async fn run(
        &self,
        verb: StackVerb,
        stack: &StackDecl,
        scope: &CommandScope<'_>,
    ) -> Result<bool, CommandError> {
        let spec = self.command(verb, stack);
        info!(package = %scope.owner, stack = %stack.name, verb = verb.as_str(), "Running provisioning tool");
        let result = scope.run(&spec).await?;
        if !result.success() {
            warn!(
                package = %scope.owner,
                stack = %stack.name,
                verb = verb.as_str(),
                exit_code = result.code(),
                "Provisioning tool failed"
            );
        }
        Ok(result.success())
    }

    /// 销毁堆栈；失败时执行补偿删除命令
    pub async fn destroy_with_compensation(
        &self,
        stack: &StackDecl,
        scope: &CommandScope<'_>,
    ) -> Result<bool, CommandError> {
        if self.run(StackVerb::Destroy, stack, scope).await? {
            return Ok(true);
        }

        let Some(template) = &self.config.delete_command else {
            return Ok(false);
        };
        let argv: Vec<String> = template
            .iter()
            .map(|word| word.replace("{stack}", &stack.name))
            .collect();
        let spec = CommandSpec::from_argv(&argv)?.in_dir(&self.work_dir);

        warn!(package = %scope.owner, stack = %stack.name, command = %spec, "Issuing compensating stack deletion");
        let result = scope.run(&spec).await?;
        Ok(result.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PackageId;
    use crate::infra::ProcessRegistry;
    use std::collections::BTreeMap;
    use tokio_util::sync::CancellationToken;

    fn stack() -> StackDecl {
        StackDecl {
            name: "api-stack".to_string(),
            context: BTreeMap::from([("env".to_string(), "dev".to_string())]),
        }
    }

    fn config(tool: &str, delete: Option<&str>) -> ProvisionerConfig {
        ProvisionerConfig {
            tool: tool.to_string(),
            args: Vec::new(),
            delete_command: delete.map(|d| d.split_whitespace().map(str::to_string).collect()),
        }
    }

    #[test]
    fn test_command_layout() {
        let provisioner = Provisioner::new(config("cdk", None), "/tmp");
        let spec = provisioner.command(StackVerb::Synth, &stack());
        assert_eq!(spec.to_string(), "cdk synth api-stack -c env=dev");

        let spec = provisioner.command(StackVerb::Deploy, &stack());
        assert_eq!(spec.to_string(), "cdk deploy api-stack -c env=dev --require-approval never");

        let spec = provisioner.command(StackVerb::Destroy, &stack());
        assert_eq!(spec.to_string(), "cdk destroy api-stack -c env=dev --force");
    }

    #[tokio::test]
    async fn test_compensation_runs_after_failed_destroy() {
        let owner = PackageId::new("dev", "api");
        let processes = ProcessRegistry::new();
        let cancel = CancellationToken::new();
        let scope = CommandScope {
            owner: &owner,
            processes: &processes,
            log_tx: None,
            cancel: &cancel,
            timeout: None,
        };

        let failing = Provisioner::new(config("false", None), std::env::temp_dir());
        assert!(!failing.destroy_with_compensation(&stack(), &scope).await.unwrap());

        let compensated = Provisioner::new(config("false", Some("echo {stack}")), std::env::temp_dir());
        assert!(compensated.destroy_with_compensation(&stack(), &scope).await.unwrap());
    }
}
