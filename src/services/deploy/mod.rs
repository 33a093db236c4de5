//! 包动作模块
//!
//! 部署按“参数 -> 构建产物 -> 堆栈 -> 可执行文件”推进，销毁按相反顺序。
//! 两者结束后都重新检查包状态，未到达目标状态即为 FAILED。

pub mod context;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::domain::{EnvironmentStatus, ProcessStatus, RunMode, VarType};
use crate::error::RemoteError;
use crate::infra::command::CommandError;
use crate::infra::kms::is_ciphertext;
use crate::infra::{CommandSpec, ProcessRegistry, Provisioner, Remotes, StackVerb};
use crate::services::modules::{
    file_sha256, BuildArtifactModule, DeploymentRecord, ExecutableModule, InfraStackModule, Module,
    ModuleKind, ParametersModule, RecordStatus,
};
use crate::services::package::Package;
use crate::services::scheduler::{ActionContext, PackageExecutor};
use crate::state::StatusHub;

pub use context::DeployContext;

/// 动作错误
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Action cancelled")]
    Cancelled,

    #[error("{0} failed")]
    StepFailed(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ActionError {
    fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ActionError::Cancelled | ActionError::Command(CommandError::Cancelled)
        )
    }
}

type ActionResult = Result<(), ActionError>;

/// 执行器设置
#[derive(Clone, Debug)]
pub struct ExecutorSettings {
    pub work_dir: PathBuf,
    pub identity: String,
    pub command_timeout: Option<Duration>,
}

/// 真实的部署/销毁执行器
pub struct FleetExecutor {
    remotes: Remotes,
    provisioner: Provisioner,
    processes: Arc<ProcessRegistry>,
    hub: Arc<StatusHub>,
    settings: ExecutorSettings,
}

impl FleetExecutor {
    pub fn new(
        remotes: Remotes,
        provisioner: Provisioner,
        processes: Arc<ProcessRegistry>,
        hub: Arc<StatusHub>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            remotes,
            provisioner,
            processes,
            hub,
            settings,
        }
    }

    async fn deploy(&self, package: &Package, ctx: &DeployContext<'_>) -> ActionResult {
        if let Some(module) = parameters(package) {
            checkpoint(ctx)?;
            self.push_parameters(module, ctx).await?;
        }
        if let Some(module) = build_artifact(package) {
            checkpoint(ctx)?;
            self.build_artifact(package, module, ctx).await?;
        }
        if let Some(module) = infra_stack(package) {
            checkpoint(ctx)?;
            self.deploy_stack(package, module, ctx).await?;
        }
        if let Some(module) = executable(package) {
            checkpoint(ctx)?;
            self.install_executable(module, ctx).await?;
        }
        Ok(())
    }

    async fn destroy(&self, package: &Package, ctx: &DeployContext<'_>) -> ActionResult {
        if let Some(module) = executable(package) {
            checkpoint(ctx)?;
            self.remove_executable(module, ctx).await?;
        }
        if let Some(module) = build_artifact(package) {
            checkpoint(ctx)?;
            if module.anything_deployed() {
                ctx.set_status(ProcessStatus::Processing);
                self.remotes
                    .params
                    .delete(&[module.base.locator.clone()])
                    .await?;
                ctx.log_stdout(format!("Removed artifact record {}", module.base.locator));
            }
        }
        if let Some(module) = infra_stack(package) {
            checkpoint(ctx)?;
            self.destroy_stack(package, module, ctx).await?;
        }
        if let Some(module) = parameters(package) {
            checkpoint(ctx)?;
            self.remove_parameters(module, ctx).await?;
        }
        Ok(())
    }

    /// 推送差异变量并生成新的生效版本
    async fn push_parameters(&self, module: &ParametersModule, ctx: &DeployContext<'_>) -> ActionResult {
        if module.up_to_date() {
            ctx.log_stdout("Parameters are up to date");
            return Ok(());
        }
        let Some(report) = &module.report else {
            return Ok(());
        };

        ctx.set_status(ProcessStatus::Processing);
        let prefix = &module.base.locator;
        let params = self.remotes.params.as_ref();

        let to_push = report.needs_push();
        for key in &to_push {
            let Some(record) = module.local.get(key.namespace, &key.name) else {
                continue;
            };
            let value = if record.var_type == VarType::SecureString && !is_ciphertext(&record.value) {
                self.remotes.kms.encrypt(&record.value).await?
            } else {
                record.value.clone()
            };
            params
                .put(&record.store_path(prefix), &value, record.var_type)
                .await?;
        }

        let stale: Vec<String> = report
            .needs_delete()
            .iter()
            .map(|key| format!("{}/{}/{}", prefix, key.namespace, key.name))
            .collect();
        if !stale.is_empty() {
            params.delete(&stale).await?;
        }

        params.materialize(prefix).await?;
        ctx.log_stdout(format!(
            "Pushed {} variables, removed {}, materialized {}",
            to_push.len(),
            stale.len(),
            prefix
        ));
        info!(package = %ctx.package, pushed = to_push.len(), removed = stale.len(), "Parameters converged");
        Ok(())
    }

    async fn build_artifact(
        &self,
        package: &Package,
        module: &BuildArtifactModule,
        ctx: &DeployContext<'_>,
    ) -> ActionResult {
        if module.up_to_date() {
            ctx.log_stdout(format!("Artifact {} is up to date", module.decl.path.display()));
            return Ok(());
        }

        ctx.set_status(ProcessStatus::Building);
        if !module.decl.build.is_empty() {
            let dir = match &module.decl.work_dir {
                Some(dir) => ctx.work_dir.join(dir),
                None => ctx.work_dir.to_path_buf(),
            };
            let spec = CommandSpec::from_argv(&module.decl.build)?.in_dir(dir);
            run_step(ctx, &spec, "artifact build").await?;
        }

        checkpoint(ctx)?;
        ctx.set_status(ProcessStatus::Hashing);
        let path = module.artifact_path(ctx.work_dir);
        let hash = file_sha256(&path).await?.ok_or_else(|| {
            ActionError::StepFailed(format!("artifact {} lookup", path.display()))
        })?;

        DeploymentRecord::new(RecordStatus::Deployed, &package.version, ctx.identity)
            .with_artifact_hash(Some(hash.clone()))
            .store(self.remotes.params.as_ref(), &module.base.locator)
            .await?;
        ctx.log_stdout(format!("Artifact {} hashed {}", path.display(), hash));
        Ok(())
    }

    /// 合成并部署堆栈，前后写入部署记录
    async fn deploy_stack(
        &self,
        package: &Package,
        module: &InfraStackModule,
        ctx: &DeployContext<'_>,
    ) -> ActionResult {
        if module.up_to_date() {
            ctx.log_stdout(format!("Stack {} is up to date", module.stack.name));
            return Ok(());
        }

        ctx.set_status(ProcessStatus::Processing);
        let params = self.remotes.params.as_ref();
        let path = &module.base.locator;
        let record = |status| {
            DeploymentRecord::new(status, &package.version, ctx.identity)
                .with_image_digest(module.expected_digest.clone())
        };

        record(RecordStatus::InProgress).store(params, path).await?;

        let scope = ctx.scope();
        for verb in [StackVerb::Synth, StackVerb::Deploy] {
            checkpoint(ctx)?;
            ctx.log_stdout(format!(">>> {}", self.provisioner.command(verb, &module.stack)));
            match self.provisioner.run(verb, &module.stack, &scope).await {
                Ok(true) => {}
                Ok(false) => {
                    record(RecordStatus::Failed).store(params, path).await?;
                    return Err(ActionError::StepFailed(format!(
                        "stack {} {}",
                        module.stack.name,
                        verb.as_str()
                    )));
                }
                Err(CommandError::Cancelled) => return Err(ActionError::Cancelled),
                Err(e) => {
                    record(RecordStatus::Failed).store(params, path).await?;
                    return Err(e.into());
                }
            }
        }

        ctx.set_status(ProcessStatus::Bump);
        record(RecordStatus::Deployed).store(params, path).await?;
        info!(package = %ctx.package, stack = %module.stack.name, version = %package.version, "Stack deployed");
        Ok(())
    }

    async fn install_executable(&self, module: &ExecutableModule, ctx: &DeployContext<'_>) -> ActionResult {
        if module.up_to_date() {
            ctx.log_stdout(format!("Executable {} is up to date", module.decl.install_path.display()));
            return Ok(());
        }

        ctx.set_status(ProcessStatus::Processing);
        match &module.decl.install {
            Some(argv) => {
                let spec = CommandSpec::from_argv(argv)?.in_dir(ctx.work_dir);
                run_step(ctx, &spec, "executable install").await?;
            }
            None => {
                let source = module.source_path(ctx.work_dir);
                let target = module.install_path(ctx.work_dir);
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(&source, &target).await?;
                ctx.log_stdout(format!("Installed {} -> {}", source.display(), target.display()));
            }
        }
        Ok(())
    }

    async fn remove_executable(&self, module: &ExecutableModule, ctx: &DeployContext<'_>) -> ActionResult {
        if !module.anything_deployed() {
            return Ok(());
        }
        ctx.set_status(ProcessStatus::Processing);
        let target = module.install_path(ctx.work_dir);
        match tokio::fs::remove_file(&target).await {
            Ok(()) => ctx.log_stdout(format!("Removed {}", target.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// 销毁堆栈；工具失败时执行补偿删除
    async fn destroy_stack(
        &self,
        package: &Package,
        module: &InfraStackModule,
        ctx: &DeployContext<'_>,
    ) -> ActionResult {
        if !module.anything_deployed() {
            return Ok(());
        }

        ctx.set_status(ProcessStatus::Processing);
        let params = self.remotes.params.as_ref();
        let path = &module.base.locator;
        ctx.log_stdout(format!(
            ">>> {}",
            self.provisioner.command(StackVerb::Destroy, &module.stack)
        ));

        if !self
            .provisioner
            .destroy_with_compensation(&module.stack, &ctx.scope())
            .await?
        {
            let version = module
                .record
                .as_ref()
                .map_or_else(|| package.version.clone(), |r| r.version.clone());
            DeploymentRecord::new(RecordStatus::Failed, version, ctx.identity)
                .store(params, path)
                .await?;
            return Err(ActionError::StepFailed(format!("stack {} destroy", module.stack.name)));
        }

        params.delete(&[path.clone()]).await?;
        info!(package = %ctx.package, stack = %module.stack.name, "Stack destroyed");
        Ok(())
    }

    /// 删除所有已推送变量并重新生成生效版本
    async fn remove_parameters(&self, module: &ParametersModule, ctx: &DeployContext<'_>) -> ActionResult {
        if !module.anything_deployed() {
            return Ok(());
        }

        ctx.set_status(ProcessStatus::Processing);
        let prefix = &module.base.locator;
        let params = self.remotes.params.as_ref();
        let paths: Vec<String> = params
            .get_by_path(&format!("{}/", prefix))
            .await?
            .into_iter()
            .map(|p| p.path)
            .collect();
        if !paths.is_empty() {
            params.delete(&paths).await?;
        }
        params.materialize(prefix).await?;
        ctx.log_stdout(format!("Removed {} variables under {}", paths.len(), prefix));
        Ok(())
    }

    /// 后置条件：重新检查后必须到达本模式的目标状态
    async fn verify(&self, package: &mut Package, ctx: &DeployContext<'_>) -> ProcessStatus {
        let mode = ctx.action.mode;
        // 只有镜像的包没有可销毁的环境状态
        let forced = (mode == RunMode::Destroy
            && package
                .modules
                .iter()
                .all(|m| m.kind() == ModuleKind::ContainerImage))
        .then_some(EnvironmentStatus::NotDeployed);

        let status = package
            .finalize_status(mode, forced, &self.remotes, &self.settings.work_dir)
            .await;
        if status == ProcessStatus::Completed {
            ctx.log_stdout(format!("=== {} of {} COMPLETED ===", mode, package.id));
            return status;
        }

        for line in package.details() {
            ctx.log_stderr(line);
        }
        warn!(
            package = %package.id,
            mode = %mode,
            environment = %package.environment_status,
            real = %package.real_status,
            "Package did not reach its target status"
        );
        ProcessStatus::Failed
    }
}

#[async_trait]
impl PackageExecutor for FleetExecutor {
    async fn execute(&self, package: &mut Package, action: &ActionContext) -> ProcessStatus {
        let log_tx = self.hub.log_sender(&package.id).await;
        let ctx = DeployContext {
            package: package.id.clone(),
            action,
            log_tx,
            processes: &self.processes,
            timeout: self.settings.command_timeout,
            work_dir: &self.settings.work_dir,
            identity: &self.settings.identity,
        };

        info!(package = %package.id, mode = %action.mode, "Package action started");
        ctx.log_stdout(format!("=== Starting {} of {} ===", action.mode, package.id));

        // 以动作开始时的远程状态为准
        package.check_status(&self.remotes, &self.settings.work_dir).await;

        let result = match action.mode {
            RunMode::Deploy => self.deploy(package, &ctx).await,
            RunMode::Destroy => self.destroy(package, &ctx).await,
        };

        let status = match result {
            Ok(()) => self.verify(package, &ctx).await,
            Err(e) if e.is_cancellation() => {
                warn!(package = %package.id, "Package action cancelled");
                ctx.log_stderr("=== CANCELLED ===");
                ProcessStatus::Cancelled
            }
            Err(e) => {
                error!(package = %package.id, error = %e, "Package action failed");
                ctx.log_stderr(format!("=== FAILED: {} ===", e));
                ProcessStatus::Failed
            }
        };

        self.hub.finish(&package.id).await;
        status
    }
}

fn checkpoint(ctx: &DeployContext<'_>) -> ActionResult {
    if ctx.is_cancelled() {
        return Err(ActionError::Cancelled);
    }
    Ok(())
}

async fn run_step(ctx: &DeployContext<'_>, spec: &CommandSpec, step: &str) -> ActionResult {
    ctx.log_stdout(format!(">>> {}", spec));
    let result = ctx.scope().run(spec).await?;
    if result.success() {
        return Ok(());
    }
    ctx.log_stderr(format!("{} exited with code {}", step, result.code()));
    Err(ActionError::StepFailed(step.to_string()))
}

fn parameters(package: &Package) -> Option<&ParametersModule> {
    match package.module(ModuleKind::Parameters) {
        Some(Module::Parameters(m)) => Some(m),
        _ => None,
    }
}

fn infra_stack(package: &Package) -> Option<&InfraStackModule> {
    match package.module(ModuleKind::InfraStack) {
        Some(Module::InfraStack(m)) => Some(m),
        _ => None,
    }
}

fn build_artifact(package: &Package) -> Option<&BuildArtifactModule> {
    match package.module(ModuleKind::BuildArtifact) {
        Some(Module::BuildArtifact(m)) => Some(m),
        _ => None,
    }
}

fn executable(package: &Package) -> Option<&ExecutableModule> {
    match package.module(ModuleKind::Executable) {
        Some(Module::Executable(m)) => Some(m),
        _ => None,
    }
}
