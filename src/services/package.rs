//! 包：聚合模块得到进程状态与环境状态

use std::path::Path;
use tracing::{debug, info};

use crate::config::PackageDecl;
use crate::domain::{EnvironmentStatus, PackageHandle, PackageId, ProcessStatus, RunMode};
use crate::infra::Remotes;

use super::modules::{Module, ModuleKind, CheckContext, SharedFacts};

/// 包
#[derive(Debug)]
pub struct Package {
    pub handle: PackageHandle,
    pub id: PackageId,
    pub version: String,
    pub process_status: ProcessStatus,
    pub environment_status: EnvironmentStatus,
    /// 与 environment_status 相同，但存在 needs_fix 发现时降级为 NEEDS_FIX
    pub real_status: EnvironmentStatus,
    /// 按检查顺序排列
    pub modules: Vec<Module>,
    pub deploy_dependencies: Vec<PackageHandle>,
    pub destroy_dependencies: Vec<PackageHandle>,
    pub decl: PackageDecl,
}

impl Package {
    pub fn new(handle: PackageHandle, id: PackageId, decl: PackageDecl) -> Self {
        let modules = Module::from_decl(&id, &decl);
        Self {
            handle,
            version: decl.version.clone(),
            id,
            process_status: ProcessStatus::Initializing,
            environment_status: EnvironmentStatus::None,
            real_status: EnvironmentStatus::None,
            modules,
            deploy_dependencies: Vec::new(),
            destroy_dependencies: Vec::new(),
            decl,
        }
    }

    pub fn module(&self, kind: ModuleKind) -> Option<&Module> {
        self.modules.iter().find(|m| m.kind() == kind)
    }

    /// 所有模块都是最新
    pub fn up_to_date(&self) -> bool {
        self.modules.iter().all(Module::up_to_date)
    }

    /// 重置并按顺序检查所有模块，返回汇总后的环境状态
    pub async fn check_status(&mut self, remotes: &Remotes, work_dir: &Path) -> EnvironmentStatus {
        self.environment_status = EnvironmentStatus::Initializing;
        for module in &mut self.modules {
            module.reset();
        }

        let ctx = CheckContext {
            package: &self.id,
            remotes,
            work_dir,
        };
        let mut facts = SharedFacts::default();
        for module in &mut self.modules {
            module.check_status(&ctx, &mut facts).await;
        }

        let (environment, real) = self.rollup();
        self.environment_status = environment;
        self.real_status = real;
        debug!(package = %self.id, environment = %environment, real = %real, "Checked package status");
        environment
    }

    /// 汇总模块结论
    ///
    /// 全部最新 -> UP_TO_DATE；否则有未完成 -> INCOMPLETE；否则有任何已部署 -> NEEDS_UPDATE；
    /// 否则 NOT_DEPLOYED。存在 needs_fix 时第二个值降级为 NEEDS_FIX。
    pub fn rollup(&self) -> (EnvironmentStatus, EnvironmentStatus) {
        let environment = if self.up_to_date() {
            EnvironmentStatus::UpToDate
        } else if self
            .modules
            .iter()
            .any(|m| !m.findings().incomplete.is_empty())
        {
            EnvironmentStatus::Incomplete
        } else if self.modules.iter().any(Module::anything_deployed) {
            EnvironmentStatus::NeedsUpdate
        } else {
            EnvironmentStatus::NotDeployed
        };

        let needs_fix = self
            .modules
            .iter()
            .any(|m| !m.findings().needs_fix.is_empty());
        let real = if needs_fix {
            EnvironmentStatus::NeedsFix
        } else {
            environment
        };
        (environment, real)
    }

    /// 重新检查并按运行模式推导进程状态
    ///
    /// `forced` 覆盖汇总得到的环境状态。没有任何模块的包视为已处于该模式的目标状态。
    pub async fn finalize_status(
        &mut self,
        mode: RunMode,
        forced: Option<EnvironmentStatus>,
        remotes: &Remotes,
        work_dir: &Path,
    ) -> ProcessStatus {
        self.check_status(remotes, work_dir).await;

        if self.modules.is_empty() {
            self.environment_status = mode.target();
            self.real_status = mode.target();
        }
        if let Some(status) = forced {
            info!(package = %self.id, status = %status, "Environment status forced");
            self.environment_status = status;
        }

        mode.process_status_for(self.environment_status)
    }

    /// 检查发现明细
    pub fn details(&self) -> Vec<String> {
        let mut out = Vec::new();
        for module in &self.modules {
            module.details(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetManifest;
    use crate::domain::variable::VarType;
    use crate::infra::ParameterStore;
    use crate::services::modules::{DeploymentRecord, RecordStatus};

    fn package(json: &str) -> Package {
        let manifest = FleetManifest::from_json(json).unwrap();
        let decl = manifest.packages[0].clone();
        let id = PackageId::new("dev", decl.name.clone());
        Package::new(PackageHandle(0), id, decl)
    }

    const API: &str = r#"{ "packages": [ {
        "name": "api",
        "version": "1.0.0",
        "parameters": { "app": { "PORT": "80" } },
        "image": { "repository": "team/api" },
        "stack": { "name": "api-stack" }
    } ] }"#;

    #[tokio::test]
    async fn test_fresh_package_is_not_deployed() {
        let (remotes, handles) = Remotes::in_memory();
        handles.registry.push("team/api", "latest", "sha256:1").await;
        let mut package = package(API);

        let status = package
            .finalize_status(RunMode::Deploy, None, &remotes, Path::new("."))
            .await;
        assert_eq!(status, ProcessStatus::Processing);
        assert_eq!(package.environment_status, EnvironmentStatus::NotDeployed);
        assert_eq!(package.real_status, EnvironmentStatus::NotDeployed);

        let status = package
            .finalize_status(RunMode::Destroy, None, &remotes, Path::new("."))
            .await;
        assert_eq!(status, ProcessStatus::Completed);
    }

    #[tokio::test]
    async fn test_fully_deployed_package_is_up_to_date() {
        let (remotes, handles) = Remotes::in_memory();
        handles.registry.push("team/api", "latest", "sha256:1").await;
        handles.params.put("/dev/api/vars/app/PORT", "80", VarType::String).await.unwrap();
        handles.params.materialize("/dev/api/vars").await.unwrap();
        DeploymentRecord::new(RecordStatus::Deployed, "1.0.0", "ci")
            .with_image_digest(Some("sha256:1".into()))
            .store(handles.params.as_ref(), "/dev/api/state/infra-stack")
            .await
            .unwrap();

        let mut package = package(API);
        let status = package
            .finalize_status(RunMode::Deploy, None, &remotes, Path::new("."))
            .await;
        assert_eq!(status, ProcessStatus::Completed);
        assert_eq!(package.environment_status, EnvironmentStatus::UpToDate);

        // 镜像更新后堆栈需要重新部署
        handles.registry.push("team/api", "latest", "sha256:2").await;
        let status = package
            .finalize_status(RunMode::Deploy, None, &remotes, Path::new("."))
            .await;
        assert_eq!(status, ProcessStatus::Processing);
        assert_eq!(package.environment_status, EnvironmentStatus::NeedsUpdate);
    }

    #[tokio::test]
    async fn test_needs_fix_only_downgrades_real_status() {
        let (remotes, handles) = Remotes::in_memory();
        DeploymentRecord::new(RecordStatus::Failed, "1.0.0", "ci")
            .store(handles.params.as_ref(), "/dev/net/state/infra-stack")
            .await
            .unwrap();
        let mut package = package(
            r#"{ "packages": [ { "name": "net", "version": "1.0.0", "stack": { "name": "net" } } ] }"#,
        );

        package.check_status(&remotes, Path::new(".")).await;
        assert_eq!(package.environment_status, EnvironmentStatus::NeedsUpdate);
        assert_eq!(package.real_status, EnvironmentStatus::NeedsFix);
        assert!(package.details().iter().any(|d| d.contains("needs fix")));
    }

    #[tokio::test]
    async fn test_forced_status_overrides_rollup() {
        let (remotes, _) = Remotes::in_memory();
        let mut package = package(
            r#"{ "packages": [ { "name": "net", "stack": { "name": "net" } } ] }"#,
        );
        let status = package
            .finalize_status(
                RunMode::Deploy,
                Some(EnvironmentStatus::UpToDate),
                &remotes,
                Path::new("."),
            )
            .await;
        assert_eq!(status, ProcessStatus::Completed);
    }

    #[tokio::test]
    async fn test_repeated_checks_are_idempotent() {
        let (remotes, handles) = Remotes::in_memory();
        handles.registry.push("team/api", "latest", "sha256:1").await;
        handles.params.put("/dev/api/vars/app/PORT", "80", VarType::String).await.unwrap();
        let mut package = package(API);

        let first = package.check_status(&remotes, Path::new(".")).await;
        let first_details = package.details();
        let second = package.check_status(&remotes, Path::new(".")).await;

        assert_eq!(first, second);
        assert_eq!(first, EnvironmentStatus::Incomplete);
        assert_eq!(first_details, package.details());
    }
}
