//! 舰队编排入口
//!
//! 一次调用：解析目标包 -> 状态检查 (STATUS_CHK) -> 跳过已到目标状态的包 -> 调度运行

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{EnvConfig, FleetManifest};
use crate::domain::{EnvironmentStatus, PackageHandle, PackageId, ProcessStatus, RunMode, StatusEvent};
use crate::error::FleetResult;
use crate::infra::{ProcessRegistry, Provisioner, Remotes};
use crate::services::deploy::{ExecutorSettings, FleetExecutor};
use crate::services::scheduler::{PackageExecutor, RunSummary, Scheduler, SchedulerOptions};
use crate::state::{PackageRegistry, StatusHub};

/// 运行选项
#[derive(Clone, Copy, Debug)]
pub struct RunOptions {
    /// 已处于目标状态的包也执行动作
    pub force: bool,
    pub track_dependencies: bool,
    /// 覆盖配置中的并发上限：None 沿用配置，Some(None) 表示不限
    pub max_processing: Option<Option<usize>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            force: false,
            track_dependencies: true,
            max_processing: None,
        }
    }
}

/// 单个包的状态报告
#[derive(Clone, Debug, Serialize)]
pub struct PackageReport {
    pub package: PackageId,
    pub process: ProcessStatus,
    pub environment: EnvironmentStatus,
    pub real: EnvironmentStatus,
    pub details: Vec<String>,
}

/// 舰队
pub struct Fleet {
    config: EnvConfig,
    registry: PackageRegistry,
    remotes: Remotes,
    processes: Arc<ProcessRegistry>,
    hub: Arc<StatusHub>,
}

impl Fleet {
    pub fn new(config: EnvConfig, manifest: &FleetManifest, remotes: Remotes) -> FleetResult<Self> {
        let registry = PackageRegistry::from_manifest(&config.environment, manifest)?;
        info!(
            environment = %config.environment,
            packages = registry.len(),
            "Fleet loaded"
        );
        Ok(Self {
            config,
            registry,
            remotes,
            processes: Arc::new(ProcessRegistry::new()),
            hub: Arc::new(StatusHub::new()),
        })
    }

    pub fn hub(&self) -> Arc<StatusHub> {
        self.hub.clone()
    }

    /// 外部“全部取消”使用的进程注册表
    pub fn processes(&self) -> Arc<ProcessRegistry> {
        self.processes.clone()
    }

    pub fn registry(&self) -> &PackageRegistry {
        &self.registry
    }

    /// 解析请求的包键，空列表表示全部
    pub fn resolve_targets(&self, keys: &[String]) -> FleetResult<Vec<PackageHandle>> {
        if keys.is_empty() {
            return Ok(self.registry.handles());
        }
        let mut handles = self.registry.resolve(&self.config.environment, keys)?;
        handles.sort();
        handles.dedup();
        Ok(handles)
    }

    /// 检查每个包的环境状态
    pub async fn sweep(&mut self, handles: &[PackageHandle]) -> Vec<PackageReport> {
        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            let Some(package) = self.registry.get_mut(*handle) else {
                continue;
            };
            package.process_status = ProcessStatus::StatusChk;
            self.hub
                .publish(StatusEvent::process(package.id.clone(), ProcessStatus::StatusChk));

            let environment = package
                .check_status(&self.remotes, &self.config.work_dir)
                .await;
            self.hub.publish(
                StatusEvent::process(package.id.clone(), package.process_status)
                    .with_environment(environment),
            );

            reports.push(PackageReport {
                package: package.id.clone(),
                process: package.process_status,
                environment,
                real: package.real_status,
                details: package.details(),
            });
        }
        reports
    }

    /// 仅检查，不执行动作
    pub async fn status_report(&mut self, keys: &[String]) -> FleetResult<Vec<PackageReport>> {
        let handles = self.resolve_targets(keys)?;
        Ok(self.sweep(&handles).await)
    }

    /// 使用真实执行器运行
    pub async fn run(
        &mut self,
        mode: RunMode,
        keys: &[String],
        options: RunOptions,
        cancel: CancellationToken,
    ) -> FleetResult<RunSummary> {
        let executor = Arc::new(FleetExecutor::new(
            self.remotes.clone(),
            Provisioner::new(self.config.provisioner.clone(), self.config.work_dir.clone()),
            self.processes.clone(),
            self.hub.clone(),
            ExecutorSettings {
                work_dir: self.config.work_dir.clone(),
                identity: self.config.identity.clone(),
                command_timeout: self.config.command_timeout,
            },
        ));
        self.run_with(mode, keys, options, executor, cancel).await
    }

    /// 使用指定执行器运行
    pub async fn run_with(
        &mut self,
        mode: RunMode,
        keys: &[String],
        options: RunOptions,
        executor: Arc<dyn PackageExecutor>,
        cancel: CancellationToken,
    ) -> FleetResult<RunSummary> {
        let handles = self.resolve_targets(keys)?;
        self.sweep(&handles).await;

        let scheduler_options = SchedulerOptions {
            max_processing: options.max_processing.unwrap_or(self.config.max_processing),
            track_dependencies: options.track_dependencies,
        };
        let mut scheduler = Scheduler::new(mode, scheduler_options).with_hub(self.hub.clone());

        let mut queued = Vec::new();
        for handle in handles {
            let Some(package) = self.registry.get(handle) else {
                continue;
            };
            let at_target = mode.process_status_for(package.environment_status) == ProcessStatus::Completed;
            if at_target && !options.force {
                info!(package = %package.id, mode = %mode, "Already at target, skipping");
                scheduler.record_completed(handle, package.id.clone());
            } else {
                queued.push(handle);
            }
        }

        scheduler.enqueue(&self.registry, &queued)?;
        let summary = scheduler.run(&mut self.registry, executor, cancel).await;
        if !summary.success() {
            warn!(
                mode = %mode,
                failed = summary.failed.len(),
                cancelled = summary.cancelled.len(),
                "Run did not complete cleanly"
            );
        }
        self.hub.cleanup().await;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FleetError;
    use crate::services::package::Package;
    use crate::services::scheduler::ActionContext;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MANIFEST: &str = r#"{ "packages": [
        { "name": "network", "version": "1.0.0", "stack": { "name": "network" } },
        {
            "name": "api",
            "version": "2.0.0",
            "deploy_after": ["network"],
            "parameters": { "app": { "PORT": "80" } },
            "stack": { "name": "api" }
        }
    ] }"#;

    fn config(work_dir: &std::path::Path, tool: &str) -> EnvConfig {
        let pairs: HashMap<&str, String> = HashMap::from([
            ("FLEET_ENVIRONMENT", "dev".to_string()),
            ("FLEET_IDENTITY", "ci".to_string()),
            ("FLEET_WORK_DIR", work_dir.display().to_string()),
            ("FLEET_STACK_TOOL", tool.to_string()),
        ]);
        EnvConfig::from_lookup(|key| pairs.get(key).cloned()).unwrap()
    }

    fn fleet(work_dir: &std::path::Path, tool: &str) -> Fleet {
        let (remotes, _) = Remotes::in_memory();
        Fleet::new(
            config(work_dir, tool),
            &FleetManifest::from_json(MANIFEST).unwrap(),
            remotes,
        )
        .unwrap()
    }

    /// 统计调用次数，总是成功
    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PackageExecutor for CountingExecutor {
        async fn execute(&self, _package: &mut Package, _ctx: &ActionContext) -> ProcessStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ProcessStatus::Completed
        }
    }

    #[tokio::test]
    async fn test_deploy_then_destroy_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut fleet = fleet(dir.path(), "true");

        let summary = fleet
            .run(RunMode::Deploy, &[], RunOptions::default(), CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.success(), "{:?}", summary);
        assert_eq!(summary.completed.len(), 2);
        assert_eq!(summary.completed[0].name, "network");

        let reports = fleet.status_report(&[]).await.unwrap();
        assert!(reports.iter().all(|r| r.environment == EnvironmentStatus::UpToDate));

        let summary = fleet
            .run(RunMode::Destroy, &[], RunOptions::default(), CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.success(), "{:?}", summary);
        assert_eq!(summary.completed[0].name, "api");

        let reports = fleet.status_report(&[]).await.unwrap();
        assert!(reports.iter().all(|r| r.environment == EnvironmentStatus::NotDeployed));
    }

    #[tokio::test]
    async fn test_packages_at_target_are_skipped_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let mut fleet = fleet(dir.path(), "true");
        let executor = Arc::new(CountingExecutor::default());

        // 全新环境销毁：已是 NOT_DEPLOYED
        let summary = fleet
            .run_with(
                RunMode::Destroy,
                &[],
                RunOptions::default(),
                executor.clone(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(summary.completed.len(), 2);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);

        let forced = RunOptions {
            force: true,
            ..RunOptions::default()
        };
        fleet
            .run_with(RunMode::Destroy, &[], forced, executor.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_prerequisite_cancels_dependent() {
        let dir = tempfile::tempdir().unwrap();
        let mut fleet = fleet(dir.path(), "false");

        let summary = fleet
            .run(RunMode::Deploy, &[], RunOptions::default(), CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.completed.is_empty());
        assert_eq!(summary.failed[0].name, "network");
        assert_eq!(summary.cancelled[0].name, "api");

        let reports = fleet.status_report(&["network".to_string()]).await.unwrap();
        assert_eq!(reports[0].real, EnvironmentStatus::NeedsFix);
    }

    #[tokio::test]
    async fn test_status_report_for_fresh_environment() {
        let dir = tempfile::tempdir().unwrap();
        let mut fleet = fleet(dir.path(), "true");

        let reports = fleet.status_report(&["api".to_string()]).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].environment, EnvironmentStatus::NotDeployed);
        assert_eq!(reports[0].process, ProcessStatus::StatusChk);
        assert!(reports[0].details.iter().any(|d| d.contains("not pushed")));
    }

    #[tokio::test]
    async fn test_cli_override_can_lift_configured_cap() {
        let dir = tempfile::tempdir().unwrap();
        let pairs: HashMap<&str, String> = HashMap::from([
            ("FLEET_ENVIRONMENT", "dev".to_string()),
            ("FLEET_IDENTITY", "ci".to_string()),
            ("FLEET_WORK_DIR", dir.path().display().to_string()),
            ("FLEET_MAX_PROCESSING", "1".to_string()),
        ]);
        let config = EnvConfig::from_lookup(|key| pairs.get(key).cloned()).unwrap();
        let (remotes, _) = Remotes::in_memory();
        let mut fleet = Fleet::new(config, &FleetManifest::from_json(MANIFEST).unwrap(), remotes).unwrap();
        let executor = Arc::new(CountingExecutor::default());
        let independent = RunOptions {
            force: true,
            track_dependencies: false,
            ..RunOptions::default()
        };

        let summary = fleet
            .run_with(RunMode::Deploy, &[], independent, executor.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.max_in_flight, 1);

        let unbounded = RunOptions {
            max_processing: Some(None),
            ..independent
        };
        let summary = fleet
            .run_with(RunMode::Deploy, &[], unbounded, executor, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.max_in_flight, 2);
    }

    #[tokio::test]
    async fn test_unknown_package_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut fleet = fleet(dir.path(), "true");
        let err = fleet.status_report(&["nope".to_string()]).await.unwrap_err();
        assert!(matches!(err, FleetError::UnknownPackage(key) if key == "nope"));
    }
}
