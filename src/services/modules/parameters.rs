//! 参数模块
//!
//! 变量存放在 `{prefix}/vars/{namespace}/{name}`，
//! 是否最新由收敛引擎的三方比较决定。

use tracing::warn;

use crate::domain::variable::{Namespace, ParameterSet, VariableRecord};
use crate::domain::PackageId;
use crate::infra::param_store::StoredParameter;
use crate::services::convergence::{check_vars_up_to_date, ConvergenceReport};

use super::{ModuleBase, CheckContext};

#[derive(Debug)]
pub struct ParametersModule {
    pub base: ModuleBase,
    /// 本地声明的变量
    pub local: ParameterSet,
    pub pushed: ParameterSet,
    pub materialized: ParameterSet,
    pub report: Option<ConvergenceReport>,
}

impl ParametersModule {
    pub fn new(id: &PackageId, version: &str, local: ParameterSet) -> Self {
        Self {
            base: ModuleBase::new(Self::vars_prefix(id), version),
            local,
            pushed: ParameterSet::new(),
            materialized: ParameterSet::new(),
            report: None,
        }
    }

    pub fn vars_prefix(id: &PackageId) -> String {
        format!("{}/vars", id.store_prefix())
    }

    pub async fn check_status(&mut self, ctx: &CheckContext<'_>) {
        let prefix = self.base.locator.clone();
        let params = &ctx.remotes.params;

        // 探测失败按“什么也没有”处理
        self.pushed = match params.get_by_path(&format!("{}/", prefix)).await {
            Ok(records) => to_parameter_set(&prefix, records),
            Err(e) => {
                warn!(package = %ctx.package, error = %e, "Failed to read pushed parameters");
                ParameterSet::new()
            }
        };
        self.materialized = match params.get_materialized_by_path(&format!("{}/", prefix)).await {
            Ok(records) => to_parameter_set(&prefix, records),
            Err(e) => {
                warn!(package = %ctx.package, error = %e, "Failed to read materialized parameters");
                ParameterSet::new()
            }
        };

        let report = check_vars_up_to_date(
            &self.local,
            &self.pushed,
            &self.materialized,
            ctx.remotes.kms.as_ref(),
        )
        .await;

        let findings = &mut self.base.findings;
        for duplicate in &report.duplicates {
            findings.needs_fix(format!("duplicate variable {}", duplicate));
        }
        for (name, refs) in &report.unresolved_templates {
            let refs: Vec<&str> = refs.iter().map(String::as_str).collect();
            findings.needs_fix(format!(
                "variable {} has unresolved references: {}",
                name,
                refs.join(", ")
            ));
        }
        for key in &report.not_found_in_materialization {
            findings.incomplete(format!("{} pushed but not materialized", key));
        }
        if self.pushed.total() > 0 {
            findings.deployed(format!("{} variables pushed", self.pushed.total()));
        }
        if self.materialized.total() > 0 {
            findings.deployed(format!("{} variables materialized", self.materialized.total()));
        }

        self.report = Some(report);
        self.base.checked = true;
    }

    /// 只看收敛结果；needs_fix 发现由包的 real 状态体现
    pub fn up_to_date(&self) -> bool {
        self.report.as_ref().is_some_and(ConvergenceReport::vars_up_to_date)
    }

    pub fn anything_deployed(&self) -> bool {
        self.report
            .as_ref()
            .is_some_and(ConvergenceReport::anything_pushed)
    }

    pub fn reset(&mut self) {
        self.base.reset();
        self.pushed = ParameterSet::new();
        self.materialized = ParameterSet::new();
        self.report = None;
    }

    /// 差异明细
    pub fn details(&self, out: &mut Vec<String>) {
        let Some(report) = &self.report else {
            return;
        };
        for key in &report.local_only {
            out.push(format!("[parameters] not pushed: {}", key));
        }
        for key in &report.materialized_not_pushed {
            out.push(format!("[parameters] materialized but not pushed: {}", key));
        }
        for key in &report.deployed_only {
            out.push(format!("[parameters] no longer declared: {}", key));
        }
        for key in &report.local_not_found {
            out.push(format!("[parameters] stale push: {}", key));
        }
        for name in &report.materialized_only {
            out.push(format!("[parameters] only materialized: {}", name));
        }
        for mismatch in &report.mismatches {
            out.push(format!(
                "[parameters] value differs from {:?}: {}",
                mismatch.against, mismatch.var
            ));
        }
        if report.materialized_total != report.expected_materialized {
            out.push(format!(
                "[parameters] materialized {} variables, expected {}",
                report.materialized_total, report.expected_materialized
            ));
        }
    }
}

/// 将 `{prefix}/{namespace}/{name}` 形式的存储记录转换为变量集合
///
/// 无法识别命名空间的路径被忽略
pub fn to_parameter_set(prefix: &str, records: Vec<StoredParameter>) -> ParameterSet {
    records
        .into_iter()
        .filter_map(|record| {
            let rest = record.path.strip_prefix(prefix)?.trim_start_matches('/');
            let (segment, name) = rest.split_once('/')?;
            let namespace = Namespace::from_segment(segment)?;
            Some(VariableRecord::new(namespace, name, record.value, record.var_type))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::variable::VarType;
    use crate::infra::{ParameterStore, Remotes};
    use crate::services::convergence::Side;
    use std::path::Path;

    fn local() -> ParameterSet {
        [
            VariableRecord::new(Namespace::App, "PORT", "8080", VarType::String),
            VariableRecord::new(Namespace::GlobalEnv, "REGION", "eu", VarType::String),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn test_pushed_but_not_materialized_is_incomplete() {
        let (remotes, handles) = Remotes::in_memory();
        let id = PackageId::new("dev", "api");
        let ctx = CheckContext {
            package: &id,
            remotes: &remotes,
            work_dir: Path::new("."),
        };
        let mut module = ParametersModule::new(&id, "1.0.0", local());

        module.check_status(&ctx).await;
        assert!(!module.up_to_date());
        assert!(!module.anything_deployed());

        for record in module.local.iter() {
            let path = record.store_path(&module.base.locator);
            handles.params.put(&path, &record.value, record.var_type).await.unwrap();
        }
        module.reset();
        module.check_status(&ctx).await;
        assert!(!module.up_to_date());
        assert!(module.anything_deployed());
        assert_eq!(module.base.findings.incomplete.len(), 2);

        handles.params.materialize(&module.base.locator).await.unwrap();
        module.reset();
        module.check_status(&ctx).await;
        assert!(module.up_to_date());
    }

    #[tokio::test]
    async fn test_duplicate_is_flagged_but_converges() {
        let (remotes, handles) = Remotes::in_memory();
        let id = PackageId::new("dev", "api");
        let ctx = CheckContext {
            package: &id,
            remotes: &remotes,
            work_dir: Path::new("."),
        };
        let mut set = local();
        set.insert(VariableRecord::new(Namespace::Global, "PORT", "80", VarType::String));
        let mut module = ParametersModule::new(&id, "1.0.0", set);

        for record in module.local.iter() {
            let path = record.store_path(&module.base.locator);
            handles.params.put(&path, &record.value, record.var_type).await.unwrap();
        }
        handles.params.materialize(&module.base.locator).await.unwrap();

        module.check_status(&ctx).await;
        assert!(module.report.as_ref().unwrap().vars_up_to_date());
        assert_eq!(module.base.findings.needs_fix.len(), 1);
        assert!(module.up_to_date());
    }

    #[tokio::test]
    async fn test_stale_materialization_is_drift() {
        let (remotes, handles) = Remotes::in_memory();
        let id = PackageId::new("dev", "api");
        let ctx = CheckContext {
            package: &id,
            remotes: &remotes,
            work_dir: Path::new("."),
        };
        let mut module = ParametersModule::new(&id, "1.0.0", local());
        let prefix = module.base.locator.clone();

        for record in module.local.iter() {
            let path = record.store_path(&prefix);
            handles.params.put(&path, &record.value, record.var_type).await.unwrap();
        }
        // 生效快照仍是旧值，且缺少 REGION
        handles
            .params
            .set_materialized(
                &prefix,
                vec![StoredParameter::new(
                    format!("{}/app/PORT", prefix),
                    "80",
                    VarType::String,
                )],
            )
            .await;

        module.check_status(&ctx).await;
        let report = module.report.as_ref().unwrap();
        assert!(report
            .mismatches
            .iter()
            .any(|m| m.var.name == "PORT" && matches!(m.against, Side::Materialized)));
        assert_eq!(report.not_found_in_materialization.len(), 1);
        assert_eq!(report.materialized_total, 1);
        assert!(!module.up_to_date());
    }

    #[tokio::test]
    async fn test_unreachable_store_means_nothing_found() {
        let (remotes, handles) = Remotes::in_memory();
        handles.params.set_unreachable(true);
        let id = PackageId::new("dev", "api");
        let ctx = CheckContext {
            package: &id,
            remotes: &remotes,
            work_dir: Path::new("."),
        };
        let mut module = ParametersModule::new(&id, "1.0.0", local());

        module.check_status(&ctx).await;
        assert!(module.base.checked);
        assert!(!module.anything_deployed());
        assert_eq!(module.report.as_ref().unwrap().local_only.len(), 2);
    }

    #[test]
    fn test_to_parameter_set_ignores_foreign_paths() {
        let set = to_parameter_set(
            "/dev/api/vars",
            vec![
                StoredParameter::new("/dev/api/vars/app/PORT", "80", VarType::String),
                StoredParameter::new("/dev/api/vars/unknown/X", "1", VarType::String),
                StoredParameter::new("/dev/web/vars/app/PORT", "81", VarType::String),
            ],
        );
        assert_eq!(set.total(), 1);
        assert_eq!(set.get(Namespace::App, "PORT").unwrap().value, "80");
    }
}
