//! 基础设施堆栈模块
//!
//! 部署记录中保存版本与部署时的镜像 digest；
//! 最新需要：记录为 Deployed、版本一致、digest 与镜像模块的最新 digest 一致。

use tracing::warn;

use crate::config::manifest::StackDecl;
use crate::domain::PackageId;

use super::record::{DeploymentRecord, RecordStatus};
use super::{ModuleBase, ModuleKind, CheckContext, SharedFacts};

#[derive(Debug)]
pub struct InfraStackModule {
    pub base: ModuleBase,
    pub stack: StackDecl,
    pub record: Option<DeploymentRecord>,
    /// 镜像模块检查得到的最新 digest
    pub expected_digest: Option<String>,
    image_declared: bool,
}

impl InfraStackModule {
    pub fn new(id: &PackageId, version: &str, stack: &StackDecl) -> Self {
        Self {
            base: ModuleBase::new(ModuleKind::InfraStack.record_path(id), version),
            stack: stack.clone(),
            record: None,
            expected_digest: None,
            image_declared: false,
        }
    }

    pub async fn check_status(&mut self, ctx: &CheckContext<'_>, facts: &SharedFacts) {
        self.image_declared = facts.image_declared;
        self.expected_digest = facts.image_digest.clone();

        self.record = match DeploymentRecord::load(ctx.remotes.params.as_ref(), &self.base.locator).await {
            Ok(record) => record,
            Err(e) => {
                warn!(package = %ctx.package, stack = %self.stack.name, error = %e, "Failed to read stack record");
                None
            }
        };

        if let Some(record) = &self.record {
            self.base.version.current = Some(record.version.clone());
            let findings = &mut self.base.findings;
            match record.status {
                RecordStatus::InProgress => {
                    findings.incomplete(format!("stack {} deployment in progress", self.stack.name))
                }
                RecordStatus::Failed => findings.needs_fix(format!(
                    "stack {} last deployment failed ({})",
                    self.stack.name, record.version
                )),
                RecordStatus::Deployed => findings.deployed(format!(
                    "stack {} at {} by {}",
                    self.stack.name, record.version, record.deployed_by
                )),
            }
            if self.image_declared
                && record.status == RecordStatus::Deployed
                && record.image_digest != self.expected_digest
            {
                findings.deployed(format!(
                    "stack {} runs image {}",
                    self.stack.name,
                    record.image_digest.as_deref().unwrap_or("unknown")
                ));
            }
        }

        self.base.checked = true;
    }

    pub fn up_to_date(&self) -> bool {
        let Some(record) = &self.record else {
            return false;
        };
        if record.status != RecordStatus::Deployed {
            return false;
        }
        if self.base.version.declared.as_deref() != Some(record.version.as_str()) {
            return false;
        }
        if self.image_declared {
            return self.expected_digest.is_some() && record.image_digest == self.expected_digest;
        }
        true
    }

    pub fn anything_deployed(&self) -> bool {
        self.record.is_some()
    }

    pub fn reset(&mut self) {
        self.base.reset();
        self.record = None;
        self.expected_digest = None;
        self.image_declared = false;
    }
}
