//! 构建产物模块
//!
//! 本地产物的 SHA-256 与部署记录中的哈希一致即为最新

use std::path::PathBuf;
use tracing::warn;

use crate::config::manifest::ArtifactDecl;
use crate::domain::PackageId;

use super::record::DeploymentRecord;
use super::{file_sha256, ModuleBase, ModuleKind, CheckContext};

#[derive(Debug)]
pub struct BuildArtifactModule {
    pub base: ModuleBase,
    pub decl: ArtifactDecl,
    pub local_hash: Option<String>,
    pub record: Option<DeploymentRecord>,
}

impl BuildArtifactModule {
    pub fn new(id: &PackageId, version: &str, decl: &ArtifactDecl) -> Self {
        Self {
            base: ModuleBase::new(ModuleKind::BuildArtifact.record_path(id), version),
            decl: decl.clone(),
            local_hash: None,
            record: None,
        }
    }

    /// 产物在本地的绝对路径
    pub fn artifact_path(&self, work_dir: &std::path::Path) -> PathBuf {
        let base = match &self.decl.work_dir {
            Some(dir) => work_dir.join(dir),
            None => work_dir.to_path_buf(),
        };
        base.join(&self.decl.path)
    }

    pub async fn check_status(&mut self, ctx: &CheckContext<'_>) {
        let path = self.artifact_path(ctx.work_dir);
        self.local_hash = match file_sha256(&path).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(package = %ctx.package, path = %path.display(), error = %e, "Failed to hash artifact");
                None
            }
        };
        self.base.version.build = self.local_hash.clone();

        self.record = match DeploymentRecord::load(ctx.remotes.params.as_ref(), &self.base.locator).await {
            Ok(record) => record,
            Err(e) => {
                warn!(package = %ctx.package, error = %e, "Failed to read artifact record");
                None
            }
        };

        if let Some(record) = &self.record {
            self.base.version.current = record.artifact_hash.clone();
            self.base.findings.deployed(format!(
                "artifact {} recorded {}",
                self.decl.path.display(),
                record.artifact_hash.as_deref().unwrap_or("without hash")
            ));
        }

        self.base.checked = true;
    }

    pub fn up_to_date(&self) -> bool {
        match (&self.local_hash, &self.record) {
            (Some(local), Some(record)) => record.artifact_hash.as_deref() == Some(local.as_str()),
            _ => false,
        }
    }

    pub fn anything_deployed(&self) -> bool {
        self.record.is_some()
    }

    pub fn reset(&mut self) {
        self.base.reset();
        self.local_hash = None;
        self.record = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::Remotes;
    use crate::services::modules::RecordStatus;

    #[tokio::test]
    async fn test_hash_must_match_record() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.tar"), b"v1").unwrap();

        let (remotes, handles) = Remotes::in_memory();
        let id = PackageId::new("dev", "cli");
        let ctx = CheckContext {
            package: &id,
            remotes: &remotes,
            work_dir: dir.path(),
        };
        let decl = ArtifactDecl {
            path: "app.tar".into(),
            build: vec!["true".into()],
            work_dir: None,
        };
        let mut module = BuildArtifactModule::new(&id, "1.0.0", &decl);
        module.check_status(&ctx).await;
        assert!(module.local_hash.is_some());
        assert!(!module.up_to_date());
        assert!(!module.anything_deployed());

        DeploymentRecord::new(RecordStatus::Deployed, "1.0.0", "ci")
            .with_artifact_hash(module.local_hash.clone())
            .store(handles.params.as_ref(), &module.base.locator)
            .await
            .unwrap();
        module.reset();
        module.check_status(&ctx).await;
        assert!(module.up_to_date());

        std::fs::write(dir.path().join("app.tar"), b"v2").unwrap();
        module.reset();
        module.check_status(&ctx).await;
        assert!(!module.up_to_date());
        assert!(module.anything_deployed());
    }
}
