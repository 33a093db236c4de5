//! 可执行文件模块
//!
//! 安装位置的文件与源文件内容一致即为最新

use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::manifest::ExecutableDecl;

use super::{file_sha256, ModuleBase, CheckContext};

#[derive(Debug)]
pub struct ExecutableModule {
    pub base: ModuleBase,
    pub decl: ExecutableDecl,
    pub source_hash: Option<String>,
    pub installed_hash: Option<String>,
}

impl ExecutableModule {
    pub fn new(version: &str, decl: &ExecutableDecl) -> Self {
        Self {
            base: ModuleBase::new(decl.install_path.display().to_string(), version),
            decl: decl.clone(),
            source_hash: None,
            installed_hash: None,
        }
    }

    pub fn source_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(&self.decl.source)
    }

    pub fn install_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(&self.decl.install_path)
    }

    pub async fn check_status(&mut self, ctx: &CheckContext<'_>) {
        self.source_hash = hash_or_none(ctx, &self.source_path(ctx.work_dir)).await;
        self.installed_hash = hash_or_none(ctx, &self.install_path(ctx.work_dir)).await;
        self.base.version.build = self.source_hash.clone();
        self.base.version.current = self.installed_hash.clone();

        if self.installed_hash.is_some() {
            self.base
                .findings
                .deployed(format!("installed at {}", self.decl.install_path.display()));
        }
        if self.source_hash.is_none() {
            self.base
                .findings
                .needs_fix(format!("source {} not built", self.decl.source.display()));
        }
        self.base.checked = true;
    }

    pub fn up_to_date(&self) -> bool {
        self.installed_hash.is_some() && self.installed_hash == self.source_hash
    }

    pub fn anything_deployed(&self) -> bool {
        self.installed_hash.is_some()
    }

    pub fn reset(&mut self) {
        self.base.reset();
        self.source_hash = None;
        self.installed_hash = None;
    }
}

async fn hash_or_none(ctx: &CheckContext<'_>, path: &Path) -> Option<String> {
    match file_sha256(path).await {
        Ok(hash) => hash,
        Err(e) => {
            warn!(package = %ctx.package, path = %path.display(), error = %e, "Failed to hash file");
            None
        }
    }
}
