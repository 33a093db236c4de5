//! 容器镜像模块
//!
//! 查询镜像仓库中声明标签的最新 digest，供基础设施堆栈模块比对

use tracing::warn;

use crate::config::manifest::ImageDecl;
use crate::infra::container_registry::digest_for;

use super::{ModuleBase, CheckContext, SharedFacts};

#[derive(Debug)]
pub struct ContainerImageModule {
    pub base: ModuleBase,
    pub repository: String,
    pub tag: String,
    pub latest_digest: Option<String>,
}

impl ContainerImageModule {
    pub fn new(image: &ImageDecl) -> Self {
        Self {
            base: ModuleBase::new(image.repository.clone(), image.tag.clone()),
            repository: image.repository.clone(),
            tag: image.tag.clone(),
            latest_digest: None,
        }
    }

    pub async fn check_status(&mut self, ctx: &CheckContext<'_>, facts: &mut SharedFacts) {
        self.latest_digest = match ctx.remotes.registry.list_tags(&self.repository).await {
            Ok(tags) => digest_for(&tags, &self.tag).map(str::to_string),
            Err(e) => {
                warn!(package = %ctx.package, repository = %self.repository, error = %e, "Failed to list image tags");
                None
            }
        };

        match &self.latest_digest {
            Some(digest) => {
                self.base.version.current = Some(digest.clone());
                self.base
                    .findings
                    .deployed(format!("{}:{} is {}", self.repository, self.tag, digest));
            }
            None => self.base.findings.needs_fix(format!(
                "{}:{} not found in registry",
                self.repository, self.tag
            )),
        }

        facts.image_declared = true;
        facts.image_digest = self.latest_digest.clone();
        self.base.checked = true;
    }

    /// 声明的标签在仓库中可用
    pub fn up_to_date(&self) -> bool {
        self.latest_digest.is_some()
    }

    /// 镜像仓库不属于环境状态，销毁时不会删除镜像
    pub fn anything_deployed(&self) -> bool {
        false
    }

    pub fn reset(&mut self) {
        self.base.reset();
        self.latest_digest = None;
    }
}
