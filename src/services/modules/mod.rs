//! 模块：包中拥有独立远程状态的最小单元
//!
//! 五种变体组成封闭的 `Module` 枚举，共享同一组操作：
//! - `check_status`: 探测远程状态（失败按“未找到”处理，不向上传播）
//! - `up_to_date` / `anything_deployed`: 基于最近一次检查的结论
//! - `reset`: 清除计算字段
//! - `details`: 输出检查发现（仅用于报告）

pub mod build_artifact;
pub mod container_image;
pub mod executable;
pub mod infra_stack;
pub mod parameters;
pub mod record;

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

use crate::config::PackageDecl;
use crate::domain::{Findings, PackageId, VersionTriple};
use crate::infra::Remotes;

pub use build_artifact::BuildArtifactModule;
pub use container_image::ContainerImageModule;
pub use executable::ExecutableModule;
pub use infra_stack::InfraStackModule;
pub use parameters::ParametersModule;
pub use record::{DeploymentRecord, RecordStatus};

/// 模块种类，顺序即检查顺序（后面的模块会读取前面模块填充的字段）
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModuleKind {
    Parameters,
    ContainerImage,
    InfraStack,
    BuildArtifact,
    Executable,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Parameters => "parameters",
            ModuleKind::ContainerImage => "container-image",
            ModuleKind::InfraStack => "infra-stack",
            ModuleKind::BuildArtifact => "build-artifact",
            ModuleKind::Executable => "executable",
        }
    }

    /// 部署记录在存储中的路径
    pub fn record_path(&self, package: &PackageId) -> String {
        format!("{}/state/{}", package.store_prefix(), self.as_str())
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 所有模块共有的字段
#[derive(Clone, Debug, Default)]
pub struct ModuleBase {
    /// 远程位置（存储路径、仓库名、堆栈名等）
    pub locator: String,
    pub version: VersionTriple,
    pub findings: Findings,
    pub checked: bool,
}

impl ModuleBase {
    pub fn new(locator: impl Into<String>, declared_version: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            version: VersionTriple::declared(declared_version),
            findings: Findings::default(),
            checked: false,
        }
    }

    pub fn reset(&mut self) {
        self.version.reset();
        self.findings.clear();
        self.checked = false;
    }
}

/// 检查时可用的上下文
pub struct CheckContext<'a> {
    pub package: &'a PackageId,
    pub remotes: &'a Remotes,
    pub work_dir: &'a Path,
}

/// 同一包内模块之间交叉引用的字段
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SharedFacts {
    /// 包是否声明了容器镜像
    pub image_declared: bool,
    /// 镜像仓库中声明标签对应的最新 digest
    pub image_digest: Option<String>,
}

/// 模块
#[derive(Debug)]
pub enum Module {
    Parameters(ParametersModule),
    ContainerImage(ContainerImageModule),
    InfraStack(InfraStackModule),
    BuildArtifact(BuildArtifactModule),
    Executable(ExecutableModule),
}

impl Module {
    /// 按清单声明创建包的模块，已按检查顺序排列
    pub fn from_decl(id: &PackageId, decl: &PackageDecl) -> Vec<Module> {
        let mut modules = Vec::new();
        // 空的参数表没有可部署的内容
        let local = decl.local_parameters();
        if local.total() > 0 {
            modules.push(Module::Parameters(ParametersModule::new(id, &decl.version, local)));
        }
        if let Some(image) = &decl.image {
            modules.push(Module::ContainerImage(ContainerImageModule::new(image)));
        }
        if let Some(stack) = &decl.stack {
            modules.push(Module::InfraStack(InfraStackModule::new(id, &decl.version, stack)));
        }
        if let Some(artifact) = &decl.artifact {
            modules.push(Module::BuildArtifact(BuildArtifactModule::new(
                id,
                &decl.version,
                artifact,
            )));
        }
        if let Some(executable) = &decl.executable {
            modules.push(Module::Executable(ExecutableModule::new(&decl.version, executable)));
        }
        modules.sort_by_key(Module::kind);
        modules
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            Module::Parameters(_) => ModuleKind::Parameters,
            Module::ContainerImage(_) => ModuleKind::ContainerImage,
            Module::InfraStack(_) => ModuleKind::InfraStack,
            Module::BuildArtifact(_) => ModuleKind::BuildArtifact,
            Module::Executable(_) => ModuleKind::Executable,
        }
    }

    pub fn base(&self) -> &ModuleBase {
        match self {
            Module::Parameters(m) => &m.base,
            Module::ContainerImage(m) => &m.base,
            Module::InfraStack(m) => &m.base,
            Module::BuildArtifact(m) => &m.base,
            Module::Executable(m) => &m.base,
        }
    }

    pub fn findings(&self) -> &Findings {
        &self.base().findings
    }

    /// 探测远程状态
    pub async fn check_status(&mut self, ctx: &CheckContext<'_>, facts: &mut SharedFacts) {
        match self {
            Module::Parameters(m) => m.check_status(ctx).await,
            Module::ContainerImage(m) => m.check_status(ctx, facts).await,
            Module::InfraStack(m) => m.check_status(ctx, facts).await,
            Module::BuildArtifact(m) => m.check_status(ctx).await,
            Module::Executable(m) => m.check_status(ctx).await,
        }
    }

    pub fn up_to_date(&self) -> bool {
        if !self.base().checked {
            return false;
        }
        match self {
            Module::Parameters(m) => m.up_to_date(),
            Module::ContainerImage(m) => m.up_to_date(),
            Module::InfraStack(m) => m.up_to_date(),
            Module::BuildArtifact(m) => m.up_to_date(),
            Module::Executable(m) => m.up_to_date(),
        }
    }

    pub fn anything_deployed(&self) -> bool {
        match self {
            Module::Parameters(m) => m.anything_deployed(),
            Module::ContainerImage(m) => m.anything_deployed(),
            Module::InfraStack(m) => m.anything_deployed(),
            Module::BuildArtifact(m) => m.anything_deployed(),
            Module::Executable(m) => m.anything_deployed(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Module::Parameters(m) => m.reset(),
            Module::ContainerImage(m) => m.reset(),
            Module::InfraStack(m) => m.reset(),
            Module::BuildArtifact(m) => m.reset(),
            Module::Executable(m) => m.reset(),
        }
    }

    /// 追加检查发现
    pub fn details(&self, out: &mut Vec<String>) {
        let kind = self.kind();
        let findings = self.findings();
        for line in &findings.needs_fix {
            out.push(format!("[{}] needs fix: {}", kind, line));
        }
        for line in &findings.incomplete {
            out.push(format!("[{}] incomplete: {}", kind, line));
        }
        for line in &findings.deployed {
            out.push(format!("[{}] deployed: {}", kind, line));
        }
        if let Module::Parameters(m) = self {
            m.details(out);
        }
    }
}

/// 文件 SHA-256；文件不存在返回 None
pub(crate) async fn file_sha256(path: &Path) -> std::io::Result<Option<String>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(format!("{:x}", Sha256::digest(&bytes)))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
