//! 舰队清单
//!
//! JSON 格式，声明每个包的模块、变量和部署/销毁依赖

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::domain::variable::{Namespace, ParameterSet, VarType, VariableRecord};
use crate::error::{FleetError, FleetResult};

/// 清单根
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FleetManifest {
    #[serde(default)]
    pub packages: Vec<PackageDecl>,
}

/// 包声明
#[derive(Clone, Debug, Deserialize)]
pub struct PackageDecl {
    pub name: String,
    /// 子组件/实例
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    /// 部署前必须完成的包（`name` 或 `name/component`）
    #[serde(default)]
    pub deploy_after: Vec<String>,
    /// 销毁前必须先销毁的包
    #[serde(default)]
    pub destroy_after: Vec<String>,
    #[serde(default)]
    pub parameters: Option<ParametersDecl>,
    #[serde(default)]
    pub image: Option<ImageDecl>,
    #[serde(default)]
    pub stack: Option<StackDecl>,
    #[serde(default)]
    pub artifact: Option<ArtifactDecl>,
    #[serde(default)]
    pub executable: Option<ExecutableDecl>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

/// 按命名空间声明的变量
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ParametersDecl {
    #[serde(default)]
    pub app: BTreeMap<String, VarDecl>,
    #[serde(default)]
    pub environment: BTreeMap<String, VarDecl>,
    #[serde(default)]
    pub global: BTreeMap<String, VarDecl>,
    #[serde(default, rename = "globalEnv")]
    pub global_env: BTreeMap<String, VarDecl>,
}

/// 变量声明：纯字符串或带类型
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum VarDecl {
    Plain(String),
    Typed {
        value: String,
        #[serde(rename = "type", default)]
        var_type: VarType,
    },
}

/// 容器镜像
#[derive(Clone, Debug, Deserialize)]
pub struct ImageDecl {
    /// 仓库名（如 team/api）
    pub repository: String,
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    "latest".to_string()
}

/// 基础设施堆栈
#[derive(Clone, Debug, Deserialize)]
pub struct StackDecl {
    /// 堆栈名称
    pub name: String,
    /// 传给工具的 context 键值（`-c key=value`）
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

/// 构建产物
#[derive(Clone, Debug, Deserialize)]
pub struct ArtifactDecl {
    /// 产物路径（相对于工作目录）
    pub path: PathBuf,
    /// 构建命令（program + args）
    pub build: Vec<String>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

/// 安装的可执行文件
#[derive(Clone, Debug, Deserialize)]
pub struct ExecutableDecl {
    pub source: PathBuf,
    pub install_path: PathBuf,
    /// 安装命令；未指定时直接复制文件
    #[serde(default)]
    pub install: Option<Vec<String>>,
}

impl PackageDecl {
    /// 清单内引用键
    pub fn key(&self) -> String {
        match &self.component {
            Some(component) => format!("{}/{}", self.name, component),
            None => self.name.clone(),
        }
    }

    /// 本地声明的变量集合
    pub fn local_parameters(&self) -> ParameterSet {
        let Some(decl) = &self.parameters else {
            return ParameterSet::new();
        };

        let sections = [
            (Namespace::App, &decl.app),
            (Namespace::Environment, &decl.environment),
            (Namespace::Global, &decl.global),
            (Namespace::GlobalEnv, &decl.global_env),
        ];

        sections
            .into_iter()
            .flat_map(|(namespace, vars)| {
                vars.iter().map(move |(name, var)| {
                    let (value, var_type) = match var {
                        VarDecl::Plain(value) => (value.clone(), VarType::String),
                        VarDecl::Typed { value, var_type } => (value.clone(), *var_type),
                    };
                    VariableRecord::new(namespace, name.clone(), value, var_type)
                })
            })
            .collect()
    }
}

impl FleetManifest {
    /// 从文件加载并校验
    pub fn load(path: &Path) -> FleetResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| FleetError::ManifestRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// 解析并校验 JSON 清单
    pub fn from_json(raw: &str) -> FleetResult<Self> {
        let manifest: Self =
            serde_json::from_str(raw).map_err(|e| FleetError::Manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn find(&self, key: &str) -> Option<&PackageDecl> {
        self.packages.iter().find(|p| p.key() == key)
    }

    /// 校验：名称唯一、依赖存在、命令非空
    pub fn validate(&self) -> FleetResult<()> {
        let mut keys = HashSet::new();
        for package in &self.packages {
            if package.name.trim().is_empty() {
                return Err(FleetError::Manifest("package name must not be empty".into()));
            }
            if !keys.insert(package.key()) {
                return Err(FleetError::Manifest(format!(
                    "package {} is declared more than once",
                    package.key()
                )));
            }
        }

        for package in &self.packages {
            let key = package.key();
            for dep in package.deploy_after.iter().chain(&package.destroy_after) {
                if dep == &key {
                    return Err(FleetError::Manifest(format!("package {} depends on itself", key)));
                }
                if !keys.contains(dep) {
                    return Err(FleetError::Manifest(format!(
                        "package {} depends on unknown package {}",
                        key, dep
                    )));
                }
            }
            if let Some(artifact) = &package.artifact {
                if artifact.build.is_empty() {
                    return Err(FleetError::Manifest(format!(
                        "package {} has an empty build command",
                        key
                    )));
                }
            }
            if let Some(Some(install)) = package.executable.as_ref().map(|e| &e.install) {
                if install.is_empty() {
                    return Err(FleetError::Manifest(format!(
                        "package {} has an empty install command",
                        key
                    )));
                }
            }
        }

        Ok(())
    }
}
