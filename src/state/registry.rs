//! 包注册表
//!
//! 每个逻辑包在一次调用中只构造一次，按标识缓存并分配不透明句柄。
//! 运行中的包会被“借出”给执行任务，完成后归还。

use std::collections::HashMap;

use crate::config::{FleetManifest, PackageDecl};
use crate::domain::{PackageHandle, PackageId};
use crate::error::{FleetError, FleetResult};
use crate::services::package::Package;

/// 包注册表
#[derive(Debug, Default)]
pub struct PackageRegistry {
    /// 句柄下标 -> 包；借出期间为 None
    packages: Vec<Option<Package>>,
    ids: Vec<PackageId>,
    index: HashMap<PackageId, PackageHandle>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从清单构建，解析部署/销毁依赖
    pub fn from_manifest(environment: &str, manifest: &FleetManifest) -> FleetResult<Self> {
        let mut registry = Self::new();
        for decl in &manifest.packages {
            let mut id = PackageId::new(environment, decl.name.clone());
            if let Some(component) = &decl.component {
                id = id.with_component(component.clone());
            }
            registry.insert(id, decl.clone());
        }

        for handle in registry.handles() {
            let (deploy_after, destroy_after) = match registry.get(handle) {
                Some(package) => (
                    package.decl.deploy_after.clone(),
                    package.decl.destroy_after.clone(),
                ),
                None => continue,
            };
            let deploy = registry.resolve(environment, &deploy_after)?;
            let destroy = registry.resolve(environment, &destroy_after)?;
            if let Some(package) = registry.get_mut(handle) {
                package.deploy_dependencies = deploy;
                package.destroy_dependencies = destroy;
            }
        }

        Ok(registry)
    }

    /// 注册包；已存在时返回已有句柄
    pub fn insert(&mut self, id: PackageId, decl: PackageDecl) -> PackageHandle {
        if let Some(handle) = self.index.get(&id) {
            return *handle;
        }
        let handle = PackageHandle(self.packages.len());
        self.packages.push(Some(Package::new(handle, id.clone(), decl)));
        self.ids.push(id.clone());
        self.index.insert(id, handle);
        handle
    }

    pub fn handle_of(&self, id: &PackageId) -> Option<PackageHandle> {
        self.index.get(id).copied()
    }

    /// 按清单键（`name` 或 `name/component`）查找
    pub fn lookup(&self, environment: &str, key: &str) -> Option<PackageHandle> {
        let id = match key.split_once('/') {
            Some((name, component)) => PackageId::new(environment, name).with_component(component),
            None => PackageId::new(environment, key),
        };
        self.handle_of(&id)
    }

    pub fn resolve(&self, environment: &str, keys: &[String]) -> FleetResult<Vec<PackageHandle>> {
        keys.iter()
            .map(|key| {
                self.lookup(environment, key)
                    .ok_or_else(|| FleetError::UnknownPackage(key.clone()))
            })
            .collect()
    }

    pub fn id(&self, handle: PackageHandle) -> Option<&PackageId> {
        self.ids.get(handle.0)
    }

    pub fn get(&self, handle: PackageHandle) -> Option<&Package> {
        self.packages.get(handle.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, handle: PackageHandle) -> Option<&mut Package> {
        self.packages.get_mut(handle.0).and_then(Option::as_mut)
    }

    /// 借出包
    pub fn checkout(&mut self, handle: PackageHandle) -> Option<Package> {
        self.packages.get_mut(handle.0).and_then(Option::take)
    }

    /// 归还包
    pub fn checkin(&mut self, package: Package) {
        let index = package.handle.0;
        if let Some(slot) = self.packages.get_mut(index) {
            *slot = Some(package);
        }
    }

    pub fn handles(&self) -> Vec<PackageHandle> {
        (0..self.packages.len()).map(PackageHandle).collect()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
