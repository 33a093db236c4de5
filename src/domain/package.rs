//! 包标识

use serde::{Deserialize, Serialize};
use std::fmt;

/// 包标识：环境 + 逻辑名称（+ 可选的子组件/实例）
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId {
    pub environment: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}

impl PackageId {
    pub fn new(environment: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            name: name.into(),
            component: None,
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// 清单中引用包时使用的键（`name` 或 `name/component`）
    pub fn key(&self) -> String {
        match &self.component {
            Some(component) => format!("{}/{}", self.name, component),
            None => self.name.clone(),
        }
    }

    /// 远程参数存储中的前缀
    pub fn store_prefix(&self) -> String {
        format!("/{}/{}", self.environment, self.key())
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.environment, self.key())
    }
}

/// 注册表分配的不透明句柄
///
/// 相等性与查找都基于句柄，而不是引用地址
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageHandle(pub(crate) usize);

impl PackageHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for PackageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_id_display() {
        let id = PackageId::new("prod", "api");
        assert_eq!(id.to_string(), "prod/api");
        assert_eq!(id.store_prefix(), "/prod/api");

        let id = PackageId::new("prod", "worker").with_component("eu");
        assert_eq!(id.key(), "worker/eu");
        assert_eq!(id.to_string(), "prod/worker/eu");
    }
}
