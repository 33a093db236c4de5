//! 模块检查结果

use serde::Serialize;

/// 检查发现：按严重程度分桶
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct Findings {
    /// 需要人工修复（重复变量、失败的堆栈等）
    pub needs_fix: Vec<String>,
    /// 已部署内容的描述
    pub deployed: Vec<String>,
    /// 部署未完成（已推送未生效、堆栈进行中等）
    pub incomplete: Vec<String>,
}

impl Findings {
    pub fn clear(&mut self) {
        self.needs_fix.clear();
        self.deployed.clear();
        self.incomplete.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.needs_fix.is_empty() && self.deployed.is_empty() && self.incomplete.is_empty()
    }

    pub fn needs_fix(&mut self, message: impl Into<String>) {
        self.needs_fix.push(message.into());
    }

    pub fn deployed(&mut self, message: impl Into<String>) {
        self.deployed.push(message.into());
    }

    pub fn incomplete(&mut self, message: impl Into<String>) {
        self.incomplete.push(message.into());
    }
}

/// 版本三元组：声明版本 / 构建版本 / 当前部署版本
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct VersionTriple {
    pub declared: Option<String>,
    pub build: Option<String>,
    pub current: Option<String>,
}

impl VersionTriple {
    pub fn declared(version: impl Into<String>) -> Self {
        Self {
            declared: Some(version.into()),
            build: None,
            current: None,
        }
    }

    /// 清除计算字段，保留声明版本
    pub fn reset(&mut self) {
        self.build = None;
        self.current = None;
    }
}
