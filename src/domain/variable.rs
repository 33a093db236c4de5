//! 配置变量领域模型
//!
//! 每个包有三组变量：本地声明 (local)、已推送 (pushed)、已生效 (materialized)，
//! 每组都按四个命名空间划分。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 变量命名空间
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Namespace {
    App,
    Environment,
    Global,
    GlobalEnv,
}

impl Namespace {
    /// 全部命名空间（声明顺序）
    pub const ALL: [Namespace; 4] = [
        Namespace::App,
        Namespace::Environment,
        Namespace::Global,
        Namespace::GlobalEnv,
    ];

    /// 同名变量在生效配置中的优先级（靠前者胜出）
    pub const PRECEDENCE: [Namespace; 4] = [
        Namespace::App,
        Namespace::Environment,
        Namespace::GlobalEnv,
        Namespace::Global,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::App => "app",
            Namespace::Environment => "environment",
            Namespace::Global => "global",
            Namespace::GlobalEnv => "globalEnv",
        }
    }

    /// 从存储路径中的段解析
    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ns| ns.as_str() == segment)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 变量类型
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VarType {
    #[default]
    String,
    SecureString,
    StringList,
}

impl VarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarType::String => "String",
            VarType::SecureString => "SecureString",
            VarType::StringList => "StringList",
        }
    }
}

/// 单个变量
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariableRecord {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", default)]
    pub var_type: VarType,
    pub namespace: Namespace,
}

impl VariableRecord {
    pub fn new(
        namespace: Namespace,
        name: impl Into<String>,
        value: impl Into<String>,
        var_type: VarType,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            var_type,
            namespace,
        }
    }

    /// 在包前缀下的存储路径
    pub fn store_path(&self, vars_prefix: &str) -> String {
        format!("{}/{}/{}", vars_prefix, self.namespace, self.name)
    }
}

/// 变量集合：name -> VariableRecord，按命名空间划分
///
/// 同一个名称在多个命名空间出现是“重复”，由收敛引擎标记，不会被静默合并
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSet {
    vars: BTreeMap<Namespace, BTreeMap<String, VariableRecord>>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入变量，返回同命名空间下被替换的旧值
    pub fn insert(&mut self, record: VariableRecord) -> Option<VariableRecord> {
        self.vars
            .entry(record.namespace)
            .or_default()
            .insert(record.name.clone(), record)
    }

    pub fn get(&self, namespace: Namespace, name: &str) -> Option<&VariableRecord> {
        self.vars.get(&namespace).and_then(|vars| vars.get(name))
    }

    /// 按优先级跨命名空间查找
    pub fn find(&self, name: &str) -> Option<&VariableRecord> {
        Namespace::PRECEDENCE
            .iter()
            .find_map(|ns| self.get(*ns, name))
    }

    pub fn contains(&self, namespace: Namespace, name: &str) -> bool {
        self.get(namespace, name).is_some()
    }

    /// 某个命名空间下的变量（按名称排序）
    pub fn namespace(&self, namespace: Namespace) -> impl Iterator<Item = &VariableRecord> {
        self.vars.get(&namespace).into_iter().flat_map(|vars| vars.values())
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableRecord> {
        self.vars.values().flat_map(|vars| vars.values())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VariableRecord> {
        self.vars.values_mut().flat_map(|vars| vars.values_mut())
    }

    pub fn total(&self) -> usize {
        self.vars.values().map(|vars| vars.len()).sum()
    }

    pub fn total_in(&self, namespace: Namespace) -> usize {
        self.vars.get(&namespace).map_or(0, |vars| vars.len())
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl FromIterator<VariableRecord> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = VariableRecord>>(iter: I) -> Self {
        let mut set = ParameterSet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}
