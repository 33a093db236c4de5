//! 参数收敛引擎
//!
//! 对每个包比较三组变量：本地声明 (local)、已推送 (pushed)、已生效 (materialized)。
//! 三组先各自展开模板、解密密文，再逐一比较。

pub mod duplicates;
pub mod template;

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, warn};

use crate::domain::variable::{Namespace, ParameterSet, VariableRecord};
use crate::infra::kms::{is_ciphertext, KeyManagement};

pub use duplicates::{duplicate_adjustment, find_duplicates, Duplicate};
pub use template::{expand, expand_set, Expansion};

/// 变量引用（命名空间 + 名称）
#[derive(Clone, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct VarKey {
    pub namespace: Namespace,
    pub name: String,
}

impl VarKey {
    fn of(record: &VariableRecord) -> Self {
        Self {
            namespace: record.namespace,
            name: record.name.clone(),
        }
    }
}

impl fmt::Display for VarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// 值不一致时对比的一方
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Pushed,
    Materialized,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Mismatch {
    pub var: VarKey,
    pub against: Side,
}

/// 四个命名空间的计数
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct NamespaceTotals(BTreeMap<Namespace, usize>);

impl NamespaceTotals {
    fn of(set: &ParameterSet) -> Self {
        Self(
            Namespace::ALL
                .iter()
                .map(|ns| (*ns, set.total_in(*ns)))
                .collect(),
        )
    }

    pub fn get(&self, namespace: Namespace) -> usize {
        self.0.get(&namespace).copied().unwrap_or(0)
    }

    pub fn sum(&self) -> usize {
        self.0.values().sum()
    }
}

/// 收敛检查结果
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ConvergenceReport {
    /// 本地有、未推送（需要推送）
    pub local_only: Vec<VarKey>,
    /// 已推送但未生效
    pub not_found_in_materialization: Vec<VarKey>,
    /// 已生效但存储中没有推送记录（需要补推送）
    pub materialized_not_pushed: Vec<VarKey>,
    /// 已推送且已生效，但本地不再声明
    pub deployed_only: Vec<VarKey>,
    /// 已推送，本地未声明，也未生效
    pub local_not_found: Vec<VarKey>,
    /// 只存在于生效配置中的名称
    pub materialized_only: Vec<String>,
    pub mismatches: Vec<Mismatch>,
    pub duplicates: Vec<Duplicate>,
    /// 变量 -> 仍未解析的模板引用
    pub unresolved_templates: BTreeMap<String, BTreeSet<String>>,
    pub local_totals: NamespaceTotals,
    pub pushed_totals: NamespaceTotals,
    pub materialized_total: usize,
    /// 扣除重复后应生效的数量
    pub expected_materialized: usize,
}

impl ConvergenceReport {
    /// 计数完全一致且没有任何差异
    ///
    /// 重复与未解析模板由参数模块作为 needs_fix 单独处理，不在这里判定
    pub fn vars_up_to_date(&self) -> bool {
        self.local_totals == self.pushed_totals
            && self.materialized_total == self.expected_materialized
            && self.local_only.is_empty()
            && self.not_found_in_materialization.is_empty()
            && self.materialized_not_pushed.is_empty()
            && self.deployed_only.is_empty()
            && self.local_not_found.is_empty()
            && self.materialized_only.is_empty()
            && self.mismatches.is_empty()
    }

    /// 推送侧是否有任何内容
    pub fn anything_pushed(&self) -> bool {
        self.pushed_totals.sum() > 0 || self.materialized_total > 0
    }

    /// 需要推送的本地变量（缺失或与已推送值不同）
    pub fn needs_push(&self) -> BTreeSet<VarKey> {
        self.local_only
            .iter()
            .chain(&self.materialized_not_pushed)
            .cloned()
            .chain(
                self.mismatches
                    .iter()
                    .filter(|m| m.against == Side::Pushed)
                    .map(|m| m.var.clone()),
            )
            .collect()
    }

    /// 需要从存储删除的已推送变量
    pub fn needs_delete(&self) -> Vec<VarKey> {
        self.deployed_only
            .iter()
            .chain(&self.local_not_found)
            .cloned()
            .collect()
    }
}

/// 已解密值缓存；解密失败的密文记为 None，按原文比较
#[derive(Default)]
struct Plaintexts(HashMap<String, Option<String>>);

impl Plaintexts {
    async fn collect(kms: &dyn KeyManagement, sets: [&ParameterSet; 3]) -> Self {
        let mut cache: HashMap<String, Option<String>> = HashMap::new();
        for set in sets {
            for record in set.iter() {
                if !is_ciphertext(&record.value) || cache.contains_key(&record.value) {
                    continue;
                }
                let plaintext = match kms.decrypt(&record.value).await {
                    Ok(plaintext) => Some(plaintext),
                    Err(e) => {
                        warn!(variable = %record.name, error = %e, "Failed to decrypt value, comparing as opaque");
                        None
                    }
                };
                cache.insert(record.value.clone(), plaintext);
            }
        }
        Self(cache)
    }

    fn comparable<'a>(&'a self, value: &'a str) -> &'a str {
        match self.0.get(value) {
            Some(Some(plaintext)) => plaintext,
            _ => value,
        }
    }

    fn same(&self, left: &str, right: &str) -> bool {
        self.comparable(left) == self.comparable(right)
    }
}

/// 三方比较：展开模板、解密后计算差异
pub async fn check_vars_up_to_date(
    local: &ParameterSet,
    pushed: &ParameterSet,
    materialized: &ParameterSet,
    kms: &dyn KeyManagement,
) -> ConvergenceReport {
    let (local_expanded, unresolved) = expand_set(local);
    let (pushed_expanded, _) = expand_set(pushed);
    let (materialized_expanded, _) = expand_set(materialized);

    let plaintexts =
        Plaintexts::collect(kms, [&local_expanded, &pushed_expanded, &materialized_expanded]).await;

    let mut report = compare(&local_expanded, &pushed_expanded, &materialized_expanded, |a, b| {
        plaintexts.same(a, b)
    });
    report.unresolved_templates = unresolved;

    debug!(
        local = report.local_totals.sum(),
        pushed = report.pushed_totals.sum(),
        materialized = report.materialized_total,
        expected = report.expected_materialized,
        up_to_date = report.vars_up_to_date(),
        "Compared parameter sets"
    );
    report
}

/// 纯比较：输入已展开，`same` 判断两个值是否相等
pub fn compare<F>(
    local: &ParameterSet,
    pushed: &ParameterSet,
    materialized: &ParameterSet,
    same: F,
) -> ConvergenceReport
where
    F: Fn(&str, &str) -> bool,
{
    let duplicates = find_duplicates(local);
    let mut report = ConvergenceReport {
        local_totals: NamespaceTotals::of(local),
        pushed_totals: NamespaceTotals::of(pushed),
        materialized_total: materialized.total(),
        expected_materialized: local.total().saturating_sub(duplicate_adjustment(&duplicates)),
        duplicates,
        ..Default::default()
    };

    for record in local.iter() {
        let key = VarKey::of(record);
        let in_pushed = pushed.get(record.namespace, &record.name);
        let in_materialized = materialized.find(&record.name);

        match (in_pushed, in_materialized) {
            (None, None) => report.local_only.push(key.clone()),
            (None, Some(_)) => report.materialized_not_pushed.push(key.clone()),
            (Some(_), None) => report.not_found_in_materialization.push(key.clone()),
            (Some(_), Some(_)) => {}
        }

        if let Some(remote) = in_pushed {
            if !same(&record.value, &remote.value) {
                report.mismatches.push(Mismatch {
                    var: key.clone(),
                    against: Side::Pushed,
                });
            }
        }

        // 生效配置中同名只保留一条，只与本地胜出的那条比较
        let is_winner = local
            .find(&record.name)
            .is_some_and(|winner| winner.namespace == record.namespace);
        if let (true, Some(active)) = (is_winner, in_materialized) {
            if !same(&record.value, &active.value) {
                report.mismatches.push(Mismatch {
                    var: key,
                    against: Side::Materialized,
                });
            }
        }
    }

    for record in pushed.iter() {
        if local.contains(record.namespace, &record.name) {
            continue;
        }
        let key = VarKey::of(record);
        if materialized.find(&record.name).is_some() {
            report.deployed_only.push(key);
        } else {
            report.local_not_found.push(key);
        }
    }

    report.materialized_only = materialized
        .iter()
        .filter(|r| local.find(&r.name).is_none() && pushed.find(&r.name).is_none())
        .map(|r| r.name.clone())
        .collect();

    report
}
