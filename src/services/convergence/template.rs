//! 模板变量展开
//!
//! 变量值可以用 `<{NAME}>` 引用其他变量。展开按不动点迭代：
//! 每一轮把“已无未解析引用”的变量代入所有引用它的值，直到某一轮没有进展。
//! 无法打破的循环保留字面占位符，并在结果中列出。

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::variable::{Namespace, ParameterSet};

pub const PLACEHOLDER_OPEN: &str = "<{";
pub const PLACEHOLDER_CLOSE: &str = "}>";

/// 以此前缀开头的值视为已保护，不解析其中的占位符
pub const PROTECTED_PREFIX: &str = "!raw:";

/// 展开结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Expansion {
    pub values: BTreeMap<String, String>,
    /// 变量 -> 仍未解析的引用
    pub unresolved: BTreeMap<String, BTreeSet<String>>,
}

/// 值中引用的变量名
pub fn references(value: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    if value.starts_with(PROTECTED_PREFIX) {
        return names;
    }
    let mut rest = value;
    while let Some(start) = rest.find(PLACEHOLDER_OPEN) {
        let after = &rest[start + PLACEHOLDER_OPEN.len()..];
        let Some(end) = after.find(PLACEHOLDER_CLOSE) else {
            break;
        };
        let name = &after[..end];
        if !name.is_empty() && !name.contains(char::is_whitespace) {
            names.insert(name.to_string());
        }
        rest = &after[end + PLACEHOLDER_CLOSE.len()..];
    }
    names
}

pub fn placeholder(name: &str) -> String {
    format!("{}{}{}", PLACEHOLDER_OPEN, name, PLACEHOLDER_CLOSE)
}

/// 展开一组 name -> value
pub fn expand(input: &BTreeMap<String, String>) -> Expansion {
    let mut values = input.clone();
    let mut pending: BTreeMap<String, BTreeSet<String>> = input
        .iter()
        .map(|(name, value)| (name.clone(), references(value)))
        .filter(|(_, refs)| !refs.is_empty())
        .collect();
    let mut substituted: BTreeSet<String> = BTreeSet::new();

    loop {
        // 本轮可代入的变量：没有未解析引用且尚未代入过
        let ready: Vec<String> = values
            .keys()
            .filter(|name| !pending.contains_key(*name) && !substituted.contains(*name))
            .cloned()
            .collect();

        let mut progress = false;
        for name in ready {
            substituted.insert(name.clone());
            let Some(value) = values.get(&name).cloned() else {
                continue;
            };
            let token = placeholder(&name);
            for (dependent, refs) in pending.iter_mut() {
                if refs.remove(&name) {
                    if let Some(target) = values.get_mut(dependent) {
                        *target = target.replace(&token, &value);
                    }
                    progress = true;
                }
            }
            pending.retain(|_, refs| !refs.is_empty());
        }

        if !progress {
            break;
        }
    }

    Expansion {
        values,
        unresolved: pending,
    }
}

/// 展开一个变量集合
///
/// 引用按命名空间优先级解析到胜出的同名变量；其余同名变量用同一份结果代入
pub fn expand_set(set: &ParameterSet) -> (ParameterSet, BTreeMap<String, BTreeSet<String>>) {
    let mut winners: BTreeMap<String, String> = BTreeMap::new();
    for ns in Namespace::PRECEDENCE.iter().rev() {
        for record in set.namespace(*ns) {
            winners.insert(record.name.clone(), record.value.clone());
        }
    }

    let expansion = expand(&winners);
    let resolved: BTreeMap<&str, &str> = expansion
        .values
        .iter()
        .filter(|(name, _)| !expansion.unresolved.contains_key(*name))
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();

    let mut expanded = set.clone();
    for record in expanded.iter_mut() {
        let is_winner = set
            .find(&record.name)
            .is_some_and(|winner| winner.namespace == record.namespace);
        if is_winner {
            if let Some(value) = expansion.values.get(&record.name) {
                record.value = value.clone();
            }
            continue;
        }
        for name in references(&record.value) {
            if let Some(value) = resolved.get(name.as_str()) {
                record.value = record.value.replace(&placeholder(&name), value);
            }
        }
    }

    (expanded, expansion.unresolved)
}
