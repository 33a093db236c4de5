//! 跨命名空间重复变量检测

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::domain::variable::{Namespace, ParameterSet};

/// 在多个命名空间中出现的变量
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Duplicate {
    pub key: String,
    pub namespaces: Vec<Namespace>,
}

impl fmt::Display for Duplicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<&str> = self.namespaces.iter().map(Namespace::as_str).collect();
        write!(f, "{} declared in {}", self.key, types.join(", "))
    }
}

/// 两两比较四个命名空间，找出重复的名称
pub fn find_duplicates(set: &ParameterSet) -> Vec<Duplicate> {
    let mut found: BTreeMap<String, BTreeSet<Namespace>> = BTreeMap::new();

    for (i, left) in Namespace::ALL.iter().enumerate() {
        for right in &Namespace::ALL[i + 1..] {
            for record in set.namespace(*left) {
                if set.contains(*right, &record.name) {
                    let entry = found.entry(record.name.clone()).or_default();
                    entry.insert(*left);
                    entry.insert(*right);
                }
            }
        }
    }

    found
        .into_iter()
        .map(|(key, namespaces)| Duplicate {
            key,
            namespaces: namespaces.into_iter().collect(),
        })
        .collect()
}

/// 重复导致的计数膨胀：每个出现在 k 个命名空间的名称多计 k - 1
pub fn duplicate_adjustment(duplicates: &[Duplicate]) -> usize {
    duplicates
        .iter()
        .map(|d| d.namespaces.len().saturating_sub(1))
        .sum()
}
