//! 依赖图
//!
//! 包 -> 尚未满足的前置包集合。只有存在未满足依赖时才有条目，集合为空即删除。
//! 销毁模式下部署边反向：声明 “A 部署在 B 之后” 表示 “A 必须先于 B 销毁”。

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::domain::{PackageHandle, RunMode};
use crate::error::{FleetError, FleetResult};
use crate::state::PackageRegistry;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    entries: HashMap<PackageHandle, BTreeSet<PackageHandle>>,
}

impl DependencyGraph {
    /// 为一次运行构建依赖图，只保留本次运行内的包之间的边
    pub fn build(
        registry: &PackageRegistry,
        run: &[PackageHandle],
        mode: RunMode,
    ) -> FleetResult<Self> {
        let members: HashSet<PackageHandle> = run.iter().copied().collect();
        let mut graph = Self::default();

        for &handle in run {
            let Some(package) = registry.get(handle) else {
                continue;
            };
            match mode {
                RunMode::Deploy => {
                    for dep in &package.deploy_dependencies {
                        graph.add_edge(handle, *dep, &members);
                    }
                }
                RunMode::Destroy => {
                    for dep in &package.destroy_dependencies {
                        graph.add_edge(handle, *dep, &members);
                    }
                    // 依赖本包部署的包要先销毁
                    for dep in &package.deploy_dependencies {
                        graph.add_edge(*dep, handle, &members);
                    }
                }
            }
        }

        if let Some(cycle) = graph.find_cycle() {
            let names = cycle
                .iter()
                .map(|h| registry.id(*h).map_or_else(|| h.to_string(), |id| id.key()))
                .collect();
            return Err(FleetError::DependencyCycle(names));
        }

        Ok(graph)
    }

    fn add_edge(
        &mut self,
        owner: PackageHandle,
        dependency: PackageHandle,
        members: &HashSet<PackageHandle>,
    ) {
        if owner == dependency || !members.contains(&owner) || !members.contains(&dependency) {
            return;
        }
        self.entries.entry(owner).or_default().insert(dependency);
    }

    /// 直接由边构建（测试与外部调用方使用）
    pub fn from_edges(edges: &[(PackageHandle, PackageHandle)]) -> Self {
        let mut graph = Self::default();
        for (owner, dependency) in edges {
            if owner != dependency {
                graph.entries.entry(*owner).or_default().insert(*dependency);
            }
        }
        graph
    }

    pub fn dependencies(&self, handle: PackageHandle) -> Option<&BTreeSet<PackageHandle>> {
        self.entries.get(&handle)
    }

    /// 没有未满足的依赖
    pub fn is_ready(&self, handle: PackageHandle) -> bool {
        !self.entries.contains_key(&handle)
    }

    /// 前置包完成：从所有集合中移除，删除变空的条目，返回因此就绪的包
    pub fn resolve(&mut self, completed: PackageHandle) -> Vec<PackageHandle> {
        let mut ready = Vec::new();
        for (owner, deps) in self.entries.iter_mut() {
            if deps.remove(&completed) && deps.is_empty() {
                ready.push(*owner);
            }
        }
        self.entries.retain(|_, deps| !deps.is_empty());
        ready.sort();
        ready
    }

    /// 直接依赖 `handle` 的包
    pub fn dependents_of(&self, handle: PackageHandle) -> Vec<PackageHandle> {
        let mut owners: Vec<PackageHandle> = self
            .entries
            .iter()
            .filter(|(_, deps)| deps.contains(&handle))
            .map(|(owner, _)| *owner)
            .collect();
        owners.sort();
        owners
    }

    pub fn remove(&mut self, handle: PackageHandle) {
        self.entries.remove(&handle);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 深度优先查找环，返回首尾相同的路径
    pub fn find_cycle(&self) -> Option<Vec<PackageHandle>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            graph: &DependencyGraph,
            node: PackageHandle,
            marks: &mut HashMap<PackageHandle, Mark>,
            path: &mut Vec<PackageHandle>,
        ) -> Option<Vec<PackageHandle>> {
            match marks.get(&node) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|h| *h == node).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(node);
                    return Some(cycle);
                }
                None => {}
            }

            marks.insert(node, Mark::Visiting);
            path.push(node);
            if let Some(deps) = graph.entries.get(&node) {
                for dep in deps {
                    if let Some(cycle) = visit(graph, *dep, marks, path) {
                        return Some(cycle);
                    }
                }
            }
            path.pop();
            marks.insert(node, Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        let mut roots: Vec<PackageHandle> = self.entries.keys().copied().collect();
        roots.sort();
        for root in roots {
            let mut path = Vec::new();
            if let Some(cycle) = visit(self, root, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetManifest;

    fn h(i: usize) -> PackageHandle {
        PackageHandle(i)
    }

    fn registry(json: &str) -> PackageRegistry {
        PackageRegistry::from_manifest("dev", &FleetManifest::from_json(json).unwrap()).unwrap()
    }

    const CHAIN: &str = r#"{ "packages": [
        { "name": "network" },
        { "name": "cert", "deploy_after": ["network"] },
        { "name": "api", "deploy_after": ["cert"] }
    ] }"#;

    #[test]
    fn test_deploy_edges() {
        let registry = registry(CHAIN);
        let run = registry.handles();
        let graph = DependencyGraph::build(&registry, &run, RunMode::Deploy).unwrap();

        assert!(graph.is_ready(h(0)));
        assert_eq!(graph.dependencies(h(1)).unwrap(), &BTreeSet::from([h(0)]));
        assert_eq!(graph.dependencies(h(2)).unwrap(), &BTreeSet::from([h(1)]));
    }

    #[test]
    fn test_destroy_reverses_edges() {
        let registry = registry(CHAIN);
        let run = registry.handles();
        let graph = DependencyGraph::build(&registry, &run, RunMode::Destroy).unwrap();

        assert!(graph.is_ready(h(2)));
        assert_eq!(graph.dependencies(h(0)).unwrap(), &BTreeSet::from([h(1)]));
        assert_eq!(graph.dependencies(h(1)).unwrap(), &BTreeSet::from([h(2)]));
    }

    #[test]
    fn test_edges_outside_run_are_dropped() {
        let registry = registry(CHAIN);
        let graph = DependencyGraph::build(&registry, &[h(1), h(2)], RunMode::Deploy).unwrap();
        assert!(graph.is_ready(h(1)));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_resolve_deletes_empty_entries() {
        let mut graph = DependencyGraph::from_edges(&[(h(2), h(0)), (h(2), h(1)), (h(3), h(1))]);

        assert_eq!(graph.resolve(h(1)), vec![h(3)]);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.resolve(h(0)), vec![h(2)]);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_cycle_is_rejected() {
        let registry = registry(
            r#"{ "packages": [
                { "name": "a", "deploy_after": ["c"] },
                { "name": "b", "deploy_after": ["a"] },
                { "name": "c", "deploy_after": ["b"] }
            ] }"#,
        );
        let err = DependencyGraph::build(&registry, &registry.handles(), RunMode::Deploy).unwrap_err();
        match err {
            FleetError::DependencyCycle(path) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_dependents_of() {
        let graph = DependencyGraph::from_edges(&[(h(1), h(0)), (h(2), h(0)), (h(3), h(2))]);
        assert_eq!(graph.dependents_of(h(0)), vec![h(1), h(2)]);
        assert!(graph.dependents_of(h(3)).is_empty());
    }
}
