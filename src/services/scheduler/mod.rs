//! 依赖图调度器
//!
//! 有界并发的拓扑任务执行器：
//! - `start()`: 从队列中挑出没有未满足依赖的包，按入队顺序派发，直到达到并发上限
//! - `complete()`: 记录终态；成功则从依赖图中解除，失败/取消则级联取消所有传递依赖者
//!
//! 图、队列、运行中集合的修改都在挂起点之间同步完成；
//! 包的动作在独立任务中执行，只能通过 `ActionContext::set_status` 请求状态变更。

pub mod graph;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{PackageHandle, PackageId, ProcessStatus, RunMode, StatusEvent};
use crate::error::FleetResult;
use crate::services::package::Package;
use crate::state::{PackageRegistry, StatusHub};

pub use graph::DependencyGraph;

/// 包动作请求的状态变更
#[derive(Clone, Copy, Debug)]
pub struct StatusUpdate {
    pub handle: PackageHandle,
    pub status: ProcessStatus,
}

/// 传给包动作的上下文
#[derive(Clone)]
pub struct ActionContext {
    pub handle: PackageHandle,
    pub mode: RunMode,
    /// 本包的取消令牌（运行根令牌的子令牌）
    pub cancel: CancellationToken,
    status_tx: mpsc::UnboundedSender<StatusUpdate>,
}

impl ActionContext {
    pub fn new(
        handle: PackageHandle,
        mode: RunMode,
        cancel: CancellationToken,
        status_tx: mpsc::UnboundedSender<StatusUpdate>,
    ) -> Self {
        Self {
            handle,
            mode,
            cancel,
            status_tx,
        }
    }

    /// 请求调度器更新进程状态
    pub fn set_status(&self, status: ProcessStatus) {
        let _ = self.status_tx.send(StatusUpdate {
            handle: self.handle,
            status,
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// 包动作执行器
#[async_trait]
pub trait PackageExecutor: Send + Sync {
    /// 执行部署或销毁，返回终态
    async fn execute(&self, package: &mut Package, ctx: &ActionContext) -> ProcessStatus;
}

/// 调度选项
#[derive(Clone, Copy, Debug)]
pub struct SchedulerOptions {
    /// 同时处理的包数上限（None 表示不限）
    pub max_processing: Option<usize>,
    /// 关闭时忽略依赖，所有包立即就绪
    pub track_dependencies: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_processing: None,
            track_dependencies: true,
        }
    }
}

/// 运行结果
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: RunMode,
    pub completed: Vec<PackageId>,
    pub failed: Vec<PackageId>,
    pub cancelled: Vec<PackageId>,
    /// 运行期间同时处理的最大包数
    pub max_in_flight: usize,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }
}

/// 调度器，每次运行一个实例
pub struct Scheduler {
    run_id: String,
    mode: RunMode,
    options: SchedulerOptions,
    to_process: VecDeque<PackageHandle>,
    processing: BTreeSet<PackageHandle>,
    graph: DependencyGraph,
    completed: Vec<PackageHandle>,
    failed: Vec<PackageHandle>,
    cancelled: Vec<PackageHandle>,
    statuses: HashMap<PackageHandle, ProcessStatus>,
    ids: HashMap<PackageHandle, PackageId>,
    hub: Option<Arc<StatusHub>>,
    max_in_flight: usize,
}

/// 运行循环中的事件
enum RunEvent {
    Cancelled,
    Status(StatusUpdate),
    Joined(Result<(PackageHandle, Option<Package>, ProcessStatus), tokio::task::JoinError>),
    Idle,
}

impl Scheduler {
    pub fn new(mode: RunMode, options: SchedulerOptions) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            mode,
            options,
            to_process: VecDeque::new(),
            processing: BTreeSet::new(),
            graph: DependencyGraph::default(),
            completed: Vec::new(),
            failed: Vec::new(),
            cancelled: Vec::new(),
            statuses: HashMap::new(),
            ids: HashMap::new(),
            hub: None,
            max_in_flight: 0,
        }
    }

    /// 状态变更同时发布到状态中心
    pub fn with_hub(mut self, hub: Arc<StatusHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// 入队并构建依赖图；存在环时拒绝
    pub fn enqueue(&mut self, registry: &PackageRegistry, handles: &[PackageHandle]) -> FleetResult<()> {
        let graph = if self.options.track_dependencies {
            DependencyGraph::build(registry, handles, self.mode)?
        } else {
            DependencyGraph::default()
        };
        for handle in handles {
            if let Some(id) = registry.id(*handle) {
                self.ids.insert(*handle, id.clone());
            }
        }
        self.enqueue_graph(handles, graph);
        Ok(())
    }

    /// 使用已构建的依赖图入队
    pub fn enqueue_graph(&mut self, handles: &[PackageHandle], graph: DependencyGraph) {
        for handle in handles {
            if !self.to_process.contains(handle) {
                self.to_process.push_back(*handle);
            }
        }
        self.graph = graph;
    }

    /// 记录无需处理、已处于目标状态的包
    pub fn record_completed(&mut self, handle: PackageHandle, id: PackageId) {
        self.ids.insert(handle, id);
        self.set_status(handle, ProcessStatus::Completed);
        self.completed.push(handle);
    }

    /// 派发就绪的包，返回本次派发的句柄（按入队顺序）
    pub fn start(&mut self) -> Vec<PackageHandle> {
        let candidates: Vec<PackageHandle> = self
            .to_process
            .iter()
            .copied()
            .filter(|h| !self.processing.contains(h))
            .collect();
        let (ready, blocked): (Vec<PackageHandle>, Vec<PackageHandle>) = candidates
            .into_iter()
            .partition(|h| !self.options.track_dependencies || self.graph.is_ready(*h));

        let capacity = match self.options.max_processing {
            Some(cap) => cap.saturating_sub(self.processing.len()),
            None => usize::MAX,
        };

        let dispatched: Vec<PackageHandle> = ready.iter().copied().take(capacity).collect();
        for handle in &dispatched {
            self.processing.insert(*handle);
            self.to_process.retain(|h| h != handle);
            self.set_status(*handle, ProcessStatus::Processing);
        }
        for handle in ready.iter().skip(dispatched.len()) {
            self.set_status(*handle, ProcessStatus::Ready);
        }
        for handle in blocked {
            if self.status(handle) != Some(ProcessStatus::Cancelled) {
                self.set_status(handle, ProcessStatus::HasPrereqs);
            }
        }

        self.max_in_flight = self.max_in_flight.max(self.processing.len());
        if !dispatched.is_empty() {
            debug!(
                mode = %self.mode,
                dispatched = dispatched.len(),
                processing = self.processing.len(),
                queued = self.to_process.len(),
                "Dispatched packages"
            );
        }
        dispatched
    }

    /// 包动作结束，返回因此派发的新包
    pub fn complete(&mut self, handle: PackageHandle, status: ProcessStatus) -> Vec<PackageHandle> {
        self.processing.remove(&handle);
        self.to_process.retain(|h| *h != handle);

        let status = if status.is_terminal() {
            status
        } else {
            warn!(package = %self.name(handle), status = %status, "Action ended without a terminal status");
            ProcessStatus::Failed
        };
        self.set_status(handle, status);

        match status {
            ProcessStatus::Completed => {
                self.graph.resolve(handle);
                self.completed.push(handle);
                info!(package = %self.name(handle), mode = %self.mode, "Package completed");
            }
            ProcessStatus::Failed => {
                self.failed.push(handle);
                error!(package = %self.name(handle), mode = %self.mode, "Package failed");
                self.cascade_cancel(handle);
            }
            _ => {
                self.cancelled.push(handle);
                warn!(package = %self.name(handle), mode = %self.mode, "Package cancelled");
                self.cascade_cancel(handle);
            }
        }

        self.start()
    }

    /// 广度优先取消所有传递依赖者
    fn cascade_cancel(&mut self, root: PackageHandle) {
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            for owner in self.graph.dependents_of(current) {
                self.graph.remove(owner);
                self.to_process.retain(|h| *h != owner);
                if self.status(owner) != Some(ProcessStatus::Cancelled) {
                    self.set_status(owner, ProcessStatus::Cancelled);
                    self.cancelled.push(owner);
                    warn!(
                        package = %self.name(owner),
                        prerequisite = %self.name(current),
                        "Cancelled because a prerequisite did not complete"
                    );
                }
                queue.push_back(owner);
            }
        }
        self.graph.remove(root);
    }

    /// 取消队列中所有尚未派发的包
    pub fn cancel_queued(&mut self, reason: &str) {
        let queued: Vec<PackageHandle> = self.to_process.drain(..).collect();
        for handle in queued {
            self.graph.remove(handle);
            if self.status(handle) != Some(ProcessStatus::Cancelled) {
                self.set_status(handle, ProcessStatus::Cancelled);
                self.cancelled.push(handle);
            }
            warn!(package = %self.name(handle), reason, "Cancelled queued package");
        }
    }

    /// 包动作请求的非终态更新；已到终态的包忽略
    pub fn update_status(&mut self, handle: PackageHandle, status: ProcessStatus) {
        match self.status(handle) {
            Some(current) if current.is_terminal() => {
                debug!(package = %self.name(handle), status = %status, "Ignoring update for finished package");
            }
            _ => self.set_status(handle, status),
        }
    }

    fn set_status(&mut self, handle: PackageHandle, status: ProcessStatus) {
        if self.statuses.insert(handle, status) == Some(status) {
            return;
        }
        if let (Some(hub), Some(id)) = (&self.hub, self.ids.get(&handle)) {
            hub.publish(StatusEvent::process(id.clone(), status));
        }
    }

    pub fn status(&self, handle: PackageHandle) -> Option<ProcessStatus> {
        self.statuses.get(&handle).copied()
    }

    fn name(&self, handle: PackageHandle) -> String {
        self.ids
            .get(&handle)
            .map_or_else(|| handle.to_string(), ToString::to_string)
    }

    /// 队列与运行中集合为空，且（跟踪依赖时）依赖图为空
    pub fn is_finished(&self) -> bool {
        self.to_process.is_empty()
            && self.processing.is_empty()
            && (!self.options.track_dependencies || self.graph.is_empty())
    }

    pub fn completed(&self) -> &[PackageHandle] {
        &self.completed
    }

    pub fn failed(&self) -> &[PackageHandle] {
        &self.failed
    }

    pub fn cancelled(&self) -> &[PackageHandle] {
        &self.cancelled
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// 执行整个运行，直到所有包到达终态
    ///
    /// 取消 `cancel` 后不再派发，队列中的包标记为 CANCELLED；
    /// 运行中的动作通过子令牌收到取消信号。
    pub async fn run(
        &mut self,
        registry: &mut PackageRegistry,
        executor: Arc<dyn PackageExecutor>,
        cancel: CancellationToken,
    ) -> RunSummary {
        let (status_tx, mut status_rx) = mpsc::unbounded_channel::<StatusUpdate>();
        let mut tasks: JoinSet<(PackageHandle, Option<Package>, ProcessStatus)> = JoinSet::new();
        let mut cancel_seen = false;

        info!(
            run_id = %self.run_id,
            mode = %self.mode,
            queued = self.to_process.len(),
            "Run started"
        );
        let ready = self.start();
        self.spawn_ready(ready, registry, &executor, &status_tx, &cancel, &mut tasks);

        loop {
            if cancel.is_cancelled() && !cancel_seen {
                cancel_seen = true;
                self.cancel_queued("run cancelled");
            }
            if self.is_finished() {
                break;
            }
            if tasks.is_empty() {
                // 没有运行中的动作却仍未结束：剩余包的依赖无法满足
                self.abandon_stalled();
                continue;
            }

            let event = tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancel_seen => RunEvent::Cancelled,
                Some(update) = status_rx.recv() => RunEvent::Status(update),
                Some(joined) = tasks.join_next() => RunEvent::Joined(joined),
                else => RunEvent::Idle,
            };

            match event {
                RunEvent::Cancelled | RunEvent::Idle => {}
                RunEvent::Status(update) => self.update_status(update.handle, update.status),
                RunEvent::Joined(Ok((handle, package, status))) => {
                    match package {
                        Some(mut package) => {
                            package.process_status = status;
                            registry.checkin(package);
                        }
                        None => error!(package = %self.name(handle), "Package state lost after action panic"),
                    }
                    let ready = self.complete(handle, status);
                    self.spawn_ready(ready, registry, &executor, &status_tx, &cancel, &mut tasks);
                }
                RunEvent::Joined(Err(e)) => {
                    error!(error = %e, "Package task failed to join");
                }
            }
        }

        for (handle, status) in &self.statuses {
            if let Some(package) = registry.get_mut(*handle) {
                package.process_status = *status;
            }
        }

        let summary = self.summary();
        info!(
            run_id = %summary.run_id,
            mode = %self.mode,
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            cancelled = summary.cancelled.len(),
            "Run finished"
        );
        summary
    }

    /// 派发就绪的包；运行已取消时直接记为 CANCELLED
    fn spawn_ready(
        &mut self,
        ready: Vec<PackageHandle>,
        registry: &mut PackageRegistry,
        executor: &Arc<dyn PackageExecutor>,
        status_tx: &mpsc::UnboundedSender<StatusUpdate>,
        cancel: &CancellationToken,
        tasks: &mut JoinSet<(PackageHandle, Option<Package>, ProcessStatus)>,
    ) {
        let mut pending: VecDeque<PackageHandle> = ready.into();
        while let Some(handle) = pending.pop_front() {
            if cancel.is_cancelled() {
                pending.extend(self.complete(handle, ProcessStatus::Cancelled));
                continue;
            }
            let Some(mut package) = registry.checkout(handle) else {
                error!(package = %self.name(handle), "Package is not available in the registry");
                pending.extend(self.complete(handle, ProcessStatus::Failed));
                continue;
            };

            package.process_status = ProcessStatus::Processing;
            let ctx = ActionContext::new(handle, self.mode, cancel.child_token(), status_tx.clone());
            let executor = executor.clone();
            tasks.spawn(async move {
                // 内层任务 panic 时仍能知道是哪个包
                let inner = tokio::spawn(async move {
                    let status = executor.execute(&mut package, &ctx).await;
                    (package, status)
                });
                match inner.await {
                    Ok((package, status)) => (handle, Some(package), status),
                    Err(e) => {
                        error!(package = %handle, error = %e, "Package action panicked");
                        (handle, None, ProcessStatus::Failed)
                    }
                }
            });
        }
    }

    /// 没有运行中的动作时：取消排队的包，并把没有任务的运行中包记为失败
    fn abandon_stalled(&mut self) {
        self.cancel_queued("blocked by unresolved dependencies");
        let orphaned: Vec<PackageHandle> = self.processing.iter().copied().collect();
        for handle in orphaned {
            self.processing.remove(&handle);
            self.set_status(handle, ProcessStatus::Failed);
            self.failed.push(handle);
        }
        self.graph = DependencyGraph::default();
    }

    pub fn summary(&self) -> RunSummary {
        let ids = |handles: &[PackageHandle]| -> Vec<PackageId> {
            handles
                .iter()
                .filter_map(|h| self.ids.get(h).cloned())
                .collect()
        };
        RunSummary {
            run_id: self.run_id.clone(),
            mode: self.mode,
            completed: ids(&self.completed),
            failed: ids(&self.failed),
            cancelled: ids(&self.cancelled),
            max_in_flight: self.max_in_flight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetManifest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn h(i: usize) -> PackageHandle {
        PackageHandle(i)
    }

    /// 按包名返回预设结果的执行器
    struct ScriptedExecutor {
        outcomes: HashMap<String, ProcessStatus>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        order: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(outcomes: &[(&str, ProcessStatus)], delay: Duration) -> Self {
            Self {
                outcomes: outcomes
                    .iter()
                    .map(|(name, status)| (name.to_string(), *status))
                    .collect(),
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                order: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PackageExecutor for ScriptedExecutor {
        async fn execute(&self, package: &mut Package, ctx: &ActionContext) -> ProcessStatus {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.order.lock().unwrap().push(package.id.name.clone());
            ctx.set_status(ProcessStatus::Building);

            tokio::time::sleep(self.delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.outcomes
                .get(&package.id.name)
                .copied()
                .unwrap_or(ProcessStatus::Completed)
        }
    }

    /// 等待取消信号的执行器
    struct BlockingExecutor;

    #[async_trait]
    impl PackageExecutor for BlockingExecutor {
        async fn execute(&self, _package: &mut Package, ctx: &ActionContext) -> ProcessStatus {
            ctx.cancel.cancelled().await;
            ProcessStatus::Cancelled
        }
    }

    fn registry(json: &str) -> PackageRegistry {
        PackageRegistry::from_manifest("dev", &FleetManifest::from_json(json).unwrap()).unwrap()
    }

    #[test]
    fn test_cascade_cancels_transitive_dependents() {
        // A 依赖 B，B 依赖 C
        let (a, b, c) = (h(0), h(1), h(2));
        let mut scheduler = Scheduler::new(RunMode::Deploy, SchedulerOptions::default());
        scheduler.enqueue_graph(&[a, b, c], DependencyGraph::from_edges(&[(a, b), (b, c)]));

        assert_eq!(scheduler.start(), vec![c]);
        assert_eq!(scheduler.status(a), Some(ProcessStatus::HasPrereqs));

        let next = scheduler.complete(c, ProcessStatus::Failed);
        assert!(next.is_empty());
        assert_eq!(scheduler.status(b), Some(ProcessStatus::Cancelled));
        assert_eq!(scheduler.status(a), Some(ProcessStatus::Cancelled));
        assert!(scheduler.completed().is_empty());
        assert!(scheduler.is_finished());
    }

    #[test]
    fn test_completion_unblocks_dependents() {
        let (a, b, c) = (h(0), h(1), h(2));
        let mut scheduler = Scheduler::new(RunMode::Deploy, SchedulerOptions::default());
        scheduler.enqueue_graph(&[a, b, c], DependencyGraph::from_edges(&[(a, b), (b, c)]));

        assert_eq!(scheduler.start(), vec![c]);
        assert_eq!(scheduler.complete(c, ProcessStatus::Completed), vec![b]);
        assert_eq!(scheduler.complete(b, ProcessStatus::Completed), vec![a]);
        assert!(scheduler.complete(a, ProcessStatus::Completed).is_empty());
        assert_eq!(scheduler.completed(), &[c, b, a]);
        assert!(scheduler.is_finished());
    }

    #[test]
    fn test_updates_after_terminal_are_ignored() {
        let mut scheduler = Scheduler::new(RunMode::Deploy, SchedulerOptions::default());
        scheduler.enqueue_graph(&[h(0)], DependencyGraph::default());
        scheduler.start();
        scheduler.update_status(h(0), ProcessStatus::Building);
        assert_eq!(scheduler.status(h(0)), Some(ProcessStatus::Building));

        scheduler.complete(h(0), ProcessStatus::Completed);
        scheduler.update_status(h(0), ProcessStatus::Bump);
        assert_eq!(scheduler.status(h(0)), Some(ProcessStatus::Completed));
    }

    #[test]
    fn test_non_terminal_completion_is_failure() {
        let mut scheduler = Scheduler::new(RunMode::Deploy, SchedulerOptions::default());
        scheduler.enqueue_graph(&[h(0)], DependencyGraph::default());
        scheduler.start();
        scheduler.complete(h(0), ProcessStatus::Processing);
        assert_eq!(scheduler.failed(), &[h(0)]);
    }

    #[test]
    fn test_graph_termination_on_generated_dags() {
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for round in 0..50 {
            let n = 3 + (next() % 10) as usize;
            let mut edges = Vec::new();
            for owner in 1..n {
                for dep in 0..owner {
                    if next() % 3 == 0 {
                        edges.push((h(owner), h(dep)));
                    }
                }
            }
            let handles: Vec<PackageHandle> = (0..n).map(h).collect();
            let cap = (next() % 3) as usize;
            let options = SchedulerOptions {
                max_processing: (cap > 0).then_some(cap),
                track_dependencies: true,
            };
            let mut scheduler = Scheduler::new(RunMode::Deploy, options);
            scheduler.enqueue_graph(&handles, DependencyGraph::from_edges(&edges));

            let mut dispatched_count: HashMap<PackageHandle, usize> = HashMap::new();
            let mut in_flight: VecDeque<PackageHandle> = VecDeque::new();
            let mut record = |batch: Vec<PackageHandle>,
                              scheduler: &Scheduler,
                              in_flight: &mut VecDeque<PackageHandle>| {
                for handle in batch {
                    assert!(scheduler.graph().is_ready(handle), "round {round}: dispatched with deps");
                    *dispatched_count.entry(handle).or_default() += 1;
                    in_flight.push_back(handle);
                }
            };

            let batch = scheduler.start();
            record(batch, &scheduler, &mut in_flight);
            while let Some(handle) = in_flight.pop_front() {
                let outcome = if next() % 7 == 0 {
                    ProcessStatus::Failed
                } else {
                    ProcessStatus::Completed
                };
                let batch = scheduler.complete(handle, outcome);
                record(batch, &scheduler, &mut in_flight);
            }

            assert!(scheduler.is_finished(), "round {round}");
            for handle in &handles {
                let dispatched = dispatched_count.get(handle).copied().unwrap_or(0);
                let status = scheduler.status(*handle);
                if dispatched == 0 {
                    assert_eq!(status, Some(ProcessStatus::Cancelled), "round {round}");
                } else {
                    assert_eq!(dispatched, 1, "round {round}");
                    assert!(status.is_some_and(|s| s.is_terminal()), "round {round}");
                }
            }
        }
    }

    #[tokio::test]
    async fn test_failed_root_cancels_chain() {
        let mut registry = registry(
            r#"{ "packages": [
                { "name": "network" },
                { "name": "cert", "deploy_after": ["network"] },
                { "name": "api", "deploy_after": ["cert"] }
            ] }"#,
        );
        let executor = Arc::new(ScriptedExecutor::new(
            &[("network", ProcessStatus::Failed)],
            Duration::from_millis(5),
        ));

        let mut scheduler = Scheduler::new(RunMode::Deploy, SchedulerOptions::default());
        let handles = registry.handles();
        scheduler.enqueue(&registry, &handles).unwrap();
        let summary = scheduler
            .run(&mut registry, executor.clone(), CancellationToken::new())
            .await;

        assert!(summary.completed.is_empty());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.cancelled.len(), 2);
        assert_eq!(*executor.order.lock().unwrap(), vec!["network".to_string()]);
        let api = registry.lookup("dev", "api").unwrap();
        assert_eq!(registry.get(api).unwrap().process_status, ProcessStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cap_of_one_runs_sequentially() {
        let mut registry = registry(
            r#"{ "packages": [
                { "name": "p1" }, { "name": "p2" }, { "name": "p3" }, { "name": "p4" }, { "name": "p5" }
            ] }"#,
        );
        let executor = Arc::new(ScriptedExecutor::new(&[], Duration::from_millis(10)));
        let options = SchedulerOptions {
            max_processing: Some(1),
            track_dependencies: true,
        };

        let mut scheduler = Scheduler::new(RunMode::Deploy, options);
        let handles = registry.handles();
        scheduler.enqueue(&registry, &handles).unwrap();
        let summary = scheduler
            .run(&mut registry, executor.clone(), CancellationToken::new())
            .await;

        assert_eq!(summary.completed.len(), 5);
        assert_eq!(summary.max_in_flight, 1);
        assert_eq!(executor.peak.load(Ordering::SeqCst), 1);
        assert_eq!(
            *executor.order.lock().unwrap(),
            vec!["p1", "p2", "p3", "p4", "p5"]
        );
    }

    #[tokio::test]
    async fn test_unbounded_dispatches_all_ready() {
        let mut registry = registry(
            r#"{ "packages": [ { "name": "p1" }, { "name": "p2" }, { "name": "p3" } ] }"#,
        );
        let executor = Arc::new(ScriptedExecutor::new(&[], Duration::from_millis(20)));
        let mut scheduler = Scheduler::new(RunMode::Deploy, SchedulerOptions::default());
        let handles = registry.handles();
        scheduler.enqueue(&registry, &handles).unwrap();

        let summary = scheduler
            .run(&mut registry, executor.clone(), CancellationToken::new())
            .await;
        assert_eq!(summary.completed.len(), 3);
        assert_eq!(summary.max_in_flight, 3);
    }

    #[tokio::test]
    async fn test_destroy_runs_dependents_first() {
        let mut registry = registry(
            r#"{ "packages": [
                { "name": "network" },
                { "name": "api", "deploy_after": ["network"] }
            ] }"#,
        );
        let executor = Arc::new(ScriptedExecutor::new(&[], Duration::from_millis(1)));
        let mut scheduler = Scheduler::new(RunMode::Destroy, SchedulerOptions::default());
        let handles = registry.handles();
        scheduler.enqueue(&registry, &handles).unwrap();

        scheduler
            .run(&mut registry, executor.clone(), CancellationToken::new())
            .await;
        assert_eq!(*executor.order.lock().unwrap(), vec!["api", "network"]);
    }

    #[tokio::test]
    async fn test_root_cancellation_stops_run() {
        let mut registry = registry(
            r#"{ "packages": [ { "name": "p1" }, { "name": "p2" }, { "name": "p3" } ] }"#,
        );
        let options = SchedulerOptions {
            max_processing: Some(1),
            track_dependencies: true,
        };
        let mut scheduler = Scheduler::new(RunMode::Deploy, options);
        let handles = registry.handles();
        scheduler.enqueue(&registry, &handles).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let summary = scheduler
            .run(&mut registry, Arc::new(BlockingExecutor), cancel)
            .await;
        assert!(summary.completed.is_empty());
        assert_eq!(summary.cancelled.len(), 3);
        assert!(!summary.success());
        assert_eq!(registry.len(), 3);
        assert!(registry.handles().iter().all(|h| registry.get(*h).is_some()));
    }

    #[tokio::test]
    async fn test_status_events_are_published() {
        let mut registry = registry(r#"{ "packages": [ { "name": "api" } ] }"#);
        let hub = Arc::new(StatusHub::new());
        let mut events = hub.subscribe_status();

        let mut scheduler =
            Scheduler::new(RunMode::Deploy, SchedulerOptions::default()).with_hub(hub.clone());
        let handles = registry.handles();
        scheduler.enqueue(&registry, &handles).unwrap();
        scheduler
            .run(
                &mut registry,
                Arc::new(ScriptedExecutor::new(&[], Duration::from_millis(1))),
                CancellationToken::new(),
            )
            .await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event.process);
        }
        assert_eq!(seen.first(), Some(&ProcessStatus::Processing));
        assert_eq!(seen.last(), Some(&ProcessStatus::Completed));
    }

    #[tokio::test]
    async fn test_without_dependency_tracking_everything_is_ready() {
        let mut registry = registry(
            r#"{ "packages": [
                { "name": "network" },
                { "name": "api", "deploy_after": ["network"] }
            ] }"#,
        );
        let options = SchedulerOptions {
            max_processing: None,
            track_dependencies: false,
        };
        let mut scheduler = Scheduler::new(RunMode::Deploy, options);
        let handles = registry.handles();
        scheduler.enqueue(&registry, &handles).unwrap();

        let summary = scheduler
            .run(
                &mut registry,
                Arc::new(ScriptedExecutor::new(&[], Duration::from_millis(10))),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(summary.max_in_flight, 2);
        assert!(summary.success());
    }
}
