//! 子进程注册表
//!
//! 每个子进程以所属包为键注册，外部“全部取消”操作可以统一终止它们

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::PackageId;

/// 已注册的进程
struct RegisteredProcess {
    id: u64,
    token: CancellationToken,
}

/// 子进程注册表
pub struct ProcessRegistry {
    /// 包 -> 运行中的进程
    processes: RwLock<HashMap<PackageId, Vec<RegisteredProcess>>>,
    next_id: AtomicU64,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            processes: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 注册进程，返回进程 ID 与它专属的取消令牌
    ///
    /// 令牌是 `parent` 的子令牌：父令牌取消时进程同样被终止
    pub async fn register(
        &self,
        owner: &PackageId,
        parent: &CancellationToken,
    ) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = parent.child_token();
        let mut processes = self.processes.write().await;
        processes
            .entry(owner.clone())
            .or_default()
            .push(RegisteredProcess {
                id,
                token: token.clone(),
            });
        (id, token)
    }

    /// 进程结束后注销
    pub async fn unregister(&self, owner: &PackageId, id: u64) {
        let mut processes = self.processes.write().await;
        if let Some(list) = processes.get_mut(owner) {
            list.retain(|p| p.id != id);
            if list.is_empty() {
                processes.remove(owner);
            }
        }
    }

    /// 终止某个包的全部进程，返回被终止的数量
    pub async fn cancel(&self, owner: &PackageId) -> usize {
        let processes = self.processes.read().await;
        let Some(list) = processes.get(owner) else {
            return 0;
        };
        for process in list {
            process.token.cancel();
        }
        warn!(package = %owner, count = list.len(), "Cancelled running processes");
        list.len()
    }

    /// 终止所有进程
    pub async fn cancel_all(&self) -> usize {
        let processes = self.processes.read().await;
        let mut count = 0;
        for list in processes.values() {
            for process in list {
                process.token.cancel();
                count += 1;
            }
        }
        if count > 0 {
            info!(count, "Cancelled all running processes");
        }
        count
    }

    /// 运行中的进程数
    pub async fn count(&self) -> usize {
        let processes = self.processes.read().await;
        processes.values().map(Vec::len).sum()
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}
