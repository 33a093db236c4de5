//! 状态与日志通道
//!
//! - 所有进程状态变更通过一个广播通道发布
//! - 每个包有自己的日志广播通道，子进程输出写入其中

use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use crate::config::env::constants::{LOG_CHANNEL_CAPACITY, STATUS_CHANNEL_CAPACITY};
use crate::domain::{LogLine, PackageId, StatusEvent};

/// 日志通道信息
struct LogChannel {
    sender: broadcast::Sender<LogLine>,
    finished: bool,
}

/// 状态中心
pub struct StatusHub {
    events: broadcast::Sender<StatusEvent>,
    /// 包 -> 日志通道
    channels: RwLock<HashMap<PackageId, LogChannel>>,
}

impl StatusHub {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            events,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// 发布状态事件，没有订阅者时静默丢弃
    pub fn publish(&self, event: StatusEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// 获取（必要时创建）包的日志发送者
    pub async fn log_sender(&self, package: &PackageId) -> broadcast::Sender<LogLine> {
        let mut channels = self.channels.write().await;

        if let Some(channel) = channels.get_mut(package) {
            channel.finished = false;
            return channel.sender.clone();
        }

        let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        channels.insert(
            package.clone(),
            LogChannel {
                sender: sender.clone(),
                finished: false,
            },
        );
        sender
    }

    /// 订阅包的日志，通道不存在返回 None
    pub async fn subscribe_logs(&self, package: &PackageId) -> Option<broadcast::Receiver<LogLine>> {
        let channels = self.channels.read().await;
        channels.get(package).map(|c| c.sender.subscribe())
    }

    /// 标记包的日志通道完成
    pub async fn finish(&self, package: &PackageId) {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get_mut(package) {
            channel.finished = true;
        }
    }

    /// 移除已完成且没有订阅者的通道
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, channel| !channel.finished || channel.sender.receiver_count() > 0);
    }

    /// 通道数量
    pub async fn count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProcessStatus;

    #[tokio::test]
    async fn test_status_events_are_broadcast() {
        let hub = StatusHub::new();
        let mut rx = hub.subscribe_status();

        hub.publish(StatusEvent::process(
            PackageId::new("dev", "api"),
            ProcessStatus::Building,
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.process, ProcessStatus::Building);
        assert_eq!(event.package.name, "api");
    }

    #[tokio::test]
    async fn test_log_channel_lifecycle() {
        let hub = StatusHub::new();
        let api = PackageId::new("dev", "api");

        let sender = hub.log_sender(&api).await;
        let mut receiver = hub.subscribe_logs(&api).await.unwrap();
        let _ = sender.send(LogLine::stdout("Hello"));
        assert_eq!(receiver.recv().await.unwrap().content, "Hello");

        hub.finish(&api).await;
        hub.cleanup().await;
        assert_eq!(hub.count().await, 1, "subscriber keeps the channel alive");

        drop(receiver);
        hub.cleanup().await;
        assert_eq!(hub.count().await, 0);
    }
}
