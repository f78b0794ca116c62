//! 用户通知接口
//!
//! 编排器经由它向用户所在的对话渠道报告进度与最终结果。
//! 对话 UI 本身是外部协作方，这里只定义缝上的 trait 和两个轻量实现。

use async_trait::async_trait;

/// 进度 / 结果通知的协作方接口
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, text: &str) -> anyhow::Result<()>;
}

/// 控制台实现：stdin 演示循环用
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, user_id: &str, text: &str) -> anyhow::Result<()> {
        println!("🤖 [{}] {}", user_id, text);
        Ok(())
    }
}

/// 只走日志的实现（无交互部署 / 测试兜底）
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, user_id: &str, text: &str) -> anyhow::Result<()> {
        tracing::info!(user_id, "notify: {}", text);
        Ok(())
    }
}
