//! 编排器：主控流程
//!
//! 串起整条链路：会话状态机收齐答案 -> 工作流握手 ->（经回调入口与
//! correlator）产物描述 -> 顺序分发 -> 结果汇总与会话清理。
//! 会话级看门狗在握手迟迟不归时强制走超时回退；与真回调并发时
//! 先到先得，输家是 no-op（correlator 的幂等保证）。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::correlator::ResponseCorrelator;
use crate::dispatch::{DispatchRun, SequentialDispatcher};
use crate::notify::Notifier;
use crate::session::{CollectedAnswers, SessionManager, SessionReply};
use crate::workflow::{ArtifactDescriptor, WorkflowHandshake};

pub struct Orchestrator {
    sessions: Arc<SessionManager>,
    handshake: Arc<WorkflowHandshake>,
    dispatcher: Arc<SequentialDispatcher>,
    correlator: Arc<ResponseCorrelator>,
    notifier: Arc<dyn Notifier>,
    /// 会话进入 AwaitingWorkflowResult 后看门狗的触发延迟
    watchdog_delay: Duration,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<SessionManager>,
        handshake: Arc<WorkflowHandshake>,
        dispatcher: Arc<SequentialDispatcher>,
        correlator: Arc<ResponseCorrelator>,
        notifier: Arc<dyn Notifier>,
        watchdog_delay: Duration,
    ) -> Self {
        Self {
            sessions,
            handshake,
            dispatcher,
            correlator,
            notifier,
            watchdog_delay,
        }
    }

    /// /start：整体重建会话，返回欢迎语 + 第一问
    pub async fn start_session(&self, user_id: &str) -> String {
        self.sessions.start(user_id).await
    }

    /// 一条用户文本：推进状态机并立即返回回复；
    /// 答案收齐时在后台启动整条管线，不阻塞对话
    pub async fn handle_text(self: &Arc<Self>, user_id: &str, text: &str) -> String {
        match self.sessions.advance(user_id, text).await {
            SessionReply::Prompt(p) => p,
            SessionReply::Completed { answers, prompt } => {
                let this = Arc::clone(self);
                let user = user_id.to_string();
                tokio::spawn(async move {
                    this.run_pipeline(&user, answers).await;
                });
                prompt
            }
        }
    }

    /// 管线：握手（带看门狗）-> 产物 -> 顺序分发 -> 汇总 -> 清会话。
    /// 产物拿不到也照样分发（占位描述），这是硬性要求。
    pub async fn run_pipeline(&self, user_id: &str, answers: CollectedAnswers) {
        let artifact = match self.handshake.submit(user_id, &answers).await {
            Ok(handle) => {
                let key = handle.key().to_string();
                self.sessions.set_correlation_key(user_id, &key).await;
                self.tell(
                    user_id,
                    &format!(
                        "📊 流程已启动：\n✅ 数据已发送给工作流引擎\n📝 请求 ID：{}\n⏳ 正在等待表格创建……",
                        key
                    ),
                )
                .await;

                let settled = CancellationToken::new();
                let watchdog = self.spawn_watchdog(user_id, &key, settled.clone());

                let artifact = self.handshake.await_artifact(handle).await;

                settled.cancel();
                let _ = watchdog.await;
                artifact
            }
            Err(e) => {
                tracing::error!("Workflow submission failed for {}: {}", user_id, e);
                self.tell(
                    user_id,
                    "⚠️ 工作流引擎不可用，表格未创建\n🚀 继续把数据发送给各系统……",
                )
                .await;
                ArtifactDescriptor::unavailable(e.to_string())
            }
        };

        if artifact.is_success() {
            self.tell(
                user_id,
                &format!(
                    "🎉 表格已创建！\n📋 标题：{}\n🔗 链接：{}\n🚀 现在开始依次发送给各系统……",
                    artifact.title, artifact.url
                ),
            )
            .await;
        } else {
            self.tell(
                user_id,
                "⏰ 未能在期限内拿到表格\n🚀 继续无表格发送给各系统……",
            )
            .await;
        }

        let run = self
            .dispatcher
            .run(user_id, &answers, &artifact, self.notifier.as_ref())
            .await;

        self.tell(user_id, &summary_message(&artifact, &run)).await;

        // 终态：会话销毁，下一轮需要显式 /start
        self.sessions.clear(user_id).await;
    }

    /// 通知是尽力而为：失败不影响管线，但要在日志里可见
    async fn tell(&self, user_id: &str, text: &str) {
        if let Err(e) = self.notifier.notify(user_id, text).await {
            tracing::warn!("Failed to notify {}: {}", user_id, e);
        }
    }

    /// 看门狗：固定延迟后若该会话仍在等这同一个键，强制取消等待。
    /// 对已结算的键 cancel 是 no-op，与迟到回调天然幂等。
    fn spawn_watchdog(
        &self,
        user_id: &str,
        key: &str,
        settled: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let sessions = Arc::clone(&self.sessions);
        let correlator: Arc<ResponseCorrelator> = Arc::clone(&self.correlator);
        let delay = self.watchdog_delay;
        let user = user_id.to_string();
        let key = key.to_string();

        tokio::spawn(async move {
            tokio::select! {
                _ = settled.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if sessions.is_waiting_on(&user, &key).await {
                        tracing::warn!("Session watchdog fired for {} (key={})", user, key);
                        correlator.cancel(&key);
                    }
                }
            }
        })
    }
}

/// 终局消息：成功 / 部分成功 / 完全回退，绝不静默收场
fn summary_message(artifact: &ArtifactDescriptor, run: &DispatchRun) -> String {
    let (ok, total) = (run.successful(), run.total());
    let artifact_line = if artifact.is_success() {
        format!("📊 表格：{}\n🔗 链接：{}", artifact.title, artifact.url)
    } else {
        "❌ 表格：未创建".to_string()
    };

    let verdict = if artifact.is_success() && ok == total && total > 0 {
        "✅ 目标受众分析全部完成！"
    } else if ok > 0 {
        "💡 分析完成（部分系统未确认）"
    } else {
        "💡 分析已尽力完成（未收到系统确认）"
    };

    format!(
        "🏁 流程结束！\n\n{}\n📡 已确认系统:{}/{}\n\n{}\n\n想再做一次分析？发送 /start",
        artifact_line, ok, total, verdict
    )
}
