//! 顺序分发器（Sequential Dispatcher）
//!
//! 拿到产物描述与原始答案后，按配置顺序逐个联系下游系统：
//! 发送 -> 等该系统回调确认 "ready"（限时）-> 记结果 -> 下一个。
//! 同一轮内永远只有一个系统在途；单步失败 / 超时不中断整轮
//! （尽力交付是明确策略，不是缺陷）。返回值覆盖每一个配置的系统。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};

use crate::config::{DispatchSection, HttpSection, SystemEndpoint};
use crate::core::OrchestratorError;
use crate::correlator::{ResponseCorrelator, WaitOutcome};
use crate::notify::Notifier;
use crate::session::CollectedAnswers;
use crate::workflow::ArtifactDescriptor;

/// 下游系统必须回报的完成状态哨兵值
pub const READY_STATUS: &str = "ready";

/// 分发步骤的相关键：带上用户标识，不同用户的并发轮次互不碰撞
pub fn step_key(user_id: &str, system_id: &str) -> String {
    format!("{}_{}", user_id, system_id)
}

/// 一轮分发的运行记录（仅存活于本轮）
#[derive(Debug)]
pub struct DispatchRun {
    pub run_id: String,
    pub user_id: String,
    pub outcomes: HashMap<String, bool>,
}

impl DispatchRun {
    fn new(user_id: &str) -> Self {
        Self {
            run_id: format!("run_{}", uuid::Uuid::new_v4()),
            user_id: user_id.to_string(),
            outcomes: HashMap::new(),
        }
    }

    pub fn successful(&self) -> usize {
        self.outcomes.values().filter(|ok| **ok).count()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}

pub struct SequentialDispatcher {
    client: reqwest::Client,
    systems: Vec<SystemEndpoint>,
    step_timeout: Duration,
    step_pause: Duration,
    correlator: Arc<ResponseCorrelator>,
}

impl SequentialDispatcher {
    pub fn new(
        dispatch: &DispatchSection,
        http: &HttpSection,
        correlator: Arc<ResponseCorrelator>,
    ) -> Result<Self, OrchestratorError> {
        let client = http.build_client()?;
        Ok(Self {
            client,
            systems: dispatch.systems.clone(),
            step_timeout: dispatch.step_timeout(),
            step_pause: dispatch.step_pause(),
            correlator,
        })
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// 按配置顺序逐个分发。每步之后发一条进度通知；
    /// 无论中途多少步失败，返回的结果表覆盖所有配置的系统。
    pub async fn run(
        &self,
        user_id: &str,
        answers: &CollectedAnswers,
        artifact: &ArtifactDescriptor,
        notifier: &dyn Notifier,
    ) -> DispatchRun {
        let mut run = DispatchRun::new(user_id);
        let total = self.systems.len();

        if total == 0 {
            tracing::warn!("No downstream systems configured, nothing to dispatch");
            return run;
        }

        tell(notifier, user_id, &format!("🚀 开始向 {} 个系统依次发送……", total)).await;

        for (i, system) in self.systems.iter().enumerate() {
            let step = i + 1;
            tell(
                notifier,
                user_id,
                &format!(
                    "📤 正在发送第 {}/{} 个系统（{}）……\n⏰ 最长等待 {} 秒",
                    step,
                    total,
                    system.id,
                    self.step_timeout.as_secs()
                ),
            )
            .await;

            let ok = self.dispatch_step(user_id, system, answers, artifact).await;
            run.outcomes.insert(system.id.clone(), ok);

            if ok {
                tell(notifier, user_id, &format!("✅ 系统 {}/{} 已确认完成", step, total)).await;
            } else {
                // 尽力交付：单步失败继续后面的系统
                tell(
                    notifier,
                    user_id,
                    &format!("❌ 系统 {}/{} 未确认，继续发送剩余系统", step, total),
                )
                .await;
            }

            if step < total {
                tokio::time::sleep(self.step_pause).await;
            }
        }

        tracing::info!(
            "Dispatch run {} finished: {}/{} systems confirmed",
            run.run_id,
            run.successful(),
            run.total()
        );
        run
    }

    /// 单步：POST 载荷，被接受后登记等待并挂起到回调或截止。
    /// true 当且仅当回调按时到达且 status == "ready"。
    async fn dispatch_step(
        &self,
        user_id: &str,
        system: &SystemEndpoint,
        answers: &CollectedAnswers,
        artifact: &ArtifactDescriptor,
    ) -> bool {
        let payload = build_system_payload(user_id, &system.id, answers, artifact);

        let resp = match self.client.post(&system.url).json(&payload).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Transport error dispatching to {}: {}", system.id, e);
                return false;
            }
        };
        if !resp.status().is_success() {
            tracing::error!(
                "System {} rejected dispatch: HTTP {}",
                system.id,
                resp.status()
            );
            return false;
        }

        let key = step_key(user_id, &system.id);
        let handle = match self.correlator.register(&key, self.step_timeout) {
            Ok(h) => h,
            Err(e) => {
                // 同键已有未决等待：只可能是上一轮残留，按失败处理
                tracing::error!("Cannot register wait for {}: {}", key, e);
                return false;
            }
        };

        match self.correlator.wait(handle).await {
            WaitOutcome::Resolved(payload) => {
                let status = payload["status"].as_str().unwrap_or_default();
                if status == READY_STATUS {
                    true
                } else {
                    tracing::warn!(
                        "System {} reported status {:?}, expected {:?}",
                        system.id,
                        status,
                        READY_STATUS
                    );
                    false
                }
            }
            WaitOutcome::TimedOut => {
                tracing::warn!("System {} did not confirm within deadline", system.id);
                false
            }
            WaitOutcome::Cancelled => false,
        }
    }
}

/// 通知失败不中断分发，但记 warn 让坏掉的通知通道可见
async fn tell(notifier: &dyn Notifier, user_id: &str, text: &str) {
    if let Err(e) = notifier.notify(user_id, text).await {
        tracing::warn!("Failed to notify {}: {}", user_id, e);
    }
}

/// 发给下游系统的载荷：答案 + 产物 + 目标系统标识 + 时间戳
fn build_system_payload(
    user_id: &str,
    system_id: &str,
    answers: &CollectedAnswers,
    artifact: &ArtifactDescriptor,
) -> serde_json::Value {
    serde_json::json!({
        "eventType": "target_audience_analysis",
        "timestamp": Utc::now().to_rfc3339(),
        "userId": user_id,
        "systemId": system_id,
        "userData": {
            "profession": answers.profession,
            "segmentation": answers.segmentation,
            "idealClientPortrait": answers.ideal_client,
        },
        "artifact": artifact,
        "analysisDate": Local::now().format("%d.%m.%Y").to_string(),
    })
}
