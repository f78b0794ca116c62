//! 工作流握手（Workflow Handshake）
//!
//! 把收齐的三个答案提交给外部工作流引擎，换回一个相关键。
//! 提交本身不阻塞等待——引擎接受（2xx）后立即注册 PendingWait 并返回；
//! 等待产物由另一个任务通过 `await_artifact` 完成。
//! 提交失败（传输错误或非 2xx）时不得在 correlator 留下任何状态。

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};

use crate::config::{HttpSection, WorkflowSection};
use crate::core::OrchestratorError;
use crate::correlator::{ResponseCorrelator, WaitHandle, WaitOutcome};
use crate::session::CollectedAnswers;
use crate::workflow::artifact::{ArtifactDescriptor, WorkflowCallback};

pub struct WorkflowHandshake {
    client: reqwest::Client,
    endpoint_url: Option<String>,
    handshake_timeout: Duration,
    correlator: Arc<ResponseCorrelator>,
}

impl WorkflowHandshake {
    pub fn new(
        workflow: &WorkflowSection,
        http: &HttpSection,
        correlator: Arc<ResponseCorrelator>,
    ) -> Result<Self, OrchestratorError> {
        let client = http.build_client()?;
        Ok(Self {
            client,
            endpoint_url: workflow.endpoint_url.clone(),
            handshake_timeout: workflow.handshake_timeout(),
            correlator,
        })
    }

    /// 铸造相关键：`{userId}_{毫秒时间戳}`，无需中心化发号即可保证唯一
    fn mint_key(user_id: &str) -> String {
        format!("{}_{}", user_id, Utc::now().timestamp_millis())
    }

    /// 提交答案。引擎接受后返回已注册的等待句柄（非阻塞）；
    /// 任何失败都直接报错，且保证没有 PendingWait 泄漏。
    pub async fn submit(
        &self,
        user_id: &str,
        answers: &CollectedAnswers,
    ) -> Result<WaitHandle, OrchestratorError> {
        let Some(endpoint) = self.endpoint_url.as_deref() else {
            return Err(OrchestratorError::ConfigError(
                "workflow.endpoint_url is not configured".to_string(),
            ));
        };

        let key = Self::mint_key(user_id);
        let payload = build_engine_payload(&key, user_id, answers);

        tracing::info!("Submitting answers to workflow engine, key={}", key);
        let resp = self.client.post(endpoint).json(&payload).send().await?;

        if !resp.status().is_success() {
            tracing::error!(
                "Workflow engine rejected submission: HTTP {}",
                resp.status()
            );
            return Err(OrchestratorError::WorkflowRejected(resp.status().as_u16()));
        }

        // 只有引擎确认接受后才登记等待
        let handle = self.correlator.register(&key, self.handshake_timeout)?;
        tracing::info!("Workflow submission accepted, waiting on key={}", key);
        Ok(handle)
    }

    /// 等待引擎回调并产出产物描述。超时 / 取消走占位回退——
    /// 下游分发无论如何都要跑，这是硬性要求。
    pub async fn await_artifact(&self, handle: WaitHandle) -> ArtifactDescriptor {
        let key = handle.key().to_string();
        match self.correlator.wait(handle).await {
            WaitOutcome::Resolved(payload) => {
                match serde_json::from_value::<WorkflowCallback>(payload) {
                    Ok(cb) => ArtifactDescriptor::from_callback(cb),
                    Err(e) => {
                        tracing::warn!("Unparseable workflow callback for {}: {}", key, e);
                        ArtifactDescriptor::unavailable(format!("unparseable callback: {}", e))
                    }
                }
            }
            WaitOutcome::TimedOut => {
                tracing::warn!("Workflow handshake timed out, key={}", key);
                ArtifactDescriptor::unavailable("workflow engine timed out")
            }
            WaitOutcome::Cancelled => {
                tracing::warn!("Workflow handshake cancelled by watchdog, key={}", key);
                ArtifactDescriptor::unavailable("cancelled by session watchdog")
            }
        }
    }
}

/// 发给引擎的载荷：相关键 + 三个答案 + 表格标题与预填分析框架行
fn build_engine_payload(
    key: &str,
    user_id: &str,
    answers: &CollectedAnswers,
) -> serde_json::Value {
    let analysis_date = Local::now().format("%d.%m.%Y").to_string();
    let title = format!("[{}] – {}", analysis_date, answers.profession);

    serde_json::json!({
        "correlationKey": key,
        "userId": user_id,
        "action": "create_artifact",
        "artifactTitle": title,
        "answers": {
            "profession": answers.profession,
            "segmentation": answers.segmentation,
            "idealClient": answers.ideal_client,
        },
        "sheetRows": scaffold_rows(answers, &analysis_date),
        "submittedAt": Utc::now().to_rfc3339(),
    })
}

/// 表格预填内容：采集到的答案 + 留待后续分析的框架行
fn scaffold_rows(answers: &CollectedAnswers, analysis_date: &str) -> Vec<[String; 2]> {
    let row = |a: &str, b: &str| [a.to_string(), b.to_string()];
    vec![
        row("🎯 目标受众分析", ""),
        row("", ""),
        row("参数", "内容"),
        row("专家职业", &answers.profession),
        row("专家定位", &answers.segmentation),
        row("理想客户画像", &answers.ideal_client),
        row("分析日期", analysis_date),
        row("", ""),
        row("📋 后续工作建议", ""),
        row("受众核心特征", "根据画像补充"),
        row("痛点与问题", "根据画像补充"),
        row("需求与期望", "根据调研补充"),
        row("触达渠道", "根据调研补充"),
        row("下一步计划", "分析后补充"),
    ]
}
