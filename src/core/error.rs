//! 编排错误类型
//!
//! 只覆盖编排侧主动发起的操作（出站提交、键注册）；回调侧的「未知/迟到键」
//! 不是错误，由 correlator 记日志后丢弃。

use thiserror::Error;

/// 编排过程中可能出现的错误（传输失败、提交被拒、相关键冲突等）
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// 出站请求的传输层失败（连接拒绝 / 连接超时）
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 工作流引擎返回非 2xx：提交视为失败，不得在 correlator 留下任何状态
    #[error("Workflow engine rejected submission: HTTP {0}")]
    WorkflowRejected(u16),

    /// 同一相关键已有未决等待（不变量：同一时刻每个键至多一个 PendingWait）
    #[error("Duplicate correlation key: {0}")]
    DuplicateCorrelationKey(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}
