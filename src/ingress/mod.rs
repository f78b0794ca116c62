//! 回调入口（Callback Ingress）
//!
//! 独立于编排循环的常驻 HTTP 监听器，接收工作流引擎与下游系统的回调，
//! 经 correlator.resolve 交接给挂起中的编排任务。resolve 只在锁内改表、
//! 用 oneshot 唤醒，对入口任务零阻塞；其 bool 结果直接决定回给
//! 外部调用方的 HTTP 状态。
//!
//! 路由：
//! - POST /workflow/callback  引擎产物回调
//! - POST /system/callback    下游系统完成确认
//! - GET  /health             存活探针
//! - GET  /                   服务描述

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::correlator::ResponseCorrelator;
use crate::dispatch::step_key;
use crate::workflow::WorkflowCallback;

/// 入口共享状态
pub struct IngressState {
    pub correlator: Arc<ResponseCorrelator>,
}

/// 创建回调路由
pub fn create_router(state: Arc<IngressState>) -> Router {
    Router::new()
        .route("/workflow/callback", post(workflow_callback))
        .route("/system/callback", post(system_callback))
        .route("/health", get(health))
        .route("/", get(root))
        .with_state(state)
}

/// 绑定地址并常驻服务（通常由 main spawn 到独立任务）
pub async fn serve(state: Arc<IngressState>, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Callback ingress listening on http://{}", bind_addr);
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

/// POST /workflow/callback - 引擎的产物回调
///
/// 成功但字段不全的回调在这里补占位值（记 warn）后照常 resolve；
/// 相关键对不上号时回 500，但绝不向编排侧抛错。
async fn workflow_callback(
    State(state): State<Arc<IngressState>>,
    Json(mut payload): Json<WorkflowCallback>,
) -> (StatusCode, Json<serde_json::Value>) {
    tracing::info!(
        "Workflow callback received: key={} status={}",
        payload.correlation_key,
        payload.status
    );

    let fixes = payload.normalize();
    if !fixes.is_empty() {
        tracing::warn!(
            "Workflow callback for {} normalized: {}",
            payload.correlation_key,
            fixes.join(", ")
        );
    }

    let key = payload.correlation_key.clone();
    let value = match serde_json::to_value(&payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Failed to re-serialize workflow callback: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "error", "message": "internal error" })),
            );
        }
    };

    if state.correlator.resolve(&key, value) {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "message": "workflow callback processed"
            })),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "status": "error",
                "message": "no pending wait for correlation key"
            })),
        )
    }
}

/// userId 在不同系统里有的发字符串有的发数字，入口统一收下
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    S(String),
    N(i64),
}

impl StringOrNumber {
    fn into_string(self) -> String {
        match self {
            Self::S(s) => s,
            Self::N(n) => n.to_string(),
        }
    }
}

/// POST /system/callback 的请求体；三个必填字段手动校验，
/// 缺任何一个回 400 并记日志，不碰 correlator。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SystemCallback {
    system_id: Option<String>,
    status: Option<String>,
    user_id: Option<StringOrNumber>,
    #[allow(dead_code)]
    processed_at: Option<String>,
    message: Option<String>,
}

/// POST /system/callback - 下游系统的完成确认
async fn system_callback(
    State(state): State<Arc<IngressState>>,
    Json(payload): Json<SystemCallback>,
) -> (StatusCode, Json<serde_json::Value>) {
    let (Some(system_id), Some(status), Some(user_id)) = (
        payload.system_id,
        payload.status,
        payload.user_id.map(StringOrNumber::into_string),
    ) else {
        tracing::error!("System callback missing required fields (systemId/status/userId)");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "status": "error",
                "message": "systemId, status and userId are required"
            })),
        );
    };

    tracing::info!(
        "System callback received: system={} user={} status={}",
        system_id,
        user_id,
        status
    );

    let key = step_key(&user_id, &system_id);
    let value = serde_json::json!({
        "systemId": system_id,
        "userId": user_id,
        "status": status,
        "message": payload.message,
    });

    if state.correlator.resolve(&key, value) {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "message": "system response processed"
            })),
        )
    } else {
        // 迟到 / 重复 / 未知：已在 correlator 记过 warn，这里只回非成功状态
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "status": "error",
                "message": "no pending wait for this system/user"
            })),
        )
    }
}

/// GET /health - 监听器存活即 200
async fn health(State(state): State<Arc<IngressState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "pendingWaits": state.correlator.entry_count(),
        "endpoints": ["/workflow/callback", "/system/callback", "/health"],
    }))
}

/// GET / - 服务描述
async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "wasp callback ingress",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "workflow_callback": "/workflow/callback",
            "system_callback": "/system/callback",
            "health": "/health",
        },
    }))
}
