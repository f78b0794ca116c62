//! 端到端编排测试
//!
//! 在回环地址上架起假的工作流引擎与假的下游系统，走真实 HTTP：
//! 提交 -> 引擎回调 -> 顺序分发 -> 系统确认回调 -> 汇总。
//! 覆盖成功链路、引擎超时回退、单系统沉默 / 报错不中断整轮，
//! 以及回调入口对未知 / 重复 / 缺字段回调的处理。

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use wasp::config::{DispatchSection, HttpSection, SystemEndpoint, WorkflowSection};
use wasp::core::Orchestrator;
use wasp::correlator::{ResponseCorrelator, WaitOutcome};
use wasp::dispatch::SequentialDispatcher;
use wasp::ingress::{self, IngressState};
use wasp::notify::Notifier;
use wasp::session::{CollectedAnswers, SessionManager};
use wasp::workflow::WorkflowHandshake;

/// 记录所有发往用户的消息
struct RecordingNotifier(Mutex<Vec<String>>);

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, _user_id: &str, text: &str) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

async fn serve_router(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// 假引擎：接受提交后（可选）延迟回调产物
struct EngineMock {
    ingress_base: String,
    responds: bool,
}

async fn engine_hook(
    State(mock): State<Arc<EngineMock>>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    if mock.responds {
        let key = payload["correlationKey"].as_str().unwrap().to_string();
        let url = format!("{}/workflow/callback", mock.ingress_base);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = reqwest::Client::new()
                .post(&url)
                .json(&json!({
                    "correlationKey": key,
                    "status": "success",
                    "artifactId": "sheet-1",
                    "artifactUrl": "https://docs.google.com/spreadsheets/d/sheet-1",
                    "artifactTitle": "测试分析表",
                }))
                .send()
                .await;
        });
    }
    Json(json!({ "accepted": true }))
}

/// 假下游系统：记录收到的载荷，按配置回报状态（None = 沉默）
struct SystemMock {
    ingress_base: String,
    report_status: Option<&'static str>,
    received: Arc<Mutex<Vec<Value>>>,
}

async fn system_hook(
    State(mock): State<Arc<SystemMock>>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    mock.received.lock().unwrap().push(payload.clone());
    if let Some(status) = mock.report_status {
        let url = format!("{}/system/callback", mock.ingress_base);
        let body = json!({
            "systemId": payload["systemId"],
            "status": status,
            "userId": payload["userId"],
            "processedAt": "2026-08-29T00:00:00Z",
        });
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = reqwest::Client::new().post(&url).json(&body).send().await;
        });
    }
    Json(json!({ "accepted": true }))
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    sessions: Arc<SessionManager>,
    notes: Arc<RecordingNotifier>,
    /// 所有系统按到达顺序收到的载荷（共享一个记录器）
    received: Arc<Mutex<Vec<Value>>>,
}

/// 架起回调入口、假引擎与若干假系统，拼好整个编排器
async fn build_harness(
    engine_responds: bool,
    handshake_timeout_secs: u64,
    step_timeout_secs: u64,
    system_reports: &[Option<&'static str>],
) -> Harness {
    let correlator = Arc::new(ResponseCorrelator::new(Duration::from_secs(30)));

    let ingress_state = Arc::new(IngressState {
        correlator: Arc::clone(&correlator),
    });
    let ingress_addr = serve_router(ingress::create_router(ingress_state)).await;
    let ingress_base = format!("http://{}", ingress_addr);

    let engine_addr = serve_router(
        Router::new()
            .route("/", post(engine_hook))
            .with_state(Arc::new(EngineMock {
                ingress_base: ingress_base.clone(),
                responds: engine_responds,
            })),
    )
    .await;

    let received = Arc::new(Mutex::new(Vec::new()));
    let mut systems = Vec::new();
    for (i, report) in system_reports.iter().enumerate() {
        let addr = serve_router(
            Router::new()
                .route("/", post(system_hook))
                .with_state(Arc::new(SystemMock {
                    ingress_base: ingress_base.clone(),
                    report_status: *report,
                    received: Arc::clone(&received),
                })),
        )
        .await;
        systems.push(SystemEndpoint {
            id: format!("s{}", i + 1),
            url: format!("http://{}/", addr),
        });
    }

    let workflow = WorkflowSection {
        endpoint_url: Some(format!("http://{}/", engine_addr)),
        handshake_timeout_secs,
    };
    let dispatch = DispatchSection {
        systems,
        step_timeout_secs,
        step_pause_ms: 10,
    };
    let http = HttpSection::default();

    let sessions = Arc::new(SessionManager::new());
    let handshake = Arc::new(
        WorkflowHandshake::new(&workflow, &http, Arc::clone(&correlator)).unwrap(),
    );
    let dispatcher = Arc::new(
        SequentialDispatcher::new(&dispatch, &http, Arc::clone(&correlator)).unwrap(),
    );
    let notes = Arc::new(RecordingNotifier(Mutex::new(Vec::new())));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&sessions),
        handshake,
        dispatcher,
        correlator,
        Arc::clone(&notes) as Arc<dyn Notifier>,
        workflow.handshake_timeout(),
    ));

    Harness {
        orchestrator,
        sessions,
        notes,
        received,
    }
}

fn answers() -> CollectedAnswers {
    CollectedAnswers {
        profession: "教练".to_string(),
        segmentation: "帮助创业者摆脱增长瓶颈".to_string(),
        ideal_client: "30-45 岁的创始人".to_string(),
    }
}

/// 把会话推进到等待工作流结果的状态
async fn prime_session(sessions: &SessionManager, user_id: &str) {
    sessions.start(user_id).await;
    sessions.advance(user_id, "教练").await;
    sessions.advance(user_id, "帮助创业者摆脱增长瓶颈").await;
    sessions.advance(user_id, "30-45 岁的创始人").await;
}

#[tokio::test]
async fn test_full_pipeline_confirms_every_system() {
    let h = build_harness(true, 5, 5, &[Some("ready"), Some("ready")]).await;
    prime_session(&h.sessions, "u1").await;

    h.orchestrator.run_pipeline("u1", answers()).await;

    // 两个系统按配置顺序各收到一次，带真实产物
    let received = h.received.lock().unwrap().clone();
    let ids: Vec<_> = received
        .iter()
        .map(|p| p["systemId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["s1", "s2"]);
    for payload in &received {
        assert_eq!(payload["artifact"]["id"], "sheet-1");
        assert_eq!(payload["userData"]["profession"], "教练");
    }

    let notes = h.notes.0.lock().unwrap();
    let summary = notes.last().expect("summary message sent");
    assert!(summary.contains("2/2"));
    assert!(summary.contains("全部完成"));
    assert!(notes.iter().any(|n| n.contains("测试分析表")));
    drop(notes);

    // 终态：会话已销毁
    assert_eq!(h.sessions.active_count().await, 0);
}

#[tokio::test]
async fn test_engine_timeout_still_dispatches_with_placeholder() {
    // 引擎接受提交但永不回调，1 秒超时
    let h = build_harness(false, 1, 5, &[Some("ready")]).await;
    prime_session(&h.sessions, "u2").await;

    h.orchestrator.run_pipeline("u2", answers()).await;

    // 系统仍收到分发，产物是结构完整的占位值
    let received = h.received.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["artifact"]["id"], "not_available");
    assert!(received[0]["artifact"]["url"].as_str().unwrap().contains("not_available"));

    let notes = h.notes.0.lock().unwrap();
    let summary = notes.last().unwrap();
    assert!(summary.contains("未创建"));
    assert!(summary.contains("1/1"));
}

#[tokio::test]
async fn test_silent_or_wrong_status_system_does_not_stop_the_run() {
    // s2 沉默（等满 1 秒超时），s4 回报非 ready 状态；s1/s3 正常
    let h = build_harness(
        true,
        5,
        1,
        &[Some("ready"), None, Some("ready"), Some("degraded")],
    )
    .await;
    prime_session(&h.sessions, "u3").await;

    h.orchestrator.run_pipeline("u3", answers()).await;

    // 顺序分发：失败的系统不挡后面的系统
    let received = h.received.lock().unwrap().clone();
    let ids: Vec<_> = received
        .iter()
        .map(|p| p["systemId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["s1", "s2", "s3", "s4"]);

    let notes = h.notes.0.lock().unwrap();
    let summary = notes.last().unwrap();
    assert!(summary.contains("2/4"));
    assert!(summary.contains("部分系统未确认"));
}

#[tokio::test]
async fn test_ingress_rejects_unknown_duplicate_and_malformed_callbacks() {
    let correlator = Arc::new(ResponseCorrelator::new(Duration::from_secs(30)));
    let state = Arc::new(IngressState {
        correlator: Arc::clone(&correlator),
    });
    let addr = serve_router(ingress::create_router(state)).await;
    let base = format!("http://{}", addr);
    let client = reqwest::Client::new();

    // 未知相关键：非成功状态，编排侧无感
    let resp = client
        .post(format!("{}/workflow/callback", base))
        .json(&json!({ "correlationKey": "nobody_waits", "status": "success" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 500);

    // 已登记的键：首次 200，重复 500
    let handle = correlator.register("u9_1", Duration::from_secs(5)).unwrap();
    let body = json!({ "correlationKey": "u9_1", "status": "success", "sheetid": "真实标题" });
    let resp = client
        .post(format!("{}/workflow/callback", base))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let resp = client
        .post(format!("{}/workflow/callback", base))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 500);

    // 等待方拿到的是归一化后的载荷（sheetid 已搬到 artifactTitle）
    match correlator.wait(handle).await {
        WaitOutcome::Resolved(v) => assert_eq!(v["artifactTitle"], "真实标题"),
        other => panic!("expected Resolved, got {:?}", other),
    }

    // 系统回调缺必填字段 -> 400
    let resp = client
        .post(format!("{}/system/callback", base))
        .json(&json!({ "status": "ready" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    // 健康检查
    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_system_callback_resolves_matching_wait() {
    let correlator = Arc::new(ResponseCorrelator::new(Duration::from_secs(30)));
    let state = Arc::new(IngressState {
        correlator: Arc::clone(&correlator),
    });
    let addr = serve_router(ingress::create_router(state)).await;
    let client = reqwest::Client::new();

    // userId 发成数字也能对上号（入口统一成字符串再拼键）
    let handle = correlator.register("42_crm", Duration::from_secs(5)).unwrap();
    let resp = client
        .post(format!("http://{}/system/callback", addr))
        .json(&json!({ "systemId": "crm", "status": "ready", "userId": 42 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    match correlator.wait(handle).await {
        WaitOutcome::Resolved(v) => assert_eq!(v["status"], "ready"),
        other => panic!("expected Resolved, got {:?}", other),
    }
}
