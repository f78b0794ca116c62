//! Wasp - 目标受众分析编排服务
//!
//! 入口：加载配置、初始化日志、启动回调入口监听器与 correlator reaper，
//! 然后进入一个极简的 stdin 对话循环演示整条链路（/start 开始，
//! 逐行回答三个问题；真实部署里对话渠道是外部协作方）。

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use wasp::config::load_config;
use wasp::core::Orchestrator;
use wasp::correlator::ResponseCorrelator;
use wasp::dispatch::SequentialDispatcher;
use wasp::ingress::{self, IngressState};
use wasp::notify::ConsoleNotifier;
use wasp::session::SessionManager;
use wasp::workflow::WorkflowHandshake;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wasp::observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    if cfg.workflow.endpoint_url.is_none() {
        tracing::warn!("workflow.endpoint_url not set - handshake will fall back to placeholder artifact");
    }
    if cfg.dispatch.systems.is_empty() {
        tracing::warn!("dispatch.systems is empty - nothing will be dispatched");
    }

    let correlator = Arc::new(ResponseCorrelator::new(cfg.correlator.grace()));
    correlator.spawn_reaper(cfg.correlator.sweep_interval());

    let sessions = Arc::new(SessionManager::new());
    let handshake = Arc::new(
        WorkflowHandshake::new(&cfg.workflow, &cfg.http, Arc::clone(&correlator))
            .context("Failed to build workflow client")?,
    );
    let dispatcher = Arc::new(
        SequentialDispatcher::new(&cfg.dispatch, &cfg.http, Arc::clone(&correlator))
            .context("Failed to build dispatch client")?,
    );

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&sessions),
        handshake,
        dispatcher,
        Arc::clone(&correlator),
        Arc::new(ConsoleNotifier),
        cfg.workflow.handshake_timeout(),
    ));

    // 回调入口在独立任务常驻，编排循环挂起等待时它仍保持响应
    let ingress_state = Arc::new(IngressState {
        correlator: Arc::clone(&correlator),
    });
    let bind_addr = cfg.server.bind_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = ingress::serve(ingress_state, &bind_addr).await {
            tracing::error!("Callback ingress exited: {}", e);
        }
    });

    println!("🐝 Wasp 已启动。输入 /start 开始分析，Ctrl+D 退出。");

    // stdin 演示循环：单用户 "console"
    let user_id = "console";
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let reply = if text == "/start" {
            orchestrator.start_session(user_id).await
        } else {
            orchestrator.handle_text(user_id, text).await
        };
        println!("🤖 {}", reply);
    }

    Ok(())
}
