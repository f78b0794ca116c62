//! Wasp - Rust 目标受众分析编排服务
//!
//! 多轮对话收集答案，提交外部工作流引擎生成分析表格，再把表格与答案
//! 按固定顺序逐个分发给下游系统——每一步都等对方回调确认后才进行下一步。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与编排主控流程（握手 -> 分发 -> 汇总）
//! - **correlator**: 响应关联器（PendingWait 表，跨执行上下文的回调交接）
//! - **dispatch**: 顺序分发器（逐个系统，限时等 "ready" 确认）
//! - **ingress**: 回调入口（axum 监听器，引擎与系统的回调落地处）
//! - **notify**: 用户通知接口（进度与终局消息）
//! - **observability**: tracing 初始化
//! - **session**: 会话状态机（职业 -> 定位 -> 理想客户画像）
//! - **workflow**: 工作流握手与产物归一化

pub mod config;
pub mod core;
pub mod correlator;
pub mod dispatch;
pub mod ingress;
pub mod notify;
pub mod observability;
pub mod session;
pub mod workflow;

pub use crate::core::{Orchestrator, OrchestratorError};
