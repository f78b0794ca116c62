//! 响应关联器（Response Correlator）
//!
//! 进程级 PendingWait 表：把一条出站操作（工作流握手、分发步骤）与未来某一条
//! 独立到达的回调对上号。回调服务器与编排循环跑在不同的执行上下文里，
//! 因此这张表是全系统唯一需要互斥的共享结构：
//! - `register` 登记等待并拿到可 `wait` 的句柄
//! - `resolve` 由回调入口调用，首次命中唤醒等待方，返回 bool
//! - `wait` 挂起（不占用 worker）直到被唤醒 / 截止 / 被取消
//!
//! 锁只保护 HashMap 的插入/查找/替换，绝不跨越挂起点持有。
//! 已结算的条目保留一段宽限期再由后台 reaper 清除，迟到回调还能在日志里留痕。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::core::OrchestratorError;

/// 相关键：把出站请求与回调对上号的不透明字符串
pub type CorrelationKey = String;

/// 回调携带的载荷（两个回调端点的 JSON 体，已在 ingress 归一化）
pub type CallbackPayload = serde_json::Value;

/// `wait` 的三态结果
#[derive(Debug)]
pub enum WaitOutcome {
    /// 截止前收到匹配回调
    Resolved(CallbackPayload),
    /// 截止时间已过，此后该键不可再被 resolve
    TimedOut,
    /// 等待被主动取消（看门狗触发）
    Cancelled,
}

/// 表中条目：要么仍在等待，要么已结算（墓碑，留给迟到回调对账）
enum WaitState {
    Waiting {
        tx: oneshot::Sender<CallbackPayload>,
        deadline: Instant,
    },
    Settled {
        kind: SettledKind,
        at: Instant,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettledKind {
    Resolved,
    Expired,
    Cancelled,
}

/// `register` 返回的等待句柄，交给 `wait` 消费
pub struct WaitHandle {
    key: CorrelationKey,
    rx: oneshot::Receiver<CallbackPayload>,
    deadline: Instant,
}

impl WaitHandle {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// PendingWait 表 + 宽限期
pub struct ResponseCorrelator {
    table: Mutex<HashMap<CorrelationKey, WaitState>>,
    /// 结算后墓碑的保留时长（容忍擦边迟到的回调留日志）
    grace: Duration,
}

impl ResponseCorrelator {
    pub fn new(grace: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            grace,
        }
    }

    /// 登记一条等待；同键已有未决等待时报错（键唯一不变量）
    pub fn register(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<WaitHandle, OrchestratorError> {
        let deadline = Instant::now() + timeout;
        let (tx, rx) = oneshot::channel();

        let mut table = self.table.lock().expect("correlator table poisoned");
        if let Some(WaitState::Waiting { .. }) = table.get(key) {
            return Err(OrchestratorError::DuplicateCorrelationKey(key.to_string()));
        }
        // 旧墓碑直接顶掉（同一键的上一轮操作已结算）
        table.insert(key.to_string(), WaitState::Waiting { tx, deadline });

        Ok(WaitHandle {
            key: key.to_string(),
            rx,
            deadline,
        })
    }

    /// 回调入口调用：首次命中返回 true 并唤醒等待方；
    /// 未知 / 已结算 / 已过期的键返回 false，只记 warn，不向上抛错。
    pub fn resolve(&self, key: &str, payload: CallbackPayload) -> bool {
        let mut table = self.table.lock().expect("correlator table poisoned");

        match table.remove(key) {
            Some(WaitState::Waiting { tx, deadline }) => {
                if Instant::now() > deadline {
                    // 等待方还没来得及标记超时，但截止已过：按过期处理
                    table.insert(
                        key.to_string(),
                        WaitState::Settled { kind: SettledKind::Expired, at: Instant::now() },
                    );
                    tracing::warn!("Callback for {} arrived after deadline, discarded", key);
                    return false;
                }
                match tx.send(payload) {
                    Ok(()) => {
                        table.insert(
                            key.to_string(),
                            WaitState::Settled { kind: SettledKind::Resolved, at: Instant::now() },
                        );
                        true
                    }
                    Err(_) => {
                        // 接收端已被丢弃（等待方提前退出）
                        table.insert(
                            key.to_string(),
                            WaitState::Settled { kind: SettledKind::Cancelled, at: Instant::now() },
                        );
                        tracing::warn!("Callback for {} had no live waiter, discarded", key);
                        false
                    }
                }
            }
            Some(settled @ WaitState::Settled { .. }) => {
                if let WaitState::Settled { kind, .. } = &settled {
                    tracing::warn!("Duplicate/late callback for {} (already {:?}), discarded", key, kind);
                }
                table.insert(key.to_string(), settled);
                false
            }
            None => {
                tracing::warn!("Callback for unknown correlation key {}, discarded", key);
                false
            }
        }
    }

    /// 挂起等待直到回调 / 截止 / 取消。超时会把条目原子地标为过期，
    /// 之后再来的 resolve 一律返回 false。
    pub async fn wait(&self, mut handle: WaitHandle) -> WaitOutcome {
        let remaining = handle.deadline.saturating_duration_since(Instant::now());

        match tokio::time::timeout(remaining, &mut handle.rx).await {
            Ok(Ok(payload)) => WaitOutcome::Resolved(payload),
            Ok(Err(_)) => {
                // 发送端被丢弃：查表区分 cancel() 与 resolve 的过期分支
                let table = self.table.lock().expect("correlator table poisoned");
                match table.get(&handle.key) {
                    Some(WaitState::Settled { kind: SettledKind::Expired, .. }) => {
                        WaitOutcome::TimedOut
                    }
                    _ => WaitOutcome::Cancelled,
                }
            }
            Err(_) => {
                let mut table = self.table.lock().expect("correlator table poisoned");
                match table.get(&handle.key) {
                    // 截止线上 resolve 抢先拿到锁：载荷已在 channel 里，仍算命中
                    Some(WaitState::Settled { kind: SettledKind::Resolved, .. }) => {
                        if let Ok(payload) = handle.rx.try_recv() {
                            return WaitOutcome::Resolved(payload);
                        }
                        WaitOutcome::TimedOut
                    }
                    Some(WaitState::Settled { kind: SettledKind::Cancelled, .. }) => {
                        WaitOutcome::Cancelled
                    }
                    _ => {
                        table.insert(
                            handle.key.clone(),
                            WaitState::Settled { kind: SettledKind::Expired, at: Instant::now() },
                        );
                        WaitOutcome::TimedOut
                    }
                }
            }
        }
    }

    /// 取消一条未决等待（看门狗路径）。已结算时为 no-op——
    /// 与真回调并发到达时，先抢到锁的一方生效，输家什么也不做。
    pub fn cancel(&self, key: &str) -> bool {
        let mut table = self.table.lock().expect("correlator table poisoned");
        match table.get(key) {
            Some(WaitState::Waiting { .. }) => {
                // 丢弃 Sender，等待方收到 RecvError -> Cancelled
                table.insert(
                    key.to_string(),
                    WaitState::Settled { kind: SettledKind::Cancelled, at: Instant::now() },
                );
                true
            }
            _ => false,
        }
    }

    /// 清理：移除过了宽限期的墓碑，以及截止+宽限期后仍无人认领的等待
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let grace = self.grace;
        let mut table = self.table.lock().expect("correlator table poisoned");

        let before = table.len();
        table.retain(|key, state| match state {
            WaitState::Settled { at, .. } => now.duration_since(*at) < grace,
            WaitState::Waiting { deadline, .. } => {
                let keep = now < *deadline + grace;
                if !keep {
                    tracing::warn!("Reaping abandoned wait for {}", key);
                }
                keep
            }
        });
        before - table.len()
    }

    /// 当前表大小（诊断用）
    pub fn entry_count(&self) -> usize {
        self.table.lock().expect("correlator table poisoned").len()
    }

    /// 启动后台 reaper，周期性 sweep
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let correlator = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                let removed = correlator.sweep();
                if removed > 0 {
                    tracing::debug!("Correlator reaper removed {} entries", removed);
                }
            }
        })
    }
}
