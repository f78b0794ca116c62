//! 会话状态机
//!
//! 每个用户一条线性对话：职业 -> 定位 -> 理想客户画像，收齐后交给编排器。
//! 会话在 /start 时整体重建，在分发完成或终态失败时销毁。
//! 不变量：一个会话同一时刻至多持有一个在途相关键。

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::RwLock;

/// 欢迎语（/start）
pub const WELCOME_MESSAGE: &str =
    "👋 你好！我来帮你完成目标受众分析。\n接下来我会依次问三个问题，然后为你生成分析表格。";

/// 三个采集问题
pub const QUESTION_PROFESSION: &str = "📝 请填写专家的职业？";
pub const QUESTION_SEGMENTATION: &str =
    "📝 请按照公式填写专家定位：\n我是【你的领域】，帮助【你的理想客户】解决【具体问题】，合作后客户会获得【具体成果】";
pub const QUESTION_IDEAL_CLIENT: &str = "📝 请描述理想客户的画像";

/// 无活跃会话时收到文本的引导语（不是错误）
pub const PROMPT_START_OVER: &str = "请先发送 /start 开始分析。";

/// 等待工作流结果期间收到文本
pub const PROMPT_IN_PROGRESS: &str = "⏳ 正在处理上一次分析，请稍候。发送 /start 可重新开始。";

/// 会话状态（线性推进）。不设「空闲」变体：表中没有会话即空闲
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingProfession,
    AwaitingSegmentation,
    AwaitingIdealClient,
    /// 答案已交给工作流握手，等待回调或看门狗
    AwaitingWorkflowResult,
}

/// 收齐的三个答案（每个字段在会话生命周期内只写一次）
#[derive(Debug, Clone, Serialize)]
pub struct CollectedAnswers {
    pub profession: String,
    pub segmentation: String,
    pub ideal_client: String,
}

/// 单个用户的会话
#[derive(Debug)]
pub struct Session {
    pub user_id: String,
    pub state: SessionState,
    profession: Option<String>,
    segmentation: Option<String>,
    ideal_client: Option<String>,
    /// 在途的工作流握手相关键（至多一个）
    pub correlation_key: Option<String>,
}

impl Session {
    fn new(user_id: String) -> Self {
        Self {
            user_id,
            state: SessionState::AwaitingProfession,
            profession: None,
            segmentation: None,
            ideal_client: None,
            correlation_key: None,
        }
    }

    fn collected(&self) -> Option<CollectedAnswers> {
        Some(CollectedAnswers {
            profession: self.profession.clone()?,
            segmentation: self.segmentation.clone()?,
            ideal_client: self.ideal_client.clone()?,
        })
    }
}

/// `advance` 的结果：下一句提示，或收齐的答案
#[derive(Debug)]
pub enum SessionReply {
    /// 继续对话：回给用户的下一句话
    Prompt(String),
    /// 三个答案收齐，进入 AwaitingWorkflowResult；prompt 是给用户的过渡语
    Completed {
        answers: CollectedAnswers,
        prompt: String,
    },
}

/// 会话表：user_id -> Session
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// 显式开始：整体替换旧会话，回到第一问
    pub async fn start(&self, user_id: &str) -> String {
        let mut sessions = self.sessions.write().await;
        sessions.insert(user_id.to_string(), Session::new(user_id.to_string()));
        format!("{}\n\n{}", WELCOME_MESSAGE, QUESTION_PROFESSION)
    }

    /// 推进状态机：存当前问题的答案，给出下一句
    pub async fn advance(&self, user_id: &str, text: &str) -> SessionReply {
        let mut sessions = self.sessions.write().await;

        let Some(session) = sessions.get_mut(user_id) else {
            return SessionReply::Prompt(PROMPT_START_OVER.to_string());
        };

        match session.state {
            SessionState::AwaitingProfession => {
                session.profession = Some(text.to_string());
                session.state = SessionState::AwaitingSegmentation;
                SessionReply::Prompt(format!(
                    "✅ 职业已记录：{}\n\n{}",
                    text, QUESTION_SEGMENTATION
                ))
            }
            SessionState::AwaitingSegmentation => {
                session.segmentation = Some(text.to_string());
                session.state = SessionState::AwaitingIdealClient;
                SessionReply::Prompt(format!("✅ 定位已记录！\n\n{}", QUESTION_IDEAL_CLIENT))
            }
            SessionState::AwaitingIdealClient => {
                session.ideal_client = Some(text.to_string());
                session.state = SessionState::AwaitingWorkflowResult;
                let answers = session
                    .collected()
                    .expect("all three answers present at AwaitingIdealClient exit");
                SessionReply::Completed {
                    answers,
                    prompt: "✅ 理想客户画像已记录！\n\n📊 正在创建分析表格，请稍候……"
                        .to_string(),
                }
            }
            SessionState::AwaitingWorkflowResult => {
                SessionReply::Prompt(PROMPT_IN_PROGRESS.to_string())
            }
        }
    }

    /// 记录在途相关键（握手提交成功后）
    pub async fn set_correlation_key(&self, user_id: &str, key: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(user_id) {
            session.correlation_key = Some(key.to_string());
        }
    }

    /// 看门狗用：该用户是否仍在等待这一个相关键
    pub async fn is_waiting_on(&self, user_id: &str, key: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(user_id)
            .map(|s| {
                s.state == SessionState::AwaitingWorkflowResult
                    && s.correlation_key.as_deref() == Some(key)
            })
            .unwrap_or(false)
    }

    /// 终态清理：成功、终态失败、或被新 /start 替换前
    pub async fn clear(&self, user_id: &str) {
        self.sessions.write().await.remove(user_id);
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
