//! 产物描述（ArtifactDescriptor）与回调体的容错归一化
//!
//! 引擎回调里缺字段、字段名写错（把标题发成 `sheetid`）都在这里兜住：
//! 成功但不完整的回调补占位值后照常 resolve，绝不当作畸形拒掉。
//! 失败 / 超时同样产出一个占位描述——下游分发无论如何都要带着
//! 结构完整的 artifact 跑完。

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 占位产物 ID（引擎失败 / 超时 / 回调缺字段时）
pub const PLACEHOLDER_ID: &str = "not_available";
/// 占位产物 URL
pub const PLACEHOLDER_URL: &str = "https://docs.google.com/spreadsheets/d/not_available";
/// 占位产物标题
pub const PLACEHOLDER_TITLE: &str = "表格未创建";

/// `POST /workflow/callback` 的请求体（camelCase 线格式）
///
/// `sheetid` 是引擎侧偶发的错误字段名，单独收下来，由 `normalize` 归一。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCallback {
    pub correlation_key: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub artifact_id: Option<String>,
    pub artifact_url: Option<String>,
    pub artifact_title: Option<String>,
    /// 错误字段名：本应是 artifactTitle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheetid: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Option<String>,
}

fn default_status() -> String {
    "success".to_string()
}

impl WorkflowCallback {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// 入口侧归一化：搬走错误字段名、补齐缺失的成功字段。
    /// 返回做过的替换清单，调用方记 warn。
    pub fn normalize(&mut self) -> Vec<&'static str> {
        let mut fixes = Vec::new();

        if self.artifact_title.is_none() {
            if let Some(title) = self.sheetid.take() {
                self.artifact_title = Some(title);
                fixes.push("sheetid -> artifactTitle");
            }
        }
        self.sheetid = None;

        if self.is_success() {
            if self.artifact_id.is_none() {
                self.artifact_id = Some(PLACEHOLDER_ID.to_string());
                fixes.push("artifactId <- placeholder");
            }
            if self.artifact_url.is_none() {
                self.artifact_url = Some(PLACEHOLDER_URL.to_string());
                fixes.push("artifactUrl <- placeholder");
            }
            if self.artifact_title.is_none() {
                self.artifact_title = Some(PLACEHOLDER_TITLE.to_string());
                fixes.push("artifactTitle <- placeholder");
            }
        }
        if self.created_at.is_none() {
            self.created_at = Some(Utc::now().to_rfc3339());
        }

        fixes
    }
}

/// 产物状态：成功或带消息的失败
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "message")]
pub enum ArtifactStatus {
    Success,
    Failed(String),
}

/// 工作流握手的结果。失败时 id/url/title 是定义好的占位值而非缺省——
/// 下游载荷必须始终结构完整。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescriptor {
    pub id: String,
    pub url: String,
    pub title: String,
    pub created_at: String,
    pub status: ArtifactStatus,
}

impl ArtifactDescriptor {
    /// 失败 / 超时路径的占位描述
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            id: PLACEHOLDER_ID.to_string(),
            url: PLACEHOLDER_URL.to_string(),
            title: PLACEHOLDER_TITLE.to_string(),
            created_at: Utc::now().to_rfc3339(),
            status: ArtifactStatus::Failed(message.into()),
        }
    }

    /// 由（已归一化的）引擎回调构造
    pub fn from_callback(mut cb: WorkflowCallback) -> Self {
        cb.normalize();
        let created_at = cb
            .created_at
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        if cb.status == "success" {
            Self {
                id: cb.artifact_id.unwrap_or_else(|| PLACEHOLDER_ID.to_string()),
                url: cb.artifact_url.unwrap_or_else(|| PLACEHOLDER_URL.to_string()),
                title: cb
                    .artifact_title
                    .unwrap_or_else(|| PLACEHOLDER_TITLE.to_string()),
                created_at,
                status: ArtifactStatus::Success,
            }
        } else {
            let message = cb
                .error_message
                .unwrap_or_else(|| "workflow engine reported an error".to_string());
            Self {
                id: PLACEHOLDER_ID.to_string(),
                url: PLACEHOLDER_URL.to_string(),
                title: PLACEHOLDER_TITLE.to_string(),
                created_at,
                status: ArtifactStatus::Failed(message),
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ArtifactStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback(json: serde_json::Value) -> WorkflowCallback {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_sheetid_alias_is_normalized_to_title() {
        let mut cb = callback(serde_json::json!({
            "correlationKey": "u1_1",
            "status": "success",
            "artifactId": "X",
            "artifactUrl": "https://example/X",
            "sheetid": "真实标题"
        }));
        let fixes = cb.normalize();
        assert_eq!(cb.artifact_title.as_deref(), Some("真实标题"));
        assert!(cb.sheetid.is_none());
        assert!(fixes.contains(&"sheetid -> artifactTitle"));
    }

    #[test]
    fn test_correct_callback_passes_through() {
        let cb = callback(serde_json::json!({
            "correlationKey": "u1_1",
            "status": "success",
            "artifactId": "X",
            "artifactUrl": "https://example/X",
            "artifactTitle": "T",
            "createdAt": "2024-09-20T17:00:00Z"
        }));
        let desc = ArtifactDescriptor::from_callback(cb);
        assert!(desc.is_success());
        assert_eq!(desc.id, "X");
        assert_eq!(desc.title, "T");
        assert_eq!(desc.created_at, "2024-09-20T17:00:00Z");
    }

    #[test]
    fn test_incomplete_success_gets_placeholders() {
        let mut cb = callback(serde_json::json!({
            "correlationKey": "u1_1",
            "status": "success"
        }));
        let fixes = cb.normalize();
        assert_eq!(fixes.len(), 3);

        let desc = ArtifactDescriptor::from_callback(cb);
        // 成功但不完整：仍算成功，字段补占位
        assert!(desc.is_success());
        assert_eq!(desc.id, PLACEHOLDER_ID);
        assert_eq!(desc.url, PLACEHOLDER_URL);
        assert_eq!(desc.title, PLACEHOLDER_TITLE);
    }

    #[test]
    fn test_error_callback_becomes_failed_placeholder() {
        let cb = callback(serde_json::json!({
            "correlationKey": "u1_1",
            "status": "error",
            "errorMessage": "quota exceeded"
        }));
        let desc = ArtifactDescriptor::from_callback(cb);
        assert!(!desc.is_success());
        assert_eq!(desc.id, PLACEHOLDER_ID);
        assert_eq!(desc.status, ArtifactStatus::Failed("quota exceeded".to_string()));
    }
}
