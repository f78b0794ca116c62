//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WASP__*` 覆盖（双下划线表示嵌套，
//! 如 `WASP__WORKFLOW__ENDPOINT_URL=https://...`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub correlator: CorrelatorSection,
}

/// [server] 段：回调监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// [workflow] 段：工作流引擎端点与握手超时
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSection {
    /// 引擎的入站 webhook URL（未配置时握手直接走失败回退）
    pub endpoint_url: Option<String>,
    /// 等待引擎回调的截止时长（秒）
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

fn default_handshake_timeout_secs() -> u64 {
    300
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl WorkflowSection {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// 下游系统端点：稳定标识 + URL
#[derive(Debug, Clone, Deserialize)]
pub struct SystemEndpoint {
    pub id: String,
    pub url: String,
}

/// [dispatch] 段：下游系统列表（按配置顺序分发）与单步超时
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSection {
    #[serde(default)]
    pub systems: Vec<SystemEndpoint>,
    /// 单个系统等待完成确认的截止时长（秒）
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// 相邻两步之间的停顿（毫秒）
    #[serde(default = "default_step_pause_ms")]
    pub step_pause_ms: u64,
}

fn default_step_timeout_secs() -> u64 {
    180
}

fn default_step_pause_ms() -> u64 {
    500
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            systems: Vec::new(),
            step_timeout_secs: default_step_timeout_secs(),
            step_pause_ms: default_step_pause_ms(),
        }
    }
}

impl DispatchSection {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn step_pause(&self) -> Duration {
        Duration::from_millis(self.step_pause_ms)
    }
}

/// [http] 段：出站客户端。注意出站请求只需「被接受」，真正的完成
/// 走回调，所以这里的超时远小于 PendingWait 的截止时长。
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSection {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 出站请求的 User-Agent / 客户端标识
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// 跳过 TLS 证书校验（部署层决定；参考部署关闭了校验，默认保持开启校验）
    #[serde(default)]
    pub danger_accept_invalid_certs: bool,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_client_id() -> String {
    "wasp-orchestrator/1.0".to_string()
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            client_id: default_client_id(),
            danger_accept_invalid_certs: false,
        }
    }
}

impl HttpSection {
    /// 按本段配置构建出站客户端
    pub fn build_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .user_agent(self.client_id.clone())
            .danger_accept_invalid_certs(self.danger_accept_invalid_certs)
            .build()
    }
}

/// [correlator] 段：后台 reaper 的清扫周期与墓碑宽限期
#[derive(Debug, Clone, Deserialize)]
pub struct CorrelatorSection {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_grace_secs() -> u64 {
    30
}

impl Default for CorrelatorSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            grace_secs: default_grace_secs(),
        }
    }
}

impl CorrelatorSection {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

/// 从 config 目录加载配置，环境变量 WASP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WASP__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WASP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
