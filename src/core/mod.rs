//! 核心编排层：错误类型与主控流程

pub mod error;
pub mod orchestrator;

pub use error::OrchestratorError;
pub use orchestrator::Orchestrator;
