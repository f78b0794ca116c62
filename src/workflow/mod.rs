//! 工作流握手：提交答案、等待引擎回调、产物归一化

pub mod artifact;
pub mod handshake;

pub use artifact::{ArtifactDescriptor, ArtifactStatus, WorkflowCallback};
pub use handshake::WorkflowHandshake;
