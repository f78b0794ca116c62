//! 可观测性：tracing 初始化
//!
//! 默认 info 级别，RUST_LOG 可覆盖（如 RUST_LOG=wasp=debug）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();
}
