//! 日志初始化
//!
//! 库内部只通过 `tracing` 宏输出日志，由应用决定是否安装订阅者。
//! 这里提供一个默认的 fmt 订阅者，过滤规则取自 `RUST_LOG`（缺省 `info`），
//! 同时把 `log` crate 的记录桥接到 `tracing`。

use tracing_subscriber::EnvFilter;

/// 安装默认日志订阅者
///
/// 已经安装过订阅者时返回错误，不会覆盖。
pub fn try_init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_log::LogTracer::init()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// 安装默认日志订阅者，忽略重复初始化
pub fn init_logging() {
    if let Err(e) = try_init_logging() {
        tracing::debug!("Logging already initialized: {}", e);
    }
}
