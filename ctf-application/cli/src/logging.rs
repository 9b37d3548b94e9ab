//! 日志初始化
//!
//! 终端输出带颜色；创建了运行目录的命令额外写一份无 ANSI 的 `framework.log`。

use anyhow::{bail, Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 计算默认过滤级别：`--verbose` 优先于 `--log-level`
pub fn default_level(verbose: bool, log_level: &str) -> Result<Level> {
    if verbose {
        return Ok(Level::DEBUG);
    }
    match log_level.parse::<Level>() {
        Ok(level) => Ok(level),
        Err(_) => bail!("无效的日志级别: {} (可选 trace/debug/info/warn/error)", log_level),
    }
}

fn env_filter(level: Level) -> EnvFilter {
    // RUST_LOG 覆盖命令行
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()))
}

/// 初始化全局 subscriber
pub fn init(level: Level, framework_log: Option<&Path>) -> Result<()> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter(level));

    let file_layer = match framework_log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("无法打开日志文件: {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_filter(env_filter(level)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("日志系统初始化失败")?;
    Ok(())
}
