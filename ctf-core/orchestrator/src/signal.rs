//! 中断信号处理
//!
//! SIGINT / SIGTERM 取消共享的 [`CancellationToken`]：不再发起新的远程操作，
//! 已在执行的操作按各自的超时结束，随后统一走清理路径。

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// 等待 SIGINT 或 SIGTERM
///
/// 信号处理器安装失败时对应分支永不完成。
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装 Ctrl+C 处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("安装 SIGTERM 处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// 在后台监听中断信号并取消令牌
///
/// 必须在启动集群之前调用。令牌被其他途径取消时监听任务随之退出。
pub fn spawn_interrupt_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                warn!("收到中断信号，停止发起新的操作并执行清理");
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_exits_when_token_cancelled() {
        let cancel = CancellationToken::new();
        let handle = spawn_interrupt_listener(cancel.clone());
        cancel.cancel();
        handle.await.unwrap();
    }
}
