//! SSH 错误定义

use std::time::Duration;
use thiserror::Error;

/// SSH 操作结果类型
pub type Result<T> = std::result::Result<T, SshError>;

/// SSH 错误类型
#[derive(Error, Debug)]
pub enum SshError {
    /// 连接错误（主机未开放 SSH、拒绝连接、无法路由等）
    #[error("SSH 连接失败: {0}")]
    ConnectionError(String),

    /// 认证错误
    #[error("SSH 认证失败: {0}")]
    AuthenticationError(String),

    /// 命令执行错误
    #[error("命令执行失败: {0}")]
    ExecutionError(String),

    /// 上传错误
    #[error("文件上传失败: {0}")]
    UploadError(String),

    /// 超时错误（与非零退出码区分）
    #[error("SSH 操作超时 ({timeout:?}): {command}")]
    TimeoutError { command: String, timeout: Duration },

    /// IO 错误
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),
}
