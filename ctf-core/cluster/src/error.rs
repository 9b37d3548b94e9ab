//! 集群发现错误定义

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("集群配置文件不存在: {0}")]
    ConfigNotFound(PathBuf),

    #[error("解析集群配置失败 {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("集群配置中未定义集群 '{name}' (可用: {available})")]
    ClusterNotDefined { name: String, available: String },

    /// 配置错误，不可重试
    #[error("无法解析虚拟机地址 '{vm}': {reason}")]
    AddressNotFound { vm: String, reason: String },

    /// 主机已启动但 shell 尚未就绪，调用方可重试
    #[error(
        "等待虚拟机 {vm} ({address}) 就绪超时: {attempts} 次尝试, 耗时 {elapsed:?}, 最后错误: {last_error}"
    )]
    ReadinessTimeout {
        vm: String,
        address: String,
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },

    #[error("操作已取消")]
    Cancelled,

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(String),
}
