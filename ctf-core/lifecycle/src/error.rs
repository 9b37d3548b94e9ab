//! 生命周期错误定义

use std::time::Duration;
use thiserror::Error;

use ctf_cluster::ClusterError;

pub type Result<T> = std::result::Result<T, LifecycleError>;

#[derive(Error, Debug)]
pub enum LifecycleError {
    /// 目标集群已在运行（环境前置条件不满足）
    #[error("集群资源已存在: {resource}\n请先销毁: {destroy_command}")]
    AlreadyRunning {
        resource: String,
        destroy_command: String,
    },

    /// provisioner 启动集群失败，不做重试
    #[error("集群启动失败: {command} (退出码 {exit_code:?})\n{output}")]
    ProvisionFailed {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("集群销毁失败: {command} (退出码 {exit_code:?})\n{output}")]
    DestroyFailed {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("命令执行失败: {command} (退出码 {exit_code:?})\n{output}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    /// 销毁后仍有残留资源
    #[error("销毁后仍有残留资源: {}\n验证命令: {verify_command}", resources.join(", "))]
    ResiduesRemain {
        resources: Vec<String>,
        verify_command: String,
    },

    #[error("命令执行超时 ({timeout:?}): {command}")]
    Timeout { command: String, timeout: Duration },

    #[error("无法启动命令 {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// 配置管理阶段失败
    #[error("配置管理失败: {command} (退出码 {exit_code:?})\n{output}")]
    ConfigurationFailed {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(String),
}

impl LifecycleError {
    /// 是否为环境前置条件错误（未创建任何资源）
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            LifecycleError::AlreadyRunning { .. }
                | LifecycleError::Cluster(ClusterError::ConfigNotFound(_))
                | LifecycleError::Cluster(ClusterError::ConfigParse { .. })
                | LifecycleError::Cluster(ClusterError::ClusterNotDefined { .. })
        )
    }
}
