//! 编排器错误定义
//!
//! 把各组件的错误归入统一的分类，用于决定退出码与是否需要清理。

use thiserror::Error;

use ctf_cluster::ClusterError;
use ctf_executor::ExecutorError;
use ctf_lifecycle::LifecycleError;

use crate::command::ExitCode;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// 环境前置条件不满足，未创建任何资源
    #[error("前置条件不满足: {0}")]
    Precondition(String),

    /// provisioner 调用失败
    #[error("{0}")]
    Provision(String),

    /// 主机已启动但 shell 未就绪
    #[error("{0}")]
    ReadinessTimeout(String),

    /// 配置错误，不可重试
    #[error("{0}")]
    AddressNotFound(String),

    /// 配置管理阶段失败或部分主机未完成配置
    #[error("配置管理未完成: {message}")]
    Configuration {
        message: String,
        unconfigured: Vec<String>,
    },

    /// 清理失败，需要人工处理
    #[error("{0}")]
    Cleanup(String),

    #[error("{0}")]
    Execution(String),

    #[error("运行被中断")]
    Interrupted,

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            OrchestratorError::Precondition(_) => ExitCode::Precondition,
            OrchestratorError::Interrupted => ExitCode::Interrupted,
            _ => ExitCode::Failure,
        }
    }
}

impl From<LifecycleError> for OrchestratorError {
    fn from(e: LifecycleError) -> Self {
        if e.is_precondition() {
            return OrchestratorError::Precondition(e.to_string());
        }
        match e {
            LifecycleError::ProvisionFailed { .. } => OrchestratorError::Provision(e.to_string()),
            LifecycleError::DestroyFailed { .. } | LifecycleError::ResiduesRemain { .. } => {
                OrchestratorError::Cleanup(e.to_string())
            }
            LifecycleError::ConfigurationFailed { .. } => OrchestratorError::Configuration {
                message: e.to_string(),
                unconfigured: Vec::new(),
            },
            LifecycleError::Cluster(inner) => inner.into(),
            other => OrchestratorError::Execution(other.to_string()),
        }
    }
}

impl From<ClusterError> for OrchestratorError {
    fn from(e: ClusterError) -> Self {
        match e {
            ClusterError::ConfigNotFound(_)
            | ClusterError::ConfigParse { .. }
            | ClusterError::ClusterNotDefined { .. } => OrchestratorError::Precondition(e.to_string()),
            ClusterError::ReadinessTimeout { .. } => OrchestratorError::ReadinessTimeout(e.to_string()),
            ClusterError::AddressNotFound { .. } => OrchestratorError::AddressNotFound(e.to_string()),
            ClusterError::Cancelled => OrchestratorError::Interrupted,
            ClusterError::IoError(io) => OrchestratorError::IoError(io),
            ClusterError::SerdeError(message) => OrchestratorError::Execution(message),
        }
    }
}

impl From<ExecutorError> for OrchestratorError {
    fn from(e: ExecutorError) -> Self {
        if e.is_precondition() {
            return OrchestratorError::Precondition(e.to_string());
        }
        match e {
            ExecutorError::Cancelled => OrchestratorError::Interrupted,
            ExecutorError::IoError(io) => OrchestratorError::IoError(io),
            other => OrchestratorError::Execution(other.to_string()),
        }
    }
}
