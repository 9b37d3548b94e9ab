//! 执行器错误定义

use std::path::PathBuf;
use thiserror::Error;

use ctf_ssh_executor::SshError;

pub type Result<T> = std::result::Result<T, ExecutorError>;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("测试脚本目录不存在: {0}")]
    ScriptsDirNotFound(PathBuf),

    #[error("测试脚本不存在: {name} (可用: {available})")]
    ScriptNotFound { name: String, available: String },

    #[error("上传测试脚本到 {vm} 失败: {source}")]
    UploadFailed {
        vm: String,
        #[source]
        source: SshError,
    },

    #[error("执行目标 {0} 没有可用地址")]
    NoAddress(String),

    #[error("执行已取消")]
    Cancelled,

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(String),
}

impl ExecutorError {
    /// 是否为环境前置条件错误（脚本目录或脚本不存在）
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ExecutorError::ScriptsDirNotFound(_) | ExecutorError::ScriptNotFound { .. }
        )
    }
}
