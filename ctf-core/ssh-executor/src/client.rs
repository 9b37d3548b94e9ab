//! SSH 客户端实现
//!
//! 在 [`RemoteShell`] 传输之上提供面向单台主机的执行接口：
//! 就绪探测、带超时的命令执行、幂等上传。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::SshConfig;
use crate::error::{Result, SshError};
use crate::shell::{CommandOutput, RemoteShell};

/// 就绪探测命令的期望输出
const PROBE_MARKER: &str = "SSH ready";

/// SSH 客户端
#[derive(Clone)]
pub struct SshClient {
    config: SshConfig,
    shell: Arc<dyn RemoteShell>,
}

impl SshClient {
    /// 使用指定的传输创建客户端
    pub fn with_shell(config: SshConfig, shell: Arc<dyn RemoteShell>) -> Self {
        Self { config, shell }
    }

    /// 单次就绪探测
    ///
    /// 探测受连接超时约束，而不是命令超时。
    pub async fn probe(&self) -> Result<()> {
        let command = format!("echo '{}'", PROBE_MARKER);
        let output = self
            .shell
            .execute(&self.config, &command, self.config.connect_timeout * 2)
            .await?;

        if output.stdout.trim() != PROBE_MARKER {
            return Err(SshError::ConnectionError(format!(
                "SSH 就绪探测失败 ({}): {}",
                self.config.address(),
                output.combined_output()
            )));
        }
        Ok(())
    }

    /// 执行命令（使用配置的命令超时）
    pub async fn execute(&self, command: &str) -> Result<CommandOutput> {
        self.execute_with_timeout(command, self.config.command_timeout).await
    }

    /// 执行命令并指定超时
    ///
    /// 超时返回 [`SshError::TimeoutError`]，非零退出码作为正常输出返回。
    pub async fn execute_with_timeout(&self, command: &str, limit: Duration) -> Result<CommandOutput> {
        debug!("执行命令 [{}]: {}", self.config.address(), command);
        self.shell.execute(&self.config, command, limit).await
    }

    /// 执行命令并检查是否成功
    pub async fn execute_checked(&self, command: &str) -> Result<CommandOutput> {
        let output = self.execute(command).await?;

        if !output.is_success() {
            return Err(SshError::ExecutionError(format!(
                "{} (退出码 {:?}): {}",
                command,
                output.exit_code,
                output.combined_output()
            )));
        }

        Ok(output)
    }

    /// 上传本地文件或目录，使其内容位于远程路径 `remote_path`
    ///
    /// 幂等：先删除远程旧副本再复制，避免重复运行时执行到过期脚本。
    /// 返回远程路径。
    pub async fn upload(&self, local: &Path, remote_path: &str) -> Result<String> {
        let remote_path = remote_path.trim_end_matches('/').to_string();
        let parent = match remote_path.rsplit_once('/') {
            Some((parent, name)) if !name.is_empty() => parent,
            _ => {
                return Err(SshError::ConfigError(format!(
                    "无效的远程上传路径: {}",
                    remote_path
                )))
            }
        };

        let prepare = if parent.is_empty() {
            format!("rm -rf {}", shell_quote(&remote_path))
        } else {
            format!(
                "mkdir -p {} && rm -rf {}",
                shell_quote(parent),
                shell_quote(&remote_path)
            )
        };
        self.execute_checked(&prepare).await?;

        info!(
            "上传 {} -> {}:{}",
            local.display(),
            self.config.address(),
            remote_path
        );
        self.shell.upload(&self.config, local, &remote_path).await?;
        Ok(remote_path)
    }

    /// 获取配置
    pub fn config(&self) -> &SshConfig {
        &self.config
    }
}

/// 用单引号包裹参数，供远程 shell 使用
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
