//! 远程 shell 传输
//!
//! 使用系统 ssh/sshpass/scp 命令，兼容性更好。所有调用均为非交互式：
//! 标准输入重定向到 /dev/null，密钥认证启用 BatchMode，禁止交互式提示。

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::{AuthMethod, SshConfig};
use crate::error::{Result, SshError};

/// 命令执行输出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// 标准输出
    pub stdout: String,
    /// 标准错误
    pub stderr: String,
    /// 退出码（被信号终止时为 None）
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// 检查命令是否成功执行
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// 获取合并的输出（stdout + stderr）
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// 远程 shell 传输接口
///
/// 接受主机地址 + 凭据 + 命令，返回输出与退出状态。
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// 执行命令，超过 `limit` 返回 [`SshError::TimeoutError`]
    async fn execute(&self, config: &SshConfig, command: &str, limit: Duration) -> Result<CommandOutput>;

    /// 将本地文件或目录复制为远程路径 `remote_path`（目标不存在时创建）
    async fn upload(&self, config: &SshConfig, local: &Path, remote_path: &str) -> Result<()>;
}

/// 基于系统 ssh/scp 命令的传输实现
#[derive(Debug, Clone, Default)]
pub struct SystemSsh;

impl SystemSsh {
    pub fn new() -> Self {
        Self
    }

    /// 构造带认证前缀的命令（sshpass 或直接调用）
    fn base_command(program: &str, config: &SshConfig) -> Command {
        match &config.auth {
            AuthMethod::Password(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-p").arg(password).arg(program);
                cmd
            }
            AuthMethod::Key { key_path } => {
                let mut cmd = Command::new(program);
                cmd.arg("-i").arg(expand_path(key_path));
                cmd.arg("-o").arg("BatchMode=yes");
                cmd
            }
            AuthMethod::DefaultKey => {
                let mut cmd = Command::new(program);
                cmd.arg("-o").arg("BatchMode=yes");
                cmd
            }
        }
    }

    /// 通用 SSH 参数
    fn common_options(cmd: &mut Command, config: &SshConfig) {
        cmd.arg("-o").arg("StrictHostKeyChecking=no")
            .arg("-o").arg("UserKnownHostsFile=/dev/null")
            .arg("-o").arg("LogLevel=ERROR")
            .arg("-o").arg(format!("ConnectTimeout={}", config.connect_timeout.as_secs().max(1)))
            .arg("-o").arg("NumberOfPasswordPrompts=1");
    }

    async fn run(cmd: &mut Command, label: &str, limit: Duration) -> Result<CommandOutput> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| SshError::ExecutionError(format!("启动 {} 进程失败: {}", label, e)))?;

        let output = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| SshError::TimeoutError {
                command: label.to_string(),
                timeout: limit,
            })?
            .map_err(|e| SshError::ExecutionError(format!("等待 {} 进程失败: {}", label, e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            exit_code: output.status.code(),
        })
    }
}

#[async_trait]
impl RemoteShell for SystemSsh {
    async fn execute(&self, config: &SshConfig, command: &str, limit: Duration) -> Result<CommandOutput> {
        let mut cmd = Self::base_command("ssh", config);
        Self::common_options(&mut cmd, config);
        cmd.arg("-p")
            .arg(config.port.to_string())
            .arg(config.destination())
            .arg(command);

        debug!("执行 SSH 命令 [{}]: {}", config.address(), command);
        let output = Self::run(&mut cmd, command, limit).await?;
        classify_transport_failure(&output)?;

        debug!(
            "命令执行完成, 退出码: {:?}, stdout 长度: {}, stderr 长度: {}",
            output.exit_code,
            output.stdout.len(),
            output.stderr.len()
        );
        Ok(output)
    }

    async fn upload(&self, config: &SshConfig, local: &Path, remote_path: &str) -> Result<()> {
        let mut cmd = Self::base_command("scp", config);
        Self::common_options(&mut cmd, config);
        cmd.arg("-r")
            .arg("-P")
            .arg(config.port.to_string())
            .arg(local)
            .arg(format!("{}:{}", config.destination(), remote_path));

        let label = format!("scp {} {}:{}", local.display(), config.destination(), remote_path);
        debug!("上传文件: {}", label);

        let output = Self::run(&mut cmd, &label, config.command_timeout).await?;
        classify_transport_failure(&output)?;

        if !output.is_success() {
            return Err(SshError::UploadError(format!(
                "{} (退出码 {:?}): {}",
                label,
                output.exit_code,
                output.combined_output()
            )));
        }
        Ok(())
    }
}

/// 识别 ssh 自身的失败（退出码 255 或 sshpass 的 5）
fn classify_transport_failure(output: &CommandOutput) -> Result<()> {
    if output.exit_code != Some(255) && output.exit_code != Some(5) {
        return Ok(());
    }

    let stderr = &output.stderr;
    if stderr.contains("Permission denied")
        || stderr.contains("Authentication failed")
        || stderr.contains("Too many authentication failures")
    {
        return Err(SshError::AuthenticationError(stderr.clone()));
    }

    const CONNECTION_MARKERS: [&str; 6] = [
        "Connection refused",
        "Connection timed out",
        "No route to host",
        "Could not resolve hostname",
        "Connection closed",
        "Connection reset",
    ];
    if CONNECTION_MARKERS.iter().any(|m| stderr.contains(m)) {
        return Err(SshError::ConnectionError(stderr.clone()));
    }

    Ok(())
}

/// 展开路径（处理 ~）
pub(crate) fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(rest) = path_str.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return PathBuf::from(format!("{}{}", home.to_string_lossy(), rest));
        }
    }
    path.to_path_buf()
}
