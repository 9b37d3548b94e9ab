//! 外部命令执行（provisioner / 配置管理）

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{LifecycleError, Result};

/// 外部命令输出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// 实际执行的命令行
    pub command: String,
    /// 合并后的 stdout + stderr
    pub output: String,
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// 通过 `sh -c` 执行命令行
pub async fn run_shell(command_line: &str, limit: Duration) -> Result<ProcessOutput> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command_line);
    run_command(&mut cmd, command_line, limit).await
}

/// 执行命令，标准输入关闭，超时返回 [`LifecycleError::Timeout`]
pub async fn run_command(cmd: &mut Command, label: &str, limit: Duration) -> Result<ProcessOutput> {
    debug!("执行命令: {}", label);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // 独立进程组：终端 Ctrl+C 只送达框架本身，由框架决定何时终止子进程
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn().map_err(|source| LifecycleError::Spawn {
        command: label.to_string(),
        source,
    })?;

    let output = timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| LifecycleError::Timeout {
            command: label.to_string(),
            timeout: limit,
        })??;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (_, true) => stdout.trim_end().to_string(),
        (true, false) => stderr.trim_end().to_string(),
        (false, false) => format!("{}\n{}", stdout.trim_end(), stderr.trim_end()),
    };

    debug!("命令完成, 退出码: {:?}", output.status.code());
    Ok(ProcessOutput {
        command: label.to_string(),
        output: combined,
        exit_code: output.status.code(),
    })
}

/// 追加写入操作记录
pub fn append_transcript(path: &Path, output: &ProcessOutput) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "[{}] $ {}", Utc::now().to_rfc3339(), output.command)?;
    if !output.output.is_empty() {
        writeln!(file, "{}", output.output)?;
    }
    writeln!(file, "[退出码: {:?}]", output.exit_code)?;
    writeln!(file)?;
    Ok(())
}
