//! CTF SSH 执行器
//!
//! 提供远程执行引擎，支持：
//! - 密码认证（sshpass）与密钥认证
//! - 带超时的命令执行，超时与非零退出码区分
//! - 幂等的脚本上传（覆盖旧副本）
//! - 可替换的传输层 ([`RemoteShell`])
//!
//! # 示例
//!
//! ```ignore
//! use ctf_ssh_executor::{SshClient, SshConfig, SystemSsh};
//!
//! let config = SshConfig::with_key("192.168.100.10", "admin", "~/.ssh/id_rsa");
//! let client = SshClient::with_shell(config, Arc::new(SystemSsh::new()));
//! client.probe().await?;
//! let remote = client.upload(Path::new("tests/suites/gpu"), "/tmp/ctf-tests/gpu").await?;
//! let output = client.execute(&format!("cd {} && bash check-driver.sh", remote)).await?;
//! println!("{}", output.stdout);
//! ```

mod client;
mod config;
mod error;
mod shell;

pub use client::{shell_quote, SshClient};
pub use config::{AuthMethod, SshConfig};
pub use error::{Result, SshError};
pub use shell::{CommandOutput, RemoteShell, SystemSsh};
