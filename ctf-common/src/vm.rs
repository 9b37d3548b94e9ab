//! 虚拟机记录

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 虚拟机可达状态
///
/// 状态迁移：`Unknown → Waiting → Reachable | Unreachable`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    Unknown,
    Waiting,
    Reachable,
    Unreachable,
}

impl Reachability {
    /// 检查状态迁移是否合法
    pub fn can_transition_to(self, next: Reachability) -> bool {
        use Reachability::*;
        matches!(
            (self, next),
            (Unknown, Waiting) | (Waiting, Waiting) | (Waiting, Reachable) | (Waiting, Unreachable)
        )
    }
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reachability::Unknown => "unknown",
            Reachability::Waiting => "waiting",
            Reachability::Reachable => "reachable",
            Reachability::Unreachable => "unreachable",
        };
        write!(f, "{}", s)
    }
}

/// 虚拟机在集群中的角色
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmRole {
    Controller,
    Compute,
    ControlPlane,
    Worker(String),
}

impl VmRole {
    /// 是否为控制节点（HPC controller 或 K8s control plane）
    pub fn is_control(&self) -> bool {
        matches!(self, VmRole::Controller | VmRole::ControlPlane)
    }
}

impl fmt::Display for VmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmRole::Controller => write!(f, "controller"),
            VmRole::Compute => write!(f, "compute"),
            VmRole::ControlPlane => write!(f, "control_plane"),
            VmRole::Worker(kind) => write!(f, "worker_{}", kind),
        }
    }
}

/// 远程 shell 凭据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshCredentials {
    /// 用户名
    pub user: String,

    /// 端口
    pub port: u16,

    /// 私钥路径
    pub key_path: Option<PathBuf>,

    /// 密码（不建议使用，优先使用密钥）
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Default for SshCredentials {
    fn default() -> Self {
        Self {
            user: "admin".to_string(),
            port: 22,
            key_path: None,
            password: None,
        }
    }
}

/// 虚拟机记录
///
/// 在发现阶段创建，轮询过程中更新，不会在运行结束后持久化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    /// 逻辑名称（例如 hpc-controller）
    pub name: String,

    /// 角色
    pub role: VmRole,

    /// 是否为 GPU 节点
    #[serde(default)]
    pub gpu: bool,

    /// 解析后的网络地址
    pub address: Option<String>,

    /// 可达状态
    pub state: Reachability,

    /// 远程 shell 凭据
    pub credentials: SshCredentials,
}

impl VmRecord {
    pub fn new(name: impl Into<String>, role: VmRole, credentials: SshCredentials) -> Self {
        Self {
            name: name.into(),
            role,
            gpu: false,
            address: None,
            state: Reachability::Unknown,
            credentials,
        }
    }

    /// 设置地址
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// 迁移可达状态，非法迁移返回 false 并保持原状态
    pub fn transition(&mut self, next: Reachability) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    /// 生成可直接使用的 SSH 登录命令
    pub fn ssh_command(&self) -> Option<String> {
        let address = self.address.as_ref()?;
        let mut cmd = String::from("ssh");
        if let Some(key) = &self.credentials.key_path {
            cmd.push_str(&format!(" -i {}", key.display()));
        }
        if self.credentials.port != 22 {
            cmd.push_str(&format!(" -p {}", self.credentials.port));
        }
        cmd.push_str(" -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null");
        cmd.push_str(&format!(" {}@{}", self.credentials.user, address));
        Some(cmd)
    }
}
