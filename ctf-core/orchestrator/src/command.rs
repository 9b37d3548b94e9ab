//! 命令词汇表
//!
//! 所有测试套件共享同一组命令。

use std::fmt;

/// 调度器命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 完整流程：启动 → 配置 → 测试 → 销毁（默认命令）
    EndToEnd,
    /// 仅启动集群，保持运行
    StartCluster,
    /// 销毁之前启动的集群
    StopCluster,
    /// 仅执行配置管理阶段
    DeployAnsible,
    /// 仅执行测试脚本
    RunTests,
    /// 列出可用脚本
    ListTests,
    /// 执行单个脚本
    RunTest { name: String, args: Vec<String> },
    /// 报告集群状态（无副作用）
    Status,
}

impl Command {
    /// 是否需要创建运行目录
    ///
    /// list-tests 与 status 不写入任何文件。
    pub fn needs_run_dir(&self) -> bool {
        !matches!(self, Command::ListTests | Command::Status)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::EndToEnd => write!(f, "e2e"),
            Command::StartCluster => write!(f, "start-cluster"),
            Command::StopCluster => write!(f, "stop-cluster"),
            Command::DeployAnsible => write!(f, "deploy-ansible"),
            Command::RunTests => write!(f, "run-tests"),
            Command::ListTests => write!(f, "list-tests"),
            Command::RunTest { name, .. } => write!(f, "run-test {}", name),
            Command::Status => write!(f, "status"),
        }
    }
}

/// 全局选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub verbose: bool,
    /// 禁止自动销毁，改为交互确认
    pub no_cleanup: bool,
}

/// 进程退出码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    Failure,
    /// 环境前置条件不满足
    Precondition,
    Interrupted,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Failure => 1,
            ExitCode::Precondition => 2,
            ExitCode::Interrupted => 130,
        }
    }
}
