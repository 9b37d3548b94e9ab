//! CTF CLI 应用
//!
//! 所有测试套件共享同一组命令；套件本身只是配置文件中的一组数据。

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use ctf_orchestrator::{Command, ExitCode, Options};

mod commands;
mod config;
mod logging;

use commands::run::Invocation;
use config::SuiteOverrides;

#[derive(Parser)]
#[command(name = "ctf")]
#[command(about = "Cluster Test Framework - 虚拟机集群测试框架", long_about = None)]
#[command(version)]
struct Cli {
    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    /// 退出时不自动销毁集群（改为交互确认）
    #[arg(long, global = true)]
    no_cleanup: bool,

    /// 集群配置文档
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<String>,

    /// 只针对匹配的虚拟机（名称或通配模式）
    #[arg(long, global = true, value_name = "NAME")]
    target_vm: Option<String>,

    /// 测试套件名称（对应框架配置中的 [suites.<name>]）
    #[arg(short, long, global = true)]
    suite: Option<String>,

    /// 测试脚本目录
    #[arg(long, global = true, value_name = "DIR")]
    scripts_dir: Option<String>,

    /// 逻辑集群名称 (hpc/cloud)
    #[arg(long, global = true)]
    cluster: Option<String>,

    /// 配置管理 playbook
    #[arg(long, global = true, value_name = "PATH")]
    playbook: Option<String>,

    /// 框架配置文件
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// 在本机执行测试脚本
    #[arg(long, global = true)]
    local: bool,

    /// 日志级别
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 完整流程：启动 → 配置 → 测试 → 销毁
    #[command(name = "e2e", alias = "end-to-end")]
    EndToEnd,

    /// 启动集群并保持运行
    StartCluster,

    /// 销毁之前启动的集群
    StopCluster,

    /// 仅执行配置管理
    DeployAnsible,

    /// 仅执行测试脚本
    RunTests,

    /// 列出可用测试脚本
    ListTests,

    /// 执行单个测试脚本
    RunTest {
        /// 脚本名称（可省略 .sh）
        name: String,

        /// 传给脚本的参数
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// 查看集群状态
    Status,
}

fn command_from(command: Option<Commands>) -> Command {
    match command {
        None | Some(Commands::EndToEnd) => Command::EndToEnd,
        Some(Commands::StartCluster) => Command::StartCluster,
        Some(Commands::StopCluster) => Command::StopCluster,
        Some(Commands::DeployAnsible) => Command::DeployAnsible,
        Some(Commands::RunTests) => Command::RunTests,
        Some(Commands::ListTests) => Command::ListTests,
        Some(Commands::RunTest { name, args }) => Command::RunTest { name, args },
        Some(Commands::Status) => Command::Status,
    }
}

impl Cli {
    fn into_invocation(self) -> Invocation {
        Invocation {
            command: command_from(self.command),
            options: Options {
                verbose: self.verbose,
                no_cleanup: self.no_cleanup,
            },
            overrides: SuiteOverrides {
                suite: self.suite,
                config: self.config,
                cluster: self.cluster,
                scripts_dir: self.scripts_dir,
                target_vm: self.target_vm,
                playbook: self.playbook,
                local: self.local,
            },
            settings: self.settings,
            log_level: self.log_level,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match commands::run::execute(cli.into_invocation()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            ExitCode::Precondition
        }
    };

    std::process::exit(code.code());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_e2e() {
        let cli = Cli::try_parse_from(["ctf", "--config", "cluster.yaml"]).unwrap();
        let invocation = cli.into_invocation();
        assert_eq!(invocation.command, Command::EndToEnd);
        assert_eq!(invocation.overrides.config.as_deref(), Some("cluster.yaml"));
    }

    #[test]
    fn test_end_to_end_alias() {
        let cli = Cli::try_parse_from(["ctf", "end-to-end", "--no-cleanup"]).unwrap();
        let invocation = cli.into_invocation();
        assert_eq!(invocation.command, Command::EndToEnd);
        assert!(invocation.options.no_cleanup);
    }

    #[test]
    fn test_run_test_with_args() {
        let cli = Cli::try_parse_from([
            "ctf",
            "--target-vm",
            "hpc-compute-01",
            "run-test",
            "check-gpu",
            "--quick",
            "-n",
            "2",
        ])
        .unwrap();
        let invocation = cli.into_invocation();
        assert_eq!(
            invocation.command,
            Command::RunTest {
                name: "check-gpu".to_string(),
                args: vec!["--quick".to_string(), "-n".to_string(), "2".to_string()],
            }
        );
        assert_eq!(invocation.overrides.target_vm.as_deref(), Some("hpc-compute-01"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["ctf", "status", "--verbose", "--suite", "gpu"]).unwrap();
        let invocation = cli.into_invocation();
        assert_eq!(invocation.command, Command::Status);
        assert!(invocation.options.verbose);
        assert_eq!(invocation.overrides.suite.as_deref(), Some("gpu"));
    }
}
