//! CTF 通用类型定义
//!
//! 此 crate 包含集群测试框架各组件之间共享的数据模型：
//! - 集群描述符 (ClusterDescriptor)
//! - 虚拟机记录与可达状态 (VmRecord / Reachability)
//! - 测试结果与测试运行 (TestResult / TestRun)
//! - 运行目录布局 (RunContext)

pub mod descriptor;
pub mod pattern;
pub mod report;
pub mod run;
pub mod vm;

pub use descriptor::ClusterDescriptor;
pub use pattern::matches_pattern;
pub use report::{RunStatus, TestOutcome, TestResult, TestRun};
pub use run::RunContext;
pub use vm::{Reachability, SshCredentials, VmRecord, VmRole};

/// 本地执行目标的名称（控制端测试）
pub const LOCAL_TARGET: &str = "local";
