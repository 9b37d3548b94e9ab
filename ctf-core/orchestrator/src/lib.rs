//! 集群测试调度器
//!
//! 把生命周期管理、虚拟机发现、配置管理、测试执行与清理组合成统一的命令词汇表，
//! 每个测试套件只需提供集群配置与脚本目录。

pub mod command;
pub mod dispatch;
pub mod error;
pub mod signal;
pub mod status;
pub mod suite;

pub use command::{Command, ExitCode, Options};
pub use dispatch::{Outcome, OutcomeDetail};
pub use error::{OrchestratorError, Result};
pub use signal::{shutdown_signal, spawn_interrupt_listener};
pub use status::{StatusReport, VmStatus};
pub use suite::{ExecutionMode, Suite, SuiteBuilder};
