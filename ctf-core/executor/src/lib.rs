//! CTF 执行器
//!
//! 测试套件执行引擎：
//! - 按字典序枚举脚本目录中的 `*.sh`
//! - 本地或远程执行单个脚本，超时与非零退出分别分类
//! - 全量执行时收集失败而不中止，多节点时并发执行
//! - 写入运行摘要

pub mod error;
pub mod report;
pub mod runner;
pub mod scripts;

pub use error::{ExecutorError, Result};
pub use report::write_summary;
pub use runner::{ExecutionTarget, RunnerConfig, ScriptEnv, SuiteRunner};
pub use scripts::{find_script, list_scripts};
