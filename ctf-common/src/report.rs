//! 测试结果与测试运行报告

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::descriptor::ClusterDescriptor;

/// 单个脚本的执行结果分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    /// 退出码为 0
    Passed,
    /// 退出码非 0
    Failed,
    /// 执行超时（主机可能挂起）
    TimedOut,
    /// 传输失败，脚本未能运行
    Error,
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestOutcome::Passed => "passed",
            TestOutcome::Failed => "failed",
            TestOutcome::TimedOut => "timed_out",
            TestOutcome::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// 测试结果（追加后不再修改）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// 脚本名称
    pub script: String,

    /// 执行目标（虚拟机名称或 "local"）
    pub target: String,

    /// 退出码
    pub exit_code: Option<i32>,

    /// 结果分类
    pub outcome: TestOutcome,

    /// 输出日志路径
    pub log_path: PathBuf,

    /// 耗时（毫秒）
    pub duration_ms: u64,

    /// 开始时间
    pub started_at: DateTime<Utc>,

    /// 错误信息
    pub error: Option<String>,
}

impl TestResult {
    pub fn is_passed(&self) -> bool {
        self.outcome == TestOutcome::Passed
    }
}

/// 测试运行总体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Passed,
    Failed,
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// 测试运行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    /// 运行 ID（由时间戳生成）
    pub run_id: String,

    /// 测试套件名称
    pub suite: String,

    /// 日志目录
    pub log_dir: PathBuf,

    /// 集群描述符
    pub descriptor: ClusterDescriptor,

    /// 测试结果列表
    pub results: Vec<TestResult>,

    /// 总体状态
    pub status: RunStatus,

    /// 中止原因
    pub abort_reason: Option<String>,

    /// 开始时间
    pub started_at: DateTime<Utc>,

    /// 结束时间
    pub finished_at: Option<DateTime<Utc>>,

    /// 命令最终退出码（包含清理结果的影响）
    #[serde(default)]
    pub exit_code: Option<i32>,

    /// 清理结果
    #[serde(default)]
    pub cleanup: Option<String>,
}

impl TestRun {
    pub fn new(
        run_id: impl Into<String>,
        suite: impl Into<String>,
        log_dir: impl Into<PathBuf>,
        descriptor: ClusterDescriptor,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            suite: suite.into(),
            log_dir: log_dir.into(),
            descriptor,
            results: Vec::new(),
            status: RunStatus::Running,
            abort_reason: None,
            started_at: Utc::now(),
            finished_at: None,
            exit_code: None,
            cleanup: None,
        }
    }

    /// 追加测试结果
    pub fn add_result(&mut self, result: TestResult) {
        self.results.push(result);
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.passed_count()
    }

    /// 中止运行（已中止的运行保留第一次的原因）
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.status != RunStatus::Aborted {
            self.status = RunStatus::Aborted;
            self.abort_reason = Some(reason.into());
        }
    }

    /// 完成运行并计算总体状态
    ///
    /// 没有任何结果的运行视为失败。
    pub fn finalize(&mut self) -> RunStatus {
        self.finished_at = Some(Utc::now());
        if self.status != RunStatus::Aborted {
            self.status = if self.failed_count() == 0 && !self.results.is_empty() {
                RunStatus::Passed
            } else {
                RunStatus::Failed
            };
        }
        self.status
    }

    /// 记录最终退出码与清理结果（在清理完成后调用）
    pub fn settle(&mut self, exit_code: i32, cleanup: Option<String>) {
        self.exit_code = Some(exit_code);
        self.cleanup = cleanup;
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// 生成人类可读的摘要
    pub fn summary_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("run:      {}\n", self.run_id));
        out.push_str(&format!("suite:    {}\n", self.suite));
        out.push_str(&format!("cluster:  {}\n", self.descriptor.cluster_name));
        out.push_str(&format!("config:   {}\n", self.descriptor.config_path.display()));
        if let Some(target) = &self.descriptor.target_vm {
            out.push_str(&format!("target:   {}\n", target));
        }
        out.push_str(&format!("status:   {}\n", self.status));
        if let Some(reason) = &self.abort_reason {
            out.push_str(&format!("reason:   {}\n", reason));
        }
        if let Some(cleanup) = &self.cleanup {
            out.push_str(&format!("cleanup:  {}\n", cleanup));
        }
        if let Some(code) = self.exit_code {
            out.push_str(&format!("exit:     {}\n", code));
        }
        out.push_str(&format!(
            "total: {}  passed: {}  failed: {}\n\n",
            self.results.len(),
            self.passed_count(),
            self.failed_count()
        ));

        for result in &self.results {
            out.push_str(&format!(
                "[{:<9}] {:<16} {} ({} ms) -> {}\n",
                result.outcome.to_string(),
                result.target,
                result.script,
                result.duration_ms,
                result.log_path.display()
            ));
        }
        out
    }
}
