//! 终端输出
//!
//! 所有 `println!` 都集中在这里，编排逻辑只产出 [`Outcome`]。

use colored::Colorize;

use ctf_common::{Reachability, TestOutcome, TestResult, TestRun, VmRecord};
use ctf_lifecycle::{CleanupOutcome, ConfigurationReport, Runbook};
use ctf_orchestrator::{Outcome, OutcomeDetail, StatusReport, VmStatus};

/// 可输出为表格行的数据
pub trait TableRow {
    fn headers() -> Vec<&'static str>;

    fn row(&self) -> Vec<String>;
}

impl TableRow for TestResult {
    fn headers() -> Vec<&'static str> {
        vec!["脚本", "目标", "结果", "退出码", "耗时"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.script.clone(),
            self.target.clone(),
            self.outcome.to_string(),
            self.exit_code.map_or_else(|| "-".to_string(), |c| c.to_string()),
            format!("{:.1}s", self.duration_ms as f64 / 1000.0),
        ]
    }
}

impl TableRow for VmStatus {
    fn headers() -> Vec<&'static str> {
        vec!["虚拟机", "角色", "存在", "地址", "可达性"]
    }

    fn row(&self) -> Vec<String> {
        let present = match self.present {
            Some(true) => "yes",
            Some(false) => "no",
            None => "?",
        };
        vec![
            self.name.clone(),
            self.role.to_string(),
            present.to_string(),
            self.address.clone().unwrap_or_else(|| "-".to_string()),
            self.reachability.to_string(),
        ]
    }
}

/// 表格输出
pub fn print_table<T: TableRow>(items: &[T]) {
    let headers = T::headers();
    let header_line: String = headers
        .iter()
        .map(|h| format!("{:<20}", h))
        .collect::<Vec<_>>()
        .join(" ");
    println!("{}", header_line.bold());
    println!("{}", "-".repeat(header_line.len()));

    for item in items {
        let row_line: String = item
            .row()
            .iter()
            .map(|c| format!("{:<20}", c))
            .collect::<Vec<_>>()
            .join(" ");
        println!("{}", row_line);
    }
}

/// 输出命令结果
pub fn render(outcome: &Outcome) {
    match &outcome.detail {
        OutcomeDetail::None => {}
        OutcomeDetail::Scripts(scripts) => render_scripts(scripts),
        OutcomeDetail::Run(run) => render_run(run),
        OutcomeDetail::Cluster { records, runbook } => render_cluster(records, runbook.as_ref()),
        OutcomeDetail::Configuration(report) => render_configuration(report),
        OutcomeDetail::Status(report) => render_status(report),
    }

    if let Some(cleanup) = &outcome.cleanup {
        render_cleanup(cleanup);
    }

    if let Some(error) = &outcome.error {
        println!();
        println!("{} {}", "✗".red().bold(), error.to_string().red());
    }

    if let Some(dir) = &outcome.run_dir {
        println!();
        println!("运行目录: {}", dir.display().to_string().cyan());
    }

    println!();
    if outcome.is_success() {
        println!("{} {} 完成", "✓".green().bold(), outcome.command.to_string().cyan());
    } else {
        println!(
            "{} {} 失败 (退出码 {})",
            "✗".red().bold(),
            outcome.command.to_string().cyan(),
            outcome.exit_code.code()
        );
    }
}

fn render_scripts(scripts: &[String]) {
    if scripts.is_empty() {
        println!("{}", "没有找到测试脚本".yellow());
        return;
    }
    println!("{}", format!("测试脚本 (共 {} 个):", scripts.len()).bold());
    for script in scripts {
        println!("  {}", script.cyan());
    }
}

fn render_run(run: &TestRun) {
    println!();
    println!("{} {}", "测试套件:".bold(), run.suite.cyan());
    if !run.results.is_empty() {
        print_table(&run.results);
    }

    for result in run.results.iter().filter(|r| !r.is_passed()) {
        let marker = match result.outcome {
            TestOutcome::TimedOut => "⏱".yellow(),
            _ => "✗".red(),
        };
        println!(
            "  {} {} @ {}: {}",
            marker,
            result.script,
            result.target,
            result.log_path.display()
        );
        if let Some(error) = &result.error {
            println!("    {}", error.dimmed());
        }
    }

    println!();
    println!(
        "通过 {}  失败 {}  状态 {}",
        run.passed_count().to_string().green(),
        run.failed_count().to_string().red(),
        run.status
    );
    if let Some(reason) = &run.abort_reason {
        println!("{} {}", "中止原因:".yellow().bold(), reason);
    }
}

fn render_cluster(records: &[VmRecord], runbook: Option<&Runbook>) {
    println!();
    println!("{}", "集群已就绪:".green().bold());
    for record in records {
        println!(
            "  {:<24} {:<16} {}",
            record.name.cyan(),
            record.address.as_deref().unwrap_or("-"),
            record.ssh_command().unwrap_or_default().dimmed()
        );
    }
    if let Some(runbook) = runbook {
        println!();
        println!("{}", "集群保持运行，使用以下命令销毁:".yellow());
        for command in &runbook.commands {
            println!("  {}", command);
        }
    }
}

fn render_configuration(report: &ConfigurationReport) {
    println!();
    println!("{} {}", "配置命令:".bold(), report.command.dimmed());
    for (host, recap) in &report.hosts {
        let marker = if recap.is_configured() {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            "  {} {:<24} ok={} changed={} unreachable={} failed={}",
            marker, host, recap.ok, recap.changed, recap.unreachable, recap.failed
        );
    }
    if !report.is_complete() {
        println!(
            "{} {}",
            "未完成配置:".red().bold(),
            report.unconfigured.join(", ")
        );
    }
}

fn render_status(report: &StatusReport) {
    println!();
    println!(
        "{} {} ({}) {}",
        "集群:".bold(),
        report.cluster.cyan(),
        report.kind,
        report.config.display()
    );
    if let Some(error) = &report.provisioner_error {
        println!("{} {}", "provisioner 不可用:".yellow(), error);
    }
    print_table(&report.vms);

    let reachable = report
        .vms
        .iter()
        .filter(|vm| vm.reachability == Reachability::Reachable)
        .count();
    println!();
    if report.is_healthy() {
        println!("{} 全部 {} 台虚拟机可达", "✓".green().bold(), report.vms.len());
    } else {
        println!("{} {}/{} 台虚拟机可达", "!".yellow().bold(), reachable, report.vms.len());
    }
}

fn render_cleanup(cleanup: &CleanupOutcome) {
    println!();
    match cleanup {
        CleanupOutcome::Cleared => println!("{} 集群已销毁并验证", "✓".green().bold()),
        CleanupOutcome::Retained(runbook) => {
            println!("{}", "集群已保留，需要时手动清理:".yellow().bold());
            println!("{}", runbook.render());
        }
        CleanupOutcome::ManualInterventionRequired(runbook) => {
            println!("{}", "自动清理失败，需要手动处理:".red().bold());
            println!("{}", runbook.render());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctf_common::VmRole;
    use std::path::PathBuf;

    #[test]
    fn test_vm_status_row() {
        let vm = VmStatus {
            name: "hpc-controller".to_string(),
            role: VmRole::Controller,
            present: None,
            address: None,
            reachability: Reachability::Unknown,
        };
        assert_eq!(
            vm.row(),
            vec!["hpc-controller", "controller", "?", "-", "unknown"]
        );
    }

    #[test]
    fn test_result_row() {
        let result = TestResult {
            script: "check-gpu.sh".to_string(),
            target: "hpc-compute-01".to_string(),
            exit_code: Some(1),
            outcome: TestOutcome::Failed,
            log_path: PathBuf::from("tests/hpc-compute-01/check-gpu.sh.log"),
            duration_ms: 1500,
            started_at: chrono::Utc::now(),
            error: None,
        };
        assert_eq!(
            result.row(),
            vec!["check-gpu.sh", "hpc-compute-01", "failed", "1", "1.5s"]
        );
    }
}
