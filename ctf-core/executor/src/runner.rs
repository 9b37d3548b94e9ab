//! 测试套件执行器
//!
//! 逐个执行脚本目录中的测试脚本（本地或远程），单个脚本失败不会中止套件：
//! 记录失败后继续执行下一个脚本，最后汇总通过 / 失败数量。

use chrono::Utc;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ctf_cluster::ssh_config_for;
use ctf_common::{RunContext, TestOutcome, TestResult, TestRun, VmRecord, LOCAL_TARGET};
use ctf_ssh_executor::{shell_quote, CommandOutput, RemoteShell, SshClient, SshError};

use crate::error::{ExecutorError, Result};
use crate::scripts::{find_script, list_scripts};

/// 执行目标
#[derive(Debug, Clone)]
pub enum ExecutionTarget {
    /// 控制端本地执行
    Local,
    /// 在虚拟机上远程执行
    Remote(VmRecord),
}

impl ExecutionTarget {
    pub fn name(&self) -> &str {
        match self {
            ExecutionTarget::Local => LOCAL_TARGET,
            ExecutionTarget::Remote(vm) => &vm.name,
        }
    }
}

/// 执行器配置
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// 测试脚本目录
    pub scripts_dir: PathBuf,

    /// 远程脚本根目录
    pub remote_root: String,

    /// 单个脚本超时
    pub script_timeout: Duration,

    /// SSH 连接超时
    pub connect_timeout: Duration,

    /// 多节点并发上限
    pub max_parallel: usize,
}

impl RunnerConfig {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            remote_root: "/tmp/ctf-tests".to_string(),
            script_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(5),
            max_parallel: 4,
        }
    }
}

/// 导出给测试脚本的环境变量
#[derive(Debug, Clone, Default)]
pub struct ScriptEnv {
    pub cluster: String,
    pub controller_ip: Option<String>,
}

/// 测试套件执行器
#[derive(Clone)]
pub struct SuiteRunner {
    config: RunnerConfig,
    ctx: RunContext,
    shell: Arc<dyn RemoteShell>,
    env: ScriptEnv,
    cancel: CancellationToken,
    /// 本次运行中已上传脚本的虚拟机
    uploaded: Arc<Mutex<HashSet<String>>>,
}

impl SuiteRunner {
    pub fn new(config: RunnerConfig, ctx: RunContext, shell: Arc<dyn RemoteShell>) -> Self {
        Self {
            config,
            ctx,
            shell,
            env: ScriptEnv::default(),
            cancel: CancellationToken::new(),
            uploaded: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_env(mut self, env: ScriptEnv) -> Self {
        self.env = env;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// 列出测试脚本
    pub fn list(&self) -> Result<Vec<String>> {
        list_scripts(&self.config.scripts_dir)
    }

    /// 执行单个脚本
    ///
    /// 脚本本身的失败（非零退出、超时、传输错误）作为 [`TestResult`] 返回，
    /// 只有脚本不存在等前置条件问题返回错误。
    pub async fn run(&self, target: &ExecutionTarget, script: &str, args: &[String]) -> Result<TestResult> {
        let script = find_script(&self.config.scripts_dir, script)?;
        let log_path = self.ctx.test_log(target.name(), &script)?;

        info!("执行测试 {} @ {}", script, target.name());
        let started_at = Utc::now();
        let start = Instant::now();

        let (exit_code, outcome, output, error) = match target {
            ExecutionTarget::Local => self.exec_local(&script, args).await,
            ExecutionTarget::Remote(vm) => self.exec_remote(vm, &script, args).await,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let record = LogRecord {
            script: &script,
            target: target.name(),
            output: &output,
            error: error.as_deref(),
            exit_code,
            outcome,
        };
        if let Err(e) = record.write(&log_path) {
            warn!("写入测试日志失败 {}: {}", log_path.display(), e);
        }

        match outcome {
            TestOutcome::Passed => info!("✓ {} @ {} ({} ms)", script, target.name(), duration_ms),
            _ => error!(
                "✗ {} @ {}: {} (退出码 {:?}, 日志 {})",
                script,
                target.name(),
                outcome,
                exit_code,
                log_path.display()
            ),
        }

        Ok(TestResult {
            script,
            target: target.name().to_string(),
            exit_code,
            outcome,
            log_path,
            duration_ms,
            started_at,
            error,
        })
    }

    /// 在多个目标上并发执行同一个脚本，结果按目标顺序返回
    pub async fn run_on_targets(
        &self,
        targets: &[ExecutionTarget],
        script: &str,
        args: &[String],
    ) -> Result<Vec<TestResult>> {
        if targets.len() <= 1 {
            let mut results = Vec::new();
            for target in targets {
                results.push(self.run(target, script, args).await?);
            }
            return Ok(results);
        }

        // 前置条件检查放在派发之前
        find_script(&self.config.scripts_dir, script)?;

        let pool = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let mut tasks = JoinSet::new();
        for (index, target) in targets.iter().cloned().enumerate() {
            let runner = self.clone();
            let pool = Arc::clone(&pool);
            let script = script.to_string();
            let args = args.to_vec();
            tasks.spawn(async move {
                let _permit = pool.acquire_owned().await;
                (index, runner.run(&target, &script, &args).await)
            });
        }

        let mut results = Vec::with_capacity(targets.len());
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined
                .map_err(|e| ExecutorError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
            results.push((index, result?));
        }
        results.sort_by_key(|(index, _)| *index);
        Ok(results.into_iter().map(|(_, r)| r).collect())
    }

    /// 按字典序执行全部脚本并追加到测试运行
    ///
    /// 收到中断后不再派发新脚本，已在执行的脚本运行到其自身超时。
    pub async fn run_all(&self, targets: &[ExecutionTarget], run: &mut TestRun) -> Result<()> {
        let scripts = self.list()?;
        info!(
            "执行测试套件 {}: {} 个脚本, 目标 {}",
            self.ctx.suite(),
            scripts.len(),
            targets.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
        );

        for (i, script) in scripts.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("收到中断，跳过剩余 {} 个脚本", scripts.len() - i);
                run.abort("执行被中断");
                return Err(ExecutorError::Cancelled);
            }

            for result in self.run_on_targets(targets, script, &[]).await? {
                run.add_result(result);
            }
        }

        info!(
            "测试套件完成: 通过 {}, 失败 {}",
            run.passed_count(),
            run.failed_count()
        );
        Ok(())
    }

    async fn exec_local(
        &self,
        script: &str,
        args: &[String],
    ) -> (Option<i32>, TestOutcome, String, Option<String>) {
        let mut cmd = Command::new("bash");
        cmd.arg(script)
            .args(args)
            .current_dir(&self.config.scripts_dir)
            .envs(self.env_vars(LOCAL_TARGET))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(ip) = &self.env.controller_ip {
            cmd.env("CTF_TARGET_IP", ip);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("启动 bash {} 失败: {}", script, e);
                return (None, TestOutcome::Error, String::new(), Some(message));
            }
        };

        match tokio::time::timeout(self.config.script_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let combined = CommandOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
                    exit_code: output.status.code(),
                };
                classify(&combined)
            }
            Ok(Err(e)) => (None, TestOutcome::Error, String::new(), Some(e.to_string())),
            Err(_) => (
                None,
                TestOutcome::TimedOut,
                String::new(),
                Some(format!("执行超时 ({:?})", self.config.script_timeout)),
            ),
        }
    }

    async fn exec_remote(
        &self,
        vm: &VmRecord,
        script: &str,
        args: &[String],
    ) -> (Option<i32>, TestOutcome, String, Option<String>) {
        let client = match self.client_for(vm) {
            Ok(client) => client,
            Err(e) => return (None, TestOutcome::Error, String::new(), Some(e.to_string())),
        };

        let remote_dir = match self.ensure_uploaded(vm, &client).await {
            Ok(dir) => dir,
            Err(e) => return (None, TestOutcome::Error, String::new(), Some(e.to_string())),
        };

        let mut command = format!("cd {} &&", shell_quote(&remote_dir));
        for (key, value) in self.env_vars(&vm.name) {
            command.push_str(&format!(" {}={}", key, shell_quote(&value)));
        }
        command.push_str(&format!(" bash {}", shell_quote(script)));
        for arg in args {
            command.push(' ');
            command.push_str(&shell_quote(arg));
        }

        match client.execute_with_timeout(&command, self.config.script_timeout).await {
            Ok(output) => classify(&output),
            Err(e @ SshError::TimeoutError { .. }) => {
                (None, TestOutcome::TimedOut, String::new(), Some(e.to_string()))
            }
            Err(e) => (None, TestOutcome::Error, String::new(), Some(e.to_string())),
        }
    }

    fn client_for(&self, vm: &VmRecord) -> Result<SshClient> {
        let config = ssh_config_for(vm, self.config.connect_timeout)
            .map_err(|_| ExecutorError::NoAddress(vm.name.clone()))?;
        Ok(SshClient::with_shell(
            config.command_timeout(self.config.script_timeout),
            Arc::clone(&self.shell),
        ))
    }

    /// 每台虚拟机每次运行只上传一次，上传会替换远程旧副本
    async fn ensure_uploaded(&self, vm: &VmRecord, client: &SshClient) -> Result<String> {
        let remote_dir = format!(
            "{}/{}",
            self.config.remote_root.trim_end_matches('/'),
            self.ctx.suite()
        );

        let already = self
            .uploaded
            .lock()
            .map(|set| set.contains(&vm.name))
            .unwrap_or(false);
        if already {
            return Ok(remote_dir);
        }

        let uploaded = client
            .upload(&self.config.scripts_dir, &remote_dir)
            .await
            .map_err(|source| ExecutorError::UploadFailed {
                vm: vm.name.clone(),
                source,
            })?;
        debug!("测试脚本已上传到 {}:{}", vm.name, uploaded);

        if let Ok(mut set) = self.uploaded.lock() {
            set.insert(vm.name.clone());
        }
        Ok(uploaded)
    }

    fn env_vars(&self, vm_name: &str) -> Vec<(String, String)> {
        let mut vars = vec![
            ("CTF_RUN_ID".to_string(), self.ctx.run_id().to_string()),
            ("CTF_CLUSTER".to_string(), self.env.cluster.clone()),
            ("CTF_VM_NAME".to_string(), vm_name.to_string()),
        ];
        if let Some(ip) = &self.env.controller_ip {
            vars.push(("CTF_CONTROLLER_IP".to_string(), ip.clone()));
        }
        vars
    }
}

/// 退出码分类：0 通过，其他失败，被信号终止视为错误
fn classify(output: &CommandOutput) -> (Option<i32>, TestOutcome, String, Option<String>) {
    let text = output.combined_output();
    match output.exit_code {
        Some(0) => (Some(0), TestOutcome::Passed, text, None),
        Some(code) => (Some(code), TestOutcome::Failed, text, None),
        None => (
            None,
            TestOutcome::Error,
            text,
            Some("进程被信号终止".to_string()),
        ),
    }
}

/// 单个脚本的日志内容
struct LogRecord<'a> {
    script: &'a str,
    target: &'a str,
    output: &'a str,
    error: Option<&'a str>,
    exit_code: Option<i32>,
    outcome: TestOutcome,
}

impl LogRecord<'_> {
    fn write(&self, path: &Path) -> std::io::Result<()> {
        let mut file = fs::File::create(path)?;
        writeln!(file, "# script: {}", self.script)?;
        writeln!(file, "# target: {}", self.target)?;
        writeln!(file, "# time:   {}", Utc::now().to_rfc3339())?;
        writeln!(file)?;
        if !self.output.is_empty() {
            writeln!(file, "{}", self.output)?;
            writeln!(file)?;
        }
        if let Some(error) = self.error {
            writeln!(file, "# error: {}", error)?;
        }
        writeln!(file, "# exit: {:?} ({})", self.exit_code, self.outcome)?;
        Ok(())
    }
}
