//! 测试套件
//!
//! 一个套件只是 {集群配置, 脚本目录, 目标过滤} 这组数据；生命周期处理全部
//! 由调度器提供，新增套件不需要任何新的生命周期代码。
//!
//! ```no_run
//! use ctf_orchestrator::{Command, Options, SuiteBuilder};
//!
//! # async fn demo() -> ctf_orchestrator::Result<()> {
//! let suite = SuiteBuilder::new("gpu", "config/cluster.yaml", "hpc")
//!     .scripts_dir("tests/gpu")
//!     .target_vm("hpc-compute-*")
//!     .build()?;
//! let outcome = suite.dispatch(Command::EndToEnd, &Options::default(), None).await;
//! std::process::exit(outcome.exit_code.code());
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ctf_cluster::{ClusterLayout, Discovery, ReadinessPolicy};
use ctf_common::{ClusterDescriptor, RunContext, SshCredentials, VmRecord};
use ctf_executor::{ExecutionTarget, RunnerConfig, ScriptEnv, SuiteRunner};
use ctf_lifecycle::{
    AnsibleRunner, CleanupController, CleanupMode, CommandProvisioner, ConfigurationRunner,
    ConfirmPrompt, LifecycleManager, Provisioner, StdinPrompt,
};
use ctf_ssh_executor::{RemoteShell, SystemSsh};

use crate::command::Options;
use crate::error::{OrchestratorError, Result};

/// 测试脚本执行位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// 上传到目标虚拟机执行
    #[default]
    Remote,
    /// 在控制端本地执行（脚本自行访问集群）
    Local,
}

/// 套件构建器
pub struct SuiteBuilder {
    name: String,
    descriptor: ClusterDescriptor,
    scripts_dir: Option<PathBuf>,
    playbook: Option<PathBuf>,
    credentials: SshCredentials,
    readiness: ReadinessPolicy,
    script_timeout: Duration,
    remote_root: String,
    log_root: PathBuf,
    max_parallel: usize,
    mode: ExecutionMode,
    provisioner: Option<Arc<dyn Provisioner>>,
    shell: Option<Arc<dyn RemoteShell>>,
    configurator: Option<Arc<dyn ConfigurationRunner>>,
    prompt: Option<Arc<dyn ConfirmPrompt>>,
    cancel: Option<CancellationToken>,
}

impl SuiteBuilder {
    pub fn new(name: impl Into<String>, config: impl Into<PathBuf>, cluster: impl Into<String>) -> Self {
        let defaults = RunnerConfig::new(PathBuf::new());
        Self {
            name: name.into(),
            descriptor: ClusterDescriptor::new(config, cluster),
            scripts_dir: None,
            playbook: None,
            credentials: SshCredentials::default(),
            readiness: ReadinessPolicy::default(),
            script_timeout: defaults.script_timeout,
            remote_root: defaults.remote_root,
            log_root: PathBuf::from("logs"),
            max_parallel: defaults.max_parallel,
            mode: ExecutionMode::default(),
            provisioner: None,
            shell: None,
            configurator: None,
            prompt: None,
            cancel: None,
        }
    }

    pub fn scripts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scripts_dir = Some(dir.into());
        self
    }

    /// 目标虚拟机过滤（名称或通配模式）
    pub fn target_vm(mut self, pattern: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.with_target_vm(pattern);
        self
    }

    pub fn playbook(mut self, playbook: impl Into<PathBuf>) -> Self {
        self.playbook = Some(playbook.into());
        self
    }

    pub fn credentials(mut self, credentials: SshCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn readiness(mut self, policy: ReadinessPolicy) -> Self {
        self.readiness = policy;
        self
    }

    pub fn script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout = timeout;
        self
    }

    pub fn remote_root(mut self, root: impl Into<String>) -> Self {
        self.remote_root = root.into();
        self
    }

    pub fn log_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.log_root = root.into();
        self
    }

    pub fn max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn shell(mut self, shell: Arc<dyn RemoteShell>) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn configuration_runner(mut self, runner: Arc<dyn ConfigurationRunner>) -> Self {
        self.configurator = Some(runner);
        self
    }

    /// --no-cleanup 时使用的确认提示
    pub fn prompt(mut self, prompt: Arc<dyn ConfirmPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<Suite> {
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::Precondition("套件名称不能为空".to_string()));
        }
        let scripts_dir = self.scripts_dir.ok_or_else(|| {
            OrchestratorError::Precondition(format!("套件 {} 未指定脚本目录", self.name))
        })?;

        Ok(Suite {
            name: self.name,
            descriptor: self.descriptor,
            scripts_dir,
            playbook: self.playbook,
            credentials: self.credentials,
            readiness: self.readiness,
            script_timeout: self.script_timeout,
            remote_root: self.remote_root,
            log_root: self.log_root,
            max_parallel: self.max_parallel.max(1),
            mode: self.mode,
            provisioner: self
                .provisioner
                .unwrap_or_else(|| Arc::new(CommandProvisioner::default())),
            shell: self.shell.unwrap_or_else(|| Arc::new(SystemSsh::new())),
            configurator: self
                .configurator
                .unwrap_or_else(|| Arc::new(AnsibleRunner::default())),
            prompt: self.prompt.unwrap_or_else(|| Arc::new(StdinPrompt)),
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

/// 已构建的测试套件
pub struct Suite {
    pub(crate) name: String,
    pub(crate) descriptor: ClusterDescriptor,
    pub(crate) scripts_dir: PathBuf,
    pub(crate) playbook: Option<PathBuf>,
    pub(crate) credentials: SshCredentials,
    pub(crate) readiness: ReadinessPolicy,
    pub(crate) script_timeout: Duration,
    pub(crate) remote_root: String,
    pub(crate) log_root: PathBuf,
    pub(crate) max_parallel: usize,
    pub(crate) mode: ExecutionMode,
    pub(crate) provisioner: Arc<dyn Provisioner>,
    pub(crate) shell: Arc<dyn RemoteShell>,
    pub(crate) configurator: Arc<dyn ConfigurationRunner>,
    pub(crate) prompt: Arc<dyn ConfirmPrompt>,
    pub(crate) cancel: CancellationToken,
}

impl Suite {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &ClusterDescriptor {
        &self.descriptor
    }

    pub fn scripts_dir(&self) -> &std::path::Path {
        &self.scripts_dir
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 创建本次运行的目录
    pub fn create_run_context(&self) -> Result<RunContext> {
        Ok(RunContext::create(&self.log_root, &self.name)?)
    }

    pub(crate) fn discovery(&self) -> Discovery {
        Discovery::new(Arc::clone(&self.shell), self.credentials.clone())
            .with_policy(self.readiness)
            .with_max_parallel(self.max_parallel)
            .with_cancellation(self.cancel.clone())
    }

    pub(crate) fn manager(&self, ctx: &RunContext) -> Arc<LifecycleManager> {
        Arc::new(LifecycleManager::new(Arc::clone(&self.provisioner)).with_run_context(ctx))
    }

    pub(crate) fn cleanup_controller(
        &self,
        manager: Arc<LifecycleManager>,
        ctx: &RunContext,
        mode: CleanupMode,
    ) -> CleanupController {
        CleanupController::new(manager, mode)
            .with_prompt(Arc::clone(&self.prompt))
            .with_runbook_path(ctx.manual_cleanup_path())
            .with_cancellation(self.cancel.clone())
    }

    /// --no-cleanup 切换为交互模式
    pub(crate) fn cleanup_mode(options: &Options) -> CleanupMode {
        if options.no_cleanup {
            CleanupMode::Interactive
        } else {
            CleanupMode::Automatic
        }
    }

    pub(crate) fn runner(&self, ctx: &RunContext, records: &[VmRecord]) -> SuiteRunner {
        let mut config = RunnerConfig::new(&self.scripts_dir);
        config.remote_root = self.remote_root.clone();
        config.script_timeout = self.script_timeout;
        config.connect_timeout = self.readiness.connect_timeout;
        config.max_parallel = self.max_parallel;

        let controller_ip = match records.iter().find(|r| r.role.is_control()) {
            Some(record) => record.address.clone(),
            None => self.static_controller_address(),
        };

        SuiteRunner::new(config, ctx.clone(), Arc::clone(&self.shell))
            .with_env(ScriptEnv {
                cluster: self.descriptor.cluster_name.clone(),
                controller_ip,
            })
            .with_cancellation(self.cancel.clone())
    }

    /// 目标过滤排除了控制节点时，从集群配置读取其静态地址
    fn static_controller_address(&self) -> Option<String> {
        ClusterLayout::load(&self.descriptor.config_path, &self.descriptor.cluster_name)
            .ok()?
            .control_node()?
            .address
            .clone()
    }

    /// 测试执行目标
    ///
    /// 本地模式只有一个本地目标；远程模式下指定了目标过滤时为全部匹配节点，
    /// 否则为控制节点。
    pub(crate) fn targets(&self, records: &[VmRecord]) -> Vec<ExecutionTarget> {
        if self.mode == ExecutionMode::Local {
            return vec![ExecutionTarget::Local];
        }

        if self.descriptor.target_vm.is_some() {
            return records
                .iter()
                .filter(|r| self.descriptor.targets(&r.name))
                .cloned()
                .map(ExecutionTarget::Remote)
                .collect();
        }

        records
            .iter()
            .find(|r| r.role.is_control())
            .or_else(|| records.first())
            .cloned()
            .map(ExecutionTarget::Remote)
            .into_iter()
            .collect()
    }

    /// 中断检查点：每个阶段开始前调用
    pub(crate) fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(OrchestratorError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctf_common::VmRole;

    fn record(name: &str, role: VmRole, address: &str) -> VmRecord {
        VmRecord::new(name, role, SshCredentials::default()).with_address(address)
    }

    fn records() -> Vec<VmRecord> {
        vec![
            record("hpc-controller", VmRole::Controller, "10.0.0.10"),
            record("hpc-compute-01", VmRole::Compute, "10.0.0.11"),
            record("hpc-compute-02", VmRole::Compute, "10.0.0.12"),
        ]
    }

    #[test]
    fn test_build_requires_scripts_dir() {
        let err = SuiteBuilder::new("gpu", "cluster.yaml", "hpc").build().err().unwrap();
        assert!(matches!(err, OrchestratorError::Precondition(_)));
    }

    #[test]
    fn test_default_target_is_control_node() {
        let suite = SuiteBuilder::new("gpu", "cluster.yaml", "hpc")
            .scripts_dir("tests/gpu")
            .build()
            .unwrap();
        let targets = suite.targets(&records());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name(), "hpc-controller");
    }

    #[test]
    fn test_target_filter_selects_matching_nodes() {
        let suite = SuiteBuilder::new("gpu", "cluster.yaml", "hpc")
            .scripts_dir("tests/gpu")
            .target_vm("hpc-compute-*")
            .build()
            .unwrap();
        let names: Vec<_> = suite
            .targets(&records())
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["hpc-compute-01", "hpc-compute-02"]);
    }

    #[test]
    fn test_local_mode_single_target() {
        let suite = SuiteBuilder::new("gpu", "cluster.yaml", "hpc")
            .scripts_dir("tests/gpu")
            .execution_mode(ExecutionMode::Local)
            .max_parallel(0)
            .build()
            .unwrap();
        assert_eq!(suite.max_parallel, 1);
        let targets = suite.targets(&records());
        assert!(matches!(targets.as_slice(), [ExecutionTarget::Local]));
    }
}
