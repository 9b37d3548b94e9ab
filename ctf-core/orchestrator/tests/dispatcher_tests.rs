//! 调度器端到端测试
//!
//! provisioner、远程 shell 与配置管理工具都由内存中的替身实现。

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ctf_cluster::{ClusterKind, ReadinessPolicy};
use ctf_common::{Reachability, RunStatus};
use ctf_lifecycle::{
    CleanupOutcome, ConfigurationReport, ConfigurationRunner, FixedAnswer, HostRecap,
    ProcessOutput, Provisioner,
};
use ctf_orchestrator::{
    Command, ExitCode, Options, OrchestratorError, Outcome, OutcomeDetail, Suite, SuiteBuilder,
};
use ctf_ssh_executor::{CommandOutput, RemoteShell, SshConfig, SshError};
use tokio_util::sync::CancellationToken;

// ============================================
// 替身
// ============================================

#[derive(Default)]
struct FakeProvisioner {
    /// 集群资源前缀
    prefix: String,
    vms: Vec<String>,
    resources: Mutex<Vec<String>>,
    fail_start: bool,
    /// 启动失败前已创建的资源
    partial: Vec<String>,
    fail_destroy: bool,
    start_calls: AtomicU32,
    destroy_calls: AtomicU32,
}

impl FakeProvisioner {
    fn hpc() -> Self {
        Self {
            prefix: "hpc-".to_string(),
            vms: vec!["hpc-controller".to_string(), "hpc-compute-01".to_string()],
            ..Default::default()
        }
    }

    fn k8s() -> Self {
        Self {
            prefix: "k8s-".to_string(),
            vms: vec!["k8s-control-plane".to_string(), "k8s-cpu-01".to_string()],
            ..Default::default()
        }
    }

    fn with_existing(self, names: &[&str]) -> Self {
        *self.resources.lock().unwrap() = names.iter().map(|s| s.to_string()).collect();
        self
    }

    fn resources(&self) -> Vec<String> {
        self.resources.lock().unwrap().clone()
    }

    fn output(command: String, ok: bool, text: &str) -> ProcessOutput {
        ProcessOutput {
            command,
            output: text.to_string(),
            exit_code: Some(if ok { 0 } else { 1 }),
        }
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn start(&self, config: &Path, kind: ClusterKind) -> ctf_lifecycle::Result<ProcessOutput> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let command = format!("fake {} start {}", kind, config.display());
        if self.fail_start {
            self.resources.lock().unwrap().extend(self.partial.iter().cloned());
            return Ok(Self::output(command, false, "error: network 'default' is not active"));
        }
        self.resources.lock().unwrap().extend(self.vms.iter().cloned());
        Ok(Self::output(command, true, "cluster started"))
    }

    async fn stop(&self, config: &Path, kind: ClusterKind) -> ctf_lifecycle::Result<ProcessOutput> {
        Ok(Self::output(format!("fake {} stop {}", kind, config.display()), true, ""))
    }

    async fn destroy(
        &self,
        config: &Path,
        kind: ClusterKind,
        _force: bool,
    ) -> ctf_lifecycle::Result<ProcessOutput> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        let command = self.destroy_command(config, kind);
        if self.fail_destroy {
            return Ok(Self::output(command, false, "error: domain is locked"));
        }
        self.resources.lock().unwrap().retain(|r| !r.starts_with(&self.prefix));
        Ok(Self::output(command, true, "cluster destroyed"))
    }

    async fn list_resources(&self) -> ctf_lifecycle::Result<Vec<String>> {
        Ok(self.resources())
    }

    async fn lookup_address(&self, _vm_name: &str) -> Option<String> {
        None
    }

    fn destroy_command(&self, config: &Path, kind: ClusterKind) -> String {
        format!("fake {} destroy {} --force", kind, config.display())
    }

    fn removal_commands(&self, resource: &str) -> Vec<String> {
        vec![format!("virsh destroy {}", resource)]
    }

    fn verify_command(&self, cluster_name: &str) -> String {
        format!("virsh list --all --name | grep '^{}-'", cluster_name)
    }
}

/// 远程 shell：探测按主机应答，脚本按名称决定退出码
#[derive(Default)]
struct FakeShell {
    unreachable: Vec<&'static str>,
    failing: Vec<&'static str>,
    /// 执行到该脚本时触发中断
    interrupt_on: Option<(&'static str, CancellationToken)>,
    commands: Mutex<Vec<(String, String)>>,
}

impl FakeShell {
    fn script_commands(&self) -> Vec<(String, String)> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, cmd)| cmd.contains(" bash "))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn execute(
        &self,
        config: &SshConfig,
        command: &str,
        _limit: Duration,
    ) -> ctf_ssh_executor::Result<CommandOutput> {
        if self.unreachable.iter().any(|h| *h == config.host) {
            return Err(SshError::ConnectionError(format!(
                "ssh: connect to host {} port 22: No route to host",
                config.host
            )));
        }
        self.commands
            .lock()
            .unwrap()
            .push((config.host.clone(), command.to_string()));

        if command.starts_with("echo ") {
            return Ok(CommandOutput {
                stdout: "SSH ready\n".to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            });
        }

        if let Some((script, cancel)) = &self.interrupt_on {
            if command.contains(&format!("bash {}", script)) {
                cancel.cancel();
            }
        }

        let failed = self.failing.iter().any(|s| command.contains(&format!("bash {}", s)));
        Ok(CommandOutput {
            stdout: format!("ran on {}", config.host),
            stderr: String::new(),
            exit_code: Some(if failed { 1 } else { 0 }),
        })
    }

    async fn upload(&self, _config: &SshConfig, _local: &Path, _remote_path: &str) -> ctf_ssh_executor::Result<()> {
        Ok(())
    }
}

/// 配置管理：指定主机配置失败
#[derive(Default)]
struct FakeConfigurator {
    failed_hosts: Vec<&'static str>,
    calls: AtomicU32,
}

#[async_trait]
impl ConfigurationRunner for FakeConfigurator {
    async fn apply(
        &self,
        inventory: &Path,
        playbook: &Path,
        expected_hosts: &[String],
        transcript: &Path,
    ) -> ctf_lifecycle::Result<ConfigurationReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(inventory.exists(), "inventory not written before apply");
        fs::write(transcript, "PLAY RECAP").unwrap();

        let hosts: BTreeMap<String, HostRecap> = expected_hosts
            .iter()
            .map(|host| {
                let failed = u32::from(self.failed_hosts.iter().any(|h| h == host));
                (
                    host.clone(),
                    HostRecap {
                        ok: 10,
                        changed: 2,
                        unreachable: 0,
                        failed,
                    },
                )
            })
            .collect();
        Ok(ConfigurationReport::new(
            format!("ansible-playbook -i {} {}", inventory.display(), playbook.display()),
            Some(if self.failed_hosts.is_empty() { 0 } else { 2 }),
            hosts,
            expected_hosts,
        ))
    }
}

// ============================================
// 测试环境
// ============================================

const HPC_YAML: &str = r#"
clusters:
  hpc:
    name: hpc
    controller:
      ip_address: 10.0.0.10
    compute_nodes:
      - ip: 10.0.0.11
"#;

/// 配置节键为 cloud，集群名称为 k8s
const CLOUD_YAML: &str = r#"
clusters:
  cloud:
    name: k8s
    control_plane:
      ip_address: 10.0.1.10
    worker_nodes:
      cpu:
        - ip: 10.0.1.11
"#;

struct Env {
    tmp: tempfile::TempDir,
    cluster: &'static str,
    provisioner: Arc<FakeProvisioner>,
    shell: Arc<FakeShell>,
    configurator: Arc<FakeConfigurator>,
    cancel: CancellationToken,
}

impl Env {
    fn new(provisioner: FakeProvisioner, shell: FakeShell) -> Self {
        Self::with_configurator(provisioner, shell, FakeConfigurator::default())
    }

    fn with_configurator(provisioner: FakeProvisioner, shell: FakeShell, configurator: FakeConfigurator) -> Self {
        Self::with_layout(provisioner, shell, configurator, HPC_YAML, "hpc")
    }

    fn cloud(provisioner: FakeProvisioner, shell: FakeShell) -> Self {
        Self::with_layout(provisioner, shell, FakeConfigurator::default(), CLOUD_YAML, "cloud")
    }

    fn with_layout(
        provisioner: FakeProvisioner,
        shell: FakeShell,
        configurator: FakeConfigurator,
        yaml: &str,
        cluster: &'static str,
    ) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("cluster.yaml"), yaml).unwrap();
        let scripts = tmp.path().join("gpu-suite");
        fs::create_dir_all(&scripts).unwrap();
        for name in ["a.sh", "b.sh"] {
            fs::write(scripts.join(name), "#!/bin/bash\nexit 0\n").unwrap();
        }
        fs::write(tmp.path().join("site.yml"), "- hosts: all\n").unwrap();

        Self {
            tmp,
            cluster,
            provisioner: Arc::new(provisioner),
            shell: Arc::new(shell),
            configurator: Arc::new(configurator),
            cancel: CancellationToken::new(),
        }
    }

    fn log_root(&self) -> PathBuf {
        self.tmp.path().join("logs")
    }

    fn builder(&self) -> SuiteBuilder {
        SuiteBuilder::new("gpu", self.tmp.path().join("cluster.yaml"), self.cluster)
            .scripts_dir(self.tmp.path().join("gpu-suite"))
            .log_root(self.log_root())
            .provisioner(self.provisioner.clone())
            .shell(self.shell.clone())
            .configuration_runner(self.configurator.clone())
            .prompt(Arc::new(FixedAnswer(false)))
            .cancellation(self.cancel.clone())
    }

    fn suite(&self) -> Suite {
        self.builder().build().unwrap()
    }

    fn assert_no_leaks(&self) {
        let leaked: Vec<_> = self
            .provisioner
            .resources()
            .into_iter()
            .filter(|r| r.starts_with(&self.provisioner.prefix))
            .collect();
        assert!(leaked.is_empty(), "leaked resources: {:?}", leaked);
    }
}

fn run_of(outcome: &Outcome) -> &ctf_common::TestRun {
    match &outcome.detail {
        OutcomeDetail::Run(run) => run,
        other => panic!("expected a test run, got {:?}", other),
    }
}

fn e2e() -> (Command, Options) {
    (Command::EndToEnd, Options::default())
}

// ============================================
// e2e
// ============================================

#[tokio::test]
async fn e2e_success_exits_zero_and_destroys_cluster() {
    let env = Env::new(FakeProvisioner::hpc(), FakeShell::default());
    let (command, options) = e2e();

    let outcome = env.suite().dispatch(command, &options, None).await;

    assert_eq!(outcome.exit_code, ExitCode::Success, "{:?}", outcome.error);
    assert_eq!(outcome.cleanup, Some(CleanupOutcome::Cleared));
    env.assert_no_leaks();

    let run = run_of(&outcome);
    assert_eq!(run.status, RunStatus::Passed);
    assert_eq!(run.passed_count(), 2);
    assert!(run.results.iter().all(|r| r.target == "hpc-controller"));

    let run_dir = outcome.run_dir.clone().unwrap();
    assert!(run_dir.join("summary.json").exists());
    assert!(run_dir.join("summary.txt").exists());
    assert!(run_dir.join("connection-info.txt").exists());
    assert!(run_dir.join("lifecycle").join("start.log").exists());
    assert!(!run_dir.join("MANUAL_CLEANUP.md").exists());
}

#[tokio::test]
async fn e2e_test_failure_exits_one_and_still_cleans_up() {
    let env = Env::new(
        FakeProvisioner::hpc(),
        FakeShell {
            failing: vec!["b.sh"],
            ..Default::default()
        },
    );
    let (command, options) = e2e();

    let outcome = env.suite().dispatch(command, &options, None).await;

    assert_eq!(outcome.exit_code, ExitCode::Failure);
    assert!(outcome.error.is_none());
    let run = run_of(&outcome);
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!((run.passed_count(), run.failed_count()), (1, 1));
    assert_eq!(outcome.cleanup, Some(CleanupOutcome::Cleared));
    env.assert_no_leaks();

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(outcome.run_dir.unwrap().join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["status"], "failed");
    assert_eq!(summary["exit_code"], 1);
    assert_eq!(summary["cleanup"], "cleared");
}

#[tokio::test(start_paused = true)]
async fn readiness_timeout_triggers_cleanup() {
    let env = Env::new(
        FakeProvisioner::hpc(),
        FakeShell {
            unreachable: vec!["10.0.0.11"],
            ..Default::default()
        },
    );
    let suite = env
        .builder()
        .readiness(ReadinessPolicy::new(Duration::from_secs(1), Duration::from_secs(3)))
        .build()
        .unwrap();

    let outcome = suite.dispatch(Command::EndToEnd, &Options::default(), None).await;

    assert_eq!(outcome.exit_code, ExitCode::Failure);
    assert!(matches!(outcome.error, Some(OrchestratorError::ReadinessTimeout(_))));
    assert_eq!(env.provisioner.destroy_calls.load(Ordering::SeqCst), 1);
    env.assert_no_leaks();

    let run = run_of(&outcome);
    assert_eq!(run.status, RunStatus::Aborted);
    assert!(run.results.is_empty());
    assert!(env.shell.script_commands().is_empty());
}

#[tokio::test]
async fn already_running_is_precondition_without_provisioning() {
    let env = Env::new(
        FakeProvisioner::hpc().with_existing(&["hpc-controller", "other-vm"]),
        FakeShell::default(),
    );
    let (command, options) = e2e();

    let outcome = env.suite().dispatch(command, &options, None).await;

    assert_eq!(outcome.exit_code, ExitCode::Precondition);
    assert_eq!(outcome.exit_code.code(), 2);
    let message = outcome.error.as_ref().unwrap().to_string();
    assert!(message.contains("hpc-controller"));
    assert!(message.contains("destroy"));
    assert_eq!(env.provisioner.start_calls.load(Ordering::SeqCst), 0);
    assert_eq!(env.provisioner.destroy_calls.load(Ordering::SeqCst), 0);
    assert!(outcome.cleanup.is_none());
    assert_eq!(env.provisioner.resources().len(), 2);
}

#[tokio::test]
async fn provision_failure_removes_partial_resources() {
    let env = Env::new(
        FakeProvisioner {
            fail_start: true,
            partial: vec!["hpc-controller".to_string()],
            ..FakeProvisioner::hpc()
        },
        FakeShell::default(),
    );
    let (command, options) = e2e();

    let outcome = env.suite().dispatch(command, &options, None).await;

    assert_eq!(outcome.exit_code, ExitCode::Failure);
    let message = outcome.error.as_ref().unwrap().to_string();
    assert!(message.contains("network 'default' is not active"));
    assert_eq!(outcome.cleanup, Some(CleanupOutcome::Cleared));
    env.assert_no_leaks();
}

#[tokio::test]
async fn partial_configuration_refuses_tests() {
    let env = Env::with_configurator(
        FakeProvisioner::hpc(),
        FakeShell::default(),
        FakeConfigurator {
            failed_hosts: vec!["hpc-compute-01"],
            ..Default::default()
        },
    );
    let suite = env.builder().playbook(env.tmp.path().join("site.yml")).build().unwrap();

    let outcome = suite.dispatch(Command::EndToEnd, &Options::default(), None).await;

    assert_eq!(outcome.exit_code, ExitCode::Failure);
    match &outcome.error {
        Some(OrchestratorError::Configuration { unconfigured, .. }) => {
            assert_eq!(unconfigured, &vec!["hpc-compute-01".to_string()]);
        }
        other => panic!("expected configuration error, got {:?}", other),
    }
    assert!(env.shell.script_commands().is_empty());
    assert_eq!(run_of(&outcome).status, RunStatus::Aborted);
    env.assert_no_leaks();

    let run_dir = outcome.run_dir.unwrap();
    assert!(run_dir.join("inventory.yaml").exists());
    let report = fs::read_to_string(run_dir.join("configuration.json")).unwrap();
    assert!(report.contains("hpc-compute-01"));
}

#[tokio::test]
async fn configured_cluster_runs_tests() {
    let env = Env::new(FakeProvisioner::hpc(), FakeShell::default());
    let suite = env.builder().playbook(env.tmp.path().join("site.yml")).build().unwrap();

    let outcome = suite.dispatch(Command::EndToEnd, &Options::default(), None).await;

    assert_eq!(outcome.exit_code, ExitCode::Success, "{:?}", outcome.error);
    assert_eq!(env.configurator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(run_of(&outcome).results.len(), 2);
}

#[tokio::test]
async fn interrupt_aborts_run_and_destroys_without_prompt() {
    let cancel = CancellationToken::new();
    let mut env = Env::new(
        FakeProvisioner::hpc(),
        FakeShell {
            interrupt_on: Some(("a.sh", cancel.clone())),
            ..Default::default()
        },
    );
    env.cancel = cancel;
    let options = Options {
        no_cleanup: true,
        ..Default::default()
    };

    let outcome = env.suite().dispatch(Command::EndToEnd, &options, None).await;

    assert_eq!(outcome.exit_code, ExitCode::Interrupted);
    assert_eq!(outcome.exit_code.code(), 130);
    let run = run_of(&outcome);
    assert_eq!(run.status, RunStatus::Aborted);
    assert_eq!(run.results.len(), 1);
    assert_eq!(outcome.cleanup, Some(CleanupOutcome::Cleared));
    env.assert_no_leaks();
}

#[tokio::test]
async fn interrupt_before_start_provisions_nothing() {
    let env = Env::new(FakeProvisioner::hpc(), FakeShell::default());
    env.cancel.cancel();

    let outcome = env.suite().dispatch(Command::EndToEnd, &Options::default(), None).await;

    assert_eq!(outcome.exit_code, ExitCode::Interrupted);
    assert_eq!(env.provisioner.start_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn no_cleanup_declined_retains_cluster_with_runbook() {
    let env = Env::new(FakeProvisioner::hpc(), FakeShell::default());
    let options = Options {
        no_cleanup: true,
        ..Default::default()
    };

    let outcome = env.suite().dispatch(Command::EndToEnd, &options, None).await;

    assert_eq!(outcome.exit_code, ExitCode::Success);
    assert!(matches!(outcome.cleanup, Some(CleanupOutcome::Retained(_))));
    assert_eq!(env.provisioner.resources().len(), 2);
    assert!(outcome.run_dir.unwrap().join("MANUAL_CLEANUP.md").exists());
}

#[tokio::test]
async fn failed_destroy_is_never_silent() {
    let env = Env::new(
        FakeProvisioner {
            fail_destroy: true,
            ..FakeProvisioner::hpc()
        },
        FakeShell::default(),
    );
    let (command, options) = e2e();

    let outcome = env.suite().dispatch(command, &options, None).await;

    // 测试全部通过，但清理失败
    assert_eq!(run_of(&outcome).status, RunStatus::Passed);
    assert_eq!(outcome.exit_code, ExitCode::Failure);
    let runbook = match &outcome.cleanup {
        Some(CleanupOutcome::ManualInterventionRequired(runbook)) => runbook.clone(),
        other => panic!("expected manual intervention, got {:?}", other),
    };
    assert!(runbook.resources.contains(&"hpc-controller".to_string()));
    assert!(runbook.commands.iter().any(|c| c.contains("virsh destroy hpc-compute-01")));

    let run_dir = outcome.run_dir.unwrap();
    let text = fs::read_to_string(run_dir.join("MANUAL_CLEANUP.md")).unwrap();
    assert!(text.contains("virsh list --all --name"));

    // 摘要记录清理失败后的最终退出码
    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(run_dir.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["status"], "passed");
    assert_eq!(summary["exit_code"], 1);
    assert_eq!(summary["cleanup"], "manual_intervention_required");
    let text = fs::read_to_string(run_dir.join("summary.txt")).unwrap();
    assert!(text.contains("exit:     1"));
}

#[tokio::test]
async fn e2e_with_target_filter_leaves_no_leaks() {
    let env = Env::new(FakeProvisioner::hpc(), FakeShell::default());
    let suite = env.builder().target_vm("hpc-compute-*").build().unwrap();

    let outcome = suite.dispatch(Command::EndToEnd, &Options::default(), None).await;

    assert_eq!(outcome.exit_code, ExitCode::Success, "{:?}", outcome.error);
    let run = run_of(&outcome);
    assert_eq!(run.results.len(), 2);
    assert!(run.results.iter().all(|r| r.target == "hpc-compute-01"));
    assert_eq!(outcome.cleanup, Some(CleanupOutcome::Cleared));
    assert_eq!(env.provisioner.destroy_calls.load(Ordering::SeqCst), 1);
    env.assert_no_leaks();
}

#[tokio::test]
async fn e2e_cluster_named_differently_from_key() {
    let env = Env::cloud(FakeProvisioner::k8s(), FakeShell::default());
    let (command, options) = e2e();

    let outcome = env.suite().dispatch(command, &options, None).await;

    assert_eq!(outcome.exit_code, ExitCode::Success, "{:?}", outcome.error);
    assert!(run_of(&outcome).results.iter().all(|r| r.target == "k8s-control-plane"));
    assert_eq!(outcome.cleanup, Some(CleanupOutcome::Cleared));
    assert_eq!(env.provisioner.destroy_calls.load(Ordering::SeqCst), 1);
    env.assert_no_leaks();

    let summary: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(outcome.run_dir.unwrap().join("summary.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["exit_code"], 0);
    assert_eq!(summary["cleanup"], "cleared");
}

// ============================================
// 单独命令
// ============================================

#[tokio::test]
async fn start_then_stop_cluster() {
    let env = Env::new(FakeProvisioner::hpc(), FakeShell::default());

    let outcome = env
        .suite()
        .dispatch(Command::StartCluster, &Options::default(), None)
        .await;
    assert_eq!(outcome.exit_code, ExitCode::Success, "{:?}", outcome.error);
    match &outcome.detail {
        OutcomeDetail::Cluster { records, runbook } => {
            assert_eq!(records.len(), 2);
            assert!(records.iter().all(|r| r.state == Reachability::Reachable));
            assert!(runbook.is_some());
        }
        other => panic!("expected cluster detail, got {:?}", other),
    }
    assert_eq!(env.provisioner.resources().len(), 2);

    let outcome = env
        .suite()
        .dispatch(Command::StopCluster, &Options::default(), None)
        .await;
    assert_eq!(outcome.exit_code, ExitCode::Success);
    assert_eq!(outcome.cleanup, Some(CleanupOutcome::Cleared));
    env.assert_no_leaks();

    // 重复销毁仍然成功
    let outcome = env
        .suite()
        .dispatch(Command::StopCluster, &Options::default(), None)
        .await;
    assert_eq!(outcome.exit_code, ExitCode::Success);
}

#[tokio::test]
async fn stop_cluster_with_target_filter_destroys_whole_cluster() {
    let env = Env::new(
        FakeProvisioner::hpc().with_existing(&["hpc-controller", "other-vm"]),
        FakeShell::default(),
    );
    let suite = env.builder().target_vm("hpc-compute-*").build().unwrap();

    let outcome = suite.dispatch(Command::StopCluster, &Options::default(), None).await;

    assert_eq!(outcome.exit_code, ExitCode::Success, "{:?}", outcome.error);
    assert_eq!(outcome.cleanup, Some(CleanupOutcome::Cleared));
    assert_eq!(env.provisioner.destroy_calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.provisioner.resources(), vec!["other-vm"]);
}

#[tokio::test]
async fn stop_cluster_named_differently_from_key() {
    let env = Env::cloud(
        FakeProvisioner::k8s().with_existing(&["k8s-control-plane", "k8s-cpu-01"]),
        FakeShell::default(),
    );

    let outcome = env
        .suite()
        .dispatch(Command::StopCluster, &Options::default(), None)
        .await;

    assert_eq!(outcome.exit_code, ExitCode::Success, "{:?}", outcome.error);
    assert_eq!(env.provisioner.destroy_calls.load(Ordering::SeqCst), 1);
    env.assert_no_leaks();
}

#[tokio::test]
async fn run_test_targets_filtered_nodes_with_args() {
    let env = Env::new(
        FakeProvisioner::hpc().with_existing(&["hpc-controller", "hpc-compute-01"]),
        FakeShell::default(),
    );
    let suite = env.builder().target_vm("hpc-compute-*").build().unwrap();

    let command = Command::RunTest {
        name: "a".to_string(),
        args: vec!["--quick".to_string()],
    };
    let outcome = suite.dispatch(command, &Options::default(), None).await;

    assert_eq!(outcome.exit_code, ExitCode::Success, "{:?}", outcome.error);
    let run = run_of(&outcome);
    assert_eq!(run.results.len(), 1);
    assert_eq!(run.results[0].target, "hpc-compute-01");

    let scripts = env.shell.script_commands();
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].0, "10.0.0.11");
    assert!(scripts[0].1.contains("bash a.sh --quick"));
    assert!(scripts[0].1.contains("CTF_VM_NAME=hpc-compute-01"));
    // run-test 不会销毁集群
    assert_eq!(env.provisioner.destroy_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_test_is_precondition() {
    let env = Env::new(FakeProvisioner::hpc(), FakeShell::default());
    let command = Command::RunTest {
        name: "missing".to_string(),
        args: vec![],
    };

    let outcome = env.suite().dispatch(command, &Options::default(), None).await;

    assert_eq!(outcome.exit_code, ExitCode::Precondition);
    assert!(env.shell.commands.lock().unwrap().is_empty());
}

#[tokio::test]
async fn run_tests_reports_failures() {
    let env = Env::new(
        FakeProvisioner::hpc().with_existing(&["hpc-controller", "hpc-compute-01"]),
        FakeShell {
            failing: vec!["a.sh"],
            ..Default::default()
        },
    );

    let outcome = env.suite().dispatch(Command::RunTests, &Options::default(), None).await;

    assert_eq!(outcome.exit_code, ExitCode::Failure);
    let run = run_of(&outcome);
    assert_eq!((run.passed_count(), run.failed_count()), (1, 1));
    assert!(outcome.cleanup.is_none());
}

#[tokio::test]
async fn deploy_ansible_requires_playbook() {
    let env = Env::new(FakeProvisioner::hpc(), FakeShell::default());

    let outcome = env
        .suite()
        .dispatch(Command::DeployAnsible, &Options::default(), None)
        .await;

    assert_eq!(outcome.exit_code, ExitCode::Precondition);
    assert_eq!(env.configurator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deploy_ansible_reports_hosts() {
    let env = Env::new(
        FakeProvisioner::hpc().with_existing(&["hpc-controller", "hpc-compute-01"]),
        FakeShell::default(),
    );
    let suite = env.builder().playbook(env.tmp.path().join("site.yml")).build().unwrap();

    let outcome = suite.dispatch(Command::DeployAnsible, &Options::default(), None).await;

    assert_eq!(outcome.exit_code, ExitCode::Success, "{:?}", outcome.error);
    match &outcome.detail {
        OutcomeDetail::Configuration(report) => {
            assert!(report.is_complete());
            assert_eq!(report.hosts.len(), 2);
        }
        other => panic!("expected configuration detail, got {:?}", other),
    }
}

#[tokio::test]
async fn list_tests_creates_no_run_dir() {
    let env = Env::new(FakeProvisioner::hpc(), FakeShell::default());

    let outcome = env.suite().dispatch(Command::ListTests, &Options::default(), None).await;

    assert_eq!(outcome.exit_code, ExitCode::Success);
    match &outcome.detail {
        OutcomeDetail::Scripts(scripts) => assert_eq!(scripts, &vec!["a.sh", "b.sh"]),
        other => panic!("expected scripts, got {:?}", other),
    }
    assert!(outcome.run_dir.is_none());
    assert!(!env.log_root().exists());
}

#[tokio::test]
async fn status_reports_without_side_effects() {
    let env = Env::new(
        FakeProvisioner::hpc().with_existing(&["hpc-controller"]),
        FakeShell {
            unreachable: vec!["10.0.0.11"],
            ..Default::default()
        },
    );

    let outcome = env.suite().dispatch(Command::Status, &Options::default(), None).await;

    assert_eq!(outcome.exit_code, ExitCode::Success);
    let report = match &outcome.detail {
        OutcomeDetail::Status(report) => report,
        other => panic!("expected status, got {:?}", other),
    };
    assert_eq!(report.cluster, "hpc");
    assert_eq!(report.vms.len(), 2);
    assert_eq!(report.vms[0].name, "hpc-controller");
    assert_eq!(report.vms[0].present, Some(true));
    assert_eq!(report.vms[0].reachability, Reachability::Reachable);
    assert_eq!(report.vms[1].present, Some(false));
    assert_eq!(report.vms[1].reachability, Reachability::Unreachable);
    assert!(!report.is_healthy());

    assert!(!env.log_root().exists());
    assert_eq!(env.provisioner.start_calls.load(Ordering::SeqCst), 0);
    assert_eq!(env.provisioner.destroy_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_cluster_config_is_precondition() {
    let env = Env::new(FakeProvisioner::hpc(), FakeShell::default());
    let suite = SuiteBuilder::new("gpu", env.tmp.path().join("nope.yaml"), "hpc")
        .scripts_dir(env.tmp.path().join("gpu-suite"))
        .log_root(env.log_root())
        .provisioner(env.provisioner.clone())
        .shell(env.shell.clone())
        .build()
        .unwrap();

    let outcome = suite.dispatch(Command::EndToEnd, &Options::default(), None).await;

    assert_eq!(outcome.exit_code, ExitCode::Precondition);
    assert_eq!(env.provisioner.start_calls.load(Ordering::SeqCst), 0);
}
