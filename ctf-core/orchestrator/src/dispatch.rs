//! 命令调度
//!
//! 每个命令只是组件的组合，阶段严格串行：
//! 启动 → 发现 → 配置 → 测试 → 清理。

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use ctf_cluster::ClusterLayout;
use ctf_common::{RunContext, RunStatus, TestRun, VmRecord};
use ctf_executor::{find_script, list_scripts, write_summary};
use ctf_lifecycle::{
    CleanupController, CleanupGuard, CleanupMode, CleanupOutcome, ConfigurationReport, Inventory,
    LifecycleError, LifecycleManager, ProvisionerAddresses, Runbook,
};

use crate::command::{Command, ExitCode, Options};
use crate::error::{OrchestratorError, Result};
use crate::status::StatusReport;
use crate::suite::Suite;

/// 命令产出的内容
#[derive(Debug)]
pub enum OutcomeDetail {
    None,
    /// list-tests
    Scripts(Vec<String>),
    /// e2e / run-tests / run-test
    Run(TestRun),
    /// start-cluster：已就绪的虚拟机与手动销毁手册
    Cluster {
        records: Vec<VmRecord>,
        runbook: Option<Runbook>,
    },
    /// deploy-ansible
    Configuration(ConfigurationReport),
    Status(StatusReport),
}

/// 命令执行结果
#[derive(Debug)]
pub struct Outcome {
    pub command: Command,
    pub exit_code: ExitCode,
    pub detail: OutcomeDetail,
    /// 清理结果（只有涉及销毁的命令才有）
    pub cleanup: Option<CleanupOutcome>,
    pub error: Option<OrchestratorError>,
    pub run_dir: Option<PathBuf>,
}

impl Outcome {
    fn new(command: Command, run_dir: Option<PathBuf>) -> Self {
        Self {
            command,
            exit_code: ExitCode::Success,
            detail: OutcomeDetail::None,
            cleanup: None,
            error: None,
            run_dir,
        }
    }

    fn fail(mut self, error: OrchestratorError) -> Self {
        self.exit_code = error.exit_code();
        self.error = Some(error);
        self
    }

    /// 清理失败时至少返回 1（中断保持 130）
    fn settle(mut self, cleanup: Option<CleanupOutcome>) -> Self {
        if cleanup.as_ref().is_some_and(CleanupOutcome::is_failure)
            && self.exit_code == ExitCode::Success
        {
            self.exit_code = ExitCode::Failure;
        }
        self.cleanup = cleanup;
        self
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == ExitCode::Success
    }
}

impl Suite {
    /// 执行一个命令
    ///
    /// `ctx` 为空且命令需要运行目录时自动创建。
    pub async fn dispatch(&self, command: Command, options: &Options, ctx: Option<RunContext>) -> Outcome {
        let ctx = match ctx {
            Some(ctx) => Some(ctx),
            None if command.needs_run_dir() => match self.create_run_context() {
                Ok(ctx) => Some(ctx),
                Err(e) => return Outcome::new(command, None).fail(e),
            },
            None => None,
        };
        let run_dir = ctx.as_ref().map(|c| c.root().to_path_buf());
        let outcome = Outcome::new(command.clone(), run_dir);

        info!("套件 {} 执行命令 {}", self.name, command);

        let Some(ctx) = ctx else {
            return match command {
                Command::ListTests => self.list_tests(outcome),
                _ => self.status(outcome).await,
            };
        };

        match command {
            Command::EndToEnd => self.end_to_end(outcome, options, &ctx).await,
            Command::StartCluster => self.start_cluster(outcome, options, &ctx).await,
            Command::StopCluster => self.stop_cluster(outcome, &ctx).await,
            Command::DeployAnsible => self.deploy_ansible(outcome, &ctx).await,
            Command::RunTests => self.run_tests(outcome, &ctx, None).await,
            Command::RunTest { ref name, ref args } => {
                self.run_tests(outcome, &ctx, Some((name.as_str(), args.as_slice()))).await
            }
            Command::ListTests => self.list_tests(outcome),
            Command::Status => self.status(outcome).await,
        }
    }

    // ============================================
    // 完整流程
    // ============================================

    async fn end_to_end(&self, outcome: Outcome, options: &Options, ctx: &RunContext) -> Outcome {
        let mut run = TestRun::new(ctx.run_id(), &self.name, ctx.root(), self.descriptor.clone());

        if let Err(e) = self.checkpoint() {
            run.abort(e.to_string());
            close_run(&mut run);
            return publish_run(Outcome { detail: OutcomeDetail::Run(run), ..outcome }.fail(e), ctx);
        }

        let manager = self.manager(ctx);
        let controller = self.cleanup_controller(Arc::clone(&manager), ctx, Self::cleanup_mode(options));

        let guard = match self.provision(&manager, &controller).await {
            Ok(guard) => guard,
            Err((e, cleanup)) => {
                run.abort(e.to_string());
                close_run(&mut run);
                let outcome = Outcome { detail: OutcomeDetail::Run(run), ..outcome }
                    .fail(e)
                    .settle(cleanup);
                return publish_run(outcome, ctx);
            }
        };

        let result = self.e2e_phases(ctx, &mut run).await;
        if let Err(e) = &result {
            error!("运行中止: {}", e);
            run.abort(e.to_string());
        }

        let cleanup = self.release_obligation(guard, result.as_ref().err()).await;

        close_run(&mut run);
        let status = run.status;
        let outcome = Outcome { detail: OutcomeDetail::Run(run), ..outcome };
        let outcome = match result {
            Err(e) => outcome.fail(e),
            Ok(()) if status == RunStatus::Passed => outcome,
            Ok(()) => Outcome { exit_code: ExitCode::Failure, ..outcome },
        };
        publish_run(outcome.settle(Some(cleanup)), ctx)
    }

    async fn e2e_phases(&self, ctx: &RunContext, run: &mut TestRun) -> Result<()> {
        self.checkpoint()?;
        let records = self.discover_all(ctx).await?;

        self.checkpoint()?;
        if self.playbook.is_some() {
            let report = self.configure(ctx, &records).await?;
            ensure_configured(&report)?;
        } else {
            info!("未配置 playbook，跳过配置管理阶段");
        }

        self.checkpoint()?;
        let targets = self.targets(&records);
        let runner = self.runner(ctx, &records);
        runner.run_all(&targets, run).await?;
        Ok(())
    }

    /// 启动集群并立即登记清理义务
    ///
    /// 启动失败时检查 provisioner 是否留下部分资源，有则立即清理。
    async fn provision(
        &self,
        manager: &Arc<LifecycleManager>,
        controller: &CleanupController,
    ) -> std::result::Result<CleanupGuard, (OrchestratorError, Option<CleanupOutcome>)> {
        match manager.start(&self.descriptor).await {
            Ok(handle) => Ok(controller.arm(&handle)),
            Err(e) => {
                error!("启动集群失败: {}", e);
                let cleanup = if matches!(e, LifecycleError::ProvisionFailed { .. }) {
                    self.cleanup_partial(manager, controller).await
                } else {
                    None
                };
                Err((e.into(), cleanup))
            }
        }
    }

    async fn cleanup_partial(
        &self,
        manager: &LifecycleManager,
        controller: &CleanupController,
    ) -> Option<CleanupOutcome> {
        match manager.residues(&self.descriptor).await {
            Ok(found) if found.is_empty() => None,
            Ok(found) => {
                warn!("启动失败后发现部分资源: {}", found.join(", "));
                match controller.cleanup_now(&self.descriptor).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        error!("清理部分资源失败: {}", e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!("无法列举残留资源: {}", e);
                None
            }
        }
    }

    /// 中断时直接销毁，不再询问
    async fn release_obligation(
        &self,
        guard: CleanupGuard,
        error: Option<&OrchestratorError>,
    ) -> CleanupOutcome {
        if matches!(error, Some(OrchestratorError::Interrupted)) || self.cancel.is_cancelled() {
            guard.destroy().await
        } else {
            guard.finish().await
        }
    }

    // ============================================
    // 单独阶段
    // ============================================

    async fn start_cluster(&self, outcome: Outcome, options: &Options, ctx: &RunContext) -> Outcome {
        if let Err(e) = self.checkpoint() {
            return outcome.fail(e);
        }

        let manager = self.manager(ctx);
        let controller = self.cleanup_controller(Arc::clone(&manager), ctx, Self::cleanup_mode(options));

        let guard = match self.provision(&manager, &controller).await {
            Ok(guard) => guard,
            Err((e, cleanup)) => return outcome.fail(e).settle(cleanup),
        };

        match self.discover_all(ctx).await {
            Ok(records) => {
                let runbook = guard.release();
                if let Some(runbook) = &runbook {
                    if let Err(e) = std::fs::write(ctx.root().join("DESTROY.md"), runbook.render()) {
                        warn!("写入销毁手册失败: {}", e);
                    }
                }
                info!("集群 {} 已就绪并保持运行", self.descriptor.cluster_name);
                Outcome {
                    detail: OutcomeDetail::Cluster { records, runbook },
                    ..outcome
                }
            }
            Err(e) => {
                error!("集群未就绪: {}", e);
                let cleanup = self.release_obligation(guard, Some(&e)).await;
                outcome.fail(e).settle(Some(cleanup))
            }
        }
    }

    async fn stop_cluster(&self, outcome: Outcome, ctx: &RunContext) -> Outcome {
        let manager = self.manager(ctx);
        let controller = self.cleanup_controller(manager, ctx, CleanupMode::Automatic);

        match controller.cleanup_now(&self.descriptor).await {
            Ok(cleanup) => outcome.settle(Some(cleanup)),
            Err(e) => outcome.fail(e.into()),
        }
    }

    async fn deploy_ansible(&self, outcome: Outcome, ctx: &RunContext) -> Outcome {
        let result = async {
            self.playbook_path()?;
            self.checkpoint()?;
            let records = self.discover_all(ctx).await?;
            self.checkpoint()?;
            self.configure(ctx, &records).await
        }
        .await;

        match result {
            Ok(report) => {
                let check = ensure_configured(&report);
                let outcome = Outcome {
                    detail: OutcomeDetail::Configuration(report),
                    ..outcome
                };
                match check {
                    Ok(()) => outcome,
                    Err(e) => outcome.fail(e),
                }
            }
            Err(e) => outcome.fail(e),
        }
    }

    /// run-tests / run-test
    ///
    /// 假定集群已配置完成，不读取之前的配置结果。
    async fn run_tests(
        &self,
        outcome: Outcome,
        ctx: &RunContext,
        single: Option<(&str, &[String])>,
    ) -> Outcome {
        let mut run = TestRun::new(ctx.run_id(), &self.name, ctx.root(), self.descriptor.clone());

        let result = async {
            // 脚本不存在属于前置条件，先于任何远程操作检查
            match single {
                Some((name, _)) => {
                    find_script(&self.scripts_dir, name)?;
                }
                None => {
                    list_scripts(&self.scripts_dir)?;
                }
            }

            self.checkpoint()?;
            let records = self
                .discovery()
                .discover(&self.descriptor, &self.resolver(), ctx)
                .await?;

            self.checkpoint()?;
            let targets = self.targets(&records);
            let runner = self.runner(ctx, &records);
            match single {
                Some((name, args)) => {
                    for result in runner.run_on_targets(&targets, name, args).await? {
                        run.add_result(result);
                    }
                }
                None => runner.run_all(&targets, &mut run).await?,
            }
            Ok::<(), OrchestratorError>(())
        }
        .await;

        if let Err(e) = &result {
            run.abort(e.to_string());
        }
        close_run(&mut run);

        let status = run.status;
        let outcome = Outcome { detail: OutcomeDetail::Run(run), ..outcome };
        let outcome = match result {
            Err(e) => outcome.fail(e),
            Ok(()) if status == RunStatus::Passed => outcome,
            Ok(()) => Outcome { exit_code: ExitCode::Failure, ..outcome },
        };
        publish_run(outcome, ctx)
    }

    fn list_tests(&self, outcome: Outcome) -> Outcome {
        match list_scripts(&self.scripts_dir) {
            Ok(scripts) => Outcome {
                detail: OutcomeDetail::Scripts(scripts),
                ..outcome
            },
            Err(e) => outcome.fail(e.into()),
        }
    }

    async fn status(&self, outcome: Outcome) -> Outcome {
        match StatusReport::collect(self).await {
            Ok(report) => Outcome {
                detail: OutcomeDetail::Status(report),
                ..outcome
            },
            Err(e) => outcome.fail(e),
        }
    }

    // ============================================
    // 阶段实现
    // ============================================

    fn resolver(&self) -> ProvisionerAddresses {
        ProvisionerAddresses(Arc::clone(&self.provisioner))
    }

    /// 发现集群全部虚拟机（配置阶段需要完整主机列表）
    async fn discover_all(&self, ctx: &RunContext) -> Result<Vec<VmRecord>> {
        let mut descriptor = self.descriptor.clone();
        descriptor.target_vm = None;
        let records = self.discovery().discover(&descriptor, &self.resolver(), ctx).await?;
        Ok(records)
    }

    fn playbook_path(&self) -> Result<&PathBuf> {
        let playbook = self.playbook.as_ref().ok_or_else(|| {
            OrchestratorError::Precondition(format!("套件 {} 未配置 playbook", self.name))
        })?;
        if !playbook.exists() {
            return Err(OrchestratorError::Precondition(format!(
                "playbook 不存在: {}",
                playbook.display()
            )));
        }
        Ok(playbook)
    }

    /// 生成 inventory 并执行配置管理，结果写入 configuration.json
    async fn configure(&self, ctx: &RunContext, records: &[VmRecord]) -> Result<ConfigurationReport> {
        let playbook = self.playbook_path()?;
        let layout = ClusterLayout::load(&self.descriptor.config_path, &self.descriptor.cluster_name)?;

        let inventory = Inventory::build(&layout.name, layout.kind, records);
        let inventory_path = ctx.inventory_path();
        inventory.write(&inventory_path)?;

        let report = self
            .configurator
            .apply(
                &inventory_path,
                playbook,
                &inventory.hosts(),
                &ctx.lifecycle_log("configure"),
            )
            .await?;

        std::fs::write(ctx.configuration_path(), report.to_json()?)?;
        info!(
            "配置管理完成: {} 台主机, 未完成 {}",
            report.hosts.len(),
            report.unconfigured.len()
        );
        Ok(report)
    }
}

/// 完成测试运行并计算总体状态
fn close_run(run: &mut TestRun) {
    let status = run.finalize();
    info!(
        "运行 {} 结束: {} (通过 {}, 失败 {})",
        run.run_id,
        status,
        run.passed_count(),
        run.failed_count()
    );
}

/// 清理结束后写入摘要，记录最终退出码与清理结果
fn publish_run(mut outcome: Outcome, ctx: &RunContext) -> Outcome {
    let exit_code = outcome.exit_code.code();
    let cleanup = outcome.cleanup.as_ref().map(|c| c.label().to_string());
    if let OutcomeDetail::Run(run) = &mut outcome.detail {
        run.settle(exit_code, cleanup);
        if let Err(e) = write_summary(run, ctx) {
            error!("写入运行摘要失败: {}", e);
        }
    }
    outcome
}

/// 部分主机未完成配置时拒绝进入测试阶段
fn ensure_configured(report: &ConfigurationReport) -> Result<()> {
    if report.is_complete() {
        return Ok(());
    }
    error!("以下主机未完成配置: {}", report.unconfigured.join(", "));
    Err(OrchestratorError::Configuration {
        message: format!(
            "{} 台主机未完成配置 ({}), 详见 {}",
            report.unconfigured.len(),
            report.unconfigured.join(", "),
            report.command
        ),
        unconfigured: report.unconfigured.clone(),
    })
}
