//! 清理控制器
//!
//! 状态机：
//!
//! ```text
//! Idle → ObligationSet → CleanupAttempted → Cleared
//!                                         → CleanupFailed → ManualInterventionRequired
//! ```
//!
//! 集群启动成功后立即通过 [`CleanupController::arm`] 取得 [`CleanupGuard`]。
//! 正常路径调用 [`CleanupGuard::finish`]；guard 在未完成时被丢弃（提前返回、panic），
//! 会在 Drop 中以自动模式执行同一清理路径。

use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ctf_cluster::ClusterKind;
use ctf_common::ClusterDescriptor;

use crate::error::Result;
use crate::manager::{ClusterHandle, LifecycleManager};

/// 清理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupState {
    Idle,
    ObligationSet,
    CleanupAttempted,
    Cleared,
    CleanupFailed,
    ManualInterventionRequired,
}

/// 清理模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupMode {
    /// 非交互：总是销毁
    Automatic,
    /// 销毁前请求确认（--no-cleanup）
    Interactive,
}

/// 确认提示
#[async_trait]
pub trait ConfirmPrompt: Send + Sync {
    async fn confirm(&self, question: &str) -> bool;
}

/// 从标准输入读取 y/N
pub struct StdinPrompt;

#[async_trait]
impl ConfirmPrompt for StdinPrompt {
    async fn confirm(&self, question: &str) -> bool {
        let mut stderr = tokio::io::stderr();
        let _ = stderr
            .write_all(format!("{} [y/N] ", question).as_bytes())
            .await;
        let _ = stderr.flush().await;

        let mut input = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut input).await {
            Ok(_) => matches!(input.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

/// 固定应答（非 TTY 环境或测试）
pub struct FixedAnswer(pub bool);

#[async_trait]
impl ConfirmPrompt for FixedAnswer {
    async fn confirm(&self, _question: &str) -> bool {
        self.0
    }
}

/// 手动恢复手册
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runbook {
    pub cluster: String,
    pub reason: String,
    /// 遗留资源
    pub resources: Vec<String>,
    /// 手动清理命令（按顺序执行）
    pub commands: Vec<String>,
    /// 验证命令（无输出表示环境已清理）
    pub verify_command: String,
}

impl Runbook {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# 集群 {} 需要手动清理", self.cluster);
        let _ = writeln!(out);
        let _ = writeln!(out, "原因: {}", self.reason);
        let _ = writeln!(out);
        let _ = writeln!(out, "## 遗留资源");
        let _ = writeln!(out);
        if self.resources.is_empty() {
            let _ = writeln!(out, "- (无法列举，按配置中声明的虚拟机处理)");
        }
        for resource in &self.resources {
            let _ = writeln!(out, "- {}", resource);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "## 清理命令");
        let _ = writeln!(out);
        let _ = writeln!(out, "```sh");
        for command in &self.commands {
            let _ = writeln!(out, "{}", command);
        }
        let _ = writeln!(out, "```");
        let _ = writeln!(out);
        let _ = writeln!(out, "## 验证");
        let _ = writeln!(out);
        let _ = writeln!(out, "以下命令无输出即表示环境已清理:");
        let _ = writeln!(out);
        let _ = writeln!(out, "```sh");
        let _ = writeln!(out, "{}", self.verify_command);
        let _ = writeln!(out, "```");
        out
    }
}

/// 清理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// 已销毁并验证
    Cleared,
    /// 操作员选择保留集群
    Retained(Runbook),
    /// 自动清理失败
    ManualInterventionRequired(Runbook),
}

impl CleanupOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CleanupOutcome::ManualInterventionRequired(_))
    }

    pub fn runbook(&self) -> Option<&Runbook> {
        match self {
            CleanupOutcome::Cleared => None,
            CleanupOutcome::Retained(r) | CleanupOutcome::ManualInterventionRequired(r) => Some(r),
        }
    }

    /// 摘要中使用的名称
    pub fn label(&self) -> &'static str {
        match self {
            CleanupOutcome::Cleared => "cleared",
            CleanupOutcome::Retained(_) => "retained",
            CleanupOutcome::ManualInterventionRequired(_) => "manual_intervention_required",
        }
    }
}

/// 清理控制器
pub struct CleanupController {
    manager: Arc<LifecycleManager>,
    mode: CleanupMode,
    prompt: Arc<dyn ConfirmPrompt>,
    runbook_path: Option<PathBuf>,
    cancel: Option<CancellationToken>,
    state: Arc<Mutex<CleanupState>>,
}

impl CleanupController {
    pub fn new(manager: Arc<LifecycleManager>, mode: CleanupMode) -> Self {
        Self {
            manager,
            mode,
            prompt: Arc::new(StdinPrompt),
            runbook_path: None,
            cancel: None,
            state: Arc::new(Mutex::new(CleanupState::Idle)),
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn ConfirmPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// 清理失败时手册的写入位置
    pub fn with_runbook_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.runbook_path = Some(path.into());
        self
    }

    /// 交互确认期间收到中断时放弃提问，直接销毁
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn mode(&self) -> CleanupMode {
        self.mode
    }

    pub fn state(&self) -> CleanupState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(CleanupState::ManualInterventionRequired)
    }

    /// 设置清理义务，返回清理 guard
    pub fn arm(&self, handle: &ClusterHandle) -> CleanupGuard {
        set_state(&self.state, CleanupState::ObligationSet);
        info!("已登记集群 {} 的清理义务", handle.descriptor().cluster_name);

        CleanupGuard {
            task: Some(CleanupTask {
                manager: Arc::clone(&self.manager),
                descriptor: handle.descriptor().clone(),
                name: handle.name().to_string(),
                kind: handle.kind(),
                declared: handle.vm_names().to_vec(),
                runbook_path: self.runbook_path.clone(),
                state: Arc::clone(&self.state),
            }),
            mode: self.mode,
            prompt: Arc::clone(&self.prompt),
            cancel: self.cancel.clone(),
        }
    }

    /// 为未持有句柄的集群（例如 stop-cluster）直接执行一次清理
    ///
    /// 集群配置无法读取时返回错误，此时没有可执行的清理路径。
    pub async fn cleanup_now(&self, descriptor: &ClusterDescriptor) -> Result<CleanupOutcome> {
        let layout = self.manager.layout(descriptor)?;
        set_state(&self.state, CleanupState::ObligationSet);

        let task = CleanupTask {
            manager: Arc::clone(&self.manager),
            descriptor: descriptor.clone(),
            name: layout.name.clone(),
            kind: layout.kind,
            declared: layout.vm_names(),
            runbook_path: self.runbook_path.clone(),
            state: Arc::clone(&self.state),
        };
        Ok(task.destroy().await)
    }
}

fn set_state(state: &Mutex<CleanupState>, next: CleanupState) {
    if let Ok(mut s) = state.lock() {
        *s = next;
    }
}

/// 一次清理所需的全部上下文
struct CleanupTask {
    manager: Arc<LifecycleManager>,
    descriptor: ClusterDescriptor,
    /// 配置中的集群名称（资源前缀）
    name: String,
    kind: ClusterKind,
    declared: Vec<String>,
    runbook_path: Option<PathBuf>,
    state: Arc<Mutex<CleanupState>>,
}

impl CleanupTask {
    async fn destroy(&self) -> CleanupOutcome {
        set_state(&self.state, CleanupState::CleanupAttempted);
        info!("清理集群 {}", self.descriptor.cluster_name);

        match self.manager.destroy(&self.descriptor, true).await {
            Ok(()) => {
                set_state(&self.state, CleanupState::Cleared);
                info!("集群 {} 已清理", self.descriptor.cluster_name);
                CleanupOutcome::Cleared
            }
            Err(e) => {
                set_state(&self.state, CleanupState::CleanupFailed);
                error!("集群 {} 清理失败: {}", self.descriptor.cluster_name, e);
                let runbook = self.runbook(e.to_string()).await;
                self.escalate(runbook)
            }
        }
    }

    /// 生成手册：优先使用实际残留资源，无法列举时回退到配置中声明的虚拟机
    async fn runbook(&self, reason: String) -> Runbook {
        let resources = match self.manager.residues(&self.descriptor).await {
            Ok(found) if !found.is_empty() => found,
            Ok(_) => self.declared.clone(),
            Err(e) => {
                warn!("无法列举残留资源: {}", e);
                self.declared.clone()
            }
        };
        self.build_runbook(resources, reason)
    }

    fn build_runbook(&self, resources: Vec<String>, reason: String) -> Runbook {
        let provisioner = self.manager.provisioner();
        let mut commands = vec![provisioner.destroy_command(&self.descriptor.config_path, self.kind)];
        for resource in &resources {
            commands.extend(provisioner.removal_commands(resource));
        }

        Runbook {
            cluster: self.descriptor.cluster_name.clone(),
            reason,
            resources,
            commands,
            verify_command: provisioner.verify_command(&self.name),
        }
    }

    fn escalate(&self, runbook: Runbook) -> CleanupOutcome {
        set_state(&self.state, CleanupState::ManualInterventionRequired);
        self.publish(&runbook);
        CleanupOutcome::ManualInterventionRequired(runbook)
    }

    fn publish(&self, runbook: &Runbook) {
        let text = runbook.render();
        error!("需要手动清理:\n{}", text);
        if let Some(path) = &self.runbook_path {
            match std::fs::write(path, &text) {
                Ok(()) => warn!("手动清理手册已写入: {}", path.display()),
                Err(e) => error!("写入手动清理手册失败 {}: {}", path.display(), e),
            }
        }
    }
}

/// 清理 guard
///
/// 持有期间清理义务一直存在。
pub struct CleanupGuard {
    task: Option<CleanupTask>,
    mode: CleanupMode,
    prompt: Arc<dyn ConfirmPrompt>,
    cancel: Option<CancellationToken>,
}

impl CleanupGuard {
    /// 按控制器模式执行清理并解除 guard
    pub async fn finish(mut self) -> CleanupOutcome {
        let Some(task) = self.task.take() else {
            return CleanupOutcome::Cleared;
        };

        if self.mode == CleanupMode::Interactive {
            let question = format!("是否销毁集群 {}?", task.descriptor.cluster_name);
            let answer = match &self.cancel {
                Some(cancel) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    answer = self.prompt.confirm(&question) => Some(answer),
                },
                None => Some(self.prompt.confirm(&question).await),
            };

            let Some(confirmed) = answer else {
                warn!("等待确认时收到中断，销毁集群 {}", task.descriptor.cluster_name);
                return task.destroy().await;
            };

            if !confirmed {
                info!("保留集群 {}", task.descriptor.cluster_name);
                let runbook = task
                    .runbook("集群按操作员要求保留 (--no-cleanup)".to_string())
                    .await;
                set_state(&task.state, CleanupState::ManualInterventionRequired);
                if let Some(path) = &task.runbook_path {
                    if let Err(e) = std::fs::write(path, runbook.render()) {
                        warn!("写入手动清理手册失败 {}: {}", path.display(), e);
                    }
                }
                return CleanupOutcome::Retained(runbook);
            }
        }

        task.destroy().await
    }

    /// 忽略交互模式直接销毁（中断路径）
    pub async fn destroy(mut self) -> CleanupOutcome {
        match self.task.take() {
            Some(task) => task.destroy().await,
            None => CleanupOutcome::Cleared,
        }
    }

    /// 将集群移交给操作员（start-cluster），不执行清理
    ///
    /// 返回手动销毁手册，状态停留在 ObligationSet。
    pub fn release(mut self) -> Option<Runbook> {
        let task = self.task.take()?;
        info!(
            "集群 {} 保持运行，使用 stop-cluster 销毁",
            task.descriptor.cluster_name
        );
        Some(task.build_runbook(
            task.declared.clone(),
            "集群由 start-cluster 启动，按要求保持运行".to_string(),
        ))
    }

    /// 义务是否仍未处理
    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        warn!(
            "集群 {} 的清理 guard 未完成即被释放，执行自动清理",
            task.descriptor.cluster_name
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| {
                    handle.block_on(task.destroy());
                });
            }
            _ => {
                set_state(&task.state, CleanupState::CleanupFailed);
                let runbook = task.build_runbook(
                    task.declared.clone(),
                    "无法在当前运行时中执行自动清理".to_string(),
                );
                task.escalate(runbook);
            }
        }
    }
}
