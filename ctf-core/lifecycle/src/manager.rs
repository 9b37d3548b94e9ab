//! 集群生命周期管理器
//!
//! 通过外部 provisioner 启动 / 停止 / 销毁集群，并在销毁后重新列举资源
//! 确认没有残留。

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use ctf_cluster::{ClusterKind, ClusterLayout};
use ctf_common::{ClusterDescriptor, RunContext};

use crate::error::{LifecycleError, Result};
use crate::process::{append_transcript, ProcessOutput};
use crate::provisioner::Provisioner;

/// 已启动集群的句柄
#[derive(Debug, Clone)]
pub struct ClusterHandle {
    descriptor: ClusterDescriptor,
    name: String,
    kind: ClusterKind,
    vm_names: Vec<String>,
    started_at: DateTime<Utc>,
}

impl ClusterHandle {
    pub fn descriptor(&self) -> &ClusterDescriptor {
        &self.descriptor
    }

    /// 配置中的集群名称，虚拟机名称由其派生
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ClusterKind {
        self.kind
    }

    /// 配置中声明的虚拟机名称
    pub fn vm_names(&self) -> &[String] {
        &self.vm_names
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// 集群生命周期管理器
pub struct LifecycleManager {
    provisioner: Arc<dyn Provisioner>,
    transcript_dir: Option<PathBuf>,
    /// 本进程内已启动且尚未销毁的集群
    active: Mutex<HashSet<String>>,
}

impl LifecycleManager {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            provisioner,
            transcript_dir: None,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// 将 provisioner 输出记录到运行目录的 lifecycle/ 下
    pub fn with_run_context(mut self, ctx: &RunContext) -> Self {
        self.transcript_dir = Some(ctx.root().join("lifecycle"));
        self
    }

    pub fn provisioner(&self) -> &Arc<dyn Provisioner> {
        &self.provisioner
    }

    /// 读取集群类型与虚拟机列表
    pub fn layout(&self, descriptor: &ClusterDescriptor) -> Result<ClusterLayout> {
        Ok(ClusterLayout::load(&descriptor.config_path, &descriptor.cluster_name)?)
    }

    /// 启动集群
    ///
    /// 目标集群已存在时返回 [`LifecycleError::AlreadyRunning`]，不会调用 provisioner。
    /// 设置了目标过滤时只有被过滤选中的已有资源才视为冲突。
    pub async fn start(&self, descriptor: &ClusterDescriptor) -> Result<ClusterHandle> {
        let layout = self.layout(descriptor)?;
        let destroy_command = self
            .provisioner
            .destroy_command(&descriptor.config_path, layout.kind);

        if self.is_active(&descriptor.cluster_name) {
            return Err(LifecycleError::AlreadyRunning {
                resource: format!("{} (本进程已启动)", descriptor.cluster_name),
                destroy_command,
            });
        }

        let conflict = self
            .owned_resources(&layout)
            .await?
            .into_iter()
            .find(|r| descriptor.targets(r));
        if let Some(resource) = conflict {
            warn!("集群资源已存在: {}", resource);
            return Err(LifecycleError::AlreadyRunning {
                resource,
                destroy_command,
            });
        }

        info!(
            "启动集群 {} ({}): {}",
            descriptor.cluster_name,
            layout.kind,
            descriptor.config_path.display()
        );
        let output = self
            .provisioner
            .start(&descriptor.config_path, layout.kind)
            .await?;
        self.record("start", &output);

        if !output.is_success() {
            error!("集群启动失败: {}", output.command);
            return Err(LifecycleError::ProvisionFailed {
                command: output.command,
                exit_code: output.exit_code,
                output: output.output,
            });
        }

        self.mark_active(&descriptor.cluster_name, true);
        info!("集群 {} 已启动", descriptor.cluster_name);

        Ok(ClusterHandle {
            descriptor: descriptor.clone(),
            name: layout.name.clone(),
            kind: layout.kind,
            vm_names: layout.vm_names(),
            started_at: Utc::now(),
        })
    }

    /// 停止集群（不删除虚拟机）
    pub async fn stop(&self, handle: &ClusterHandle) -> Result<()> {
        let descriptor = handle.descriptor();
        info!("停止集群 {}", descriptor.cluster_name);
        let output = self
            .provisioner
            .stop(&descriptor.config_path, handle.kind)
            .await?;
        self.record("stop", &output);

        if !output.is_success() {
            return Err(LifecycleError::CommandFailed {
                command: output.command,
                exit_code: output.exit_code,
                output: output.output,
            });
        }
        Ok(())
    }

    /// 销毁集群并验证
    ///
    /// 幂等：集群已不存在时直接返回成功。
    pub async fn destroy(&self, descriptor: &ClusterDescriptor, force: bool) -> Result<()> {
        let present = self.residues(descriptor).await?;
        if present.is_empty() {
            info!("集群 {} 不存在，无需销毁", descriptor.cluster_name);
            self.mark_active(&descriptor.cluster_name, false);
            return Ok(());
        }

        let kind = self.layout(descriptor)?.kind;
        info!(
            "销毁集群 {} ({} 个资源): {}",
            descriptor.cluster_name,
            present.len(),
            present.join(", ")
        );
        let output = self
            .provisioner
            .destroy(&descriptor.config_path, kind, force)
            .await?;
        self.record("destroy", &output);

        if !output.is_success() {
            error!("集群销毁失败: {}", output.command);
            return Err(LifecycleError::DestroyFailed {
                command: output.command,
                exit_code: output.exit_code,
                output: output.output,
            });
        }

        self.verify_destroyed(descriptor).await?;
        self.mark_active(&descriptor.cluster_name, false);
        info!("集群 {} 已销毁", descriptor.cluster_name);
        Ok(())
    }

    /// 重新列举资源，确认集群已完全销毁
    pub async fn verify_destroyed(&self, descriptor: &ClusterDescriptor) -> Result<()> {
        let layout = self.layout(descriptor)?;
        let residues = self.owned_resources(&layout).await?;
        if residues.is_empty() {
            return Ok(());
        }

        error!(
            "集群 {} 销毁后仍有残留资源: {}",
            descriptor.cluster_name,
            residues.join(", ")
        );
        Err(LifecycleError::ResiduesRemain {
            resources: residues,
            verify_command: self.provisioner.verify_command(&layout.name),
        })
    }

    /// 列举属于该集群的全部资源
    ///
    /// 按配置中集群名称的 `<name>-` 前缀匹配，不受目标过滤影响。
    pub async fn residues(&self, descriptor: &ClusterDescriptor) -> Result<Vec<String>> {
        let layout = self.layout(descriptor)?;
        self.owned_resources(&layout).await
    }

    async fn owned_resources(&self, layout: &ClusterLayout) -> Result<Vec<String>> {
        Ok(self
            .provisioner
            .list_resources()
            .await?
            .into_iter()
            .filter(|r| layout.owns_resource(r))
            .collect())
    }

    fn is_active(&self, cluster: &str) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(cluster))
            .unwrap_or(false)
    }

    fn mark_active(&self, cluster: &str, active: bool) {
        if let Ok(mut set) = self.active.lock() {
            if active {
                set.insert(cluster.to_string());
            } else {
                set.remove(cluster);
            }
        }
    }

    fn record(&self, operation: &str, output: &ProcessOutput) {
        let Some(dir) = &self.transcript_dir else {
            return;
        };
        let path = dir.join(format!("{}.log", operation));
        if let Err(e) = append_transcript(&path, output) {
            warn!("写入操作记录失败 {}: {}", path.display(), e);
        }
    }
}
