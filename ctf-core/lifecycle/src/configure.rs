//! 配置管理交接
//!
//! 根据已就绪的虚拟机生成 inventory，交给外部配置管理工具（默认 ansible-playbook）
//! 执行指定 playbook，并从 PLAY RECAP 中解析每台主机的结果。

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use ctf_cluster::ClusterKind;
use ctf_common::{VmRecord, VmRole};

use crate::error::{LifecycleError, Result};
use crate::process::{append_transcript, run_command};

// ============================================
// Inventory
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostVars {
    pub ansible_host: String,
    pub ansible_user: String,
    pub ansible_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansible_ssh_private_key_file: Option<String>,
    pub node_role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryGroup {
    pub hosts: BTreeMap<String, HostVars>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRoot {
    pub vars: BTreeMap<String, String>,
    pub children: BTreeMap<String, InventoryGroup>,
}

/// YAML inventory 文档
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub all: InventoryRoot,
}

impl Inventory {
    /// 按集群类型分组生成 inventory
    pub fn build(cluster_name: &str, kind: ClusterKind, records: &[VmRecord]) -> Self {
        let mut root = InventoryRoot::default();
        root.vars
            .insert("cluster_name".to_string(), cluster_name.to_string());

        for record in records {
            let Some(address) = &record.address else {
                warn!("虚拟机 {} 没有地址，不写入 inventory", record.name);
                continue;
            };
            let vars = HostVars {
                ansible_host: address.clone(),
                ansible_user: record.credentials.user.clone(),
                ansible_port: record.credentials.port,
                ansible_ssh_private_key_file: record
                    .credentials
                    .key_path
                    .as_ref()
                    .map(|p| p.display().to_string()),
                node_role: record.role.to_string(),
            };

            for group in groups_for(kind, record) {
                root.children
                    .entry(group.to_string())
                    .or_default()
                    .hosts
                    .insert(record.name.clone(), vars.clone());
            }
        }

        Self { all: root }
    }

    /// 所有主机名称
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .all
            .children
            .values()
            .flat_map(|g| g.hosts.keys().cloned())
            .collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| LifecycleError::SerdeError(e.to_string()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        info!("inventory 已写入: {}", path.display());
        Ok(())
    }
}

fn groups_for(kind: ClusterKind, record: &VmRecord) -> Vec<&'static str> {
    let mut groups = Vec::new();
    match (kind, &record.role) {
        (ClusterKind::Hpc, VmRole::Controller) => groups.push("hpc_controllers"),
        (ClusterKind::Hpc, _) => {
            groups.push("hpc_compute_nodes");
            if record.gpu {
                groups.push("hpc_gpu_nodes");
            }
        }
        (ClusterKind::Cloud, VmRole::ControlPlane) => groups.push("k8s_control_plane"),
        (ClusterKind::Cloud, _) => {
            groups.push("k8s_workers");
            if record.gpu {
                groups.push("k8s_gpu_workers");
            }
        }
    }
    groups
}

// ============================================
// 执行结果
// ============================================

/// PLAY RECAP 中单台主机的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecap {
    pub ok: u32,
    pub changed: u32,
    pub unreachable: u32,
    pub failed: u32,
}

impl HostRecap {
    pub fn is_configured(&self) -> bool {
        self.failed == 0 && self.unreachable == 0
    }
}

/// 配置管理阶段结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationReport {
    pub command: String,
    pub exit_code: Option<i32>,
    pub hosts: BTreeMap<String, HostRecap>,
    /// 未完成配置的主机（失败、不可达或不在 RECAP 中）
    pub unconfigured: Vec<String>,
}

impl ConfigurationReport {
    /// 根据 RECAP 与期望主机列表计算结果
    pub fn new(
        command: impl Into<String>,
        exit_code: Option<i32>,
        hosts: BTreeMap<String, HostRecap>,
        expected: &[String],
    ) -> Self {
        let mut unconfigured: Vec<String> = expected
            .iter()
            .filter(|h| !hosts.get(*h).is_some_and(HostRecap::is_configured))
            .cloned()
            .collect();
        for (host, recap) in &hosts {
            if !recap.is_configured() && !unconfigured.contains(host) {
                unconfigured.push(host.clone());
            }
        }
        unconfigured.sort();

        Self {
            command: command.into(),
            exit_code,
            hosts,
            unconfigured,
        }
    }

    /// 所有主机均已配置
    pub fn is_complete(&self) -> bool {
        self.unconfigured.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| LifecycleError::SerdeError(e.to_string()))
    }
}

/// 解析 PLAY RECAP
pub fn parse_play_recap(output: &str) -> BTreeMap<String, HostRecap> {
    let mut hosts = BTreeMap::new();
    let Some(start) = output.find("PLAY RECAP") else {
        return hosts;
    };
    let Ok(re) = Regex::new(
        r"(?m)^(\S+)\s*:\s*ok=(\d+)\s+changed=(\d+)\s+unreachable=(\d+)\s+failed=(\d+)",
    ) else {
        return hosts;
    };

    for caps in re.captures_iter(&output[start..]) {
        let num = |i: usize| {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0)
        };
        hosts.insert(
            caps[1].to_string(),
            HostRecap {
                ok: num(2),
                changed: num(3),
                unreachable: num(4),
                failed: num(5),
            },
        );
    }
    hosts
}

// ============================================
// 配置管理执行器
// ============================================

/// 外部配置管理工具接口
#[async_trait]
pub trait ConfigurationRunner: Send + Sync {
    /// 以 inventory 执行 playbook，期望主机为 inventory 中的全部主机
    async fn apply(
        &self,
        inventory: &Path,
        playbook: &Path,
        expected_hosts: &[String],
        transcript: &Path,
    ) -> Result<ConfigurationReport>;
}

/// ansible-playbook 执行器
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnsibleRunner {
    pub program: String,
    pub extra_args: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// 工作目录（默认为 playbook 所在目录）
    pub working_dir: Option<PathBuf>,
}

impl Default for AnsibleRunner {
    fn default() -> Self {
        Self {
            program: "ansible-playbook".to_string(),
            extra_args: Vec::new(),
            timeout: Duration::from_secs(60 * 60),
            working_dir: None,
        }
    }
}

#[async_trait]
impl ConfigurationRunner for AnsibleRunner {
    async fn apply(
        &self,
        inventory: &Path,
        playbook: &Path,
        expected_hosts: &[String],
        transcript: &Path,
    ) -> Result<ConfigurationReport> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-i").arg(inventory).args(&self.extra_args).arg(playbook);
        cmd.env("ANSIBLE_HOST_KEY_CHECKING", "False");
        if let Some(dir) = self.working_dir.as_deref().or_else(|| playbook.parent()) {
            if !dir.as_os_str().is_empty() {
                cmd.current_dir(dir);
            }
        }

        let label = format!(
            "{} -i {} {} {}",
            self.program,
            inventory.display(),
            self.extra_args.join(" "),
            playbook.display()
        )
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

        info!("执行配置管理: {}", label);
        let output = run_command(&mut cmd, &label, self.timeout).await?;
        if let Err(e) = append_transcript(transcript, &output) {
            warn!("写入配置管理记录失败 {}: {}", transcript.display(), e);
        }

        let hosts = parse_play_recap(&output.output);
        if hosts.is_empty() && !output.is_success() {
            return Err(LifecycleError::ConfigurationFailed {
                command: output.command,
                exit_code: output.exit_code,
                output: output.output,
            });
        }

        Ok(ConfigurationReport::new(
            output.command,
            output.exit_code,
            hosts,
            expected_hosts,
        ))
    }
}
