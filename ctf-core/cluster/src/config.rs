//! 集群配置文档解析
//!
//! 只解析连接集群所需的子集（集群名称、节点角色、节点地址、GPU 直通），
//! 其余字段由外部 provisioner 负责校验。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use ctf_common::VmRole;

use crate::error::{ClusterError, Result};

// ============================================
// 配置文档结构
// ============================================

#[derive(Debug, Deserialize)]
struct ClusterDocument {
    #[serde(default)]
    clusters: BTreeMap<String, ClusterSection>,
}

#[derive(Debug, Deserialize)]
struct ClusterSection {
    name: Option<String>,
    controller: Option<NodeSection>,
    #[serde(default)]
    compute_nodes: Vec<NodeSection>,
    control_plane: Option<NodeSection>,
    #[serde(default)]
    worker_nodes: BTreeMap<String, Vec<NodeSection>>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeSection {
    ip_address: Option<String>,
    ip: Option<String>,
    #[serde(default)]
    pcie_passthrough: Option<PcieSection>,
}

#[derive(Debug, Default, Deserialize)]
struct PcieSection {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    devices: Vec<PcieDevice>,
}

#[derive(Debug, Deserialize)]
struct PcieDevice {
    device_type: Option<String>,
}

impl NodeSection {
    /// 静态地址，"dhcp" 或缺省视为未知
    fn address(&self) -> Option<String> {
        self.ip_address
            .as_deref()
            .or(self.ip.as_deref())
            .map(str::trim)
            .filter(|ip| !ip.is_empty() && !ip.eq_ignore_ascii_case("dhcp"))
            .map(str::to_string)
    }

    fn has_gpu(&self) -> bool {
        self.pcie_passthrough.as_ref().is_some_and(|p| {
            p.enabled
                && p.devices
                    .iter()
                    .any(|d| d.device_type.as_deref() == Some("gpu"))
        })
    }
}

// ============================================
// 解析结果
// ============================================

/// 集群类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterKind {
    Hpc,
    Cloud,
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterKind::Hpc => write!(f, "hpc"),
            ClusterKind::Cloud => write!(f, "cloud"),
        }
    }
}

/// 配置中声明的节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub role: VmRole,
    pub address: Option<String>,
    pub gpu: bool,
}

/// 集群布局（从配置文档中提取的可寻址端点）
#[derive(Debug, Clone)]
pub struct ClusterLayout {
    /// 配置节的键（hpc / cloud）
    pub key: String,
    /// 集群名称，虚拟机名称由其派生
    pub name: String,
    pub kind: ClusterKind,
    pub nodes: Vec<NodeSpec>,
}

impl ClusterLayout {
    /// 从配置文件加载指定集群
    pub fn load(path: &Path, cluster_name: &str) -> Result<Self> {
        if !path.exists() {
            return Err(ClusterError::ConfigNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content, cluster_name).map_err(|e| match e {
            ClusterError::SerdeError(message) => ClusterError::ConfigParse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// 从 YAML 字符串解析指定集群
    ///
    /// 先按配置节的键匹配（hpc / cloud），再按集群 `name` 匹配。
    pub fn parse(content: &str, cluster_name: &str) -> Result<Self> {
        let doc: ClusterDocument =
            serde_yaml::from_str(content).map_err(|e| ClusterError::SerdeError(e.to_string()))?;

        let (key, section) = doc
            .clusters
            .iter()
            .find(|(key, _)| key.as_str() == cluster_name)
            .or_else(|| {
                doc.clusters
                    .iter()
                    .find(|(_, s)| s.name.as_deref() == Some(cluster_name))
            })
            .ok_or_else(|| ClusterError::ClusterNotDefined {
                name: cluster_name.to_string(),
                available: doc.clusters.keys().cloned().collect::<Vec<_>>().join(", "),
            })?;

        Ok(Self::from_section(key, section))
    }

    fn from_section(key: &str, section: &ClusterSection) -> Self {
        let name = section.name.clone().unwrap_or_else(|| key.to_string());
        let kind = if key == "cloud" || (key != "hpc" && section.control_plane.is_some()) {
            ClusterKind::Cloud
        } else {
            ClusterKind::Hpc
        };

        let mut nodes = Vec::new();
        match kind {
            ClusterKind::Hpc => {
                if let Some(controller) = &section.controller {
                    nodes.push(NodeSpec {
                        name: format!("{}-controller", name),
                        role: VmRole::Controller,
                        address: controller.address(),
                        gpu: false,
                    });
                }
                for (i, node) in section.compute_nodes.iter().enumerate() {
                    nodes.push(NodeSpec {
                        name: format!("{}-compute-{:02}", name, i + 1),
                        role: VmRole::Compute,
                        address: node.address(),
                        gpu: node.has_gpu(),
                    });
                }
            }
            ClusterKind::Cloud => {
                if let Some(cp) = &section.control_plane {
                    nodes.push(NodeSpec {
                        name: format!("{}-control-plane", name),
                        role: VmRole::ControlPlane,
                        address: cp.address(),
                        gpu: false,
                    });
                }
                for (worker_type, workers) in &section.worker_nodes {
                    for (i, node) in workers.iter().enumerate() {
                        nodes.push(NodeSpec {
                            name: format!("{}-{}-{:02}", name, worker_type, i + 1),
                            role: VmRole::Worker(worker_type.clone()),
                            address: node.address(),
                            gpu: node.has_gpu(),
                        });
                    }
                }
            }
        }

        Self {
            key: key.to_string(),
            name,
            kind,
            nodes,
        }
    }

    /// 按名称查找节点
    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// 第一个控制节点
    pub fn control_node(&self) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.role.is_control())
    }

    /// 所有虚拟机名称
    pub fn vm_names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.name.clone()).collect()
    }

    /// 资源名称前缀（`<name>-`）
    pub fn resource_prefix(&self) -> String {
        format!("{}-", self.name)
    }

    /// 资源是否属于该集群（按 `<name>-` 前缀匹配，与目标过滤无关）
    pub fn owns_resource(&self, resource: &str) -> bool {
        resource.starts_with(&self.resource_prefix())
    }
}
