//! 集群状态报告
//!
//! 只读：查询 provisioner 资源列表、解析地址、单次探测远程 shell，不写任何文件。

use serde::Serialize;
use std::path::PathBuf;

use tracing::{debug, warn};

use ctf_cluster::{ClusterKind, ClusterLayout};
use ctf_common::{Reachability, VmRecord, VmRole};

use crate::error::Result;
use crate::suite::Suite;

/// 单台虚拟机状态
#[derive(Debug, Clone, Serialize)]
pub struct VmStatus {
    pub name: String,
    pub role: VmRole,
    /// provisioner 列表中是否存在（列表不可用时为 None）
    pub present: Option<bool>,
    pub address: Option<String>,
    pub reachability: Reachability,
}

/// 集群状态
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub cluster: String,
    pub kind: ClusterKind,
    pub config: PathBuf,
    /// provisioner 列表查询失败的原因
    pub provisioner_error: Option<String>,
    pub vms: Vec<VmStatus>,
}

impl StatusReport {
    pub(crate) async fn collect(suite: &Suite) -> Result<Self> {
        let descriptor = &suite.descriptor;
        let layout = ClusterLayout::load(&descriptor.config_path, &descriptor.cluster_name)?;

        let (resources, provisioner_error) = match suite.provisioner.list_resources().await {
            Ok(resources) => (Some(resources), None),
            Err(e) => {
                warn!("查询 provisioner 资源失败: {}", e);
                (None, Some(e.to_string()))
            }
        };

        let discovery = suite.discovery();
        let mut vms = Vec::new();
        for node in layout.nodes.iter().filter(|n| descriptor.targets(&n.name)) {
            let present = resources.as_ref().map(|r| r.contains(&node.name));
            let address = match &node.address {
                Some(address) => Some(address.clone()),
                None if present != Some(false) => suite.provisioner.lookup_address(&node.name).await,
                None => None,
            };

            let reachability = match &address {
                Some(address) => {
                    let record = VmRecord::new(&node.name, node.role.clone(), suite.credentials.clone())
                        .with_address(address);
                    discovery.probe_once(&record).await
                }
                None => Reachability::Unknown,
            };
            debug!("{}: present={:?} address={:?} {}", node.name, present, address, reachability);

            vms.push(VmStatus {
                name: node.name.clone(),
                role: node.role.clone(),
                present,
                address,
                reachability,
            });
        }

        Ok(Self {
            cluster: layout.name,
            kind: layout.kind,
            config: descriptor.config_path.clone(),
            provisioner_error,
            vms,
        })
    }

    /// 所有虚拟机都在运行且可达
    pub fn is_healthy(&self) -> bool {
        !self.vms.is_empty()
            && self
                .vms
                .iter()
                .all(|vm| vm.present != Some(false) && vm.reachability == Reachability::Reachable)
    }
}
