//! 集群描述符

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::pattern::matches_pattern;

/// 集群描述符
///
/// 标识一次测试运行所针对的集群实例，在整个运行期间不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    /// 集群配置文档路径
    pub config_path: PathBuf,

    /// 逻辑集群名称（例如 "hpc"、"cloud"）
    pub cluster_name: String,

    /// 目标虚拟机过滤（名称或模式）
    pub target_vm: Option<String>,
}

impl ClusterDescriptor {
    pub fn new(config_path: impl Into<PathBuf>, cluster_name: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
            cluster_name: cluster_name.into(),
            target_vm: None,
        }
    }

    /// 设置目标虚拟机过滤
    pub fn with_target_vm(mut self, target_vm: impl Into<String>) -> Self {
        self.target_vm = Some(target_vm.into());
        self
    }

    /// 检查虚拟机是否被目标过滤选中（未设置过滤时选中全部）
    pub fn targets(&self, vm_name: &str) -> bool {
        match &self.target_vm {
            Some(pattern) => matches_pattern(vm_name, pattern),
            None => true,
        }
    }
}
