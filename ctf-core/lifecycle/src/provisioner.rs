//! 外部 provisioner 接口
//!
//! provisioner 负责把声明式集群配置变成运行中的虚拟机，
//! 本 crate 只在命令边界上与它交互（启动 / 停止 / 销毁 / 列举 / 地址查询）。

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ctf_cluster::{AddressResolver, ClusterKind};
use ctf_ssh_executor::shell_quote;
use tracing::{debug, warn};

use crate::error::{LifecycleError, Result};
use crate::process::{run_shell, ProcessOutput};

/// provisioner 操作接口
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// 启动集群
    async fn start(&self, config: &Path, kind: ClusterKind) -> Result<ProcessOutput>;

    /// 停止集群（保留虚拟机定义）
    async fn stop(&self, config: &Path, kind: ClusterKind) -> Result<ProcessOutput>;

    /// 销毁集群
    async fn destroy(&self, config: &Path, kind: ClusterKind, force: bool) -> Result<ProcessOutput>;

    /// 列举底层资源名称
    async fn list_resources(&self) -> Result<Vec<String>>;

    /// 查询虚拟机地址
    async fn lookup_address(&self, vm_name: &str) -> Option<String>;

    /// 手动销毁整个集群的命令
    fn destroy_command(&self, config: &Path, kind: ClusterKind) -> String;

    /// 手动移除单个资源的命令
    fn removal_commands(&self, resource: &str) -> Vec<String>;

    /// 确认环境已清理的验证命令（`cluster_name` 为配置中的集群名称，即资源前缀）
    fn verify_command(&self, cluster_name: &str) -> String;
}

/// provisioner 命令模板
///
/// 占位符：`{kind}` (hpc/cloud)、`{config}`、`{vm}`、`{force}`、`{cluster}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerTemplates {
    pub start: String,
    pub stop: String,
    pub destroy: String,
    pub list: String,
    pub address: String,
    pub remove: Vec<String>,
    pub verify: String,

    /// 单次 provisioner 调用的超时
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ProvisionerTemplates {
    fn default() -> Self {
        Self {
            start: "ai-how {kind} start {config}".to_string(),
            stop: "ai-how {kind} stop {config}".to_string(),
            destroy: "ai-how {kind} destroy {config} {force}".to_string(),
            list: "virsh list --all --name".to_string(),
            address: "virsh domifaddr {vm}".to_string(),
            remove: vec![
                "virsh destroy {vm}".to_string(),
                "virsh undefine {vm} --remove-all-storage".to_string(),
            ],
            verify: "virsh list --all --name | grep '^{cluster}-'".to_string(),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// 模板渲染上下文
#[derive(Debug, Default)]
struct Placeholders<'a> {
    kind: Option<ClusterKind>,
    config: Option<&'a Path>,
    vm: Option<&'a str>,
    cluster: Option<&'a str>,
    force: bool,
}

impl Placeholders<'_> {
    fn render(&self, template: &str) -> String {
        let mut out = template.to_string();
        if let Some(kind) = self.kind {
            out = out.replace("{kind}", &kind.to_string());
        }
        if let Some(config) = self.config {
            out = out.replace("{config}", &shell_quote(&config.display().to_string()));
        }
        if let Some(vm) = self.vm {
            out = out.replace("{vm}", &shell_quote(vm));
        }
        if let Some(cluster) = self.cluster {
            out = out.replace("{cluster}", cluster);
        }
        out = out.replace("{force}", if self.force { "--force" } else { "" });
        out.trim().to_string()
    }
}

/// 基于命令模板的 provisioner（默认对接 ai-how + virsh）
#[derive(Debug, Clone, Default)]
pub struct CommandProvisioner {
    templates: ProvisionerTemplates,
}

impl CommandProvisioner {
    pub fn new(templates: ProvisionerTemplates) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &ProvisionerTemplates {
        &self.templates
    }

    async fn run(&self, command: String) -> Result<ProcessOutput> {
        run_shell(&command, self.templates.timeout).await
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn start(&self, config: &Path, kind: ClusterKind) -> Result<ProcessOutput> {
        let ctx = Placeholders {
            kind: Some(kind),
            config: Some(config),
            ..Default::default()
        };
        self.run(ctx.render(&self.templates.start)).await
    }

    async fn stop(&self, config: &Path, kind: ClusterKind) -> Result<ProcessOutput> {
        let ctx = Placeholders {
            kind: Some(kind),
            config: Some(config),
            ..Default::default()
        };
        self.run(ctx.render(&self.templates.stop)).await
    }

    async fn destroy(&self, config: &Path, kind: ClusterKind, force: bool) -> Result<ProcessOutput> {
        let ctx = Placeholders {
            kind: Some(kind),
            config: Some(config),
            force,
            ..Default::default()
        };
        self.run(ctx.render(&self.templates.destroy)).await
    }

    async fn list_resources(&self) -> Result<Vec<String>> {
        let output = self.run(self.templates.list.clone()).await?;
        if !output.is_success() {
            return Err(LifecycleError::CommandFailed {
                command: output.command,
                exit_code: output.exit_code,
                output: output.output,
            });
        }
        Ok(parse_resource_list(&output.output))
    }

    async fn lookup_address(&self, vm_name: &str) -> Option<String> {
        let ctx = Placeholders {
            vm: Some(vm_name),
            ..Default::default()
        };
        let command = ctx.render(&self.templates.address);
        match run_shell(&command, Duration::from_secs(30)).await {
            Ok(output) if output.is_success() => {
                let address = parse_ipv4_address(&output.output);
                debug!("地址查询 {} -> {:?}", vm_name, address);
                address
            }
            Ok(output) => {
                debug!("地址查询失败 {}: {}", vm_name, output.output);
                None
            }
            Err(e) => {
                warn!("地址查询命令执行失败 {}: {}", vm_name, e);
                None
            }
        }
    }

    fn destroy_command(&self, config: &Path, kind: ClusterKind) -> String {
        Placeholders {
            kind: Some(kind),
            config: Some(config),
            force: true,
            ..Default::default()
        }
        .render(&self.templates.destroy)
    }

    fn removal_commands(&self, resource: &str) -> Vec<String> {
        let ctx = Placeholders {
            vm: Some(resource),
            ..Default::default()
        };
        self.templates.remove.iter().map(|t| ctx.render(t)).collect()
    }

    fn verify_command(&self, cluster_name: &str) -> String {
        Placeholders {
            cluster: Some(cluster_name),
            ..Default::default()
        }
        .render(&self.templates.verify)
    }
}

/// 将 provisioner 的地址查询适配为发现阶段的地址解析器
pub struct ProvisionerAddresses(pub Arc<dyn Provisioner>);

#[async_trait]
impl AddressResolver for ProvisionerAddresses {
    async fn lookup_address(&self, vm_name: &str) -> Option<String> {
        self.0.lookup_address(vm_name).await
    }
}

/// 解析资源列表（每行一个名称，忽略空行）
pub fn parse_resource_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// 从 `virsh domifaddr` 风格的输出中提取第一个 IPv4 地址
pub fn parse_ipv4_address(output: &str) -> Option<String> {
    let re = Regex::new(r"ipv4\s+(\d{1,3}(?:\.\d{1,3}){3})(?:/\d+)?").ok()?;
    re.captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
