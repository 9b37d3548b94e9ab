//! 虚拟机发现与就绪轮询
//!
//! - `resolve`: 从集群配置文档解析虚拟机名称与地址（DHCP 节点向 provisioner 查询）
//! - `wait_reachable`: 固定间隔轮询，直到远程 shell 可用或到达截止时间
//! - `discover`: 解析 + 并发等待 + 写入连接信息快照

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ctf_common::{ClusterDescriptor, Reachability, RunContext, SshCredentials, VmRecord};
use ctf_ssh_executor::{RemoteShell, SshClient, SshConfig};

use crate::config::ClusterLayout;
use crate::error::{ClusterError, Result};
use crate::snapshot::ConnectionInfo;

/// 地址解析接口（用于配置中未声明静态地址的节点）
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn lookup_address(&self, vm_name: &str) -> Option<String>;
}

/// 不做任何解析
pub struct StaticAddresses;

#[async_trait]
impl AddressResolver for StaticAddresses {
    async fn lookup_address(&self, _vm_name: &str) -> Option<String> {
        None
    }
}

/// 就绪轮询策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessPolicy {
    /// 轮询间隔
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,

    /// 总超时
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// 单次探测的 SSH 连接超时
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl ReadinessPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            connect_timeout: default_connect_timeout(),
        }
    }

    /// 最大尝试次数 = 超时 / 间隔（至少 1 次）
    pub fn max_attempts(&self) -> u32 {
        let interval = self.interval.as_millis().max(1);
        ((self.timeout.as_millis() / interval) as u32).max(1)
    }
}

/// 由虚拟机记录构造 SSH 配置（记录必须已有地址）
pub fn ssh_config_for(record: &VmRecord, connect_timeout: Duration) -> Result<SshConfig> {
    let address = record.address.clone().ok_or_else(|| ClusterError::AddressNotFound {
        vm: record.name.clone(),
        reason: "虚拟机没有已解析的地址".to_string(),
    })?;

    let creds = &record.credentials;
    let config = if let Some(password) = &creds.password {
        SshConfig::with_password(address, &creds.user, password)
    } else if let Some(key) = &creds.key_path {
        SshConfig::with_key(address, &creds.user, key)
    } else {
        SshConfig::with_default_key(address, &creds.user)
    };
    Ok(config.port(creds.port).connect_timeout(connect_timeout))
}

/// 虚拟机发现器
#[derive(Clone)]
pub struct Discovery {
    shell: Arc<dyn RemoteShell>,
    credentials: SshCredentials,
    policy: ReadinessPolicy,
    max_parallel: usize,
    cancel: CancellationToken,
}

impl Discovery {
    pub fn new(shell: Arc<dyn RemoteShell>, credentials: SshCredentials) -> Self {
        Self {
            shell,
            credentials,
            policy: ReadinessPolicy::default(),
            max_parallel: 4,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: ReadinessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 设置并发轮询的最大节点数
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &ReadinessPolicy {
        &self.policy
    }

    /// 解析集群描述符对应的虚拟机记录
    ///
    /// 目标过滤不匹配任何节点、或节点地址无法解析时快速失败（不可重试）。
    pub async fn resolve(
        &self,
        descriptor: &ClusterDescriptor,
        resolver: &dyn AddressResolver,
    ) -> Result<Vec<VmRecord>> {
        let layout = ClusterLayout::load(&descriptor.config_path, &descriptor.cluster_name)?;

        let selected: Vec<_> = layout
            .nodes
            .iter()
            .filter(|n| descriptor.targets(&n.name))
            .collect();

        if selected.is_empty() {
            return Err(ClusterError::AddressNotFound {
                vm: descriptor.target_vm.clone().unwrap_or_else(|| layout.name.clone()),
                reason: format!(
                    "集群配置 {} 中没有匹配的虚拟机 (已声明: {})",
                    descriptor.config_path.display(),
                    layout.vm_names().join(", ")
                ),
            });
        }

        let mut records = Vec::with_capacity(selected.len());
        for node in selected {
            let address = match &node.address {
                Some(address) => Some(address.clone()),
                None => resolver.lookup_address(&node.name).await,
            };

            let address = address.ok_or_else(|| ClusterError::AddressNotFound {
                vm: node.name.clone(),
                reason: "配置中未声明静态地址 (dhcp)，provisioner 也未报告地址".to_string(),
            })?;

            debug!("解析虚拟机 {} -> {}", node.name, address);
            let mut record = VmRecord::new(&node.name, node.role.clone(), self.credentials.clone())
                .with_address(address);
            record.gpu = node.gpu;
            records.push(record);
        }

        info!(
            "解析到 {} 台虚拟机: {}",
            records.len(),
            records.iter().map(|r| r.name.as_str()).collect::<Vec<_>>().join(", ")
        );
        Ok(records)
    }

    /// 单次探测（无副作用，用于 status）
    pub async fn probe_once(&self, record: &VmRecord) -> Reachability {
        let Ok(config) = ssh_config_for(record, self.policy.connect_timeout) else {
            return Reachability::Unknown;
        };
        let client = SshClient::with_shell(config, Arc::clone(&self.shell));
        match client.probe().await {
            Ok(()) => Reachability::Reachable,
            Err(e) => {
                debug!("探测 {} 失败: {}", record.name, e);
                Reachability::Unreachable
            }
        }
    }

    /// 固定间隔轮询直到远程 shell 可用
    ///
    /// 尝试次数上限 = 超时 / 间隔，每次失败后等待一个间隔。
    /// 截止时间 = 开始时间 + 超时，单次探测与间隔等待都不会越过截止时间。
    pub async fn wait_reachable(&self, record: &mut VmRecord) -> Result<()> {
        let config = ssh_config_for(record, self.policy.connect_timeout)?;
        let client = SshClient::with_shell(config, Arc::clone(&self.shell));
        let max_attempts = self.policy.max_attempts();
        let address = record.address.clone().unwrap_or_default();
        let start = Instant::now();
        let deadline = start + self.policy.timeout;

        record.transition(Reachability::Waiting);
        info!(
            "等待 {} ({}) 可达 (间隔 {:?}, 超时 {:?})",
            record.name, address, self.policy.interval, self.policy.timeout
        );

        let mut attempts = 0;
        let mut last_error = String::new();
        while attempts < max_attempts {
            if self.cancel.is_cancelled() {
                return Err(ClusterError::Cancelled);
            }
            attempts += 1;

            let probe = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ClusterError::Cancelled),
                probe = tokio::time::timeout_at(deadline, client.probe()) => probe,
            };

            match probe {
                Ok(Ok(())) => {
                    record.transition(Reachability::Reachable);
                    info!(
                        "{} ({}) 已就绪 (第 {} 次尝试, 耗时 {:?})",
                        record.name,
                        address,
                        attempts,
                        start.elapsed()
                    );
                    return Ok(());
                }
                Ok(Err(e)) => {
                    debug!("{} 第 {}/{} 次探测失败: {}", record.name, attempts, max_attempts, e);
                    last_error = e.to_string();
                }
                Err(_) => {
                    debug!("{} 第 {} 次探测在截止时间前未完成", record.name, attempts);
                    last_error = format!("探测超过截止时间 ({:?})", self.policy.timeout);
                    break;
                }
            }

            let wake = (Instant::now() + self.policy.interval).min(deadline);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ClusterError::Cancelled),
                _ = tokio::time::sleep_until(wake) => {}
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        record.transition(Reachability::Unreachable);
        warn!("{} ({}) 在 {} 次尝试后仍不可达", record.name, address, attempts);
        Err(ClusterError::ReadinessTimeout {
            vm: record.name.clone(),
            address,
            attempts,
            elapsed: start.elapsed(),
            last_error,
        })
    }

    /// 并发等待所有虚拟机可达（受 max_parallel 限制）
    ///
    /// 所有节点都轮询结束后才返回；任一节点失败则返回第一个失败节点的错误。
    pub async fn wait_all(&self, records: Vec<VmRecord>) -> Result<Vec<VmRecord>> {
        let pool = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();

        for (index, mut record) in records.into_iter().enumerate() {
            let discovery = self.clone();
            let pool = Arc::clone(&pool);
            tasks.spawn(async move {
                let result = match pool.acquire_owned().await {
                    Ok(_permit) => discovery.wait_reachable(&mut record).await,
                    Err(_) => Err(ClusterError::Cancelled),
                };
                (index, record, result)
            });
        }

        let mut finished = Vec::new();
        let mut first_error: Option<(usize, ClusterError)> = None;
        while let Some(joined) = tasks.join_next().await {
            let (index, record, result) = joined.map_err(|e| {
                ClusterError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            })?;
            if let Err(e) = result {
                if first_error.as_ref().map_or(true, |(i, _)| index < *i) {
                    first_error = Some((index, e));
                }
            }
            finished.push((index, record));
        }

        if let Some((_, e)) = first_error {
            return Err(e);
        }

        finished.sort_by_key(|(index, _)| *index);
        Ok(finished.into_iter().map(|(_, r)| r).collect())
    }

    /// 完整发现流程：解析 → 等待就绪 → 写入连接信息快照
    pub async fn discover(
        &self,
        descriptor: &ClusterDescriptor,
        resolver: &dyn AddressResolver,
        ctx: &RunContext,
    ) -> Result<Vec<VmRecord>> {
        let records = self.resolve(descriptor, resolver).await?;
        let records = self.wait_all(records).await?;

        let snapshot = ConnectionInfo::new(&descriptor.cluster_name, records.clone());
        let written: Vec<PathBuf> = snapshot.write(ctx)?;
        info!("连接信息已写入: {:?}", written);
        Ok(records)
    }
}
