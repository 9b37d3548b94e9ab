//! CTF 集群连接配置
//!
//! 将集群描述符解析为可寻址的虚拟机记录，并在交付给执行引擎之前
//! 确认每台虚拟机的远程 shell 已就绪。
//!
//! - [`ClusterLayout`]: 集群配置文档解析（虚拟机命名、角色、静态地址）
//! - [`Discovery`]: 地址解析与固定间隔就绪轮询
//! - [`ConnectionInfo`]: 连接信息快照（文本 + JSON）

pub mod config;
pub mod discovery;
pub mod error;
pub mod snapshot;

pub use config::{ClusterKind, ClusterLayout, NodeSpec};
pub use discovery::{ssh_config_for, AddressResolver, Discovery, ReadinessPolicy, StaticAddresses};
pub use error::{ClusterError, Result};
pub use snapshot::ConnectionInfo;
