//! CTF 集群生命周期
//!
//! - [`LifecycleManager`]: 通过外部 provisioner 启动 / 停止 / 销毁集群，销毁后验证无残留
//! - [`CleanupController`]: 清理义务状态机与 RAII guard，失败时生成手动恢复手册
//! - [`ConfigurationRunner`]: 配置管理交接（inventory 生成 + ansible-playbook）

pub mod cleanup;
pub mod configure;
pub mod error;
pub mod manager;
pub mod process;
pub mod provisioner;

pub use cleanup::{
    CleanupController, CleanupGuard, CleanupMode, CleanupOutcome, CleanupState, ConfirmPrompt,
    FixedAnswer, Runbook, StdinPrompt,
};
pub use configure::{
    parse_play_recap, AnsibleRunner, ConfigurationReport, ConfigurationRunner, HostRecap, Inventory,
};
pub use error::{LifecycleError, Result};
pub use manager::{ClusterHandle, LifecycleManager};
pub use process::ProcessOutput;
pub use provisioner::{CommandProvisioner, Provisioner, ProvisionerAddresses, ProvisionerTemplates};
