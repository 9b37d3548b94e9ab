//! 框架配置
//!
//! **数据存储方式**: TOML 文件，查找顺序：
//! `--settings` > `CTF_CONFIG` > `./ctf.toml` > `~/.config/ctf/config.toml`，都不存在时使用默认值。
//!
//! 每个具体测试套件只是 `[suites.<name>]` 下的一组数据：集群配置、脚本目录、目标虚拟机、playbook。

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ctf_cluster::ReadinessPolicy;
use ctf_common::SshCredentials;
use ctf_lifecycle::{AnsibleRunner, CommandProvisioner, ProvisionerTemplates};
use ctf_orchestrator::{ExecutionMode, SuiteBuilder};

const DEFAULT_SUITE: &str = "default";
const DEFAULT_CLUSTER: &str = "hpc";

/// CLI 配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// 运行日志根目录
    pub log_root: Option<String>,

    /// 未指定 --suite 时使用的套件
    pub default_suite: Option<String>,

    /// 默认远程 shell 凭据
    pub ssh: SshCredentials,

    /// 就绪轮询策略
    pub readiness: ReadinessPolicy,

    pub execution: ExecutionSettings,

    /// provisioner 命令模板
    pub provisioner: ProvisionerTemplates,

    /// 配置管理执行器
    pub ansible: AnsibleRunner,

    /// 套件注册表
    pub suites: BTreeMap<String, SuiteEntry>,
}

/// 测试执行参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    #[serde(with = "humantime_serde")]
    pub script_timeout: Duration,
    pub remote_root: String,
    pub max_parallel: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            script_timeout: Duration::from_secs(600),
            remote_root: "/tmp/ctf-tests".to_string(),
            max_parallel: 4,
        }
    }
}

/// 套件注册项
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SuiteEntry {
    pub config: Option<String>,
    pub cluster: Option<String>,
    pub scripts_dir: Option<String>,
    pub target_vm: Option<String>,
    pub playbook: Option<String>,
    pub mode: Option<ExecutionMode>,
}

/// 命令行上与套件相关的覆盖项
#[derive(Debug, Clone, Default)]
pub struct SuiteOverrides {
    pub suite: Option<String>,
    pub config: Option<String>,
    pub cluster: Option<String>,
    pub scripts_dir: Option<String>,
    pub target_vm: Option<String>,
    pub playbook: Option<String>,
    pub local: bool,
}

/// 合并配置文件与命令行后的套件参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSuite {
    pub name: String,
    pub config: PathBuf,
    pub cluster: String,
    pub scripts_dir: PathBuf,
    pub target_vm: Option<String>,
    pub playbook: Option<PathBuf>,
    pub mode: ExecutionMode,
}

impl CliConfig {
    /// 按查找顺序定位配置文件
    pub fn locate(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        Self::locate_with(explicit, |key| std::env::var(key).ok())
    }

    fn locate_with(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.is_file() {
                bail!("配置文件不存在: {}", path.display());
            }
            return Ok(Some(path.to_path_buf()));
        }

        if let Some(value) = env("CTF_CONFIG").filter(|v| !v.is_empty()) {
            let path = expand_path(&value)?;
            if !path.is_file() {
                bail!("CTF_CONFIG 指向的配置文件不存在: {}", path.display());
            }
            return Ok(Some(path));
        }

        let local = PathBuf::from("ctf.toml");
        if local.is_file() {
            return Ok(Some(local));
        }

        Ok(dirs::config_dir()
            .map(|dir| dir.join("ctf").join("config.toml"))
            .filter(|path| path.is_file()))
    }

    /// 加载配置并应用环境变量覆盖
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = Self::locate(explicit)?;
        let mut config = match &path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok((config, path))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("解析配置文件失败: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// CTF_LOG_ROOT / CTF_SSH_USER / CTF_SSH_KEY
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(root) = env("CTF_LOG_ROOT").filter(|v| !v.is_empty()) {
            self.log_root = Some(root);
        }
        if let Some(user) = env("CTF_SSH_USER").filter(|v| !v.is_empty()) {
            self.ssh.user = user;
        }
        if let Some(key) = env("CTF_SSH_KEY").filter(|v| !v.is_empty()) {
            self.ssh.key_path = Some(PathBuf::from(key));
        }
    }

    pub fn log_root(&self) -> Result<PathBuf> {
        expand_path(self.log_root.as_deref().unwrap_or("logs"))
    }

    /// 合并套件注册项与命令行覆盖项
    pub fn resolve(&self, overrides: &SuiteOverrides) -> Result<ResolvedSuite> {
        let name = overrides
            .suite
            .clone()
            .or_else(|| self.default_suite.clone())
            .unwrap_or_else(|| DEFAULT_SUITE.to_string());

        let entry = match self.suites.get(&name) {
            Some(entry) => entry.clone(),
            None if overrides.suite.is_some() => {
                let known: Vec<&str> = self.suites.keys().map(String::as_str).collect();
                bail!("未知的测试套件: {} (已注册: {})", name, known.join(", "));
            }
            None => SuiteEntry::default(),
        };

        let config = overrides
            .config
            .as_deref()
            .or(entry.config.as_deref())
            .with_context(|| format!("套件 {} 未指定集群配置，请使用 --config 或在 [suites.{}] 中设置 config", name, name))?;
        let scripts_dir = overrides
            .scripts_dir
            .as_deref()
            .or(entry.scripts_dir.as_deref())
            .with_context(|| format!("套件 {} 未指定脚本目录，请使用 --scripts-dir 或在 [suites.{}] 中设置 scripts_dir", name, name))?;
        let playbook = overrides
            .playbook
            .as_deref()
            .or(entry.playbook.as_deref())
            .map(expand_path)
            .transpose()?;

        let mode = if overrides.local {
            ExecutionMode::Local
        } else {
            entry.mode.unwrap_or_default()
        };

        Ok(ResolvedSuite {
            config: expand_path(config)?,
            cluster: overrides
                .cluster
                .clone()
                .or(entry.cluster)
                .unwrap_or_else(|| DEFAULT_CLUSTER.to_string()),
            scripts_dir: expand_path(scripts_dir)?,
            target_vm: overrides.target_vm.clone().or(entry.target_vm),
            playbook,
            mode,
            name,
        })
    }

    /// 构建套件（provisioner、凭据、超时均取自配置）
    pub fn builder(&self, suite: &ResolvedSuite) -> Result<SuiteBuilder> {
        let mut credentials = self.ssh.clone();
        if let Some(key) = credentials.key_path.take() {
            credentials.key_path = Some(expand_path(&key.to_string_lossy())?);
        }

        let mut builder = SuiteBuilder::new(&suite.name, &suite.config, &suite.cluster)
            .scripts_dir(&suite.scripts_dir)
            .credentials(credentials)
            .readiness(self.readiness)
            .script_timeout(self.execution.script_timeout)
            .remote_root(&self.execution.remote_root)
            .max_parallel(self.execution.max_parallel)
            .log_root(self.log_root()?)
            .execution_mode(suite.mode)
            .provisioner(Arc::new(CommandProvisioner::new(self.provisioner.clone())))
            .configuration_runner(Arc::new(self.ansible.clone()));

        if let Some(target) = &suite.target_vm {
            builder = builder.target_vm(target);
        }
        if let Some(playbook) = &suite.playbook {
            builder = builder.playbook(playbook);
        }
        Ok(builder)
    }
}

/// 展开 `~` 与 `$VAR`
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw).with_context(|| format!("无法展开路径: {}", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
log_root = "/var/log/ctf"
default_suite = "gpu"

[ssh]
user = "ubuntu"
key_path = "/keys/id_ed25519"

[readiness]
interval = "2s"
timeout = "1m"

[execution]
script_timeout = "15m"
max_parallel = 8

[provisioner]
list = "virsh list --name"

[ansible]
extra_args = ["-v"]

[suites.gpu]
config = "/clusters/gpu.yaml"
scripts_dir = "/suites/gpu"
target_vm = "hpc-compute-*"
playbook = "/playbooks/site.yml"

[suites.monitoring]
config = "/clusters/cloud.yaml"
cluster = "cloud"
scripts_dir = "/suites/monitoring"
mode = "local"
"#;

    #[test]
    fn test_parse_sample() {
        let config = CliConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.ssh.user, "ubuntu");
        assert_eq!(config.ssh.port, 22);
        assert_eq!(config.readiness.interval, Duration::from_secs(2));
        assert_eq!(config.readiness.timeout, Duration::from_secs(60));
        assert_eq!(config.readiness.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.execution.script_timeout, Duration::from_secs(15 * 60));
        assert_eq!(config.execution.max_parallel, 8);
        assert_eq!(config.execution.remote_root, "/tmp/ctf-tests");
        assert_eq!(config.provisioner.list, "virsh list --name");
        assert_eq!(config.provisioner.start, ProvisionerTemplates::default().start);
        assert_eq!(config.ansible.extra_args, vec!["-v".to_string()]);
        assert_eq!(config.ansible.program, "ansible-playbook");
        assert_eq!(config.suites.len(), 2);
        assert_eq!(config.suites["monitoring"].mode, Some(ExecutionMode::Local));
    }

    #[test]
    fn test_demo_config_parses() {
        let config = CliConfig::parse(include_str!("../../../demos/ctf.toml")).unwrap();
        let suite = config.resolve(&SuiteOverrides::default()).unwrap();
        assert_eq!(suite.name, "gpu");
        assert_eq!(suite.scripts_dir, PathBuf::from("demos/gpu-suite"));
        assert_eq!(config.provisioner.timeout, Duration::from_secs(30 * 60));
        assert_eq!(config.provisioner.list, ProvisionerTemplates::default().list);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CliConfig::parse("").unwrap();
        assert_eq!(config.ssh, SshCredentials::default());
        assert_eq!(config.readiness, ReadinessPolicy::default());
        assert_eq!(config.execution.max_parallel, 4);
        assert!(config.suites.is_empty());
        assert_eq!(config.log_root().unwrap(), PathBuf::from("logs"));
    }

    #[test]
    fn test_resolve_default_suite_from_registry() {
        let config = CliConfig::parse(SAMPLE).unwrap();
        let suite = config.resolve(&SuiteOverrides::default()).unwrap();
        assert_eq!(suite.name, "gpu");
        assert_eq!(suite.config, PathBuf::from("/clusters/gpu.yaml"));
        assert_eq!(suite.cluster, "hpc");
        assert_eq!(suite.target_vm.as_deref(), Some("hpc-compute-*"));
        assert_eq!(suite.playbook, Some(PathBuf::from("/playbooks/site.yml")));
        assert_eq!(suite.mode, ExecutionMode::Remote);
    }

    #[test]
    fn test_command_line_overrides_registry() {
        let config = CliConfig::parse(SAMPLE).unwrap();
        let overrides = SuiteOverrides {
            suite: Some("monitoring".to_string()),
            config: Some("/tmp/other.yaml".to_string()),
            target_vm: Some("cloud-control-plane".to_string()),
            ..Default::default()
        };
        let suite = config.resolve(&overrides).unwrap();
        assert_eq!(suite.config, PathBuf::from("/tmp/other.yaml"));
        assert_eq!(suite.cluster, "cloud");
        assert_eq!(suite.scripts_dir, PathBuf::from("/suites/monitoring"));
        assert_eq!(suite.target_vm.as_deref(), Some("cloud-control-plane"));
        assert_eq!(suite.playbook, None);
        assert_eq!(suite.mode, ExecutionMode::Local);
    }

    #[test]
    fn test_unknown_suite_rejected() {
        let config = CliConfig::parse(SAMPLE).unwrap();
        let overrides = SuiteOverrides {
            suite: Some("storage".to_string()),
            ..Default::default()
        };
        let err = config.resolve(&overrides).unwrap_err();
        assert!(err.to_string().contains("storage"));
    }

    #[test]
    fn test_missing_cluster_config_rejected() {
        let config = CliConfig::default();
        let overrides = SuiteOverrides {
            scripts_dir: Some("/suites/gpu".to_string()),
            ..Default::default()
        };
        let err = config.resolve(&overrides).unwrap_err();
        assert!(err.to_string().contains("--config"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CliConfig::parse(SAMPLE).unwrap();
        config.apply_env(|key| match key {
            "CTF_LOG_ROOT" => Some("/srv/ctf-logs".to_string()),
            "CTF_SSH_USER" => Some("rocky".to_string()),
            "CTF_SSH_KEY" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.log_root().unwrap(), PathBuf::from("/srv/ctf-logs"));
        assert_eq!(config.ssh.user, "rocky");
        assert_eq!(config.ssh.key_path, Some(PathBuf::from("/keys/id_ed25519")));
    }

    #[test]
    fn test_locate_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.toml");
        let from_env = dir.path().join("env.toml");
        fs::write(&explicit, "").unwrap();
        fs::write(&from_env, "").unwrap();

        let env_value = from_env.display().to_string();
        let env = |key: &str| (key == "CTF_CONFIG").then(|| env_value.clone());

        let found = CliConfig::locate_with(Some(&explicit), env).unwrap();
        assert_eq!(found, Some(explicit.clone()));

        let found = CliConfig::locate_with(None, env).unwrap();
        assert_eq!(found, Some(from_env));

        let missing = dir.path().join("missing.toml");
        assert!(CliConfig::locate_with(Some(&missing), |_| None).is_err());
    }
}
