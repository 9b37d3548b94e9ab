//! 命令执行入口：加载配置、构建套件、初始化日志、分发命令

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ctf_orchestrator::{spawn_interrupt_listener, Command, ExitCode, Options};

use crate::commands::output;
use crate::config::{CliConfig, SuiteOverrides};
use crate::logging;

/// 一次 CLI 调用
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: Command,
    pub options: Options,
    pub overrides: SuiteOverrides,
    pub settings: Option<PathBuf>,
    pub log_level: String,
}

pub async fn execute(invocation: Invocation) -> Result<ExitCode> {
    let Invocation {
        command,
        options,
        overrides,
        settings,
        log_level,
    } = invocation;

    let level = logging::default_level(options.verbose, &log_level)?;
    let (config, config_path) = CliConfig::load(settings.as_deref())?;
    let resolved = config.resolve(&overrides)?;

    let cancel = CancellationToken::new();
    let suite = config
        .builder(&resolved)?
        .cancellation(cancel.clone())
        .build()
        .context("构建测试套件失败")?;

    let ctx = if command.needs_run_dir() {
        Some(suite.create_run_context().context("创建运行目录失败")?)
    } else {
        None
    };
    let framework_log = ctx.as_ref().map(|ctx| ctx.framework_log());
    logging::init(level, framework_log.as_deref())?;

    match &config_path {
        Some(path) => debug!("框架配置: {}", path.display()),
        None => debug!("未找到框架配置文件，使用默认值"),
    }
    info!(
        "套件 {} 执行 {} (集群 {} @ {})",
        suite.name(),
        command,
        suite.descriptor().cluster_name,
        suite.descriptor().config_path.display()
    );
    if options.no_cleanup {
        info!("已启用 --no-cleanup，退出时将询问是否销毁集群");
    }

    let listener = spawn_interrupt_listener(cancel.clone());

    let spinner = matches!(command, Command::Status).then(|| {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(format!("查询集群状态: {}", suite.descriptor().cluster_name));
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    });

    let outcome = suite.dispatch(command, &options, ctx).await;

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    listener.abort();

    output::render(&outcome);
    if cancel.is_cancelled() && outcome.exit_code != ExitCode::Interrupted {
        println!("{}", "收到中断信号，运行已终止".yellow());
    }

    Ok(outcome.exit_code)
}
