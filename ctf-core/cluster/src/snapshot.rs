//! 连接信息快照
//!
//! 发现完成后写入运行目录，供人工登录排查使用。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use ctf_common::{RunContext, VmRecord};

use crate::error::{ClusterError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub cluster: String,
    pub generated_at: DateTime<Utc>,
    pub vms: Vec<VmRecord>,
}

impl ConnectionInfo {
    pub fn new(cluster: impl Into<String>, vms: Vec<VmRecord>) -> Self {
        Self {
            cluster: cluster.into(),
            generated_at: Utc::now(),
            vms,
        }
    }

    /// 人类可读格式
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "集群: {}", self.cluster);
        let _ = writeln!(out, "生成时间: {}", self.generated_at.to_rfc3339());
        let _ = writeln!(out);

        for vm in &self.vms {
            let _ = writeln!(
                out,
                "{} [{}{}]",
                vm.name,
                vm.role,
                if vm.gpu { ", gpu" } else { "" }
            );
            let _ = writeln!(out, "  地址: {}", vm.address.as_deref().unwrap_or("-"));
            let _ = writeln!(out, "  状态: {}", vm.state);
            if let Some(command) = vm.ssh_command() {
                let _ = writeln!(out, "  登录: {}", command);
            }
            let _ = writeln!(out);
        }
        out
    }

    /// 写入 connection-info.txt 与 connection-info.json
    pub fn write(&self, ctx: &RunContext) -> Result<Vec<PathBuf>> {
        let text_path = ctx.connection_info_text();
        let json_path = ctx.connection_info_json();

        fs::write(&text_path, self.to_text())?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ClusterError::SerdeError(e.to_string()))?;
        fs::write(&json_path, json)?;

        Ok(vec![text_path, json_path])
    }
}
