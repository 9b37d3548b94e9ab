//! 运行目录布局
//!
//! 每次运行在日志根目录下创建一个带时间戳的目录：
//!
//! ```text
//! <log_root>/<suite>-<run_id>/
//!     framework.log
//!     lifecycle/<operation>.log
//!     tests/<target>/<script>.log
//!     connection-info.txt / connection-info.json
//!     inventory.yaml
//!     configuration.json
//!     summary.txt / summary.json
//!     MANUAL_CLEANUP.md
//! ```

use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 单次运行的目录上下文（进程是唯一写入者）
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    suite: String,
    root: PathBuf,
}

impl RunContext {
    /// 在日志根目录下创建新的运行目录
    pub fn create(log_root: &Path, suite: &str) -> io::Result<Self> {
        let run_id = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        Self::create_with_id(log_root, suite, &run_id)
    }

    /// 使用指定的运行 ID 创建运行目录（目录已存在时追加序号）
    pub fn create_with_id(log_root: &Path, suite: &str, run_id: &str) -> io::Result<Self> {
        let base = run_id;
        let mut run_id = base.to_string();
        let mut root = log_root.join(format!("{}-{}", suite, run_id));
        let mut seq = 1;
        while root.exists() {
            run_id = format!("{}-{}", base, seq);
            root = log_root.join(format!("{}-{}", suite, run_id));
            seq += 1;
        }

        fs::create_dir_all(root.join("lifecycle"))?;
        fs::create_dir_all(root.join("tests"))?;

        Ok(Self {
            run_id,
            suite: suite.to_string(),
            root,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }

    /// 运行目录
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 框架日志
    pub fn framework_log(&self) -> PathBuf {
        self.root.join("framework.log")
    }

    /// 生命周期操作日志（provision/destroy 记录）
    pub fn lifecycle_log(&self, operation: &str) -> PathBuf {
        self.root.join("lifecycle").join(format!("{}.log", operation))
    }

    /// 单个测试的输出日志，必要时创建目标目录
    pub fn test_log(&self, target: &str, script: &str) -> io::Result<PathBuf> {
        let dir = self.root.join("tests").join(target);
        fs::create_dir_all(&dir)?;
        Ok(dir.join(format!("{}.log", script)))
    }

    pub fn connection_info_text(&self) -> PathBuf {
        self.root.join("connection-info.txt")
    }

    pub fn connection_info_json(&self) -> PathBuf {
        self.root.join("connection-info.json")
    }

    pub fn inventory_path(&self) -> PathBuf {
        self.root.join("inventory.yaml")
    }

    pub fn configuration_path(&self) -> PathBuf {
        self.root.join("configuration.json")
    }

    pub fn summary_text(&self) -> PathBuf {
        self.root.join("summary.txt")
    }

    pub fn summary_json(&self) -> PathBuf {
        self.root.join("summary.json")
    }

    /// 人工清理手册
    pub fn manual_cleanup_path(&self) -> PathBuf {
        self.root.join("MANUAL_CLEANUP.md")
    }
}
