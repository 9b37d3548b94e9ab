//! 测试脚本枚举

use std::fs;
use std::path::Path;

use crate::error::{ExecutorError, Result};

/// 测试脚本后缀
pub const SCRIPT_EXTENSION: &str = ".sh";

/// 列出目录顶层的测试脚本，按文件名字典序排序
pub fn list_scripts(scripts_dir: &Path) -> Result<Vec<String>> {
    if !scripts_dir.is_dir() {
        return Err(ExecutorError::ScriptsDirNotFound(scripts_dir.to_path_buf()));
    }

    let mut scripts = Vec::new();
    for entry in fs::read_dir(scripts_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(SCRIPT_EXTENSION) {
            scripts.push(name);
        }
    }
    scripts.sort();
    Ok(scripts)
}

/// 按名称查找脚本，允许省略 `.sh` 后缀
pub fn find_script(scripts_dir: &Path, name: &str) -> Result<String> {
    let scripts = list_scripts(scripts_dir)?;
    let wanted = if name.ends_with(SCRIPT_EXTENSION) {
        name.to_string()
    } else {
        format!("{}{}", name, SCRIPT_EXTENSION)
    };

    scripts
        .iter()
        .find(|s| **s == wanted)
        .cloned()
        .ok_or_else(|| ExecutorError::ScriptNotFound {
            name: name.to_string(),
            available: scripts.join(", "),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_is_lexical_and_top_level() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.sh", "a.sh", "b.sh", "README.md", "helpers.bash"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib").join("nested.sh"), "").unwrap();

        assert_eq!(list_scripts(dir.path()).unwrap(), vec!["a.sh", "b.sh", "c.sh"]);
    }

    #[test]
    fn test_find_script() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("check-driver.sh"), "").unwrap();

        assert_eq!(find_script(dir.path(), "check-driver").unwrap(), "check-driver.sh");
        assert_eq!(find_script(dir.path(), "check-driver.sh").unwrap(), "check-driver.sh");

        let err = find_script(dir.path(), "missing").unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("check-driver.sh"));
    }

    #[test]
    fn test_missing_dir() {
        let err = list_scripts(Path::new("/nonexistent/suite")).unwrap_err();
        assert!(matches!(err, ExecutorError::ScriptsDirNotFound(_)));
    }
}
