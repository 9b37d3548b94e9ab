//! 运行摘要

use std::fs;

use tracing::info;

use ctf_common::{RunContext, TestRun};

use crate::error::{ExecutorError, Result};

/// 写入 summary.json 与 summary.txt
pub fn write_summary(run: &TestRun, ctx: &RunContext) -> Result<()> {
    let json = run
        .to_json()
        .map_err(|e| ExecutorError::SerdeError(e.to_string()))?;
    fs::write(ctx.summary_json(), json)?;
    fs::write(ctx.summary_text(), run.summary_text())?;
    info!("运行摘要已写入: {}", ctx.summary_text().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ctf_common::{ClusterDescriptor, TestOutcome, TestResult};
    use std::path::PathBuf;

    #[test]
    fn test_write_summary() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::create_with_id(dir.path(), "gpu", "20260101-000000").unwrap();
        let mut run = TestRun::new(
            ctx.run_id(),
            "gpu",
            ctx.root(),
            ClusterDescriptor::new("cluster.yaml", "hpc"),
        );
        run.add_result(TestResult {
            script: "check-driver.sh".to_string(),
            target: "hpc-compute-01".to_string(),
            exit_code: Some(0),
            outcome: TestOutcome::Passed,
            log_path: PathBuf::from("tests/hpc-compute-01/check-driver.sh.log"),
            duration_ms: 120,
            started_at: Utc::now(),
            error: None,
        });
        run.finalize();

        write_summary(&run, &ctx).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(ctx.summary_json()).unwrap()).unwrap();
        assert_eq!(json["status"], "passed");
        assert_eq!(json["results"][0]["script"], "check-driver.sh");
        let text = fs::read_to_string(ctx.summary_text()).unwrap();
        assert!(text.contains("passed: 1"));
    }
}
