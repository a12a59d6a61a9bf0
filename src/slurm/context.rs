use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use serde::Serialize;

/// Identity the scheduler gives one array task.
///
/// Built once from the `SLURM_*` environment at startup and passed by value from
/// there on; nothing else in the crate reads ambient environment. Every field is
/// optional so the runner can also be exercised outside the scheduler (tests,
/// dry runs on a login node).
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobContext {
    pub submit_host: Option<String>,
    pub node_name: Option<String>,
    pub submit_dir: Option<PathBuf>,
    pub array_job_id: Option<String>,
    pub array_task_id: Option<usize>,
    pub job_id: Option<String>,
    pub node_list: Option<String>,
}

impl JobContext {
    pub fn from_env() -> JobContext {
        JobContext {
            submit_host: var("SLURM_SUBMIT_HOST"),
            node_name: var("SLURMD_NODENAME"),
            submit_dir: var("SLURM_SUBMIT_DIR").map(PathBuf::from),
            array_job_id: var("SLURM_ARRAY_JOB_ID"),
            array_task_id: var("SLURM_ARRAY_TASK_ID").and_then(|v| v.parse().ok()),
            job_id: var("SLURM_JOB_ID"),
            node_list: var("SLURM_JOB_NODELIST"),
        }
    }

    /// 1-based array index of this task. Fatal when the scheduler didn't set one.
    pub fn task_index(&self) -> Result<usize> {
        self.array_task_id
            .context("SLURM_ARRAY_TASK_ID is not set; run must be started as an array task")
    }

    /// Tag that makes scratch directory names unique per job.
    ///
    /// Falls back to the process ID outside the scheduler.
    pub fn job_tag(&self) -> String {
        match (&self.array_job_id, self.array_task_id) {
            (Some(job), Some(task)) => format!("{job}_{task}"),
            _ => self
                .job_id
                .clone()
                .unwrap_or_else(|| format!("local-{}", process::id())),
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_array_index_is_an_error() {
        let ctx = JobContext::default();
        assert!(ctx.task_index().is_err());
    }

    #[test]
    fn job_tag_prefers_array_identity() {
        let ctx = JobContext {
            array_job_id: Some("4242".to_string()),
            array_task_id: Some(3),
            job_id: Some("4245".to_string()),
            ..JobContext::default()
        };
        assert_eq!(ctx.job_tag(), "4242_3");

        let ctx = JobContext {
            job_id: Some("4245".to_string()),
            ..JobContext::default()
        };
        assert_eq!(ctx.job_tag(), "4245");
    }
}
