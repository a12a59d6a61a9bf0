//! File movement between storage tiers
//!
//! Inputs move shared to scratch at task start, results and logs move scratch
//! to shared at cleanup. Every copy is checked; a failed transfer surfaces as
//! an error instead of letting later stages run on missing data.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::cli::PipelineOpts;
use crate::layout::StudyLayout;
use crate::slurm::context::JobContext;

/// Copy a directory subtree, returning the number of files copied.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(src) {
        let entry = entry.with_context(|| format!("Walking {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .context("Walked path outside copy root")?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Can't create {}", target.display()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Can't create {}", parent.display()))?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Can't copy {} to {}", entry.path().display(), target.display())
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Stage the pipeline toolset and this subject's raw subtree into scratch.
pub fn stage_in(
    layout: &StudyLayout,
    opts: &PipelineOpts,
    scratch: &Path,
    subject: &str,
) -> Result<()> {
    if !opts.tools_dir.is_dir() {
        bail!("Toolset directory {} does not exist", opts.tools_dir.display());
    }
    let tools_dest = scratch.join("tools");
    info!(
        "Staging toolset {} to {}",
        opts.tools_dir.display(),
        tools_dest.display()
    );
    let n = copy_tree(&opts.tools_dir, &tools_dest)?;
    info!("Staged {n} toolset files");

    let raw_src = layout.raw_subject_dir(subject);
    if !raw_src.is_dir() {
        bail!(
            "No raw data for subject {subject} at {}",
            raw_src.display()
        );
    }
    let raw_dest = scratch.join("raw").join(subject);
    let n = copy_tree(&raw_src, &raw_dest)?;
    info!("Staged {n} raw files for subject {subject}");

    fs::create_dir_all(scratch.join("logs")).context("Can't create scratch log directory")?;
    Ok(())
}

/// Copy results and logs from scratch back to the shared study folder.
///
/// A missing results subtree is reported but not fatal: on early termination
/// the pipeline may not have written anything yet, and cleanup still has to
/// stage logs and remove scratch.
pub fn stage_out(layout: &StudyLayout, scratch: &Path, subject: &str) -> Result<()> {
    let results_src = scratch.join("preprocessed").join(subject);
    if results_src.is_dir() {
        let dest = layout.results_dir(subject);
        info!("Staging results to {}", dest.display());
        let n = copy_tree(&results_src, &dest)?;
        info!("Staged {n} result files for subject {subject}");
    } else {
        warn!("No results to stage out for subject {subject}");
    }

    let logs_src = scratch.join("logs");
    if logs_src.is_dir() {
        let dest = layout.log_dir();
        let n = copy_tree(&logs_src, &dest)?;
        info!("Staged {n} log files to {}", dest.display());
    }

    Ok(())
}

/// Relocate the scheduler's own capture files to per-subject names.
///
/// The submitter points `--output`/`--error` at `<submitDir>/logs/slurm/` with
/// `%x-%A_%a` naming; after the task this moves those files next to the other
/// shared logs under a `<subject>.out`/`<subject>.err` name.
pub fn collect_scheduler_logs(
    layout: &StudyLayout,
    ctx: &JobContext,
    subject: &str,
) -> Result<()> {
    let (Some(submit_dir), Some(array_job), Some(task)) =
        (&ctx.submit_dir, &ctx.array_job_id, ctx.array_task_id)
    else {
        debug!("Not running under the scheduler, no capture files to collect");
        return Ok(());
    };

    let capture_dir = submit_dir.join("logs").join("slurm");
    if !capture_dir.is_dir() {
        debug!("Capture directory {} does not exist", capture_dir.display());
        return Ok(());
    }

    let marker = format!("-{array_job}_{task}.");
    let dest_dir = layout.slurm_log_dir();
    fs::create_dir_all(&dest_dir)
        .with_context(|| format!("Can't create {}", dest_dir.display()))?;

    for entry in fs::read_dir(&capture_dir)
        .with_context(|| format!("Can't read {}", capture_dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let ext = match name.rsplit_once('.') {
            Some((_, ext @ ("out" | "err"))) => ext,
            _ => continue,
        };
        if !name.contains(&marker) {
            continue;
        }
        let dest = dest_dir.join(format!("{subject}.{ext}"));
        // plain rename can fail across filesystems, so copy then remove
        fs::copy(entry.path(), &dest)
            .with_context(|| format!("Can't copy capture file to {}", dest.display()))?;
        fs::remove_file(entry.path())
            .with_context(|| format!("Can't remove capture file {name}"))?;
        info!("Relocated scheduler log {name} to {}", dest.display());
    }

    Ok(())
}
