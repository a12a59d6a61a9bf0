//! Per-task staging and pipeline execution
//!
//! One runner instance handles one subject: resolve the subject from the array
//! index, stage inputs to node-local scratch, run MPP.sh, stage results and
//! logs back, remove scratch. Cleanup is a one-shot slot shared with the
//! signal handler, so the scheduler killing the task at the walltime limit
//! still triggers the same release path.

use std::path::Path;

use anyhow::Result;
use log::info;

use crate::cli::PipelineOpts;
use crate::layout::{StudyLayout, TemplateSet};
use crate::runner::scratch::{CleanupSlot, CleanupTask};
use crate::slurm::context::JobContext;
use crate::subjects::SubjectList;

/// Run MPP.sh and the surrounding staging
pub mod pipeline;

/// Scratch lifecycle and signal-driven cleanup
pub mod scratch;

/// File movement between storage tiers
pub mod stage;

pub fn run(opts: &PipelineOpts, ctx: &JobContext) -> Result<()> {
    let subjects = SubjectList::resolve(&opts.subjects)?;
    let index = ctx.task_index()?;
    let subject = subjects.subject_at(index)?.to_string();
    info!("Array task {index} handles subject {subject}");
    if let (Some(host), Some(node)) = (&ctx.submit_host, &ctx.node_name) {
        info!("Submitted from {host}, running on {node}");
    }

    let layout = StudyLayout::new(opts);
    let scratch = scratch::create(
        &opts.scratch_root,
        &layout.scratch_dir_name(&subject, &ctx.job_tag()),
    )?;

    let cleanup = CleanupSlot::new(CleanupTask {
        scratch: scratch.clone(),
        layout: layout.clone(),
        subject: subject.clone(),
        ctx: ctx.clone(),
    });
    scratch::register_termination_handler(cleanup.clone())?;

    // cleanup runs whether or not staging and the pipeline succeeded
    let outcome = execute(opts, &layout, &scratch, &subject);
    let cleaned = cleanup.release();
    outcome.and(cleaned)
}

fn execute(
    opts: &PipelineOpts,
    layout: &StudyLayout,
    scratch: &Path,
    subject: &str,
) -> Result<()> {
    stage::stage_in(layout, opts, scratch, subject)?;
    let templates = TemplateSet::resolve(&scratch.join("tools"))?;
    let invocation = pipeline::build_invocation(opts, scratch, subject, &templates)?;
    pipeline::run_pipeline(
        &invocation,
        &scratch.join("logs"),
        subject,
        opts.printcom.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Command};

    fn run_opts(argv: &[&str]) -> PipelineOpts {
        let mut full = vec!["mppbatch", "run"];
        full.extend_from_slice(argv);
        let cli = Cli::parse_from(full);
        match cli.command {
            Command::Run(opts) => opts,
            _ => unreachable!(),
        }
    }

    /// Study folder, toolset with a stand-in MPP.sh, and the template files.
    fn fixture(root: &Path) -> (String, String, String) {
        let study = root.join("study");
        fs::create_dir_all(study.join("raw/1001")).unwrap();
        fs::write(
            study.join("raw/1001/1001_-_strc_-_T1w.nii.gz"),
            b"t1",
        )
        .unwrap();
        fs::write(
            study.join("raw/1001/1001_-_strc_-_T2w.nii.gz"),
            b"t2",
        )
        .unwrap();

        let tools = root.join("tools");
        let templates = tools.join("global/templates");
        let config = tools.join("global/config");
        fs::create_dir_all(&templates).unwrap();
        fs::create_dir_all(&config).unwrap();
        for name in [
            "MNI152_T1_1mm.nii.gz",
            "MNI152_T1_2mm.nii.gz",
            "MNI152_T1_1mm_brain_mask.nii.gz",
            "MNI152_T1_2mm_brain_mask.nii.gz",
        ] {
            fs::write(templates.join(name), b"").unwrap();
        }
        fs::write(config.join("T1_2_MNI152_2mm.cnf"), b"").unwrap();

        let script = tools.join("MPP.sh");
        fs::write(
            &script,
            "#!/bin/sh\n\
             out=\"\"\n\
             for arg in \"$@\"; do\n\
               case \"$arg\" in\n\
                 --outDir=*) out=\"${arg#--outDir=}\" ;;\n\
               esac\n\
             done\n\
             mkdir -p \"$out\"\n\
             echo ok > \"$out/brain.nii.gz\"\n\
             echo \"pipeline ran\"\n",
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let scratch_root = root.join("scratch");
        fs::create_dir_all(&scratch_root).unwrap();

        (
            study.to_string_lossy().into_owned(),
            tools.to_string_lossy().into_owned(),
            scratch_root.to_string_lossy().into_owned(),
        )
    }

    fn ctx(task: usize) -> JobContext {
        JobContext {
            array_job_id: Some("4242".to_string()),
            array_task_id: Some(task),
            ..JobContext::default()
        }
    }

    #[test]
    fn full_task_stages_results_and_removes_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let (study, tools, scratch_root) = fixture(dir.path());
        let opts = run_opts(&[
            "--studyFolder", &study,
            "--subjects", "1005 1001",
            "--toolsDir", &tools,
            "--scratchRoot", &scratch_root,
        ]);

        run(&opts, &ctx(1)).unwrap();

        let study = Path::new(&study);
        assert!(study
            .join("preprocessed/RPP/linear/strc/1001/brain.nii.gz")
            .is_file());
        let captured =
            fs::read_to_string(study.join("logs/RPP/linear/strc/1001.out")).unwrap();
        assert_eq!(captured.trim(), "pipeline ran");
        assert_eq!(fs::read_dir(&scratch_root).unwrap().count(), 0);
    }

    #[test]
    fn dry_run_stages_and_cleans_up_without_executing() {
        let dir = tempfile::tempdir().unwrap();
        let (study, tools, scratch_root) = fixture(dir.path());
        let opts = run_opts(&[
            "--studyFolder", &study,
            "--subjects", "1001",
            "--toolsDir", &tools,
            "--scratchRoot", &scratch_root,
            "--printcom", "echo",
        ]);

        run(&opts, &ctx(1)).unwrap();

        let study = Path::new(&study);
        assert!(!study.join("preprocessed").exists());
        assert!(study.join("logs/RPP/linear/strc").is_dir());
        assert_eq!(fs::read_dir(&scratch_root).unwrap().count(), 0);
    }

    #[test]
    fn index_past_subject_list_fails_before_staging() {
        let dir = tempfile::tempdir().unwrap();
        let (study, tools, scratch_root) = fixture(dir.path());
        let opts = run_opts(&[
            "--studyFolder", &study,
            "--subjects", "1005 1001",
            "--toolsDir", &tools,
            "--scratchRoot", &scratch_root,
        ]);

        let err = run(&opts, &ctx(3)).unwrap_err();
        assert!(err.to_string().contains("outside the subject list"));
        assert_eq!(fs::read_dir(&scratch_root).unwrap().count(), 0);
    }

    #[test]
    fn pipeline_failure_fails_the_task_but_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let (study, tools, scratch_root) = fixture(dir.path());
        fs::write(
            Path::new(&tools).join("MPP.sh"),
            "#!/bin/sh\necho broken >&2\nexit 1\n",
        )
        .unwrap();
        fs::set_permissions(
            Path::new(&tools).join("MPP.sh"),
            fs::Permissions::from_mode(0o755),
        )
        .unwrap();

        let opts = run_opts(&[
            "--studyFolder", &study,
            "--subjects", "1001",
            "--toolsDir", &tools,
            "--scratchRoot", &scratch_root,
        ]);

        let err = run(&opts, &ctx(1)).unwrap_err();
        assert!(err.downcast_ref::<pipeline::PipelineFailed>().is_some());
        // logs were still staged back and scratch is gone
        let study = Path::new(&study);
        let captured =
            fs::read_to_string(study.join("logs/RPP/linear/strc/1001.err")).unwrap();
        assert_eq!(captured.trim(), "broken");
        assert_eq!(fs::read_dir(&scratch_root).unwrap().count(), 0);
    }
}
