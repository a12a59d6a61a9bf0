//! Locate per-domain image inputs and invoke the external MPP pipeline

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use anyhow::{bail, Context, Result};
use log::{info, warn};
use walkdir::WalkDir;

use crate::cli::PipelineOpts;
use crate::layout::TemplateSet;

/// Delimiter joining multiple image paths into one pipeline argument
pub const PATH_DELIMITER: &str = "@";

/// The external pipeline exited non-zero.
///
/// Carried as a distinct error type so `main` can map it to its own exit code
/// and the scheduler sees the task as failed.
#[derive(Debug)]
pub struct PipelineFailed {
    pub status: ExitStatus,
}

impl fmt::Display for PipelineFailed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MPP pipeline failed with {}", self.status)
    }
}

impl std::error::Error for PipelineFailed {}

/// Find this subject's images for one domain under the staged raw subtree.
///
/// Matches `<subject>_-_<class>_-_<domain>.nii.gz`, with an optional `_<n>`
/// suffix for repeated acquisitions, in sorted discovery order.
pub fn find_domain_images(
    raw_dir: &Path,
    subject: &str,
    class: &str,
    domain: &str,
) -> Result<Vec<PathBuf>> {
    let stem = format!("{subject}_-_{class}_-_{domain}");
    let mut images = Vec::new();

    for entry in WalkDir::new(raw_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Walking {}", raw_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let Some(base) = name.strip_suffix(".nii.gz") else {
            continue;
        };
        let matched = base == stem
            || base
                .strip_prefix(&format!("{stem}_"))
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
        if matched {
            images.push(entry.into_path());
        }
    }

    Ok(images)
}

/// Join image paths into the single delimited argument MPP.sh expects.
pub fn join_images(images: &[PathBuf]) -> String {
    images
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(PATH_DELIMITER)
}

/// A fully resolved MPP.sh invocation
pub struct PipelineInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl PipelineInvocation {
    /// One-line rendering used for dry runs and logs
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

pub fn build_invocation(
    opts: &PipelineOpts,
    scratch: &Path,
    subject: &str,
    templates: &TemplateSet,
) -> Result<PipelineInvocation> {
    let raw_dir = scratch.join("raw").join(subject);
    let x_images = find_domain_images(&raw_dir, subject, &opts.class, &opts.domain_x)?;
    let y_images = find_domain_images(&raw_dir, subject, &opts.class, &opts.domain_y)?;
    info!(
        "Subject {subject}: {} {} images, {} {} images",
        x_images.len(),
        opts.domain_x,
        y_images.len(),
        opts.domain_y
    );

    if x_images.is_empty() {
        bail!(
            "No {} images for subject {subject} under {}",
            opts.domain_x,
            raw_dir.display()
        );
    }
    if y_images.is_empty() {
        // some studies genuinely lack the second domain
        warn!("No {} images for subject {subject}", opts.domain_y);
    }

    let program = scratch.join("tools").join("MPP.sh");
    let args = vec![
        format!("--workingDir={}", scratch.display()),
        format!("--subject={subject}"),
        format!("--class={}", opts.class),
        format!("--domainXImages={}", join_images(&x_images)),
        format!("--domainYImages={}", join_images(&y_images)),
        format!("--windowSize={}", opts.window_size),
        format!("--brainSize={}", opts.brain_size),
        format!("--customBrain={}", opts.custom_brain),
        format!("--brainExtractionMethod={}", opts.brain_extraction_method),
        format!("--MNIRegistrationMethod={}", opts.mni_registration_method),
        format!("--t1Template={}", templates.t1_template.display()),
        format!("--t1Template2mm={}", templates.t1_template_2mm.display()),
        format!("--templateMask={}", templates.brain_mask.display()),
        format!("--template2mmMask={}", templates.brain_mask_2mm.display()),
        format!("--fnirtConfig={}", templates.fnirt_config.display()),
        format!(
            "--outDir={}",
            scratch.join("preprocessed").join(subject).display()
        ),
    ];

    Ok(PipelineInvocation { program, args })
}

/// Run the pipeline synchronously, stdout and stderr captured to per-subject
/// logs in the scratch log directory. A non-zero exit becomes [`PipelineFailed`].
pub fn run_pipeline(
    invocation: &PipelineInvocation,
    log_dir: &Path,
    subject: &str,
    printcom: Option<&str>,
) -> Result<()> {
    if let Some(prefix) = printcom {
        info!("--printcom set, printing pipeline invocation instead of running it");
        println!("{prefix} {}", invocation.command_line());
        return Ok(());
    }

    let out_path = log_dir.join(format!("{subject}.out"));
    let err_path = log_dir.join(format!("{subject}.err"));
    let stdout = File::create(&out_path)
        .with_context(|| format!("Can't create pipeline log {}", out_path.display()))?;
    let stderr = File::create(&err_path)
        .with_context(|| format!("Can't create pipeline log {}", err_path.display()))?;

    info!("Running {}", invocation.program.display());
    let status = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdout(stdout)
        .stderr(stderr)
        .status()
        .with_context(|| format!("Failed to start {}", invocation.program.display()))?;

    if !status.success() {
        return Err(PipelineFailed { status }.into());
    }
    info!("Pipeline finished for subject {subject}");
    Ok(())
}
