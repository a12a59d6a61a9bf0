use std::env;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::info;
use serde::Serialize;
use tinytemplate::{format_unescaped, TinyTemplate};

use crate::cli::SubmitArgs;
use crate::layout::StudyLayout;
use crate::subjects::SubjectList;

/// A JobScript is the path to a rendered job script that's submitted to Slurm via sbatch
pub struct JobScript {
    pub path: PathBuf,
}

/// Resolve the subject list and submit one job array covering all of them.
///
/// The sbatch call is the single side effect against the scheduler; everything
/// before it (log directory, rendered script, manifest) happens first so a
/// failure never leaves a partial submission behind.
pub fn submit(args: &SubmitArgs) -> Result<()> {
    let subjects = SubjectList::resolve(&args.pipeline.subjects)?;
    let layout = StudyLayout::new(&args.pipeline);

    let submit_dir = env::current_dir().context("Can't resolve submission directory")?;
    let capture_dir = submit_dir.join("logs").join("slurm");
    fs::create_dir_all(&capture_dir)
        .with_context(|| format!("Can't create log directory {}", capture_dir.display()))?;

    let job_name = job_name(args, &layout);
    info!(
        "Submitting {} as array {} for {} subjects",
        job_name,
        subjects.array_spec(),
        subjects.len()
    );

    let job = render(args, &subjects, &capture_dir, &job_name)?;
    let path = capture_dir.join(format!("{job_name}.sbatch"));
    job.write(&path)
        .with_context(|| format!("Can't write job script {}", path.display()))?;
    info!("Wrote job script {}", path.display());

    write_manifest(args, &subjects, &capture_dir, &job_name)?;

    let script = JobScript { path };
    match args.pipeline.printcom.as_deref() {
        Some(prefix) => {
            info!("--printcom set, printing submission instead of running it");
            println!("{prefix} /usr/bin/sbatch --parsable {}", script.path.display());
        }
        None => {
            let job_id = run_sbatch(&script)?;
            info!("SLURM job id: {job_id}");
        }
    }

    Ok(())
}

/// Job name encodes study, methods and class so squeue output stays traceable.
fn job_name(args: &SubmitArgs, layout: &StudyLayout) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        layout.study_name(),
        args.pipeline.brain_extraction_method,
        args.pipeline.mni_registration_method,
        args.pipeline.class,
        args.job_name
    )
}

/// All rendered sections of an sbatch job script
struct JobTemplate {
    header: Header,
    body: Body,
}

impl JobTemplate {
    /// Write the complete job script to disk by appending the rendered sections
    fn write(self, out_path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(out_path)?;

        // order is important when writing the file
        let contents = [self.header.content, self.body.content];
        for content in contents.iter() {
            file.write_all(content.as_bytes())?;
        }

        Ok(())
    }
}

/// Rendered SBATCH header
///
/// Job options are parsed by sbatch from `#SBATCH` lines before the first
/// executable command. The array specification, job name and capture paths are
/// computed; the resource options come straight from the CLI.
struct Header {
    content: String,
}

/// Rendered job body: re-invokes this executable as `mppbatch run`, forwarding
/// every pipeline parameter verbatim.
struct Body {
    content: String,
}

/// Rendering context for the header
#[derive(Serialize)]
struct HeaderContext {
    job_name: String,
    array_spec: String,
    capture_dir: String,
    nodes: u32,
    ntasks: u32,
    time: String,
    mem: String,
    export: String,
    extra_directives: String,
    time_now: String,
}

/// Rendering context for the body
#[derive(Serialize)]
struct BodyContext {
    exe: String,
    study_folder: String,
    subjects: String,
    class: String,
    domain_x: String,
    domain_y: String,
    window_size: u32,
    brain_size: u32,
    custom_brain: String,
    extraction_method: String,
    registration_method: String,
    tools_dir: String,
    scratch_root: String,
    printcom_arg: String,
}

fn render(
    args: &SubmitArgs,
    subjects: &SubjectList,
    capture_dir: &Path,
    job_name: &str,
) -> Result<JobTemplate> {
    let header = render_header(args, subjects, capture_dir, job_name)?;
    let body = render_body(args)?;
    Ok(JobTemplate { header, body })
}

fn render_header(
    args: &SubmitArgs,
    subjects: &SubjectList,
    capture_dir: &Path,
    job_name: &str,
) -> Result<Header> {
    /// included header template
    static HEADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/header.txt"));
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);
    tt.add_template("header", HEADER).context("Header template")?;

    let context = HeaderContext {
        job_name: job_name.to_string(),
        array_spec: subjects.array_spec(),
        capture_dir: capture_dir.display().to_string(),
        nodes: args.nodes,
        ntasks: args.ntasks,
        time: args.time.clone(),
        mem: args.mem.clone(),
        export: args.export.clone(),
        extra_directives: extra_directives(args),
        time_now: Utc::now().to_string(),
    };

    let content = tt.render("header", &context).context("Render header")?;
    Ok(Header { content })
}

/// Optional `#SBATCH` lines, present only when the matching option was given.
fn extra_directives(args: &SubmitArgs) -> String {
    let mut out = String::new();
    if let Some(partition) = &args.partition {
        let _ = writeln!(out, "#SBATCH --partition={partition}");
    }
    if let Some(exclude) = &args.exclude {
        let _ = writeln!(out, "#SBATCH --exclude={exclude}");
    }
    if let Some(mail_type) = &args.mail_type {
        let _ = writeln!(out, "#SBATCH --mail-type={mail_type}");
    }
    if let Some(mail_user) = &args.mail_user {
        let _ = writeln!(out, "#SBATCH --mail-user={mail_user}");
    }
    out
}

fn render_body(args: &SubmitArgs) -> Result<Body> {
    /// included body template
    static BODY: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/body.txt"));
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);
    tt.add_template("body", BODY).context("Body template")?;

    let exe = env::current_exe().context("Can't resolve own executable path")?;
    let opts = &args.pipeline;
    let printcom_arg = match opts.printcom.as_deref() {
        Some(prefix) => format!(" \\\n    --printcom={prefix}"),
        None => String::new(),
    };

    let context = BodyContext {
        exe: exe.display().to_string(),
        study_folder: opts.study_folder.display().to_string(),
        subjects: opts.subjects.clone(),
        class: opts.class.clone(),
        domain_x: opts.domain_x.clone(),
        domain_y: opts.domain_y.clone(),
        window_size: opts.window_size,
        brain_size: opts.brain_size,
        custom_brain: opts.custom_brain.to_string(),
        extraction_method: opts.brain_extraction_method.to_string(),
        registration_method: opts.mni_registration_method.to_string(),
        tools_dir: opts.tools_dir.display().to_string(),
        scratch_root: opts.scratch_root.display().to_string(),
        printcom_arg,
    };

    let content = tt.render("body", &context).context("Render body")?;
    Ok(Body { content })
}

/// Submission record written next to the capture files
#[derive(Serialize)]
struct SubmissionManifest<'a> {
    submitted_at: String,
    job_name: &'a str,
    study_folder: String,
    class: &'a str,
    brain_extraction_method: String,
    mni_registration_method: String,
    array_spec: String,
    subjects: Vec<&'a str>,
}

fn write_manifest(
    args: &SubmitArgs,
    subjects: &SubjectList,
    capture_dir: &Path,
    job_name: &str,
) -> Result<()> {
    let manifest = SubmissionManifest {
        submitted_at: Utc::now().to_string(),
        job_name,
        study_folder: args.pipeline.study_folder.display().to_string(),
        class: &args.pipeline.class,
        brain_extraction_method: args.pipeline.brain_extraction_method.to_string(),
        mni_registration_method: args.pipeline.mni_registration_method.to_string(),
        array_spec: subjects.array_spec(),
        subjects: subjects.iter().collect(),
    };
    let json = serde_json::to_string_pretty(&manifest).context("Serialise manifest")?;
    let out_path = capture_dir.join("submission.json");
    info!("Writing submission manifest to {}", out_path.display());
    fs::write(&out_path, json)
        .with_context(|| format!("Can't write manifest {}", out_path.display()))?;
    Ok(())
}

fn run_sbatch(script: &JobScript) -> Result<String> {
    let job_script_path = script
        .path
        .to_str()
        .context("Job script path is not valid UTF-8")?;
    let arguments = vec!["--parsable", job_script_path];

    let mut sbatch = Command::new("/usr/bin/sbatch");
    let cmd = sbatch.args(&arguments);
    info!("Running sbatch process");
    info!("{:?}", &cmd);
    let output = cmd.output().context("Failed to execute sbatch")?;

    if !output.status.success() {
        bail!(
            "sbatch exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Command};

    fn submit_args(extra: &[&str]) -> SubmitArgs {
        let mut argv = vec![
            "mppbatch",
            "submit",
            "--studyFolder",
            "/data/mystudy",
            "--subjects",
            "5 2 10",
        ];
        argv.extend_from_slice(extra);
        let cli = Cli::parse_from(argv);
        match cli.command {
            Command::Submit(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn header_carries_array_spec_and_job_name() {
        let args = submit_args(&["--partition", "long", "--mail-user", "pi@example.org"]);
        let subjects = SubjectList::resolve(&args.pipeline.subjects).unwrap();
        let layout = StudyLayout::new(&args.pipeline);
        let name = job_name(&args, &layout);
        assert_eq!(name, "mystudy-RPP-linear-strc-MPP");

        let header = render_header(&args, &subjects, Path::new("/home/pi/logs/slurm"), &name)
            .unwrap()
            .content;
        assert!(header.starts_with("#!/bin/bash"));
        assert!(header.contains("#SBATCH --array=1,2,3"));
        assert!(header.contains("#SBATCH --job-name=mystudy-RPP-linear-strc-MPP"));
        assert!(header.contains("#SBATCH --output=/home/pi/logs/slurm/%x-%A_%a.out"));
        assert!(header.contains("#SBATCH --partition=long"));
        assert!(header.contains("#SBATCH --mail-user=pi@example.org"));
        assert!(!header.contains("--exclude"));
    }

    #[test]
    fn body_forwards_pipeline_parameters_verbatim() {
        let args = submit_args(&[
            "--brainExtractionMethod",
            "SPP",
            "--MNIRegistrationMethod",
            "nonlinear",
            "--windowSize",
            "1800",
            "--customBrain",
            "MASK",
        ]);
        let body = render_body(&args).unwrap().content;
        assert!(body.contains(" run \\"));
        assert!(body.contains("--studyFolder=\"/data/mystudy\""));
        assert!(body.contains("--subjects=\"5 2 10\""));
        assert!(body.contains("--brainExtractionMethod=SPP"));
        assert!(body.contains("--MNIRegistrationMethod=nonlinear"));
        assert!(body.contains("--windowSize=1800"));
        assert!(body.contains("--customBrain=MASK"));
        assert!(!body.contains("--printcom"));
    }

    #[test]
    fn printcom_is_forwarded_when_set() {
        let args = submit_args(&["--printcom", "echo"]);
        let body = render_body(&args).unwrap().content;
        assert!(body.contains("--printcom=echo"));
    }
}
