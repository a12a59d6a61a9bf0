//! Command line surface for the submit and run stages
//!
//! Both stages share the same pipeline parameter set; `submit` adds the scheduler
//! resource options and forwards the pipeline set verbatim into the generated job
//! script, so a `run` invocation on a worker node re-parses exactly what the
//! submitter saw.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::methods::{CustomBrain, ExtractionMethod, RegistrationMethod};

#[derive(Parser, Debug)]
#[command(name = "mppbatch", version, about = "Submit and stage MPP preprocessing jobs as Slurm array tasks")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit one job array covering all subjects (login node)
    Submit(SubmitArgs),
    /// Stage and run the pipeline for one array task (worker node)
    Run(PipelineOpts),
}

/// Pipeline parameters, shared between the submitter and the per-task runner.
#[derive(Args, Debug, Clone)]
pub struct PipelineOpts {
    /// Path to the shared study folder
    #[arg(long = "studyFolder")]
    pub study_folder: PathBuf,

    /// Subject list: a file with one ID per line, or an inline whitespace-separated list
    #[arg(long = "subjects")]
    pub subjects: String,

    /// Image class encoded in the raw file names
    #[arg(long = "class", default_value = "strc")]
    pub class: String,

    /// First image domain
    #[arg(long = "domainX", default_value = "T1w")]
    pub domain_x: String,

    /// Second image domain
    #[arg(long = "domainY", default_value = "T2w")]
    pub domain_y: String,

    /// Rolling window size (mm) used by bias field correction
    #[arg(long = "windowSize", default_value_t = 1500)]
    pub window_size: u32,

    /// Expected brain size (mm) along the z axis
    #[arg(long = "brainSize", default_value_t = 150)]
    pub brain_size: u32,

    #[arg(long = "customBrain", value_enum, default_value_t = CustomBrain::None)]
    pub custom_brain: CustomBrain,

    #[arg(long = "brainExtractionMethod", value_enum, default_value_t = ExtractionMethod::Rpp)]
    pub brain_extraction_method: ExtractionMethod,

    #[arg(long = "MNIRegistrationMethod", value_enum, default_value_t = RegistrationMethod::Linear)]
    pub mni_registration_method: RegistrationMethod,

    /// Shared location of the MPP toolset (contains MPP.sh and global/templates)
    #[arg(long = "toolsDir", default_value = "/opt/MPP")]
    pub tools_dir: PathBuf,

    /// Root for node-local scratch directories
    #[arg(long = "scratchRoot", default_value = "/tmp")]
    pub scratch_root: PathBuf,

    /// Dry-run command prefix: print commands with this prefix instead of executing them
    #[arg(long = "printcom")]
    pub printcom: Option<String>,
}

/// Scheduler resource options, only meaningful at submission time.
#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub pipeline: PipelineOpts,

    /// Suffix appended to the generated job name
    #[arg(long = "job-name", default_value = "MPP")]
    pub job_name: String,

    #[arg(long)]
    pub partition: Option<String>,

    /// Nodes to exclude from scheduling
    #[arg(long)]
    pub exclude: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub nodes: u32,

    /// Walltime limit per array task
    #[arg(long, default_value = "48:00:00")]
    pub time: String,

    #[arg(long, default_value_t = 1)]
    pub ntasks: u32,

    #[arg(long, default_value = "16gb")]
    pub mem: String,

    /// Environment variables exported into the job
    #[arg(long, default_value = "ALL")]
    pub export: String,

    #[arg(long = "mail-type")]
    pub mail_type: Option<String>,

    #[arg(long = "mail-user")]
    pub mail_user: Option<String>,
}
