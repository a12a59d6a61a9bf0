//! Storage tier layout
//!
//! Three tiers are in play: the shared study folder (permanent), node-local
//! scratch (ephemeral, removed at cleanup), and the submit-side directory where
//! the scheduler captures stdout/stderr. All shared paths are keyed by extraction
//! method, registration method, class and subject, so concurrent array tasks
//! never write to the same subpath.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::cli::PipelineOpts;
use crate::methods::{ExtractionMethod, RegistrationMethod};

#[derive(Debug, Clone)]
pub struct StudyLayout {
    study_folder: PathBuf,
    method: ExtractionMethod,
    registration: RegistrationMethod,
    class: String,
}

impl StudyLayout {
    pub fn new(opts: &PipelineOpts) -> StudyLayout {
        StudyLayout {
            study_folder: opts.study_folder.clone(),
            method: opts.brain_extraction_method,
            registration: opts.mni_registration_method,
            class: opts.class.clone(),
        }
    }

    pub fn study_folder(&self) -> &Path {
        &self.study_folder
    }

    /// Short study name used in the generated job name.
    pub fn study_name(&self) -> String {
        self.study_folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "study".to_string())
    }

    /// Raw input subtree for one subject.
    pub fn raw_subject_dir(&self, subject: &str) -> PathBuf {
        self.study_folder.join("raw").join(subject)
    }

    /// Final permanent output directory for one subject.
    pub fn results_dir(&self, subject: &str) -> PathBuf {
        self.study_folder
            .join("preprocessed")
            .join(self.method.to_string())
            .join(self.registration.to_string())
            .join(&self.class)
            .join(subject)
    }

    /// Shared directory for per-subject pipeline logs.
    pub fn log_dir(&self) -> PathBuf {
        self.study_folder
            .join("logs")
            .join(self.method.to_string())
            .join(self.registration.to_string())
            .join(&self.class)
    }

    /// Shared directory for relocated scheduler capture files.
    pub fn slurm_log_dir(&self) -> PathBuf {
        self.log_dir().join("slurm")
    }

    /// Deterministic scratch directory name for one array task.
    ///
    /// The job tag keeps tasks apart when several land on the same physical node.
    pub fn scratch_dir_name(&self, subject: &str, job_tag: &str) -> String {
        format!(
            "MPP-{}-{}-{}-{}-{}",
            self.method, self.registration, self.class, subject, job_tag
        )
    }
}

/// Fixed read-only reference files resolved under the staged toolset.
///
/// These are shared resources, never mutated by the pipeline.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    pub t1_template: PathBuf,
    pub t1_template_2mm: PathBuf,
    pub brain_mask: PathBuf,
    pub brain_mask_2mm: PathBuf,
    pub fnirt_config: PathBuf,
}

impl TemplateSet {
    /// Resolve the template set under `tools_dir`, verifying every file exists.
    pub fn resolve(tools_dir: &Path) -> Result<TemplateSet> {
        let templates = tools_dir.join("global").join("templates");
        let config = tools_dir.join("global").join("config");

        let set = TemplateSet {
            t1_template: templates.join("MNI152_T1_1mm.nii.gz"),
            t1_template_2mm: templates.join("MNI152_T1_2mm.nii.gz"),
            brain_mask: templates.join("MNI152_T1_1mm_brain_mask.nii.gz"),
            brain_mask_2mm: templates.join("MNI152_T1_2mm_brain_mask.nii.gz"),
            fnirt_config: config.join("T1_2_MNI152_2mm.cnf"),
        };

        for path in [
            &set.t1_template,
            &set.t1_template_2mm,
            &set.brain_mask,
            &set.brain_mask_2mm,
            &set.fnirt_config,
        ] {
            if !path.is_file() {
                bail!("Missing template file {}", path.display());
            }
        }

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Command};

    fn opts(study: &str) -> PipelineOpts {
        let cli = Cli::parse_from([
            "mppbatch",
            "run",
            "--studyFolder",
            study,
            "--subjects",
            "1 2",
            "--brainExtractionMethod",
            "SPP",
            "--MNIRegistrationMethod",
            "nonlinear",
        ]);
        match cli.command {
            Command::Run(opts) => opts,
            _ => unreachable!(),
        }
    }

    #[test]
    fn shared_paths_are_keyed_by_method_registration_class() {
        let layout = StudyLayout::new(&opts("/data/mystudy"));
        assert_eq!(
            layout.results_dir("1001"),
            PathBuf::from("/data/mystudy/preprocessed/SPP/nonlinear/strc/1001")
        );
        assert_eq!(
            layout.log_dir(),
            PathBuf::from("/data/mystudy/logs/SPP/nonlinear/strc")
        );
        assert_eq!(layout.raw_subject_dir("1001"), PathBuf::from("/data/mystudy/raw/1001"));
        assert_eq!(layout.study_name(), "mystudy");
    }

    #[test]
    fn scratch_name_is_namespaced_per_subject_and_job() {
        let layout = StudyLayout::new(&opts("/data/mystudy"));
        assert_eq!(
            layout.scratch_dir_name("1001", "4242_3"),
            "MPP-SPP-nonlinear-strc-1001-4242_3"
        );
    }

    #[test]
    fn template_resolution_requires_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("global").join("templates");
        let config = dir.path().join("global").join("config");
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
        assert!(TemplateSet::resolve(dir.path()).is_err());

        fs::write(config.join("T1_2_MNI152_2mm.cnf"), b"").unwrap();
        let set = TemplateSet::resolve(dir.path()).unwrap();
        assert!(set.fnirt_config.ends_with("global/config/T1_2_MNI152_2mm.cnf"));
    }
}
