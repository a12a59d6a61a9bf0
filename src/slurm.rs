//! Build job scripts and talk to the Slurm scheduler

/// Scheduler-provided identity for one array task
pub mod context;

/// Render the sbatch job script and submit it
pub mod job;
