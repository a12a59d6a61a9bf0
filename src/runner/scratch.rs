//! Node-local scratch as a scoped resource
//!
//! The scratch directory is acquired at task start and released exactly once,
//! whatever the exit path. The release work lives in a [`CleanupSlot`] shared
//! between the normal completion path and the signal handler thread, so a task
//! killed by the scheduler still stages its logs back and never orphans scratch
//! on the node.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use anyhow::{Context, Result};
use log::{error, info, warn};
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::layout::StudyLayout;
use crate::runner::stage;
use crate::slurm::context::JobContext;

/// Exit code reported after signal-forced cleanup
const TERMINATED: i32 = 3;

pub fn create(root: &Path, name: &str) -> Result<PathBuf> {
    let path = root.join(name);
    if path.exists() {
        warn!("Scratch directory already exists, files will be overwritten");
        fs::remove_dir_all(&path)
            .with_context(|| format!("Can't delete existing scratch {}", path.display()))?;
    }
    fs::create_dir_all(&path)
        .with_context(|| format!("Can't create scratch directory {}", path.display()))?;
    info!("Created scratch directory {}", path.display());
    Ok(path)
}

/// Remove the scratch directory. A directory that's already gone is a no-op.
pub fn remove(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    info!("Removing scratch directory {}", path.display());
    fs::remove_dir_all(path)
        .with_context(|| format!("Can't remove scratch directory {}", path.display()))
}

/// Everything cleanup needs, captured up front so the signal handler can run it
/// without reaching into runner state.
pub struct CleanupTask {
    pub scratch: PathBuf,
    pub layout: StudyLayout,
    pub subject: String,
    pub ctx: JobContext,
}

impl CleanupTask {
    /// Stage results and logs back, relocate the scheduler capture files, then
    /// remove scratch. Each step runs regardless of the others; the first error
    /// is the one reported.
    fn run(&self) -> Result<()> {
        let staged = stage::stage_out(&self.layout, &self.scratch, &self.subject);
        let collected = stage::collect_scheduler_logs(&self.layout, &self.ctx, &self.subject);
        let removed = remove(&self.scratch);
        staged.and(collected).and(removed)
    }
}

/// One-shot cleanup shared between the normal exit path and the signal handler.
#[derive(Clone)]
pub struct CleanupSlot {
    inner: Arc<Mutex<Option<CleanupTask>>>,
}

impl CleanupSlot {
    pub fn new(task: CleanupTask) -> CleanupSlot {
        CleanupSlot {
            inner: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Run cleanup if nobody has yet; later calls are no-ops.
    pub fn release(&self) -> Result<()> {
        let task = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match task {
            Some(task) => {
                info!("Cleaning up scratch for subject {}", task.subject);
                task.run()
            }
            None => Ok(()),
        }
    }
}

/// Intercept termination so scratch never outlives the task.
///
/// SIGTERM is what Slurm sends at the walltime limit; SIGINT, SIGQUIT and
/// SIGHUP cover manual and session-loss termination. Results staged back here
/// may be partial.
pub fn register_termination_handler(slot: CleanupSlot) -> Result<()> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM, SIGQUIT, SIGHUP]).context("Can't register signal handler")?;
    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            warn!("==== Received signal {signal}, forcing cleanup, results may be partial ====");
            if let Err(err) = slot.release() {
                error!("Cleanup after signal failed: {err:#}");
            }
            process::exit(TERMINATED);
        }
    });
    Ok(())
}
