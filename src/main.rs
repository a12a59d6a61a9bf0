use std::process::ExitCode;

use clap::Parser;
use log::info;

use crate::cli::{Cli, Command};
use crate::runner::pipeline::PipelineFailed;
use crate::slurm::context::JobContext;

mod cli;
mod layout;
mod methods;
mod runner;
mod slurm;
mod subjects;

fn main() -> ExitCode {
    env_logger::init();
    info!("mppbatch starting up");

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Submit(args) => slurm::job::submit(&args),
        Command::Run(opts) => {
            let ctx = JobContext::from_env();
            runner::run(&opts, &ctx)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            // pipeline failures get a distinct exit code from operational errors
            if err.downcast_ref::<PipelineFailed>().is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}
