//! Pipeline step runner

use std::path::Path;
use std::process::ExitStatus;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::FlashError;
use crate::pipeline::{Pipeline, Step};

#[cfg(unix)]
const SIGINT: i32 = 2;

/// How to run the pipeline
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Print commands instead of running them
    pub dry_run: bool,
    /// Suppress progress lines
    pub quiet: bool,
}

/// Result of running a single step
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Step name
    pub name: String,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Command was only printed
    pub dry_run: bool,
}

/// Result of a completed pipeline
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Results for each step, in order
    pub steps: Vec<StepResult>,
}

/// Run every step in order, stopping at the first failure
///
/// A step whose declared inputs are missing is never started, and a step
/// that exits cleanly without its declared outputs counts as failed. A
/// non-zero exit or Ctrl-C stops the pipeline; later steps do not run.
pub async fn run_pipeline(
    pipeline: &Pipeline,
    working_dir: &Path,
    options: &RunOptions,
) -> Result<PipelineReport, FlashError> {
    let start = Instant::now();
    let mut results = Vec::new();

    for step in &pipeline.steps {
        if options.dry_run {
            if !options.quiet {
                print_step_dry_run(step);
            }
            results.push(StepResult {
                name: step.name.clone(),
                duration_ms: 0,
                dry_run: true,
            });
            continue;
        }

        check_inputs(step, working_dir)?;

        if !options.quiet {
            print_step_start(step);
        }

        let step_start = Instant::now();
        let outcome = run_step(step, working_dir).await;
        let duration_ms = step_start.elapsed().as_millis() as u64;

        if !options.quiet {
            print_step_result(&step.name, duration_ms, outcome.is_ok());
        }
        outcome?;
        check_outputs(step, working_dir)?;

        info!(step = %step.name, duration_ms, "step finished");
        results.push(StepResult {
            name: step.name.clone(),
            duration_ms,
            dry_run: false,
        });
    }

    Ok(PipelineReport {
        duration_ms: start.elapsed().as_millis() as u64,
        steps: results,
    })
}

fn check_inputs(step: &Step, working_dir: &Path) -> Result<(), FlashError> {
    for input in &step.inputs {
        let path = working_dir.join(input);
        if !path.exists() {
            warn!(step = %step.name, path = %path.display(), "missing input, aborting");
            return Err(FlashError::MissingArtifact {
                step: step.name.clone(),
                path: input.clone(),
            });
        }
    }
    Ok(())
}

fn check_outputs(step: &Step, working_dir: &Path) -> Result<(), FlashError> {
    match step.outputs.iter().find(|output| !working_dir.join(output).exists()) {
        Some(output) => {
            warn!(step = %step.name, path = %output.display(), "step exited cleanly without its output");
            Err(FlashError::MissingArtifact {
                step: step.name.clone(),
                path: output.clone(),
            })
        }
        None => Ok(()),
    }
}

/// A terminal Ctrl-C reaches the whole foreground group, so the child may
/// die of SIGINT before our own handler wakes.
#[cfg(unix)]
fn killed_by_interrupt(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(SIGINT)
}

#[cfg(not(unix))]
fn killed_by_interrupt(_status: &ExitStatus) -> bool {
    false
}

/// Run one step with inherited stdio, racing it against Ctrl-C
async fn run_step(step: &Step, working_dir: &Path) -> Result<(), FlashError> {
    debug!(step = %step.name, command = %step.command_line(), "spawning");

    let mut child = Command::new(&step.program)
        .args(&step.args)
        .envs(step.env.iter().map(|(k, v)| (k, v)))
        .current_dir(working_dir)
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| FlashError::Spawn {
            step: step.name.clone(),
            source,
        })?;

    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = tokio::signal::ctrl_c() => None,
    };

    match status {
        Some(Ok(status)) if status.success() => Ok(()),
        Some(Ok(status)) if killed_by_interrupt(&status) => {
            warn!(step = %step.name, "interrupted");
            Err(FlashError::Interrupted {
                step: step.name.clone(),
            })
        }
        Some(Ok(status)) => Err(FlashError::StepFailed {
            step: step.name.clone(),
            code: status.code(),
        }),
        Some(Err(source)) => Err(FlashError::Spawn {
            step: step.name.clone(),
            source,
        }),
        None => {
            warn!(step = %step.name, "interrupted, stopping child");
            if let Err(e) = child.kill().await {
                debug!(step = %step.name, error = %e, "child already gone");
            }
            Err(FlashError::Interrupted {
                step: step.name.clone(),
            })
        }
    }
}

// Output formatting functions

fn print_step_start(step: &Step) {
    println!("\x1b[2m[     ]\x1b[0m \x1b[1m{}\x1b[0m", step.name);
    println!("\x1b[2m        $ {}\x1b[0m", step.command_line());
}

fn print_step_result(name: &str, duration_ms: u64, success: bool) {
    let duration_str = format_duration(duration_ms);
    if success {
        println!("[\x1b[2m{:>5}\x1b[0m] \x1b[32mok\x1b[0m {}", duration_str, name);
    } else {
        println!("[\x1b[2m{:>5}\x1b[0m] \x1b[31mFAIL\x1b[0m {}", duration_str, name);
    }
}

fn print_step_dry_run(step: &Step) {
    println!(
        "[\x1b[2m  -  \x1b[0m] \x1b[33mdry-run\x1b[0m {}\n        $ {}",
        step.name,
        step.command_line()
    );
}

pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let mins = ms / 60000;
        let secs = (ms % 60000) / 1000;
        format!("{}m{}s", mins, secs)
    }
}
