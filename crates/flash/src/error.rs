//! Pipeline errors and process exit codes

use provision::ProvisionError;
use std::path::PathBuf;
use thiserror::Error;
use vetta_core::ConfigError;

/// Exit code for a failed or interrupted pipeline step (the `-1` of old)
pub const EXIT_PIPELINE: i32 = 255;
/// Exit code when the AP password could not be generated or written
pub const EXIT_PROVISION: i32 = 2;
/// Exit code for configuration and tool lookup problems
pub const EXIT_CONFIG: i32 = 3;

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("provision failed")]
    Provision(#[from] ProvisionError),

    #[error("configuration error")]
    Config(#[from] ConfigError),

    #[error("{step}: exited with {}", describe_exit(.code))]
    StepFailed { step: String, code: Option<i32> },

    #[error("{step}: interrupted")]
    Interrupted { step: String },

    #[error("{step}: required artifact missing: {}", path.display())]
    MissingArtifact { step: String, path: PathBuf },

    #[error("{step}: failed to start")]
    Spawn {
        step: String,
        source: std::io::Error,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

impl FlashError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Provision(_) => EXIT_PROVISION,
            Self::Config(_) => EXIT_CONFIG,
            Self::StepFailed { .. }
            | Self::Interrupted { .. }
            | Self::MissingArtifact { .. }
            | Self::Spawn { .. } => EXIT_PIPELINE,
        }
    }
}

/// Map any error reaching `main` to a process exit code
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<FlashError>() {
        e.exit_code()
    } else if err.downcast_ref::<ProvisionError>().is_some() {
        EXIT_PROVISION
    } else if err.downcast_ref::<ConfigError>().is_some() {
        EXIT_CONFIG
    } else {
        1
    }
}
