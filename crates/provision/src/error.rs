//! Provisioning errors

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Invalid secret configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to write {}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to encode QR code: {0}")]
    QrEncode(String),

    #[error("Failed to save QR image {}", path.display())]
    QrImage {
        path: PathBuf,
        source: image::ImageError,
    },
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
