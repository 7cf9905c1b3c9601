//! Credential persistence
//!
//! Writes the password to the build-input sink (packed into the SPIFFS
//! image) and the archive sink, then optionally renders a QR code.
//!
//! Writes are not transactional. If the archive write fails after the build
//! sink succeeded, the build sink is left in place and the error names the
//! archive path; rerunning overwrites both.

use image::Luma;
use qrcode::render::unicode;
use qrcode::QrCode;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};
use crate::secret::Credential;

/// Smallest edge of the rendered QR PNG, in pixels
const QR_MIN_SIZE: u32 = 256;

/// What [`persist`] wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub build_sink: PathBuf,
    pub archive_sink: PathBuf,
    pub qr_image: Option<PathBuf>,
    /// Bytes written to each sink, terminator included
    pub bytes_written: usize,
}

/// Persist a credential to both sinks and the optional QR image
///
/// Both sinks receive identical bytes: the plaintext followed by
/// `terminator` when one is configured. Existing files are replaced.
/// The QR code always encodes the bare plaintext.
pub fn persist(
    credential: &Credential,
    build_sink: &Path,
    archive_sink: &Path,
    qr_output: Option<&Path>,
    terminator: Option<u8>,
) -> Result<SinkReport> {
    let encoded = credential.encode(terminator);

    write_sink(build_sink, &encoded)?;
    write_sink(archive_sink, &encoded)?;

    let qr_image = match qr_output {
        Some(path) => {
            write_qr_png(credential, path)?;
            Some(path.to_path_buf())
        }
        None => None,
    };

    info!(
        build = %build_sink.display(),
        archive = %archive_sink.display(),
        qr = qr_image.is_some(),
        "credential persisted"
    );

    Ok(SinkReport {
        build_sink: build_sink.to_path_buf(),
        archive_sink: archive_sink.to_path_buf(),
        qr_image,
        bytes_written: encoded.len(),
    })
}

/// Render the credential as a QR code made of Unicode half blocks
pub fn render_terminal_qr(credential: &Credential) -> Result<String> {
    let code = encode_qr(credential)?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

fn encode_qr(credential: &Credential) -> Result<QrCode> {
    QrCode::new(credential.plaintext().as_bytes())
        .map_err(|e| ProvisionError::QrEncode(e.to_string()))
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|source| ProvisionError::Io {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

fn write_sink(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, bytes).map_err(|source| ProvisionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), len = bytes.len(), "wrote sink");
    Ok(())
}

fn write_qr_png(credential: &Credential, path: &Path) -> Result<()> {
    let code = encode_qr(credential)?;
    let png = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_MIN_SIZE, QR_MIN_SIZE)
        .build();

    ensure_parent(path)?;
    png.save_with_format(path, image::ImageFormat::Png)
        .map_err(|source| ProvisionError::QrImage {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(path = %path.display(), width = png.width(), "wrote QR image");
    Ok(())
}
