//! provision - AP password provisioning for Vetta devices
//!
//! Every flash gets a fresh access-point password. It is written twice:
//! once into the SPIFFS source directory, where the image generator picks
//! it up and the firmware reads it back as `/spiffs/ap.txt`, and once into
//! an archive directory so the operator can look it up later. A QR code of
//! the password is saved next to the archived copy.

pub mod error;
pub mod secret;
pub mod sink;

pub use error::{ProvisionError, Result};
pub use secret::{generate, generate_with, Alphabet, Credential, SecretPolicy};
pub use sink::{persist, render_terminal_qr, SinkReport};
