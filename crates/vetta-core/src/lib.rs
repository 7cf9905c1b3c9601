//! Vetta Core - Shared functionality for the Vetta firmware tools
//!
//! Project configuration, the on-disk layout of a firmware checkout, and
//! lookup of the external tools (ESP8266 RTOS SDK, make, python) the
//! flashing pipeline shells out to.

pub mod config;
pub mod layout;
pub mod tools;

pub use config::{ConfigError, FlashAddress, FlashConfig};
pub use layout::Layout;
