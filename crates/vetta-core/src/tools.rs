//! External tool lookup

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::{ConfigError, FlashConfig};

/// Locate the SDK checkout: explicit config first, then `$IDF_PATH`
pub fn idf_path(config: &FlashConfig) -> Result<PathBuf, ConfigError> {
    resolve_idf_path(config.idf_path.as_deref(), std::env::var_os("IDF_PATH"))
}

fn resolve_idf_path(configured: Option<&Path>, env: Option<OsString>) -> Result<PathBuf, ConfigError> {
    let path = match (configured, env) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(env)) if !env.is_empty() => PathBuf::from(env),
        _ => return Err(ConfigError::IdfPathMissing),
    };

    if !path.is_dir() {
        return Err(ConfigError::IdfPathInvalid(path));
    }
    Ok(path)
}

/// esptool.py as shipped with the ESP8266 RTOS SDK
pub fn esptool_script(idf: &Path) -> PathBuf {
    idf.join("components")
        .join("esptool_py")
        .join("esptool")
        .join("esptool.py")
}

/// spiffsgen.py as shipped with the ESP8266 RTOS SDK
pub fn spiffsgen_script(idf: &Path) -> PathBuf {
    idf.join("components").join("spiffs").join("spiffsgen.py")
}

/// Ensure every named program is on PATH
pub fn require<'a>(programs: impl IntoIterator<Item = &'a str>) -> Result<(), ConfigError> {
    for program in programs {
        match which::which(program) {
            Ok(found) => tracing::debug!(program, path = %found.display(), "found tool"),
            Err(_) => return Err(ConfigError::ToolNotFound(program.to_string())),
        }
    }
    Ok(())
}
