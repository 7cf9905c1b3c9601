//! Standard paths inside a firmware project checkout

use std::path::{Path, PathBuf};

use crate::config::FlashConfig;

/// Resolved on-disk layout of one firmware project
#[derive(Debug, Clone)]
pub struct Layout {
    /// Project root (where `make` runs)
    pub root: PathBuf,
    /// Build output directory
    pub build: PathBuf,
    /// Source directory of the SPIFFS image
    pub spiffs_image_dir: PathBuf,
    /// Operator-facing copy of generated secrets
    pub archive_dir: PathBuf,
    project: String,
    secret_filename: String,
}

impl Layout {
    pub fn new(root: &Path, config: &FlashConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            build: root.join(&config.build_dir),
            spiffs_image_dir: root.join(&config.spiffs_image_dir),
            archive_dir: root.join(&config.secret.archive_dir),
            project: config.project.clone(),
            secret_filename: config.secret.filename.clone(),
        }
    }

    pub fn bootloader_bin(&self) -> PathBuf {
        self.build.join("bootloader").join("bootloader.bin")
    }

    pub fn partition_table_bin(&self) -> PathBuf {
        self.build.join("partition-table.bin")
    }

    /// The application image produced by `make app`
    pub fn app_bin(&self) -> PathBuf {
        self.build.join(format!("{}.bin", self.project))
    }

    pub fn spiffs_bin(&self) -> PathBuf {
        self.build.join("spiffs.bin")
    }

    /// Secret file packed into the SPIFFS image
    pub fn build_sink(&self) -> PathBuf {
        self.spiffs_image_dir.join(&self.secret_filename)
    }

    /// Secret file kept for the operator
    pub fn archive_sink(&self) -> PathBuf {
        self.archive_dir.join(&self.secret_filename)
    }

    /// QR code of the secret, next to the archived copy
    pub fn qr_image(&self) -> PathBuf {
        self.archive_dir.join(format!("{}.png", self.secret_filename))
    }

    pub fn config_file(&self) -> PathBuf {
        FlashConfig::path_for(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let layout = Layout::new(Path::new("/work/vetta"), &FlashConfig::default());

        assert_eq!(layout.build, PathBuf::from("/work/vetta/build"));
        assert_eq!(
            layout.bootloader_bin(),
            PathBuf::from("/work/vetta/build/bootloader/bootloader.bin")
        );
        assert_eq!(
            layout.partition_table_bin(),
            PathBuf::from("/work/vetta/build/partition-table.bin")
        );
        assert_eq!(
            layout.app_bin(),
            PathBuf::from("/work/vetta/build/vetta-esp8266.bin")
        );
        assert_eq!(
            layout.build_sink(),
            PathBuf::from("/work/vetta/spiffs_image/ap.txt")
        );
        assert_eq!(
            layout.archive_sink(),
            PathBuf::from("/work/vetta/secrets/ap.txt")
        );
        assert_eq!(
            layout.qr_image(),
            PathBuf::from("/work/vetta/secrets/ap.txt.png")
        );
        assert_eq!(
            layout.config_file(),
            PathBuf::from("/work/vetta/.vetta/flash.yaml")
        );
    }

    #[test]
    fn test_custom_names() {
        let mut config = FlashConfig::default();
        config.project = "lamp".to_string();
        config.build_dir = PathBuf::from("out");
        config.secret.filename = "uap.txt".to_string();
        config.secret.archive_dir = PathBuf::from("/var/lib/vetta");

        let layout = Layout::new(Path::new("/src"), &config);
        assert_eq!(layout.app_bin(), PathBuf::from("/src/out/lamp.bin"));
        // Absolute archive dirs are not re-rooted
        assert_eq!(
            layout.archive_sink(),
            PathBuf::from("/var/lib/vetta/uap.txt")
        );
    }
}
