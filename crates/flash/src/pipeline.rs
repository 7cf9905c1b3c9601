//! Pipeline definition
//!
//! One ordered list of external commands covers every board variant: the
//! SPIFFS image step and the monitor are switched on and off by config
//! instead of living in separate scripts.

use serde::Serialize;
use std::path::{Path, PathBuf};
use vetta_core::config::FlashConfig;
use vetta_core::{tools, FlashAddress, Layout};

/// A single external command in the pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    /// Step name
    pub name: String,
    /// Program to execute (looked up on PATH)
    pub program: String,
    /// Arguments, passed as-is without a shell
    pub args: Vec<String>,
    /// Extra environment for this step only
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,
    /// Files that must exist before the step runs
    pub inputs: Vec<PathBuf>,
    /// Files the step must leave behind when it exits cleanly
    pub outputs: Vec<PathBuf>,
}

impl Step {
    fn new(name: &str, program: &str) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: Vec::new(),
            env: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display())
    }

    fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    fn input(mut self, path: PathBuf) -> Self {
        self.inputs.push(path);
        self
    }

    fn output(mut self, path: PathBuf) -> Self {
        self.outputs.push(path);
        self
    }

    /// Human-readable command line, quoted for copy-paste into a shell
    pub fn command_line(&self) -> String {
        let env = self.env.iter().map(|(k, v)| format!("{}={}", k, quote(v)));
        let argv = std::iter::once(quote(&self.program)).chain(self.args.iter().map(|a| quote(a)));
        env.chain(argv).collect::<Vec<_>>().join(" ")
    }
}

fn quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Knobs that may be overridden per run from the command line
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub port: String,
    pub baud: u32,
    pub jobs: usize,
    pub spiffs: bool,
    pub monitor: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &FlashConfig) -> Self {
        Self {
            port: config.serial.port.clone(),
            baud: config.serial.baud,
            jobs: config.jobs.unwrap_or_else(default_jobs),
            spiffs: config.spiffs.is_some(),
            monitor: config.monitor,
        }
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// An ordered sequence of steps
#[derive(Debug, Clone, Serialize)]
pub struct Pipeline {
    pub steps: Vec<Step>,
}

impl Pipeline {
    /// Build the pipeline for a project
    ///
    /// `idf` is the SDK root holding esptool.py and spiffsgen.py.
    pub fn from_config(
        config: &FlashConfig,
        layout: &Layout,
        idf: &Path,
        options: &PipelineOptions,
    ) -> Self {
        let mut steps = vec![build_step(config, layout, options)];

        let spiffs = config.spiffs.as_ref().filter(|_| options.spiffs);
        let mut images = vec![
            (config.chip.bootloader_offset, layout.bootloader_bin()),
            (config.chip.partition_table_offset, layout.partition_table_bin()),
            (config.chip.app_offset, layout.app_bin()),
        ];

        if let Some(spiffs) = spiffs {
            steps.push(spiffs_step(config, spiffs, layout, idf));
            images.push((spiffs.offset, layout.spiffs_bin()));
        }

        steps.push(flash_step(config, idf, options, &images));

        if options.monitor {
            steps.push(monitor_step(options));
        }

        Self { steps }
    }

    /// Look up a step by name
    #[cfg(test)]
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

/// make bootloader app -j N
fn build_step(config: &FlashConfig, layout: &Layout, options: &PipelineOptions) -> Step {
    let mut step = Step::new("build", "make")
        .arg("bootloader")
        .arg("app")
        .arg("-j")
        .arg(options.jobs)
        .output(layout.bootloader_bin())
        .output(layout.partition_table_bin())
        .output(layout.app_bin());

    if !config.cppflags.is_empty() {
        step = step.env("CPPFLAGS", &config.cppflags);
    }
    step
}

/// spiffsgen.py <size> <image dir> <output>
fn spiffs_step(
    config: &FlashConfig,
    spiffs: &vetta_core::config::SpiffsConfig,
    layout: &Layout,
    idf: &Path,
) -> Step {
    let mut step = Step::new("spiffs", &config.python)
        .path_arg(&tools::spiffsgen_script(idf))
        .arg(spiffs.size)
        .path_arg(&layout.spiffs_image_dir)
        .path_arg(&layout.spiffs_bin());

    if let Some(page_size) = spiffs.page_size {
        step = step.arg("--page-size").arg(page_size);
    }
    if let Some(block_size) = spiffs.block_size {
        step = step.arg("--block-size").arg(block_size);
    }
    if let Some(meta_len) = spiffs.meta_len {
        step = step.arg("--meta-len").arg(meta_len);
    }
    if spiffs.aligned_obj_ix_tables {
        step = step.arg("--aligned-obj-ix-tables");
    }

    step.input(layout.build_sink()).output(layout.spiffs_bin())
}

/// esptool.py write_flash with every image at its offset
fn flash_step(
    config: &FlashConfig,
    idf: &Path,
    options: &PipelineOptions,
    images: &[(FlashAddress, PathBuf)],
) -> Step {
    let chip = &config.chip;
    let mut step = Step::new("flash", &config.python)
        .path_arg(&tools::esptool_script(idf))
        .arg("--chip")
        .arg(&chip.chip)
        .arg("--port")
        .arg(&options.port)
        .arg("--baud")
        .arg(options.baud)
        .arg("--before")
        .arg("default_reset")
        .arg("--after")
        .arg("hard_reset")
        .arg("write_flash")
        .arg("-z")
        .arg("--flash_mode")
        .arg(&chip.flash_mode)
        .arg("--flash_freq")
        .arg(&chip.flash_freq)
        .arg("--flash_size")
        .arg(&chip.flash_size);

    for (offset, image) in images {
        step = step.arg(offset).path_arg(image).input(image.clone());
    }
    step
}

/// make monitor MONITORBAUD=.. ESPPORT=..
fn monitor_step(options: &PipelineOptions) -> Step {
    Step::new("monitor", "make")
        .arg("monitor")
        .arg(format!("MONITORBAUD={}", options.baud))
        .arg(format!("ESPPORT={}", options.port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(config: &FlashConfig) -> (Layout, PipelineOptions) {
        let layout = Layout::new(Path::new("/p"), config);
        let mut options = PipelineOptions::from_config(config);
        options.jobs = 4;
        (layout, options)
    }

    #[test]
    fn test_default_step_order() {
        let config = FlashConfig::default();
        let (layout, options) = fixture(&config);
        let pipeline = Pipeline::from_config(&config, &layout, Path::new("/idf"), &options);

        assert_eq!(pipeline.names(), vec!["build", "spiffs", "flash", "monitor"]);
    }

    #[test]
    fn test_build_step() {
        let config = FlashConfig::default();
        let (layout, options) = fixture(&config);
        let pipeline = Pipeline::from_config(&config, &layout, Path::new("/idf"), &options);
        let build = pipeline.step("build").unwrap();

        assert_eq!(build.program, "make");
        assert_eq!(build.args, vec!["bootloader", "app", "-j", "4"]);
        assert_eq!(
            build.env,
            vec![(
                "CPPFLAGS".to_string(),
                "-DSPIFFS_OBJ_META_LEN=4 -DSPIFFS_ALIGNED_OBJECT_INDEX_TABLES=4".to_string()
            )]
        );
        assert!(build.inputs.is_empty());
        assert!(build.outputs.contains(&PathBuf::from("/p/build/vetta-esp8266.bin")));
    }

    #[test]
    fn test_flash_command_line() {
        let mut config = FlashConfig::default();
        config.spiffs = None;
        let (layout, options) = fixture(&config);
        let pipeline = Pipeline::from_config(&config, &layout, Path::new("/idf"), &options);
        let flash = pipeline.step("flash").unwrap();

        assert_eq!(flash.program, "python");
        assert_eq!(
            flash.args.join(" "),
            "/idf/components/esptool_py/esptool/esptool.py \
             --chip esp8266 --port /dev/ttyUSB0 --baud 74880 \
             --before default_reset --after hard_reset \
             write_flash -z --flash_mode dio --flash_freq 80m --flash_size 4MB \
             0x0 /p/build/bootloader/bootloader.bin \
             0x8000 /p/build/partition-table.bin \
             0x10000 /p/build/vetta-esp8266.bin"
        );
        assert_eq!(flash.inputs.len(), 3);
    }

    #[test]
    fn test_spiffs_step_and_image() {
        let config = FlashConfig::default();
        let (layout, options) = fixture(&config);
        let pipeline = Pipeline::from_config(&config, &layout, Path::new("/idf"), &options);

        let spiffs = pipeline.step("spiffs").unwrap();
        assert_eq!(
            spiffs.args,
            vec![
                "/idf/components/spiffs/spiffsgen.py",
                "0x100000",
                "/p/spiffs_image",
                "/p/build/spiffs.bin",
                "--page-size",
                "256",
                "--block-size",
                "4096",
                "--meta-len",
                "4",
                "--aligned-obj-ix-tables",
            ]
        );
        // The generated password must exist before the image is built
        assert_eq!(spiffs.inputs, vec![PathBuf::from("/p/spiffs_image/ap.txt")]);

        let flash = pipeline.step("flash").unwrap();
        let tail: Vec<_> = flash.args.iter().rev().take(2).rev().cloned().collect();
        assert_eq!(tail, vec!["0x300000", "/p/build/spiffs.bin"]);
        assert!(flash.inputs.contains(&PathBuf::from("/p/build/spiffs.bin")));
    }

    #[test]
    fn test_toggles() {
        let config = FlashConfig::default();
        let (layout, mut options) = fixture(&config);
        options.spiffs = false;
        options.monitor = false;
        let pipeline = Pipeline::from_config(&config, &layout, Path::new("/idf"), &options);

        assert_eq!(pipeline.names(), vec!["build", "flash"]);
        assert!(!pipeline.step("flash").unwrap().args.contains(&"0x300000".to_string()));
    }

    #[test]
    fn test_monitor_uses_overrides() {
        let config = FlashConfig::default();
        let (layout, mut options) = fixture(&config);
        options.port = "/dev/ttyUSB1".to_string();
        options.baud = 115200;
        let pipeline = Pipeline::from_config(&config, &layout, Path::new("/idf"), &options);

        let monitor = pipeline.step("monitor").unwrap();
        assert_eq!(
            monitor.args,
            vec!["monitor", "MONITORBAUD=115200", "ESPPORT=/dev/ttyUSB1"]
        );
        assert!(pipeline
            .step("flash")
            .unwrap()
            .args
            .windows(2)
            .any(|w| w == ["--port", "/dev/ttyUSB1"]));
    }

    #[test]
    fn test_command_line_quoting() {
        let config = FlashConfig::default();
        let (layout, options) = fixture(&config);
        let pipeline = Pipeline::from_config(&config, &layout, Path::new("/idf"), &options);

        assert_eq!(
            pipeline.step("build").unwrap().command_line(),
            "CPPFLAGS='-DSPIFFS_OBJ_META_LEN=4 -DSPIFFS_ALIGNED_OBJECT_INDEX_TABLES=4' \
             make bootloader app -j 4"
        );
        assert_eq!(quote("it's"), r"'it'\''s'");
    }
}
