//! CLI command definitions and handlers

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use provision::{persist, render_terminal_qr, Credential, SecretPolicy, SinkReport};
use std::path::{Path, PathBuf};
use tracing::info;
use vetta_core::{tools, FlashConfig, Layout};

use crate::error::FlashError;
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::runner::{format_duration, run_pipeline, PipelineReport, RunOptions};

/// vetta-flash - Provision, build, flash and monitor Vetta firmware
#[derive(Parser)]
#[command(name = "vetta-flash")]
#[command(version)]
#[command(about = "Provision, build, flash and monitor Vetta ESP8266 firmware")]
#[command(after_help = "\
EXAMPLES:
    vetta-flash                      Full run on /dev/ttyUSB0
    vetta-flash /dev/ttyUSB1         Build and flash on another port, no monitor
    vetta-flash /dev/ttyUSB1 --monitor
                                     Same, then attach the monitor
    vetta-flash --no-monitor         Stop after flashing
    vetta-flash --dry-run            Print the commands without running them
    vetta-flash secret --show-qr     Generate a new AP password only
    vetta-flash plan --json          Show the resolved pipeline
    vetta-flash init                 Create .vetta/flash.yaml

ENVIRONMENT:
    IDF_PATH     ESP8266 RTOS SDK checkout (esptool.py, spiffsgen.py)
    RUST_LOG     Log filter, e.g. RUST_LOG=debug

EXIT CODES:
    0    success
    2    AP password could not be generated or written
    3    configuration or tool lookup error
    255  a pipeline step failed or was interrupted")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Serial port of the device (default from config: /dev/ttyUSB0)
    #[arg(global = true)]
    pub port: Option<String>,

    /// Project root (default: current directory)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,

    /// Config file (default: <project>/.vetta/flash.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Serial baud rate for flashing and monitoring
    #[arg(long, global = true)]
    pub baud: Option<u32>,

    /// Parallel make jobs
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,

    /// Do not attach the serial monitor after flashing
    #[arg(long, global = true, conflicts_with = "monitor")]
    pub no_monitor: bool,

    /// Attach the serial monitor even when PORT is given
    #[arg(long, global = true)]
    pub monitor: bool,

    /// Skip building and flashing the SPIFFS image
    #[arg(long, global = true)]
    pub no_spiffs: bool,

    /// Do not save a QR code PNG of the AP password
    #[arg(long, global = true)]
    pub no_qr: bool,

    /// Print the AP password as a QR code in the terminal
    #[arg(long, global = true)]
    pub show_qr: bool,

    /// Print commands instead of running them (writes nothing)
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate and store a new AP password without building
    #[command(about = "Generate and store a new AP password only")]
    Secret,

    /// Show the resolved pipeline
    #[command(about = "Show the steps and commands that would run")]
    Plan {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create project-specific config
    #[command(about = "Create .vetta/flash.yaml with the default settings")]
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
}

/// Resolved per-run state
struct Project {
    config: FlashConfig,
    layout: Layout,
}

impl Project {
    fn load(cli: &Cli) -> Result<Self> {
        let root = project_root(cli)?;
        let config = FlashConfig::load(&config_path(cli, &root))?;
        let layout = Layout::new(&root, &config);

        Ok(Self { config, layout })
    }

    fn pipeline_options(&self, cli: &Cli) -> PipelineOptions {
        let mut options = PipelineOptions::from_config(&self.config);
        if let Some(port) = &cli.port {
            // An explicit port means build and flash only
            options.port = port.clone();
            options.monitor = false;
        }
        if let Some(baud) = cli.baud {
            options.baud = baud;
        }
        if let Some(jobs) = cli.jobs {
            options.jobs = jobs;
        }
        options.spiffs &= !cli.no_spiffs;
        options.monitor = (options.monitor || cli.monitor) && !cli.no_monitor;
        options
    }

    fn pipeline(&self, cli: &Cli) -> Result<Pipeline, FlashError> {
        let idf = tools::idf_path(&self.config)?;
        Ok(Pipeline::from_config(
            &self.config,
            &self.layout,
            &idf,
            &self.pipeline_options(cli),
        ))
    }
}

fn project_root(cli: &Cli) -> Result<PathBuf> {
    match &cli.project {
        Some(root) => Ok(root.clone()),
        None => std::env::current_dir().context("Failed to determine current directory"),
    }
}

fn config_path(cli: &Cli, root: &Path) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(|| FlashConfig::path_for(root))
}

/// Run the CLI
pub async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::Secret) => cmd_secret(&cli),
        Some(Commands::Plan { json }) => cmd_plan(&cli, *json),
        Some(Commands::Init { force }) => cmd_init(&cli, *force),
        None => cmd_flash(&cli).await,
    }
}

/// Provision, then run the external pipeline
async fn cmd_flash(cli: &Cli) -> Result<()> {
    let project = Project::load(cli)?;
    let pipeline = project.pipeline(cli)?;

    if cli.dry_run {
        println!(
            "Dry run: would write a new AP password to {} and {}",
            project.layout.build_sink().display(),
            project.layout.archive_sink().display()
        );
    } else {
        let mut programs: Vec<&str> = pipeline.steps.iter().map(|s| s.program.as_str()).collect();
        programs.sort_unstable();
        programs.dedup();
        tools::require(programs)?;

        // The SPIFFS step packs the build sink, so this must finish first
        provision_secret(&project, cli)?;
    }

    let options = RunOptions {
        dry_run: cli.dry_run,
        quiet: false,
    };
    let report = run_pipeline(&pipeline, &project.layout.root, &options).await?;
    print_summary(&report);

    Ok(())
}

/// Provision only
fn cmd_secret(cli: &Cli) -> Result<()> {
    let project = Project::load(cli)?;
    provision_secret(&project, cli)?;
    Ok(())
}

/// Generate a fresh AP password and write it to both sinks
fn provision_secret(project: &Project, cli: &Cli) -> Result<Credential, FlashError> {
    let secret = &project.config.secret;
    let layout = &project.layout;

    let policy = SecretPolicy::new(secret.length, &secret.alphabet)?;
    let credential = policy.generate()?;

    let qr_path = layout.qr_image();
    let qr_output = (secret.qrdump && !cli.no_qr).then_some(qr_path.as_path());

    let report = persist(
        &credential,
        &layout.build_sink(),
        &layout.archive_sink(),
        qr_output,
        secret.terminator,
    )?;
    info!(bytes = report.bytes_written, "AP password provisioned");

    print_provisioned(&credential, &report, &layout.root);
    if cli.show_qr {
        println!("{}", render_terminal_qr(&credential)?);
    }

    Ok(credential)
}

/// Show the resolved pipeline
fn cmd_plan(cli: &Cli, json: bool) -> Result<()> {
    let project = Project::load(cli)?;
    let pipeline = project.pipeline(cli)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pipeline)?);
        return Ok(());
    }

    println!("Flash Pipeline");
    println!("----------------------------");
    println!("Project: {}", project.config.project);
    println!("Root: {}", project.layout.root.display());
    println!(
        "AP password: {} chars -> {}",
        project.config.secret.length,
        project.layout.build_sink().display()
    );
    println!("Steps: {}", pipeline.names().join(" -> "));
    println!();
    for (i, step) in pipeline.steps.iter().enumerate() {
        println!("  {}. {}", i + 1, step.name);
        println!("     $ {}", step.command_line());
        for input in &step.inputs {
            println!("     needs {}", display_relative(input, &project.layout.root));
        }
    }

    Ok(())
}

/// Create project config
fn cmd_init(cli: &Cli, force: bool) -> Result<()> {
    let path = config_path(cli, &project_root(cli)?);

    if path.exists() && !force {
        bail!("Config already exists: {} (use --force to overwrite)", path.display());
    }

    FlashConfig::default().save(&path)?;

    println!("Created {}", path.display());
    println!("Edit this file to match your partition table and serial port.");

    Ok(())
}

fn print_provisioned(credential: &Credential, report: &SinkReport, root: &Path) {
    println!("AP password: \x1b[1m{}\x1b[0m", credential.plaintext());
    println!("  image:   {}", display_relative(&report.build_sink, root));
    println!("  archive: {}", display_relative(&report.archive_sink, root));
    if let Some(qr) = &report.qr_image {
        println!("  qr code: {}", display_relative(qr, root));
    }
}

fn print_summary(report: &PipelineReport) {
    println!("----------------------------");
    let duration_str = format_duration(report.duration_ms);
    if report.steps.iter().any(|s| s.dry_run) {
        println!("Dry run: {} step(s)", report.steps.len());
    } else {
        for step in &report.steps {
            println!("  {:<10} {}", step.name, format_duration(step.duration_ms));
        }
        println!(
            "Total: {} {} step(s) completed",
            duration_str,
            report.steps.len()
        );
    }
}

fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("vetta-flash").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_port_and_overrides() {
        let cli = parse(&["/dev/ttyUSB1", "--baud", "115200", "--no-monitor", "-j", "2"]);
        assert!(cli.command.is_none());

        let project = Project {
            config: FlashConfig::default(),
            layout: Layout::new(Path::new("/p"), &FlashConfig::default()),
        };
        let options = project.pipeline_options(&cli);
        assert_eq!(options.port, "/dev/ttyUSB1");
        assert_eq!(options.baud, 115200);
        assert_eq!(options.jobs, 2);
        assert!(!options.monitor);
        assert!(options.spiffs);
    }

    #[test]
    fn test_port_skips_monitor_unless_forced() {
        let project = Project {
            config: FlashConfig::default(),
            layout: Layout::new(Path::new("/p"), &FlashConfig::default()),
        };

        let options = project.pipeline_options(&parse(&["/dev/ttyUSB1"]));
        assert_eq!(options.port, "/dev/ttyUSB1");
        assert!(!options.monitor);

        let options = project.pipeline_options(&parse(&["/dev/ttyUSB1", "--monitor"]));
        assert!(options.monitor);

        let options = project.pipeline_options(&parse(&["--monitor"]));
        assert!(options.monitor);

        assert!(Cli::try_parse_from(["vetta-flash", "--monitor", "--no-monitor"]).is_err());
    }

    #[test]
    fn test_defaults_from_config() {
        let cli = parse(&[]);
        let mut config = FlashConfig::default();
        config.spiffs = None;
        let project = Project {
            layout: Layout::new(Path::new("/p"), &config),
            config,
        };

        let options = project.pipeline_options(&cli);
        assert_eq!(options.port, "/dev/ttyUSB0");
        assert_eq!(options.baud, 74880);
        assert!(options.monitor);
        assert!(!options.spiffs);
    }

    #[test]
    fn test_subcommands_parse() {
        assert!(matches!(parse(&["secret"]).command, Some(Commands::Secret)));
        assert!(matches!(
            parse(&["plan", "--json"]).command,
            Some(Commands::Plan { json: true })
        ));
        assert!(matches!(
            parse(&["init", "--force"]).command,
            Some(Commands::Init { force: true })
        ));
    }

    #[test]
    fn test_secret_command_writes_sinks() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let cli = parse(&["--project", root, "secret"]);

        cmd_secret(&cli).unwrap();

        let build = std::fs::read(dir.path().join("spiffs_image/ap.txt")).unwrap();
        let archive = std::fs::read(dir.path().join("secrets/ap.txt")).unwrap();
        assert_eq!(build, archive);
        assert_eq!(build.len(), 9);
        assert_eq!(build.last(), Some(&0u8));
        assert!(build[..8].iter().all(u8::is_ascii_digit));
        assert!(dir.path().join("secrets/ap.txt.png").exists());
    }

    #[test]
    fn test_secret_respects_no_qr_and_config() {
        let dir = tempdir().unwrap();
        let mut config = FlashConfig::default();
        config.secret.terminator = None;
        config.secret.length = 12;
        config.secret.alphabet = "abc".to_string();
        config.save(&FlashConfig::path_for(dir.path())).unwrap();

        let root = dir.path().to_str().unwrap();
        let cli = parse(&["--project", root, "--no-qr", "secret"]);
        cmd_secret(&cli).unwrap();

        let build = std::fs::read_to_string(dir.path().join("spiffs_image/ap.txt")).unwrap();
        assert_eq!(build.len(), 12);
        assert!(build.chars().all(|c| "abc".contains(c)));
        assert!(!dir.path().join("secrets/ap.txt.png").exists());
    }

    #[test]
    fn test_invalid_secret_config_is_provision_error() {
        let dir = tempdir().unwrap();
        let mut config = FlashConfig::default();
        config.secret.alphabet = String::new();
        config.save(&FlashConfig::path_for(dir.path())).unwrap();

        let root = dir.path().to_str().unwrap();
        let err = cmd_secret(&parse(&["--project", root, "secret"])).unwrap_err();
        assert_eq!(crate::error::exit_code(&err), crate::error::EXIT_PROVISION);
        assert!(!dir.path().join("spiffs_image").exists());
    }

    #[test]
    fn test_init_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap();

        cmd_init(&parse(&["--project", root, "init"]), false).unwrap();
        assert!(FlashConfig::path_for(dir.path()).exists());
        assert!(cmd_init(&parse(&["--project", root, "init"]), false).is_err());
        cmd_init(&parse(&["--project", root, "init", "--force"]), true).unwrap();
    }
}
