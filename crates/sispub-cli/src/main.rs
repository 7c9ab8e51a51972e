//! sispub - publish qmake-based S60 projects as installer packages
//!
//! ## Commands
//!
//! - `inspect`: Show the packaging metadata a descriptor declares
//! - `validate`: Check a vendor name and UID3 against publishing policy
//! - `publish`: Run clean, qmake, build and sis creation

use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sispub_core::{
    assess, assess_metadata, classify_identifier, Assessment, DescriptorStore, IdentifierClass,
    PackageDescriptor, PublishConfig, Severity, VendorInfo,
};
use sispub_pipeline::{
    BuildConfiguration, PipelineController, PipelineSignal, PublishReport, ReportColor,
};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "sispub")]
#[command(author = "Stevedores Org")]
#[command(version = sispub_core::VERSION)]
#[command(about = "Installer packaging pipeline for qmake-based S60 projects", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the packaging metadata declared by a project descriptor
    Inspect {
        /// Project descriptor (.pro file)
        descriptor: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        report_json: bool,
    },

    /// Check a vendor name and application id (UID3) against publishing policy
    Validate {
        /// Global vendor name
        #[arg(long, env = "SISPUB_VENDOR")]
        vendor: Option<String>,

        /// Application id, decimal or 0x-prefixed hex
        #[arg(long, env = "SISPUB_UID")]
        uid: Option<String>,
    },

    /// Run clean, qmake, build and sis creation for a project
    Publish(PublishArgs),
}

#[derive(Args, Debug)]
struct PublishArgs {
    /// Project descriptor (.pro file)
    descriptor: PathBuf,

    /// Build directory (default: the descriptor's directory)
    #[arg(long, env = "SISPUB_BUILD_DIR")]
    build_dir: Option<PathBuf>,

    /// Global vendor name (default: the descriptor's)
    #[arg(long, env = "SISPUB_VENDOR")]
    vendor: Option<String>,

    /// Comma-separated localized vendor names
    #[arg(long, env = "SISPUB_LOCALIZED_VENDORS")]
    localized_vendors: Option<String>,

    /// Application id, decimal or 0x-prefixed hex (default: the descriptor's)
    #[arg(long, env = "SISPUB_UID")]
    uid: Option<String>,

    /// Display name written to the descriptor when it differs from TARGET
    #[arg(long)]
    display_name: Option<String>,

    /// Toolchain version, e.g. 4.7.1 or 4.6.3
    #[arg(long, env = "SISPUB_TOOL_VERSION")]
    tool_version: Option<String>,

    /// Arguments for the build stage, e.g. release-gcce
    #[arg(long, env = "SISPUB_MAKE_ARGS")]
    make_args: Option<String>,

    /// JSON configuration file; flags override its values
    #[arg(long, env = "SISPUB_CONFIG")]
    config: Option<PathBuf>,

    /// Kill any stage running longer than this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Print the publish report as JSON
    #[arg(long)]
    report_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    sispub_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Inspect {
            descriptor,
            report_json,
        } => cmd_inspect(&descriptor, report_json),
        Commands::Validate { vendor, uid } => cmd_validate(vendor.as_deref(), uid.as_deref()),
        Commands::Publish(args) => {
            let report_json = args.report_json;
            let report = cmd_publish(args).await?;
            print_report(&report, report_json)?;
            if report.success {
                Ok(())
            } else {
                anyhow::bail!("publishing failed; sis file not created")
            }
        }
    }
}

/// What `inspect` prints.
#[derive(Debug, Serialize)]
struct Inspection {
    descriptor: PathBuf,
    target: String,
    display_name: String,
    vendor_info_key: Option<String>,
    vendor: VendorInfo,
    application_id: Option<String>,
    application_id_class: Option<IdentifierClass>,
    capabilities: Vec<String>,
    assessment: Assessment,
}

fn inspect(path: &Path) -> Result<Inspection> {
    let store = DescriptorStore::open(path)
        .with_context(|| format!("Failed to read descriptor {}", path.display()))?;
    let metadata = PackageDescriptor::from_store(&store);
    let application_id = store.application_id();

    Ok(Inspection {
        descriptor: path.to_path_buf(),
        target: store.target_name(),
        display_name: store.resolved_display_name(),
        vendor_info_key: store.vendor_info_key(),
        vendor: store.resolved_vendor_info(),
        application_id_class: application_id.as_deref().map(classify_identifier),
        application_id,
        capabilities: store.capabilities(),
        assessment: assess(&store, &metadata),
    })
}

fn cmd_inspect(path: &Path, report_json: bool) -> Result<()> {
    let inspection = inspect(path)?;
    if report_json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(());
    }

    println!("Descriptor:      {}", inspection.descriptor.display());
    println!("Target:          {}", inspection.target);
    println!("Display name:    {}", inspection.display_name);
    println!(
        "Vendor info key: {}",
        inspection.vendor_info_key.as_deref().unwrap_or("(none)")
    );
    println!(
        "Vendor:          {}",
        inspection.vendor.global.as_deref().unwrap_or("(none)")
    );
    if !inspection.vendor.localized.is_empty() {
        println!("Localized:       {}", inspection.vendor.localized.join(", "));
    }
    match (&inspection.application_id, inspection.application_id_class) {
        (Some(id), Some(class)) => println!("UID3:            {id} ({class})"),
        _ => println!("UID3:            (none)"),
    }
    if !inspection.capabilities.is_empty() {
        println!("Capabilities:    {}", inspection.capabilities.join(" "));
    }
    println!();
    print_assessment(&inspection.assessment);
    Ok(())
}

fn cmd_validate(vendor: Option<&str>, uid: Option<&str>) -> Result<()> {
    let assessment = assess_metadata(vendor, uid);
    print_assessment(&assessment);
    if assessment.is_blocking() {
        anyhow::bail!("metadata does not satisfy publishing policy");
    }
    Ok(())
}

fn print_assessment(assessment: &Assessment) {
    if assessment.findings.is_empty() {
        println!("No findings");
        return;
    }
    for finding in &assessment.findings {
        let tag = match finding.severity() {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Blocking => "BLOCKING",
        };
        println!("  [{tag}] {}", finding.message());
    }
}

/// Merge the config file and flags into a [`PublishConfig`].
fn resolve_config(args: &PublishArgs) -> Result<PublishConfig> {
    let mut config = match &args.config {
        Some(path) => PublishConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PublishConfig {
            build_dir: args
                .descriptor
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
            ..PublishConfig::default()
        },
    };

    config.descriptor = args.descriptor.clone();
    if let Some(build_dir) = &args.build_dir {
        config.build_dir = build_dir.clone();
    }
    if let Some(version) = &args.tool_version {
        config.tool_version = version.clone();
    }
    if let Some(make_args) = &args.make_args {
        config.make_arguments = make_args.clone();
    }
    if let Some(secs) = args.timeout_secs {
        config.stage_timeout_secs = secs;
    }
    Ok(config)
}

/// Metadata to publish: the descriptor's own values overridden by flags.
fn resolve_metadata(args: &PublishArgs, store: &DescriptorStore) -> PackageDescriptor {
    let mut metadata = PackageDescriptor::from_store(store);
    if let Some(vendor) = &args.vendor {
        metadata.vendor_name = Some(vendor.clone());
    }
    if let Some(csv) = &args.localized_vendors {
        metadata.set_localized_vendor_names_csv(csv);
    }
    if let Some(uid) = &args.uid {
        metadata.application_id = Some(uid.clone());
    }
    if let Some(name) = &args.display_name {
        metadata.display_name = Some(name.clone());
    }
    metadata
}

async fn cmd_publish(args: PublishArgs) -> Result<PublishReport> {
    let config = resolve_config(&args)?;
    let store = DescriptorStore::open(&config.descriptor)
        .with_context(|| format!("Failed to read descriptor {}", config.descriptor.display()))?;
    let metadata = resolve_metadata(&args, &store);

    for finding in assess(&store, &metadata).findings {
        if finding.severity() == Severity::Warning {
            warn!(finding = %finding.message(), "publishing policy warning");
        }
    }

    let build = BuildConfiguration::from_config(&config, &store)
        .context("Invalid build configuration")?;
    info!(build = ?build, "publishing");

    let (mut controller, mut signals) = PipelineController::new(build, store, metadata);
    info!(run_id = %controller.run_id(), "pipeline run started");

    let printer = tokio::spawn(async move {
        let color = std::io::stdout().is_terminal();
        while let Some(signal) = signals.recv().await {
            print_signal(&signal, color);
        }
    });

    let cancel = controller.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling publish");
            cancel.cancel();
        }
    });

    controller.run().context("Publishing could not start")?;
    let outcome = controller.wait().await;
    interrupt.abort();

    let report = controller.report();
    drop(controller);
    let _ = printer.await;

    outcome.context("Publish pipeline failed")?;
    Ok(report)
}

fn print_signal(signal: &PipelineSignal, color: bool) {
    let PipelineSignal::Progress(report) = signal else {
        return;
    };
    if report.text.is_empty() {
        return;
    }

    let (start, end) = match (color, report.color) {
        (false, _) | (true, ReportColor::Normal) => ("", ""),
        (true, ReportColor::Error) => ("\x1b[31m", "\x1b[0m"),
        (true, ReportColor::Command) => ("\x1b[1;34m", "\x1b[0m"),
        (true, ReportColor::Success) => ("\x1b[32m", "\x1b[0m"),
    };

    if report.color == ReportColor::Error {
        let mut err = std::io::stderr().lock();
        let _ = write!(err, "{start}{}{end}", report.text);
    } else {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "{start}{}{end}", report.text);
        let _ = out.flush();
    }
}

fn print_report(report: &PublishReport, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    println!();
    println!("Run ID: {}", report.run_id);
    println!("Status: {}", if report.success { "✓ PUBLISHED" } else { "✗ FAILED" });
    for stage in &report.stages {
        let status = if stage.exit_status.is_normal() { "✓" } else { "✗" };
        println!(
            "  {} {} ({}ms, exit code: {})",
            status,
            stage.stage,
            stage.duration_ms,
            stage
                .exit_code
                .map_or_else(|| "-".to_string(), |code| code.to_string())
        );
    }
    if let Some(path) = &report.artifact_path {
        println!("Artifact: {}", path.display());
    }
    if let Some(digest) = &report.artifact_sha256 {
        println!("SHA-256:  {digest}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const PRO: &str = "\
TARGET = hello
DEPLOYMENT.display_name = Hello World
DEPLOYMENT += dep
dep.pkg_prerules = vinfo
vinfo = \"%{\\\"Acme Oy\\\"}\" \":\\\"Acme\\\"\"
TARGET.UID3 = 0xE0001234
TARGET.CAPABILITY = NetworkServices CommDD
";

    fn descriptor() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.pro");
        std::fs::write(&path, PRO).unwrap();
        (dir, path)
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_publish_flags() {
        let cli = Cli::try_parse_from([
            "sispub",
            "--verbose",
            "publish",
            "hello.pro",
            "--vendor",
            "Acme",
            "--localized-vendors",
            "Acme Oy,Acme",
            "--uid",
            "0x20012345",
            "--tool-version",
            "4.6.3",
            "--timeout-secs",
            "600",
            "--report-json",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Publish(args) => {
                assert_eq!(args.descriptor, PathBuf::from("hello.pro"));
                assert_eq!(args.vendor.as_deref(), Some("Acme"));
                assert_eq!(args.timeout_secs, Some(600));
                assert!(args.report_json);
            }
            _ => panic!("expected publish"),
        }
    }

    #[test]
    fn test_inspect_reads_descriptor() {
        let (_dir, path) = descriptor();
        let inspection = inspect(&path).unwrap();

        assert_eq!(inspection.target, "hello");
        assert_eq!(inspection.display_name, "Hello World");
        assert_eq!(inspection.vendor_info_key.as_deref(), Some("vinfo"));
        assert_eq!(inspection.vendor.global.as_deref(), Some("Acme"));
        assert_eq!(inspection.application_id_class, Some(IdentifierClass::Test));
        assert!(!inspection.assessment.is_blocking());
        assert_eq!(inspection.assessment.highest_severity(), Some(Severity::Warning));
    }

    #[test]
    fn test_inspect_missing_descriptor_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(inspect(&dir.path().join("absent.pro")).is_err());
    }

    #[test]
    fn test_validate_exit_status() {
        assert!(cmd_validate(Some("Acme"), Some("0x20012345")).is_ok());
        assert!(cmd_validate(Some("Nokia"), Some("0x20012345")).is_err());
        assert!(cmd_validate(Some("Acme"), Some("-5")).is_err());
        assert!(cmd_validate(None, Some("0x20012345")).is_err());
    }

    #[test]
    fn test_flags_override_config_and_descriptor() {
        let (dir, path) = descriptor();
        let config_path = dir.path().join("sispub.json");
        std::fs::write(
            &config_path,
            r#"{"build_dir": "/tmp/elsewhere", "make_arguments": "release-armv5", "tool_version": "4.7.1"}"#,
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "sispub",
            "publish",
            path.to_str().unwrap(),
            "--config",
            config_path.to_str().unwrap(),
            "--tool-version",
            "4.6.3",
            "--uid",
            "0x20012345",
            "--localized-vendors",
            "Acme Oy, Acme",
        ])
        .unwrap();
        let Commands::Publish(args) = cli.command else {
            panic!("expected publish");
        };

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.build_dir, PathBuf::from("/tmp/elsewhere"));
        assert_eq!(config.make_arguments, "release-armv5");
        assert_eq!(config.tool_version, "4.6.3");
        assert_eq!(config.descriptor, path);

        let store = DescriptorStore::open(&path).unwrap();
        let metadata = resolve_metadata(&args, &store);
        assert_eq!(metadata.vendor_name.as_deref(), Some("Acme"));
        assert_eq!(metadata.application_id.as_deref(), Some("0x20012345"));
        assert_eq!(metadata.localized_vendor_names, vec!["Acme Oy", "Acme"]);
    }

    #[test]
    fn test_build_dir_defaults_to_descriptor_dir() {
        let (dir, path) = descriptor();
        let cli = Cli::try_parse_from(["sispub", "publish", path.to_str().unwrap()]).unwrap();
        let Commands::Publish(args) = cli.command else {
            panic!("expected publish");
        };
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.build_dir, dir.path());
    }
}
