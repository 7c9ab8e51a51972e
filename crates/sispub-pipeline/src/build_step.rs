//! Build-step collaborators and the build configuration they belong to.
//!
//! The controller only ever concatenates strings obtained from a
//! [`BuildStep`]; how a step arrives at its command line is its own business.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use sispub_core::{DescriptorStore, PublishConfig, PublishError, Result};
use tracing::warn;

use crate::toolchain::ToolVersion;

/// Provider of the command line for one kind of build tool invocation.
pub trait BuildStep: Send {
    /// Prepare the step. Must be called before the accessors below.
    fn init(&mut self) -> Result<()>;

    /// Program to run, possibly resolved to an absolute path.
    fn effective_command(&self) -> String;

    /// Step-specific arguments.
    fn arguments(&self) -> String;
}

/// A step backed by a fixed program name and argument string.
///
/// `init` resolves the program against `PATH` from the stage environment so
/// the command echoed in progress reports is the one actually executed.
#[derive(Debug, Clone)]
pub struct ProcessStep {
    command: String,
    arguments: String,
    search_path: Option<String>,
    resolved: Option<PathBuf>,
}

impl ProcessStep {
    pub fn new(command: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            arguments: arguments.into(),
            search_path: None,
            resolved: None,
        }
    }

    /// Resolve the program against this `PATH` value instead of leaving it bare.
    pub fn with_search_path(mut self, path: Option<String>) -> Self {
        self.search_path = path;
        self
    }
}

impl BuildStep for ProcessStep {
    fn init(&mut self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(PublishError::Config("build step has no command".to_string()));
        }
        self.resolved = self
            .search_path
            .as_deref()
            .and_then(|path| resolve_program(&self.command, path));
        Ok(())
    }

    fn effective_command(&self) -> String {
        match &self.resolved {
            Some(path) => path.to_string_lossy().into_owned(),
            None => self.command.clone(),
        }
    }

    fn arguments(&self) -> String {
        self.arguments.clone()
    }
}

fn resolve_program(program: &str, search_path: &str) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains(char::is_whitespace) {
        return None;
    }
    std::env::split_paths(search_path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Everything the controller needs to know about the active build.
pub struct BuildConfiguration {
    /// Working directory of every stage and location of the artifact.
    pub build_dir: PathBuf,

    /// Complete environment handed to every stage.
    pub environment: BTreeMap<String, String>,

    /// Detected toolchain version; consulted once per controller.
    pub tool_version: ToolVersion,

    /// Project name; the artifact is `{build_dir}/{project_name}{suffix}`.
    pub project_name: String,

    /// The qmake step.
    pub configure_step: Box<dyn BuildStep>,

    /// The make step used for clean, freeze/build and packaging.
    pub make_step: Box<dyn BuildStep>,

    /// Kill a stage that runs longer than this.
    pub stage_timeout: Option<Duration>,
}

impl BuildConfiguration {
    /// Assemble from configuration and the descriptor about to be published.
    pub fn from_config(config: &PublishConfig, store: &DescriptorStore) -> Result<Self> {
        config.validate()?;

        let tool_version = ToolVersion::detect(&config.tool_version).ok_or_else(|| {
            PublishError::Config(format!(
                "cannot detect a MAJOR.MINOR.PATCH version in {:?}",
                config.tool_version
            ))
        })?;

        let environment = config.stage_environment();
        let search_path = environment.get("PATH").cloned();
        if search_path.is_none() {
            warn!("stage environment has no PATH; build tools are run by bare name");
        }

        Ok(Self {
            build_dir: config.build_dir.clone(),
            tool_version,
            project_name: config
                .project_name
                .clone()
                .unwrap_or_else(|| store.project_name()),
            configure_step: Box::new(
                ProcessStep::new(
                    config.configure_command.clone(),
                    config.effective_configure_arguments(),
                )
                .with_search_path(search_path.clone()),
            ),
            make_step: Box::new(
                ProcessStep::new(config.make_command.clone(), config.make_arguments.clone())
                    .with_search_path(search_path),
            ),
            stage_timeout: (config.stage_timeout_secs > 0)
                .then(|| Duration::from_secs(config.stage_timeout_secs)),
            environment,
        })
    }

    /// Where the packaging stage is expected to leave its artifact.
    pub fn artifact_path(&self, artifact_suffix: &str) -> PathBuf {
        self.build_dir
            .join(format!("{}{}", self.project_name, artifact_suffix))
    }
}

impl std::fmt::Debug for BuildConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildConfiguration")
            .field("build_dir", &self.build_dir)
            .field("tool_version", &self.tool_version)
            .field("project_name", &self.project_name)
            .field("stage_timeout", &self.stage_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_step_without_search_path() {
        let mut step = ProcessStep::new("make", "release-gcce");
        step.init().expect("init");
        assert_eq!(step.effective_command(), "make");
        assert_eq!(step.arguments(), "release-gcce");
    }

    #[test]
    fn test_process_step_resolves_against_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = dir.path().join("fakemake");
        std::fs::write(&tool, "#!/bin/sh\n").expect("write tool");

        let mut step = ProcessStep::new("fakemake", "")
            .with_search_path(Some(dir.path().to_string_lossy().into_owned()));
        step.init().expect("init");
        assert_eq!(step.effective_command(), tool.to_string_lossy());
    }

    #[test]
    fn test_process_step_rejects_empty_command() {
        let mut step = ProcessStep::new("  ", "");
        assert!(step.init().is_err());
    }

    #[test]
    fn test_from_config_derives_project_name_and_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let descriptor = dir.path().join("hello.pro");
        std::fs::write(&descriptor, "TARGET = hello_app\n").expect("write");
        let store = DescriptorStore::open(&descriptor).expect("open");

        let config = PublishConfig {
            descriptor: descriptor.clone(),
            build_dir: dir.path().to_path_buf(),
            tool_version: "Qt 4.6.3".to_string(),
            stage_timeout_secs: 30,
            ..PublishConfig::default()
        };
        let build = BuildConfiguration::from_config(&config, &store).expect("build config");

        assert_eq!(build.project_name, "hello");
        assert_eq!(build.tool_version, ToolVersion::LEGACY_PACKAGING);
        assert_eq!(build.stage_timeout, Some(Duration::from_secs(30)));
        assert_eq!(
            build.artifact_path("_installer.sis"),
            dir.path().join("hello_installer.sis")
        );
    }

    #[test]
    fn test_from_config_rejects_undetectable_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let descriptor = dir.path().join("hello.pro");
        std::fs::write(&descriptor, "").expect("write");
        let store = DescriptorStore::open(&descriptor).expect("open");

        let config = PublishConfig {
            descriptor,
            tool_version: "latest".to_string(),
            ..PublishConfig::default()
        };
        let err = BuildConfiguration::from_config(&config, &store).expect_err("bad version");
        assert!(matches!(err, PublishError::Config(_)));
    }
}
