//! Publisher configuration.
//!
//! A [`PublishConfig`] can be loaded from a JSON file and then overridden
//! field by field by the command line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PublishError, Result};

/// Tool version assumed when none is configured.
pub const DEFAULT_TOOL_VERSION: &str = "4.7.1";

/// Configuration for one publish run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Project descriptor (`.pro` file).
    pub descriptor: PathBuf,

    /// Directory every stage runs in and where the artifact is expected.
    pub build_dir: PathBuf,

    /// Project name used for the artifact file name; the descriptor's file
    /// stem when unset.
    pub project_name: Option<String>,

    /// Configure tool (qmake).
    pub configure_command: String,

    /// Arguments for the configure tool; the descriptor path when unset.
    pub configure_arguments: Option<String>,

    /// Make tool driving clean, freeze/build and packaging.
    pub make_command: String,

    /// Make arguments appended to the freeze target (e.g. `release-gcce`).
    pub make_arguments: String,

    /// Version of the Qt toolchain, e.g. `4.6.3`.
    pub tool_version: String,

    /// Per-stage timeout in seconds (0 = no timeout).
    pub stage_timeout_secs: u64,

    /// Variables merged over the inherited environment for every stage.
    pub env: BTreeMap<String, String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            descriptor: PathBuf::new(),
            build_dir: PathBuf::from("."),
            project_name: None,
            configure_command: "qmake".to_string(),
            configure_arguments: None,
            make_command: "make".to_string(),
            make_arguments: String::new(),
            tool_version: DEFAULT_TOOL_VERSION.to_string(),
            stage_timeout_secs: 0,
            env: BTreeMap::new(),
        }
    }
}

impl PublishConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PublishError::io(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Arguments handed to the configure tool.
    pub fn effective_configure_arguments(&self) -> String {
        self.configure_arguments
            .clone()
            .unwrap_or_else(|| quote_if_needed(&self.descriptor.to_string_lossy()))
    }

    /// The full environment for stages: inherited variables overlaid with [`env`](Self::env).
    pub fn stage_environment(&self) -> BTreeMap<String, String> {
        let mut environment: BTreeMap<String, String> = std::env::vars().collect();
        environment.extend(self.env.clone());
        environment
    }

    pub fn validate(&self) -> Result<()> {
        if self.descriptor.as_os_str().is_empty() {
            return Err(PublishError::Config("descriptor path is empty".to_string()));
        }
        if self.configure_command.trim().is_empty() {
            return Err(PublishError::Config("configure command is empty".to_string()));
        }
        if self.make_command.trim().is_empty() {
            return Err(PublishError::Config("make command is empty".to_string()));
        }
        if self.tool_version.trim().is_empty() {
            return Err(PublishError::Config("tool version is empty".to_string()));
        }
        Ok(())
    }
}

fn quote_if_needed(arg: &str) -> String {
    if arg.contains(char::is_whitespace) {
        format!("\"{arg}\"")
    } else {
        arg.to_string()
    }
}
