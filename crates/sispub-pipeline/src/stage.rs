//! Pipeline stage definitions and command synthesis.

use serde::{Deserialize, Serialize};
use sispub_core::Result;

use crate::build_step::BuildConfiguration;
use crate::toolchain::PackagingTarget;

/// The four stages of a publish run, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// make clean -w
    Clean,

    /// qmake <project>
    Configure,

    /// make freeze-<args>
    Build,

    /// make unsigned_installer_sis (installer_sis on legacy toolchains)
    Package,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Clean, Stage::Configure, Stage::Build, Stage::Package];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Clean => "clean",
            Stage::Configure => "configure",
            Stage::Build => "build",
            Stage::Package => "package",
        }
    }

    /// Heading shown in progress reports when the stage starts.
    pub fn title(&self) -> &'static str {
        match self {
            Stage::Clean => "Running Clean Step",
            Stage::Configure => "Running QMake",
            Stage::Build => "Running Build Steps",
            Stage::Package => "Making Sis File",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Stage::Clean => 0,
            Stage::Configure => 1,
            Stage::Build => 2,
            Stage::Package => 3,
        }
    }

    pub fn next(&self) -> Option<Stage> {
        Stage::ALL.get(self.index() + 1).copied()
    }

    /// Whether a crash of this stage stops the chain. Clean is best effort.
    pub fn failure_is_fatal(&self) -> bool {
        !matches!(self, Stage::Clean)
    }

    /// Build the command line for this stage.
    ///
    /// The relevant build step is re-initialised first, as its command may
    /// depend on state produced by earlier stages.
    pub fn command(
        &self,
        build: &mut BuildConfiguration,
        packaging: PackagingTarget,
    ) -> Result<String> {
        let step = match self {
            Stage::Configure => &mut build.configure_step,
            _ => &mut build.make_step,
        };
        step.init()?;
        let program = quote_if_needed(&step.effective_command());

        Ok(match self {
            Stage::Clean => format!("{program} clean -w"),
            Stage::Configure => join_nonempty(&program, &step.arguments()),
            Stage::Build => {
                let arguments = step.arguments();
                let arguments = arguments.trim();
                if arguments.is_empty() {
                    format!("{program} freeze")
                } else {
                    format!("{program} freeze-{arguments}")
                }
            }
            Stage::Package => format!("{program} {}", packaging.make_target),
        })
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a stage's process ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Exited with status 0.
    Normal,
    /// Non-zero exit, signal, spawn failure, timeout or cancellation.
    Crash,
}

impl ExitStatus {
    pub fn is_normal(&self) -> bool {
        matches!(self, ExitStatus::Normal)
    }
}

/// Outcome of one stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub exit_status: ExitStatus,

    /// Process exit code, when the process exited on its own.
    pub exit_code: Option<i32>,

    /// Captured stdout.
    pub stdout: Vec<u8>,

    /// Captured stderr.
    pub stderr: Vec<u8>,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl StageResult {
    /// A result for a stage that never produced process output.
    pub fn crashed(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            exit_status: ExitStatus::Crash,
            exit_code: None,
            stdout: Vec::new(),
            stderr: message.into().into_bytes(),
            duration_ms,
        }
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// A stage result tagged with the stage that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCompletion {
    pub stage: Stage,
    pub result: StageResult,
}

/// Split a command string into program and arguments. Double quotes group
/// words and are removed; there is no other escaping.
pub fn split_command(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut in_quotes = false;

    for c in command.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_word = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

fn quote_if_needed(word: &str) -> String {
    if word.contains(char::is_whitespace) {
        format!("\"{word}\"")
    } else {
        word.to_string()
    }
}

fn join_nonempty(program: &str, arguments: &str) -> String {
    let arguments = arguments.trim();
    if arguments.is_empty() {
        program.to_string()
    } else {
        format!("{program} {arguments}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_step::ProcessStep;
    use crate::toolchain::ToolVersion;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn build(make_args: &str) -> BuildConfiguration {
        BuildConfiguration {
            build_dir: PathBuf::from("/tmp/build"),
            environment: BTreeMap::new(),
            tool_version: ToolVersion::new(4, 7, 1),
            project_name: "hello".to_string(),
            configure_step: Box::new(ProcessStep::new("qmake", "hello.pro -r")),
            make_step: Box::new(ProcessStep::new("make", make_args)),
            stage_timeout: None,
        }
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::Clean.next(), Some(Stage::Configure));
        assert_eq!(Stage::Configure.next(), Some(Stage::Build));
        assert_eq!(Stage::Build.next(), Some(Stage::Package));
        assert_eq!(Stage::Package.next(), None);
        assert!(!Stage::Clean.failure_is_fatal());
        assert!(Stage::Build.failure_is_fatal());
    }

    #[test]
    fn test_stage_commands() {
        let mut b = build("release-gcce");
        let current = ToolVersion::new(4, 7, 1).packaging();
        assert_eq!(Stage::Clean.command(&mut b, current).unwrap(), "make clean -w");
        assert_eq!(Stage::Configure.command(&mut b, current).unwrap(), "qmake hello.pro -r");
        assert_eq!(Stage::Build.command(&mut b, current).unwrap(), "make freeze-release-gcce");
        assert_eq!(
            Stage::Package.command(&mut b, current).unwrap(),
            "make unsigned_installer_sis"
        );

        let legacy = ToolVersion::LEGACY_PACKAGING.packaging();
        assert_eq!(Stage::Package.command(&mut b, legacy).unwrap(), "make installer_sis");
    }

    #[test]
    fn test_build_without_make_arguments() {
        let mut b = build("");
        let packaging = b.tool_version.packaging();
        assert_eq!(Stage::Build.command(&mut b, packaging).unwrap(), "make freeze");
    }

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("make clean -w"), vec!["make", "clean", "-w"]);
        assert_eq!(
            split_command("\"/opt/my tools/make\"  freeze-release"),
            vec!["/opt/my tools/make", "freeze-release"]
        );
        assert_eq!(split_command("sh -c \"\""), vec!["sh", "-c", ""]);
        assert!(split_command("   ").is_empty());
    }

    #[test]
    fn test_crashed_result() {
        let result = StageResult::crashed("failed to start", 3);
        assert_eq!(result.exit_status, ExitStatus::Crash);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.stderr_lossy(), "failed to start");
        assert!(result.stdout_lossy().is_empty());
    }
}
