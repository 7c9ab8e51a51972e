//! Package descriptor store.
//!
//! Reads packaging directives from a qmake project file and rewrites single
//! keys in place. Every rewrite is a whole-file atomic replace (temp file in
//! the same directory, then rename), and every line that does not assign the
//! rewritten key is carried over byte for byte.

mod parse;

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PublishError, Result};
use parse::Statement;

/// Descriptor key: build target name.
pub const KEY_TARGET: &str = "TARGET";
/// Descriptor key: deployment block list.
pub const KEY_DEPLOYMENT: &str = "DEPLOYMENT";
/// Descriptor key: display name of the installed application.
pub const KEY_DISPLAY_NAME: &str = "DEPLOYMENT.display_name";
/// Descriptor key: application identifier.
pub const KEY_APPLICATION_ID: &str = "TARGET.UID3";
/// Descriptor key: requested platform capabilities.
pub const KEY_CAPABILITIES: &str = "TARGET.CAPABILITY";
/// Suffix of the per-deployment pointer to package pre-rules.
pub const PKG_PRERULES_SUFFIX: &str = ".pkg_prerules";

/// How [`DescriptorStore::write_value`] treats existing statements for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Drop every statement for the key and write one line in place of the first.
    ReplaceAll,
    /// Keep existing statements and add one line after the last.
    AppendOneLine,
}

/// The two parts of the stored vendor directive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorInfo {
    /// Global vendor, from the `:"<name>"` part.
    pub global: Option<String>,
    /// Localized vendor names, from the `%{"<n1>","<n2>"}` part.
    pub localized: Vec<String>,
}

impl VendorInfo {
    /// Parse the raw values stored under the vendor-info key.
    pub fn from_values(values: &[String]) -> Self {
        let global = values
            .iter()
            .find(|v| v.starts_with(':'))
            .map(|v| v.replace([':', '"'], "").trim().to_string());

        let localized = values
            .iter()
            .find(|v| v.starts_with('%'))
            .map(|v| {
                v.replace("%{", "")
                    .replace('}', "")
                    .split(',')
                    .map(|name| name.replace('"', "").trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self { global, localized }
    }

    /// Render the directive value as written to the descriptor:
    /// `"%{\"n1\", \"n2\"}" ":\"vendor\""`.
    pub fn to_directive(vendor: &str, localized: &[String]) -> String {
        let localized = localized
            .iter()
            .map(|name| format!("\\\"{}\\\"", name.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("\"%{{{localized}}}\" \":\\\"{vendor}\\\"\"")
    }
}

/// Line-preserving view of one project descriptor file.
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    path: PathBuf,
    statements: Vec<Statement>,
}

impl DescriptorStore {
    /// Load the descriptor at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lines = read_lines(&path)?;
        let statements = parse::parse_statements(&lines);
        Ok(Self {
            path,
            statements,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Effective values of `key`, in order; empty when unset.
    pub fn read_values(&self, key: &str) -> Vec<String> {
        parse::evaluate(&self.statements, key)
    }

    /// First value of `key`, if any.
    pub fn read_value(&self, key: &str) -> Option<String> {
        self.read_values(key).into_iter().next()
    }

    /// Rewrite `key` with `value` and commit the whole file atomically.
    ///
    /// The file is re-read before rewriting so edits made since
    /// [`open`](Self::open) are not lost.
    pub fn write_value(&mut self, key: &str, value: &str, mode: WriteMode) -> Result<()> {
        let lines = read_lines(&self.path)?;
        let statements = parse::parse_statements(&lines);
        let rewritten = rewrite_lines(&lines, &statements, key, value, mode);

        commit(&self.path, &rewritten.join("\n"))?;
        debug!(path = %self.path.display(), key = %key, ?mode, "descriptor rewritten");

        self.statements = parse::parse_statements(&rewritten);
        Ok(())
    }

    /// `TARGET`, else the descriptor's file stem.
    pub fn target_name(&self) -> String {
        self.read_value(KEY_TARGET)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.file_stem())
    }

    /// Name of the project as shown by the build system: the descriptor's file stem.
    pub fn project_name(&self) -> String {
        self.file_stem()
    }

    /// Explicit display name, else [`target_name`](Self::target_name).
    pub fn resolved_display_name(&self) -> String {
        let names = self.read_values(KEY_DISPLAY_NAME);
        if names.is_empty() {
            self.target_name()
        } else {
            names.join(" ")
        }
    }

    pub fn application_id(&self) -> Option<String> {
        self.read_value(KEY_APPLICATION_ID)
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.read_values(KEY_CAPABILITIES)
    }

    /// Locate the variable holding vendor info: the pre-rule variable of a
    /// deployment whose values include a localized vendor block. When several
    /// qualify, the last one in `DEPLOYMENT` order wins.
    pub fn vendor_info_key(&self) -> Option<String> {
        self.read_values(KEY_DEPLOYMENT)
            .iter()
            .flat_map(|deployment| {
                self.read_values(&format!("{deployment}{PKG_PRERULES_SUFFIX}"))
            })
            .filter(|var| {
                self.read_values(var)
                    .iter()
                    .any(|value| value.starts_with("%{\""))
            })
            .last()
    }

    /// Vendor info under the discovered key; empty when there is none.
    pub fn resolved_vendor_info(&self) -> VendorInfo {
        self.vendor_info_key()
            .map(|key| VendorInfo::from_values(&self.read_values(&key)))
            .unwrap_or_default()
    }

    fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|e| PublishError::io(path, e))?;
    Ok(text.split('\n').map(str::to_string).collect())
}

fn rewrite_lines(
    lines: &[String],
    statements: &[Statement],
    key: &str,
    value: &str,
    mode: WriteMode,
) -> Vec<String> {
    let matching: Vec<&Statement> = statements.iter().filter(|s| s.key == key).collect();
    let assignment = format!("{key} += {value}");

    // a trailing newline shows up as a final empty element; keep it last
    let end = if lines.last().is_some_and(|l| l.is_empty()) {
        lines.len() - 1
    } else {
        lines.len()
    };

    let (insert_at, new_line, removed) = match (mode, matching.first()) {
        (WriteMode::ReplaceAll, Some(first)) => {
            (first.first_line, in_scope_of(first, &assignment), matching.clone())
        }
        (WriteMode::ReplaceAll, None) => (end, assignment, Vec::new()),
        (WriteMode::AppendOneLine, _) => {
            let at = matching.last().map_or(end, |s| s.last_line + 1);
            (at, assignment, Vec::new())
        }
    };

    let mut out = Vec::with_capacity(lines.len() + 1);
    for (idx, line) in lines.iter().enumerate() {
        if idx == insert_at {
            out.push(new_line.clone());
        }
        if let Some(statement) = removed
            .iter()
            .find(|s| (s.first_line..=s.last_line).contains(&idx))
        {
            // an unclosed `scope {` opener stays so the block remains balanced
            if idx == statement.first_line && idx != insert_at && !statement.scope_closed {
                out.extend(statement.scope_open.clone());
            }
            continue;
        }
        out.push(line.clone());
    }
    if insert_at >= lines.len() {
        out.push(new_line);
    }
    out
}

/// `assignment` wrapped in the block braces `statement` was written with.
fn in_scope_of(statement: &Statement, assignment: &str) -> String {
    match (&statement.scope_open, statement.scope_closed) {
        (Some(open), true) => format!("{open} {assignment} }}"),
        (Some(open), false) => format!("{open} {assignment}"),
        (None, _) => assignment.to_string(),
    }
}

fn commit(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let permissions = std::fs::metadata(path)
        .map_err(|e| PublishError::io(path, e))?
        .permissions();

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| PublishError::io(path, e))?;
    temp.write_all(contents.as_bytes())
        .and_then(|_| temp.as_file().set_permissions(permissions))
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| PublishError::io(path, e))?;
    temp.persist(path)
        .map_err(|e| PublishError::io(path, e.error))?;
    Ok(())
}
