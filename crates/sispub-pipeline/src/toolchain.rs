//! Toolchain version detection and the packaging target it implies.
//!
//! Qt 4.6.3 names both the sis make target and the produced file
//! differently from later releases. The choice lives here and nowhere else.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Make target and artifact suffix used by the packaging stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PackagingTarget {
    /// Appended to the make command, e.g. `unsigned_installer_sis`.
    pub make_target: &'static str,
    /// Appended to the project name to form the artifact file name.
    pub artifact_suffix: &'static str,
}

const CURRENT_PACKAGING: PackagingTarget = PackagingTarget {
    make_target: "unsigned_installer_sis",
    artifact_suffix: "_installer_unsigned.sis",
};

const LEGACY_PACKAGING: PackagingTarget = PackagingTarget {
    make_target: "installer_sis",
    artifact_suffix: "_installer.sis",
};

/// Parsed `MAJOR.MINOR.PATCH` toolchain version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolVersion {
    /// The one release whose packaging target differs.
    pub const LEGACY_PACKAGING: ToolVersion = ToolVersion::new(4, 6, 3);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Find the first `X.Y.Z` group in free text such as `Qt 4.7.1 for Symbian^1`.
    pub fn detect(text: &str) -> Option<Self> {
        text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .find_map(|candidate| candidate.trim_matches('.').parse().ok())
    }

    pub fn packaging(&self) -> PackagingTarget {
        if *self == Self::LEGACY_PACKAGING {
            LEGACY_PACKAGING
        } else {
            CURRENT_PACKAGING
        }
    }
}

impl FromStr for ToolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(format!("expected MAJOR.MINOR.PATCH, got {s:?}"));
        }
        let number = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| format!("invalid version component {part:?} in {s:?}"))
        };
        Ok(Self::new(number(parts[0])?, number(parts[1])?, number(parts[2])?))
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
