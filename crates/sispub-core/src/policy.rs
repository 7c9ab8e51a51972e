//! Publishing policy checks for installer metadata.
//!
//! Pure predicates over vendor names, application identifiers (UID3) and
//! platform capabilities. The policy tables are process-wide constants.

use serde::{Deserialize, Serialize};
use std::ops::Range;

// ---------------------------------------------------------------------------
// Policy tables
// ---------------------------------------------------------------------------

/// Brand that may not appear anywhere inside a third-party vendor name.
pub const PLATFORM_BRAND: &str = "Nokia";

/// Vendor names rejected outright (compared case-insensitively, trimmed).
pub static REJECTED_VENDOR_NAMES: &[&str] = &[PLATFORM_BRAND, "Vendor", "Vendor-EN", ""];

/// Capabilities that require Certified Signed.
pub static CERTIFIED_SIGNED_CAPABILITIES: &[&str] =
    &["CommDD", "DiskAdmin", "MultimediaDD", "NetworkControl"];

/// Capabilities that require manufacturer approval.
pub static MANUFACTURER_APPROVED_CAPABILITIES: &[&str] = &["AllFiles", "DRM", "TCB"];

/// UID range handed out by the signing authority for released applications.
pub const ASSIGNED_RESTRICTED_RANGE: Range<u64> = 0x2000_0000..0x3000_0000;

/// UID range reserved for development and testing.
pub const TEST_RANGE: Range<u64> = 0xE000_0000..0xF000_0000;

/// Unprotected UID range used by applications already known to the signing service.
pub const KNOWN_SIGNED_RANGE: Range<u64> = 0xA000_0000..0xB000_0000;

// ---------------------------------------------------------------------------
// Vendor names
// ---------------------------------------------------------------------------

/// Whether `name` may be used as the vendor of a published package.
pub fn is_vendor_name_acceptable(name: &str) -> bool {
    let trimmed = name.trim();
    let lowered = trimmed.to_lowercase();

    if lowered.contains(&PLATFORM_BRAND.to_lowercase()) {
        return false;
    }

    !REJECTED_VENDOR_NAMES
        .iter()
        .any(|rejected| rejected.eq_ignore_ascii_case(trimmed))
}

// ---------------------------------------------------------------------------
// Application identifiers
// ---------------------------------------------------------------------------

/// Classification of an application identifier against the UID ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierClass {
    /// Not an unsigned integer.
    Invalid,
    /// Inside [`ASSIGNED_RESTRICTED_RANGE`].
    AssignedRestricted,
    /// Inside [`TEST_RANGE`].
    Test,
    /// Inside [`KNOWN_SIGNED_RANGE`].
    KnownPlatformSigned,
    /// Parsed, but outside every policy range.
    Other,
}

impl IdentifierClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierClass::Invalid => "invalid",
            IdentifierClass::AssignedRestricted => "assigned_restricted",
            IdentifierClass::Test => "test",
            IdentifierClass::KnownPlatformSigned => "known_platform_signed",
            IdentifierClass::Other => "other",
        }
    }
}

impl std::fmt::Display for IdentifierClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse an identifier with automatic radix: `0x`/`0X` means hex, anything
/// else is decimal. Surrounding whitespace is ignored.
pub fn parse_identifier(id: &str) -> Option<u64> {
    let trimmed = id.trim();
    let (digits, radix) = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => (hex, 16),
        None => (trimmed, 10),
    };

    // signs are rejected; from_str_radix alone would accept '+'
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

/// Classify `id` into exactly one [`IdentifierClass`].
pub fn classify_identifier(id: &str) -> IdentifierClass {
    let Some(value) = parse_identifier(id) else {
        return IdentifierClass::Invalid;
    };

    if ASSIGNED_RESTRICTED_RANGE.contains(&value) {
        IdentifierClass::AssignedRestricted
    } else if TEST_RANGE.contains(&value) {
        IdentifierClass::Test
    } else if KNOWN_SIGNED_RANGE.contains(&value) {
        IdentifierClass::KnownPlatformSigned
    } else {
        IdentifierClass::Other
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Signing level a capability may demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityLevel {
    CertifiedSigned,
    ManufacturerApproved,
}

impl CapabilityLevel {
    /// The fixed capability set for this level.
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            CapabilityLevel::CertifiedSigned => CERTIFIED_SIGNED_CAPABILITIES,
            CapabilityLevel::ManufacturerApproved => MANUFACTURER_APPROVED_CAPABILITIES,
        }
    }
}

/// Exact-match membership of `capability` (trimmed) in the set for `level`.
pub fn capability_belongs_to_level(capability: &str, level: CapabilityLevel) -> bool {
    let capability = capability.trim();
    level.capabilities().iter().any(|c| *c == capability)
}

/// The strictest level `capability` requires, if any.
pub fn required_level(capability: &str) -> Option<CapabilityLevel> {
    [
        CapabilityLevel::ManufacturerApproved,
        CapabilityLevel::CertifiedSigned,
    ]
    .into_iter()
    .find(|level| capability_belongs_to_level(capability, *level))
}
