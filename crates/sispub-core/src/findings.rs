//! Policy assessment of a descriptor and the metadata about to be published.
//!
//! Produces the list of findings a publisher front end shows before a run:
//! which problems block the run and which only warrant a warning.

use serde::{Deserialize, Serialize};

use crate::descriptor::DescriptorStore;
use crate::package::PackageDescriptor;
use crate::policy::{
    classify_identifier, is_vendor_name_acceptable, required_level, CapabilityLevel,
    IdentifierClass,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Blocking,
}

/// A single observation about the package metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    MissingVendorName,
    RejectedVendorName { name: String },
    MissingApplicationId,
    ApplicationId { value: String, class: IdentifierClass },
    RestrictedCapability { capability: String, level: CapabilityLevel },
}

impl Finding {
    pub fn severity(&self) -> Severity {
        match self {
            Finding::MissingVendorName
            | Finding::RejectedVendorName { .. }
            | Finding::MissingApplicationId => Severity::Blocking,
            Finding::ApplicationId { class, .. } => match class {
                IdentifierClass::Invalid => Severity::Blocking,
                IdentifierClass::AssignedRestricted => Severity::Info,
                IdentifierClass::Test
                | IdentifierClass::KnownPlatformSigned
                | IdentifierClass::Other => Severity::Warning,
            },
            Finding::RestrictedCapability { .. } => Severity::Warning,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Finding::MissingVendorName => "no vendor name is set".to_string(),
            Finding::RejectedVendorName { name } => {
                format!("vendor name {name:?} is not allowed for publishing")
            }
            Finding::MissingApplicationId => "no application id (UID3) is set".to_string(),
            Finding::ApplicationId { value, class } => match class {
                IdentifierClass::Invalid => format!("{value} is not a valid UID3"),
                IdentifierClass::AssignedRestricted => {
                    format!("{value} is in the assigned restricted range")
                }
                IdentifierClass::Test => {
                    format!("{value} is a test UID and must be replaced before release")
                }
                IdentifierClass::KnownPlatformSigned => format!(
                    "{value} is in the unprotected signed range; \
                     the application must be resubmitted with an assigned UID"
                ),
                IdentifierClass::Other => {
                    format!("{value} is outside every recognized UID range")
                }
            },
            Finding::RestrictedCapability { capability, level } => match level {
                CapabilityLevel::CertifiedSigned => {
                    format!("capability {capability} requires Certified Signed")
                }
                CapabilityLevel::ManufacturerApproved => {
                    format!("capability {capability} requires manufacturer approval")
                }
            },
        }
    }
}

/// All findings for one descriptor/metadata pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub findings: Vec<Finding>,
}

impl Assessment {
    /// True exactly when the pipeline would refuse to start.
    pub fn is_blocking(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity() == Severity::Blocking)
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings.iter().map(Finding::severity).max()
    }
}

/// Assess `descriptor` as it would be published from `store`.
pub fn assess(store: &DescriptorStore, descriptor: &PackageDescriptor) -> Assessment {
    let mut assessment = assess_metadata(
        descriptor.effective_vendor_name(store).as_deref(),
        descriptor.effective_application_id(store).as_deref(),
    );

    for capability in store.capabilities() {
        if let Some(level) = required_level(&capability) {
            assessment
                .findings
                .push(Finding::RestrictedCapability { capability, level });
        }
    }
    assessment
}

/// Vendor name and application id checks only, without a descriptor.
pub fn assess_metadata(vendor_name: Option<&str>, application_id: Option<&str>) -> Assessment {
    let mut findings = Vec::new();

    match vendor_name {
        None => findings.push(Finding::MissingVendorName),
        Some(name) if !is_vendor_name_acceptable(name) => {
            findings.push(Finding::RejectedVendorName {
                name: name.to_string(),
            })
        }
        Some(_) => {}
    }

    match application_id.filter(|id| !id.trim().is_empty()) {
        None => findings.push(Finding::MissingApplicationId),
        Some(value) => findings.push(Finding::ApplicationId {
            value: value.to_string(),
            class: classify_identifier(value),
        }),
    }

    Assessment { findings }
}
