//! sispub core library
//!
//! Everything the publisher needs before a single build tool is launched:
//! - publishing policy checks (vendor names, UID3 ranges, capabilities)
//! - reading and atomically rewriting the project descriptor
//! - the packaging metadata of one publish attempt
//! - configuration, error taxonomy and tracing setup

pub mod config;
pub mod descriptor;
pub mod error;
pub mod findings;
pub mod package;
pub mod policy;
pub mod telemetry;

pub use config::PublishConfig;
pub use descriptor::{DescriptorStore, VendorInfo, WriteMode};
pub use error::{PublishError, Result, ValidationError};
pub use findings::{assess, assess_metadata, Assessment, Finding, Severity};
pub use package::{PackageDescriptor, DEFAULT_VENDOR_INFO_KEY, SYNTHESIZED_DEPLOYMENT};
pub use policy::{
    capability_belongs_to_level, classify_identifier, is_vendor_name_acceptable, CapabilityLevel,
    IdentifierClass,
};
pub use telemetry::init_tracing;

/// sispub version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
