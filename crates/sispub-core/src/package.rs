//! Packaging metadata for one publish attempt and its persistence into the
//! project descriptor.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::descriptor::{
    DescriptorStore, VendorInfo, WriteMode, KEY_APPLICATION_ID, KEY_DEPLOYMENT, KEY_DISPLAY_NAME,
    PKG_PRERULES_SUFFIX,
};
use crate::error::{Result, ValidationError};
use crate::policy::{classify_identifier, is_vendor_name_acceptable, IdentifierClass};

/// Vendor-info variable created when the descriptor does not declare one.
pub const DEFAULT_VENDOR_INFO_KEY: &str = "vendorinfo";

/// Deployment block synthesized to carry the vendor-info pre-rule.
pub const SYNTHESIZED_DEPLOYMENT: &str = "my_deployment";

/// Caller-supplied packaging metadata.
///
/// Unset fields fall back to what the descriptor already contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub display_name: Option<String>,
    pub vendor_name: Option<String>,
    #[serde(default)]
    pub localized_vendor_names: Vec<String>,
    pub application_id: Option<String>,
    /// Descriptor variable holding vendor info; discovered from the
    /// descriptor when unset, [`DEFAULT_VENDOR_INFO_KEY`] when absent there too.
    pub vendor_info_key: Option<String>,
}

impl PackageDescriptor {
    /// Seed from whatever the descriptor currently declares.
    pub fn from_store(store: &DescriptorStore) -> Self {
        let vendor = store.resolved_vendor_info();
        Self {
            display_name: None,
            vendor_name: vendor.global,
            localized_vendor_names: vendor.localized,
            application_id: store.application_id(),
            vendor_info_key: store.vendor_info_key(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_vendor_name(mut self, name: impl Into<String>) -> Self {
        self.vendor_name = Some(name.into());
        self
    }

    pub fn with_application_id(mut self, id: impl Into<String>) -> Self {
        self.application_id = Some(id.into());
        self
    }

    pub fn with_localized_vendor_names(mut self, names: Vec<String>) -> Self {
        self.localized_vendor_names = names;
        self
    }

    /// Set localized vendor names from one comma-separated string.
    pub fn set_localized_vendor_names_csv(&mut self, csv: &str) {
        self.localized_vendor_names = csv
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
    }

    /// Application id to publish with: explicit, else the descriptor's.
    pub fn effective_application_id(&self, store: &DescriptorStore) -> Option<String> {
        self.application_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| store.application_id())
    }

    /// Vendor to publish with: explicit, else the descriptor's global vendor.
    pub fn effective_vendor_name(&self, store: &DescriptorStore) -> Option<String> {
        self.vendor_name
            .clone()
            .or_else(|| store.resolved_vendor_info().global)
    }

    /// Apply the gates that must hold before any stage is launched.
    pub fn validate(&self, store: &DescriptorStore) -> std::result::Result<(), ValidationError> {
        let id = self
            .effective_application_id(store)
            .ok_or(ValidationError::MissingApplicationId)?;
        if classify_identifier(&id) == IdentifierClass::Invalid {
            return Err(ValidationError::InvalidApplicationId { value: id });
        }

        let vendor = self
            .effective_vendor_name(store)
            .ok_or(ValidationError::MissingVendorName)?;
        if !is_vendor_name_acceptable(&vendor) {
            return Err(ValidationError::RejectedVendorName { name: vendor });
        }
        Ok(())
    }

    /// Write this metadata into the descriptor.
    ///
    /// Order: vendor-info pointer and deployment block (only when no
    /// deployment references a vendor-info variable yet), display name (only
    /// when it differs from the target name), vendor directive, application
    /// id. Returns the vendor-info key that was used. The first failed write
    /// aborts the rest.
    pub fn persist(&self, store: &mut DescriptorStore) -> Result<String> {
        let discovered = store.vendor_info_key();
        let vendor_info_key = self
            .vendor_info_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| discovered.clone())
            .unwrap_or_else(|| DEFAULT_VENDOR_INFO_KEY.to_string());

        if discovered.is_none() {
            store.write_value(
                &format!("{SYNTHESIZED_DEPLOYMENT}{PKG_PRERULES_SUFFIX}"),
                &vendor_info_key,
                WriteMode::ReplaceAll,
            )?;
            let deployments = store.read_values(KEY_DEPLOYMENT);
            if !deployments.iter().any(|d| d == SYNTHESIZED_DEPLOYMENT) {
                store.write_value(
                    KEY_DEPLOYMENT,
                    SYNTHESIZED_DEPLOYMENT,
                    WriteMode::AppendOneLine,
                )?;
            }
        }

        if let Some(name) = self.display_name.as_deref().filter(|n| !n.is_empty()) {
            if name != store.target_name() {
                store.write_value(KEY_DISPLAY_NAME, name, WriteMode::ReplaceAll)?;
            }
        }

        let vendor = self.effective_vendor_name(store).unwrap_or_default();
        store.write_value(
            &vendor_info_key,
            &VendorInfo::to_directive(&vendor, &self.localized_vendor_names),
            WriteMode::ReplaceAll,
        )?;

        if let Some(id) = self.effective_application_id(store) {
            store.write_value(KEY_APPLICATION_ID, id.trim(), WriteMode::ReplaceAll)?;
        }

        info!(
            event = "descriptor.persisted",
            path = %store.path().display(),
            vendor_info_key = %vendor_info_key,
        );
        Ok(vendor_info_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(contents: &str) -> (tempfile::TempDir, DescriptorStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hello.pro");
        std::fs::write(&path, contents).expect("write descriptor");
        let store = DescriptorStore::open(&path).expect("open descriptor");
        (dir, store)
    }

    #[test]
    fn test_csv_localized_names() {
        let mut descriptor = PackageDescriptor::default();
        descriptor.set_localized_vendor_names_csv(" Acme Oy, Acme ,,");
        assert_eq!(descriptor.localized_vendor_names, vec!["Acme Oy", "Acme"]);
    }

    #[test]
    fn test_validate_rejects_unparseable_id() {
        let (_dir, store) = store_with("TARGET = hello\n");
        let descriptor = PackageDescriptor::default()
            .with_vendor_name("Acme")
            .with_application_id("not-a-number");
        assert_eq!(
            descriptor.validate(&store),
            Err(ValidationError::InvalidApplicationId {
                value: "not-a-number".to_string()
            })
        );
    }

    #[test]
    fn test_validate_falls_back_to_descriptor_values() {
        let (_dir, store) = store_with(
            "DEPLOYMENT += dep\ndep.pkg_prerules = vinfo\nvinfo = \"%{\\\"Acme\\\"}\" \":\\\"Acme\\\"\"\nTARGET.UID3 = 0xE1234567\n",
        );
        let descriptor = PackageDescriptor::default();
        assert_eq!(descriptor.validate(&store), Ok(()));

        let seeded = PackageDescriptor::from_store(&store);
        assert_eq!(seeded.vendor_name.as_deref(), Some("Acme"));
        assert_eq!(seeded.vendor_info_key.as_deref(), Some("vinfo"));
        assert_eq!(seeded.application_id.as_deref(), Some("0xE1234567"));
    }

    #[test]
    fn test_validate_missing_and_rejected() {
        let (_dir, store) = store_with("TARGET = hello\n");
        assert_eq!(
            PackageDescriptor::default().validate(&store),
            Err(ValidationError::MissingApplicationId)
        );
        assert_eq!(
            PackageDescriptor::default()
                .with_application_id("0x20012345")
                .validate(&store),
            Err(ValidationError::MissingVendorName)
        );
        assert_eq!(
            PackageDescriptor::default()
                .with_application_id("0x20012345")
                .with_vendor_name("Vendor")
                .validate(&store),
            Err(ValidationError::RejectedVendorName {
                name: "Vendor".to_string()
            })
        );
    }

    #[test]
    fn test_persist_display_name_equal_to_target_is_not_written() {
        let (_dir, mut store) = store_with("TARGET = hello\n");
        PackageDescriptor::default()
            .with_display_name("hello")
            .with_vendor_name("Acme")
            .with_application_id("0x20012345")
            .persist(&mut store)
            .expect("persist");
        assert!(store.read_values(KEY_DISPLAY_NAME).is_empty());
        assert_eq!(store.resolved_display_name(), "hello");
    }

    #[test]
    fn test_persist_caller_key_gets_deployment_pointer() {
        let (_dir, mut store) = store_with("TARGET = hello\n");
        let descriptor = PackageDescriptor {
            vendor_info_key: Some("myvinfo".to_string()),
            ..PackageDescriptor::default()
        }
        .with_vendor_name("Acme")
        .with_application_id("0x20012345");

        let key = descriptor.persist(&mut store).expect("persist");
        assert_eq!(key, "myvinfo");
        assert_eq!(store.vendor_info_key().as_deref(), Some("myvinfo"));
        assert_eq!(store.resolved_vendor_info().global.as_deref(), Some("Acme"));

        descriptor.persist(&mut store).expect("persist again");
        assert_eq!(store.read_values(KEY_DEPLOYMENT), vec![SYNTHESIZED_DEPLOYMENT]);
    }
}
