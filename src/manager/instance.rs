//! Installed-extension state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::descriptor::ExtensionDescriptor;

/// Lifecycle state of an installed extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionStatus {
    /// Installed but not running; hooks are not wired.
    Inactive,

    /// Running; hooks are wired into the pipeline.
    Active,

    /// Last activation attempt failed; the message is on the instance.
    Error,
}

impl std::fmt::Display for ExtensionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtensionStatus::Inactive => write!(f, "inactive"),
            ExtensionStatus::Active => write!(f, "active"),
            ExtensionStatus::Error => write!(f, "error"),
        }
    }
}

/// The mutable installation record for one extension in this deployment.
///
/// At most one instance exists per descriptor id. Created by
/// `ExtensionManager::register`, mutated by lifecycle operations, destroyed
/// by `unregister`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionInstance {
    pub extension_id: String,
    pub status: ExtensionStatus,
    pub settings: Map<String, Value>,
    pub version: String,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl ExtensionInstance {
    /// Fresh inactive instance, settings seeded from the descriptor's
    /// defaults.
    pub fn new(descriptor: &ExtensionDescriptor) -> Self {
        let now = Utc::now();
        Self {
            extension_id: descriptor.id.clone(),
            status: ExtensionStatus::Inactive,
            settings: descriptor.default_settings.clone(),
            version: descriptor.version.clone(),
            installed_at: now,
            updated_at: now,
            error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ExtensionStatus::Active
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_instance_seeded_from_defaults() {
        let d = ExtensionDescriptor::builder("seo", "SEO Toolkit", "1.0.0")
            .default_setting("sitemap", json!(true))
            .build();
        let instance = ExtensionInstance::new(&d);

        assert_eq!(instance.extension_id, "seo");
        assert_eq!(instance.status, ExtensionStatus::Inactive);
        assert_eq!(instance.settings["sitemap"], json!(true));
        assert_eq!(instance.version, "1.0.0");
        assert!(instance.error.is_none());
        assert!(!instance.is_active());
    }

    #[test]
    fn test_status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&ExtensionStatus::Inactive).unwrap(),
            "\"inactive\""
        );
        let status: ExtensionStatus = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(status, ExtensionStatus::Error);
        assert_eq!(status.to_string(), "error");
    }
}
