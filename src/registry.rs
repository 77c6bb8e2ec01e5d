//! Catalog of extension descriptors present in the running process.
//!
//! Being cataloged is independent of being installed: the registry answers
//! "which extensions exist in this build", the manager answers "which are
//! installed and in what state".

use std::sync::{Arc, LazyLock, RwLock};

use regex::Regex;

use crate::Error;
use crate::descriptor::ExtensionDescriptor;

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_-]+$").expect("valid id pattern"));

const DUPLICATE_ID_MSG: &str = "already registered with a different descriptor";

/// One structural problem found while validating a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: String,
}

impl ValidationIssue {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Thread-safe descriptor catalog with validation, tagging, and search.
#[derive(Default)]
pub struct ExtensionRegistry {
    descriptors: RwLock<Vec<Arc<ExtensionDescriptor>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a descriptor against the catalog.
    ///
    /// Returns the issues found instead of failing, so callers decide how to
    /// surface them. An empty list means the descriptor is acceptable.
    pub fn validate(&self, descriptor: &Arc<ExtensionDescriptor>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if descriptor.id.is_empty() {
            issues.push(ValidationIssue::new("id", "must not be empty"));
        } else if !ID_PATTERN.is_match(&descriptor.id) {
            issues.push(ValidationIssue::new(
                "id",
                "only lowercase letters, digits, '-' and '_' are allowed",
            ));
        }

        if descriptor.name.is_empty() {
            issues.push(ValidationIssue::new("name", "must not be empty"));
        }

        if let Err(e) = semver::Version::parse(&descriptor.version) {
            issues.push(ValidationIssue::new(
                "version",
                format!("not a semantic version: {e}"),
            ));
        }

        let descriptors = self.descriptors.read().expect("registry lock poisoned");
        if let Some(existing) = descriptors.iter().find(|d| d.id == descriptor.id)
            && !Arc::ptr_eq(existing, descriptor)
        {
            issues.push(ValidationIssue::new("id", DUPLICATE_ID_MSG));
        }

        issues
    }

    /// Validates and stores a descriptor.
    ///
    /// Re-adding the identical `Arc` is a no-op (idempotent module
    /// re-import). An id collision with a *different* descriptor is refused
    /// and logged; the original stays retrievable. Returns the issues found;
    /// empty means the descriptor was stored (or already present).
    pub fn add(&self, descriptor: Arc<ExtensionDescriptor>) -> Vec<ValidationIssue> {
        {
            let descriptors = self.descriptors.read().expect("registry lock poisoned");
            if descriptors.iter().any(|d| Arc::ptr_eq(d, &descriptor)) {
                tracing::debug!(id = %descriptor.id, "descriptor already cataloged, no-op");
                return Vec::new();
            }
        }

        let issues = self.validate(&descriptor);
        if !issues.is_empty() {
            tracing::warn!(
                id = %descriptor.id,
                issues = issues.len(),
                "refusing invalid descriptor: {}",
                issues
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ")
            );
            return issues;
        }

        let mut descriptors = self.descriptors.write().expect("registry lock poisoned");
        // Re-check under the write lock: another thread may have won the race.
        if descriptors.iter().any(|d| d.id == descriptor.id) {
            if descriptors.iter().any(|d| Arc::ptr_eq(d, &descriptor)) {
                return Vec::new();
            }
            return vec![ValidationIssue::new("id", DUPLICATE_ID_MSG)];
        }
        tracing::debug!(id = %descriptor.id, version = %descriptor.version, "descriptor cataloged");
        descriptors.push(descriptor);
        Vec::new()
    }

    /// Like [`add`](Self::add) but collapses issues into a single error.
    ///
    /// An id collision surfaces as [`Error::AlreadyRegistered`]; every other
    /// problem becomes [`Error::Validation`].
    pub fn try_add(&self, descriptor: Arc<ExtensionDescriptor>) -> Result<(), Error> {
        let id = descriptor.id.clone();
        let issues = self.add(descriptor);
        if issues.is_empty() {
            Ok(())
        } else if issues
            .iter()
            .any(|i| i.field == "id" && i.message == DUPLICATE_ID_MSG)
        {
            Err(Error::AlreadyRegistered { id })
        } else {
            Err(Error::Validation(
                issues
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            ))
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<ExtensionDescriptor>> {
        self.descriptors
            .read()
            .expect("registry lock poisoned")
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// All descriptors in registration order.
    pub fn all(&self) -> Vec<Arc<ExtensionDescriptor>> {
        self.descriptors
            .read()
            .expect("registry lock poisoned")
            .clone()
    }

    pub fn by_tag(&self, tag: &str) -> Vec<Arc<ExtensionDescriptor>> {
        self.descriptors
            .read()
            .expect("registry lock poisoned")
            .iter()
            .filter(|d| d.tags.contains(tag))
            .cloned()
            .collect()
    }

    /// Case-insensitive keyword search over name, description, and tags.
    pub fn search(&self, keyword: &str) -> Vec<Arc<ExtensionDescriptor>> {
        let keyword = keyword.to_lowercase();
        self.descriptors
            .read()
            .expect("registry lock poisoned")
            .iter()
            .filter(|d| {
                d.name.to_lowercase().contains(&keyword)
                    || d.description.to_lowercase().contains(&keyword)
                    || d.tags.iter().any(|t| t.to_lowercase().contains(&keyword))
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors
            .read()
            .expect("registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.all().iter().map(|d| d.id.clone()).collect();
        f.debug_struct("ExtensionRegistry")
            .field("descriptors", &ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, name: &str) -> Arc<ExtensionDescriptor> {
        ExtensionDescriptor::builder(id, name, "1.0.0")
            .description("test descriptor")
            .build()
    }

    #[test]
    fn test_add_and_get() {
        let registry = ExtensionRegistry::new();
        assert!(registry.add(descriptor("seo", "SEO Toolkit")).is_empty());
        assert!(registry.has("seo"));
        assert_eq!(registry.get("seo").unwrap().name, "SEO Toolkit");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_re_add_identical_is_noop() {
        let registry = ExtensionRegistry::new();
        let d = descriptor("seo", "SEO Toolkit");
        assert!(registry.add(d.clone()).is_empty());
        assert!(registry.add(d).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_colliding_id_refused_original_kept() {
        let registry = ExtensionRegistry::new();
        assert!(registry.add(descriptor("seo", "Original")).is_empty());

        let issues = registry.add(descriptor("seo", "Impostor"));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "id");
        assert_eq!(registry.get("seo").unwrap().name, "Original");
    }

    #[test]
    fn test_invalid_id_charset() {
        let registry = ExtensionRegistry::new();
        let issues = registry.add(descriptor("Bad Id!", "Broken"));
        assert!(issues.iter().any(|i| i.field == "id"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_version() {
        let registry = ExtensionRegistry::new();
        let d = ExtensionDescriptor::builder("ok-id", "Ok", "not-a-version").build();
        let issues = registry.add(d);
        assert!(issues.iter().any(|i| i.field == "version"));
    }

    #[test]
    fn test_missing_required_fields() {
        let registry = ExtensionRegistry::new();
        let d = ExtensionDescriptor::builder("", "", "1.0.0").build();
        let issues = registry.validate(&d);
        assert!(issues.iter().any(|i| i.field == "id"));
        assert!(issues.iter().any(|i| i.field == "name"));
    }

    #[test]
    fn test_try_add_combines_issues() {
        let registry = ExtensionRegistry::new();
        let d = ExtensionDescriptor::builder("", "", "nope").build();
        let err = registry.try_add(d).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("id:"));
        assert!(msg.contains("name:"));
        assert!(msg.contains("version:"));
    }

    #[test]
    fn test_try_add_reports_id_collision() {
        let registry = ExtensionRegistry::new();
        registry
            .try_add(ExtensionDescriptor::builder("gallery", "Gallery", "1.0.0").build())
            .unwrap();
        let err = registry
            .try_add(ExtensionDescriptor::builder("gallery", "Other Gallery", "2.0.0").build())
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered { ref id } if id == "gallery"));
    }

    #[test]
    fn test_by_tag_and_search() {
        let registry = ExtensionRegistry::new();
        registry.add(
            ExtensionDescriptor::builder("gallery", "Photo Gallery", "1.0.0")
                .description("Image galleries for posts")
                .tag("media")
                .build(),
        );
        registry.add(
            ExtensionDescriptor::builder("seo", "SEO Toolkit", "2.1.0")
                .description("Meta tags and sitemaps")
                .tag("marketing")
                .build(),
        );

        assert_eq!(registry.by_tag("media").len(), 1);
        assert_eq!(registry.by_tag("nonexistent").len(), 0);

        assert_eq!(registry.search("GALLERY").len(), 1);
        assert_eq!(registry.search("sitemaps").len(), 1);
        assert_eq!(registry.search("marketing").len(), 1);
        assert!(registry.search("payments").is_empty());
    }
}
