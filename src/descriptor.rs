//! Extension descriptors: immutable metadata, lifecycle callbacks, and hook
//! declarations authored in code.
//!
//! A descriptor says everything the runtime needs to know about one
//! extension; it carries no mutable state of its own. Installed state lives
//! in [`crate::manager::ExtensionInstance`].

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Error;
use crate::blocks::BlockType;
use crate::hooks::{ExtensionPoint, HookCallback};

/// Optional lifecycle callbacks an extension may provide.
///
/// Both methods default to no-ops. `initialize` runs on every explicit
/// activation (never on boot hydration); `cleanup` runs on deactivation.
/// Either may fail, and the failure is surfaced to the caller of the
/// lifecycle operation.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn initialize(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// One hook declaration: extension point, callback, priority.
///
/// Declarations are inert until the owning extension is activated, at which
/// point the manager registers them with the pipeline.
#[derive(Clone)]
pub struct HookDecl {
    pub point: ExtensionPoint,
    pub callback: Arc<dyn HookCallback>,
    pub priority: i32,
}

impl HookDecl {
    pub fn new(point: ExtensionPoint, callback: Arc<dyn HookCallback>, priority: i32) -> Self {
        Self {
            point,
            callback,
            priority,
        }
    }
}

impl std::fmt::Debug for HookDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDecl")
            .field("point", &self.point)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Admin-menu entry contributed by an extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: String,
    pub label: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub order: i32,
}

/// Dashboard widget contributed by an extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    pub title: String,
    /// Dashboard area the widget renders into (e.g. `"sidebar"`).
    pub area: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Immutable description of one extension.
///
/// Created at process start while populating the registry and never mutated.
/// Descriptors are shared as `Arc`s: re-adding the identical `Arc` to the
/// registry is a no-op, which keeps module re-imports idempotent.
pub struct ExtensionDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub tags: BTreeSet<String>,
    pub dependencies: BTreeSet<String>,
    pub default_settings: Map<String, Value>,
    pub hooks: Vec<HookDecl>,
    pub menu_items: Vec<MenuItem>,
    pub widgets: Vec<Widget>,
    pub blocks: Vec<BlockType>,
    pub(crate) lifecycle: Option<Arc<dyn Lifecycle>>,
}

impl ExtensionDescriptor {
    /// Start building a descriptor with the three required fields.
    pub fn builder(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> DescriptorBuilder {
        DescriptorBuilder::new(id, name, version)
    }

    /// The lifecycle handler, if one was declared.
    pub fn lifecycle(&self) -> Option<&Arc<dyn Lifecycle>> {
        self.lifecycle.as_ref()
    }

    /// True if this descriptor declares `other` as a dependency.
    pub fn depends_on(&self, other: &str) -> bool {
        self.dependencies.contains(other)
    }
}

impl std::fmt::Debug for ExtensionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("dependencies", &self.dependencies)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Chained builder for [`ExtensionDescriptor`].
pub struct DescriptorBuilder {
    descriptor: ExtensionDescriptor,
}

impl DescriptorBuilder {
    fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            descriptor: ExtensionDescriptor {
                id: id.into(),
                name: name.into(),
                version: version.into(),
                description: String::new(),
                author: String::new(),
                tags: BTreeSet::new(),
                dependencies: BTreeSet::new(),
                default_settings: Map::new(),
                hooks: Vec::new(),
                menu_items: Vec::new(),
                widgets: Vec::new(),
                blocks: Vec::new(),
                lifecycle: None,
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.descriptor.author = author.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.descriptor.tags.insert(tag.into());
        self
    }

    pub fn dependency(mut self, id: impl Into<String>) -> Self {
        self.descriptor.dependencies.insert(id.into());
        self
    }

    pub fn default_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.descriptor.default_settings.insert(key.into(), value);
        self
    }

    pub fn lifecycle(mut self, handler: Arc<dyn Lifecycle>) -> Self {
        self.descriptor.lifecycle = Some(handler);
        self
    }

    pub fn hook(
        mut self,
        point: ExtensionPoint,
        callback: Arc<dyn HookCallback>,
        priority: i32,
    ) -> Self {
        self.descriptor
            .hooks
            .push(HookDecl::new(point, callback, priority));
        self
    }

    /// Declares a hook at [`crate::hooks::DEFAULT_HOOK_PRIORITY`].
    pub fn hook_default(self, point: ExtensionPoint, callback: Arc<dyn HookCallback>) -> Self {
        self.hook(point, callback, crate::hooks::DEFAULT_HOOK_PRIORITY)
    }

    pub fn menu_item(mut self, item: MenuItem) -> Self {
        self.descriptor.menu_items.push(item);
        self
    }

    pub fn widget(mut self, widget: Widget) -> Self {
        self.descriptor.widgets.push(widget);
        self
    }

    pub fn block(mut self, block: BlockType) -> Self {
        self.descriptor.blocks.push(block);
        self
    }

    pub fn build(self) -> Arc<ExtensionDescriptor> {
        Arc::new(self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::hook_fn;
    use serde_json::json;

    #[test]
    fn test_builder_minimal() {
        let d = ExtensionDescriptor::builder("seo", "SEO Toolkit", "1.2.0").build();
        assert_eq!(d.id, "seo");
        assert_eq!(d.name, "SEO Toolkit");
        assert_eq!(d.version, "1.2.0");
        assert!(d.dependencies.is_empty());
        assert!(d.hooks.is_empty());
        assert!(d.lifecycle().is_none());
    }

    #[test]
    fn test_builder_full() {
        let d = ExtensionDescriptor::builder("gallery", "Gallery", "0.4.1")
            .description("Image galleries")
            .author("Vellum Team")
            .tag("media")
            .tag("images")
            .dependency("media-library")
            .default_setting("columns", json!(3))
            .hook(
                ExtensionPoint::BeforeSave,
                hook_fn(|data, _ctx| async move { Ok(data) }),
                5,
            )
            .menu_item(MenuItem {
                id: "gallery-admin".into(),
                label: "Galleries".into(),
                path: "/admin/galleries".into(),
                icon: None,
                order: 20,
            })
            .build();

        assert!(d.depends_on("media-library"));
        assert!(!d.depends_on("seo"));
        assert_eq!(d.tags.len(), 2);
        assert_eq!(d.default_settings["columns"], json!(3));
        assert_eq!(d.hooks.len(), 1);
        assert_eq!(d.hooks[0].priority, 5);
        assert_eq!(d.menu_items.len(), 1);
    }

    #[tokio::test]
    async fn test_default_lifecycle_is_noop() {
        struct Quiet;

        #[async_trait]
        impl Lifecycle for Quiet {}

        let handler: Arc<dyn Lifecycle> = Arc::new(Quiet);
        assert!(handler.initialize().await.is_ok());
        assert!(handler.cleanup().await.is_ok());
    }
}
