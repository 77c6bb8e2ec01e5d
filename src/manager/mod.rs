//! Extension lifecycle manager.
//!
//! The stateful core of the runtime: one [`ExtensionInstance`] per installed
//! extension, a lifecycle state machine over inactive/active/error, persisted
//! state, lifecycle events, and hook wiring on activation/deactivation.
//!
//! Lifecycle operations for the *same* extension id are serialized through a
//! per-id mutex, so concurrent callers cannot interleave a transition (two
//! racing activations both passing the "already active" check, for example).
//! Operations on different ids run independently.

mod events;
mod instance;

pub use events::{LifecycleEvent, LifecycleEventKind, LifecycleListener, listener_fn};
pub use instance::{ExtensionInstance, ExtensionStatus};

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};

use crate::blocks::BlockType;
use crate::descriptor::{ExtensionDescriptor, MenuItem, Widget};
use crate::hooks::{HookPipeline, StatusProbe};
use crate::registry::ExtensionRegistry;
use crate::store::{ExtensionStore, InstanceRecord};
use crate::{Error, LifecyclePhase};

use events::EventDispatcher;

#[derive(Default)]
struct ManagerState {
    instances: HashMap<String, ExtensionInstance>,
    /// Installation order; aggregation reads preserve it.
    order: Vec<String>,
    booted: bool,
}

/// Drives the extension lifecycle and owns the installed-instance mapping.
pub struct ExtensionManager {
    registry: Arc<ExtensionRegistry>,
    pipeline: Arc<HookPipeline>,
    store: Arc<dyn ExtensionStore>,
    state: RwLock<ManagerState>,
    /// Per-extension-id lifecycle locks. Entries are kept for the process
    /// lifetime so one id never has two live mutexes.
    lifecycle_locks: DashMap<String, Arc<Mutex<()>>>,
    events: EventDispatcher,
}

impl ExtensionManager {
    /// Creates a manager and attaches it to the pipeline as the owner-status
    /// probe.
    pub fn new(
        registry: Arc<ExtensionRegistry>,
        pipeline: Arc<HookPipeline>,
        store: Arc<dyn ExtensionStore>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            registry,
            pipeline,
            store,
            state: RwLock::new(ManagerState::default()),
            lifecycle_locks: DashMap::new(),
            events: EventDispatcher::new(),
        });
        let probe = Arc::downgrade(&manager) as Weak<dyn StatusProbe>;
        manager.pipeline.attach_probe(probe);
        manager
    }

    /// Hydrates instances from the store. Idempotent; only the first call
    /// reads the store.
    ///
    /// Persisted statuses are kept verbatim, `active` included, and no
    /// descriptor `initialize` callback runs here: a process restart must
    /// not silently re-invoke side-effecting setup code.
    pub async fn initialize(&self) -> Result<(), Error> {
        let mut state = self.state.write().await;
        if state.booted {
            tracing::debug!("extension manager already initialized");
            return Ok(());
        }

        let mut records = self.store.load_all().await?;
        records.sort_by(|a, b| {
            a.installed_at
                .cmp(&b.installed_at)
                .then_with(|| a.extension_id.cmp(&b.extension_id))
        });
        let mut active_ids = Vec::new();
        for record in records {
            let instance: ExtensionInstance = record.into();
            if instance.is_active() {
                active_ids.push(instance.extension_id.clone());
            }
            state.order.push(instance.extension_id.clone());
            state.instances.insert(instance.extension_id.clone(), instance);
        }
        // Hooks do not survive a restart on their own: re-register the ones
        // declared by every still-active instance, without touching its
        // `initialize` callback.
        for id in active_ids {
            match self.registry.get(&id) {
                Some(descriptor) => self.register_declared_hooks(&descriptor).await,
                None => {
                    tracing::warn!(
                        id,
                        "active instance has no cataloged descriptor, hooks not restored"
                    );
                }
            }
        }
        state.booted = true;
        tracing::info!(
            count = state.order.len(),
            store = self.store.name(),
            "extension manager initialized"
        );
        Ok(())
    }

    fn lifecycle_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.lifecycle_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn persist(&self, instance: &ExtensionInstance) -> Result<(), Error> {
        self.store.save(InstanceRecord::from(instance)).await
    }

    /// Installs an extension: creates its inactive instance.
    ///
    /// Every declared dependency must resolve to a currently *active*
    /// instance. The check happens here, once: dependencies are a
    /// precondition of installing, not a per-activation gate.
    pub async fn register(
        &self,
        descriptor: Arc<ExtensionDescriptor>,
    ) -> Result<ExtensionInstance, Error> {
        let lock = self.lifecycle_lock(&descriptor.id);
        let _guard = lock.lock().await;

        let instance = {
            let mut state = self.state.write().await;
            if state.instances.contains_key(&descriptor.id) {
                return Err(Error::AlreadyInstalled {
                    id: descriptor.id.clone(),
                });
            }
            for dependency in &descriptor.dependencies {
                let satisfied = state
                    .instances
                    .get(dependency)
                    .is_some_and(ExtensionInstance::is_active);
                if !satisfied {
                    return Err(Error::DependencyUnsatisfied {
                        id: descriptor.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
            let instance = ExtensionInstance::new(&descriptor);
            state.order.push(instance.extension_id.clone());
            state
                .instances
                .insert(instance.extension_id.clone(), instance.clone());
            instance
        };

        self.persist(&instance).await?;
        tracing::info!(
            id = %instance.extension_id,
            version = %instance.version,
            "extension installed"
        );
        self.events
            .emit(LifecycleEvent::new(
                LifecycleEventKind::Installed,
                &instance.extension_id,
            ))
            .await;
        Ok(instance)
    }

    /// Uninstalls an extension, deactivating it first if needed.
    pub async fn unregister(&self, id: &str) -> Result<(), Error> {
        let lock = self.lifecycle_lock(id);
        let _guard = lock.lock().await;

        let is_active = {
            let state = self.state.read().await;
            state
                .instances
                .get(id)
                .ok_or_else(|| Error::UnknownExtension(id.to_string()))?
                .is_active()
        };
        if is_active {
            self.deactivate_locked(id).await?;
        }

        {
            let mut state = self.state.write().await;
            state.instances.remove(id);
            state.order.retain(|entry| entry != id);
        }
        self.store.delete(id).await?;
        tracing::info!(id, "extension uninstalled");
        self.events
            .emit(LifecycleEvent::new(LifecycleEventKind::Uninstalled, id))
            .await;
        Ok(())
    }

    /// Activates an installed extension and wires its hooks.
    ///
    /// A failing `initialize` leaves the instance in `error` (not
    /// `inactive`), so the admin UI can distinguish "never activated" from
    /// "activation attempted and failed"; the failure is returned to the
    /// caller.
    pub async fn activate(&self, id: &str) -> Result<(), Error> {
        let lock = self.lifecycle_lock(id);
        let _guard = lock.lock().await;
        self.activate_locked(id).await
    }

    async fn activate_locked(&self, id: &str) -> Result<(), Error> {
        {
            let state = self.state.read().await;
            let instance = state
                .instances
                .get(id)
                .ok_or_else(|| Error::UnknownExtension(id.to_string()))?;
            if instance.is_active() {
                tracing::debug!(id, "already active, nothing to do");
                return Ok(());
            }
        }

        let descriptor = self
            .registry
            .get(id)
            .ok_or_else(|| Error::UnknownDescriptor(id.to_string()))?;

        if let Some(lifecycle) = descriptor.lifecycle()
            && let Err(e) = lifecycle.initialize().await
        {
            let message = e.to_string();
            let snapshot = {
                let mut state = self.state.write().await;
                let Some(instance) = state.instances.get_mut(id) else {
                    return Err(Error::UnknownExtension(id.to_string()));
                };
                instance.status = ExtensionStatus::Error;
                instance.error = Some(message.clone());
                instance.touch();
                instance.clone()
            };
            self.persist(&snapshot).await?;
            tracing::warn!(id, error = %message, "extension activation failed");
            return Err(Error::Lifecycle {
                id: id.to_string(),
                phase: LifecyclePhase::Initialize,
                message,
            });
        }

        let snapshot = {
            let mut state = self.state.write().await;
            let Some(instance) = state.instances.get_mut(id) else {
                return Err(Error::UnknownExtension(id.to_string()));
            };
            instance.status = ExtensionStatus::Active;
            instance.error = None;
            instance.touch();
            instance.clone()
        };
        self.persist(&snapshot).await?;
        tracing::info!(id, "extension activated");
        self.events
            .emit(LifecycleEvent::new(LifecycleEventKind::Activated, id))
            .await;

        self.register_declared_hooks(&descriptor).await;
        Ok(())
    }

    async fn register_declared_hooks(&self, descriptor: &Arc<ExtensionDescriptor>) {
        for decl in &descriptor.hooks {
            self.pipeline
                .register(
                    &descriptor.id,
                    decl.point.clone(),
                    decl.callback.clone(),
                    decl.priority,
                )
                .await;
        }
    }

    /// Deactivates an active (or errored) extension.
    ///
    /// Hooks are unregistered and the instance forced to `inactive` whether
    /// or not the extension's `cleanup` succeeds; hooks must not survive a
    /// deactivation attempt. A cleanup failure is returned only after those
    /// steps are done.
    pub async fn deactivate(&self, id: &str) -> Result<(), Error> {
        let lock = self.lifecycle_lock(id);
        let _guard = lock.lock().await;
        self.deactivate_locked(id).await
    }

    async fn deactivate_locked(&self, id: &str) -> Result<(), Error> {
        {
            let state = self.state.read().await;
            let instance = state
                .instances
                .get(id)
                .ok_or_else(|| Error::UnknownExtension(id.to_string()))?;
            if instance.status == ExtensionStatus::Inactive {
                tracing::debug!(id, "already inactive, nothing to do");
                return Ok(());
            }
        }

        let descriptor = self.registry.get(id);
        let cleanup_result = match descriptor.as_ref().and_then(|d| d.lifecycle()) {
            Some(lifecycle) => lifecycle.cleanup().await,
            None => Ok(()),
        };

        self.pipeline.unregister(id).await;

        let snapshot = {
            let mut state = self.state.write().await;
            let Some(instance) = state.instances.get_mut(id) else {
                return Err(Error::UnknownExtension(id.to_string()));
            };
            instance.status = ExtensionStatus::Inactive;
            instance.error = None;
            instance.touch();
            instance.clone()
        };
        self.persist(&snapshot).await?;
        self.events
            .emit(LifecycleEvent::new(LifecycleEventKind::Deactivated, id))
            .await;

        match cleanup_result {
            Ok(()) => {
                tracing::info!(id, "extension deactivated");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(id, error = %message, "cleanup failed during deactivation");
                Err(Error::Lifecycle {
                    id: id.to_string(),
                    phase: LifecyclePhase::Cleanup,
                    message,
                })
            }
        }
    }

    /// Shallow-merges the given keys into the instance's settings.
    pub async fn update_settings(
        &self,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<(), Error> {
        let lock = self.lifecycle_lock(id);
        let _guard = lock.lock().await;

        let snapshot = {
            let mut state = self.state.write().await;
            let Some(instance) = state.instances.get_mut(id) else {
                return Err(Error::UnknownExtension(id.to_string()));
            };
            for (key, value) in partial {
                instance.settings.insert(key, value);
            }
            instance.touch();
            instance.clone()
        };
        self.persist(&snapshot).await?;
        self.events
            .emit(LifecycleEvent::new(LifecycleEventKind::SettingsChanged, id))
            .await;
        Ok(())
    }

    /// Subscribes a listener for one event kind.
    pub async fn subscribe(
        &self,
        kind: LifecycleEventKind,
        listener: Arc<dyn LifecycleListener>,
    ) {
        self.events.subscribe(kind, listener).await;
    }

    // ---- read surface ----------------------------------------------------

    /// All instances in installation order.
    pub async fn all_instances(&self) -> Vec<ExtensionInstance> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|id| state.instances.get(id))
            .cloned()
            .collect()
    }

    pub async fn instance(&self, id: &str) -> Option<ExtensionInstance> {
        self.state.read().await.instances.get(id).cloned()
    }

    pub async fn is_active(&self, id: &str) -> bool {
        self.state
            .read()
            .await
            .instances
            .get(id)
            .is_some_and(ExtensionInstance::is_active)
    }

    pub async fn settings(&self, id: &str) -> Option<Map<String, Value>> {
        self.state
            .read()
            .await
            .instances
            .get(id)
            .map(|instance| instance.settings.clone())
    }

    /// Descriptors of all active instances, in installation order.
    pub async fn active_extensions(&self) -> Vec<Arc<ExtensionDescriptor>> {
        let active_ids: Vec<String> = {
            let state = self.state.read().await;
            state
                .order
                .iter()
                .filter(|id| {
                    state
                        .instances
                        .get(*id)
                        .is_some_and(ExtensionInstance::is_active)
                })
                .cloned()
                .collect()
        };
        active_ids
            .iter()
            .filter_map(|id| self.registry.get(id))
            .collect()
    }

    /// Menu items contributed by active extensions, in installation order.
    pub async fn menu_items(&self) -> Vec<MenuItem> {
        self.active_extensions()
            .await
            .iter()
            .flat_map(|d| d.menu_items.iter().cloned())
            .collect()
    }

    /// Widgets contributed by active extensions, in installation order.
    pub async fn widgets(&self) -> Vec<Widget> {
        self.active_extensions()
            .await
            .iter()
            .flat_map(|d| d.widgets.iter().cloned())
            .collect()
    }

    /// Block types contributed by active extensions, in installation order.
    pub async fn blocks(&self) -> Vec<BlockType> {
        self.active_extensions()
            .await
            .iter()
            .flat_map(|d| d.blocks.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl StatusProbe for ExtensionManager {
    async fn is_active(&self, extension_id: &str) -> bool {
        ExtensionManager::is_active(self, extension_id).await
    }
}

impl std::fmt::Debug for ExtensionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionManager")
            .field("store", &self.store.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Lifecycle;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn fixture() -> (Arc<ExtensionRegistry>, Arc<HookPipeline>, Arc<MemoryStore>) {
        (
            Arc::new(ExtensionRegistry::new()),
            Arc::new(HookPipeline::new()),
            Arc::new(MemoryStore::new()),
        )
    }

    fn manager_with(
        registry: &Arc<ExtensionRegistry>,
        pipeline: &Arc<HookPipeline>,
        store: &Arc<MemoryStore>,
    ) -> Arc<ExtensionManager> {
        ExtensionManager::new(registry.clone(), pipeline.clone(), store.clone())
    }

    fn cataloged(registry: &ExtensionRegistry, id: &str) -> Arc<ExtensionDescriptor> {
        let d = ExtensionDescriptor::builder(id, format!("{id} extension"), "1.0.0").build();
        assert!(registry.add(d.clone()).is_empty());
        d
    }

    #[tokio::test]
    async fn test_register_creates_inactive_instance() {
        let (registry, pipeline, store) = fixture();
        let manager = manager_with(&registry, &pipeline, &store);
        let d = cataloged(&registry, "seo");

        let instance = manager.register(d).await.unwrap();
        assert_eq!(instance.status, ExtensionStatus::Inactive);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let (registry, pipeline, store) = fixture();
        let manager = manager_with(&registry, &pipeline, &store);
        let d = cataloged(&registry, "seo");

        manager.register(d.clone()).await.unwrap();
        let err = manager.register(d).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInstalled { .. }));
    }

    #[tokio::test]
    async fn test_dependency_must_be_active_at_register() {
        let (registry, pipeline, store) = fixture();
        let manager = manager_with(&registry, &pipeline, &store);
        let base = cataloged(&registry, "media-library");
        let dependent = ExtensionDescriptor::builder("gallery", "Gallery", "1.0.0")
            .dependency("media-library")
            .build();
        registry.add(dependent.clone());

        // Not installed at all.
        let err = manager.register(dependent.clone()).await.unwrap_err();
        assert!(matches!(err, Error::DependencyUnsatisfied { .. }));

        // Installed but inactive still does not satisfy.
        manager.register(base).await.unwrap();
        let err = manager.register(dependent.clone()).await.unwrap_err();
        assert!(
            matches!(err, Error::DependencyUnsatisfied { ref dependency, .. } if dependency == "media-library")
        );
        assert!(manager.instance("gallery").await.is_none());

        // Active dependency lets the retried register succeed.
        manager.activate("media-library").await.unwrap();
        manager.register(dependent).await.unwrap();
    }

    #[tokio::test]
    async fn test_activate_unknown_instance() {
        let (registry, pipeline, store) = fixture();
        let manager = manager_with(&registry, &pipeline, &store);
        let err = manager.activate("ghost").await.unwrap_err();
        assert!(matches!(err, Error::UnknownExtension(_)));
    }

    #[tokio::test]
    async fn test_failed_initialize_leaves_error_status() {
        struct Broken;

        #[async_trait]
        impl Lifecycle for Broken {
            async fn initialize(&self) -> Result<(), Error> {
                Err(Error::callback("no database"))
            }
        }

        let (registry, pipeline, store) = fixture();
        let manager = manager_with(&registry, &pipeline, &store);
        let d = ExtensionDescriptor::builder("broken", "Broken", "1.0.0")
            .lifecycle(Arc::new(Broken))
            .build();
        registry.add(d.clone());
        manager.register(d).await.unwrap();

        let err = manager.activate("broken").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle {
                phase: LifecyclePhase::Initialize,
                ..
            }
        ));

        let instance = manager.instance("broken").await.unwrap();
        assert_eq!(instance.status, ExtensionStatus::Error);
        assert!(instance.error.as_deref().unwrap().contains("no database"));

        // The persisted record carries the error status too.
        let records = store.load_all().await.unwrap();
        assert_eq!(records[0].status, ExtensionStatus::Error);
    }

    #[tokio::test]
    async fn test_cleanup_failure_still_deactivates() {
        struct BadCleanup;

        #[async_trait]
        impl Lifecycle for BadCleanup {
            async fn cleanup(&self) -> Result<(), Error> {
                Err(Error::callback("teardown exploded"))
            }
        }

        let (registry, pipeline, store) = fixture();
        let manager = manager_with(&registry, &pipeline, &store);
        let d = ExtensionDescriptor::builder("messy", "Messy", "1.0.0")
            .lifecycle(Arc::new(BadCleanup))
            .hook(
                crate::hooks::ExtensionPoint::BeforeSave,
                crate::hooks::hook_fn(|data, _ctx| async move { Ok(data) }),
                1,
            )
            .build();
        registry.add(d.clone());
        manager.register(d).await.unwrap();
        manager.activate("messy").await.unwrap();
        assert_eq!(
            pipeline
                .hook_count(&crate::hooks::ExtensionPoint::BeforeSave)
                .await,
            1
        );

        let err = manager.deactivate("messy").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle {
                phase: LifecyclePhase::Cleanup,
                ..
            }
        ));

        // Forced inactive and unwired despite the cleanup failure.
        let instance = manager.instance("messy").await.unwrap();
        assert_eq!(instance.status, ExtensionStatus::Inactive);
        assert!(
            !pipeline
                .has_hooks(&crate::hooks::ExtensionPoint::BeforeSave)
                .await
        );
    }

    #[tokio::test]
    async fn test_unregister_active_deactivates_first() {
        let (registry, pipeline, store) = fixture();
        let manager = manager_with(&registry, &pipeline, &store);
        let d = cataloged(&registry, "seo");
        manager.register(d).await.unwrap();
        manager.activate("seo").await.unwrap();

        manager.unregister("seo").await.unwrap();
        assert!(manager.instance("seo").await.is_none());
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_settings_shallow_merge() {
        let (registry, pipeline, store) = fixture();
        let manager = manager_with(&registry, &pipeline, &store);
        let d = cataloged(&registry, "seo");
        manager.register(d).await.unwrap();

        let mut first = Map::new();
        first.insert("a".into(), json!(1));
        manager.update_settings("seo", first).await.unwrap();

        let mut second = Map::new();
        second.insert("b".into(), json!(2));
        manager.update_settings("seo", second).await.unwrap();

        let settings = manager.settings("seo").await.unwrap();
        assert_eq!(settings["a"], json!(1));
        assert_eq!(settings["b"], json!(2));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent_and_preserves_status() {
        let (registry, pipeline, store) = fixture();
        {
            let manager = manager_with(&registry, &pipeline, &store);
            let d = cataloged(&registry, "seo");
            manager.register(d).await.unwrap();
            manager.activate("seo").await.unwrap();
        }

        // A fresh manager over the same store sees the active instance
        // without re-running any lifecycle callback.
        let manager = manager_with(&registry, &pipeline, &store);
        manager.initialize().await.unwrap();
        manager.initialize().await.unwrap();
        assert!(manager.is_active("seo").await);
        assert_eq!(manager.all_instances().await.len(), 1);
    }

    #[tokio::test]
    async fn test_aggregations_follow_install_order() {
        let (registry, pipeline, store) = fixture();
        let manager = manager_with(&registry, &pipeline, &store);

        let first = ExtensionDescriptor::builder("alpha", "Alpha", "1.0.0")
            .menu_item(MenuItem {
                id: "alpha-menu".into(),
                label: "Alpha".into(),
                path: "/alpha".into(),
                icon: None,
                order: 0,
            })
            .build();
        let second = ExtensionDescriptor::builder("beta", "Beta", "1.0.0")
            .menu_item(MenuItem {
                id: "beta-menu".into(),
                label: "Beta".into(),
                path: "/beta".into(),
                icon: None,
                order: 0,
            })
            .build();
        registry.add(first.clone());
        registry.add(second.clone());

        manager.register(first).await.unwrap();
        manager.register(second).await.unwrap();
        manager.activate("alpha").await.unwrap();
        manager.activate("beta").await.unwrap();

        let items = manager.menu_items().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "alpha-menu");
        assert_eq!(items[1].id, "beta-menu");

        // Deactivated extensions drop out of the projections.
        manager.deactivate("alpha").await.unwrap();
        let items = manager.menu_items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "beta-menu");
    }

    #[tokio::test]
    async fn test_activate_twice_registers_hooks_once() {
        let (registry, pipeline, store) = fixture();
        let manager = manager_with(&registry, &pipeline, &store);
        let d = ExtensionDescriptor::builder("seo", "SEO", "1.0.0")
            .hook(
                crate::hooks::ExtensionPoint::BeforeSave,
                crate::hooks::hook_fn(|data, _ctx| async move { Ok(data) }),
                1,
            )
            .build();
        registry.add(d.clone());
        manager.register(d).await.unwrap();

        manager.activate("seo").await.unwrap();
        manager.activate("seo").await.unwrap();
        assert_eq!(
            pipeline
                .hook_count(&crate::hooks::ExtensionPoint::BeforeSave)
                .await,
            1
        );
    }
}
