//! Runtime context wiring the registry, pipeline, and manager together.
//!
//! The host creates one `ExtensionRuntime` at boot and passes it (or its
//! parts) to whatever needs them. Holding the singletons in an explicit
//! context object instead of module-level globals keeps tests isolated and
//! makes the per-id lifecycle locking a visible field of the manager rather
//! than ambient state.

use std::sync::Arc;

use crate::Error;
use crate::blocks::BlockRegistry;
use crate::config::RuntimeConfig;
use crate::hooks::HookPipeline;
use crate::manager::ExtensionManager;
use crate::registry::ExtensionRegistry;
use crate::store::{ExtensionStore, JsonFileStore, MemoryStore};

/// Owns the process-wide extension runtime components.
#[derive(Debug)]
pub struct ExtensionRuntime {
    registry: Arc<ExtensionRegistry>,
    blocks: Arc<BlockRegistry>,
    pipeline: Arc<HookPipeline>,
    manager: Arc<ExtensionManager>,
}

impl ExtensionRuntime {
    /// Builds a runtime over an explicit store.
    pub fn new(config: RuntimeConfig, store: Arc<dyn ExtensionStore>) -> Self {
        let registry = Arc::new(ExtensionRegistry::new());
        let blocks = Arc::new(BlockRegistry::new());
        let pipeline = Arc::new(HookPipeline::with_timeout(config.hook_timeout));
        let manager = ExtensionManager::new(registry.clone(), pipeline.clone(), store);
        Self {
            registry,
            blocks,
            pipeline,
            manager,
        }
    }

    /// Builds a runtime from configuration: a JSON file store when
    /// `store_dir` is set, the in-memory store otherwise.
    pub async fn from_config(config: RuntimeConfig) -> Result<Self, Error> {
        let store: Arc<dyn ExtensionStore> = match &config.store_dir {
            Some(dir) => Arc::new(JsonFileStore::open(dir.clone()).await?),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(config, store))
    }

    /// Runtime with default configuration and an in-memory store.
    pub fn in_memory() -> Self {
        Self::new(RuntimeConfig::default(), Arc::new(MemoryStore::new()))
    }

    /// Hydrates installed instances from the store. Call once at boot.
    pub async fn initialize(&self) -> Result<(), Error> {
        self.manager.initialize().await
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    pub fn blocks(&self) -> &Arc<BlockRegistry> {
        &self.blocks
    }

    pub fn pipeline(&self) -> &Arc<HookPipeline> {
        &self.pipeline
    }

    pub fn manager(&self) -> &Arc<ExtensionManager> {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ExtensionDescriptor;

    #[tokio::test]
    async fn test_in_memory_runtime() {
        let runtime = ExtensionRuntime::in_memory();
        runtime.initialize().await.unwrap();

        let d = ExtensionDescriptor::builder("seo", "SEO Toolkit", "1.0.0").build();
        runtime.registry().try_add(d.clone()).unwrap();
        runtime.manager().register(d).await.unwrap();
        runtime.manager().activate("seo").await.unwrap();
        assert!(runtime.manager().is_active("seo").await);
    }

    #[tokio::test]
    async fn test_from_config_with_store_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::default().with_store_dir(dir.path());
        let runtime = ExtensionRuntime::from_config(config).await.unwrap();
        runtime.initialize().await.unwrap();

        let d = ExtensionDescriptor::builder("seo", "SEO Toolkit", "1.0.0").build();
        runtime.registry().try_add(d.clone()).unwrap();
        runtime.manager().register(d).await.unwrap();

        // A second runtime over the same directory sees the installation.
        let config = RuntimeConfig::default().with_store_dir(dir.path());
        let reopened = ExtensionRuntime::from_config(config).await.unwrap();
        reopened.initialize().await.unwrap();
        assert!(reopened.manager().instance("seo").await.is_some());
    }
}
