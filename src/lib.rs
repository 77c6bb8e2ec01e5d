//! # vellum-extensions
//!
//! Extension runtime for the Vellum CMS.
//!
//! This crate provides the three pieces the host application wires together:
//! a catalog of extension descriptors ([`ExtensionRegistry`]), a lifecycle
//! manager that installs, activates, and persists extensions
//! ([`ExtensionManager`]), and a priority-ordered asynchronous hook pipeline
//! the host invokes at fixed extension points ([`HookPipeline`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use vellum_extensions::{
//!     ExtensionDescriptor, ExtensionPoint, ExtensionRuntime, HookContext, hook_fn,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), vellum_extensions::Error> {
//!     let runtime = ExtensionRuntime::in_memory();
//!     runtime.initialize().await?;
//!
//!     let descriptor = ExtensionDescriptor::builder("excerpts", "Auto Excerpts", "1.0.0")
//!         .description("Fills in missing excerpts before a post is saved")
//!         .hook(
//!             ExtensionPoint::BeforeSave,
//!             hook_fn(|mut data, _ctx| async move {
//!                 if data.get("excerpt").is_none() {
//!                     data["excerpt"] = json!("…");
//!                 }
//!                 Ok(data)
//!             }),
//!             5,
//!         )
//!         .build();
//!
//!     runtime.registry().try_add(descriptor.clone())?;
//!     runtime.manager().register(descriptor).await?;
//!     runtime.manager().activate("excerpts").await?;
//!
//!     let ctx = HookContext::new("post-editor");
//!     let saved = runtime
//!         .pipeline()
//!         .execute(&ExtensionPoint::BeforeSave, json!({ "title": "Hello" }), &ctx)
//!         .await;
//!     println!("{saved}");
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod blocks;
pub mod config;
pub mod descriptor;
pub mod hooks;
pub mod manager;
pub mod registry;
pub mod runtime;
pub mod store;

// Re-exports for convenience
pub use blocks::{BlockRegistry, BlockType};
pub use config::RuntimeConfig;
pub use descriptor::{
    DescriptorBuilder, ExtensionDescriptor, HookDecl, Lifecycle, MenuItem, Widget,
};
pub use hooks::{
    DEFAULT_HOOK_PRIORITY, ExtensionPoint, HookCallback, HookContext, HookPipeline,
    HookRegistration, StatusProbe, hook_fn,
};
pub use manager::{
    ExtensionInstance, ExtensionManager, ExtensionStatus, LifecycleEvent, LifecycleEventKind,
    LifecycleListener, listener_fn,
};
pub use registry::{ExtensionRegistry, ValidationIssue};
pub use runtime::ExtensionRuntime;
pub use store::{ExtensionStore, InstanceRecord, JsonFileStore, MemoryStore};

/// Lifecycle phase that produced a [`Error::Lifecycle`] failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Initialize,
    Cleanup,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecyclePhase::Initialize => write!(f, "initialize"),
            LifecyclePhase::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Error type for extension runtime operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Descriptor failed structural validation.
    #[error("invalid descriptor: {0}")]
    Validation(String),

    /// A different descriptor with the same id is already cataloged.
    #[error("extension '{id}' is already registered with a different descriptor")]
    AlreadyRegistered { id: String },

    /// An instance already exists for this extension id.
    #[error("extension '{id}' is already installed")]
    AlreadyInstalled { id: String },

    /// A declared dependency is not installed and active.
    #[error("extension '{id}' requires '{dependency}' to be installed and active")]
    DependencyUnsatisfied { id: String, dependency: String },

    /// No instance exists for the given extension id.
    #[error("no installed extension with id '{0}'")]
    UnknownExtension(String),

    /// No descriptor for the given id exists in the catalog.
    #[error("no descriptor in the catalog for '{0}'")]
    UnknownDescriptor(String),

    /// The extension's own `initialize`/`cleanup` callback failed.
    #[error("extension '{id}' {phase} failed: {message}")]
    Lifecycle {
        id: String,
        phase: LifecyclePhase,
        message: String,
    },

    /// Store I/O failed; in-memory and persisted state may diverge until the
    /// next successful mutation.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// File system operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An extension callback reported a failure.
    #[error("callback failed: {0}")]
    Callback(String),
}

impl Error {
    /// Shorthand for callback failures raised inside extension code.
    pub fn callback(message: impl Into<String>) -> Self {
        Error::Callback(message.into())
    }

    /// True when the operation can be retried without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Persistence(_) | Error::Io(_))
    }
}
