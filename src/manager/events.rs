//! Lifecycle event notification.
//!
//! Listeners are diagnostic observers, not part of a lifecycle operation's
//! success/failure contract: emission is sequential and awaited, and a
//! failing listener is logged and never propagated to the operation's
//! caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Error;

/// The kinds of lifecycle events the manager emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    Installed,
    Activated,
    Deactivated,
    Uninstalled,
    SettingsChanged,
}

impl LifecycleEventKind {
    pub fn all() -> &'static [LifecycleEventKind] {
        &[
            LifecycleEventKind::Installed,
            LifecycleEventKind::Activated,
            LifecycleEventKind::Deactivated,
            LifecycleEventKind::Uninstalled,
            LifecycleEventKind::SettingsChanged,
        ]
    }
}

impl std::fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleEventKind::Installed => write!(f, "installed"),
            LifecycleEventKind::Activated => write!(f, "activated"),
            LifecycleEventKind::Deactivated => write!(f, "deactivated"),
            LifecycleEventKind::Uninstalled => write!(f, "uninstalled"),
            LifecycleEventKind::SettingsChanged => write!(f, "settings_changed"),
        }
    }
}

/// One emitted lifecycle event.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub extension_id: String,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub(crate) fn new(kind: LifecycleEventKind, extension_id: impl Into<String>) -> Self {
        Self {
            kind,
            extension_id: extension_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Observer for lifecycle events.
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    async fn on_event(&self, event: &LifecycleEvent) -> Result<(), Error>;
}

struct FnListener<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> LifecycleListener for FnListener<F>
where
    F: Fn(LifecycleEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    async fn on_event(&self, event: &LifecycleEvent) -> Result<(), Error> {
        (self.f)(event.clone()).await
    }
}

/// Wraps an async closure as a [`LifecycleListener`].
pub fn listener_fn<F, Fut>(f: F) -> Arc<dyn LifecycleListener>
where
    F: Fn(LifecycleEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Arc::new(FnListener { f })
}

/// Listener table keyed by event kind.
#[derive(Default)]
pub(crate) struct EventDispatcher {
    listeners: RwLock<HashMap<LifecycleEventKind, Vec<Arc<dyn LifecycleListener>>>>,
}

impl EventDispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn subscribe(
        &self,
        kind: LifecycleEventKind,
        listener: Arc<dyn LifecycleListener>,
    ) {
        let mut listeners = self.listeners.write().await;
        listeners.entry(kind).or_default().push(listener);
    }

    /// Notifies listeners for the event's kind, one at a time, swallowing
    /// listener failures.
    pub(crate) async fn emit(&self, event: LifecycleEvent) {
        let subscribed: Vec<Arc<dyn LifecycleListener>> = {
            let listeners = self.listeners.read().await;
            listeners.get(&event.kind).cloned().unwrap_or_default()
        };

        for listener in subscribed {
            if let Err(e) = listener.on_event(&event).await {
                tracing::warn!(
                    kind = %event.kind,
                    extension = %event.extension_id,
                    error = %e,
                    "lifecycle listener failed"
                );
            }
        }
    }
}
