//! Priority-ordered asynchronous hook execution.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock as SyncRwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::ExtensionPoint;
use crate::Error;

/// Priority assigned when a hook declaration does not specify one.
/// Lower priorities run earlier.
pub const DEFAULT_HOOK_PRIORITY: i32 = 10;

const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Context passed to every hook callback in one `execute` call.
#[derive(Clone, Debug)]
pub struct HookContext {
    /// Id of the extension point owner or host caller that started the chain.
    pub caller_id: String,

    /// When the chain started.
    pub timestamp: DateTime<Utc>,

    /// Extra key/value data supplied by the caller.
    pub extra: Map<String, Value>,

    /// Cancelling this token stops the chain before the next callback and
    /// aborts one that is still running.
    pub cancellation_token: CancellationToken,
}

impl Default for HookContext {
    fn default() -> Self {
        Self {
            caller_id: String::new(),
            timestamp: Utc::now(),
            extra: Map::new(),
            cancellation_token: CancellationToken::new(),
        }
    }
}

impl HookContext {
    pub fn new(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            ..Default::default()
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }
}

/// A data-transform callback registered at an extension point.
///
/// Receives the running value (the previous callback's output, or the
/// caller's initial data for the first callback) and returns the value the
/// next callback will see. Synchronous work is simply an immediately-ready
/// future; the pipeline awaits every callback the same way.
#[async_trait]
pub trait HookCallback: Send + Sync {
    async fn call(&self, data: Value, ctx: &HookContext) -> Result<Value, Error>;
}

struct FnHook<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> HookCallback for FnHook<F>
where
    F: Fn(Value, HookContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, Error>> + Send,
{
    async fn call(&self, data: Value, ctx: &HookContext) -> Result<Value, Error> {
        (self.f)(data, ctx.clone()).await
    }
}

/// Wraps an async closure as a [`HookCallback`].
///
/// ```rust
/// use vellum_extensions::hook_fn;
///
/// let callback = hook_fn(|mut data, _ctx| async move {
///     data["seen"] = serde_json::json!(true);
///     Ok(data)
/// });
/// ```
pub fn hook_fn<F, Fut>(f: F) -> Arc<dyn HookCallback>
where
    F: Fn(Value, HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Error>> + Send + 'static,
{
    Arc::new(FnHook { f })
}

/// One live registration: owner, point, callback, priority.
///
/// Created when the owning instance activates, destroyed when it deactivates
/// or is removed. Never persisted.
#[derive(Clone)]
pub struct HookRegistration {
    pub owner_id: String,
    pub point: ExtensionPoint,
    pub callback: Arc<dyn HookCallback>,
    pub priority: i32,
}

impl std::fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistration")
            .field("owner_id", &self.owner_id)
            .field("point", &self.point)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Answers "is this owner currently active?" for the pipeline.
///
/// [`crate::manager::ExtensionManager`] implements this; the pipeline holds
/// it weakly so manager and pipeline do not keep each other alive.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn is_active(&self, extension_id: &str) -> bool;
}

/// Keyed collection of hook registrations, executed as sequential transform
/// chains.
///
/// Registrations for one point are kept sorted ascending by priority with a
/// stable sort, so equal priorities run in registration order. `execute`
/// calls for different points (or different callers) may overlap; within one
/// call, callbacks run strictly one after another because each depends on the
/// previous callback's output.
pub struct HookPipeline {
    hooks: RwLock<HashMap<ExtensionPoint, Vec<HookRegistration>>>,
    probe: SyncRwLock<Option<Weak<dyn StatusProbe>>>,
    callback_timeout: Duration,
}

impl Default for HookPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CALLBACK_TIMEOUT)
    }

    /// Pipeline with a custom per-callback timeout. A callback that exceeds
    /// it is treated exactly like a failed callback: logged, skipped, chain
    /// continues.
    pub fn with_timeout(callback_timeout: Duration) -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
            probe: SyncRwLock::new(None),
            callback_timeout,
        }
    }

    /// Attaches the owner-status probe consulted before each callback runs.
    pub fn attach_probe(&self, probe: Weak<dyn StatusProbe>) {
        *self.probe.write().expect("probe lock poisoned") = Some(probe);
    }

    /// Registers a callback for `point`, owned by `owner_id`.
    pub async fn register(
        &self,
        owner_id: impl Into<String>,
        point: ExtensionPoint,
        callback: Arc<dyn HookCallback>,
        priority: i32,
    ) {
        let registration = HookRegistration {
            owner_id: owner_id.into(),
            point: point.clone(),
            callback,
            priority,
        };
        let mut hooks = self.hooks.write().await;
        let entries = hooks.entry(point.clone()).or_default();
        entries.push(registration);
        // Stable: equal priorities keep insertion order.
        entries.sort_by_key(|r| r.priority);
        tracing::debug!(point = %point, count = entries.len(), "hook registered");
    }

    /// Removes every registration owned by `owner_id`, across all points.
    pub async fn unregister(&self, owner_id: &str) {
        let mut hooks = self.hooks.write().await;
        let mut removed = 0usize;
        for entries in hooks.values_mut() {
            let before = entries.len();
            entries.retain(|r| r.owner_id != owner_id);
            removed += before - entries.len();
        }
        hooks.retain(|_, entries| !entries.is_empty());
        if removed > 0 {
            tracing::debug!(owner = owner_id, removed, "hooks unregistered");
        }
    }

    /// Runs the chain for `point` over `initial`, returning the final value.
    ///
    /// Callbacks run in priority order; each receives the previous output.
    /// A callback whose owner is no longer active is skipped. A callback
    /// that fails or times out is logged and skipped, leaving the running
    /// value untouched; a bad extension must not break the host's
    /// save/render/delete path. Cancelling the context's token stops the
    /// chain and returns the value accumulated so far.
    pub async fn execute(
        &self,
        point: &ExtensionPoint,
        initial: Value,
        ctx: &HookContext,
    ) -> Value {
        let chain: Vec<HookRegistration> = {
            let hooks = self.hooks.read().await;
            match hooks.get(point) {
                Some(entries) if !entries.is_empty() => entries.clone(),
                _ => return initial,
            }
        };

        let probe = self
            .probe
            .read()
            .expect("probe lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade);

        let mut running = initial;
        for registration in &chain {
            // Second safety net beyond unregister-on-deactivate: skip owners
            // that are no longer active at call time.
            if let Some(probe) = &probe
                && !probe.is_active(&registration.owner_id).await
            {
                tracing::debug!(
                    owner = %registration.owner_id,
                    point = %point,
                    "skipping hook for inactive owner"
                );
                continue;
            }

            // The caller's token aborts the whole chain, even mid-callback;
            // the running value accumulated so far is returned as-is.
            let result = tokio::select! {
                biased;
                _ = ctx.cancellation_token.cancelled() => {
                    tracing::debug!(
                        caller = %ctx.caller_id,
                        point = %point,
                        "hook chain cancelled, returning current value"
                    );
                    return running;
                }
                result = timeout(
                    self.callback_timeout,
                    registration.callback.call(running.clone(), ctx),
                ) => result,
            };

            match result {
                Ok(Ok(next)) => running = next,
                Ok(Err(e)) => {
                    tracing::warn!(
                        owner = %registration.owner_id,
                        point = %point,
                        error = %e,
                        "hook callback failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        owner = %registration.owner_id,
                        point = %point,
                        timeout_secs = self.callback_timeout.as_secs(),
                        "hook callback timed out"
                    );
                }
            }
        }

        running
    }

    /// True if any registrations exist for `point`. Lets the host skip
    /// building hook input when nothing would consume it.
    pub async fn has_hooks(&self, point: &ExtensionPoint) -> bool {
        self.hooks
            .read()
            .await
            .get(point)
            .is_some_and(|entries| !entries.is_empty())
    }

    pub async fn hook_count(&self, point: &ExtensionPoint) -> usize {
        self.hooks
            .read()
            .await
            .get(point)
            .map_or(0, |entries| entries.len())
    }
}

impl std::fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookPipeline")
            .field("callback_timeout", &self.callback_timeout)
            .finish()
    }
}
