//! Hook pipeline: typed, priority-ordered, asynchronous transform chains
//! executed at fixed extension points of the host application.

mod pipeline;
mod point;

pub use pipeline::{
    DEFAULT_HOOK_PRIORITY, HookCallback, HookContext, HookPipeline, HookRegistration, StatusProbe,
    hook_fn,
};
pub use point::ExtensionPoint;
