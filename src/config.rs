//! Runtime configuration.
//!
//! Environment variables use the `VELLUM_EXT_` prefix and are read once at
//! startup; they are treated as immutable afterwards.

use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "VELLUM_EXT_";

const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 30;

/// Configuration for one [`crate::runtime::ExtensionRuntime`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Per-callback time limit in the hook pipeline; a callback that exceeds it
    /// is skipped like a failed callback.
    pub hook_timeout: Duration,

    /// Directory for the JSON file store. `None` selects the in-memory
    /// store.
    pub store_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            hook_timeout: Duration::from_secs(DEFAULT_HOOK_TIMEOUT_SECS),
            store_dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Reads overrides from `VELLUM_EXT_HOOK_TIMEOUT_SECS` and
    /// `VELLUM_EXT_STORE_DIR`. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(format!("{ENV_PREFIX}HOOK_TIMEOUT_SECS")) {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => config.hook_timeout = Duration::from_secs(secs),
                _ => {
                    tracing::warn!(value = %raw, "ignoring invalid hook timeout override");
                }
            }
        }

        if let Ok(dir) = std::env::var(format!("{ENV_PREFIX}STORE_DIR"))
            && !dir.is_empty()
        {
            config.store_dir = Some(PathBuf::from(dir));
        }

        config
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }
}
