// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration, parsed the way the rest of the corpus parses
//! pipeline configuration: a plain `serde`-deserializable struct with a
//! `Default` impl, loaded from JSON or YAML by the binary crate.

use serde::{Deserialize, Serialize};

/// Top-level configuration for an [`offload-engine`] `OffloadCtx`.
///
/// [`offload-engine`]: ../offload_engine/index.html
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Name given to the worker OS thread (surfaced in `ps`/`top` and in
    /// every log line the worker emits).
    pub worker_thread_name: String,

    /// Soft capacity hint for the request queue, used only to emit a
    /// warning when exceeded; the queue itself is unbounded, matching the
    /// original implementation's unbounded work-item list.
    pub queue_capacity_hint: usize,

    /// Bind address for the admin HTTP endpoint (`offload/dump-vtp`).
    pub admin_bind_address: String,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            worker_thread_name: "hw_offload".to_string(),
            queue_capacity_hint: 4096,
            admin_bind_address: "127.0.0.1:0".to_string(),
        }
    }
}

impl OffloadConfig {
    /// Parses configuration from a JSON document.
    ///
    /// # Errors
    /// Returns an error if `raw` is not valid JSON or does not match the
    /// shape of [`OffloadConfig`].
    pub fn from_json(raw: &str) -> Result<Self, crate::error::OffloadError> {
        serde_json::from_str(raw).map_err(|e| crate::error::OffloadError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = OffloadConfig::default();
        assert_eq!(cfg.worker_thread_name, "hw_offload");
        assert!(cfg.queue_capacity_hint > 0);
    }

    #[test]
    fn parses_partial_json_with_defaults() {
        let cfg = OffloadConfig::from_json(r#"{"worker_thread_name": "my_offload"}"#)
            .expect("valid json");
        assert_eq!(cfg.worker_thread_name, "my_offload");
        assert_eq!(cfg.queue_capacity_hint, 4096);
    }
}
