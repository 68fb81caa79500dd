//! Bridge configuration loading and management.
//!
//! One deployment may run several bus bridges (one per physical link), so
//! the YAML file maps bridge ids to their settings:
//!
//! ```yaml
//! bridges:
//!   bus0:
//!     collector_period_ms: 100
//!     safety_buffer_ms: 50
//!     initial_cycle_ms: 1000
//!     worker_backoff_cap_s: 30
//! ```
//!
//! Every field is optional; absent values fall back to their defaults, and
//! an empty file yields a single `"default_bridge"` entry so a bridge can
//! always be constructed.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

// ── Defaults ──────────────────────────────────────────────────────────────────

fn default_collector_period_ms() -> u64 {
    100
}

fn default_safety_buffer_ms() -> u64 {
    50
}

fn default_initial_cycle_ms() -> u64 {
    1000
}

fn default_worker_backoff_cap_s() -> u64 {
    30
}

// ── Private YAML deserialization type ─────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Deserialize)]
struct BridgeConfigFile {
    bridges: HashMap<String, BridgeSettings>,
}

// ── Public data structures ────────────────────────────────────────────────────

/// Timing settings of one bus bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSettings {
    /// Period of the frame-collection loop.
    #[serde(default = "default_collector_period_ms")]
    pub collector_period_ms: u64,

    /// Fixed margin added to the planned cycle duration to absorb
    /// scheduling jitter.
    #[serde(default = "default_safety_buffer_ms")]
    pub safety_buffer_ms: u64,

    /// Assumed cycle length before the first measurement exists.
    #[serde(default = "default_initial_cycle_ms")]
    pub initial_cycle_ms: u64,

    /// Upper bound on the worker loops' error back-off sleep.
    #[serde(default = "default_worker_backoff_cap_s")]
    pub worker_backoff_cap_s: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            collector_period_ms: default_collector_period_ms(),
            safety_buffer_ms: default_safety_buffer_ms(),
            initial_cycle_ms: default_initial_cycle_ms(),
            worker_backoff_cap_s: default_worker_backoff_cap_s(),
        }
    }
}

impl BridgeSettings {
    pub fn collector_period(&self) -> Duration {
        Duration::from_millis(self.collector_period_ms)
    }

    pub fn safety_buffer(&self) -> Duration {
        Duration::from_millis(self.safety_buffer_ms)
    }

    pub fn initial_cycle(&self) -> Duration {
        Duration::from_millis(self.initial_cycle_ms)
    }

    pub fn worker_backoff_cap(&self) -> Duration {
        Duration::from_secs(self.worker_backoff_cap_s)
    }
}

// ── BridgeConfigManager ───────────────────────────────────────────────────────

/// Loads and manages bridge settings from a YAML file.
#[derive(Debug, Default)]
pub struct BridgeConfigManager {
    bridges: HashMap<String, BridgeSettings>,

    /// Set to `true` after a successful [`load_from_file`](Self::load_from_file).
    loaded: bool,
}

impl BridgeConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `path` and populates the internal bridge map.
    ///
    /// * If the file contains no bridges a single `"default_bridge"` entry
    ///   is inserted.
    /// * Calling this method a second time replaces all previously loaded
    ///   entries.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or the YAML is
    /// structurally invalid.
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading bridge configuration from: {}", path.display());

        // Reset state before (re-)loading
        self.bridges.clear();
        self.loaded = false;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let file: BridgeConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        for (name, settings) in file.bridges {
            debug!(
                bridge = %name,
                collector_period_ms = settings.collector_period_ms,
                safety_buffer_ms = settings.safety_buffer_ms,
                initial_cycle_ms = settings.initial_cycle_ms,
                "bridge settings"
            );
            self.bridges.insert(name, settings);
        }

        if self.bridges.is_empty() {
            warn!("No bridges found in configuration file, using default settings");
            self.bridges
                .insert("default_bridge".to_string(), BridgeSettings::default());
        }

        self.loaded = true;
        info!("Loaded {} bridge configuration(s)", self.bridges.len());
        Ok(())
    }

    /// Settings for `name`, or `None` if no such bridge was loaded.
    pub fn get(&self, name: &str) -> Option<&BridgeSettings> {
        self.bridges.get(name)
    }

    /// Settings for `name`, falling back to the defaults for unknown
    /// bridges.
    pub fn get_or_default(&self, name: &str) -> BridgeSettings {
        self.bridges.get(name).cloned().unwrap_or_default()
    }

    pub fn get_all(&self) -> &HashMap<String, BridgeSettings> {
        &self.bridges
    }

    /// `true` after a successful [`load_from_file`](Self::load_from_file).
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
