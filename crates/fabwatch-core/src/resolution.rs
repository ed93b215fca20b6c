// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status resolution engine.
//!
//! Maps raw machine signals and manual downtime reasons to canonical status
//! names and colors using per-machine configuration. Resolution is a pure
//! function of the current configuration: it performs no store mutation and
//! is safe to call outside the machine lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::error::MonitorError;

/// One configured mapping from a raw signal pattern to a status.
#[derive(Debug, Clone)]
pub struct SignalMapping {
    /// Raw signal pattern, matched case-insensitively.
    pub signal_pattern: String,
    /// Canonical status name.
    pub status: String,
    /// Display color.
    pub color: String,
}

/// Per-machine monitoring configuration.
#[derive(Debug, Clone)]
pub struct MachineStatusConfig {
    /// Machine identity.
    pub machine_id: Uuid,
    /// Owning tenant.
    pub customer_id: Uuid,
    /// Human-readable machine name (used for job lookup).
    pub machine_name: String,
    /// Signal pattern to status mappings.
    pub signal_mappings: Vec<SignalMapping>,
    /// Recognized manual downtime reasons.
    pub downtime_reasons: Vec<String>,
}

/// Read-only source of per-machine configuration.
#[async_trait]
pub trait StatusConfigProvider: Send + Sync {
    /// Configuration for a machine, or `None` when the machine is unknown.
    async fn machine_config(
        &self,
        machine_id: Uuid,
    ) -> Result<Option<MachineStatusConfig>, MonitorError>;
}

/// In-memory [`StatusConfigProvider`] for embedding and tests.
#[derive(Default)]
pub struct InMemoryStatusConfig {
    configs: Mutex<HashMap<Uuid, MachineStatusConfig>>,
}

impl InMemoryStatusConfig {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a machine configuration (builder-style).
    pub fn with_machine(self, config: MachineStatusConfig) -> Self {
        self.configs
            .lock()
            .unwrap()
            .insert(config.machine_id, config);
        self
    }
}

#[async_trait]
impl StatusConfigProvider for InMemoryStatusConfig {
    async fn machine_config(
        &self,
        machine_id: Uuid,
    ) -> Result<Option<MachineStatusConfig>, MonitorError> {
        Ok(self.configs.lock().unwrap().get(&machine_id).cloned())
    }
}

/// A signal resolved against the machine's input table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSignal {
    /// Canonical status name.
    pub status: String,
    /// Display color.
    pub color: String,
    /// The configured pattern that matched.
    pub input_key: String,
}

/// A manual reason resolved against the downtime catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReason {
    /// Canonical reason (the catalog entry on a match, the raw trimmed
    /// reason otherwise).
    pub status: String,
    /// Display color.
    pub color: String,
    /// Whether the reason was found in the catalog.
    pub matched: bool,
}

/// Fallback palette for unmatched reasons that hit no keyword.
const UNMATCHED_PALETTE: &[&str] = &[
    "#9E9E9E", "#8D6E63", "#7E57C2", "#26A69A", "#EC407A", "#78909C",
];

/// Resolves signals and manual reasons to statuses.
///
/// Owns a TTL cache of per-machine configuration and the color assignments
/// for unmatched reasons, so repeated unmatched reasons get stable colors.
/// Both are explicit, constructor-injected components rather than process
/// globals.
pub struct StatusResolver {
    provider: Arc<dyn StatusConfigProvider>,
    config_cache: TtlCache<Uuid, Arc<MachineStatusConfig>>,
    unmatched_colors: Mutex<HashMap<Uuid, HashMap<String, String>>>,
}

impl StatusResolver {
    /// Create a resolver over a configuration provider.
    ///
    /// `config_ttl` bounds how stale the cached per-machine configuration
    /// may get.
    pub fn new(provider: Arc<dyn StatusConfigProvider>, config_ttl: Duration) -> Self {
        Self {
            provider,
            config_cache: TtlCache::new(config_ttl),
            unmatched_colors: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the machine's configuration through the TTL cache.
    pub async fn machine_config(
        &self,
        machine_id: Uuid,
    ) -> Result<Option<Arc<MachineStatusConfig>>, MonitorError> {
        if let Some(config) = self.config_cache.get(&machine_id) {
            return Ok(Some(config));
        }
        match self.provider.machine_config(machine_id).await? {
            Some(config) => {
                let config = Arc::new(config);
                self.config_cache.insert(machine_id, config.clone());
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    /// Drop the cached configuration for a machine.
    pub fn invalidate_config(&self, machine_id: Uuid) {
        self.config_cache.invalidate(&machine_id);
    }

    /// Resolve a raw signal pattern against the machine's input table.
    ///
    /// Exact match, case-insensitive. `None` when the pattern is not
    /// configured.
    pub fn resolve_signal(
        &self,
        config: &MachineStatusConfig,
        signal_pattern: &str,
    ) -> Option<ResolvedSignal> {
        let needle = signal_pattern.trim();
        config
            .signal_mappings
            .iter()
            .find(|m| m.signal_pattern.eq_ignore_ascii_case(needle))
            .map(|m| ResolvedSignal {
                status: m.status.clone(),
                color: m.color.clone(),
                input_key: m.signal_pattern.clone(),
            })
    }

    /// Resolve a manual downtime reason against the catalog.
    ///
    /// A miss does not reject: the raw reason is returned tagged unmatched,
    /// with a deterministic color so the same reason always renders the
    /// same way.
    pub fn resolve_manual_reason(
        &self,
        config: &MachineStatusConfig,
        reason: &str,
    ) -> ResolvedReason {
        let trimmed = reason.trim();

        if let Some(cataloged) = config
            .downtime_reasons
            .iter()
            .find(|r| r.eq_ignore_ascii_case(trimmed))
        {
            return ResolvedReason {
                status: cataloged.clone(),
                color: "#FFD700".to_string(),
                matched: true,
            };
        }

        debug!(
            machine_id = %config.machine_id,
            reason = trimmed,
            "downtime reason not in catalog"
        );

        ResolvedReason {
            status: trimmed.to_string(),
            color: self.unmatched_color(config.machine_id, trimmed),
            matched: false,
        }
    }

    /// Deterministic color for an unmatched reason.
    ///
    /// Keyword heuristics first; otherwise the next free palette color for
    /// this machine, remembered per (machine, reason).
    fn unmatched_color(&self, machine_id: Uuid, reason: &str) -> String {
        let lowered = reason.to_lowercase();
        if lowered.contains("alarm") {
            return "#FF8C00".to_string();
        }
        if lowered.contains("stop") || lowered.contains("idle") {
            return "#FFD700".to_string();
        }
        if lowered.contains("offline") {
            return "#000000".to_string();
        }
        if lowered.contains("cycle") || lowered.contains("running") {
            return "#00B050".to_string();
        }

        let mut assignments = self.unmatched_colors.lock().unwrap();
        let machine_colors = assignments.entry(machine_id).or_default();
        if let Some(color) = machine_colors.get(&lowered) {
            return color.clone();
        }
        let color = UNMATCHED_PALETTE[machine_colors.len() % UNMATCHED_PALETTE.len()].to_string();
        machine_colors.insert(lowered, color.clone());
        color
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(machine_id: Uuid) -> MachineStatusConfig {
        MachineStatusConfig {
            machine_id,
            customer_id: Uuid::new_v4(),
            machine_name: "M1".to_string(),
            signal_mappings: vec![
                SignalMapping {
                    signal_pattern: "IN0=1".to_string(),
                    status: "Running".to_string(),
                    color: "#00B050".to_string(),
                },
                SignalMapping {
                    signal_pattern: "IN1=1".to_string(),
                    status: "Alarm".to_string(),
                    color: "#FF0000".to_string(),
                },
            ],
            downtime_reasons: vec!["Maintenance".to_string(), "Setup".to_string()],
        }
    }

    fn make_resolver() -> StatusResolver {
        StatusResolver::new(
            Arc::new(InMemoryStatusConfig::new()),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_resolve_signal_case_insensitive() {
        let resolver = make_resolver();
        let config = make_config(Uuid::new_v4());

        let resolved = resolver.resolve_signal(&config, "in0=1").unwrap();
        assert_eq!(resolved.status, "Running");
        assert_eq!(resolved.color, "#00B050");
        assert_eq!(resolved.input_key, "IN0=1");
    }

    #[test]
    fn test_resolve_signal_no_match() {
        let resolver = make_resolver();
        let config = make_config(Uuid::new_v4());
        assert!(resolver.resolve_signal(&config, "IN9=1").is_none());
    }

    #[test]
    fn test_resolve_manual_reason_matched() {
        let resolver = make_resolver();
        let config = make_config(Uuid::new_v4());

        let resolved = resolver.resolve_manual_reason(&config, "  maintenance ");
        assert!(resolved.matched);
        // Canonical catalog spelling, not the raw input.
        assert_eq!(resolved.status, "Maintenance");
    }

    #[test]
    fn test_resolve_manual_reason_unmatched_keeps_text() {
        let resolver = make_resolver();
        let config = make_config(Uuid::new_v4());

        let resolved = resolver.resolve_manual_reason(&config, "Tool Change XYZ");
        assert!(!resolved.matched);
        assert_eq!(resolved.status, "Tool Change XYZ");
        assert!(!resolved.color.is_empty());
    }

    #[test]
    fn test_unmatched_keyword_colors() {
        let resolver = make_resolver();
        let config = make_config(Uuid::new_v4());

        assert_eq!(
            resolver.resolve_manual_reason(&config, "Fire alarm check").color,
            "#FF8C00"
        );
        assert_eq!(
            resolver.resolve_manual_reason(&config, "Emergency stop").color,
            "#FFD700"
        );
        assert_eq!(
            resolver.resolve_manual_reason(&config, "Taken offline").color,
            "#000000"
        );
        assert_eq!(
            resolver.resolve_manual_reason(&config, "Dry cycle test").color,
            "#00B050"
        );
    }

    #[test]
    fn test_unmatched_palette_colors_are_stable() {
        let resolver = make_resolver();
        let config = make_config(Uuid::new_v4());

        let first = resolver.resolve_manual_reason(&config, "Tool Change XYZ");
        let second = resolver.resolve_manual_reason(&config, "Waiting for parts");
        let first_again = resolver.resolve_manual_reason(&config, "tool change xyz");

        // Distinct reasons get distinct palette slots; repeats (any casing)
        // get the same color back.
        assert_ne!(first.color, second.color);
        assert_eq!(first.color, first_again.color);
    }

    #[test]
    fn test_palette_is_per_machine() {
        let resolver = make_resolver();
        let config_a = make_config(Uuid::new_v4());
        let config_b = make_config(Uuid::new_v4());

        let a = resolver.resolve_manual_reason(&config_a, "Mystery A");
        let b = resolver.resolve_manual_reason(&config_b, "Mystery B");

        // Each machine starts at the head of the palette.
        assert_eq!(a.color, b.color);
    }

    #[tokio::test]
    async fn test_machine_config_cached() {
        let machine_id = Uuid::new_v4();
        let provider =
            Arc::new(InMemoryStatusConfig::new().with_machine(make_config(machine_id)));
        let resolver = StatusResolver::new(provider, Duration::from_secs(60));

        let config = resolver.machine_config(machine_id).await.unwrap().unwrap();
        assert_eq!(config.machine_name, "M1");

        // Second fetch comes from the cache.
        let cached = resolver.machine_config(machine_id).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&config, &cached));
    }

    #[tokio::test]
    async fn test_machine_config_unknown_machine() {
        let resolver = make_resolver();
        assert!(resolver
            .machine_config(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }
}
