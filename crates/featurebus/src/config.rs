// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus configuration: compile-time defaults and the runtime `BusConfig`.
//!
//! # Sources
//!
//! - `BusConfig::default()` - unbounded pool, default leak warning threshold
//! - `BusConfig::from_env()` - `FEATUREBUS_*` environment variables
//! - `BusConfig::from_yaml_file()` - YAML document (feature `config-file`)
//!
//! A running [`Bus`](crate::Bus) keeps its config in an `ArcSwap`, so
//! `Bus::set_config` replaces it without touching the dispatch lock.
//!
//! # Example YAML
//!
//! ```yaml
//! # featurebus.yaml
//! max_idle_per_type: 64
//! in_flight_warn_threshold: 512
//! ```

use crate::error::{Error, Result};

// =======================================================================
// Defaults
// =======================================================================

/// Idle instances kept per message type (`None` = unbounded).
pub const DEFAULT_MAX_IDLE_PER_TYPE: Option<usize> = None;

/// In-flight letters that trigger the "missing receiver_done?" warning.
pub const DEFAULT_IN_FLIGHT_WARN_THRESHOLD: usize = 1024;

/// Env var overriding [`BusConfig::max_idle_per_type`] (`0` or `unbounded`
/// disables the cap).
pub const ENV_MAX_IDLE_PER_TYPE: &str = "FEATUREBUS_MAX_IDLE_PER_TYPE";

/// Env var overriding [`BusConfig::in_flight_warn_threshold`].
pub const ENV_IN_FLIGHT_WARN: &str = "FEATUREBUS_IN_FLIGHT_WARN";

// =======================================================================
// Runtime Config
// =======================================================================

/// Runtime tunables for a [`Bus`](crate::Bus).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(default, deny_unknown_fields))]
pub struct BusConfig {
    /// Cap on idle instances per pool bucket; releases past it drop the
    /// instance. Applies to messages recycled by the bus and to `Bus::release`.
    pub max_idle_per_type: Option<usize>,
    /// Number of letters awaiting `receiver_done` at which a warning is logged.
    pub in_flight_warn_threshold: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_idle_per_type: DEFAULT_MAX_IDLE_PER_TYPE,
            in_flight_warn_threshold: DEFAULT_IN_FLIGHT_WARN_THRESHOLD,
        }
    }
}

impl BusConfig {
    #[must_use]
    pub fn with_max_idle_per_type(mut self, max: Option<usize>) -> Self {
        self.max_idle_per_type = max;
        self
    }

    #[must_use]
    pub fn with_in_flight_warn_threshold(mut self, threshold: usize) -> Self {
        self.in_flight_warn_threshold = threshold;
        self
    }

    /// Defaults overridden by any `FEATUREBUS_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_IDLE_PER_TYPE) {
            let raw = raw.trim();
            config.max_idle_per_type = if raw.eq_ignore_ascii_case("unbounded") {
                None
            } else {
                match parse_usize(ENV_MAX_IDLE_PER_TYPE, raw)? {
                    0 => None,
                    n => Some(n),
                }
            };
        }

        if let Some(raw) = lookup(ENV_IN_FLIGHT_WARN) {
            config.in_flight_warn_threshold = parse_usize(ENV_IN_FLIGHT_WARN, raw.trim())?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document; missing keys keep their defaults.
    #[cfg(feature = "config-file")]
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "config-file")]
    pub fn from_yaml_file(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigFileNotFound(path.display().to_string()));
        }
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.in_flight_warn_threshold == 0 {
            return Err(Error::InvalidConfig(
                "in_flight_warn_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_idle_per_type == Some(0) {
            return Err(Error::InvalidConfig(
                "max_idle_per_type must be at least 1 (use None for unbounded)".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_usize(key: &str, raw: &str) -> Result<usize> {
    raw.parse::<usize>()
        .map_err(|e| Error::InvalidConfig(format!("{}={:?}: {}", key, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.max_idle_per_type, None);
        assert_eq!(config.in_flight_warn_threshold, DEFAULT_IN_FLIGHT_WARN_THRESHOLD);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lookup_overrides() {
        let config = BusConfig::from_lookup(lookup_from(&[
            (ENV_MAX_IDLE_PER_TYPE, "32"),
            (ENV_IN_FLIGHT_WARN, " 8 "),
        ]))
        .expect("valid env");
        assert_eq!(config.max_idle_per_type, Some(32));
        assert_eq!(config.in_flight_warn_threshold, 8);
    }

    #[test]
    fn test_lookup_unbounded_spellings() {
        for raw in ["0", "unbounded", "UNBOUNDED"] {
            let config = BusConfig::from_lookup(lookup_from(&[(ENV_MAX_IDLE_PER_TYPE, raw)]))
                .expect("valid env");
            assert_eq!(config.max_idle_per_type, None, "raw={}", raw);
        }
    }

    #[test]
    fn test_lookup_rejects_garbage() {
        let result = BusConfig::from_lookup(lookup_from(&[(ENV_IN_FLIGHT_WARN, "lots")]));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let result = BusConfig::from_lookup(lookup_from(&[(ENV_IN_FLIGHT_WARN, "0")]));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_cap() {
        let config = BusConfig::default().with_max_idle_per_type(Some(0));
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_yaml_partial_document() {
        let config = BusConfig::from_yaml_str("max_idle_per_type: 16\n").expect("valid yaml");
        assert_eq!(config.max_idle_per_type, Some(16));
        assert_eq!(config.in_flight_warn_threshold, DEFAULT_IN_FLIGHT_WARN_THRESHOLD);

        assert!(BusConfig::from_yaml_str("bogus_key: 1\n").is_err());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_yaml_file_roundtrip() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "in_flight_warn_threshold: 4").expect("write");
        let config = BusConfig::from_yaml_file(file.path()).expect("load");
        assert_eq!(config.in_flight_warn_threshold, 4);

        let missing = std::path::Path::new("/nonexistent/featurebus.yaml");
        assert!(matches!(
            BusConfig::from_yaml_file(missing),
            Err(Error::ConfigFileNotFound(_))
        ));
    }
}
