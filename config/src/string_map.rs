// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Named knobs that can be set from strings (`--set RelaxSramBusCheck=true`).

use crate::{ConfigError, ModelConfig};
use tracing::{debug, warn};

/// How a named knob is applied to the configuration.
#[derive(Clone, Copy)]
pub enum Setter {
    Bool(fn(&mut ModelConfig, bool)),
    U64(fn(&mut ModelConfig, u64)),
}

const ENTRIES: &[(&str, Setter)] = &[
    ("RelaxSramBusCheck", Setter::Bool(|c, v| c.relax_bus_check = v)),
    ("RelaxSramVpnCheck", Setter::Bool(|c, v| c.relax_sram_vpn_check = v)),
    ("RelaxTeopCheck", Setter::Bool(|c, v| c.relax_teop_check = v)),
    ("StrictTeopDelayCheck", Setter::Bool(|c, v| c.strict_teop_delay_check = v)),
    ("RelaxDivideCheck", Setter::Bool(|c, v| c.relax_divide_check = v)),
    ("RelaxCarryCheck", Setter::Bool(|c, v| c.relax_carry_check = v)),
    ("RelaxSelectorCheck", Setter::Bool(|c, v| c.relax_selector_check = v)),
    ("RelaxSnapshotCheck", Setter::Bool(|c, v| c.relax_snapshot_check = v)),
    ("StatsFullResolution", Setter::Bool(|c, v| c.stats_full_resolution = v)),
    ("SynchronousCounterClear", Setter::Bool(|c, v| c.synchronous_counter_clear = v)),
    ("ProcessGressesSeparately", Setter::Bool(|c, v| c.process_gresses_separately = v)),
    ("NumThreads", Setter::U64(|c, v| c.num_threads = usize::try_from(v).unwrap_or(usize::MAX))),
    ("PipeLatency", Setter::U64(|c, v| c.pipe_latency = u32::try_from(v).unwrap_or(u32::MAX))),
    ("PredicationDelay", Setter::U64(|c, v| {
        c.predication_delay = u32::try_from(v).unwrap_or(u32::MAX);
    })),
    ("ClockMhz", Setter::U64(|c, v| c.clock_mhz = v)),
    ("SweepTickCycles", Setter::U64(|c, v| c.sweep_tick_cycles = v)),
];

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidBool(key.to_string(), value.to_string())),
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    let v = value.trim();
    let parsed = match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => v.parse::<u64>(),
    };
    parsed.map_err(|_| ConfigError::InvalidInteger(key.to_string(), value.to_string()))
}

/// Maps knob names to configuration setters.
#[derive(Clone, Copy, Debug, Default)]
pub struct RmtStringMap;

impl RmtStringMap {
    /// Look up the setter for a knob name. Matching ignores ASCII case.
    #[must_use]
    pub fn lookup(key: &str) -> Option<Setter> {
        ENTRIES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, setter)| *setter)
    }

    /// Apply `key = value`. Returns `Ok(false)` (and logs) if the key is unknown.
    pub fn apply(config: &mut ModelConfig, key: &str, value: &str) -> Result<bool, ConfigError> {
        let Some(setter) = Self::lookup(key) else {
            warn!("Ignoring unknown configuration knob '{key}'");
            return Ok(false);
        };
        match setter {
            Setter::Bool(set) => set(config, parse_bool(key, value)?),
            Setter::U64(set) => set(config, parse_u64(key, value)?),
        }
        debug!("Set {key}={value}");
        Ok(true)
    }

    /// Apply an assignment of the form `Key=Value`. Unknown keys are an error here.
    pub fn apply_assignment(config: &mut ModelConfig, assignment: &str) -> Result<(), ConfigError> {
        let Some((key, value)) = assignment.split_once('=') else {
            return Err(ConfigError::MalformedAssignment(assignment.to_string()));
        };
        let key = key.trim();
        if Self::apply(config, key, value)? {
            Ok(())
        } else {
            Err(ConfigError::UnknownKey(key.to_string()))
        }
    }

    /// All known knob names.
    pub fn keys() -> impl Iterator<Item = &'static str> {
        ENTRIES.iter().map(|(name, _)| *name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    #[test]
    fn booleans() {
        let mut config = ModelConfig::default();
        assert_eq!(RmtStringMap::apply(&mut config, "RelaxSramBusCheck", "true"), Ok(true));
        assert!(config.relax_bus_check);
        assert_eq!(RmtStringMap::apply(&mut config, "relaxsrambuscheck", "0"), Ok(true));
        assert!(!config.relax_bus_check);
        assert!(matches!(
            RmtStringMap::apply(&mut config, "RelaxTeopCheck", "yes"),
            Err(ConfigError::InvalidBool(_, _))
        ));
    }

    #[test]
    fn integers() {
        let mut config = ModelConfig::default();
        RmtStringMap::apply_assignment(&mut config, "SweepTickCycles=0x100").expect("valid");
        assert_eq!(config.sweep_tick_cycles, 256);
        RmtStringMap::apply_assignment(&mut config, "NumThreads = 7").expect("valid");
        assert_eq!(config.num_threads, 7);
        assert!(matches!(
            RmtStringMap::apply_assignment(&mut config, "ClockMhz=fast"),
            Err(ConfigError::InvalidInteger(_, _))
        ));
    }

    #[test]
    #[traced_test]
    fn unknown_and_malformed() {
        let mut config = ModelConfig::default();
        assert_eq!(RmtStringMap::apply(&mut config, "NoSuchKnob", "1"), Ok(false));
        assert!(logs_contain("Ignoring unknown configuration knob"));
        assert_eq!(
            RmtStringMap::apply_assignment(&mut config, "NoSuchKnob=1"),
            Err(ConfigError::UnknownKey("NoSuchKnob".to_string()))
        );
        assert_eq!(
            RmtStringMap::apply_assignment(&mut config, "RelaxTeopCheck"),
            Err(ConfigError::MalformedAssignment("RelaxTeopCheck".to_string()))
        );
        assert_eq!(config, ModelConfig::default());
    }

    #[test]
    fn every_key_resolves() {
        for key in RmtStringMap::keys() {
            assert!(RmtStringMap::lookup(key).is_some(), "{key}");
        }
    }
}
