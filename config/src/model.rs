// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The model configuration object

use crate::{ConfigError, ConfigResult};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::debug;

/// The chip generation being modeled.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Chip {
    #[default]
    Tofino,
    #[strum(serialize = "jbay", serialize = "tofino2")]
    JBay,
}

impl Chip {
    /// Maximum number of MAU stages per pipe.
    #[must_use]
    pub const fn max_stages(self) -> usize {
        match self {
            Chip::Tofino => 12,
            Chip::JBay => 20,
        }
    }
    /// Compare ALUs per stateful ALU instruction.
    #[must_use]
    pub const fn num_compare_alus(self) -> usize {
        match self {
            Chip::Tofino => 2,
            Chip::JBay => 4,
        }
    }
    /// Whether the chip has the divide/modulo, min/max and carry-chain stateful features.
    #[must_use]
    pub const fn has_extended_salu(self) -> bool {
        matches!(self, Chip::JBay)
    }
    /// Whether the chip has stateful (push/pop) counters.
    #[must_use]
    pub const fn has_stateful_counters(self) -> bool {
        matches!(self, Chip::JBay)
    }
    /// Whether the PHV carries dark words.
    #[must_use]
    pub const fn has_dark_phv(self) -> bool {
        matches!(self, Chip::JBay)
    }
    #[must_use]
    pub const fn default_clock_mhz(self) -> u64 {
        match self {
            Chip::Tofino => 1220,
            Chip::JBay => 1500,
        }
    }
}

/// Every knob of the model. Built once, then shared read-only.
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(default, build_fn(validate = "Self::validate"))]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub chip: Chip,
    pub num_pipes: usize,
    pub num_stages: usize,
    /// Number of packet processing worker threads.
    pub num_threads: usize,
    /// Internal port number of the PCIe (CPU) port.
    pub pcie_port: u16,
    /// Pipeline latency of a MAU stage, in cycles.
    pub pipe_latency: u32,
    /// Predication delay of a MAU stage, in cycles.
    pub predication_delay: u32,
    pub clock_mhz: u64,
    /// Clock cycles per sweeper tick.
    pub sweep_tick_cycles: u64,

    /// Log instead of failing on a higher priority write to a shared SRAM output bus.
    pub relax_bus_check: bool,
    /// Log instead of failing when an SRAM VPN/select configuration is inconsistent.
    pub relax_sram_vpn_check: bool,
    /// Log instead of failing on a tEOP bus collision.
    pub relax_teop_check: bool,
    /// Fail (instead of logging) on a tEOP delay mismatch.
    pub strict_teop_delay_check: bool,
    /// Log instead of failing when a divide/modulo output is used with the divider disabled.
    pub relax_divide_check: bool,
    /// Log instead of failing when a carry op runs without its low-half partner.
    pub relax_carry_check: bool,
    /// Log instead of failing on selector live-member inconsistencies.
    pub relax_selector_check: bool,
    /// Log instead of failing on snapshot misconfiguration.
    pub relax_snapshot_check: bool,

    /// Maintain 64-bit shadow counters next to the packed stats formats.
    pub stats_full_resolution: bool,
    /// Clear stateful counters immediately instead of through the timed sweep.
    pub synchronous_counter_clear: bool,
    /// Process the ingress and egress packet of a pipe in separate activations.
    pub process_gresses_separately: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let chip = Chip::default();
        Self {
            chip,
            num_pipes: 4,
            num_stages: chip.max_stages(),
            num_threads: 4,
            pcie_port: 320,
            pipe_latency: 20,
            predication_delay: 9,
            clock_mhz: chip.default_clock_mhz(),
            sweep_tick_cycles: 4096,
            relax_bus_check: false,
            relax_sram_vpn_check: false,
            relax_teop_check: false,
            strict_teop_delay_check: false,
            relax_divide_check: false,
            relax_carry_check: false,
            relax_selector_check: false,
            relax_snapshot_check: false,
            stats_full_resolution: false,
            synchronous_counter_clear: false,
            process_gresses_separately: false,
        }
    }
}

fn check_ranges(
    chip: Chip,
    num_pipes: usize,
    num_stages: usize,
    num_threads: usize,
    pipe_latency: u32,
    predication_delay: u32,
    clock_mhz: u64,
) -> Result<(), String> {
    if !(1..=4).contains(&num_pipes) {
        return Err(format!("num_pipes must be in 1..=4 (got {num_pipes})"));
    }
    if !(1..=chip.max_stages()).contains(&num_stages) {
        return Err(format!(
            "num_stages must be in 1..={} for {chip} (got {num_stages})",
            chip.max_stages()
        ));
    }
    if num_threads == 0 {
        return Err("num_threads must be at least 1".to_string());
    }
    if pipe_latency < predication_delay + 7 {
        return Err(format!(
            "pipe_latency ({pipe_latency}) must be at least predication_delay + 7 ({})",
            predication_delay + 7
        ));
    }
    if clock_mhz == 0 {
        return Err("clock_mhz must not be zero".to_string());
    }
    Ok(())
}

impl ModelConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        let defaults = ModelConfig::default();
        let chip = self.chip.unwrap_or(defaults.chip);
        check_ranges(
            chip,
            self.num_pipes.unwrap_or(defaults.num_pipes),
            self.num_stages.unwrap_or(defaults.num_stages),
            self.num_threads.unwrap_or(defaults.num_threads),
            self.pipe_latency.unwrap_or(defaults.pipe_latency),
            self.predication_delay.unwrap_or(defaults.predication_delay),
            self.clock_mhz.unwrap_or(defaults.clock_mhz),
        )
    }
}

impl ModelConfig {
    /// Validate a configuration obtained without the builder (e.g. deserialized).
    pub fn validate(&self) -> ConfigResult {
        check_ranges(
            self.chip,
            self.num_pipes,
            self.num_stages,
            self.num_threads,
            self.pipe_latency,
            self.predication_delay,
            self.clock_mhz,
        )
        .map_err(ConfigError::Invalid)
    }

    /// Parse and validate a YAML configuration.
    #[tracing::instrument(level = "debug", skip(yaml))]
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: ModelConfig =
            serde_yaml_ng::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        debug!("Loaded model configuration:\n{config}");
        Ok(config)
    }

    /// Number of internal ports per pipe.
    pub const PORTS_PER_PIPE: u16 = 72;
}

impl Display for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Model config")?;
        writeln!(f, "  chip      : {}", self.chip)?;
        writeln!(f, "  pipes     : {}", self.num_pipes)?;
        writeln!(f, "  stages    : {}", self.num_stages)?;
        writeln!(f, "  threads   : {}", self.num_threads)?;
        writeln!(f, "  pcie port : {}", self.pcie_port)?;
        writeln!(
            f,
            "  latency   : {} (predication {})",
            self.pipe_latency, self.predication_delay
        )?;
        write!(f, "  clock     : {} MHz", self.clock_mhz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn builder_defaults_and_validation() {
        let config = ModelConfigBuilder::default()
            .chip(Chip::JBay)
            .num_stages(20)
            .relax_bus_check(true)
            .build()
            .expect("valid config");
        assert_eq!(config.chip, Chip::JBay);
        assert!(config.relax_bus_check);
        assert_eq!(config.num_pipes, 4);

        // Tofino has only 12 stages
        let err = ModelConfigBuilder::default().num_stages(20).build();
        assert!(err.is_err());
        let err = ModelConfigBuilder::default().num_threads(0).build();
        assert!(err.is_err());
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = "chip: JBay\nnum_pipes: 2\nnum_stages: 16\nsynchronous_counter_clear: true\n";
        let config = ModelConfig::from_yaml(yaml).expect("valid yaml");
        assert_eq!(config.num_pipes, 2);
        assert_eq!(config.num_stages, 16);
        assert!(config.synchronous_counter_clear);
        assert_eq!(config.num_threads, ModelConfig::default().num_threads);

        let bad = ModelConfig::from_yaml("num_pipes: 9\n");
        assert!(matches!(bad, Err(ConfigError::Invalid(_))));
        let unknown = ModelConfig::from_yaml("no_such_knob: 1\n");
        assert!(matches!(unknown, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn chip_names() {
        assert_eq!(Chip::from_str("tofino2"), Ok(Chip::JBay));
        assert_eq!(Chip::from_str("TOFINO"), Ok(Chip::Tofino));
        assert_eq!(Chip::JBay.to_string(), "JBay");
    }
}
