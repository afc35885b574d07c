// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Command line of the standalone model process, and the packet file format it reads.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

pub use clap::Parser;
use config::{Chip, ConfigError, ModelConfig, RmtStringMap};
use miette::Diagnostic;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// A `Key=Value` configuration override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub key: String,
    pub value: String,
}

impl FromStr for Assignment {
    type Err = ArgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((key, value)) = s.split_once('=') else {
            return Err(ArgsError::MalformedAssignment(s.to_string()));
        };
        let key = key.trim();
        if RmtStringMap::lookup(key).is_none() {
            return Err(ArgsError::UnknownKnob(key.to_string()));
        }
        Ok(Assignment {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }
}

impl Display for Assignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// One line of a packet file: an internal ingress port followed by the packet bytes in hex.
///
/// ```text
/// # port  bytes
/// 3       080022AABBCC080011DDEEFF0800...
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketLine {
    pub port: u16,
    pub data: Vec<u8>,
}

fn parse_port(s: &str) -> Option<u16> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn parse_hex(s: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = s.bytes().filter(|b| !b.is_ascii_whitespace() && *b != b':').collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}

impl FromStr for PacketLine {
    type Err = ArgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some((port, bytes)) = s.split_once(char::is_whitespace) else {
            return Err(ArgsError::MalformedPacket(s.to_string()));
        };
        let port = parse_port(port).ok_or_else(|| ArgsError::InvalidPort(port.to_string()))?;
        let data = parse_hex(bytes).ok_or_else(|| ArgsError::MalformedPacket(s.to_string()))?;
        Ok(PacketLine { port, data })
    }
}

/// Parse a packet file. Blank lines and lines starting with `#` are skipped.
pub fn parse_packets(text: &str) -> Result<Vec<PacketLine>, ArgsError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            line.parse().map_err(|e| ArgsError::PacketFile {
                line: n + 1,
                source: Box::new(e),
            })
        })
        .collect()
}

#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum ArgsError {
    #[error("Malformed assignment '{0}'")]
    #[diagnostic(help("overrides are written Key=Value, e.g. --set RelaxSramBusCheck=true"))]
    MalformedAssignment(String),
    #[error("Unknown configuration knob '{0}'")]
    #[diagnostic(help("run with --show-knobs to list the known knobs"))]
    UnknownKnob(String),
    #[error("Invalid port '{0}'")]
    InvalidPort(String),
    #[error("Malformed packet line '{0}'")]
    #[diagnostic(help("a packet line is an internal port followed by the packet bytes in hex"))]
    MalformedPacket(String),
    #[error("Packet file line {line}")]
    PacketFile {
        line: usize,
        #[source]
        source: Box<ArgsError>,
    },
    #[error("Failed to read {0}: {1}")]
    Io(PathBuf, String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Parser, Debug)]
#[command(name = "rmt-model")]
#[command(version)]
#[command(about = "Behavioral model of a match-action packet pipeline", long_about = None)]
pub struct CmdArgs {
    #[arg(long, value_name = "PATH", help = "YAML model configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long = "set",
        value_name = "KEY=VALUE",
        value_parser = Assignment::from_str,
        help = "Override a configuration knob, after the configuration file is applied.
Examples:
   --set RelaxSramBusCheck=true
   --set SweepTickCycles=0x2000
Note: may be given several times"
    )]
    overrides: Vec<Assignment>,

    #[arg(
        long,
        value_name = "CHIP",
        value_parser = Chip::from_str,
        help = "Chip generation: tofino or jbay"
    )]
    chip: Option<Chip>,

    #[arg(
        long,
        value_name = "N",
        value_parser = clap::value_parser!(u8).range(1..=4),
        help = "Number of pipes in [1..4]"
    )]
    pipes: Option<u8>,

    #[arg(
        long,
        value_name = "N",
        value_parser = clap::value_parser!(u16).range(1..=64),
        help = "Number of packet processing threads in [1..64]"
    )]
    threads: Option<u16>,

    #[arg(
        long,
        value_name = "PATH",
        help = "File of packets to inject, one 'port hexbytes' per line"
    )]
    packets: Option<PathBuf>,

    #[arg(
        long,
        value_name = "PORT",
        help = "Install a keyless ingress table in every pipe forwarding all packets to this port"
    )]
    forward_to: Option<u16>,

    #[arg(
        long,
        value_name = "MS",
        default_value_t = 100,
        help = "Sweeper tick period in milliseconds, 0 disables the sweeper timer"
    )]
    sweep_period_ms: u64,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 300,
        help = "How long to wait for the model to drain the injected packets"
    )]
    idle_timeout: u64,

    #[arg(
        long,
        value_name = "FILTER",
        help = "Log filter (e.g. 'info' or 'mau=trace,info'); RUST_LOG is used when absent"
    )]
    log_level: Option<String>,

    #[arg(long, help = "List the configuration knobs accepted by --set and exit")]
    show_knobs: bool,

    #[arg(long, help = "Print the resulting model configuration and exit")]
    show_config: bool,
}

impl CmdArgs {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    pub fn overrides(&self) -> &[Assignment] {
        &self.overrides
    }

    pub fn packets_path(&self) -> Option<&Path> {
        self.packets.as_deref()
    }

    pub fn forward_to(&self) -> Option<u16> {
        self.forward_to
    }

    /// `None` when the sweeper timer is disabled.
    pub fn sweep_period(&self) -> Option<Duration> {
        (self.sweep_period_ms > 0).then(|| Duration::from_millis(self.sweep_period_ms))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    pub fn log_level(&self) -> Option<&str> {
        self.log_level.as_deref()
    }

    pub fn show_knobs(&self) -> bool {
        self.show_knobs
    }

    pub fn show_config(&self) -> bool {
        self.show_config
    }

    /// Build the model configuration: defaults, then the configuration file, then the dedicated
    /// options, then the `--set` overrides.
    pub fn model_config(&self) -> Result<ModelConfig, ArgsError> {
        let mut config = match &self.config {
            Some(path) => {
                let yaml = std::fs::read_to_string(path)
                    .map_err(|e| ArgsError::Io(path.clone(), e.to_string()))?;
                ModelConfig::from_yaml(&yaml)?
            }
            None => ModelConfig::default(),
        };
        if let Some(chip) = self.chip {
            config.chip = chip;
            config.num_stages = config.num_stages.min(chip.max_stages());
            config.clock_mhz = chip.default_clock_mhz();
        }
        if let Some(pipes) = self.pipes {
            config.num_pipes = usize::from(pipes);
        }
        if let Some(threads) = self.threads {
            config.num_threads = usize::from(threads);
        }
        for assignment in &self.overrides {
            debug!("applying override {assignment}");
            RmtStringMap::apply_assignment(&mut config, &assignment.to_string())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Read and parse the packet file, if one was given.
    pub fn packets(&self) -> Result<Vec<PacketLine>, ArgsError> {
        let Some(path) = &self.packets else {
            return Ok(Vec::new());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| ArgsError::Io(path.clone(), e.to_string()))?;
        parse_packets(&text)
    }
}
