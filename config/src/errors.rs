// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Configuration errors

/// The reasons why a configuration can be rejected
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Unknown configuration key '{0}'")]
    UnknownKey(String),
    #[error("Invalid boolean value '{1}' for '{0}'")]
    InvalidBool(String, String),
    #[error("Invalid integer value '{1}' for '{0}'")]
    InvalidInteger(String, String),
    #[error("Malformed assignment '{0}': expected key=value")]
    MalformedAssignment(String),
    #[error("Invalid model configuration: {0}")]
    Invalid(String),
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Result-like type for configurations
pub type ConfigResult = Result<(), ConfigError>;
