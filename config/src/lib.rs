// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Model configuration.
//!
//! [`ModelConfig`] holds every strictness and behavioral knob of the model. It is built once
//! (with [`ModelConfigBuilder`], from YAML, or by applying [`RmtStringMap`] assignments) and then
//! shared read-only by all components. [`ConfigStore`] is a small addressable register store with
//! per-field change listeners.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::struct_excessive_bools)]

mod errors;
mod model;
mod store;
mod string_map;

pub use errors::{ConfigError, ConfigResult};
pub use model::{Chip, ModelConfig, ModelConfigBuilder, ModelConfigBuilderError};
pub use store::{ConfigStore, FieldListener};
pub use string_map::{RmtStringMap, Setter};
