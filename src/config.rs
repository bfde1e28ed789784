//! Bootstrap configuration: the on-disk description of instances to create
//! at startup, read by the CLI and handed to [`crate::manager::HostRegistry::load`].
//!
//! Modeled on rtrtr's own top-level [`Config`](../../examples/NLnetLabs-rtrtr/src/config.rs)
//! -- a flat `serde`-deserializable struct read via `toml`, with an
//! explicit `from_file` that turns I/O and parse failures into one
//! reported error rather than panicking.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::instance::{FallbackResponse, InstanceConfig, RecordingBehavior};

/// One instance descriptor as it appears in the bootstrap file.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstanceDescriptor {
    pub instance_id: String,
    #[serde(default)]
    pub external_host_name: String,
    #[serde(default)]
    pub use_secure_transport_upstream: bool,
    pub listening_port: u16,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default = "default_true")]
    pub stumps_enabled: bool,
    #[serde(default)]
    pub record_traffic: bool,
    #[serde(default)]
    pub recording_behavior: RecordingBehaviorConfig,
    #[serde(default)]
    pub fallback_response: FallbackResponseConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingBehaviorConfig {
    #[default]
    LeaveStumpsUnchanged,
    DisableStumpsWhileRecording,
}

impl From<RecordingBehaviorConfig> for RecordingBehavior {
    fn from(value: RecordingBehaviorConfig) -> Self {
        match value {
            RecordingBehaviorConfig::LeaveStumpsUnchanged => RecordingBehavior::LeaveStumpsUnchanged,
            RecordingBehaviorConfig::DisableStumpsWhileRecording => {
                RecordingBehavior::DisableStumpsWhileRecording
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackResponseConfig {
    #[default]
    Http404NotFound,
    Http503ServiceUnavailable,
}

impl From<FallbackResponseConfig> for FallbackResponse {
    fn from(value: FallbackResponseConfig) -> Self {
        match value {
            FallbackResponseConfig::Http404NotFound => FallbackResponse::Http404NotFound,
            FallbackResponseConfig::Http503ServiceUnavailable => {
                FallbackResponse::Http503ServiceUnavailable
            }
        }
    }
}

impl InstanceDescriptor {
    pub fn into_instance_config(self) -> InstanceConfig {
        InstanceConfig {
            instance_id: self.instance_id,
            external_host_name: if self.external_host_name.is_empty() {
                None
            } else {
                Some(self.external_host_name)
            },
            use_secure_transport_upstream: self.use_secure_transport_upstream,
            listening_port: self.listening_port,
            auto_start: self.auto_start,
            stumps_enabled: self.stumps_enabled,
            record_traffic: self.record_traffic,
            recording_behavior: self.recording_behavior.into(),
            fallback_response: self.fallback_response.into(),
        }
    }
}

/// The top-level bootstrap document: a list of instances to register (and
/// optionally start) when the process comes up.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub instances: Vec<InstanceDescriptor>,
}

impl BootstrapConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_argument(format!("reading config {}: {e}", path.display()))
        })?;
        toml::from_str(&contents).map_err(|e| {
            Error::invalid_argument(format!("parsing config {}: {e}", path.display()))
        })
    }
}
