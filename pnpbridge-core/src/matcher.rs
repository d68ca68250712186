//! Resolves a discovered device to the single configured component that claims it.

use std::sync::Arc;

use thiserror::Error;

use crate::config::{BridgeConfiguration, DeviceConfigEntry, MatchType};
use crate::error::BridgeError;
use crate::message::{DeviceDescription, PnpMessage};

/// Why a message could not be resolved to a component.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("device matches no configured component")]
    NoMatch,

    #[error("device matches more than one configured component: {}", .candidates.join(", "))]
    Ambiguous { candidates: Vec<String> },

    #[error("component '{component}' is already bound")]
    AlreadyBound { component: String },

    #[error("invalid device message: {0}")]
    InvalidPayload(String),
}

impl From<MatchError> for BridgeError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::NoMatch => BridgeError::NotFound(err.to_string()),
            MatchError::Ambiguous { .. } => BridgeError::ConfigValidation(err.to_string()),
            MatchError::AlreadyBound { .. } => BridgeError::DuplicateEntry(err.to_string()),
            MatchError::InvalidPayload(_) => BridgeError::InvalidArgument(err.to_string()),
        }
    }
}

/// The outcome of a successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResolution {
    pub component_name: String,
    pub interface_id: String,
    pub adapter_identity: String,
    /// Index of the matching entry in the configured device list.
    pub entry_index: usize,
}

/// Matches device messages against the configured devices.
#[derive(Debug, Clone)]
pub struct Matcher {
    config: Arc<BridgeConfiguration>,
}

impl Matcher {
    pub fn new(config: Arc<BridgeConfiguration>) -> Self {
        Self { config }
    }

    /// The configured device at `index`.
    pub fn entry(&self, index: usize) -> Option<&DeviceConfigEntry> {
        self.config.devices.get(index)
    }

    /// Find the configured entry claiming `message` without modifying it.
    pub fn find(&self, message: &PnpMessage) -> Result<MatchResolution, MatchError> {
        let description = message
            .description()
            .map_err(|e| MatchError::InvalidPayload(e.to_string()))?;
        let reporter = message.discovery_identity();

        let matches: Vec<(usize, &DeviceConfigEntry)> = self
            .config
            .devices
            .iter()
            .enumerate()
            .filter(|(_, entry)| accepts_reporter(entry, reporter))
            .filter(|(_, entry)| filter_matches(entry, &description))
            .collect();

        let (entry_index, entry) = match matches.as_slice() {
            [] => return Err(MatchError::NoMatch),
            [single] => *single,
            many => {
                return Err(MatchError::Ambiguous {
                    candidates: many
                        .iter()
                        .map(|(_, entry)| entry.component_name.clone())
                        .collect(),
                });
            }
        };

        let interface_id = if entry.self_describing {
            message
                .interface_id()
                .filter(|id| !id.is_empty())
                .ok_or_else(|| {
                    MatchError::InvalidPayload(format!(
                        "self-describing component '{}' requires an interface id in the message",
                        entry.component_name
                    ))
                })?
                .to_string()
        } else {
            entry.resolved_interface_id().to_string()
        };

        Ok(MatchResolution {
            component_name: entry.component_name.clone(),
            interface_id,
            adapter_identity: entry.pnp_adapter.clone(),
            entry_index,
        })
    }

    /// Resolve an arrival: find the claiming entry, reject components that are
    /// already bound, and write the interface id and component name onto the message.
    pub fn resolve(
        &self,
        message: &mut PnpMessage,
        is_bound: impl Fn(&str) -> bool,
    ) -> Result<MatchResolution, MatchError> {
        let resolution = self.find(message)?;

        if is_bound(&resolution.component_name) {
            return Err(MatchError::AlreadyBound {
                component: resolution.component_name,
            });
        }

        message.bind(
            resolution.interface_id.clone(),
            resolution.component_name.clone(),
        );
        Ok(resolution)
    }
}

fn accepts_reporter(entry: &DeviceConfigEntry, reporter: Option<&str>) -> bool {
    match (entry.discovery_identity(), reporter) {
        (Some(expected), Some(actual)) => expected == actual,
        _ => true,
    }
}

fn filter_matches(entry: &DeviceConfigEntry, description: &DeviceDescription) -> bool {
    match entry.match_filters.match_type {
        MatchType::Wildcard => true,
        MatchType::Exact => {
            !entry.match_filters.match_parameters.is_empty()
                && entry
                    .match_filters
                    .match_parameters
                    .iter()
                    .all(|(key, expected)| {
                        description
                            .parameter(key)
                            .is_some_and(|actual| actual.contains(expected.as_str()))
                    })
        }
    }
}
