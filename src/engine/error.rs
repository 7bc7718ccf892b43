// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use crate::context::ParameterError;
use crate::nogo::NogoError;
use crate::tiles::TileError;
use std::time::Duration;

/// Broad classes of [RoutingError]s, telling callers how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request is invalid; report it back to the user.
    UserInput,

    /// The search ran out of options or time; a retry with relaxed parameters may help.
    SearchExhausted,

    /// The engine ran out of resources.
    Resource,

    /// Tile data is damaged or doesn't match the profile.
    DataIntegrity,
}

/// Error conditions of [RoutingEngine::route](crate::RoutingEngine::route).
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("at least two waypoints are required, got {0}")]
    TooFewWaypoints(usize),

    #[error("waypoint {name} ({lon:.6}, {lat:.6}) is not close to any routable way")]
    PositionNotMapped { name: String, lon: f64, lat: f64 },

    #[error("invalid nogo zone: {0}")]
    InvalidNogo(#[from] NogoError),

    #[error("invalid routing parameter: {0}")]
    InvalidParameter(#[from] ParameterError),

    #[error("no track found in pass {pass}")]
    NoTrackFound { pass: u8 },

    #[error("no track found in pass {pass} within {elapsed:?}")]
    Timeout { pass: u8, elapsed: Duration },

    #[error("search in pass {pass} exceeded its limit of {limit} expansions")]
    StepLimitExceeded { pass: u8, limit: usize },

    #[error("routing cancelled")]
    Cancelled,

    #[error("out of memory: {hint}")]
    OutOfMemory { hint: String },

    #[error(transparent)]
    Tile(TileError),
}

impl RoutingError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TooFewWaypoints(_)
            | Self::PositionNotMapped { .. }
            | Self::InvalidNogo(_)
            | Self::InvalidParameter(_) => ErrorCategory::UserInput,
            Self::NoTrackFound { .. }
            | Self::Timeout { .. }
            | Self::StepLimitExceeded { .. }
            | Self::Cancelled => ErrorCategory::SearchExhausted,
            Self::OutOfMemory { .. } => ErrorCategory::Resource,
            Self::Tile(TileError::Io { .. }) => ErrorCategory::Resource,
            Self::Tile(_) => ErrorCategory::DataIntegrity,
        }
    }
}

impl From<TileError> for RoutingError {
    fn from(e: TileError) -> Self {
        match e {
            TileError::MemoryExhausted { used, limit } => Self::OutOfMemory {
                hint: format!(
                    "the route needs more than {limit} bytes of tile data ({used} in use); \
                     use shorter legs, more waypoints or a larger memory budget"
                ),
            },
            e => Self::Tile(e),
        }
    }
}
