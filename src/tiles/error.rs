// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use super::codec::DecodeError;
use std::io;
use std::path::PathBuf;

/// Errors produced while reading or writing tiles.
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{what}: checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    CrcMismatch {
        what: String,
        stored: u32,
        computed: u32,
    },

    #[error("{path}: lookup version {found} does not match the profile's version {expected}")]
    LookupVersionMismatch {
        path: PathBuf,
        found: u16,
        expected: u16,
    },

    #[error("{what}: {reason}")]
    Corrupt { what: String, reason: String },

    #[error("{what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: DecodeError,
    },

    #[error("node at {ilon},{ilat} consumed twice within one cache generation")]
    NodeConsumedTwice { ilon: i32, ilat: i32 },

    #[error("tile cache memory budget of {limit} bytes exhausted ({used} bytes in use)")]
    MemoryExhausted { used: usize, limit: usize },
}

impl TileError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(what: impl Into<String>, source: DecodeError) -> Self {
        Self::Decode {
            what: what.into(),
            source,
        }
    }
}
