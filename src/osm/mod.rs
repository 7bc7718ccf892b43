// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Everything OpenStreetMap-specific: reading OSM XML into routing tiles,
//! the tag encoding stored in tiles, and built-in routing profiles.

mod profile;
mod reader;
pub mod tags;

pub use profile::{
    profile_by_name, Penalty, Profile, ProfileEvaluator, BICYCLE_PROFILE, CAR_PROFILE,
    FOOT_PROFILE,
};
pub use reader::{
    add_features_from_buffer, add_features_from_file, add_features_from_io, BuildStats, Error,
    FileFormat, Options,
};
pub use tags::TAG_LOOKUP_VERSION;
