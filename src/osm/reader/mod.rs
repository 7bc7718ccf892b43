// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::fs::File;
use std::io::{self, BufRead};
use std::path::Path;

use tile_builder::TileBuilder;

use crate::osm::Profile;
use crate::tiles::TileWriter;

mod model;
mod tile_builder;
mod xml;

pub use tile_builder::BuildStats;

/// Format of the input OSM file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormat {
    /// Unknown format - guess the format based on the content
    #[default]
    Unknown,

    /// Force uncompressed [OSM XML](https://wiki.openstreetmap.org/wiki/OSM_XML)
    Xml,

    /// Force [OSM XML](https://wiki.openstreetmap.org/wiki/OSM_XML)
    /// with [gzip](https://en.wikipedia.org/wiki/Gzip) compression
    XmlGz,

    /// Force [OSM XML](https://wiki.openstreetmap.org/wiki/OSM_XML)
    /// with [bzip2](https://en.wikipedia.org/wiki/Bzip2) compression
    XmlBz2,
}

impl FileFormat {
    /// Guesses the format from the first bytes of a file.
    fn detect(head: &[u8]) -> Self {
        if head.starts_with(&[0x1f, 0x8b]) {
            Self::XmlGz
        } else if head.starts_with(b"BZh") {
            Self::XmlBz2
        } else {
            Self::Xml
        }
    }
}

/// Additional controls for converting OSM data into routing tiles.
#[derive(Debug, Default)]
pub struct Options<'a> {
    /// If set, ways which can't be used by this profile are left out of the tiles.
    /// Otherwise every `highway=*` way is kept, and profiles are applied when routing.
    pub profile: Option<&'a Profile<'a>>,

    /// Format of the input data.
    pub file_format: FileFormat,

    /// Filter features by a specific bounding box. In order: left (min lon), bottom (min lat),
    /// right (max lon), top (max lat). Ignored if all values are set to zero, or at least one
    /// of them is not finite.
    pub bbox: [f64; 4],
}

/// Error conditions which may occur while reading OSM data.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("invalid OSM XML: {0}")]
    Xml(#[from] quick_xml::Error),
}

fn build_from_xml<R: BufRead>(
    w: &mut TileWriter,
    options: &Options<'_>,
    reader: R,
) -> Result<BuildStats, Error> {
    let mut builder = TileBuilder::new(options);
    builder.add_features(xml::Reader::from_io(reader))?;
    Ok(builder.finish(w))
}

/// Parse OSM features from a reader and add them to a [TileWriter] as per the provided [Options].
///
/// The provided stream will be automatically wrapped in a buffered reader when needed.
pub fn add_features_from_io<R: io::Read>(
    w: &mut TileWriter,
    options: &Options<'_>,
    reader: R,
) -> Result<BuildStats, Error> {
    let mut b = io::BufReader::new(reader);
    let format = match options.file_format {
        FileFormat::Unknown => FileFormat::detect(b.fill_buf()?),
        f => f,
    };
    log::debug!("reading OSM data as {format:?}");

    match format {
        FileFormat::Unknown | FileFormat::Xml => build_from_xml(w, options, b),

        FileFormat::XmlGz => {
            let d = flate2::read::MultiGzDecoder::new(b);
            build_from_xml(w, options, io::BufReader::new(d))
        }

        FileFormat::XmlBz2 => {
            let d = bzip2::read::MultiBzDecoder::new(b);
            build_from_xml(w, options, io::BufReader::new(d))
        }
    }
}

/// Parse OSM features from a file at the provided path and add them to a [TileWriter]
/// as per the provided [Options].
pub fn add_features_from_file<P: AsRef<Path>>(
    w: &mut TileWriter,
    options: &Options<'_>,
    path: P,
) -> Result<BuildStats, Error> {
    let f = File::open(path)?;
    add_features_from_io(w, options, f)
}

/// Parse OSM features from a static buffer and add them to a [TileWriter]
/// as per the provided [Options].
pub fn add_features_from_buffer(
    w: &mut TileWriter,
    options: &Options<'_>,
    data: &[u8],
) -> Result<BuildStats, Error> {
    if options.file_format == FileFormat::Xml {
        // Fast path is available for in-memory XML data
        let mut builder = TileBuilder::new(options);
        builder.add_features(xml::Reader::from_buffer(data))?;
        Ok(builder.finish(w))
    } else {
        add_features_from_io(w, options, io::Cursor::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn format_detection() {
        assert_eq!(FileFormat::detect(&[0x1f, 0x8b, 8, 0]), FileFormat::XmlGz);
        assert_eq!(FileFormat::detect(b"BZh91AY"), FileFormat::XmlBz2);
        assert_eq!(FileFormat::detect(b"<?xml"), FileFormat::Xml);
        assert_eq!(FileFormat::detect(b""), FileFormat::Xml);
    }

    const XML: &[u8] = br#"<osm version="0.6">
  <node id="1" lat="49.5" lon="8.5" />
  <node id="2" lat="49.5" lon="8.501" />
  <way id="10"><nd ref="1" /><nd ref="2" /><tag k="highway" v="service" /></way>
</osm>"#;

    #[test]
    fn compressed_input() {
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(XML).unwrap();
        let gz = gz.finish().unwrap();

        let mut w = TileWriter::new(1, Default::default());
        let stats = add_features_from_buffer(&mut w, &Options::default(), &gz).unwrap();
        assert_eq!(stats.links, 1);
        assert_eq!(w.len(), 2);
    }
}
