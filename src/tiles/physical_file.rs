// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use super::osm_file::{read_at, OsmFile};
use super::TileError;
use flate2::Crc;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Number of 1°×1° slices in a physical file.
pub const SLICES: usize = 25;

/// Size of the file header: one big-endian u64 per slice.
pub const HEADER_LEN: u64 = 8 * SLICES as u64;

/// Size of the trailer of the current format: creation time,
/// header checksum and one index checksum per slice.
pub const TRAILER_LEN: u64 = 8 + 4 + 4 * SLICES as u64;

/// Cells per degree in files without a trailer.
pub const LEGACY_DIVISOR: i32 = 80;

/// Cells per degree in files with a trailer.
pub const CURRENT_DIVISOR: i32 = 32;

/// Size of a physical file, in fixed-point units.
pub const FILE_SPAN: i32 = 5_000_000;

const SLICE_SPAN: i32 = 1_000_000;
const OFFSET_MASK: u64 = (1 << 48) - 1;

/// South-west corner of the physical file covering a position.
pub fn file_base(ilon: i32, ilat: i32) -> (i32, i32) {
    (ilon - ilon.rem_euclid(FILE_SPAN), ilat - ilat.rem_euclid(FILE_SPAN))
}

/// Name of the physical file with the given south-west corner, e.g. `E5_N45.rd5`.
pub fn file_name((lon_base, lat_base): (i32, i32)) -> String {
    let lon = lon_base / SLICE_SPAN - 180;
    let lat = lat_base / SLICE_SPAN - 90;
    format!(
        "{}{}_{}{}.rd5",
        if lon < 0 { 'W' } else { 'E' },
        lon.abs(),
        if lat < 0 { 'S' } else { 'N' },
        lat.abs(),
    )
}

#[derive(Debug)]
enum Slice {
    NotLoaded,
    Empty,
    Loaded(OsmFile),
}

/// An open 5°×5° tile file.
///
/// The header lists, for each slice, `(lookup_version << 48) | end_offset`.
/// Slices are stored back to back right after the header, in latitude-major order.
/// The file length tells the two format generations apart: the current one ends
/// with a trailer of [TRAILER_LEN] bytes and uses [CURRENT_DIVISOR] cells per degree,
/// the legacy one has no trailer and uses [LEGACY_DIVISOR].
#[derive(Debug)]
pub struct PhysicalFile {
    path: PathBuf,
    file: File,
    base: (i32, i32),
    lookup_version: u16,
    divisor: i32,
    creation_time: Option<i64>,
    ends: [u64; SLICES],
    slice_crcs: Option<[u32; SLICES]>,
    slices: Vec<Slice>,
}

impl PhysicalFile {
    /// Opens and validates a physical file whose south-west corner is `base`.
    pub fn open(path: &Path, base: (i32, i32), expected_version: u16) -> Result<Self, TileError> {
        let mut file = File::open(path).map_err(|e| TileError::io(path, e))?;
        let length = file.metadata().map_err(|e| TileError::io(path, e))?.len();
        if length < HEADER_LEN {
            return Err(TileError::corrupt(path.display().to_string(), "file shorter than its header"));
        }

        let header = read_at(&mut file, path, 0, HEADER_LEN as usize)?;
        let entries: Vec<u64> = header
            .chunks_exact(8)
            .map(|c| u64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();

        let lookup_version = (entries[0] >> 48) as u16;
        let mut ends = [0; SLICES];
        let mut prev = HEADER_LEN;
        for (i, &e) in entries.iter().enumerate() {
            if (e >> 48) as u16 != lookup_version {
                return Err(TileError::corrupt(
                    path.display().to_string(),
                    "inconsistent lookup versions in the header",
                ));
            }
            ends[i] = e & OFFSET_MASK;
            if ends[i] < prev {
                return Err(TileError::corrupt(path.display().to_string(), "slice offsets out of order"));
            }
            prev = ends[i];
        }

        let data_end = ends[SLICES - 1];
        let (divisor, creation_time, slice_crcs) = if length == data_end + TRAILER_LEN {
            let trailer = read_at(&mut file, path, data_end, TRAILER_LEN as usize)?;
            let word = |i: usize| u32::from_be_bytes([trailer[i], trailer[i + 1], trailer[i + 2], trailer[i + 3]]);
            let creation_time = i64::from_be_bytes([
                trailer[0], trailer[1], trailer[2], trailer[3], trailer[4], trailer[5], trailer[6],
                trailer[7],
            ]);

            let stored = word(8);
            let mut crc = Crc::new();
            crc.update(&header);
            if crc.sum() != stored {
                return Err(TileError::CrcMismatch {
                    what: format!("{} header", path.display()),
                    stored,
                    computed: crc.sum(),
                });
            }

            let mut crcs = [0; SLICES];
            for (i, c) in crcs.iter_mut().enumerate() {
                *c = word(12 + 4 * i);
            }
            (CURRENT_DIVISOR, Some(creation_time), Some(crcs))
        } else if length == data_end {
            (LEGACY_DIVISOR, None, None)
        } else {
            return Err(TileError::corrupt(
                path.display().to_string(),
                format!("unexpected file length {length} (data ends at {data_end})"),
            ));
        };

        if lookup_version != expected_version {
            return Err(TileError::LookupVersionMismatch {
                path: path.to_path_buf(),
                found: lookup_version,
                expected: expected_version,
            });
        }

        log::debug!(
            "opened {} (lookup version {}, {} cells per degree)",
            path.display(),
            lookup_version,
            divisor
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            base,
            lookup_version,
            divisor,
            creation_time,
            ends,
            slice_crcs,
            slices: (0..SLICES).map(|_| Slice::NotLoaded).collect(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup_version(&self) -> u16 {
        self.lookup_version
    }

    pub fn divisor(&self) -> i32 {
        self.divisor
    }

    /// Size of a cell in fixed-point units.
    pub fn cell_size(&self) -> i32 {
        SLICE_SPAN / self.divisor
    }

    /// Creation time in milliseconds since the Unix epoch, known for the current format only.
    pub fn creation_time(&self) -> Option<i64> {
        self.creation_time
    }

    /// South-west corner of the cell containing the position.
    pub fn cell_origin(&self, ilon: i32, ilat: i32) -> (i32, i32) {
        let size = self.cell_size();
        (ilon - ilon.rem_euclid(size), ilat - ilat.rem_euclid(size))
    }

    fn slice_index(&self, ilon: i32, ilat: i32) -> usize {
        let x = ((ilon - self.base.0) / SLICE_SPAN).clamp(0, 4);
        let y = ((ilat - self.base.1) / SLICE_SPAN).clamp(0, 4);
        (y * 5 + x) as usize
    }

    /// Reads the raw sub-tile of the cell containing the position.
    /// Returns `None` if the cell holds no nodes.
    pub fn read_cell(&mut self, ilon: i32, ilat: i32) -> Result<Option<Vec<u8>>, TileError> {
        let idx = self.slice_index(ilon, ilat);

        if let Slice::NotLoaded = self.slices[idx] {
            let start = if idx == 0 { HEADER_LEN } else { self.ends[idx - 1] };
            let end = self.ends[idx];
            self.slices[idx] = if start == end {
                Slice::Empty
            } else {
                let slice_base = (
                    self.base.0 + (idx % 5) as i32 * SLICE_SPAN,
                    self.base.1 + (idx / 5) as i32 * SLICE_SPAN,
                );
                Slice::Loaded(OsmFile::read(
                    &mut self.file,
                    &self.path,
                    slice_base,
                    (start, end),
                    self.divisor,
                    self.slice_crcs.map(|c| c[idx]),
                )?)
            };
        }

        match &self.slices[idx] {
            Slice::Loaded(slice) => slice.read_cell(&mut self.file, &self.path, ilon, ilat),
            Slice::Empty | Slice::NotLoaded => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{lat_to_ilat, lon_to_ilon};
    use crate::tiles::{encode_sub_tile, NodeRecord, TileFormat, TileWriter};

    #[test]
    fn file_naming() {
        let base = file_base(lon_to_ilon(8.4), lat_to_ilat(49.01));
        assert_eq!(base, (lon_to_ilon(5.0), lat_to_ilat(45.0)));
        assert_eq!(file_name(base), "E5_N45.rd5");

        let base = file_base(lon_to_ilon(-0.1), lat_to_ilat(-33.9));
        assert_eq!(file_name(base), "W5_S35.rd5");
    }

    #[test]
    fn cell_index_has_divisor_squared_entries() {
        let (x, y) = (lon_to_ilon(8.5), lat_to_ilat(49.5));
        let node = NodeRecord {
            ilon: x,
            ilat: y,
            ..Default::default()
        };
        let sub_tile_len = encode_sub_tile(x, y, &[&node]).len() as u64;

        for (format, trailer) in [(TileFormat::Current, TRAILER_LEN), (TileFormat::Legacy, 0)] {
            let mut w = TileWriter::new(1, format);
            w.add_node(x, y, None, None);
            let dir = tempfile::tempdir().unwrap();
            let paths = w.write_to_dir(dir.path()).unwrap();

            // one non-empty slice: 1024 index entries for the current format, 6400 for the legacy one
            let divisor = format.divisor();
            let length = std::fs::metadata(&paths[0]).unwrap().len();
            let index_len = (divisor * divisor) as u64 * 4;
            assert_eq!(length, HEADER_LEN + index_len + sub_tile_len + trailer);

            let f = PhysicalFile::open(&paths[0], file_base(x, y), 1).unwrap();
            assert_eq!(f.divisor(), divisor);
            assert_eq!(f.cell_size(), 1_000_000 / divisor);
        }
    }
}
