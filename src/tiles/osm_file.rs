// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use super::TileError;
use flate2::Crc;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Reads `len` bytes at `offset` of a file.
pub(crate) fn read_at(file: &mut File, path: &Path, offset: u64, len: usize) -> Result<Vec<u8>, TileError> {
    let mut buf = vec![0; len];
    file.seek(SeekFrom::Start(offset))
        .and_then(|_| file.read_exact(&mut buf))
        .map_err(|e| TileError::io(path, e))?;
    Ok(buf)
}

/// One 1°×1° slice of a physical tile file: an index of `divisor²` cell end offsets
/// (relative to the slice start), followed by the encoded sub-tiles.
#[derive(Debug, Clone)]
pub struct OsmFile {
    lon_base: i32,
    lat_base: i32,
    divisor: i32,
    start: u64,
    index: Vec<u32>,
}

impl OsmFile {
    /// Reads the cell index of the slice spanning `start..end` of the file,
    /// verifying it against the stored checksum, if there is one.
    pub(crate) fn read(
        file: &mut File,
        path: &Path,
        (lon_base, lat_base): (i32, i32),
        (start, end): (u64, u64),
        divisor: i32,
        expected_crc: Option<u32>,
    ) -> Result<Self, TileError> {
        let what = || format!("{} slice {},{}", path.display(), lon_base, lat_base);

        let cells = (divisor * divisor) as usize;
        let index_len = cells * 4;
        let slice_len = end - start;
        if slice_len < index_len as u64 {
            return Err(TileError::corrupt(what(), "slice shorter than its cell index"));
        }

        let bytes = read_at(file, path, start, index_len)?;
        if let Some(stored) = expected_crc {
            let mut crc = Crc::new();
            crc.update(&bytes);
            if crc.sum() != stored {
                return Err(TileError::CrcMismatch {
                    what: what(),
                    stored,
                    computed: crc.sum(),
                });
            }
        }

        let index: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let mut prev = index_len as u64;
        for &e in &index {
            if (e as u64) < prev || e as u64 > slice_len {
                return Err(TileError::corrupt(what(), "cell offsets out of order"));
            }
            prev = e as u64;
        }

        Ok(Self {
            lon_base,
            lat_base,
            divisor,
            start,
            index,
        })
    }

    /// Size of a cell in fixed-point units.
    pub fn cell_size(&self) -> i32 {
        1_000_000 / self.divisor
    }

    /// Position of the cell's south-west corner and its index within the slice.
    pub fn cell_of(&self, ilon: i32, ilat: i32) -> ((i32, i32), usize) {
        let size = self.cell_size();
        let x = ((ilon - self.lon_base) / size).clamp(0, self.divisor - 1);
        let y = ((ilat - self.lat_base) / size).clamp(0, self.divisor - 1);
        (
            (self.lon_base + x * size, self.lat_base + y * size),
            (y * self.divisor + x) as usize,
        )
    }

    /// Reads the raw sub-tile of the cell containing the position.
    /// Returns `None` for empty cells.
    pub(crate) fn read_cell(
        &self,
        file: &mut File,
        path: &Path,
        ilon: i32,
        ilat: i32,
    ) -> Result<Option<Vec<u8>>, TileError> {
        let (_, idx) = self.cell_of(ilon, ilat);
        let begin = if idx == 0 {
            (self.index.len() * 4) as u64
        } else {
            self.index[idx - 1] as u64
        };
        let end = self.index[idx] as u64;

        if begin == end {
            return Ok(None);
        }
        read_at(file, path, self.start + begin, (end - begin) as usize).map(Some)
    }
}
