// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use super::codec::ByteWriter;
use super::micro_cache::encode_sub_tile;
use super::node_body::{LinkData, LinkRecord, NodeRecord};
use super::physical_file::{
    file_base, file_name, CURRENT_DIVISOR, FILE_SPAN, HEADER_LEN, LEGACY_DIVISOR, SLICES,
};
use super::TileError;
use crate::distance::position_id;
use crate::graph::{GeoPoint, TurnRestriction};
use flate2::Crc;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Generation of the physical file format to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileFormat {
    /// 80 cells per degree, no trailer.
    Legacy,

    /// 32 cells per degree, with a trailer carrying checksums and the creation time.
    #[default]
    Current,
}

impl TileFormat {
    pub fn divisor(self) -> i32 {
        match self {
            TileFormat::Legacy => LEGACY_DIVISOR,
            TileFormat::Current => CURRENT_DIVISOR,
        }
    }
}

/// Collects nodes and links and writes them out as physical tile files.
#[derive(Debug, Clone)]
pub struct TileWriter {
    format: TileFormat,
    lookup_version: u16,
    nodes: BTreeMap<i64, NodeRecord>,
}

impl TileWriter {
    pub fn new(lookup_version: u16, format: TileFormat) -> Self {
        Self {
            format,
            lookup_version,
            nodes: BTreeMap::new(),
        }
    }

    /// Returns the number of nodes collected so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the node at the given position, creating an empty one if necessary.
    pub fn node_mut(&mut self, ilon: i32, ilat: i32) -> &mut NodeRecord {
        self.nodes
            .entry(position_id(ilon, ilat))
            .or_insert_with(|| NodeRecord {
                ilon,
                ilat,
                ..Default::default()
            })
    }

    /// Creates or updates a node.
    pub fn add_node(
        &mut self,
        ilon: i32,
        ilat: i32,
        elevation: Option<i16>,
        description: Option<Vec<u8>>,
    ) {
        let node = self.node_mut(ilon, ilat);
        node.elevation = elevation;
        node.description = description;
    }

    /// Adds a link between two nodes (created if missing). The description is
    /// stored for the direction `from` → `to`, and `geometry` lists the shape
    /// points in that direction.
    pub fn add_link(
        &mut self,
        from: (i32, i32),
        to: (i32, i32),
        description: Vec<u8>,
        geometry: Vec<GeoPoint>,
    ) {
        if from == to {
            log::warn!("skipping a zero-length link at {},{}", from.0, from.1);
            return;
        }

        self.node_mut(from.0, from.1).links.push(LinkRecord {
            target_lon: to.0,
            target_lat: to.1,
            data: Some(LinkData {
                description,
                geometry,
            }),
        });
        self.node_mut(to.0, to.1).links.push(LinkRecord {
            target_lon: from.0,
            target_lat: from.1,
            data: None,
        });
    }

    /// Attaches a turn restriction to its via node.
    pub fn add_restriction(&mut self, via: (i32, i32), restriction: TurnRestriction) {
        self.node_mut(via.0, via.1).restrictions.push(restriction);
    }

    /// Encodes all physical files, keyed by their south-west corner.
    pub fn encode_files(&self) -> Vec<((i32, i32), Vec<u8>)> {
        let mut by_file: HashMap<(i32, i32), Vec<&NodeRecord>> = HashMap::new();
        for node in self.nodes.values() {
            by_file
                .entry(file_base(node.ilon, node.ilat))
                .or_default()
                .push(node);
        }

        let creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as i64);

        let mut files: Vec<_> = by_file
            .into_iter()
            .map(|(base, nodes)| {
                let bytes = encode_physical_file(
                    base,
                    &nodes,
                    self.format,
                    self.lookup_version,
                    creation_time,
                );
                (base, bytes)
            })
            .collect();
        files.sort_by_key(|&(base, _)| base);
        files
    }

    /// Writes all physical files into a directory, returning their paths.
    pub fn write_to_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, TileError> {
        std::fs::create_dir_all(dir).map_err(|e| TileError::io(dir, e))?;

        let mut paths = Vec::new();
        for (base, bytes) in self.encode_files() {
            let path = dir.join(file_name(base));
            std::fs::write(&path, &bytes).map_err(|e| TileError::io(&path, e))?;
            log::info!("wrote {} ({} bytes)", path.display(), bytes.len());
            paths.push(path);
        }
        Ok(paths)
    }
}

/// Encodes one physical file. Nodes must be sorted by id and lie within the
/// file starting at `base`.
fn encode_physical_file(
    base: (i32, i32),
    nodes: &[&NodeRecord],
    format: TileFormat,
    lookup_version: u16,
    creation_time: i64,
) -> Vec<u8> {
    let divisor = format.divisor();
    let slice_span = FILE_SPAN / 5;
    let cell_size = slice_span / divisor;
    let cells = (divisor * divisor) as usize;

    let mut body = ByteWriter::new();
    let mut ends = [0_u64; SLICES];
    let mut index_crcs = [0_u32; SLICES];

    for (idx, end) in ends.iter_mut().enumerate() {
        let slice_lon = base.0 + (idx % 5) as i32 * slice_span;
        let slice_lat = base.1 + (idx / 5) as i32 * slice_span;

        let mut by_cell: BTreeMap<usize, Vec<&NodeRecord>> = BTreeMap::new();
        for &node in nodes {
            let x = node.ilon - slice_lon;
            let y = node.ilat - slice_lat;
            if (0..slice_span).contains(&x) && (0..slice_span).contains(&y) {
                let cell = ((y / cell_size) * divisor + x / cell_size) as usize;
                by_cell.entry(cell).or_default().push(node);
            }
        }

        if !by_cell.is_empty() {
            let mut index = ByteWriter::new();
            let mut data = ByteWriter::new();
            let index_len = cells * 4;

            for cell in 0..cells {
                if let Some(cell_nodes) = by_cell.get(&cell) {
                    let origin_lon = slice_lon + (cell as i32 % divisor) * cell_size;
                    let origin_lat = slice_lat + (cell as i32 / divisor) * cell_size;
                    data.write_bytes(&encode_sub_tile(origin_lon, origin_lat, cell_nodes));
                }
                index.write_u32((index_len + data.len()) as u32);
            }

            let mut crc = Crc::new();
            crc.update(index.as_slice());
            index_crcs[idx] = crc.sum();

            body.write_bytes(index.as_slice());
            body.write_bytes(data.as_slice());
        }

        *end = HEADER_LEN + body.len() as u64;
    }

    let mut out = ByteWriter::new();
    for end in ends {
        out.write_u64(((lookup_version as u64) << 48) | end);
    }
    let mut header_crc = Crc::new();
    header_crc.update(out.as_slice());

    out.write_bytes(body.as_slice());

    if format == TileFormat::Current {
        out.write_u64(creation_time as u64);
        out.write_u32(header_crc.sum());
        for crc in index_crcs {
            out.write_u32(crc);
        }
    }

    out.into_inner()
}
