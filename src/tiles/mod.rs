// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Tiled storage of the routing graph.
//!
//! The world is split into 5°×5° physical files, each holding 25 1°×1° slices,
//! each holding a grid of cells. A cell is stored as a sub-tile: a checksummed
//! run of node bodies sorted by id. [NodesCache] opens files lazily, decodes
//! sub-tiles into [MicroCaches](MicroCache) on first use and materializes
//! nodes into a [NodesMap] as the search reaches them.

mod codec;
mod error;
mod micro_cache;
mod node_body;
mod osm_file;
mod physical_file;
mod writer;

pub use codec::DecodeError;
pub use error::TileError;
pub use micro_cache::{encode_sub_tile, MicroCache};
pub use node_body::{decode_node_body, encode_node_body, LinkData, LinkRecord, NodeRecord};
pub use physical_file::{file_base, file_name, PhysicalFile, CURRENT_DIVISOR, LEGACY_DIVISOR};
pub use writer::{TileFormat, TileWriter};

use crate::distance::{id_to_position, position_id};
use crate::graph::{NodeId, NodesMap};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Default memory budget of a [NodesCache], in bytes.
pub const DEFAULT_MAX_MEMORY: usize = 64 * 1024 * 1024;

#[derive(Debug)]
enum TileSlot {
    Loaded(MicroCache),

    /// Dropped to save memory; re-read on next access.
    Ghost,

    /// The cell holds no nodes.
    Empty,
}

/// Counters describing the work done by a [NodesCache].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub tiles_loaded: usize,
    pub tiles_ghosted: usize,
    pub tiles_compacted: usize,
    pub nodes_decoded: usize,
}

/// Lazily loaded tiles and the graph materialized from them.
#[derive(Debug)]
pub struct NodesCache {
    segment_dir: PathBuf,
    lookup_version: u16,
    max_memory: usize,
    files: HashMap<(i32, i32), Option<PhysicalFile>>,
    tiles: HashMap<(i32, i32), TileSlot>,
    cell_nodes: HashMap<(i32, i32), Vec<NodeId>>,
    tiles_size: usize,
    graph: NodesMap,
    stats: CacheStats,
}

impl NodesCache {
    /// Creates a cache reading `*.rd5` files from `segment_dir`.
    pub fn new(segment_dir: impl Into<PathBuf>, lookup_version: u16, max_memory: usize) -> Self {
        Self {
            segment_dir: segment_dir.into(),
            lookup_version,
            max_memory,
            files: HashMap::new(),
            tiles: HashMap::new(),
            cell_nodes: HashMap::new(),
            tiles_size: 0,
            graph: NodesMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn segment_dir(&self) -> &Path {
        &self.segment_dir
    }

    pub fn graph(&self) -> &NodesMap {
        &self.graph
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Bytes currently held by decoded sub-tiles and the materialized graph.
    pub fn memory_in_use(&self) -> usize {
        self.tiles_size + self.graph.memory_estimate()
    }

    /// Opens the physical file covering a position on first use, returning its
    /// south-west corner. Missing files yield `None`.
    fn open_file(&mut self, ilon: i32, ilat: i32) -> Result<Option<(i32, i32)>, TileError> {
        let base = file_base(ilon, ilat);
        if !self.files.contains_key(&base) {
            let path = self.segment_dir.join(file_name(base));
            let file = match PhysicalFile::open(&path, base, self.lookup_version) {
                Ok(f) => Some(f),
                Err(TileError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                    log::debug!("no tile file {}", path.display());
                    None
                }
                Err(e) => return Err(e),
            };
            self.files.insert(base, file);
        }
        Ok(self.files.get(&base).is_some_and(|f| f.is_some()).then_some(base))
    }

    /// Returns true if a tile file covers the position.
    pub fn has_data_for(&mut self, ilon: i32, ilat: i32) -> Result<bool, TileError> {
        Ok(self.open_file(ilon, ilat)?.is_some())
    }

    /// Size of a cell at the position in fixed-point units, if a file covers it.
    pub fn cell_size_at(&mut self, ilon: i32, ilat: i32) -> Result<Option<i32>, TileError> {
        let Some(base) = self.open_file(ilon, ilat)? else {
            return Ok(None);
        };
        Ok(self.files.get(&base).and_then(|f| f.as_ref()).map(|f| f.cell_size()))
    }

    /// Returns the south-west corner of the cell containing the position, loading
    /// its sub-tile if necessary. `None` if no file covers the position.
    fn load_cell(&mut self, ilon: i32, ilat: i32) -> Result<Option<(i32, i32)>, TileError> {
        let Some(base) = self.open_file(ilon, ilat)? else {
            return Ok(None);
        };
        let Some(Some(file)) = self.files.get_mut(&base) else {
            return Ok(None);
        };
        let key = file.cell_origin(ilon, ilat);

        if matches!(self.tiles.get(&key), None | Some(TileSlot::Ghost)) {
            let slot = match file.read_cell(ilon, ilat)? {
                Some(bytes) => {
                    let what = format!("{} cell {},{}", file.path().display(), key.0, key.1);
                    let mc = MicroCache::decode(key.0, key.1, &bytes, &what)?;
                    self.tiles_size += mc.size();
                    self.stats.tiles_loaded += 1;
                    TileSlot::Loaded(mc)
                }
                None => TileSlot::Empty,
            };
            self.tiles.insert(key, slot);
            self.check_memory(key)?;
        }

        Ok(Some(key))
    }

    /// Returns the sub-tile of the cell containing the position.
    /// `None` if no file covers the position or the cell is empty.
    pub fn get_segment_for(&mut self, ilon: i32, ilat: i32) -> Result<Option<&mut MicroCache>, TileError> {
        let Some(key) = self.load_cell(ilon, ilat)? else {
            return Ok(None);
        };
        match self.tiles.get_mut(&key) {
            Some(TileSlot::Loaded(mc)) => Ok(Some(mc)),
            _ => Ok(None),
        }
    }

    /// Makes sure the node is resolved, decoding its body from its sub-tile.
    ///
    /// Returns false if the node's data isn't available (no file, or the node
    /// lies outside of the stored area).
    pub fn obtain_non_hollow_node(&mut self, node: NodeId) -> Result<bool, TileError> {
        let n = self.graph.node(node);
        if !n.is_hollow() {
            return Ok(true);
        }
        let (ilon, ilat) = (n.ilon, n.ilat);

        let Some(key) = self.load_cell(ilon, ilat)? else {
            return Ok(false);
        };
        let Some(TileSlot::Loaded(mc)) = self.tiles.get_mut(&key) else {
            return Ok(false);
        };
        let Some(body) = mc.get_and_clear(position_id(ilon, ilat))? else {
            return Ok(false);
        };

        let record = decode_node_body(ilon, ilat, body).map_err(|e| {
            TileError::decode(format!("node {ilon},{ilat}"), e)
        })?;
        self.materialize(key, node, record);
        Ok(true)
    }

    /// Resolves every node stored in the cell containing the position,
    /// returning all nodes of the cell resolved during this generation.
    pub fn load_all_in_segment(&mut self, ilon: i32, ilat: i32) -> Result<Vec<NodeId>, TileError> {
        let Some(key) = self.load_cell(ilon, ilat)? else {
            return Ok(Vec::new());
        };

        if let Some(TileSlot::Loaded(mc)) = self.tiles.get_mut(&key) {
            let ids: Vec<i64> = mc.unconsumed_ids().collect();
            let mut records = Vec::with_capacity(ids.len());
            for id in ids {
                let (ilon, ilat) = id_to_position(id);
                if self.graph.find(ilon, ilat).is_some_and(|n| !self.graph.node(n).is_hollow()) {
                    continue;
                }

                let body = mc.get_and_clear(id)?.unwrap_or_default();
                let record = decode_node_body(ilon, ilat, body).map_err(|e| {
                    TileError::decode(format!("node {ilon},{ilat}"), e)
                })?;
                records.push(record);
            }

            for record in records {
                let node = self.graph.get_or_insert(record.ilon, record.ilat);
                self.materialize(key, node, record);
            }
        }

        Ok(self.cell_nodes.get(&key).cloned().unwrap_or_default())
    }

    /// Resolves a node from its decoded record, creating hollow neighbors and links.
    fn materialize(&mut self, cell: (i32, i32), node: NodeId, record: NodeRecord) {
        self.graph.resolve(
            node,
            record.elevation,
            record.description.map(Vec::into_boxed_slice),
            record.restrictions,
        );

        for link in record.links {
            let target = self.graph.get_or_insert(link.target_lon, link.target_lat);
            if target == node {
                continue;
            }

            match link.data {
                Some(data) => {
                    let l = self
                        .graph
                        .find_link(node, target, true)
                        .unwrap_or_else(|| self.graph.add_link(node, target));
                    self.graph.describe_link(
                        l,
                        node,
                        data.description.into_boxed_slice(),
                        data.geometry,
                    );
                }
                None => {
                    if self.graph.find_link(node, target, false).is_none() {
                        self.graph.add_link(node, target);
                    }
                }
            }
        }

        self.cell_nodes.entry(cell).or_default().push(node);
        self.stats.nodes_decoded += 1;
    }

    /// Frees memory when over budget: virgin sub-tiles (except `keep`) are dropped,
    /// others compacted.
    fn check_memory(&mut self, keep: (i32, i32)) -> Result<(), TileError> {
        if self.memory_in_use() <= self.max_memory {
            return Ok(());
        }

        let mut ghosted = 0;
        let mut compacted = 0;
        for (&key, slot) in self.tiles.iter_mut() {
            if key == keep {
                continue;
            }
            if let TileSlot::Loaded(mc) = slot {
                if mc.is_virgin() {
                    self.tiles_size -= mc.size();
                    *slot = TileSlot::Ghost;
                    ghosted += 1;
                } else {
                    let freed = mc.compact();
                    if freed > 0 {
                        self.tiles_size -= freed;
                        compacted += 1;
                    }
                }
            }
        }

        self.stats.tiles_ghosted += ghosted;
        self.stats.tiles_compacted += compacted;
        log::debug!(
            "memory budget exceeded: ghosted {ghosted} and compacted {compacted} sub-tiles, {} bytes in use",
            self.memory_in_use()
        );

        if self.memory_in_use() > self.max_memory {
            Err(TileError::MemoryExhausted {
                used: self.memory_in_use(),
                limit: self.max_memory,
            })
        } else {
            Ok(())
        }
    }

    /// Starts a new cache generation: drops the materialized graph and all
    /// decoded sub-tiles, keeping the open files.
    pub fn new_generation(&mut self) {
        self.graph.clear();
        self.tiles.clear();
        self.cell_nodes.clear();
        self.tiles_size = 0;
    }

    /// Releases everything, including open file handles.
    pub fn close(&mut self) {
        self.new_generation();
        self.files.clear();
    }
}

impl Drop for NodesCache {
    fn drop(&mut self) {
        self.close();
    }
}
