// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use super::codec::{ByteReader, ByteWriter};
use super::node_body::{encode_node_body, NodeRecord};
use super::TileError;
use crate::distance::{id_to_position, position_id};
use flate2::Crc;

/// Relative position marking the end of the node entries of a sub-tile.
const SENTINEL: i16 = 0x7FFF;

/// Decoded sub-tile: the raw bodies of all nodes within one cell of a tile,
/// sorted by node id.
///
/// Every node body may be taken out ("consumed") only once per cache generation.
/// A sub-tile from which nothing was consumed yet is "virgin" and may be dropped
/// and re-read at any time.
#[derive(Debug, Clone, Default)]
pub struct MicroCache {
    ids: Vec<i64>,
    ends: Vec<u32>,
    data: Vec<u8>,
    consumed: Vec<bool>,
    consumed_count: usize,
    virgin: bool,
}

impl MicroCache {
    /// Decodes a sub-tile of the cell with the given fixed-point origin,
    /// verifying its trailing checksum.
    pub fn decode(
        cell_lon: i32,
        cell_lat: i32,
        bytes: &[u8],
        what: &str,
    ) -> Result<Self, TileError> {
        if bytes.len() < 4 {
            return Err(TileError::corrupt(what, "sub-tile shorter than its checksum"));
        }
        let (payload, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let mut crc = Crc::new();
        crc.update(payload);
        if crc.sum() != stored {
            return Err(TileError::CrcMismatch {
                what: what.to_string(),
                stored,
                computed: crc.sum(),
            });
        }

        let mut mc = Self {
            virgin: true,
            ..Self::default()
        };
        let mut r = ByteReader::new(payload);
        loop {
            let dlon = r.read_i16().map_err(|e| TileError::decode(what, e))?;
            let dlat = r.read_i16().map_err(|e| TileError::decode(what, e))?;
            if dlon == SENTINEL && dlat == SENTINEL {
                break;
            }

            let size = r.read_u32().map_err(|e| TileError::decode(what, e))? as usize;
            let body = r.read_bytes(size).map_err(|e| TileError::decode(what, e))?;

            let id = position_id(cell_lon + dlon as i32, cell_lat + dlat as i32);
            if mc.ids.last().is_some_and(|&last| last >= id) {
                return Err(TileError::corrupt(what, "node ids are not strictly increasing"));
            }

            mc.data.extend_from_slice(body);
            mc.ids.push(id);
            mc.ends.push(mc.data.len() as u32);
        }

        if !r.is_empty() {
            return Err(TileError::corrupt(what, "data after the end-of-nodes marker"));
        }

        mc.consumed = vec![false; mc.ids.len()];
        Ok(mc)
    }

    /// Number of nodes in the sub-tile (consumed or not).
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns true if no node was consumed from this sub-tile since it was decoded.
    pub fn is_virgin(&self) -> bool {
        self.virgin
    }

    /// Approximate number of bytes held by the sub-tile.
    pub fn size(&self) -> usize {
        self.data.len() + self.ids.len() * (8 + 4 + 1)
    }

    /// Ids of all nodes not consumed yet.
    pub fn unconsumed_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.ids
            .iter()
            .zip(&self.consumed)
            .filter(|(_, &c)| !c)
            .map(|(&id, _)| id)
    }

    /// Looks up a node body and marks it consumed.
    ///
    /// Returns `None` if the node isn't in this sub-tile, and an error if it was
    /// already consumed.
    pub fn get_and_clear(&mut self, id: i64) -> Result<Option<&[u8]>, TileError> {
        let Ok(idx) = self.ids.binary_search(&id) else {
            return Ok(None);
        };

        if self.consumed[idx] {
            let (ilon, ilat) = id_to_position(id);
            return Err(TileError::NodeConsumedTwice { ilon, ilat });
        }
        self.consumed[idx] = true;
        self.consumed_count += 1;
        self.virgin = false;

        let start = if idx == 0 {
            0
        } else {
            self.ends[idx - 1] as usize
        };
        Ok(Some(&self.data[start..self.ends[idx] as usize]))
    }

    /// Drops all consumed entries, returning the number of bytes freed.
    pub fn compact(&mut self) -> usize {
        if self.consumed_count == 0 {
            return 0;
        }

        let before = self.size();
        let mut ids = Vec::with_capacity(self.ids.len() - self.consumed_count);
        let mut ends = Vec::with_capacity(ids.capacity());
        let mut data = Vec::new();

        let mut start = 0;
        for (idx, &id) in self.ids.iter().enumerate() {
            let end = self.ends[idx] as usize;
            if !self.consumed[idx] {
                data.extend_from_slice(&self.data[start..end]);
                ids.push(id);
                ends.push(data.len() as u32);
            }
            start = end;
        }

        self.consumed = vec![false; ids.len()];
        self.consumed_count = 0;
        self.ids = ids;
        self.ends = ends;
        self.data = data;
        before - self.size()
    }
}

/// Encodes the nodes of one cell into a sub-tile. Nodes must be sorted by id
/// and lie within the cell starting at `(cell_lon, cell_lat)`.
pub fn encode_sub_tile(cell_lon: i32, cell_lat: i32, nodes: &[&NodeRecord]) -> Vec<u8> {
    let mut w = ByteWriter::new();

    for node in nodes {
        let mut body = ByteWriter::new();
        encode_node_body(node, &mut body);

        w.write_i16((node.ilon - cell_lon) as i16);
        w.write_i16((node.ilat - cell_lat) as i16);
        w.write_u32(body.len() as u32);
        w.write_bytes(body.as_slice());
    }

    w.write_i16(SENTINEL);
    w.write_i16(SENTINEL);

    let mut crc = Crc::new();
    crc.update(w.as_slice());
    w.write_u32(crc.sum());
    w.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(ilon: i32, ilat: i32, elevation: i16) -> NodeRecord {
        NodeRecord {
            ilon,
            ilat,
            elevation: Some(elevation),
            ..Default::default()
        }
    }

    fn sample() -> Vec<u8> {
        let a = node(1000, 2000, 1);
        let b = node(1000, 2500, 2);
        let c = node(1500, 2000, 3);
        encode_sub_tile(1000, 2000, &[&a, &b, &c])
    }

    #[test]
    fn decode_and_consume() {
        let mut mc = MicroCache::decode(1000, 2000, &sample(), "test").unwrap();
        assert_eq!(mc.len(), 3);
        assert!(mc.is_virgin());

        let body = mc.get_and_clear(position_id(1000, 2500)).unwrap().unwrap().to_vec();
        let decoded = super::super::node_body::decode_node_body(1000, 2500, &body).unwrap();
        assert_eq!(decoded.elevation, Some(2));
        assert!(!mc.is_virgin());

        assert!(mc.get_and_clear(position_id(1, 1)).unwrap().is_none());
        assert!(matches!(
            mc.get_and_clear(position_id(1000, 2500)),
            Err(TileError::NodeConsumedTwice {
                ilon: 1000,
                ilat: 2500
            })
        ));

        let unconsumed: Vec<_> = mc.unconsumed_ids().collect();
        assert_eq!(unconsumed, vec![position_id(1000, 2000), position_id(1500, 2000)]);
    }

    #[test]
    fn compaction() {
        let mut mc = MicroCache::decode(1000, 2000, &sample(), "test").unwrap();
        assert_eq!(mc.compact(), 0);

        mc.get_and_clear(position_id(1000, 2000)).unwrap();
        let before = mc.size();
        let freed = mc.compact();
        assert!(freed > 0);
        assert_eq!(mc.size(), before - freed);
        assert_eq!(mc.len(), 2);
        assert!(!mc.is_virgin());
        assert_eq!(mc.compact(), 0);

        let body = mc.get_and_clear(position_id(1500, 2000)).unwrap().unwrap().to_vec();
        let decoded = super::super::node_body::decode_node_body(1500, 2000, &body).unwrap();
        assert_eq!(decoded.elevation, Some(3));
    }

    #[test]
    fn checksum_is_verified() {
        let mut bytes = sample();
        bytes[5] ^= 0x40;
        assert!(matches!(
            MicroCache::decode(1000, 2000, &bytes, "test"),
            Err(TileError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn empty_sub_tile() {
        let bytes = encode_sub_tile(0, 0, &[]);
        assert_eq!(bytes.len(), 8);
        let mc = MicroCache::decode(0, 0, &bytes, "test").unwrap();
        assert!(mc.is_empty());
    }
}
