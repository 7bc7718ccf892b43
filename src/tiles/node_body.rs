// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Encoding of a single node inside a sub-tile.
//!
//! Layout (all varints signed unless noted):
//! - elevation in quarter-meters (`i16::MIN` if unknown),
//! - unsigned length + bytes of the node description (length 0: none),
//! - unsigned restriction count, then per restriction a flags byte
//!   (bit 0: positive, bit 1: except bikes, bit 2: except motorcars)
//!   and the from/to positions relative to the node,
//! - unsigned link count, then per link the target position relative to the node,
//!   a flags byte (bit 0: stub) and, for non-stub links, the way description and
//!   the shape points (each relative to the previous point, with an absolute elevation).
//!
//! A link is stored in full at exactly one of its ends, which owns its description
//! (written for the direction owner → target). The other end carries a stub.

use super::codec::{ByteReader, ByteWriter, DecodeError};
use crate::graph::{GeoPoint, TurnRestriction};

const NO_ELEVATION: i16 = i16::MIN;

const RESTRICTION_POSITIVE: u8 = 1;
const RESTRICTION_EXCEPT_BIKES: u8 = 2;
const RESTRICTION_EXCEPT_MOTORCARS: u8 = 4;

const LINK_STUB: u8 = 1;

/// Full content of a node, as stored in a tile.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeRecord {
    pub ilon: i32,
    pub ilat: i32,
    pub elevation: Option<i16>,
    pub description: Option<Vec<u8>>,
    pub restrictions: Vec<TurnRestriction>,
    pub links: Vec<LinkRecord>,
}

/// A link leaving a [NodeRecord].
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRecord {
    pub target_lon: i32,
    pub target_lat: i32,

    /// Way data, `None` for a stub (the data is stored at the target node).
    pub data: Option<LinkData>,
}

/// Way data of a link, stored at its owning end.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkData {
    pub description: Vec<u8>,

    /// Shape points in the direction owner → target.
    pub geometry: Vec<GeoPoint>,
}

fn write_elevation(w: &mut ByteWriter, elevation: Option<i16>) {
    w.write_signed(elevation.unwrap_or(NO_ELEVATION) as i64);
}

fn read_elevation(r: &mut ByteReader) -> Result<Option<i16>, DecodeError> {
    let start = r.position();
    let e = i16::try_from(r.read_signed()?).map_err(|_| DecodeError::OutOfRange(start))?;
    Ok(if e == NO_ELEVATION { None } else { Some(e) })
}

fn write_delta(w: &mut ByteWriter, base: (i32, i32), p: (i32, i32)) {
    w.write_signed(p.0 as i64 - base.0 as i64);
    w.write_signed(p.1 as i64 - base.1 as i64);
}

fn read_delta(r: &mut ByteReader, base: (i32, i32)) -> Result<(i32, i32), DecodeError> {
    let start = r.position();
    let dlon = r.read_signed()?;
    let dlat = r.read_signed()?;
    let lon = i32::try_from(base.0 as i64 + dlon).map_err(|_| DecodeError::OutOfRange(start))?;
    let lat = i32::try_from(base.1 as i64 + dlat).map_err(|_| DecodeError::OutOfRange(start))?;
    Ok((lon, lat))
}

/// Appends the body of a node (everything except its position) to `w`.
pub fn encode_node_body(node: &NodeRecord, w: &mut ByteWriter) {
    let base = (node.ilon, node.ilat);

    write_elevation(w, node.elevation);

    let description = node.description.as_deref().unwrap_or_default();
    w.write_varint(description.len() as u64);
    w.write_bytes(description);

    w.write_varint(node.restrictions.len() as u64);
    for r in &node.restrictions {
        let mut flags = 0;
        if r.is_positive {
            flags |= RESTRICTION_POSITIVE;
        }
        if r.except_bikes {
            flags |= RESTRICTION_EXCEPT_BIKES;
        }
        if r.except_motorcars {
            flags |= RESTRICTION_EXCEPT_MOTORCARS;
        }
        w.write_u8(flags);
        write_delta(w, base, (r.from_lon, r.from_lat));
        write_delta(w, base, (r.to_lon, r.to_lat));
    }

    w.write_varint(node.links.len() as u64);
    for link in &node.links {
        write_delta(w, base, (link.target_lon, link.target_lat));
        match &link.data {
            None => w.write_u8(LINK_STUB),
            Some(data) => {
                w.write_u8(0);
                w.write_varint(data.description.len() as u64);
                w.write_bytes(&data.description);
                w.write_varint(data.geometry.len() as u64);

                let mut prev = base;
                for p in &data.geometry {
                    write_delta(w, prev, (p.ilon, p.ilat));
                    write_elevation(w, p.elevation);
                    prev = (p.ilon, p.ilat);
                }
            }
        }
    }
}

/// Decodes the body of the node at `(ilon, ilat)`.
pub fn decode_node_body(ilon: i32, ilat: i32, body: &[u8]) -> Result<NodeRecord, DecodeError> {
    let base = (ilon, ilat);
    let mut r = ByteReader::new(body);

    let elevation = read_elevation(&mut r)?;

    let description_len = r.read_length()?;
    let description = if description_len > 0 {
        Some(r.read_bytes(description_len)?.to_vec())
    } else {
        None
    };

    let restriction_count = r.read_length()?;
    let mut restrictions = Vec::with_capacity(restriction_count);
    for _ in 0..restriction_count {
        let flags = r.read_u8()?;
        let from = read_delta(&mut r, base)?;
        let to = read_delta(&mut r, base)?;
        restrictions.push(TurnRestriction {
            is_positive: flags & RESTRICTION_POSITIVE != 0,
            except_bikes: flags & RESTRICTION_EXCEPT_BIKES != 0,
            except_motorcars: flags & RESTRICTION_EXCEPT_MOTORCARS != 0,
            from_lon: from.0,
            from_lat: from.1,
            to_lon: to.0,
            to_lat: to.1,
        });
    }

    let link_count = r.read_length()?;
    let mut links = Vec::with_capacity(link_count);
    for _ in 0..link_count {
        let target = read_delta(&mut r, base)?;
        let flags = r.read_u8()?;

        let data = if flags & LINK_STUB != 0 {
            None
        } else {
            let len = r.read_length()?;
            let description = r.read_bytes(len)?.to_vec();
            let point_count = r.read_length()?;
            let mut geometry = Vec::with_capacity(point_count);
            let mut prev = base;
            for _ in 0..point_count {
                let p = read_delta(&mut r, prev)?;
                let elevation = read_elevation(&mut r)?;
                geometry.push(GeoPoint::new(p.0, p.1, elevation));
                prev = p;
            }
            Some(LinkData {
                description,
                geometry,
            })
        };

        links.push(LinkRecord {
            target_lon: target.0,
            target_lat: target.1,
            data,
        });
    }

    if !r.is_empty() {
        return Err(DecodeError::OutOfRange(r.position()));
    }

    Ok(NodeRecord {
        ilon,
        ilat,
        elevation,
        description,
        restrictions,
        links,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_body_round_trip() {
        let node = NodeRecord {
            ilon: 188_500_000,
            ilat: 139_250_000,
            elevation: Some(1234),
            description: Some(b"highway\0traffic_signals".to_vec()),
            restrictions: vec![TurnRestriction {
                is_positive: true,
                except_bikes: true,
                except_motorcars: false,
                from_lon: 188_499_000,
                from_lat: 139_250_000,
                to_lon: 188_500_000,
                to_lat: 139_251_000,
            }],
            links: vec![
                LinkRecord {
                    target_lon: 188_501_000,
                    target_lat: 139_250_500,
                    data: Some(LinkData {
                        description: b"highway\0residential".to_vec(),
                        geometry: vec![
                            GeoPoint::new(188_500_400, 139_250_100, None),
                            GeoPoint::new(188_500_700, 139_250_300, Some(-8)),
                        ],
                    }),
                },
                LinkRecord {
                    target_lon: 188_499_000,
                    target_lat: 139_250_000,
                    data: None,
                },
            ],
        };

        let mut w = ByteWriter::new();
        encode_node_body(&node, &mut w);
        let decoded = decode_node_body(node.ilon, node.ilat, w.as_slice()).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn minimal_node() {
        let node = NodeRecord {
            ilon: 5,
            ilat: 7,
            ..Default::default()
        };
        let mut w = ByteWriter::new();
        encode_node_body(&node, &mut w);

        // elevation, description length, restriction count, link count
        assert_eq!(w.len(), 3 + 1 + 1 + 1);
        assert_eq!(decode_node_body(5, 7, w.as_slice()).unwrap(), node);
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut w = ByteWriter::new();
        encode_node_body(&NodeRecord::default(), &mut w);
        w.write_u8(0);
        assert!(decode_node_body(0, 0, w.as_slice()).is_err());
        assert!(decode_node_body(0, 0, &w.as_slice()[..2]).is_err());
    }
}
