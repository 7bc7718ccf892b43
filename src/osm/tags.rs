// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Encoding of OSM tags into the description blobs stored in tiles:
//! keys and values as UTF-8 strings, each terminated by a zero byte.

use std::collections::HashMap;

/// Version of the description encoding, stored in tile headers.
pub const TAG_LOOKUP_VERSION: u16 = 1;

/// Way keys kept in tiles. Keys starting with `oneway:` are kept as well.
const WAY_KEYS: &[&str] = &[
    "access",
    "bicycle",
    "bus",
    "foot",
    "highway",
    "junction",
    "maxspeed",
    "motor_vehicle",
    "motorcar",
    "motorroad",
    "oneway",
    "psv",
    "public_transport",
    "railway",
    "surface",
    "vehicle",
];

/// Node keys kept in tiles.
const NODE_KEYS: &[&str] = &[
    "access",
    "barrier",
    "bicycle",
    "foot",
    "highway",
    "motor_vehicle",
    "motorcar",
    "vehicle",
];

fn is_relevant_way_key(k: &str) -> bool {
    WAY_KEYS.contains(&k) || k.starts_with("oneway:")
}

fn is_relevant_node_key(k: &str) -> bool {
    NODE_KEYS.contains(&k)
}

fn encode<'a>(tags: impl Iterator<Item = (&'a str, &'a str)>, relevant: fn(&str) -> bool) -> Option<Vec<u8>> {
    let mut tags: Vec<_> = tags.filter(|(k, _)| relevant(k)).collect();
    if tags.is_empty() {
        return None;
    }
    tags.sort();

    let mut buf = Vec::new();
    for (k, v) in tags {
        buf.extend_from_slice(k.as_bytes());
        buf.push(0);
        buf.extend_from_slice(v.as_bytes());
        buf.push(0);
    }
    Some(buf)
}

/// Encodes the routing-relevant tags of a way. Tags are sorted, so equal tag sets
/// produce equal descriptions. Returns `None` if no tag is relevant.
pub fn encode_way_tags(tags: &HashMap<String, String>) -> Option<Vec<u8>> {
    encode(tags.iter().map(|(k, v)| (k.as_str(), v.as_str())), is_relevant_way_key)
}

/// Encodes the routing-relevant tags of a node. Returns `None` if no tag is relevant.
pub fn encode_node_tags(tags: &HashMap<String, String>) -> Option<Vec<u8>> {
    encode(tags.iter().map(|(k, v)| (k.as_str(), v.as_str())), is_relevant_node_key)
}

/// Decodes a description blob back into tags. Malformed UTF-8 is replaced
/// and a dangling key without a value is dropped.
pub fn decode_tags(description: &[u8]) -> HashMap<String, String> {
    let mut parts = description
        .split(|&b| b == 0)
        .map(|s| String::from_utf8_lossy(s).into_owned());

    let mut tags = HashMap::new();
    while let (Some(k), Some(v)) = (parts.next(), parts.next()) {
        if !k.is_empty() {
            tags.insert(k, v);
        }
    }
    tags
}

/// Formats a description blob as `key=value` pairs separated by spaces.
pub fn describe_tags(description: &[u8]) -> String {
    let mut tags: Vec<_> = decode_tags(description).into_iter().collect();
    tags.sort();
    tags.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! tags {
        {} => { HashMap::<String, String>::default() };
        {$( $k:literal : $v:literal ),+} => {
            HashMap::from_iter([ $( ($k.to_string(), $v.to_string()) ),+ ])
        };
    }

    #[test]
    fn way_tags() {
        let encoded =
            encode_way_tags(&tags! {"highway": "primary", "name": "Main St", "oneway:bicycle": "no"})
                .unwrap();
        assert_eq!(encoded, b"highway\0primary\0oneway:bicycle\0no\0");
        assert_eq!(
            decode_tags(&encoded),
            tags! {"highway": "primary", "oneway:bicycle": "no"}
        );
        assert_eq!(describe_tags(&encoded), "highway=primary oneway:bicycle=no");

        assert_eq!(encode_way_tags(&tags! {"name": "Main St"}), None);
        assert_eq!(encode_way_tags(&tags! {}), None);
    }

    #[test]
    fn node_tags() {
        assert_eq!(
            encode_node_tags(&tags! {"barrier": "gate", "ele": "300"}).unwrap(),
            b"barrier\0gate\0"
        );
        assert_eq!(encode_node_tags(&tags! {"ele": "300"}), None);
    }

    #[test]
    fn malformed_descriptions() {
        assert_eq!(decode_tags(b""), tags! {});
        assert_eq!(decode_tags(b"highway"), tags! {});
        assert_eq!(decode_tags(b"highway\0track"), tags! {"highway": "track"});
    }
}
