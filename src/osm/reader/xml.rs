// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::io;
use std::str::from_utf8;

use quick_xml::events::{BytesStart, Event};

use super::model;

/// Parser is a trait for objects which can parse XML.
///
/// This trait only exists to fix the mismatch of
/// [quick_xml::Reader::read_event] when working on buffered data
/// and [quick_xml::Reader::read_event_into] when working on IO.
pub(super) trait Parser {
    fn read_event<'a>(&'a mut self) -> quick_xml::Result<Event<'a>>;
}

/// IoParser implements [Parser] over an [std::io::BufRead].
pub(super) struct IoParser<R: io::BufRead>(quick_xml::Reader<R>, Vec<u8>);

impl<R: io::BufRead> IoParser<R> {
    #[inline]
    fn new(reader: R) -> Self {
        Self(quick_xml::Reader::from_reader(reader), Vec::default())
    }
}

impl<R: io::BufRead> Parser for IoParser<R> {
    #[inline]
    fn read_event<'a>(&'a mut self) -> quick_xml::Result<Event<'a>> {
        self.1.clear();
        self.0.read_event_into(&mut self.1)
    }
}

/// BufParser implements [Parser] over a slice of bytes (`&[u8]`).
pub(super) struct BufParser<'a>(quick_xml::Reader<&'a [u8]>);

impl<'a> BufParser<'a> {
    #[inline]
    fn new(data: &'a [u8]) -> Self {
        Self(quick_xml::Reader::from_reader(data))
    }
}

impl Parser for BufParser<'_> {
    #[inline]
    fn read_event<'b>(&'b mut self) -> quick_xml::Result<Event<'b>> {
        self.0.read_event()
    }
}

/// Reader reads osm [Features](model::Feature) from an XML file.
pub(super) struct Reader<P: Parser> {
    parser: P,
    eof: bool,
}

impl<P: Parser> Reader<P> {
    #[inline]
    fn new(parser: P) -> Self {
        Self { parser, eof: false }
    }
}

impl<P: Parser> Iterator for Reader<P> {
    type Item = Result<model::Feature, quick_xml::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut f: Option<model::Feature> = None;

        while !self.eof {
            let event = match self.parser.read_event() {
                Ok(e) => e,
                Err(e) => return Some(Err(e)),
            };

            match event {
                Event::Empty(start) => match start.local_name().as_ref() {
                    b"node" => {
                        if let Some(n) = parse_node(&start) {
                            return Some(Ok(model::Feature::Node(n)));
                        }
                    }
                    // "way" or "relation" can't be self-closing
                    b"tag" => {
                        if let Some(tags) = feature_tags(&mut f) {
                            if let Some((k, v)) = parse_tag(&start) {
                                tags.insert(k, v);
                            }
                        }
                    }
                    b"nd" => {
                        if let Some(nodes) = feature_nodes(&mut f) {
                            if let Some(ref_) = parse_nd(&start) {
                                nodes.push(ref_);
                            }
                        }
                    }
                    b"member" => {
                        if let Some(members) = feature_members(&mut f) {
                            if let Some(member) = parse_member(&start) {
                                members.push(member);
                            }
                        }
                    }
                    _ => {}
                },

                Event::Start(start) => match start.local_name().as_ref() {
                    b"node" => f = parse_node(&start).map(model::Feature::Node),
                    b"way" => f = parse_way(&start).map(model::Feature::Way),
                    b"relation" => f = parse_relation(&start).map(model::Feature::Relation),
                    // "tag", "nd" and "member" must be self-closing
                    _ => {}
                },

                Event::End(end) => match end.local_name().as_ref() {
                    b"node" | b"way" | b"relation" => {
                        if let Some(f) = f.take() {
                            return Some(Ok(f));
                        }
                    }
                    _ => {}
                },

                Event::Eof => {
                    self.eof = true;
                }

                _ => {}
            }
        }

        f.map(Ok)
    }
}

impl<'a> Reader<BufParser<'a>> {
    #[inline]
    pub(super) fn from_buffer(data: &'a [u8]) -> Self {
        Self::new(BufParser::new(data))
    }
}

impl<R: io::BufRead> Reader<IoParser<R>> {
    #[inline]
    pub(super) fn from_io(reader: R) -> Self {
        Self::new(IoParser::new(reader))
    }
}

fn parse_id(start: &BytesStart<'_>) -> Option<i64> {
    for attr in start.attributes() {
        let attr = attr.ok()?;
        if attr.key.as_ref() == b"id" {
            return from_utf8(&attr.value).ok()?.parse().ok();
        }
    }
    None
}

fn parse_node(start: &BytesStart<'_>) -> Option<model::Node> {
    let mut id: i64 = 0;
    let mut lat = f64::NAN;
    let mut lon = f64::NAN;

    for attr in start.attributes() {
        let attr = attr.ok()?;
        match attr.key.as_ref() {
            b"id" => id = from_utf8(&attr.value).ok()?.parse().ok()?,
            b"lat" => lat = from_utf8(&attr.value).ok()?.parse().ok()?,
            b"lon" => lon = from_utf8(&attr.value).ok()?.parse().ok()?,
            _ => {}
        }
    }

    if id != 0 && lat.is_finite() && lon.is_finite() {
        Some(model::Node {
            id,
            lat,
            lon,
            tags: HashMap::default(),
        })
    } else {
        log::debug!("skipping a node without a valid id or position");
        None
    }
}

fn parse_way(start: &BytesStart<'_>) -> Option<model::Way> {
    match parse_id(start) {
        Some(id) if id != 0 => Some(model::Way {
            id,
            nodes: Vec::default(),
            tags: HashMap::default(),
        }),
        _ => {
            log::debug!("skipping a way without a valid id");
            None
        }
    }
}

fn parse_relation(start: &BytesStart<'_>) -> Option<model::Relation> {
    match parse_id(start) {
        Some(id) if id != 0 => Some(model::Relation {
            id,
            members: Vec::default(),
            tags: HashMap::default(),
        }),
        _ => {
            log::debug!("skipping a relation without a valid id");
            None
        }
    }
}

fn parse_tag(start: &BytesStart<'_>) -> Option<(String, String)> {
    let mut k = None;
    let mut v = None;

    for attr in start.attributes() {
        let attr = attr.ok()?;
        match attr.key.as_ref() {
            b"k" => k = Some(attr.unescape_value().ok()?.into_owned()),
            b"v" => v = Some(attr.unescape_value().ok()?.into_owned()),
            _ => {}
        }
    }

    k.map(|k| (k, v.unwrap_or_default()))
}

fn parse_nd(start: &BytesStart<'_>) -> Option<i64> {
    let mut ref_: i64 = 0;

    for attr in start.attributes() {
        let attr = attr.ok()?;
        if attr.key.as_ref() == b"ref" {
            ref_ = from_utf8(&attr.value).ok()?.parse().ok()?;
        }
    }

    (ref_ != 0).then_some(ref_)
}

fn parse_member(start: &BytesStart<'_>) -> Option<model::RelationMember> {
    let mut ref_: i64 = 0;
    let mut type_ = None;
    let mut role = None;

    for attr in start.attributes() {
        let attr = attr.ok()?;
        match attr.key.as_ref() {
            b"ref" => ref_ = from_utf8(&attr.value).ok()?.parse().ok()?,
            b"type" => type_ = Some(parse_feature_type(&attr.value)?),
            b"role" => role = Some(from_utf8(&attr.value).ok()?.to_string()),
            _ => {}
        }
    }

    match (ref_, type_, role) {
        (0, _, _) => None,
        (ref_, Some(type_), Some(role)) => Some(model::RelationMember { type_, ref_, role }),
        _ => None,
    }
}

fn parse_feature_type(s: &[u8]) -> Option<model::FeatureType> {
    match s {
        b"node" => Some(model::FeatureType::Node),
        b"way" => Some(model::FeatureType::Way),
        b"relation" => Some(model::FeatureType::Relation),
        _ => None,
    }
}

fn feature_tags(f: &mut Option<model::Feature>) -> Option<&mut HashMap<String, String>> {
    match f {
        None => None,
        Some(model::Feature::Node(n)) => Some(&mut n.tags),
        Some(model::Feature::Way(w)) => Some(&mut w.tags),
        Some(model::Feature::Relation(r)) => Some(&mut r.tags),
    }
}

fn feature_nodes(f: &mut Option<model::Feature>) -> Option<&mut Vec<i64>> {
    match f {
        Some(model::Feature::Way(w)) => Some(&mut w.nodes),
        _ => None,
    }
}

fn feature_members(f: &mut Option<model::Feature>) -> Option<&mut Vec<model::RelationMember>> {
    match f {
        Some(model::Feature::Relation(r)) => Some(&mut r.members),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::model::{Feature, FeatureType, Node, Relation, RelationMember, Way};
    use super::*;

    macro_rules! tags {
        {} => { HashMap::default() };
        {$( $k:literal : $v:literal ),+} => {
            HashMap::from_iter([ $( ($k.to_string(), $v.to_string()) ),+ ])
        };
    }

    const XML: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <node id="-1" lat="49.5" lon="8.5" />
  <node id="-2" lat="49.501" lon="8.5">
    <tag k="ele" v="112.5" />
    <tag k="highway" v="traffic_signals" />
  </node>
  <node id="-3" lat="49.5" lon="8.502" />
  <way id="-100">
    <nd ref="-1" />
    <nd ref="-2" />
    <nd ref="-3" />
    <tag k="highway" v="residential" />
    <tag k="name" v="Rue d&apos;Example" />
  </way>
  <relation id="-200">
    <member type="way" ref="-100" role="from" />
    <member type="node" ref="-2" role="via" />
    <member type="way" ref="-100" role="to" />
    <tag k="restriction" v="no_u_turn" />
    <tag k="type" v="restriction" />
  </relation>
</osm>
"#;

    fn check(features: impl Iterator<Item = Result<Feature, quick_xml::Error>>) {
        let mut nodes = Vec::new();
        let mut ways = Vec::new();
        let mut relations = Vec::new();
        for f in features {
            match f.unwrap() {
                Feature::Node(n) => nodes.push(n),
                Feature::Way(w) => ways.push(w),
                Feature::Relation(r) => relations.push(r),
            }
        }

        assert_eq!(
            nodes,
            vec![
                Node {
                    id: -1,
                    lat: 49.5,
                    lon: 8.5,
                    tags: tags! {},
                },
                Node {
                    id: -2,
                    lat: 49.501,
                    lon: 8.5,
                    tags: tags! {"ele": "112.5", "highway": "traffic_signals"},
                },
                Node {
                    id: -3,
                    lat: 49.5,
                    lon: 8.502,
                    tags: tags! {},
                },
            ]
        );
        assert_eq!(
            ways,
            vec![Way {
                id: -100,
                nodes: vec![-1, -2, -3],
                tags: tags! {"highway": "residential", "name": "Rue d'Example"},
            }]
        );
        assert_eq!(
            relations,
            vec![Relation {
                id: -200,
                members: vec![
                    RelationMember {
                        type_: FeatureType::Way,
                        ref_: -100,
                        role: "from".to_string(),
                    },
                    RelationMember {
                        type_: FeatureType::Node,
                        ref_: -2,
                        role: "via".to_string(),
                    },
                    RelationMember {
                        type_: FeatureType::Way,
                        ref_: -100,
                        role: "to".to_string(),
                    },
                ],
                tags: tags! {"restriction": "no_u_turn", "type": "restriction"},
            }]
        );
        assert_eq!(relations[0].single_member("via", FeatureType::Node), Some(-2));
        assert_eq!(relations[0].single_member("via", FeatureType::Way), None);
    }

    #[test]
    fn parse_from_buf() {
        check(Reader::from_buffer(XML));
    }

    #[test]
    fn parse_from_io() {
        check(Reader::from_io(io::Cursor::new(XML)));
    }
}
