// Webmap is an open source distributed web crawler.
// Copyright (C) 2024 Webmap
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Payload encodings for the frame bodies.
//!
//! Two primitives: a "size" is a fixed-width little-endian u64, a string is
//! a size followed by that many raw bytes. Everything else is built from
//! those. The encoding is deterministic (fixed input, identical bytes) and
//! decoding is its total inverse.
//!
//! A page-stats payload hoists the scheme and domain shared by all its links
//! once instead of repeating them per link; a site-graph payload transports
//! its edges as indices into the node list instead of repeating node text.

use byteorder::{ByteOrder, LittleEndian};
use hashbrown::HashMap;

use super::{Error, Result};
use crate::crawler::SiteGraph;
use crate::url::Url;
use crate::webpage::{Heading, PageStats};

struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn put_size(&mut self, value: u64) {
        let mut bytes = [0; 8];
        LittleEndian::write_u64(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn put_str(&mut self, value: &str) {
        self.put_size(value.len() as u64);
        self.buf.extend_from_slice(value.as_bytes());
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.buf.len() < count {
            return Err(Error::Truncated);
        }

        let (head, tail) = self.buf.split_at(count);
        self.buf = tail;
        Ok(head)
    }

    fn size(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    /// A size that is about to be used as an element count or length within
    /// this payload. Anything beyond the remaining buffer cannot be honest.
    fn count(&mut self) -> Result<usize> {
        let value = self.size()?;
        if value > self.buf.len() as u64 {
            return Err(Error::Truncated);
        }
        Ok(value as usize)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn str(&mut self) -> Result<String> {
        let len = self.count()?;
        Ok(String::from_utf8(self.bytes(len)?.to_vec())?)
    }
}

/// The scheme and domain every link of a page record shares, hoisted so they
/// are written once per payload rather than once per link.
fn hoist_link_origin(links: &[Url]) -> Result<(&str, &str)> {
    let mut scheme = "";
    let mut domain = "";

    for link in links {
        if !link.scheme.is_empty() {
            if !scheme.is_empty() && link.scheme != scheme {
                return Err(Error::MixedLinkOrigin);
            }
            scheme = &link.scheme;
        }

        if !link.domain.is_empty() {
            if !domain.is_empty() && link.domain != domain {
                return Err(Error::MixedLinkOrigin);
            }
            domain = &link.domain;
        }
    }

    Ok((scheme, domain))
}

pub fn encode_page_stats(stats: &PageStats) -> Result<Vec<u8>> {
    let (scheme, domain) = hoist_link_origin(&stats.links)?;

    let mut writer = PayloadWriter::new();

    writer.put_str(&stats.path);
    writer.put_size(stats.images);
    writer.put_size(stats.forms);
    writer.put_str(scheme);
    writer.put_str(domain);

    writer.put_size(stats.links.len() as u64);
    for link in &stats.links {
        writer.put_str(&link.path);
    }

    writer.put_size(stats.headings.len() as u64);
    for heading in &stats.headings {
        writer.put_size(heading.text.len() as u64);
        writer.put_u8(heading.level);
        writer.put_bytes(heading.text.as_bytes());
    }

    Ok(writer.finish())
}

pub fn decode_page_stats(payload: &[u8]) -> Result<PageStats> {
    let mut reader = PayloadReader::new(payload);

    let path = reader.str()?;
    let images = reader.size()?;
    let forms = reader.size()?;
    let scheme = reader.str()?;
    let domain = reader.str()?;

    let link_count = reader.count()?;
    let mut links = Vec::with_capacity(link_count);
    for _ in 0..link_count {
        links.push(Url {
            scheme: scheme.clone(),
            domain: domain.clone(),
            path: reader.str()?,
        });
    }

    let heading_count = reader.count()?;
    let mut headings = Vec::with_capacity(heading_count);
    for _ in 0..heading_count {
        let len = reader.count()?;
        let level = reader.u8()?;
        let text = String::from_utf8(reader.bytes(len)?.to_vec())?;
        headings.push(Heading { level, text });
    }

    Ok(PageStats {
        path,
        images,
        forms,
        links,
        headings,
    })
}

pub fn encode_site_graph(graph: &SiteGraph) -> Result<Vec<u8>> {
    let node_index: HashMap<&str, u64> = graph
        .nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.as_str(), i as u64))
        .collect();

    let index_of = |node: &String| {
        node_index
            .get(node.as_str())
            .copied()
            .ok_or_else(|| Error::UnknownEdgeEndpoint(node.clone()))
    };

    let mut writer = PayloadWriter::new();

    writer.put_size(graph.nodes.len() as u64);
    for node in &graph.nodes {
        writer.put_str(node);
    }

    writer.put_size(graph.edges.len() as u64);
    for (from, to) in &graph.edges {
        writer.put_size(index_of(from)?);
        writer.put_size(index_of(to)?);
    }

    writer.put_size(graph.stats.len() as u64);
    for stats in &graph.stats {
        let encoded = encode_page_stats(stats)?;
        writer.put_size(encoded.len() as u64);
        writer.put_bytes(&encoded);
    }

    Ok(writer.finish())
}

pub fn decode_site_graph(payload: &[u8]) -> Result<SiteGraph> {
    let mut reader = PayloadReader::new(payload);

    let node_count = reader.count()?;
    let mut nodes = Vec::with_capacity(node_count);
    for _ in 0..node_count {
        nodes.push(reader.str()?);
    }

    let node_at = |index: u64| -> Result<String> {
        nodes
            .get(index as usize)
            .cloned()
            .ok_or(Error::BadNodeIndex(index))
    };

    let edge_count = reader.count()?;
    let mut edges = Vec::with_capacity(edge_count);
    for _ in 0..edge_count {
        let from = node_at(reader.size()?)?;
        let to = node_at(reader.size()?)?;
        edges.push((from, to));
    }

    let stats_count = reader.count()?;
    let mut stats = Vec::with_capacity(stats_count);
    for _ in 0..stats_count {
        let len = reader.count()?;
        stats.push(decode_page_stats(reader.bytes(len)?)?);
    }

    Ok(SiteGraph {
        nodes,
        edges,
        stats,
    })
}
