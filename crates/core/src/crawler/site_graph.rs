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

//! The aggregated result of one site crawl.

use crate::webpage::PageStats;
use crate::wire;

/// A directed graph over the visited paths of one site, plus the per-page
/// statistics.
///
/// `nodes` and `edges` are lexicographically sorted and duplicate-free and
/// `stats` is sorted by path, regardless of the order in which workers
/// finished their pages. Pages refer to each other by path string only, so a
/// cyclic site never produces a cyclic ownership structure here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SiteGraph {
    pub nodes: Vec<String>,
    pub edges: Vec<(String, String)>,
    pub stats: Vec<PageStats>,
}

impl SiteGraph {
    pub fn encode(&self) -> Result<Vec<u8>, wire::Error> {
        wire::codec::encode_site_graph(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, wire::Error> {
        wire::codec::decode_site_graph(payload)
    }
}

/// Renders the `map.txt` form: one quoted node per line, then one quoted
/// `from to` pair per line.
impl std::fmt::Display for SiteGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for node in &self.nodes {
            writeln!(f, "{node:?}")?;
        }
        for (from, to) in &self.edges {
            writeln!(f, "{from:?} {to:?}")?;
        }
        Ok(())
    }
}
