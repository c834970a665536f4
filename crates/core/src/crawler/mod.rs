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

//! The crawl pipeline.
//!
//! Three node kinds, one per tier: the [`master`] owns the control plane and
//! fans submitted urls out to farmers; a [`farmer`] owns one site crawl at a
//! time and schedules page fetches over its private worker pool; a
//! [`worker`] fetches and analyses exactly one page per round-trip. The
//! aggregated result of one crawl is a [`SiteGraph`].

pub mod farmer;
pub mod master;
pub mod site_graph;
pub mod worker;

pub use site_graph::SiteGraph;

use crate::url::UrlParseError;
use crate::wire::Tag;

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid seed url: {0}")]
    Seed(#[from] UrlParseError),

    #[error(transparent)]
    Wire(#[from] crate::wire::Error),

    #[error("worker {worker} failed: {message}")]
    Worker { worker: usize, message: String },

    #[error("worker {worker} sent an unexpected {tag:?} frame")]
    UnexpectedFrame { worker: usize, tag: Tag },

    #[error("lost the connection to the worker pool")]
    PoolClosed,
}
