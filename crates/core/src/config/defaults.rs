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

use std::net::SocketAddr;
use std::path::PathBuf;

pub struct Master;

impl Master {
    pub fn host() -> SocketAddr {
        "127.0.0.1:8001".parse().expect("default host is valid")
    }

    pub fn base_path() -> PathBuf {
        "./data".into()
    }

    pub fn results_path() -> PathBuf {
        "./results".into()
    }
}

pub struct Worker;

impl Worker {
    pub fn fetch_timeout_seconds() -> u64 {
        30
    }
}
