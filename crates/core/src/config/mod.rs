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

pub mod defaults;

use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("the cluster needs at least one farmer")]
    NoFarmers,

    #[error("the cluster needs at least one worker per farmer")]
    NoWorkers,

    #[error("missing template file: {0}")]
    MissingTemplate(PathBuf),
}

/// The master process: the http control plane plus one channel per farmer.
#[derive(Debug, serde::Deserialize, Clone)]
pub struct MasterConfig {
    /// Address the submission form is served on.
    #[serde(default = "defaults::Master::host")]
    pub host: SocketAddr,

    /// Directory holding `index.html` and `results.html`.
    #[serde(default = "defaults::Master::base_path")]
    pub base_path: PathBuf,

    /// Directory the per-submission result folders are created in.
    #[serde(default = "defaults::Master::results_path")]
    pub results_path: PathBuf,

    /// One address per farmer in the cluster.
    pub farmers: Vec<SocketAddr>,

    /// Worker-pool size of every farmer. The implied process count of the
    /// cluster is `1 + farmers + farmers * workers_per_farmer`.
    pub workers_per_farmer: usize,
}

#[derive(Debug, serde::Deserialize, Clone)]
pub struct FarmerConfig {
    /// Address the master dials.
    pub host: SocketAddr,

    /// Address this farmer's private workers dial.
    pub worker_host: SocketAddr,

    /// The crawl starts once exactly this many workers have connected.
    pub num_workers: usize,
}

#[derive(Debug, serde::Deserialize, Clone)]
pub struct WorkerConfig {
    /// Address of the farmer this worker belongs to.
    pub farmer_host: SocketAddr,

    #[serde(default = "defaults::Worker::fetch_timeout_seconds")]
    pub fetch_timeout_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_config_fills_defaults() {
        let config: MasterConfig = toml::from_str(
            r#"
            farmers = ["127.0.0.1:3001", "127.0.0.1:3002"]
            workers_per_farmer = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.host, "127.0.0.1:8001".parse().unwrap());
        assert_eq!(config.base_path, PathBuf::from("./data"));
        assert_eq!(config.results_path, PathBuf::from("./results"));
        assert_eq!(config.farmers.len(), 2);
    }

    #[test]
    fn worker_config_parses() {
        let config: WorkerConfig = toml::from_str(r#"farmer_host = "10.0.0.7:3101""#).unwrap();
        assert_eq!(config.fetch_timeout_seconds, 30);
    }
}
