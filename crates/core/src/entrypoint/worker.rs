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

//! The worker entrypoint: dial the farmer, then serve page fetches until
//! told to stop.

use std::time::Duration;

use crate::config::WorkerConfig;
use crate::crawler::worker::{self, HttpFetcher};
use crate::distributed::cluster;
use crate::Result;

pub async fn run(config: WorkerConfig) -> Result<()> {
    let channel = cluster::connect(config.farmer_host).await?;
    tracing::info!("connected to the farmer at {}", config.farmer_host);

    let fetcher = HttpFetcher::new(Duration::from_secs(config.fetch_timeout_seconds))?;

    worker::run(channel, fetcher).await
}
