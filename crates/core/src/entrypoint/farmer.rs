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

//! The farmer entrypoint.
//!
//! Bootstrap order matters: the worker pool must be complete before the
//! master is served, because a crawl assumes every worker slot exists. The
//! master connection then drives a simple serve loop — one URL frame in, one
//! SUMMARY or ERROR frame out — until TERMINATE arrives, which the farmer
//! forwards to its pool before exiting.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::config::{ConfigError, FarmerConfig};
use crate::crawler;
use crate::crawler::farmer::{map_site, WorkerPool};
use crate::distributed::{cluster, Channel};
use crate::url::Url;
use crate::wire::Tag;
use crate::Result;

pub async fn run(config: FarmerConfig) -> Result<()> {
    if config.num_workers == 0 {
        return Err(ConfigError::NoWorkers.into());
    }

    let worker_listener = TcpListener::bind(config.worker_host).await?;
    tracing::info!(
        "waiting for {} workers on {}",
        config.num_workers,
        config.worker_host
    );

    let channels = cluster::accept_workers(&worker_listener, config.num_workers).await?;
    let mut pool = WorkerPool::new(channels);

    let master_listener = TcpListener::bind(config.host).await?;
    tracing::info!("worker pool complete, serving the master on {}", config.host);

    let (stream, master_addr) = master_listener.accept().await?;
    stream.set_nodelay(true)?;
    tracing::info!("master connected from {}", master_addr);

    let result = serve_master(Channel::new(stream), &mut pool).await;

    // whatever ended the serve loop, the workers must not outlive us
    pool.terminate().await;

    result
}

async fn serve_master<S, P>(mut master: Channel<S>, pool: &mut WorkerPool<P>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    loop {
        let frame = master.recv().await?;

        match frame.tag {
            Tag::Terminate => {
                tracing::info!("received a termination signal, shutting down");
                return Ok(());
            }
            Tag::Url => match crawl(&frame.payload, pool).await {
                Ok(payload) => {
                    tracing::debug!("sending a summary of {} bytes", payload.len());
                    if let Err(err) = master.send(Tag::Summary, &payload).await {
                        tracing::error!("failed to send the summary to the master: {}", err);
                    }
                }
                Err(err) => {
                    tracing::error!("crawl failed: {}", err);
                    if let Err(err) = master.send(Tag::Error, err.to_string().as_bytes()).await {
                        tracing::error!("failed to report the failure to the master: {}", err);
                    }
                }
            },
            tag => {
                tracing::warn!("ignoring an unexpected {:?} frame from the master", tag);
            }
        }
    }
}

async fn crawl<P>(payload: &[u8], pool: &mut WorkerPool<P>) -> crawler::Result<Vec<u8>>
where
    P: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let url = String::from_utf8_lossy(payload);
    let seed = Url::parse(&url)?;

    tracing::info!("mapping the site at {}", seed);
    let graph = map_site(&seed, pool).await?;
    tracing::info!(
        "finished {}: {} pages, {} links",
        seed,
        graph.nodes.len(),
        graph.edges.len()
    );

    Ok(graph.encode()?)
}
