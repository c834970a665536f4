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

//! Cluster bootstrap.
//!
//! The topology is a tree: one master, `F` farmers, `W` workers per farmer.
//! The master dials every farmer it is configured with; each farmer accepts
//! exactly its configured number of workers before it starts serving the
//! master. That accept barrier is what partitions the worker set — a worker
//! only ever talks to the farmer it dialled, so work distribution inside one
//! farm never races with master↔farmer traffic.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use super::Channel;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_RETRIES: usize = 10;
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(200);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Got an IO error")]
    Io(#[from] std::io::Error),

    #[error("Failed to connect to {0}: connection timeout")]
    ConnectionTimeout(SocketAddr),
}

/// Dials `addr`, doubling the pause between attempts up to
/// [`MAX_RETRY_DELAY`]. Peers of a cluster come up in no particular order,
/// so refused connections are expected for a while after launch.
pub async fn connect(addr: SocketAddr) -> Result<Channel<TcpStream>, Error> {
    let mut delay = INITIAL_RETRY_DELAY;
    let mut failed_attempts = 0;

    loop {
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                return Ok(Channel::new(stream));
            }
            Ok(Err(err)) => {
                failed_attempts += 1;
                if failed_attempts > CONNECT_RETRIES {
                    return Err(err.into());
                }
                tracing::debug!(
                    "dial {}/{} to {} failed ({}), next try in {:?}",
                    failed_attempts,
                    CONNECT_RETRIES,
                    addr,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
            }
            Err(_) => return Err(Error::ConnectionTimeout(addr)),
        }
    }
}

/// Master side of the bootstrap: one channel per configured farmer.
pub async fn connect_farmers(
    farmers: &[SocketAddr],
) -> Result<Vec<Channel<TcpStream>>, Error> {
    let mut channels = Vec::with_capacity(farmers.len());

    for addr in farmers {
        channels.push(connect(*addr).await?);
        tracing::info!("connected to farmer at {}", addr);
    }

    Ok(channels)
}

/// Farmer side of the bootstrap: block until the whole private worker pool
/// has dialled in.
pub async fn accept_workers(
    listener: &TcpListener,
    count: usize,
) -> Result<Vec<Channel<TcpStream>>, Error> {
    let mut channels = Vec::with_capacity(count);

    while channels.len() < count {
        let (stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;
        tracing::info!(
            "worker {}/{} connected from {}",
            channels.len() + 1,
            count,
            addr
        );
        channels.push(Channel::new(stream));
    }

    Ok(channels)
}
