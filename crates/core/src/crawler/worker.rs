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

//! The leaf tier: fetch one page, fingerprint it, reply, repeat.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::distributed::Channel;
use crate::url::Url;
use crate::webpage::{self, PageStats};
use crate::wire::{codec, Tag};

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("fetch failed: {0}")]
    Status(reqwest::StatusCode),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("no such page: {0}")]
    Missing(String),
}

/// Where page bodies come from. The crawl logic never talks to the network
/// directly, so tests can serve a site from a map.
#[async_trait::async_trait]
pub trait Fetch: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("webmap")
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        Ok(response.text().await?)
    }
}

/// The worker loop. Blocks on the farmer channel; a URL frame moves the
/// worker into its processing state, the reply moves it back to idle. A
/// TERMINATE frame ends the loop after any in-flight page has been answered.
///
/// A page that cannot be fetched is reported as an all-zero [`PageStats`]
/// rather than an error, so the crawl quietly stops at that branch. Only a
/// URL payload the worker cannot make sense of produces an ERROR frame. A
/// failed send is fatal for the worker.
pub async fn run<S, F>(mut channel: Channel<S>, fetcher: F) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: Fetch,
{
    loop {
        let frame = channel.recv().await?;

        match frame.tag {
            Tag::Terminate => {
                tracing::info!("received a termination signal, shutting down");
                return Ok(());
            }
            Tag::Url => {
                let url = String::from_utf8_lossy(&frame.payload).into_owned();

                let stats = match process(&url, &fetcher).await {
                    Ok(stats) => stats,
                    Err(err) => {
                        tracing::warn!("cannot process {:?}: {}", url, err);
                        channel.send(Tag::Error, err.to_string().as_bytes()).await?;
                        continue;
                    }
                };

                let payload = codec::encode_page_stats(&stats)?;
                tracing::debug!("sending stats for {} ({} bytes)", url, payload.len());
                channel.send(Tag::Stats, &payload).await?;
            }
            tag => {
                tracing::warn!("ignoring an unexpected {:?} frame", tag);
                let message = format!("unexpected {tag:?} frame on the worker channel");
                channel.send(Tag::Error, message.as_bytes()).await?;
            }
        }
    }
}

async fn process<F: Fetch>(url: &str, fetcher: &F) -> Result<PageStats, crate::url::UrlParseError> {
    let parsed = Url::parse(url)?;

    match fetcher.fetch(url).await {
        Ok(body) => Ok(webpage::analyse(&body, &parsed)),
        Err(err) => {
            tracing::warn!("failed to fetch {}: {}", url, err);
            Ok(PageStats::empty(parsed.path))
        }
    }
}
