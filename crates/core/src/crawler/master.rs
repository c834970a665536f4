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

//! The top tier: receive submissions, fan them out, persist the results.
//!
//! Each farmer connection is owned by a small actor task. The actor writes
//! URL frames as they are requested and matches incoming SUMMARY/ERROR
//! frames to the oldest outstanding request — a farmer crawls one site at a
//! time and answers in the order it was asked, so FIFO matching is exact
//! even when several submissions interleave on one connection.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{FuturesUnordered, StreamExt};
use itertools::Itertools;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use super::SiteGraph;
use crate::distributed::Channel;
use crate::report::{self, Clock};
use crate::wire::Tag;

/// What one dispatched url came back as.
pub enum CrawlReply {
    Summary(SiteGraph),
    Error(String),
}

enum Command {
    Crawl {
        url: String,
        reply: oneshot::Sender<CrawlReply>,
    },
    Terminate,
}

#[derive(Clone)]
pub struct FarmerHandle {
    commands: mpsc::Sender<Command>,
}

impl FarmerHandle {
    /// Takes ownership of a farmer connection and serves it from a task.
    pub fn spawn<S>(channel: Channel<S>, farmer: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (commands, mut command_rx) = mpsc::channel::<Command>(64);

        tokio::spawn(async move {
            let (mut sender, mut receiver) = channel.split();
            let mut pending: VecDeque<oneshot::Sender<CrawlReply>> = VecDeque::new();

            loop {
                tokio::select! {
                    command = command_rx.recv() => match command {
                        Some(Command::Crawl { url, reply }) => {
                            tracing::info!("sending {} ({} bytes) to farmer {}", url, url.len(), farmer);
                            match sender.send(Tag::Url, url.as_bytes()).await {
                                Ok(()) => pending.push_back(reply),
                                Err(err) => {
                                    let _ = reply.send(CrawlReply::Error(format!(
                                        "failed to send url to farmer {farmer}: {err}"
                                    )));
                                }
                            }
                        }
                        Some(Command::Terminate) => {
                            if let Err(err) = sender.send(Tag::Terminate, &[]).await {
                                tracing::error!("failed to terminate farmer {}: {}", farmer, err);
                            }
                            break;
                        }
                        None => break,
                    },
                    frame = receiver.recv(), if !pending.is_empty() => {
                        let reply = pending.pop_front().expect("guarded by !pending.is_empty()");

                        match frame {
                            Ok(frame) if frame.tag == Tag::Summary => {
                                let result = match SiteGraph::decode(&frame.payload) {
                                    Ok(graph) => CrawlReply::Summary(graph),
                                    Err(err) => CrawlReply::Error(format!(
                                        "undecodable summary from farmer {farmer}: {err}"
                                    )),
                                };
                                let _ = reply.send(result);
                            }
                            Ok(frame) if frame.tag == Tag::Error => {
                                let _ = reply.send(CrawlReply::Error(
                                    String::from_utf8_lossy(&frame.payload).into_owned(),
                                ));
                            }
                            Ok(frame) => {
                                let _ = reply.send(CrawlReply::Error(format!(
                                    "unexpected {:?} frame from farmer {farmer}",
                                    frame.tag
                                )));
                            }
                            Err(err) => {
                                let _ = reply.send(CrawlReply::Error(format!(
                                    "lost the connection to farmer {farmer}: {err}"
                                )));
                                break;
                            }
                        }
                    }
                }
            }

            for reply in pending {
                let _ = reply.send(CrawlReply::Error(format!(
                    "the connection to farmer {farmer} was closed"
                )));
            }
        });

        Self { commands }
    }

    async fn crawl(&self, url: String) -> oneshot::Receiver<CrawlReply> {
        let (reply_tx, reply_rx) = oneshot::channel();

        // if the actor is gone the dropped sender resolves the receiver
        // into an error for the caller
        let _ = self
            .commands
            .send(Command::Crawl {
                url,
                reply: reply_tx,
            })
            .await;

        reply_rx
    }
}

/// All farmer connections of the cluster, dispatched to round-robin.
pub struct FarmerPool {
    farmers: Vec<FarmerHandle>,
    next_farmer: AtomicUsize,
}

impl FarmerPool {
    pub fn new(farmers: Vec<FarmerHandle>) -> Self {
        Self {
            farmers,
            next_farmer: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.farmers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.farmers.is_empty()
    }

    fn next(&self) -> &FarmerHandle {
        let index = self.next_farmer.fetch_add(1, Ordering::Relaxed) % self.farmers.len();
        &self.farmers[index]
    }

    pub async fn terminate_all(&self) {
        for farmer in &self.farmers {
            let _ = farmer.commands.send(Command::Terminate).await;
        }
    }
}

/// Handles one form submission: cleans the url list, dispatches every url to
/// a farmer, then collects the crawl results as they complete and writes one
/// result bundle per url. Returns the html echo of the accepted urls.
///
/// Per-submission state lives entirely in this future, so concurrent
/// submissions only meet inside the farmer actors.
pub async fn process<C: Clock>(
    input: &str,
    farmers: &FarmerPool,
    results_path: &Path,
    clock: &C,
) -> crate::Result<String> {
    let urls: Vec<&str> = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let mut collections = FuturesUnordered::new();

    for url in &urls {
        let folder = results_path.join(report::folder_name(clock.now(), url));
        report::begin_log(&folder, clock.now())?;

        let reply = farmers.next().crawl(url.to_string()).await;
        collections.push(async move {
            let reply = reply.await.unwrap_or_else(|_| {
                CrawlReply::Error("the farmer connection task went away".to_string())
            });
            (folder, reply)
        });
    }

    while let Some((folder, reply)) = collections.next().await {
        write_outcome(&folder, reply, clock)?;
    }

    Ok(echo_page(&urls))
}

fn write_outcome<C: Clock>(folder: &Path, reply: CrawlReply, clock: &C) -> crate::Result<()> {
    match reply {
        CrawlReply::Summary(graph) => {
            tracing::info!(
                "writing a graph with {} nodes to {}",
                graph.nodes.len(),
                folder.display()
            );
            report::write_bundle(folder, &graph)?;
            report::finish_log_ok(folder, clock.now())?;
        }
        CrawlReply::Error(message) => {
            tracing::error!("crawl failed: {}", message);
            report::finish_log_error(folder, clock.now(), &message)?;
        }
    }

    Ok(())
}

fn echo_page(urls: &[&str]) -> String {
    let items = urls.iter().map(|url| format!("<li>{url}</li>")).join("");
    format!("You submitted: <ul>{items}</ul>")
}
