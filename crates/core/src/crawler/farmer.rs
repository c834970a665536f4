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

//! The mid tier: breadth-first traversal of one site over a private worker
//! pool.
//!
//! The crawl alternates two phases. Dispatch pops pending urls and hands
//! them round-robin to idle workers until either every worker is busy or the
//! queue is empty; collect blocks for one worker reply, folds its links back
//! into the queue and accounts the page. The crawl is done when a dispatch
//! phase had nothing to hand out and no reply is outstanding.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use super::{Error, Result, SiteGraph};
use crate::distributed::channel::{Channel, FrameSender};
use crate::url::{self, Url};
use crate::wire::{self, codec, Frame, Tag};

/// How long a failed crawl waits for each reply it still has to swallow.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The farmer's side of its private worker channels. Receiving is demuxed
/// into one stream of `(worker, frame)` events so the collect phase can take
/// whichever reply arrives first.
pub struct WorkerPool<S> {
    senders: Vec<FrameSender<S>>,
    events: mpsc::Receiver<(usize, Result<Frame, wire::Error>)>,
}

impl<S> WorkerPool<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(channels: Vec<Channel<S>>) -> Self {
        let (events_tx, events) = mpsc::channel(channels.len().max(1));

        let senders = channels
            .into_iter()
            .enumerate()
            .map(|(worker, channel)| {
                let (sender, mut receiver) = channel.split();
                let events_tx = events_tx.clone();

                tokio::spawn(async move {
                    loop {
                        let event = receiver.recv().await;
                        let failed = event.is_err();
                        if events_tx.send((worker, event)).await.is_err() || failed {
                            return;
                        }
                    }
                });

                sender
            })
            .collect();

        Self { senders, events }
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    async fn send_url(&mut self, worker: usize, url: &str) -> Result<(), wire::Error> {
        self.senders[worker].send(Tag::Url, url.as_bytes()).await
    }

    async fn recv(&mut self) -> Result<(usize, Frame)> {
        match self.events.recv().await {
            Some((worker, Ok(frame))) => Ok((worker, frame)),
            Some((worker, Err(err))) => Err(Error::Worker {
                worker,
                message: err.to_string(),
            }),
            None => Err(Error::PoolClosed),
        }
    }

    /// Tells every worker to shut down. Send failures are ignored; a worker
    /// that is already gone needs no termination.
    pub async fn terminate(&mut self) {
        for sender in &mut self.senders {
            let _ = sender.send(Tag::Terminate, &[]).await;
        }
    }
}

struct Crawl<'a> {
    seed: &'a Url,
    visited: BTreeSet<String>,
    edges: BTreeSet<(String, String)>,
    stats: BTreeMap<String, crate::webpage::PageStats>,
    queue: VecDeque<Url>,
    active_workers: usize,
    current_worker: usize,
}

/// Maps the site rooted at `seed`, using every worker of `pool`.
///
/// Any protocol failure — a worker ERROR frame, an undecodable STATS
/// payload, a dead channel — aborts the whole crawl; no partial graph is
/// ever produced.
pub async fn map_site<S>(seed: &Url, pool: &mut WorkerPool<S>) -> Result<SiteGraph>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut crawl = Crawl {
        seed,
        visited: BTreeSet::new(),
        edges: BTreeSet::new(),
        stats: BTreeMap::new(),
        queue: VecDeque::from([seed.clone()]),
        active_workers: 0,
        current_worker: 0,
    };

    let outcome = crawl.run(pool).await;

    if let Err(err) = outcome {
        // replies still owed to this crawl must not leak into the next one
        // served from the same pool
        crawl.drain(pool).await;
        return Err(err);
    }

    Ok(SiteGraph {
        nodes: crawl.visited.into_iter().collect(),
        edges: crawl.edges.into_iter().collect(),
        stats: crawl.stats.into_values().collect(),
    })
}

impl Crawl<'_> {
    async fn run<S>(&mut self, pool: &mut WorkerPool<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        while self.dispatch(pool).await? || self.active_workers > 0 {
            self.collect(pool).await?;
        }

        Ok(())
    }

    /// Best-effort consumption of the replies a failed crawl never
    /// collected.
    async fn drain<S>(&mut self, pool: &mut WorkerPool<S>)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        while self.active_workers > 0 {
            match tokio::time::timeout(DRAIN_TIMEOUT, pool.recv()).await {
                Ok(Ok(_)) => self.active_workers -= 1,
                _ => return,
            }
        }
    }

    /// Hands out as much pending work as the pool can take, round-robin.
    /// Returns whether anything was dispatched.
    async fn dispatch<S>(&mut self, pool: &mut WorkerPool<S>) -> Result<bool>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut dispatched = false;

        while self.active_workers < pool.len() {
            let Some(url) = self.queue.pop_front() else {
                break;
            };

            if !self.visited.insert(url.path.clone()) {
                continue;
            }

            let url_string = url.to_string();
            tracing::debug!("sending {} to worker {}", url_string, self.current_worker);
            pool.send_url(self.current_worker, &url_string).await?;

            dispatched = true;
            self.active_workers += 1;
            self.current_worker = (self.current_worker + 1) % pool.len();
        }

        Ok(dispatched)
    }

    /// Blocks for one worker reply and folds it into the crawl state.
    async fn collect<S>(&mut self, pool: &mut WorkerPool<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (worker, frame) = pool.recv().await?;

        // the reply for one dispatched url is hereby consumed, whatever it
        // turns out to contain
        self.active_workers -= 1;

        let stats = match frame.tag {
            Tag::Stats => codec::decode_page_stats(&frame.payload)?,
            Tag::Error => {
                return Err(Error::Worker {
                    worker,
                    message: String::from_utf8_lossy(&frame.payload).into_owned(),
                })
            }
            tag => return Err(Error::UnexpectedFrame { worker, tag }),
        };

        tracing::debug!(
            "received stats for {} from worker {} ({} links)",
            stats.path,
            worker,
            stats.links.len()
        );

        let page_path = stats.path.clone();

        for link in &stats.links {
            let mut link = link.clone();

            if link.scheme.is_empty() {
                link.scheme = self.seed.scheme.clone();
            }

            if link.domain.is_empty() {
                link.domain = self.seed.domain.clone();
            } else if link.domain != self.seed.domain {
                continue;
            }

            link.path = url::normalize_relative(&page_path, &link.path);

            if !url::path_is_inside(&link.path, &self.seed.path) {
                continue;
            }

            if link.path == page_path {
                continue;
            }

            self.edges.insert((page_path.clone(), link.path.clone()));
            self.queue.push_back(link);
        }

        self.stats.insert(page_path, stats);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::DuplexStream;

    use super::*;
    use crate::crawler::worker::testing::MemoryFetcher;
    use crate::crawler::worker::{Fetch, FetchError};

    /// A site served by real worker loops over in-memory channels, with an
    /// optional artificial fetch delay per worker.
    struct Farm {
        pool: WorkerPool<DuplexStream>,
        workers: Vec<tokio::task::JoinHandle<crate::Result<()>>>,
    }

    struct SlowFetcher {
        inner: MemoryFetcher,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Fetch for SlowFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            tokio::time::sleep(self.delay).await;
            self.inner.fetch(url).await
        }
    }

    impl Farm {
        fn grow(fetcher: MemoryFetcher, worker_delays: &[Duration]) -> Self {
            let mut channels = Vec::new();
            let mut workers = Vec::new();

            for delay in worker_delays {
                let (farmer_side, worker_side) = tokio::io::duplex(64 * 1024);
                channels.push(Channel::new(farmer_side));
                workers.push(tokio::spawn(crate::crawler::worker::run(
                    Channel::new(worker_side),
                    SlowFetcher {
                        inner: fetcher.clone(),
                        delay: *delay,
                    },
                )));
            }

            Self {
                pool: WorkerPool::new(channels),
                workers,
            }
        }

        async fn crawl(mut self, seed: &str) -> Result<SiteGraph> {
            let seed = Url::parse(seed).unwrap();
            let graph = map_site(&seed, &mut self.pool).await;

            self.pool.terminate().await;
            for worker in self.workers {
                worker.await.unwrap().unwrap();
            }

            graph
        }
    }

    async fn crawl(fetcher: MemoryFetcher, workers: usize, seed: &str) -> SiteGraph {
        let graph = Farm::grow(fetcher, &vec![Duration::ZERO; workers])
            .crawl(seed)
            .await
            .unwrap();
        assert_invariants(&graph);
        graph
    }

    fn assert_invariants(graph: &SiteGraph) {
        assert!(
            graph.nodes.windows(2).all(|w| w[0] < w[1]),
            "nodes must be strictly increasing"
        );
        assert!(
            graph.edges.windows(2).all(|w| w[0] < w[1]),
            "edges must be strictly increasing"
        );
        for (from, to) in &graph.edges {
            assert!(graph.nodes.contains(from));
            assert!(graph.nodes.contains(to));
            assert_ne!(from, to, "self loops are filtered");
        }
        for stats in &graph.stats {
            assert!(graph.nodes.contains(&stats.path));
        }
        assert!(
            graph.stats.windows(2).all(|w| w[0].path < w[1].path),
            "stats must be sorted by path"
        );
    }

    #[tokio::test]
    async fn one_page_site_with_a_self_link() {
        let fetcher =
            MemoryFetcher::default().with_page("http://ex/a/", r#"<html><a href="./">x</a></html>"#);

        let graph = crawl(fetcher, 2, "http://ex/a/").await;

        assert_eq!(graph.nodes, ["/a/"]);
        assert!(graph.edges.is_empty());
        assert_eq!(graph.stats.len(), 1);
        assert_eq!(graph.stats[0].links.len(), 1);
    }

    #[tokio::test]
    async fn two_page_linear_site() {
        let fetcher = MemoryFetcher::default()
            .with_page(
                "http://ex/a/",
                r#"<img src="x.png"><a href="b.html">next</a>"#,
            )
            .with_page(
                "http://ex/a/b.html",
                r#"<form action="/s"></form><form action="/t"></form>"#,
            );

        let graph = crawl(fetcher, 2, "http://ex/a/").await;

        assert_eq!(graph.nodes, ["/a/", "/a/b.html"]);
        assert_eq!(
            graph.edges,
            [("/a/".to_string(), "/a/b.html".to_string())]
        );

        assert_eq!(graph.stats[0].path, "/a/");
        assert_eq!(graph.stats[0].images, 1);
        assert_eq!(graph.stats[0].forms, 0);
        assert_eq!(graph.stats[1].path, "/a/b.html");
        assert_eq!(graph.stats[1].images, 0);
        assert_eq!(graph.stats[1].forms, 2);
        assert!(graph.stats[1].links.is_empty());
    }

    #[tokio::test]
    async fn out_of_subtree_link_is_filtered() {
        let fetcher =
            MemoryFetcher::default().with_page("http://ex/a/", r#"<a href="http://ex/c/">c</a>"#);

        let graph = crawl(fetcher, 2, "http://ex/a/").await;

        assert_eq!(graph.nodes, ["/a/"]);
        assert!(graph.edges.is_empty());
    }

    #[tokio::test]
    async fn cross_domain_link_is_filtered() {
        let fetcher =
            MemoryFetcher::default().with_page("http://ex/", r#"<a href="http://other/">o</a>"#);

        let graph = crawl(fetcher, 2, "http://ex/").await;

        assert_eq!(graph.nodes, ["/"]);
        assert!(graph.edges.is_empty());
    }

    #[tokio::test]
    async fn escaping_relative_link_is_filtered() {
        let fetcher =
            MemoryFetcher::default().with_page("http://ex/a/b/", r#"<a href="../c">up</a>"#);

        let graph = crawl(fetcher, 2, "http://ex/a/b/").await;

        assert_eq!(graph.nodes, ["/a/b/"]);
        assert!(graph.edges.is_empty());
    }

    #[tokio::test]
    async fn page_without_links_yields_a_single_node() {
        let fetcher = MemoryFetcher::default().with_page("http://ex/a/", "<h1>alone</h1>");

        let graph = crawl(fetcher, 3, "http://ex/a/").await;

        assert_eq!(graph.nodes, ["/a/"]);
        assert!(graph.edges.is_empty());
        assert_eq!(graph.stats[0].headings.len(), 1);
    }

    #[tokio::test]
    async fn unfetchable_branch_still_becomes_a_node() {
        // /a/dead.html is linked but the fetcher cannot serve it
        let fetcher =
            MemoryFetcher::default().with_page("http://ex/a/", r#"<a href="dead.html">d</a>"#);

        let graph = crawl(fetcher, 2, "http://ex/a/").await;

        assert_eq!(graph.nodes, ["/a/", "/a/dead.html"]);
        assert_eq!(graph.stats.len(), 2);
        assert_eq!(graph.stats[1].images, 0);
        assert!(graph.stats[1].links.is_empty());
    }

    #[tokio::test]
    async fn cyclic_site_terminates() {
        let fetcher = MemoryFetcher::default()
            .with_page("http://ex/a/", r#"<a href="b.html">b</a>"#)
            .with_page("http://ex/a/b.html", r#"<a href="./">back</a>"#);

        let graph = crawl(fetcher, 2, "http://ex/a/").await;

        assert_eq!(graph.nodes, ["/a/", "/a/b.html"]);
        assert_eq!(
            graph.edges,
            [
                ("/a/".to_string(), "/a/b.html".to_string()),
                ("/a/b.html".to_string(), "/a/".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn deterministic_under_reordered_worker_replies() {
        let fetcher = MemoryFetcher::default()
            .with_page(
                "http://ex/a/",
                r#"<a href="b.html">b</a><a href="c.html">c</a>"#,
            )
            .with_page("http://ex/a/b.html", "<h1>b</h1>")
            .with_page("http://ex/a/c.html", "<h2>c</h2>");

        // first run: replies arrive in dispatch order
        let fast = Farm::grow(fetcher.clone(), &[Duration::ZERO, Duration::ZERO])
            .crawl("http://ex/a/")
            .await
            .unwrap();

        // second run: the worker holding the earlier request answers last
        let slow_first = Farm::grow(
            fetcher,
            &[Duration::from_millis(80), Duration::ZERO],
        )
        .crawl("http://ex/a/")
        .await
        .unwrap();

        assert_invariants(&fast);
        assert_eq!(fast, slow_first);
        assert_eq!(fast.encode().unwrap(), slow_first.encode().unwrap());
    }

    #[tokio::test]
    async fn crawling_twice_is_byte_identical() {
        let fetcher = MemoryFetcher::default()
            .with_page("http://ex/a/", r#"<a href="b.html">b</a>"#)
            .with_page("http://ex/a/b.html", "<h1>b</h1>");

        let first = crawl(fetcher.clone(), 2, "http://ex/a/").await;
        let second = crawl(fetcher, 2, "http://ex/a/").await;

        assert_eq!(first.encode().unwrap(), second.encode().unwrap());
    }

    #[tokio::test]
    async fn worker_error_aborts_the_crawl() {
        let (farmer_side, mut stub) = tokio::io::duplex(1024);
        let mut pool = WorkerPool::new(vec![Channel::new(farmer_side)]);

        let stub_task = tokio::spawn(async move {
            let frame = wire::read_frame(&mut stub).await.unwrap();
            assert_eq!(frame.tag, Tag::Url);
            wire::write_frame(&mut stub, Tag::Error, b"receive failed")
                .await
                .unwrap();
            stub
        });

        let seed = Url::parse("http://ex/a/").unwrap();
        let result = map_site(&seed, &mut pool).await;

        assert!(matches!(result, Err(Error::Worker { worker: 0, .. })));
        stub_task.await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_stats_abort_the_crawl() {
        let (farmer_side, mut stub) = tokio::io::duplex(1024);
        let mut pool = WorkerPool::new(vec![Channel::new(farmer_side)]);

        let stub_task = tokio::spawn(async move {
            let _ = wire::read_frame(&mut stub).await.unwrap();
            wire::write_frame(&mut stub, Tag::Stats, &[1, 2, 3])
                .await
                .unwrap();
            stub
        });

        let seed = Url::parse("http://ex/a/").unwrap();
        let result = map_site(&seed, &mut pool).await;

        assert!(matches!(result, Err(Error::Wire(_))));
        stub_task.await.unwrap();
    }
}
