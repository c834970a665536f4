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

//! Per-submission result bundles on disk.
//!
//! Every submitted url gets a folder named after the submission minute and a
//! filesystem-safe form of the url, holding `log.txt` (timestamps and the
//! outcome), `map.txt` (the node/edge list) and `contents.txt` (the per-page
//! statistics blocks).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::crawler::SiteGraph;
use crate::url::Url;

/// The time source, pluggable so tests can freeze it.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Derives the filesystem-safe form of a url: domain and path with every
/// character outside `[A-Za-z0-9_-]` replaced by `_`, trailing underscores
/// stripped. A url the parser rejects is sanitised whole.
pub fn safe_url(url: &str) -> String {
    let text = match Url::parse(url) {
        Ok(parsed) => format!("{}{}", parsed.domain, parsed.path),
        Err(_) => url.to_string(),
    };

    let safe: String = text
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    safe.trim_end_matches('_').to_string()
}

pub fn folder_name(now: DateTime<Utc>, url: &str) -> String {
    format!("{}_{}", now.format("%Y_%m_%d_%H_%M"), safe_url(url))
}

/// Creates the submission folder and writes the initial timestamp line of
/// its log.
pub fn begin_log(folder: &Path, now: DateTime<Utc>) -> std::io::Result<()> {
    std::fs::create_dir_all(folder)?;
    std::fs::write(
        folder.join("log.txt"),
        format!("{}\n", now.format("%Y-%m-%d %H:%M:%S")),
    )
}

pub fn finish_log_ok(folder: &Path, now: DateTime<Utc>) -> std::io::Result<()> {
    append_log(folder, &format!("{}\nOK\n", now.format("%Y-%m-%d %H:%M:%S")))
}

pub fn finish_log_error(folder: &Path, now: DateTime<Utc>, message: &str) -> std::io::Result<()> {
    append_log(
        folder,
        &format!("{}\nERROR: {}\n", now.format("%Y-%m-%d %H:%M:%S"), message),
    )
}

fn append_log(folder: &Path, text: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(folder.join("log.txt"))?;
    file.write_all(text.as_bytes())
}

/// Writes `map.txt` and `contents.txt` for a finished crawl. The per-page
/// blocks are rendered in parallel on the process-wide thread pool; their
/// order is the path order the graph already guarantees.
pub fn write_bundle(folder: &Path, graph: &SiteGraph) -> std::io::Result<()> {
    std::fs::write(folder.join("map.txt"), graph.to_string())?;

    let blocks = crate::pool::global().transform(graph.stats.clone(), |stats| stats.to_string());

    let mut contents = String::new();
    for block in blocks {
        contents.push_str(&block.wait());
        contents.push('\n');
    }

    std::fs::write(folder.join("contents.txt"), contents)
}


#[cfg(test)]
mod tests {
    use super::testing::FrozenClock;
    use super::*;
    use crate::webpage::PageStats;

    #[test]
    fn safe_url_keeps_whitelisted_characters() {
        assert_eq!(safe_url("http://example.com/a/b.html"), "example_com_a_b_html");
        assert_eq!(safe_url("http://ex/under_score-dash"), "ex_under_score-dash");
    }

    #[test]
    fn safe_url_strips_trailing_underscores() {
        assert_eq!(safe_url("http://ex/a/"), "ex_a");
        assert_eq!(safe_url("http://ex/"), "ex");
    }

    #[test]
    fn folder_name_has_the_submission_minute() {
        let clock = FrozenClock::at("2024-02-29 23:59:59");
        assert_eq!(
            folder_name(clock.now(), "http://ex/a/"),
            "2024_02_29_23_59_ex_a"
        );
    }

    #[test]
    fn log_lifecycle() {
        let folder = crate::gen_temp_path();
        let clock = FrozenClock::at("2024-05-01 08:00:00");

        begin_log(&folder, clock.now()).unwrap();
        finish_log_error(&folder, clock.now(), "boom").unwrap();

        let log = std::fs::read_to_string(folder.join("log.txt")).unwrap();
        assert_eq!(log, "2024-05-01 08:00:00\n2024-05-01 08:00:00\nERROR: boom\n");

        std::fs::remove_dir_all(&folder).unwrap();
    }

    #[test]
    fn bundle_contains_map_and_contents() {
        let folder = crate::gen_temp_path();
        std::fs::create_dir_all(&folder).unwrap();

        let graph = SiteGraph {
            nodes: vec!["/".to_string()],
            edges: Vec::new(),
            stats: vec![PageStats::empty("/".to_string())],
        };

        write_bundle(&folder, &graph).unwrap();

        assert_eq!(
            std::fs::read_to_string(folder.join("map.txt")).unwrap(),
            "\"/\"\n"
        );
        assert_eq!(
            std::fs::read_to_string(folder.join("contents.txt")).unwrap(),
            "/\nIMAGES 0\nLINKS 0\nFORMS 0\n\n"
        );

        std::fs::remove_dir_all(&folder).unwrap();
    }
}
