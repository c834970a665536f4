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

//! Structural fingerprinting of fetched pages.
//!
//! The analysis is a fixed regex pass over the raw body: it counts `<img`
//! and `<form` tags, collects `<a href="…">` targets in document order and
//! extracts the `<h1>`–`<h6>` outline. No DOM is built and no I/O happens
//! here; whoever fetched the body decides what to do with the result.

use once_cell::sync::Lazy;

use crate::url::Url;

static IMG_REGEX: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"<img\b").expect("img regex should be valid"));

static FORM_REGEX: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"<form\b").expect("form regex should be valid"));

static LINK_REGEX: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(r#"<a\b[^>]+href="([^"]+)""#).expect("link regex should be valid")
});

static HEADING_REGEX: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(r"<h([1-6])>(.*?)</h([1-6])>").expect("heading regex should be valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: u8,
    pub text: String,
}

/// The structural fingerprint of one page. `links` keeps the document order
/// of the `<a href>` occurrences; `headings` keeps the document order of the
/// heading tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageStats {
    pub path: String,
    pub images: u64,
    pub forms: u64,
    pub links: Vec<Url>,
    pub headings: Vec<Heading>,
}

impl PageStats {
    /// The record reported for a page that could not be fetched. The empty
    /// link set makes the crawl terminate for that branch.
    pub fn empty(path: String) -> Self {
        Self {
            path,
            images: 0,
            forms: 0,
            links: Vec::new(),
            headings: Vec::new(),
        }
    }
}

/// Analyses a page body fetched from `referrer`.
///
/// Links that explicitly name a different scheme or domain than the referrer
/// are discarded here; a missing scheme or domain counts as "same". Filtering
/// against the seed subtree cannot happen at this point (it needs the seed
/// path) and is left to the crawl scheduler.
pub fn analyse(body: &str, referrer: &Url) -> PageStats {
    let images = IMG_REGEX.find_iter(body).count() as u64;
    let forms = FORM_REGEX.find_iter(body).count() as u64;

    let mut links = Vec::new();
    for captures in LINK_REGEX.captures_iter(body) {
        let href = &captures[1];
        if href.trim().is_empty() {
            continue;
        }

        let link = match Url::parse(href) {
            Ok(link) => link,
            Err(err) => {
                tracing::debug!("skipping link on {}: {}", referrer.path, err);
                continue;
            }
        };

        if !link.scheme.is_empty() && link.scheme != referrer.scheme {
            continue;
        }

        if !link.domain.is_empty() && link.domain != referrer.domain {
            continue;
        }

        links.push(link);
    }

    let headings = HEADING_REGEX
        .captures_iter(body)
        .filter(|captures| captures[1] == captures[3])
        .map(|captures| Heading {
            level: captures[1].parse().expect("heading level is a single digit"),
            text: captures[2].to_string(),
        })
        .collect();

    PageStats {
        path: referrer.path.clone(),
        images,
        forms,
        links,
        headings,
    }
}

/// Renders the per-page block of a result bundle's `contents.txt`: the path,
/// the three counters and one line of `-`s per heading, the run length being
/// the heading level.
impl std::fmt::Display for PageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.path)?;
        writeln!(f, "IMAGES {}", self.images)?;
        writeln!(f, "LINKS {}", self.links.len())?;
        writeln!(f, "FORMS {}", self.forms)?;
        for heading in &self.headings {
            writeln!(f, "{} {}", "-".repeat(heading.level as usize), heading.text)?;
        }
        Ok(())
    }
}
