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

//! URL model for the crawl pipeline.
//!
//! Links extracted from a page may omit their scheme or domain, which means
//! "inherit from the referrer". That is not representable with a fully
//! resolved URL type, so the crawler carries its own: the scheme and domain
//! are plain (possibly empty) strings and the path keeps whatever query it
//! was parsed with. Paths are resolved and compared lexically, without ever
//! touching a filesystem.

use once_cell::sync::Lazy;

static URL_REGEX: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(r"^(?:(https?):)?(?://([^:/?#]*)(?::(\d+))?)?([^?#]*(?:\?[^#]*)?)(?:#.*)?$")
        .expect("url regex should be valid")
});

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed url: {0:?}")]
pub struct UrlParseError(pub String);

/// A possibly partial URL. Empty `scheme` or `domain` means the value is
/// inherited from the page the link was found on. A missing path parses
/// as `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Url {
    pub scheme: String,
    pub domain: String,
    pub path: String,
}

impl Url {
    /// Accepts `scheme://domain[:port]/path?query#fragment` and every prefix
    /// truncation of it (`//domain/path`, `/path`, bare `path`). Ports and
    /// fragments are dropped; queries stay inside the stored path.
    pub fn parse(input: &str) -> Result<Self, UrlParseError> {
        let captures = URL_REGEX
            .captures(input)
            .ok_or_else(|| UrlParseError(input.to_string()))?;

        let group = |i| {
            captures
                .get(i)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        };

        let mut path = group(4);
        if path.is_empty() {
            path = "/".to_string();
        }

        Ok(Url {
            scheme: group(1),
            domain: group(2),
            path,
        })
    }
}

impl std::fmt::Display for Url {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.scheme.is_empty() {
            write!(f, "{}://", self.scheme)?;
        }
        write!(f, "{}{}", self.domain, self.path)
    }
}

/// Resolves `link_path` against the page it appeared on and normalises the
/// result: `(base.parent / link).lexically_normal()`. An absolute link
/// replaces the base path entirely.
pub fn normalize_relative(base_path: &str, link_path: &str) -> String {
    if link_path.starts_with('/') {
        return lexically_normal(link_path);
    }

    lexically_normal(&format!("{}/{}", parent(base_path), link_path))
}

/// True iff `child` lies inside the subtree rooted at `ancestor`, i.e. the
/// lexical relative path from `ancestor` to `child` starts with no `..`.
pub fn path_is_inside(child: &str, ancestor: &str) -> bool {
    let ancestor: Vec<_> = components(ancestor).collect();
    let child: Vec<_> = components(child).collect();

    child.len() >= ancestor.len() && ancestor.iter().zip(&child).all(|(a, c)| a == c)
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".")
}

/// The path without its final element. A trailing slash counts as an (empty)
/// final element, so `parent("/a/") == "/a"` and `parent("/a/b.html") == "/a"`.
fn parent(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(rest) => rest,
        None => &path[..path.rfind('/').unwrap_or(0)],
    }
}

/// Resolves `.` and `..` segments and collapses repeated separators. Only
/// meaningful for absolute paths; `..` segments that would climb past the
/// root are discarded. A trailing directory marker (`/`, `/.` or `/..`)
/// survives as a trailing slash.
fn lexically_normal(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    let trailing_dir =
        path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");

    let mut out = String::from("/");
    out.push_str(&parts.join("/"));
    if trailing_dir && !parts.is_empty() {
        out.push('/');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_url() {
        let url = Url::parse("http://example.com/a/b.html").unwrap();
        assert_eq!(url.scheme, "http");
        assert_eq!(url.domain, "example.com");
        assert_eq!(url.path, "/a/b.html");
    }

    #[test]
    fn parse_drops_port_and_fragment() {
        let url = Url::parse("https://example.com:8080/a#section").unwrap();
        assert_eq!(url.domain, "example.com");
        assert_eq!(url.path, "/a");
    }

    #[test]
    fn parse_keeps_query_in_path() {
        let url = Url::parse("http://example.com/a?page=2").unwrap();
        assert_eq!(url.path, "/a?page=2");
    }

    #[test]
    fn parse_scheme_relative() {
        let url = Url::parse("//example.com/x").unwrap();
        assert_eq!(url.scheme, "");
        assert_eq!(url.domain, "example.com");
        assert_eq!(url.path, "/x");
    }

    #[test]
    fn parse_path_only() {
        let url = Url::parse("/x/y").unwrap();
        assert_eq!(url.scheme, "");
        assert_eq!(url.domain, "");
        assert_eq!(url.path, "/x/y");
    }

    #[test]
    fn parse_bare_relative_path() {
        let url = Url::parse("b.html").unwrap();
        assert_eq!(url.domain, "");
        assert_eq!(url.path, "b.html");
    }

    #[test]
    fn parse_empty_path_becomes_root() {
        let url = Url::parse("http://example.com").unwrap();
        assert_eq!(url.path, "/");
    }

    #[test]
    fn display_round_trips() {
        for text in [
            "http://example.com/a/b.html",
            "https://example.com/",
            "http://example.com/a?page=2",
        ] {
            let url = Url::parse(text).unwrap();
            assert_eq!(url.to_string(), *text);
            assert_eq!(Url::parse(&url.to_string()).unwrap(), url);
        }
    }

    #[test]
    fn resolve_sibling_file() {
        assert_eq!(normalize_relative("/a/", "b.html"), "/a/b.html");
        assert_eq!(normalize_relative("/a/index.html", "b.html"), "/a/b.html");
    }

    #[test]
    fn resolve_current_directory() {
        assert_eq!(normalize_relative("/a/", "./"), "/a/");
        assert_eq!(normalize_relative("/a/", "."), "/a/");
    }

    #[test]
    fn resolve_parent_escape() {
        assert_eq!(normalize_relative("/a/b/", "../c"), "/a/c");
        assert_eq!(normalize_relative("/a/", "../../x"), "/x");
    }

    #[test]
    fn resolve_absolute_link_replaces_base() {
        assert_eq!(normalize_relative("/a/b/", "/c/"), "/c/");
    }

    #[test]
    fn resolve_from_root() {
        assert_eq!(normalize_relative("/", "x"), "/x");
        assert_eq!(normalize_relative("/index.html", "about.html"), "/about.html");
    }

    #[test]
    fn normalisation_keeps_directory_marker() {
        assert_eq!(normalize_relative("/a/", "b/c/.."), "/a/b/");
        assert_eq!(normalize_relative("/a/", "b//c"), "/a/b/c");
    }

    #[test]
    fn inside_own_subtree() {
        assert!(path_is_inside("/a/", "/a/"));
        assert!(path_is_inside("/a/b.html", "/a/"));
        assert!(path_is_inside("/a/b/c/", "/a/"));
    }

    #[test]
    fn outside_subtree() {
        assert!(!path_is_inside("/c/", "/a/"));
        assert!(!path_is_inside("/a/c", "/a/b/"));
        assert!(!path_is_inside("/", "/a/"));
        assert!(!path_is_inside("/ab", "/a/b"));
    }
}
