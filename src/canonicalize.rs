// Copyright (c) 2025, The SafeBrowsing2 Project Authors.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright
//       notice, this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above
//       copyright notice, this list of conditions and the following disclaimer
//       in the documentation and/or other materials provided with the
//       distribution.
//
//     * Neither the name of the copyright holder nor the names of its
//       contributors may be used to endorse or promote products derived from
//       this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! # URL Canonicalizer
//!
//! Normalizes URLs the way the Safe Browsing protocol expects before any
//! hashing happens, and enumerates the host/path combinations a lookup has
//! to test. Canonicalization fails closed: anything that cannot be brought
//! into a valid canonical form is treated as a non-match by the caller.

use percent_encoding::{percent_decode, percent_encode, AsciiSet, CONTROLS, NON_ALPHANUMERIC};
use url::{Host, Url};

/// Path bytes that must be escaped: controls, space, `#` and `%`.
/// Bytes above 0x7f are always escaped by `percent_encode`.
const PATH_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'#').add(b'%');

/// Host bytes outside the allowed set get `%XX`-escaped.
const HOST_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'-').remove(b'_');

/// A URL reduced to its Safe Browsing canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalUrl {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    /// Canonical path, always starting with `/`.
    pub path: String,
    /// Query string without the leading `?`, passed through verbatim.
    pub query: Option<String>,
}

impl CanonicalUrl {
    /// The canonical URI string.
    pub fn uri(&self) -> String {
        let mut out = format!("{}://{}", self.scheme, self.host);
        if let Some(port) = self.port {
            out.push_str(&format!(":{port}"));
        }
        out.push_str(&self.path);
        if let Some(q) = &self.query {
            out.push('?');
            out.push_str(q);
        }
        out
    }
}

/// Canonicalize a URL. Returns `None` when no valid canonical form exists.
pub fn canonicalize(input: &str) -> Option<CanonicalUrl> {
    let trimmed = input.trim_matches(|c: char| c.is_ascii_whitespace());
    if trimmed.is_empty() {
        return None;
    }

    // Tab and newline characters are noise up to the query separator.
    let (head, query) = match trimmed.find('?') {
        Some(i) => (&trimmed[..i], Some(&trimmed[i + 1..])),
        None => (trimmed, None),
    };
    let mut cleaned: String = head
        .chars()
        .filter(|c| !matches!(c, '\t' | '\r' | '\n'))
        .collect();
    if let Some(q) = query {
        cleaned.push('?');
        cleaned.push_str(q);
    }

    if let Some(i) = cleaned.find('#') {
        cleaned.truncate(i);
    }
    if !cleaned.contains("://") {
        cleaned = format!("http://{cleaned}");
    }

    let parsed = Url::parse(&cleaned).ok()?;
    let host = match parsed.host() {
        // The url crate already folds case, strips IDNA oddities and turns
        // integer hosts into dotted quads.
        Some(Host::Domain(d)) => normalize_domain(d)?,
        Some(Host::Ipv4(ip)) => ip.to_string(),
        // The v2 protocol has no hash form for IPv6 literals.
        Some(Host::Ipv6(_)) | None => return None,
    };

    let decoded = decode_fully(parsed.path().as_bytes());
    let path = percent_encode(&resolve_path(&decoded), PATH_ESCAPE).to_string();

    Some(CanonicalUrl {
        scheme: parsed.scheme().to_string(),
        host,
        port: parsed.port(),
        path,
        query: parsed.query().map(str::to_string),
    })
}

/// Up to three host-key suffixes for a host: the full host plus its
/// three-label and two-label tails. IPv4 literals key on the literal alone.
pub fn host_suffixes(host: &str) -> Vec<String> {
    if host.parse::<std::net::Ipv4Addr>().is_ok() {
        return vec![host.to_string()];
    }
    let labels: Vec<&str> = host.split('.').collect();
    let n = labels.len();
    let mut out = vec![host.to_string()];
    for k in [3usize, 2] {
        if n > k {
            out.push(labels[n - k..].join("."));
        }
    }
    out
}

/// All host/path combinations whose hashes a lookup must test: up to five
/// domain forms crossed with up to six path forms.
pub fn url_permutations(canonical: &CanonicalUrl) -> Vec<String> {
    let domains = domain_forms(&canonical.host);
    let paths = path_forms(&canonical.path, canonical.query.as_deref());
    let mut out = Vec::with_capacity(domains.len() * paths.len());
    for d in &domains {
        for p in &paths {
            out.push(format!("{d}{p}"));
        }
    }
    out
}

/// Domain forms: the full host, then its five- down to two-label tails.
fn domain_forms(host: &str) -> Vec<String> {
    if host.parse::<std::net::Ipv4Addr>().is_ok() {
        return vec![host.to_string()];
    }
    let labels: Vec<&str> = host.split('.').collect();
    let n = labels.len();
    let mut out = vec![host.to_string()];
    if n >= 2 {
        let max_k = (n - 1).min(5);
        for k in (2..=max_k).rev() {
            out.push(labels[n - k..].join("."));
        }
    }
    out
}

/// Path forms: path with query, the bare path, then the root and successive
/// directory prefixes, at most six in total.
fn path_forms(path: &str, query: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Some(q) = query {
        out.push(format!("{path}?{q}"));
    }
    out.push(path.to_string());

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let dir_count = if path.ends_with('/') {
        segments.len()
    } else {
        segments.len().saturating_sub(1)
    };
    let mut acc = String::from("/");
    let mut dirs = vec![acc.clone()];
    for seg in segments.iter().take(dir_count.min(3)) {
        acc.push_str(seg);
        acc.push('/');
        dirs.push(acc.clone());
    }
    for d in dirs {
        if !out.contains(&d) {
            out.push(d);
        }
    }
    out.truncate(6);
    out
}

fn normalize_domain(domain: &str) -> Option<String> {
    let mut collapsed = String::with_capacity(domain.len());
    for label in domain.split('.').filter(|l| !l.is_empty()) {
        if !collapsed.is_empty() {
            collapsed.push('.');
        }
        collapsed.push_str(&label.to_ascii_lowercase());
    }
    if collapsed.is_empty() {
        return None;
    }
    Some(percent_encode(collapsed.as_bytes(), HOST_ESCAPE).to_string())
}

/// Percent-decode until a fixpoint is reached. Needed because hostile URLs
/// nest escapes (`%2525` and friends).
fn decode_fully(input: &[u8]) -> Vec<u8> {
    let mut cur = input.to_vec();
    loop {
        let next: Vec<u8> = percent_decode(&cur).collect();
        if next == cur {
            return cur;
        }
        cur = next;
    }
}

/// Collapse duplicate slashes and resolve `.`/`..` segments. The result
/// always starts with `/`; a trailing slash survives resolution.
fn resolve_path(decoded: &[u8]) -> Vec<u8> {
    let mut segments: Vec<&[u8]> = Vec::new();
    for seg in decoded.split(|&b| b == b'/') {
        match seg {
            b"" | b"." => {}
            b".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let trailing_dir = decoded.ends_with(b"/")
        || decoded.ends_with(b"/.")
        || decoded.ends_with(b"/..")
        || decoded == b".."
        || decoded == b".";

    let mut out = Vec::with_capacity(decoded.len() + 1);
    out.push(b'/');
    for (i, seg) in segments.iter().enumerate() {
        if i > 0 {
            out.push(b'/');
        }
        out.extend_from_slice(seg);
    }
    if trailing_dir && out.last() != Some(&b'/') {
        out.push(b'/');
    }
    out
}
