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

//! # Lookup Engine
//!
//! Answers "is this URL on one of these lists?" in two stages: a local
//! prefix match against the chunk replica, then confirmation against full
//! hashes, served from the cache when fresh and fetched from the `gethash`
//! endpoint otherwise. Unresolvable URLs and fetch failures report "no
//! match" rather than an error.

use std::collections::BTreeSet;

use log::{debug, warn};

use crate::canonicalize::{canonicalize, host_suffixes, url_permutations};
use crate::chunk::parse_full_hash_response;
use crate::client::{unix_now, SafeBrowsing};
use crate::error::Result;
use crate::hash::{full_hash, host_key};
use crate::http::Transport;
use crate::state::HashError;
use crate::storage::{AddChunk, FullHash, Storage};

/// Per-prefix suppression window after repeated `gethash` failures.
fn hash_backoff_secs(errors: u32) -> u64 {
    match errors {
        0..=2 => 0,
        3 => 1800,
        4 => 3600,
        _ => 7200,
    }
}

/// Promotion window: errors beyond the first only count when this much
/// time has passed since the previous one.
const PROMOTION_WINDOW: u64 = 300;

impl<S: Storage, T: Transport> SafeBrowsing<S, T> {
    /// Check a URL against the given lists. Returns the names of the lists
    /// claiming it, empty when the URL is clean or cannot be canonicalized.
    pub async fn lookup(&self, lists: &[&str], url: &str) -> Result<Vec<String>> {
        let Some(canonical) = canonicalize(url) else {
            debug!("lookup: {url:?} has no canonical form");
            return Ok(Vec::new());
        };

        let hashes: Vec<[u8; 32]> = url_permutations(&canonical)
            .iter()
            .map(|p| full_hash(p))
            .collect();

        let mut matches: BTreeSet<String> = BTreeSet::new();
        for suffix in host_suffixes(&canonical.host) {
            let key = host_key(&suffix);
            for list in self.lookup_suffix(key, lists, &hashes).await? {
                matches.insert(list);
            }
        }
        Ok(matches.into_iter().collect())
    }

    async fn lookup_suffix(
        &self,
        host: u32,
        lists: &[&str],
        hashes: &[[u8; 32]],
    ) -> Result<Vec<String>> {
        let candidates = self.local_lookup(host, lists, hashes).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        debug!("{} candidate add chunks for host key {host:#010x}", candidates.len());

        let confirmed = self.confirmed_lists(&candidates, hashes).await?;
        if !confirmed.is_empty() {
            return Ok(confirmed);
        }

        self.request_full_hashes(&candidates).await?;
        self.confirmed_lists(&candidates, hashes).await
    }

    /// Prefix-filter the add chunks for a host key, then subtract the sub
    /// chunks that retract them.
    async fn local_lookup(
        &self,
        host: u32,
        lists: &[&str],
        hashes: &[[u8; 32]],
    ) -> Result<Vec<AddChunk>> {
        let mut adds = self.storage.get_add_chunks(host, lists).await?;
        adds.retain(|a| {
            a.prefix.is_empty() || hashes.iter().any(|h| h.starts_with(&a.prefix))
        });
        if adds.is_empty() {
            return Ok(adds);
        }
        let subs = self.storage.get_sub_chunks(host, lists).await?;
        adds.retain(|a| {
            !subs.iter().any(|s| {
                s.list == a.list && s.add_chunknum == a.chunknum && s.prefix == a.prefix
            })
        });
        Ok(adds)
    }

    /// Lists whose cached full hashes confirm one of the computed hashes.
    async fn confirmed_lists(
        &self,
        candidates: &[AddChunk],
        hashes: &[[u8; 32]],
    ) -> Result<Vec<String>> {
        let min_timestamp = unix_now().saturating_sub(self.config.cache_time);
        let mut out: BTreeSet<String> = BTreeSet::new();
        for candidate in candidates {
            let cached = self
                .storage
                .get_full_hashes(&candidate.list, candidate.chunknum, min_timestamp)
                .await?;
            if cached.iter().any(|f| hashes.contains(&f.hash)) {
                out.insert(candidate.list.clone());
            }
        }
        Ok(out.into_iter().collect())
    }

    /// Fetch fresh full hashes for the candidates' prefixes, honoring the
    /// per-prefix failure backoff. Failures only mark the prefixes; the
    /// lookup then reports no match.
    async fn request_full_hashes(&self, candidates: &[AddChunk]) -> Result<()> {
        let now = unix_now();
        let mut prefixes: Vec<Vec<u8>> = Vec::new();
        for candidate in candidates {
            let bytes = if candidate.prefix.is_empty() {
                candidate.host.to_be_bytes().to_vec()
            } else {
                candidate.prefix.clone()
            };
            if bytes.len() != 4 || prefixes.contains(&bytes) {
                continue;
            }
            if let Some(record) = self.data.hash_error(&hex::encode(&bytes)) {
                let delay = hash_backoff_secs(record.errors);
                if delay > 0 && now.saturating_sub(record.timestamp) < delay {
                    debug!("prefix {} still backing off", hex::encode(&bytes));
                    continue;
                }
            }
            prefixes.push(bytes);
        }
        if prefixes.is_empty() {
            return Ok(());
        }

        let mut body = format!("4:{}\n", prefixes.len() * 4).into_bytes();
        for p in &prefixes {
            body.extend_from_slice(p);
        }
        let url = self.api_url(&self.config.server, "gethash");
        let resp = match self.transport.post(&url, body).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("gethash request failed: {e}");
                self.note_hash_failures(&prefixes, now)?;
                return Ok(());
            }
        };
        if resp.status != 200 || resp.body.is_empty() {
            warn!("gethash returned status {} ({} bytes)", resp.status, resp.body.len());
            self.note_hash_failures(&prefixes, now)?;
            return Ok(());
        }

        let blocks = match parse_full_hash_response(&resp.body) {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!("gethash response unparsable: {e}");
                self.note_hash_failures(&prefixes, now)?;
                return Ok(());
            }
        };
        let mut entries = Vec::new();
        for block in blocks {
            for hash in block.hashes {
                entries.push(FullHash {
                    list: block.list.clone(),
                    chunknum: block.chunknum,
                    hash,
                });
            }
        }
        debug!("caching {} full hashes", entries.len());
        self.storage.add_full_hashes(&entries, now).await?;
        for p in &prefixes {
            self.data.clear_hash_error(&hex::encode(p))?;
        }
        Ok(())
    }

    /// Bump the failure record of each prefix. The first failure is free;
    /// later ones only count after the promotion window has passed.
    fn note_hash_failures(&self, prefixes: &[Vec<u8>], now: u64) -> Result<()> {
        for p in prefixes {
            let key = hex::encode(p);
            let record = match self.data.hash_error(&key) {
                None => HashError {
                    errors: 1,
                    timestamp: now,
                },
                Some(r) if r.errors == 1 => HashError {
                    errors: 2,
                    timestamp: now,
                },
                Some(r) if now.saturating_sub(r.timestamp) > PROMOTION_WINDOW => HashError {
                    errors: r.errors + 1,
                    timestamp: now,
                },
                Some(r) => r,
            };
            self.data.set_hash_error(&key, &record)?;
        }
        Ok(())
    }
}
