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

//! # Update Engine
//!
//! Drives periodic synchronization of the local chunk replica: builds the
//! download request from the stored chunk ranges, applies the response's
//! directives in textual order, fetches redirect payloads sequentially, and
//! records exactly one outcome per list per response. A wait in seconds,
//! never an error, flows back to the scheduler.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

use log::{debug, error, info, warn};
use rand::Rng;

use crate::chunk::{self, ChunkBlock, Directive};
use crate::client::{unix_now, SafeBrowsing};
use crate::error::{Error, Result};
use crate::http::Transport;
use crate::mac::{self, MacKeys};
use crate::state::ListSync;
use crate::storage::{AddChunk, Storage, SubChunk};

/// Wait after a `pleaserekey` or `pleasereset` directive, seconds.
const SHORT_RETRY: u64 = 10;

impl<S: Storage, T: Transport> SafeBrowsing<S, T> {
    /// Synchronize the given lists with the server. Returns the number of
    /// seconds after which the caller should invoke `update` again. Lists
    /// that are not yet due are skipped unless `force` is set; a concurrent
    /// `update` call yields the default retry immediately.
    pub async fn update(&self, lists: &[&str], force: bool) -> u64 {
        if self.in_update.fetch_add(1, Ordering::SeqCst) > 0 {
            self.in_update.fetch_sub(1, Ordering::SeqCst);
            debug!("update already in flight, returning default retry");
            return self.config.default_retry;
        }

        let mut min_wait = u64::MAX;
        for list in lists {
            let wait = self.update_list(list, force).await;
            debug!("list {list}: next update in {wait}s");
            min_wait = min_wait.min(wait);
        }
        self.in_update.fetch_sub(1, Ordering::SeqCst);

        if min_wait == u64::MAX {
            self.config.default_retry
        } else {
            min_wait
        }
    }

    async fn update_list(&self, list: &str, force: bool) -> u64 {
        if !force {
            if let Some(sync) = self.data.list_sync(list) {
                let now = unix_now();
                if sync.time + sync.wait > now {
                    let remaining = sync.time + sync.wait - now;
                    debug!("list {list} not due for {remaining}s");
                    return remaining;
                }
            }
        }

        let keys = if self.config.mac {
            match self.ensure_mac_keys().await {
                Ok(k) => Some(k),
                Err(e) => {
                    warn!("key exchange failed: {e}");
                    return self.config.default_retry;
                }
            }
        } else {
            None
        };

        match self.run_update(list, keys.as_ref()).await {
            Ok(wait) => wait,
            Err(e) => {
                error!("update of {list} failed: {e}");
                self.update_error(list)
            }
        }
    }

    async fn run_update(&self, list: &str, keys: Option<&MacKeys>) -> Result<u64> {
        let (a_range, s_range) = self.storage.get_regions(list).await?;
        let mut parts = Vec::new();
        if !a_range.is_empty() {
            parts.push(format!("a:{a_range}"));
        }
        if !s_range.is_empty() {
            parts.push(format!("s:{s_range}"));
        }
        if keys.is_some() {
            parts.push("mac".to_string());
        }
        let body = format!("{};{}\n", list, parts.join(":"));
        debug!("downloads request body: {}", body.trim_end());

        let mut url = self.api_url(&self.config.server, "downloads");
        if let Some(k) = keys {
            url.push_str("&wrkey=");
            url.push_str(&k.wrapped_key);
        }

        let resp = self.transport.post(&url, body.into_bytes()).await?;
        if resp.status != 200 {
            return Err(Error::Status(resp.status));
        }
        let text = String::from_utf8_lossy(&resp.body).into_owned();
        if text.trim().is_empty() {
            debug!("empty update response for {list}");
            self.record_outcome(list, self.config.default_retry, 0)?;
            return Ok(self.config.default_retry);
        }

        if let Some(k) = keys {
            let (stripped, response_mac) = mac::strip_mac_line(&text);
            if let Some(digest) = response_mac {
                if !mac::validate(&k.client_key, stripped.as_bytes(), &digest) {
                    return Err(Error::Mac);
                }
            }
        }

        let directives = chunk::parse_update_response(&text)?;
        let mut current = list.to_string();
        let mut lists_seen: BTreeSet<String> = BTreeSet::new();
        lists_seen.insert(current.clone());
        let mut next_wait = self.config.default_retry;
        let mut redirects: Vec<(String, String, Option<String>)> = Vec::new();

        for directive in directives {
            match directive {
                Directive::Next(secs) => next_wait = secs,
                Directive::List(l) => {
                    current = l;
                    lists_seen.insert(current.clone());
                }
                Directive::Redirect { url, mac } => {
                    redirects.push((current.clone(), url, mac));
                }
                Directive::AddDel(nums) => {
                    debug!("deleting add chunks {nums:?} from {current}");
                    self.storage.delete_add_chunks(&current, &nums).await?;
                    self.storage.delete_full_hashes(&current, &nums).await?;
                }
                Directive::SubDel(nums) => {
                    debug!("deleting sub chunks {nums:?} from {current}");
                    self.storage.delete_sub_chunks(&current, &nums).await?;
                }
                Directive::Mac(_) => {}
                Directive::Rekey => {
                    info!("server requested a rekey");
                    self.data.clear_mac_keys()?;
                    self.record_outcome(&current, SHORT_RETRY, 0)?;
                    return Ok(SHORT_RETRY);
                }
                Directive::Reset => {
                    warn!("server requested a reset of {current}");
                    self.storage.reset(&current).await?;
                    self.record_outcome(&current, SHORT_RETRY, 0)?;
                    return Ok(SHORT_RETRY);
                }
            }
        }

        for (redirect_list, redirect_url, payload_mac) in &redirects {
            self.fetch_redirect(redirect_list, redirect_url, payload_mac.as_deref(), keys)
                .await?;
        }

        for l in &lists_seen {
            self.record_outcome(l, next_wait, 0)?;
        }
        Ok(next_wait)
    }

    /// Fetch one redirect payload and apply its chunks.
    async fn fetch_redirect(
        &self,
        list: &str,
        url: &str,
        payload_mac: Option<&str>,
        keys: Option<&MacKeys>,
    ) -> Result<()> {
        let full_url = format!("https://{url}");
        debug!("fetching chunk data from {full_url}");
        let resp = self.transport.get(&full_url).await?;
        if resp.status != 200 {
            return Err(Error::Status(resp.status));
        }
        if let (Some(k), Some(digest)) = (keys, payload_mac) {
            if !mac::validate(&k.client_key, &resp.body, digest) {
                return Err(Error::Mac);
            }
        }

        let blocks = chunk::parse_chunk_payload(&resp.body)?;
        for block in blocks {
            match block {
                ChunkBlock::Add { chunknum, entries } => {
                    let rows: Vec<AddChunk> = entries
                        .into_iter()
                        .map(|e| AddChunk {
                            list: list.to_string(),
                            chunknum,
                            host: e.host,
                            prefix: e.prefix,
                        })
                        .collect();
                    debug!("add chunk {chunknum}: {} entries", rows.len());
                    self.storage.add_chunks_a(&rows).await?;
                }
                ChunkBlock::Sub { chunknum, entries } => {
                    let rows: Vec<SubChunk> = entries
                        .into_iter()
                        .map(|e| SubChunk {
                            list: list.to_string(),
                            chunknum,
                            add_chunknum: e.add_chunknum,
                            host: e.host,
                            prefix: e.prefix,
                        })
                        .collect();
                    debug!("sub chunk {chunknum}: {} entries", rows.len());
                    self.storage.add_chunks_s(&rows).await?;
                }
            }
        }
        Ok(())
    }

    /// Return stored MAC keys, fetching a fresh pair when none are stored.
    async fn ensure_mac_keys(&self) -> Result<MacKeys> {
        if let Some(keys) = self.data.mac_keys() {
            return Ok(keys);
        }
        let url = self.api_url(self.config.mac_endpoint(), "newkey");
        let resp = self.transport.get(&url).await?;
        if resp.status != 200 {
            return Err(Error::Key(format!("newkey returned status {}", resp.status)));
        }
        let body = String::from_utf8_lossy(&resp.body);
        let keys = mac::parse_newkey_response(&body)?;
        self.data.set_mac_keys(&keys)?;
        info!("obtained new MAC key pair");
        Ok(keys)
    }

    /// Record a failed update and return the backoff wait.
    fn update_error(&self, list: &str) -> u64 {
        let errors = self
            .data
            .list_sync(list)
            .map(|s| s.errors)
            .unwrap_or(0)
            .saturating_add(1);
        let wait = backoff_wait(errors);
        if self.record_outcome(list, wait, errors).is_err() {
            error!("failed to persist sync state for {list}");
        }
        warn!("list {list}: {errors} consecutive errors, backing off {wait}s");
        wait
    }

    fn record_outcome(&self, list: &str, wait: u64, errors: u32) -> Result<()> {
        self.data.set_list_sync(
            list,
            &ListSync {
                time: unix_now(),
                wait,
                errors,
            },
        )
    }
}

/// Exponential backoff ladder for consecutive update failures.
fn backoff_wait(errors: u32) -> u64 {
    let mut rng = rand::thread_rng();
    match errors {
        0 | 1 => 60,
        2 => rng.gen_range(1800..=3600),
        3 => rng.gen_range(3600..=7200),
        4 => rng.gen_range(7200..=14400),
        5 => rng.gen_range(14400..=28800),
        _ => 28800,
    }
}
