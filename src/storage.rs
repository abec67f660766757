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

//! # Storage Contract
//!
//! The abstract store the update and lookup engines run against, plus an
//! in-memory backend. Implementations synchronize internally; the engines
//! treat every call as atomic. Inserts are idempotent so a retried update
//! converges to the same state.

use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::chunk::format_ranges;
use crate::error::Result;

/// A stored add-chunk entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AddChunk {
    pub list: String,
    pub chunknum: u32,
    pub host: u32,
    pub prefix: Vec<u8>,
}

/// A stored sub-chunk entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubChunk {
    pub list: String,
    pub chunknum: u32,
    pub add_chunknum: u32,
    pub host: u32,
    pub prefix: Vec<u8>,
}

/// A stored full hash, confirmed or cached from a `gethash` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullHash {
    pub list: String,
    pub chunknum: u32,
    pub hash: [u8; 32],
}

/// Capability set the engines require from a backend. Any key-range-capable
/// store can implement it.
#[allow(async_fn_in_trait)]
pub trait Storage: Send + Sync {
    /// Chunk-range strings `(add, sub)` currently present for a list.
    async fn get_regions(&self, list: &str) -> Result<(String, String)>;

    async fn delete_add_chunks(&self, list: &str, chunknums: &[u32]) -> Result<()>;
    async fn delete_sub_chunks(&self, list: &str, chunknums: &[u32]) -> Result<()>;
    async fn delete_full_hashes(&self, list: &str, chunknums: &[u32]) -> Result<()>;

    async fn get_add_chunks(&self, host: u32, lists: &[&str]) -> Result<Vec<AddChunk>>;
    async fn get_sub_chunks(&self, host: u32, lists: &[&str]) -> Result<Vec<SubChunk>>;

    /// Full hashes for one add chunk no older than `min_timestamp`.
    /// Older rows are evicted.
    async fn get_full_hashes(
        &self,
        list: &str,
        chunknum: u32,
        min_timestamp: u64,
    ) -> Result<Vec<FullHash>>;

    /// Bulk idempotent inserts.
    async fn add_chunks_a(&self, entries: &[AddChunk]) -> Result<()>;
    async fn add_chunks_s(&self, entries: &[SubChunk]) -> Result<()>;
    async fn add_full_hashes(&self, entries: &[FullHash], timestamp: u64) -> Result<()>;

    /// Wipe all rows for a list.
    async fn reset(&self, list: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FullHashRow {
    entry: FullHash,
    timestamp: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    adds: BTreeSet<AddChunk>,
    subs: BTreeSet<SubChunk>,
    fulls: Vec<FullHashRow>,
}

/// In-memory backend. Good for tests and small embedders; durable stores
/// implement [`Storage`] against their own engine.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // Lock poisoning only happens after a panic elsewhere; propagating
        // the inner state is still sound for this store.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Storage for MemoryStore {
    async fn get_regions(&self, list: &str) -> Result<(String, String)> {
        let inner = self.lock();
        let add_nums: Vec<u32> = inner
            .adds
            .iter()
            .filter(|a| a.list == list)
            .map(|a| a.chunknum)
            .collect();
        let sub_nums: Vec<u32> = inner
            .subs
            .iter()
            .filter(|s| s.list == list)
            .map(|s| s.chunknum)
            .collect();
        Ok((format_ranges(&add_nums), format_ranges(&sub_nums)))
    }

    async fn delete_add_chunks(&self, list: &str, chunknums: &[u32]) -> Result<()> {
        let mut inner = self.lock();
        inner
            .adds
            .retain(|a| !(a.list == list && chunknums.contains(&a.chunknum)));
        Ok(())
    }

    async fn delete_sub_chunks(&self, list: &str, chunknums: &[u32]) -> Result<()> {
        let mut inner = self.lock();
        inner
            .subs
            .retain(|s| !(s.list == list && chunknums.contains(&s.chunknum)));
        Ok(())
    }

    async fn delete_full_hashes(&self, list: &str, chunknums: &[u32]) -> Result<()> {
        let mut inner = self.lock();
        inner
            .fulls
            .retain(|r| !(r.entry.list == list && chunknums.contains(&r.entry.chunknum)));
        Ok(())
    }

    async fn get_add_chunks(&self, host: u32, lists: &[&str]) -> Result<Vec<AddChunk>> {
        let inner = self.lock();
        Ok(inner
            .adds
            .iter()
            .filter(|a| a.host == host && lists.contains(&a.list.as_str()))
            .cloned()
            .collect())
    }

    async fn get_sub_chunks(&self, host: u32, lists: &[&str]) -> Result<Vec<SubChunk>> {
        let inner = self.lock();
        Ok(inner
            .subs
            .iter()
            .filter(|s| s.host == host && lists.contains(&s.list.as_str()))
            .cloned()
            .collect())
    }

    async fn get_full_hashes(
        &self,
        list: &str,
        chunknum: u32,
        min_timestamp: u64,
    ) -> Result<Vec<FullHash>> {
        let mut inner = self.lock();
        inner.fulls.retain(|r| r.timestamp >= min_timestamp);
        Ok(inner
            .fulls
            .iter()
            .filter(|r| r.entry.list == list && r.entry.chunknum == chunknum)
            .map(|r| r.entry.clone())
            .collect())
    }

    async fn add_chunks_a(&self, entries: &[AddChunk]) -> Result<()> {
        let mut inner = self.lock();
        for e in entries {
            inner.adds.insert(e.clone());
        }
        Ok(())
    }

    async fn add_chunks_s(&self, entries: &[SubChunk]) -> Result<()> {
        let mut inner = self.lock();
        for e in entries {
            inner.subs.insert(e.clone());
        }
        Ok(())
    }

    async fn add_full_hashes(&self, entries: &[FullHash], timestamp: u64) -> Result<()> {
        let mut inner = self.lock();
        for e in entries {
            inner
                .fulls
                .retain(|r| !(r.entry.list == e.list && r.entry.hash == e.hash));
            inner.fulls.push(FullHashRow {
                entry: e.clone(),
                timestamp,
            });
        }
        Ok(())
    }

    async fn reset(&self, list: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.adds.retain(|a| a.list != list);
        inner.subs.retain(|s| s.list != list);
        inner.fulls.retain(|r| r.entry.list != list);
        Ok(())
    }
}
