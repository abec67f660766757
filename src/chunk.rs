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

//! # Chunk Codec
//!
//! Decoders for the three wire formats of the v2 protocol: the text framing
//! of update responses, the binary add/sub chunk payloads served behind
//! redirect URLs, and the full-hash responses of the `gethash` endpoint.
//! Also provides the compact chunk-range encoding (`1-3,5,7-11`) reported
//! back to the server.

use crate::error::{Error, Result};

/// One directive of an update response, in textual order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `n:<seconds>`: delay before the next poll.
    Next(u64),
    /// `i:<list>`: switches the current-list context.
    List(String),
    /// `u:<url>[,<hmac>]`: chunk data to fetch over HTTPS.
    Redirect { url: String, mac: Option<String> },
    /// `ad:<range>`: add-chunk numbers to delete.
    AddDel(Vec<u32>),
    /// `sd:<range>`: sub-chunk numbers to delete.
    SubDel(Vec<u32>),
    /// `m:<digest>`: HMAC over the rest of the response.
    Mac(String),
    /// `e:pleaserekey`: discard MAC keys and retry shortly.
    Rekey,
    /// `r:pleasereset`: wipe the current list and retry shortly.
    Reset,
}

/// Parse the whitespace-delimited directives of an update response.
/// Unknown directives are skipped.
pub fn parse_update_response(body: &str) -> Result<Vec<Directive>> {
    let mut out = Vec::new();
    for token in body.split_whitespace() {
        let Some((kind, value)) = token.split_once(':') else {
            continue;
        };
        match kind {
            "n" => {
                let secs = value
                    .parse::<u64>()
                    .map_err(|_| Error::Parse(format!("bad next-poll delay {value:?}")))?;
                out.push(Directive::Next(secs));
            }
            "i" => out.push(Directive::List(value.to_string())),
            "u" => {
                let (url, mac) = match value.split_once(',') {
                    Some((u, m)) => (u.to_string(), Some(m.to_string())),
                    None => (value.to_string(), None),
                };
                out.push(Directive::Redirect { url, mac });
            }
            "ad" => out.push(Directive::AddDel(parse_ranges(value)?)),
            "sd" => out.push(Directive::SubDel(parse_ranges(value)?)),
            "m" => out.push(Directive::Mac(value.to_string())),
            "e" if value == "pleaserekey" => out.push(Directive::Rekey),
            "r" if value == "pleasereset" => out.push(Directive::Reset),
            _ => log::debug!("ignoring unknown update directive {token:?}"),
        }
    }
    Ok(out)
}

/// Parse a chunk range like `1-3,5,7-11` into the numbers it covers.
pub fn parse_ranges(s: &str) -> Result<Vec<u32>> {
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '-' | ',') || c.is_ascii_whitespace())
    {
        return Err(Error::Parse(format!("bad range characters in {s:?}")));
    }
    let mut out = Vec::new();
    for token in s.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo
                    .parse()
                    .map_err(|_| Error::Parse(format!("bad range token {token:?}")))?;
                let hi: u32 = hi
                    .parse()
                    .map_err(|_| Error::Parse(format!("bad range token {token:?}")))?;
                if lo > hi {
                    return Err(Error::Parse(format!("inverted range {token:?}")));
                }
                out.extend(lo..=hi);
            }
            None => {
                let n: u32 = token
                    .parse()
                    .map_err(|_| Error::Parse(format!("bad range token {token:?}")))?;
                out.push(n);
            }
        }
    }
    Ok(out)
}

/// Format chunk numbers as the minimal comma/dash range string.
pub fn format_ranges(nums: &[u32]) -> String {
    let mut sorted: Vec<u32> = nums.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = String::new();
    let mut i = 0;
    while i < sorted.len() {
        let start = sorted[i];
        let mut end = start;
        while i + 1 < sorted.len() && sorted[i + 1] == end + 1 {
            end = sorted[i + 1];
            i += 1;
        }
        if !out.is_empty() {
            out.push(',');
        }
        if start == end {
            out.push_str(&start.to_string());
        } else {
            out.push_str(&format!("{start}-{end}"));
        }
        i += 1;
    }
    out
}

/// An add-chunk entry as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddEntry {
    pub host: u32,
    pub prefix: Vec<u8>,
}

/// A sub-chunk entry: retracts the matching add entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubEntry {
    pub host: u32,
    pub add_chunknum: u32,
    pub prefix: Vec<u8>,
}

/// One decoded block of a redirect payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkBlock {
    Add { chunknum: u32, entries: Vec<AddEntry> },
    Sub { chunknum: u32, entries: Vec<SubEntry> },
}

/// Decode a redirect payload: concatenated blocks of
/// `a:`/`s:` `<chunknum>:<hash_length>:<chunk_length>\n` + body bytes.
pub fn parse_chunk_payload(data: &[u8]) -> Result<Vec<ChunkBlock>> {
    let mut blocks = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let nl = data[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| Error::Parse("chunk header missing newline".to_string()))?;
        let header = std::str::from_utf8(&data[pos..pos + nl])
            .map_err(|_| Error::Parse("chunk header is not ASCII".to_string()))?;
        pos += nl + 1;

        let mut parts = header.splitn(4, ':');
        let kind = parts.next().unwrap_or_default();
        let chunknum: u32 = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::Parse(format!("bad chunk header {header:?}")))?;
        let hash_len: usize = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::Parse(format!("bad chunk header {header:?}")))?;
        let body_len: usize = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::Parse(format!("bad chunk header {header:?}")))?;
        if hash_len > 32 {
            return Err(Error::Parse(format!("hash length {hash_len} out of range")));
        }
        let body = data
            .get(pos..pos + body_len)
            .ok_or_else(|| Error::Parse("chunk body truncated".to_string()))?;
        pos += body_len;

        match kind {
            "a" => blocks.push(ChunkBlock::Add {
                chunknum,
                entries: parse_add_body(body, hash_len),
            }),
            "s" => blocks.push(ChunkBlock::Sub {
                chunknum,
                entries: parse_sub_body(body, hash_len),
            }),
            _ => return Err(Error::Parse(format!("unknown chunk kind {kind:?}"))),
        }
    }
    Ok(blocks)
}

/// Add body: repeated `host(u32 LE) | count(u8) | count * prefix`.
/// A count of zero stands for the whole host. Entries that run past the end
/// of the body are dropped; an empty body still yields one entry so the
/// chunk number stays represented in storage.
fn parse_add_body(body: &[u8], hash_len: usize) -> Vec<AddEntry> {
    let mut entries = Vec::new();
    if body.is_empty() {
        entries.push(AddEntry {
            host: 0,
            prefix: Vec::new(),
        });
        return entries;
    }
    let mut p = 0;
    while p + 5 <= body.len() {
        let host = u32::from_le_bytes([body[p], body[p + 1], body[p + 2], body[p + 3]]);
        let count = body[p + 4] as usize;
        p += 5;
        if count == 0 {
            entries.push(AddEntry {
                host,
                prefix: Vec::new(),
            });
            continue;
        }
        for _ in 0..count {
            let Some(prefix) = body.get(p..p + hash_len) else {
                return entries;
            };
            entries.push(AddEntry {
                host,
                prefix: prefix.to_vec(),
            });
            p += hash_len;
        }
    }
    entries
}

/// Sub body: `host(u32 LE) | count(u8)`, then either one bare add-chunk
/// number (count 0) or `count` pairs of `add_chunknum(u32 BE) | prefix`.
fn parse_sub_body(body: &[u8], hash_len: usize) -> Vec<SubEntry> {
    let mut entries = Vec::new();
    if body.is_empty() {
        entries.push(SubEntry {
            host: 0,
            add_chunknum: 0,
            prefix: Vec::new(),
        });
        return entries;
    }
    let mut p = 0;
    while p + 5 <= body.len() {
        let host = u32::from_le_bytes([body[p], body[p + 1], body[p + 2], body[p + 3]]);
        let count = body[p + 4] as usize;
        p += 5;
        if count == 0 {
            let Some(raw) = body.get(p..p + 4) else {
                return entries;
            };
            entries.push(SubEntry {
                host,
                add_chunknum: u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
                prefix: Vec::new(),
            });
            p += 4;
            continue;
        }
        for _ in 0..count {
            let Some(raw) = body.get(p..p + 4 + hash_len) else {
                return entries;
            };
            entries.push(SubEntry {
                host,
                add_chunknum: u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
                prefix: raw[4..].to_vec(),
            });
            p += 4 + hash_len;
        }
    }
    entries
}

/// One block of a `gethash` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullHashBlock {
    pub list: String,
    pub chunknum: u32,
    pub hashes: Vec<[u8; 32]>,
}

/// Decode a full-hash response: repeated
/// `"<list>:<chunknum>:<length>\n"` + `length` bytes of 32-byte hashes.
pub fn parse_full_hash_response(data: &[u8]) -> Result<Vec<FullHashBlock>> {
    let mut blocks = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let nl = data[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| Error::Parse("full-hash header missing newline".to_string()))?;
        let header = std::str::from_utf8(&data[pos..pos + nl])
            .map_err(|_| Error::Parse("full-hash header is not ASCII".to_string()))?;
        pos += nl + 1;

        let mut parts = header.splitn(3, ':');
        let list = parts
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::Parse(format!("bad full-hash header {header:?}")))?
            .to_string();
        let chunknum: u32 = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::Parse(format!("bad full-hash header {header:?}")))?;
        let length: usize = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::Parse(format!("bad full-hash header {header:?}")))?;
        if length % 32 != 0 {
            return Err(Error::Parse(format!(
                "full-hash block length {length} not a multiple of 32"
            )));
        }
        let body = data
            .get(pos..pos + length)
            .ok_or_else(|| Error::Parse("full-hash block truncated".to_string()))?;
        pos += length;

        let mut hashes = Vec::with_capacity(length / 32);
        for raw in body.chunks_exact(32) {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(raw);
            hashes.push(hash);
        }
        blocks.push(FullHashBlock {
            list,
            chunknum,
            hashes,
        });
    }
    Ok(blocks)
}
