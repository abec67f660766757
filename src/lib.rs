// SafeBrowsing2 Client Library
//
// An async client engine for the Google Safe Browsing v2 update and lookup
// protocol. It keeps a local replica of threat lists synchronized through
// binary chunk deltas and answers URL queries against that replica, with
// optional full-hash confirmation against the remote service.

pub mod canonicalize;
pub mod chunk;
pub mod client;
pub mod config;
pub mod error;
pub mod hash;
pub mod http;
pub mod mac;
pub mod state;
pub mod storage;

mod lookup;
mod update;

pub use client::SafeBrowsing;
pub use config::Config;
pub use error::{Error, Result};
pub use http::{HttpResponse, HttpTransport, Transport};
pub use mac::MacKeys;
pub use state::{DataFile, HashError, ListSync};
pub use storage::{AddChunk, FullHash, MemoryStore, Storage, SubChunk};
