//! # MAC Validation
//!
//! HMAC-SHA1 authentication of update responses and redirect payloads,
//! keyed by the client key handed out by the `newkey` endpoint. Digests are
//! compared in their web-safe base64 form, trailing `=` included.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

/// Key pair shared across lists. The client key is held decoded; the
/// wrapped key is opaque and echoed back to the server as `wrkey`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacKeys {
    pub client_key: Vec<u8>,
    pub wrapped_key: String,
}

/// Parse a `newkey` response body:
/// `clientkey:<n>:<base64>\nwrappedkey:<m>:<opaque>\n`.
pub fn parse_newkey_response(body: &str) -> Result<MacKeys> {
    let mut client_key = None;
    let mut wrapped_key = None;
    for line in body.lines() {
        let mut parts = line.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("clientkey"), Some(_len), Some(value)) => {
                let decoded = STANDARD
                    .decode(value)
                    .map_err(|e| Error::Key(format!("client key is not base64: {e}")))?;
                client_key = Some(decoded);
            }
            (Some("wrappedkey"), Some(_len), Some(value)) => {
                wrapped_key = Some(value.to_string());
            }
            _ => {}
        }
    }
    match (client_key, wrapped_key) {
        (Some(client_key), Some(wrapped_key)) => Ok(MacKeys {
            client_key,
            wrapped_key,
        }),
        _ => Err(Error::Key("newkey response missing a key line".to_string())),
    }
}

/// HMAC-SHA1 digest of a payload in web-safe base64.
pub fn digest(key: &[u8], payload: &[u8]) -> String {
    // An HMAC accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha1::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(payload);
    URL_SAFE.encode(mac.finalize().into_bytes())
}

/// Check a payload against the digest the server sent alongside it.
pub fn validate(key: &[u8], payload: &[u8], expected: &str) -> bool {
    digest(key, payload) == expected
}

/// Split the `m:<digest>` line out of an update response, returning the
/// body without that line and the digest when present.
pub fn strip_mac_line(body: &str) -> (String, Option<String>) {
    let mut digest = None;
    let mut rest = String::with_capacity(body.len());
    for line in body.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if digest.is_none() && trimmed.starts_with("m:") {
            digest = Some(trimmed[2..].to_string());
        } else {
            rest.push_str(line);
        }
    }
    (rest, digest)
}
