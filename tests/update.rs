mod common;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::ScriptedTransport;
use safebrowsing2::{mac, AddChunk, FullHash, ListSync, MacKeys, MemoryStore, SafeBrowsing, Storage};

const LIST: &str = "goog-malware-shavar";

fn engine(name: &str, transport: ScriptedTransport) -> SafeBrowsing<MemoryStore, ScriptedTransport> {
    SafeBrowsing::new(common::test_config(name), MemoryStore::new(), transport).unwrap()
}

fn mac_engine(name: &str, transport: ScriptedTransport) -> SafeBrowsing<MemoryStore, ScriptedTransport> {
    let mut config = common::test_config(name);
    config.mac = true;
    SafeBrowsing::new(config, MemoryStore::new(), transport).unwrap()
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

/// An `a:` chunk numbered 5 carrying one prefixed entry and one
/// whole-host entry.
fn two_entry_add_payload() -> Vec<u8> {
    let mut data = b"a:5:4:14\n".to_vec();
    data.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x01, 0xAA, 0xBB, 0xCC, 0xDD]);
    data.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00]);
    data
}

fn seed_add(chunknum: u32, host: u32) -> AddChunk {
    AddChunk {
        list: LIST.to_string(),
        chunknum,
        host,
        prefix: Vec::new(),
    }
}

#[tokio::test]
async fn fresh_update_applies_add_chunks() {
    let transport = ScriptedTransport::new()
        .route(
            "downloads",
            200,
            "i:goog-malware-shavar\nn:1800\nu:redirect.example.test/chunk1\n",
        )
        .route("redirect.example.test/chunk1", 200, two_entry_add_payload());
    let eng = engine("update-fresh", transport);

    let wait = eng.update(&[LIST], false).await;
    assert_eq!(wait, 1800);

    let (a_range, s_range) = eng.storage().get_regions(LIST).await.unwrap();
    assert_eq!(a_range, "5");
    assert!(s_range.is_empty());

    let prefixed = eng.storage().get_add_chunks(1, &[LIST]).await.unwrap();
    assert_eq!(prefixed.len(), 1);
    assert_eq!(prefixed[0].prefix, vec![0xAA, 0xBB, 0xCC, 0xDD]);
    let whole_host = eng.storage().get_add_chunks(2, &[LIST]).await.unwrap();
    assert_eq!(whole_host.len(), 1);
    assert!(whole_host[0].prefix.is_empty());

    let sync = eng.data().list_sync(LIST).unwrap();
    assert_eq!(sync.wait, 1800);
    assert_eq!(sync.errors, 0);
    assert!(now() - sync.time < 5);
}

#[tokio::test]
async fn repeating_an_update_is_idempotent() {
    let transport = ScriptedTransport::new()
        .route(
            "downloads",
            200,
            "i:goog-malware-shavar\nn:1800\nu:redirect.example.test/chunk1\n",
        )
        .route("redirect.example.test/chunk1", 200, two_entry_add_payload());
    let eng = engine("update-idempotent", transport);

    assert_eq!(eng.update(&[LIST], true).await, 1800);
    let first = eng.storage().get_add_chunks(1, &[LIST]).await.unwrap();

    assert_eq!(eng.update(&[LIST], true).await, 1800);
    let second = eng.storage().get_add_chunks(1, &[LIST]).await.unwrap();
    assert_eq!(first, second);
    let (a_range, _) = eng.storage().get_regions(LIST).await.unwrap();
    assert_eq!(a_range, "5");
}

#[tokio::test]
async fn reset_directive_wipes_the_list_and_skips_redirects() {
    let transport = ScriptedTransport::new()
        .route(
            "downloads",
            200,
            "i:goog-malware-shavar\nu:redirect.example.test/chunk1\nr:pleasereset\n",
        )
        .route("redirect.example.test/chunk1", 200, two_entry_add_payload());
    let eng = engine("update-reset", transport);

    let seeded: Vec<AddChunk> = (1..=100).map(|n| seed_add(n, n)).collect();
    eng.storage().add_chunks_a(&seeded).await.unwrap();

    let wait = eng.update(&[LIST], true).await;
    assert_eq!(wait, 10);

    let (a_range, s_range) = eng.storage().get_regions(LIST).await.unwrap();
    assert!(a_range.is_empty() && s_range.is_empty());
    // Only the downloads POST went out; the queued redirect was discarded.
    assert_eq!(eng.transport().request_count(), 1);
}

#[tokio::test]
async fn add_delete_directive_drops_chunks_and_full_hashes() {
    let transport = ScriptedTransport::new().route(
        "downloads",
        200,
        "i:goog-malware-shavar\nn:1800\nad:5\n",
    );
    let eng = engine("update-ad", transport);
    eng.storage().add_chunks_a(&[seed_add(5, 9)]).await.unwrap();
    eng.storage().add_chunks_a(&[seed_add(6, 9)]).await.unwrap();
    eng.storage()
        .add_full_hashes(
            &[FullHash {
                list: LIST.to_string(),
                chunknum: 5,
                hash: [0x11; 32],
            }],
            now(),
        )
        .await
        .unwrap();

    assert_eq!(eng.update(&[LIST], true).await, 1800);
    let (a_range, _) = eng.storage().get_regions(LIST).await.unwrap();
    assert_eq!(a_range, "6");
    assert!(eng.storage().get_full_hashes(LIST, 5, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn request_body_reports_existing_ranges() {
    let transport = ScriptedTransport::new().route("downloads", 200, "n:300\n");
    let eng = engine("update-body", transport);
    eng.storage().add_chunks_a(&[seed_add(1, 1), seed_add(2, 2)]).await.unwrap();

    eng.update(&[LIST], true).await;
    let body = eng.transport().last_request_body();
    assert_eq!(body, b"goog-malware-shavar;a:1-2\n");
}

#[tokio::test]
async fn empty_response_schedules_default_retry() {
    let transport = ScriptedTransport::new().route("downloads", 200, "");
    let eng = engine("update-empty", transport);
    assert_eq!(eng.update(&[LIST], true).await, 30);
    let sync = eng.data().list_sync(LIST).unwrap();
    assert_eq!(sync.errors, 0);
}

#[tokio::test]
async fn server_error_backs_off() {
    let transport = ScriptedTransport::new().route("downloads", 500, "");
    let eng = engine("update-error", transport);
    assert_eq!(eng.update(&[LIST], true).await, 60);
    assert_eq!(eng.data().list_sync(LIST).unwrap().errors, 1);
}

#[tokio::test]
async fn backoff_grows_monotonically_to_the_cap() {
    let transport = ScriptedTransport::new().route("downloads", 500, "");
    let eng = engine("update-backoff", transport);

    let mut waits = Vec::new();
    for _ in 0..7 {
        waits.push(eng.update(&[LIST], true).await);
    }
    for pair in waits.windows(2) {
        assert!(pair[1] >= pair[0], "waits decreased: {waits:?}");
    }
    assert_eq!(waits[0], 60);
    assert!(waits.iter().all(|&w| w <= 28800));
    assert_eq!(*waits.last().unwrap(), 28800);
    assert_eq!(eng.data().list_sync(LIST).unwrap().errors, 7);
}

#[tokio::test]
async fn redirect_failure_backs_off() {
    let transport = ScriptedTransport::new().route(
        "downloads",
        200,
        "i:goog-malware-shavar\nn:1800\nu:redirect.example.test/missing\n",
    );
    let eng = engine("update-redirect-fail", transport);
    assert_eq!(eng.update(&[LIST], true).await, 60);
    assert_eq!(eng.data().list_sync(LIST).unwrap().errors, 1);
}

#[tokio::test]
async fn lists_not_yet_due_are_skipped() {
    let transport = ScriptedTransport::new().route("downloads", 200, "n:1800\n");
    let eng = engine("update-not-due", transport);
    eng.data()
        .set_list_sync(
            LIST,
            &ListSync {
                time: now(),
                wait: 1800,
                errors: 0,
            },
        )
        .unwrap();

    let wait = eng.update(&[LIST], false).await;
    assert!(wait > 0 && wait <= 1800);
    assert_eq!(eng.transport().request_count(), 0);
}

#[tokio::test]
async fn concurrent_update_returns_default_retry() {
    let transport = ScriptedTransport::new()
        .route("downloads", 200, "n:1800\n")
        .with_delay(Duration::from_millis(50));
    let eng = engine("update-reentrant", transport);

    let (first, second) = tokio::join!(eng.update(&[LIST], true), eng.update(&[LIST], true));
    assert_eq!(first, 1800);
    assert_eq!(second, 30);
}

#[tokio::test]
async fn minimum_wait_wins_across_lists() {
    let transport = ScriptedTransport::new().route("downloads", 200, "n:1800\n");
    let eng = engine("update-min-wait", transport);
    eng.data()
        .set_list_sync(
            "goog-phish-shavar",
            &ListSync {
                time: now(),
                wait: 600,
                errors: 0,
            },
        )
        .unwrap();

    let wait = eng.update(&[LIST, "goog-phish-shavar"], false).await;
    assert!(wait <= 600);
}

#[tokio::test]
async fn validated_mac_update_applies() {
    let rest = "i:goog-malware-shavar\nn:1800\n";
    let digest = mac::digest(b"key", rest.as_bytes());
    let transport =
        ScriptedTransport::new().route("downloads", 200, format!("m:{digest}\n{rest}"));
    let eng = mac_engine("update-mac-ok", transport);
    eng.data()
        .set_mac_keys(&MacKeys {
            client_key: b"key".to_vec(),
            wrapped_key: "WRAPPED".to_string(),
        })
        .unwrap();

    assert_eq!(eng.update(&[LIST], true).await, 1800);
    assert_eq!(eng.data().list_sync(LIST).unwrap().errors, 0);
}

#[tokio::test]
async fn mac_mismatch_discards_the_response() {
    let transport = ScriptedTransport::new().route(
        "downloads",
        200,
        "m:Tm90QVJlYWxEaWdlc3Q=\ni:goog-malware-shavar\nn:1800\nad:5\n",
    );
    let eng = mac_engine("update-mac-bad", transport);
    eng.data()
        .set_mac_keys(&MacKeys {
            client_key: b"key".to_vec(),
            wrapped_key: "WRAPPED".to_string(),
        })
        .unwrap();
    eng.storage().add_chunks_a(&[seed_add(5, 9)]).await.unwrap();

    assert_eq!(eng.update(&[LIST], true).await, 60);
    // The ad: directive was never applied.
    let (a_range, _) = eng.storage().get_regions(LIST).await.unwrap();
    assert_eq!(a_range, "5");
    assert_eq!(eng.data().list_sync(LIST).unwrap().errors, 1);
}

#[tokio::test]
async fn missing_keys_are_fetched_before_updating() {
    let rest = "i:goog-malware-shavar\nn:1800\n";
    let digest = mac::digest(b"key", rest.as_bytes());
    let transport = ScriptedTransport::new()
        .route("newkey", 200, "clientkey:4:a2V5\nwrappedkey:6:WRAP-K\n")
        .route("downloads", 200, format!("m:{digest}\n{rest}"));
    let eng = mac_engine("update-newkey", transport);

    assert_eq!(eng.update(&[LIST], true).await, 1800);
    let keys = eng.data().mac_keys().unwrap();
    assert_eq!(keys.client_key, b"key");
    assert_eq!(keys.wrapped_key, "WRAP-K");
}

#[tokio::test]
async fn rekey_directive_clears_keys() {
    let transport = ScriptedTransport::new().route("downloads", 200, "e:pleaserekey\n");
    let eng = mac_engine("update-rekey", transport);
    eng.data()
        .set_mac_keys(&MacKeys {
            client_key: b"key".to_vec(),
            wrapped_key: "WRAPPED".to_string(),
        })
        .unwrap();

    assert_eq!(eng.update(&[LIST], true).await, 10);
    assert!(eng.data().mac_keys().is_none());
}

#[tokio::test]
async fn failed_key_exchange_yields_default_retry() {
    let transport = ScriptedTransport::new().route("newkey", 500, "");
    let eng = mac_engine("update-newkey-fail", transport);
    assert_eq!(eng.update(&[LIST], true).await, 30);
}
