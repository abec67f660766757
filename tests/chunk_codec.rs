use safebrowsing2::chunk::{
    format_ranges, parse_chunk_payload, parse_full_hash_response, parse_ranges,
    parse_update_response, AddEntry, ChunkBlock, Directive, SubEntry,
};

#[test]
fn range_round_trip() {
    let nums = parse_ranges("1-3,5,7-11").unwrap();
    assert_eq!(nums, vec![1, 2, 3, 5, 7, 8, 9, 10, 11]);
    assert_eq!(format_ranges(&nums), "1-3,5,7-11");
}

#[test]
fn format_is_minimal_and_sorted() {
    assert_eq!(format_ranges(&[3, 1, 2, 2, 5]), "1-3,5");
    assert_eq!(format_ranges(&[2, 1]), "1-2");
    assert_eq!(format_ranges(&[4]), "4");
    assert_eq!(format_ranges(&[]), "");
}

#[test]
fn empty_range_parses_to_nothing() {
    assert_eq!(parse_ranges("").unwrap(), Vec::<u32>::new());
}

#[test]
fn bad_ranges_are_rejected() {
    assert!(parse_ranges("1;2").is_err());
    assert!(parse_ranges("5-3").is_err());
    assert!(parse_ranges("a-b").is_err());
}

#[test]
fn update_response_directives_in_order() {
    let body = "m:AbCd=\nn:1800\ni:goog-malware-shavar\n\
                u:cache.example.test/chunk,DIGEST\nad:1-3\nsd:4\ne:pleaserekey\nr:pleasereset\n";
    let directives = parse_update_response(body).unwrap();
    assert_eq!(
        directives,
        vec![
            Directive::Mac("AbCd=".to_string()),
            Directive::Next(1800),
            Directive::List("goog-malware-shavar".to_string()),
            Directive::Redirect {
                url: "cache.example.test/chunk".to_string(),
                mac: Some("DIGEST".to_string()),
            },
            Directive::AddDel(vec![1, 2, 3]),
            Directive::SubDel(vec![4]),
            Directive::Rekey,
            Directive::Reset,
        ]
    );
}

#[test]
fn redirect_without_mac() {
    let directives = parse_update_response("u:cache.example.test/chunk\n").unwrap();
    assert_eq!(
        directives,
        vec![Directive::Redirect {
            url: "cache.example.test/chunk".to_string(),
            mac: None,
        }]
    );
}

#[test]
fn unknown_directives_are_skipped() {
    let directives = parse_update_response("x:whatever\nn:300\n").unwrap();
    assert_eq!(directives, vec![Directive::Next(300)]);
}

#[test]
fn add_block_with_zero_count_ignores_trailing_bytes() {
    let mut data = b"a:5:4:9\n".to_vec();
    data.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00]);
    let blocks = parse_chunk_payload(&data).unwrap();
    assert_eq!(
        blocks,
        vec![ChunkBlock::Add {
            chunknum: 5,
            entries: vec![AddEntry {
                host: 1,
                prefix: Vec::new(),
            }],
        }]
    );
}

#[test]
fn add_block_with_prefixes() {
    let mut data = b"a:3:4:14\n".to_vec();
    data.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x01, 0xAA, 0xBB, 0xCC, 0xDD]);
    data.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00]);
    let blocks = parse_chunk_payload(&data).unwrap();
    assert_eq!(
        blocks,
        vec![ChunkBlock::Add {
            chunknum: 3,
            entries: vec![
                AddEntry {
                    host: 1,
                    prefix: vec![0xAA, 0xBB, 0xCC, 0xDD],
                },
                AddEntry {
                    host: 2,
                    prefix: Vec::new(),
                },
            ],
        }]
    );
}

#[test]
fn sub_block_with_bare_add_chunknum() {
    let mut data = b"s:7:4:9\n".to_vec();
    data.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05]);
    let blocks = parse_chunk_payload(&data).unwrap();
    assert_eq!(
        blocks,
        vec![ChunkBlock::Sub {
            chunknum: 7,
            entries: vec![SubEntry {
                host: 1,
                add_chunknum: 5,
                prefix: Vec::new(),
            }],
        }]
    );
}

#[test]
fn sub_block_with_prefix_pairs() {
    let mut data = b"s:8:4:13\n".to_vec();
    data.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x01]);
    data.extend_from_slice(&[0x00, 0x00, 0x00, 0x09, 0xDE, 0xAD, 0xBE, 0xEF]);
    let blocks = parse_chunk_payload(&data).unwrap();
    assert_eq!(
        blocks,
        vec![ChunkBlock::Sub {
            chunknum: 8,
            entries: vec![SubEntry {
                host: 1,
                add_chunknum: 9,
                prefix: vec![0xDE, 0xAD, 0xBE, 0xEF],
            }],
        }]
    );
}

#[test]
fn empty_block_yields_synthetic_entry() {
    let blocks = parse_chunk_payload(b"a:9:4:0\n").unwrap();
    assert_eq!(
        blocks,
        vec![ChunkBlock::Add {
            chunknum: 9,
            entries: vec![AddEntry {
                host: 0,
                prefix: Vec::new(),
            }],
        }]
    );

    let blocks = parse_chunk_payload(b"s:9:4:0\n").unwrap();
    assert_eq!(
        blocks,
        vec![ChunkBlock::Sub {
            chunknum: 9,
            entries: vec![SubEntry {
                host: 0,
                add_chunknum: 0,
                prefix: Vec::new(),
            }],
        }]
    );
}

#[test]
fn consecutive_blocks_decode() {
    let mut data = b"a:1:4:5\n".to_vec();
    data.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x00]);
    data.extend_from_slice(b"s:2:4:9\n");
    data.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);
    let blocks = parse_chunk_payload(&data).unwrap();
    assert_eq!(blocks.len(), 2);
}

#[test]
fn malformed_headers_are_rejected() {
    assert!(parse_chunk_payload(b"a:5:4:9").is_err());
    assert!(parse_chunk_payload(b"q:5:4:0\n").is_err());
    assert!(parse_chunk_payload(b"a:x:4:0\n").is_err());
    assert!(parse_chunk_payload(b"a:5:64:0\n").is_err());
}

#[test]
fn truncated_body_is_an_error() {
    let mut data = b"a:5:4:50\n".to_vec();
    data.extend_from_slice(&[0x01, 0x00, 0x00]);
    assert!(parse_chunk_payload(&data).is_err());
}

#[test]
fn full_hash_response_blocks() {
    let first: Vec<u8> = (0u8..32).collect();
    let second: Vec<u8> = (32u8..64).collect();
    let mut data = b"goog-malware-shavar:42:64\n".to_vec();
    data.extend_from_slice(&first);
    data.extend_from_slice(&second);
    data.extend_from_slice(b"goog-phish-shavar:7:32\n");
    data.extend_from_slice(&first);

    let blocks = parse_full_hash_response(&data).unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].list, "goog-malware-shavar");
    assert_eq!(blocks[0].chunknum, 42);
    assert_eq!(blocks[0].hashes.len(), 2);
    assert_eq!(blocks[0].hashes[1][0], 32);
    assert_eq!(blocks[1].list, "goog-phish-shavar");
    assert_eq!(blocks[1].hashes.len(), 1);
}

#[test]
fn full_hash_bad_length_rejected() {
    let mut data = b"list:1:31\n".to_vec();
    data.extend_from_slice(&[0u8; 31]);
    assert!(parse_full_hash_response(&data).is_err());

    let mut data = b"list:1:64\n".to_vec();
    data.extend_from_slice(&[0u8; 32]);
    assert!(parse_full_hash_response(&data).is_err());
}
