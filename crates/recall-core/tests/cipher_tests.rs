//! File-level container decryption.

mod common;

use common::*;
use recall_core::cipher::{RESERVE_LEN, SQLITE_HEADER};
use recall_core::RecallError;
use std::fs;
use tempfile::tempdir;

// ─── Round trip through files ───────────────────────────────────────────────

#[test]
fn decrypt_file_reproduces_plaintext_pages() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("MicroMsg.db");
    let dst = dir.path().join("out").join("MicroMsg.db");
    let k = key(0x11);
    let plain = write_container(&src, 5, &k);

    fast_cipher().decrypt_file(&src, &dst, &k).unwrap();

    let out = fs::read(&dst).unwrap();
    assert_eq!(out.len(), plain.len());
    assert_eq!(&out[..16], SQLITE_HEADER);
    for page in 0..5 {
        let body = page * PAGE..(page + 1) * PAGE - RESERVE_LEN;
        assert_eq!(out[body.clone()], plain[body], "page {}", page + 1);
    }
}

#[test]
fn decrypt_file_spanning_several_batches() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("MSG0.db");
    let dst = dir.path().join("MSG0.plain.db");
    let k = key(0x22);
    let plain = write_container(&src, 1100, &k);

    fast_cipher().decrypt_file(&src, &dst, &k).unwrap();

    let out = fs::read(&dst).unwrap();
    assert_eq!(out.len(), plain.len());
    let last = 1099 * PAGE..1100 * PAGE - RESERVE_LEN;
    assert_eq!(out[last.clone()], plain[last]);
}

// ─── Failure modes ──────────────────────────────────────────────────────────

#[test]
fn wrong_key_leaves_no_output() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("Media.db");
    let dst = dir.path().join("Media.plain.db");
    write_container(&src, 2, &key(1));

    let err = fast_cipher().decrypt_file(&src, &dst, &key(2)).unwrap_err();
    assert!(matches!(err, RecallError::InvalidKey));
    assert!(!dst.exists());
}

#[test]
fn truncated_tail_is_reported_with_offset() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("Misc.db");
    let dst = dir.path().join("Misc.plain.db");
    let k = key(3);
    write_container(&src, 3, &k);
    let mut bytes = fs::read(&src).unwrap();
    bytes.truncate(2 * PAGE + 100);
    fs::write(&src, bytes).unwrap();

    match fast_cipher().decrypt_file(&src, &dst, &k) {
        Err(RecallError::TruncatedContainer { offset, .. }) => assert_eq!(offset, 2 * PAGE as u64),
        other => panic!("unexpected: {other:?}"),
    }
    assert!(!dst.exists());
}

#[test]
fn empty_and_missing_containers() {
    let dir = tempdir().unwrap();
    let empty = dir.path().join("empty.db");
    fs::write(&empty, b"").unwrap();
    let dst = dir.path().join("x.db");

    assert!(matches!(
        fast_cipher().decrypt_file(&empty, &dst, &key(1)),
        Err(RecallError::TruncatedContainer { .. })
    ));
    assert!(matches!(
        fast_cipher().decrypt_file(&dir.path().join("nope.db"), &dst, &key(1)),
        Err(RecallError::ContainerMissing(_))
    ));
}

#[test]
fn read_page1_feeds_verify() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("MicroMsg.db");
    let k = key(0x7f);
    write_container(&src, 2, &k);

    let cipher = fast_cipher();
    let page1 = cipher.read_page1(&src).unwrap();
    assert_eq!(page1.len(), PAGE);
    assert!(cipher.verify(&page1, k.as_bytes()));
    let mut other = [0x7fu8; 32];
    other[0] ^= 1;
    assert!(!cipher.verify(&page1, &other));
}
