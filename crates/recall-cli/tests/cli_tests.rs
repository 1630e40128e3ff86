//! End-to-end tests for the `recall` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use rand::RngCore;
use recall_core::cipher::{CipherParams, PageCipher};
use recall_core::KeyMaterial;
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const PAGE: usize = 4096;
const KEY_HEX: &str = "0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f";

/// Settings with a cheap KDF so sealed fixtures open quickly.
fn fast_config(dir: &Path) -> PathBuf {
    let path = dir.join("settings.json");
    fs::write(
        &path,
        r#"{
            "cipher": { "page_size": 4096, "kdf_iterations": 2 },
            "export": {
                "db_workers": 2, "attachment_workers": 2, "voice_workers": 2,
                "avatar_workers": 2, "queue_depth": 4, "report_interval_ms": 10
            }
        }"#,
    )
    .unwrap();
    path
}

fn sealed_container(path: &Path, pages: usize) {
    let cipher = PageCipher::new(CipherParams {
        page_size: PAGE,
        kdf_iterations: 2,
    })
    .unwrap();
    let mut plain = vec![0u8; pages * PAGE];
    rand::rngs::OsRng.fill_bytes(&mut plain);
    plain[..16].copy_from_slice(b"SQLite format 3\0");
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let key = KeyMaterial::from_hex(KEY_HEX).unwrap();
    fs::write(path, cipher.seal(&plain, &key, &salt).unwrap()).unwrap();
}

fn decrypted_account(root: &Path) {
    let msg = root.join("Msg");
    fs::create_dir_all(msg.join("Multi")).unwrap();
    Connection::open(msg.join("MicroMsg.db"))
        .unwrap()
        .execute_batch(
            "CREATE TABLE Contact (UserName TEXT PRIMARY KEY, Alias TEXT, ReMark TEXT, NickName TEXT);
             INSERT INTO Contact VALUES ('wxid_self', 'me', '', 'Self');
             INSERT INTO Contact VALUES ('wxid_bob', '', 'Bobby', 'Bob');",
        )
        .unwrap();

    let shard = Connection::open(msg.join("Multi").join("MSG0.db")).unwrap();
    shard
        .execute_batch(
            "CREATE TABLE MSG (
                localId INTEGER PRIMARY KEY AUTOINCREMENT, MsgSvrID INT, Type INT, SubType INT,
                IsSender INT, CreateTime INT, Sequence INT, StrTalker TEXT, StrContent TEXT,
                CompressContent BLOB, BytesExtra BLOB
            );",
        )
        .unwrap();
    for t in 1..=6i64 {
        shard
            .execute(
                "INSERT INTO MSG (MsgSvrID, Type, SubType, IsSender, CreateTime, Sequence, StrTalker, StrContent)
                 VALUES (?1, 1, 0, 0, ?2, ?3, 'wxid_bob', ?4)",
                params![100 + t, t, t * 1000, format!("line {t}")],
            )
            .unwrap();
    }
}

fn recall() -> Command {
    Command::cargo_bin("recall").unwrap()
}

// ─── Keys and containers ────────────────────────────────────────────────────

#[test]
fn verify_accepts_matching_key() {
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());
    let container = dir.path().join("MicroMsg.db");
    sealed_container(&container, 2);

    recall()
        .arg("--config")
        .arg(&config)
        .args(["verify", "--key", KEY_HEX])
        .arg(&container)
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"));
}

#[test]
fn verify_rejects_other_key() {
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());
    let container = dir.path().join("MicroMsg.db");
    sealed_container(&container, 1);

    recall()
        .arg("--config")
        .arg(&config)
        .args(["verify", "--key", &"ab".repeat(32)])
        .arg(&container)
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not verify"));
}

#[test]
fn malformed_key_is_rejected() {
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());

    recall()
        .arg("--config")
        .arg(&config)
        .args(["verify", "--key", "xyz"])
        .arg(dir.path().join("MicroMsg.db"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid key hex"));
}

#[test]
fn decrypt_writes_plain_database() {
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());
    let container = dir.path().join("MSG0.db");
    let output = dir.path().join("plain").join("MSG0.db");
    sealed_container(&container, 3);

    recall()
        .arg("--config")
        .arg(&config)
        .args(["decrypt", "--key", KEY_HEX])
        .arg(&container)
        .arg(&output)
        .assert()
        .success();

    let plain = fs::read(&output).unwrap();
    assert_eq!(plain.len(), 3 * PAGE);
    assert_eq!(&plain[..16], b"SQLite format 3\0");
}

#[test]
fn export_streams_json_progress() {
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());
    let source = dir.path().join("acct");
    fs::create_dir_all(source.join("Msg")).unwrap();
    sealed_container(&source.join("Msg").join("MicroMsg.db"), 2);

    recall()
        .arg("--config")
        .arg(&config)
        .args(["export", "--key", KEY_HEX])
        .arg(&source)
        .arg(dir.path().join("out"))
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""result":"databases start""#))
        .stdout(predicate::str::contains(r#"{"status":"processing","result":"export finished","progress":100}"#));
}

#[test]
fn export_without_source_fails() {
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());

    recall()
        .arg("--config")
        .arg(&config)
        .args(["export", "--key", KEY_HEX])
        .arg(dir.path().join("missing"))
        .arg(dir.path().join("out"))
        .assert()
        .failure()
        .stdout(predicate::str::contains(r#""status":"error""#));
}

// ─── Reading decrypted accounts ─────────────────────────────────────────────

#[test]
fn messages_print_json_lines() {
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());
    let root = dir.path().join("wxid_self");
    decrypted_account(&root);

    let out = recall()
        .arg("--config")
        .arg(&config)
        .arg("messages")
        .arg(&root)
        .args(["wxid_bob", "--anchor", "4", "--count", "3"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let times: Vec<i64> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["create_time"].as_i64().unwrap())
        .collect();
    assert_eq!(times, vec![4, 3, 2]);
}

#[test]
fn search_and_dates() {
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());
    let root = dir.path().join("wxid_self");
    decrypted_account(&root);

    recall()
        .arg("--config")
        .arg(&config)
        .arg("search")
        .arg(&root)
        .args(["wxid_bob", "--keyword", "line 5", "--direction", "both", "--anchor", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""content":"line 5""#))
        .stdout(predicate::str::contains("line 2").not());

    recall()
        .arg("--config")
        .arg(&config)
        .arg("dates")
        .arg(&root)
        .arg("wxid_bob")
        .assert()
        .success()
        .stdout("\"1970-01-01\"\n");
}

#[test]
fn whoami_prints_the_account_owner() {
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());
    let root = dir.path().join("wxid_self");
    decrypted_account(&root);

    let out = recall()
        .arg("--config")
        .arg(&config)
        .arg("whoami")
        .arg(&root)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let info: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(info["user_name"], "wxid_self");
    assert_eq!(info["alias"], "me");
    assert!(info["local_head_image"].is_null());
}

#[test]
fn export_chat_writes_a_readable_account() {
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());
    let root = dir.path().join("wxid_self");
    decrypted_account(&root);
    let dest = dir.path().join("bob").join("wxid_self");

    recall()
        .arg("--config")
        .arg(&config)
        .arg("export-chat")
        .arg(&root)
        .arg("wxid_bob")
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""messages":6"#))
        .stdout(predicate::str::contains(r#""contacts":2"#));

    recall()
        .arg("--config")
        .arg(&config)
        .arg("messages")
        .arg(&dest)
        .args(["wxid_bob", "--anchor", "10", "--count", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("line 6"))
        .stdout(predicate::str::contains("line 5"));

    recall()
        .arg("--config")
        .arg(&config)
        .arg("export-chat")
        .arg(&root)
        .arg("wxid_bob")
        .arg(&dest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("output already exists"));
}

#[test]
fn unknown_direction_is_a_usage_error() {
    let dir = tempdir().unwrap();
    recall()
        .arg("messages")
        .arg(dir.path())
        .args(["wxid_bob", "--direction", "sideways"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown direction"));
}
