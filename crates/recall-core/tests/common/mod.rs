#![allow(dead_code)]

use rand::RngCore;
use recall_core::cipher::{CipherParams, PageCipher, SQLITE_HEADER};
use recall_core::KeyMaterial;
use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;

pub const PAGE: usize = 4096;

pub fn fast_params() -> CipherParams {
    CipherParams {
        page_size: PAGE,
        kdf_iterations: 2,
    }
}

pub fn fast_cipher() -> PageCipher {
    PageCipher::new(fast_params()).unwrap()
}

pub fn key(byte: u8) -> KeyMaterial {
    KeyMaterial::from_bytes(&[byte; 32]).unwrap()
}

/// Random plaintext pages starting with the SQLite magic.
pub fn plaintext(pages: usize) -> Vec<u8> {
    let mut buf = vec![0u8; pages * PAGE];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf[..16].copy_from_slice(SQLITE_HEADER);
    buf
}

/// Writes a sealed container and returns the plaintext it was built from.
pub fn write_container(path: &Path, pages: usize, key: &KeyMaterial) -> Vec<u8> {
    let plain = plaintext(pages);
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let sealed = fast_cipher().seal(&plain, key, &salt).unwrap();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, sealed).unwrap();
    plain
}

#[derive(Debug, Clone)]
pub struct Row {
    pub talker: &'static str,
    pub create_time: i64,
    pub sequence: i64,
    pub msg_type: i64,
    pub sub_type: i64,
    pub content: String,
}

pub fn text(talker: &'static str, create_time: i64, sequence: i64) -> Row {
    Row {
        talker,
        create_time,
        sequence,
        msg_type: 1,
        sub_type: 0,
        content: format!("msg {create_time}/{sequence}"),
    }
}

pub fn make_shard(path: &Path, rows: &[Row]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE MSG (
            localId INTEGER PRIMARY KEY AUTOINCREMENT,
            TalkerId INT DEFAULT 0,
            MsgSvrID INT,
            Type INT,
            SubType INT,
            IsSender INT,
            CreateTime INT,
            Sequence INT DEFAULT 0,
            StatusEx INT DEFAULT 0,
            FlagEx INT,
            Status INT,
            MsgServerSeq INT,
            MsgSequence INT,
            StrTalker TEXT,
            StrContent TEXT,
            DisplayContent TEXT,
            Reserved0 INT DEFAULT 0,
            CompressContent BLOB,
            BytesExtra BLOB
        );",
    )
    .unwrap();
    for (i, r) in rows.iter().enumerate() {
        conn.execute(
            "INSERT INTO MSG (MsgSvrID, Type, SubType, IsSender, CreateTime, Sequence, StrTalker, StrContent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                1000 + i as i64,
                r.msg_type,
                r.sub_type,
                (i % 2) as i64,
                r.create_time,
                r.sequence,
                r.talker,
                r.content
            ],
        )
        .unwrap();
    }
}

pub fn make_micro_msg(msg_dir: &Path) {
    fs::create_dir_all(msg_dir).unwrap();
    let conn = Connection::open(msg_dir.join("MicroMsg.db")).unwrap();
    conn.execute_batch(
        "CREATE TABLE Contact (
            UserName TEXT PRIMARY KEY, Alias TEXT, ReMark TEXT, NickName TEXT,
            PYInitial TEXT, QuanPin TEXT, RemarkPYInitial TEXT, RemarkQuanPin TEXT,
            Reserved1 INT DEFAULT 0, Reserved2 INT DEFAULT 0
        );
        CREATE TABLE ContactHeadImgUrl (usrName TEXT PRIMARY KEY, smallHeadImgUrl TEXT, bigHeadImgUrl TEXT);
        CREATE TABLE Session (strUsrName TEXT, strNickName TEXT, strContent TEXT, nMsgType INT, nTime INT, nOrder INT);
        CREATE TABLE ChatRoom (ChatRoomName TEXT PRIMARY KEY, UserNameList TEXT);

        INSERT INTO Contact VALUES ('wxid_self', 'me', '', 'Self', 'S', 'self', '', '', 1, 1);
        INSERT INTO Contact VALUES ('wxid_zed', '', '', 'Zed', 'Z', 'zed', '', '', 1, 1);
        INSERT INTO Contact VALUES ('wxid_amy', '', 'Amy', 'zz-amy', 'Z', 'zzamy', 'A', 'amy', 1, 1);
        INSERT INTO Contact VALUES ('wxid_bob', '', '', 'Bob', 'B', 'bob', '', '', 1, 1);
        INSERT INTO Contact VALUES ('wxid_stranger', '', '', 'Stranger', 'S', 'stranger', '', '', 0, 0);
        INSERT INTO Contact VALUES ('room1@chatroom', '', '', 'Climbing', 'C', 'climbing', '', '', 1, 1);
        INSERT INTO ContactHeadImgUrl VALUES ('wxid_bob', 'http://img/s/bob', 'http://img/b/bob');
        INSERT INTO Session VALUES ('wxid_bob', 'Bob', 'see you', 1, 300, 3);
        INSERT INTO Session VALUES ('room1@chatroom', 'Climbing', 'rope?', 1, 500, 5);
        INSERT INTO Session VALUES ('wxid_zed', 'Zed', '', 1, 100, 1);
        INSERT INTO ChatRoom VALUES ('room1@chatroom', 'wxid_bob^Gwxid_amy^Gwxid_ghost');",
    )
    .unwrap();

    let open_im = Connection::open(msg_dir.join("OpenIMContact.db")).unwrap();
    open_im
        .execute_batch(
            "CREATE TABLE OpenIMContact (UserName TEXT PRIMARY KEY, ReMark TEXT, NickName TEXT);
             INSERT INTO OpenIMContact VALUES ('corp1@openim', '', 'Corp Support');",
        )
        .unwrap();
}
