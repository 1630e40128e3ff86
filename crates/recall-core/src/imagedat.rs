//! Attachment images are stored XOR-ed with a single byte. The byte is
//! recovered by matching the file head against known image magics.

use crate::error::{RecallError, Result};
use std::fs;
use std::path::Path;

const IMAGE_MAGICS: [(&str, &[u8]); 5] = [
    ("jpg", &[0xff, 0xd8, 0xff]),
    ("png", &[0x89, 0x50, 0x4e, 0x47]),
    ("gif", &[0x47, 0x49, 0x46, 0x38]),
    ("tif", &[0x49, 0x49, 0x2a, 0x00]),
    ("bmp", &[0x42, 0x4d]),
];

/// XOR byte and image extension, if the head matches a known magic.
pub fn find_xor_key(head: &[u8]) -> Option<(u8, &'static str)> {
    IMAGE_MAGICS.iter().find_map(|(ext, magic)| {
        if head.len() < magic.len() {
            return None;
        }
        let key = head[0] ^ magic[0];
        magic
            .iter()
            .zip(head)
            .all(|(m, h)| h ^ m == key)
            .then_some((key, *ext))
    })
}

pub fn decode(data: &[u8]) -> Option<(Vec<u8>, &'static str)> {
    let (key, ext) = find_xor_key(data)?;
    Some((data.iter().map(|b| b ^ key).collect(), ext))
}

/// Decodes `src` into `dst`; returns the detected image extension.
pub fn decode_file(src: &Path, dst: &Path) -> Result<&'static str> {
    let data = fs::read(src)?;
    let (plain, ext) = decode(&data).ok_or_else(|| RecallError::UnknownImage(src.to_path_buf()))?;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dst, plain)?;
    Ok(ext)
}
