//! Locating the database key inside the client's core module.
//!
//! The client keeps a small struct near a device-type string: a pointer to
//! the raw key followed by the key length (32). Scanning backward from the
//! device string for `0x20` length fields yields pointer candidates, which
//! are read from the live process and checked against page 1 of a real
//! container.

use crate::cipher::PageCipher;
use crate::error::{RecallError, Result};
use crate::key::{KeyMaterial, KEY_LEN};
use crate::memory::{PointerWidth, ProcessImage, ProcessMemoryReader};
use std::collections::HashSet;
use tracing::{debug, info};
use zeroize::Zeroizing;

pub const SIGNATURE_LEN: usize = 20;
const TAG_FIELD: usize = 16;

/// Device-type strings as laid out in memory: ASCII padded with zeros to
/// 16 bytes, then the string length as a little-endian u32.
const DEVICE_TAGS: [&str; 5] = ["android", "pad-android", "iphone", "ipad", "OHOS"];

pub fn device_signatures() -> Vec<[u8; SIGNATURE_LEN]> {
    DEVICE_TAGS
        .iter()
        .map(|tag| {
            let mut sig = [0u8; SIGNATURE_LEN];
            sig[..tag.len()].copy_from_slice(tag.as_bytes());
            sig[TAG_FIELD..].copy_from_slice(&(tag.len() as u32).to_le_bytes());
            sig
        })
        .collect()
}

/// Every offset where a device signature starts, ascending.
///
/// Only positions whose byte can open a signature are compared in full.
pub fn device_signature_offsets(image: &[u8]) -> Vec<usize> {
    let sigs = device_signatures();
    let mut leads = [false; 256];
    for sig in &sigs {
        leads[usize::from(sig[0])] = true;
    }
    let Some(last) = image.len().checked_sub(SIGNATURE_LEN) else {
        return Vec::new();
    };
    image[..=last]
        .iter()
        .enumerate()
        .filter(|(_, b)| leads[usize::from(**b)])
        .map(|(i, _)| i)
        .filter(|&i| {
            let window = &image[i..i + SIGNATURE_LEN];
            sigs.iter().any(|s| s[..] == *window)
        })
        .collect()
}

/// Pointer candidates in `window`, nearest to its end first.
///
/// The window is assumed to start pointer-aligned. A slot holding the key
/// length makes the slot before it a candidate; null pointers are dropped.
pub fn find_key_candidates(window: &[u8], width: PointerWidth) -> Vec<u64> {
    let step = width.bytes();
    let mut length_tag = [0u8; 8];
    length_tag[0] = KEY_LEN as u8;
    let length_tag = &length_tag[..step];

    let mut out = Vec::new();
    let slots = window.len() / step;
    if slots < 2 {
        return out;
    }
    let mut offset = (slots - 1) * step;
    while offset >= step {
        if &window[offset..offset + step] == length_tag {
            let ptr = read_pointer(&window[offset - step..offset]);
            if ptr != 0 {
                out.push(ptr);
            }
        }
        offset -= step;
    }
    out
}

fn read_pointer(slot: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw[..slot.len()].copy_from_slice(slot);
    u64::from_le_bytes(raw)
}

/// Searches `image` for the key, reading each candidate through `reader`
/// and returning the first one `verify` accepts.
///
/// Each signature occurrence bounds a window `[0, idx)`; a window that
/// yields nothing moves the search to the next occurrence. Addresses are
/// read at most once.
pub fn scan<F>(image: &ProcessImage, reader: &dyn ProcessMemoryReader, mut verify: F) -> Result<KeyMaterial>
where
    F: FnMut(&[u8]) -> bool,
{
    let width = reader.pointer_width();
    let mut tried = HashSet::new();
    let occurrences = device_signature_offsets(&image.bytes);
    debug!(count = occurrences.len(), "device signatures found");

    for idx in occurrences {
        for address in find_key_candidates(&image.bytes[..idx], width) {
            if !tried.insert(address) {
                continue;
            }
            let candidate = match reader.read(address, KEY_LEN) {
                Ok(bytes) => Zeroizing::new(bytes),
                Err(e) => {
                    debug!(address = format_args!("{address:#x}"), error = %e, "candidate unreadable");
                    continue;
                }
            };
            if verify(&candidate) {
                info!(address = format_args!("{address:#x}"), "key located");
                return KeyMaterial::from_bytes(&candidate);
            }
            debug!(address = format_args!("{address:#x}"), "candidate rejected");
        }
    }
    Err(RecallError::KeyNotFound)
}

/// Key scan verified against page 1 of a container.
pub fn recover_key(
    reader: &dyn ProcessMemoryReader,
    image: &ProcessImage,
    page1: &[u8],
    cipher: &PageCipher,
) -> Result<KeyMaterial> {
    scan(image, reader, |candidate| cipher.verify(page1, candidate))
}
