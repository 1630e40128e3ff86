//! Page cipher for the client's encrypted SQLite containers.
//!
//! Every page is AES-256-CBC encrypted on its own with the IV stored in the
//! page trailer, and authenticated with a truncated HMAC-SHA1:
//!
//! ```text
//! page 1:  [salt 16][ciphertext ....][iv 16][hmac 20][reserved 12]
//! page n:  [ciphertext ...........  ][iv 16][hmac 20][reserved 12]
//! ```
//!
//! The AES key is PBKDF2-HMAC-SHA1 of the raw key over the salt; the MAC
//! key is a second, 2-round PBKDF2 of the AES key over `salt ^ 0x3a`.

use crate::error::{RecallError, Result};
use crate::key::{KeyMaterial, KEY_LEN};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use rayon::prelude::*;
use sha1::Sha1;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;
use zeroize::Zeroizing;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type HmacSha1 = Hmac<Sha1>;

pub const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";
pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const DEFAULT_KDF_ITERATIONS: u32 = 64_000;
pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 16;
pub const HMAC_LEN: usize = 20;
const HMAC_FIELD_LEN: usize = 32;
/// IV plus HMAC field at the tail of every page.
pub const RESERVE_LEN: usize = IV_LEN + HMAC_FIELD_LEN;
const MAC_SALT_MASK: u8 = 0x3a;
const MAC_KDF_ITERATIONS: u32 = 2;
const PAGES_PER_BATCH: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherParams {
    pub page_size: usize,
    pub kdf_iterations: u32,
}

impl Default for CipherParams {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

/// Keys derived from one raw key and one container salt.
pub struct DerivedKeys {
    enc: Zeroizing<[u8; KEY_LEN]>,
    mac: Zeroizing<[u8; KEY_LEN]>,
}

#[derive(Debug, Clone, Default)]
pub struct PageCipher {
    params: CipherParams,
}

impl PageCipher {
    pub fn new(params: CipherParams) -> Result<Self> {
        let ps = params.page_size;
        if ps % 16 != 0 || ps < SALT_LEN + RESERVE_LEN + 16 {
            return Err(RecallError::Unsupported("page size must be a multiple of 16"));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> CipherParams {
        self.params
    }

    pub fn derive_keys(&self, raw_key: &[u8], salt: &[u8]) -> DerivedKeys {
        let mut enc = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha1>(raw_key, salt, self.params.kdf_iterations, &mut enc[..]);

        let mac_salt: Vec<u8> = salt.iter().map(|b| b ^ MAC_SALT_MASK).collect();
        let mut mac = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha1>(&enc[..], &mac_salt, MAC_KDF_ITERATIONS, &mut mac[..]);

        DerivedKeys { enc, mac }
    }

    /// True when `candidate` authenticates page 1 of a container.
    pub fn verify(&self, page1: &[u8], candidate: &[u8]) -> bool {
        self.unlock(page1, candidate).is_ok()
    }

    /// Derives keys from `candidate` and checks them against page 1.
    pub fn unlock(&self, page1: &[u8], candidate: &[u8]) -> Result<DerivedKeys> {
        if page1.len() < self.params.page_size {
            return Err(RecallError::InvalidKey);
        }
        let page1 = &page1[..self.params.page_size];
        let keys = self.derive_keys(candidate, &page1[..SALT_LEN]);
        if !self.page_authentic(&keys, 1, page1) {
            return Err(RecallError::InvalidKey);
        }
        Ok(keys)
    }

    fn page_mac(&self, keys: &DerivedKeys, page_no: u32, page: &[u8]) -> Result<HmacSha1> {
        let ps = self.params.page_size;
        let start = if page_no == 1 { SALT_LEN } else { 0 };
        let mut mac = HmacSha1::new_from_slice(&keys.mac[..])
            .map_err(|_| RecallError::Unsupported("hmac key length"))?;
        mac.update(&page[start..ps - HMAC_FIELD_LEN]);
        mac.update(&page_no.to_le_bytes());
        Ok(mac)
    }

    fn page_authentic(&self, keys: &DerivedKeys, page_no: u32, page: &[u8]) -> bool {
        let ps = self.params.page_size;
        let stored = &page[ps - HMAC_FIELD_LEN..ps - HMAC_FIELD_LEN + HMAC_LEN];
        match self.page_mac(keys, page_no, page) {
            Ok(mac) => mac.verify_truncated_left(stored).is_ok(),
            Err(_) => false,
        }
    }

    /// Decrypts one page; `page_no` is 1-based.
    pub fn decrypt_page(&self, keys: &DerivedKeys, page_no: u32, page: &[u8]) -> Result<Vec<u8>> {
        let ps = self.params.page_size;
        if page.len() != ps {
            return Err(RecallError::CorruptPage { page: page_no });
        }
        if !self.page_authentic(keys, page_no, page) {
            return Err(RecallError::CorruptPage { page: page_no });
        }
        let start = if page_no == 1 { SALT_LEN } else { 0 };
        let reserve_at = ps - RESERVE_LEN;
        let iv = &page[reserve_at..reserve_at + IV_LEN];

        let mut out = Vec::with_capacity(ps);
        if page_no == 1 {
            out.extend_from_slice(SQLITE_HEADER);
        }
        let mut body = page[start..reserve_at].to_vec();
        Aes256CbcDec::new_from_slices(&keys.enc[..], iv)
            .map_err(|_| RecallError::CorruptPage { page: page_no })?
            .decrypt_padded_mut::<NoPadding>(&mut body)
            .map_err(|_| RecallError::CorruptPage { page: page_no })?;
        out.extend_from_slice(&body);
        out.extend_from_slice(&page[reserve_at..]);
        Ok(out)
    }

    pub fn read_page1(&self, path: &Path) -> Result<Vec<u8>> {
        let mut file = open_container(path)?;
        let mut page = vec![0u8; self.params.page_size];
        let n = read_full(&mut file, &mut page)?;
        if n < page.len() {
            return Err(RecallError::TruncatedContainer {
                path: path.to_path_buf(),
                offset: n as u64,
            });
        }
        Ok(page)
    }

    /// Decrypts a whole container held in memory.
    pub fn decrypt_bytes(&self, container: &[u8], key: &KeyMaterial) -> Result<Vec<u8>> {
        let ps = self.params.page_size;
        if container.is_empty() || container.len() % ps != 0 {
            return Err(RecallError::TruncatedContainer {
                path: Default::default(),
                offset: (container.len() / ps * ps) as u64,
            });
        }
        let keys = self.unlock(&container[..ps], key.as_bytes())?;
        let pages = self.decrypt_batch(&keys, 0, container)?;
        Ok(pages.concat())
    }

    fn decrypt_batch(&self, keys: &DerivedKeys, first_index: usize, batch: &[u8]) -> Result<Vec<Vec<u8>>> {
        batch
            .par_chunks_exact(self.params.page_size)
            .enumerate()
            .map(|(i, page)| self.decrypt_page(keys, (first_index + i + 1) as u32, page))
            .collect()
    }

    /// Decrypts `src` into `dst`. The output only appears once every page
    /// has been decrypted and authenticated.
    pub fn decrypt_file(&self, src: &Path, dst: &Path, key: &KeyMaterial) -> Result<()> {
        let ps = self.params.page_size;
        let mut input = open_container(src)?;
        let mut batch = vec![0u8; ps * PAGES_PER_BATCH];

        let n = read_full(&mut input, &mut batch)?;
        if n == 0 || n % ps != 0 {
            return Err(RecallError::TruncatedContainer {
                path: src.to_path_buf(),
                offset: (n / ps * ps) as u64,
            });
        }
        let keys = self.unlock(&batch[..ps], key.as_bytes())?;

        let parent = match dst.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        std::fs::create_dir_all(&parent)?;
        let mut out = tempfile::NamedTempFile::new_in(&parent)?;

        let mut pages_done = 0usize;
        let mut filled = n;
        loop {
            for page in self.decrypt_batch(&keys, pages_done, &batch[..filled])? {
                out.write_all(&page)?;
            }
            pages_done += filled / ps;
            if filled < batch.len() {
                break;
            }
            filled = read_full(&mut input, &mut batch)?;
            if filled == 0 {
                break;
            }
            if filled % ps != 0 {
                return Err(RecallError::TruncatedContainer {
                    path: src.to_path_buf(),
                    offset: (pages_done * ps + filled / ps * ps) as u64,
                });
            }
        }

        out.flush()?;
        out.persist(dst).map_err(|e| e.error)?;
        debug!(src = %src.display(), pages = pages_done, "container decrypted");
        Ok(())
    }

    /// Encrypts plaintext pages into a container under `key` and `salt`.
    ///
    /// The final `RESERVE_LEN` bytes of every plaintext page are discarded
    /// and replaced by a fresh random IV and the page HMAC; the first 16
    /// bytes of page 1 are replaced by the salt.
    pub fn seal(&self, plaintext: &[u8], key: &KeyMaterial, salt: &[u8; SALT_LEN]) -> Result<Vec<u8>> {
        let ps = self.params.page_size;
        if plaintext.is_empty() || plaintext.len() % ps != 0 {
            return Err(RecallError::TruncatedContainer {
                path: Default::default(),
                offset: (plaintext.len() / ps * ps) as u64,
            });
        }
        let keys = self.derive_keys(key.as_bytes(), salt);
        let reserve_at = ps - RESERVE_LEN;
        let mut out = Vec::with_capacity(plaintext.len());

        for (i, plain) in plaintext.chunks_exact(ps).enumerate() {
            let page_no = (i + 1) as u32;
            let start = if page_no == 1 { SALT_LEN } else { 0 };
            let mut page = vec![0u8; ps];
            if page_no == 1 {
                page[..SALT_LEN].copy_from_slice(salt);
            }

            let mut iv = [0u8; IV_LEN];
            OsRng.fill_bytes(&mut iv);
            page[reserve_at..reserve_at + IV_LEN].copy_from_slice(&iv);

            let mut body = plain[start..reserve_at].to_vec();
            let len = body.len();
            Aes256CbcEnc::new_from_slices(&keys.enc[..], &iv)
                .map_err(|_| RecallError::Unsupported("aes key length"))?
                .encrypt_padded_mut::<NoPadding>(&mut body, len)
                .map_err(|_| RecallError::Unsupported("page body not block aligned"))?;
            page[start..reserve_at].copy_from_slice(&body);

            let tag = self.page_mac(&keys, page_no, &page)?.finalize().into_bytes();
            let at = ps - HMAC_FIELD_LEN;
            page[at..at + HMAC_LEN].copy_from_slice(&tag[..HMAC_LEN]);
            out.extend_from_slice(&page);
        }
        Ok(out)
    }
}

fn open_container(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => RecallError::ContainerMissing(path.to_path_buf()),
        _ => RecallError::Io(e),
    })
}

/// Reads until `buf` is full or EOF; returns bytes read.
fn read_full(r: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
