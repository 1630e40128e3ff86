//! Access to another process's address space.
//!
//! The key scan itself never touches the OS: it works on a [`ProcessImage`]
//! and reads individual key candidates through [`ProcessMemoryReader`].

use crate::error::{RecallError, Result};

#[cfg(windows)]
pub mod windows;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

impl PointerWidth {
    pub fn bytes(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }

    pub fn host() -> Self {
        if cfg!(target_pointer_width = "32") {
            Self::Bits32
        } else {
            Self::Bits64
        }
    }

    /// Width of a target process given its WOW64 status, or `None` when the
    /// status could not be queried.
    pub fn for_target(wow64: Option<bool>) -> Self {
        match wow64 {
            Some(true) => Self::Bits32,
            Some(false) | None => Self::host(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bits32 => "32-bit",
            Self::Bits64 => "64-bit",
        }
    }
}

/// Snapshot of one module's mapped range.
#[derive(Debug, Clone)]
pub struct ProcessImage {
    pub base: u64,
    pub bytes: Vec<u8>,
}

impl ProcessImage {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

pub trait ProcessMemoryReader {
    fn pointer_width(&self) -> PointerWidth;

    /// Reads exactly `len` bytes at `address`.
    fn read(&self, address: u64, len: usize) -> Result<Vec<u8>>;
}

/// Sparse address space assembled from byte regions.
#[derive(Debug, Clone)]
pub struct MemoryMap {
    width: PointerWidth,
    regions: Vec<(u64, Vec<u8>)>,
}

impl MemoryMap {
    pub fn new(width: PointerWidth) -> Self {
        Self {
            width,
            regions: Vec::new(),
        }
    }

    pub fn map(&mut self, address: u64, bytes: Vec<u8>) -> &mut Self {
        self.regions.push((address, bytes));
        self
    }
}

impl ProcessMemoryReader for MemoryMap {
    fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    fn read(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        for (base, bytes) in &self.regions {
            let end = base + bytes.len() as u64;
            if address >= *base && address + len as u64 <= end {
                let at = (address - base) as usize;
                return Ok(bytes[at..at + len].to_vec());
            }
        }
        Err(RecallError::MemoryRead { address, len })
    }
}
