// SPDX-License-Identifier: GPL-3.0-only

//! F2FS superblock detection
//!
//! Only the leading fields of the on-disk superblock are decoded. All fields
//! are little-endian and extracted by offset:
//!
//! | offset | size | field             |
//! |--------|------|-------------------|
//! | 0      | 4    | magic             |
//! | 4      | 2    | major version     |
//! | 6      | 2    | minor version     |
//! | 8      | 24   | reserved (6×u32)  |
//! | 32     | 4    | checksum offset   |
//! | 36     | 8    | block count       |

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;

use tracing::debug;

use crate::device::open_read_only;

/// F2FS block size in bytes.
pub const F2FS_BLOCK_SIZE: u64 = 4096;

/// Byte offset of the primary superblock.
pub const F2FS_SUPER_OFFSET: u64 = 1024;

/// linux/magic.h: F2FS_SUPER_MAGIC
pub const F2FS_SUPER_MAGIC: u32 = 0xF2F5_2010;

/// Decoded view of the superblock header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SuperblockHeader {
    pub magic: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub reserved: [u32; 6],
    pub checksum_offset: u32,
    pub block_count: u64,
}

impl SuperblockHeader {
    /// Size of the encoded header in bytes.
    pub const LEN: usize = 44;

    /// Decode a header from raw bytes. Returns `None` if `bytes` is too short.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::LEN {
            return None;
        }

        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };

        let mut reserved = [0u32; 6];
        for (i, slot) in reserved.iter_mut().enumerate() {
            *slot = u32_at(8 + i * 4);
        }

        Some(Self {
            magic: u32_at(0),
            major_version: u16_at(4),
            minor_version: u16_at(6),
            reserved,
            checksum_offset: u32_at(32),
            block_count: u64::from_le_bytes(bytes[36..44].try_into().ok()?),
        })
    }

    pub fn has_f2fs_magic(&self) -> bool {
        self.magic == F2FS_SUPER_MAGIC
    }

    /// Filesystem size in bytes as recorded by the superblock.
    pub fn byte_size(&self) -> u64 {
        self.block_count.saturating_mul(F2FS_BLOCK_SIZE)
    }
}

fn read_header_at(file: &File, offset: u64) -> Option<SuperblockHeader> {
    let mut buf = [0u8; SuperblockHeader::LEN];
    if let Err(e) = file.read_exact_at(&mut buf, offset) {
        debug!("superblock read at {offset} failed: {e}");
        return None;
    }
    SuperblockHeader::parse(&buf)
}

/// Look for an F2FS superblock on `path`.
///
/// The primary location is tried first. Some layouts place the superblock
/// one block further in, so a magic mismatch retries there. Open failures
/// and short reads are reported the same way as a missing signature.
pub fn read_signature(path: &Path) -> Option<SuperblockHeader> {
    let file = match open_read_only(path) {
        Ok(file) => file,
        Err(e) => {
            debug!("{e}");
            return None;
        }
    };

    let primary = read_header_at(&file, F2FS_SUPER_OFFSET)?;
    if primary.has_f2fs_magic() {
        return Some(primary);
    }

    let secondary = read_header_at(&file, F2FS_BLOCK_SIZE + F2FS_SUPER_OFFSET)?;
    if secondary.has_f2fs_magic() {
        debug!("{:?}: superblock found at secondary offset", path);
        return Some(secondary);
    }

    None
}

/// Current F2FS size of `path` in bytes, or `0` when no superblock is found.
pub fn get_flash_fs_byte_size(path: &Path) -> u64 {
    read_signature(path)
        .map(|header| header.byte_size())
        .unwrap_or(0)
}
