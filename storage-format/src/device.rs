// SPDX-License-Identifier: GPL-3.0-only

//! Block device size probing
//!
//! Each call opens its own read-only handle and drops it before returning,
//! so no descriptor outlives the query or is held across a tool invocation.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use tracing::debug;

use crate::error::{FormatError, Result};

// linux/fs.h: BLKGETSIZE64 = _IOR(0x12, 114, size_t)
const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;

/// Open a block device (or image file) read-only.
pub fn open_read_only(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|source| FormatError::Open {
            path: path.to_path_buf(),
            source,
        })
}

fn ioctl_size_bytes(file: &File) -> io::Result<u64> {
    let mut size: u64 = 0;
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(size)
}

/// Return the raw byte size of a block device.
///
/// Regular files report their length, which lets disk images stand in for
/// real devices. Anything else goes through the `BLKGETSIZE64` ioctl.
pub fn probe_size(path: &Path) -> Result<u64> {
    let file = open_read_only(path)?;

    let metadata = file.metadata().map_err(|source| FormatError::Query {
        path: path.to_path_buf(),
        source,
    })?;
    if metadata.is_file() {
        debug!("{:?} is a regular file of {} bytes", path, metadata.len());
        return Ok(metadata.len());
    }

    ioctl_size_bytes(&file).map_err(|source| FormatError::Query {
        path: path.to_path_buf(),
        source,
    })
}
