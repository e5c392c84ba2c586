// SPDX-License-Identifier: GPL-3.0-only

//! Partition descriptors
//!
//! [`FstabEntry`] is the loosely typed record read from configuration.
//! [`PartitionSpec`] is the validated form the dispatchers operate on.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use enumflags2::{BitFlags, bitflags};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{FormatError, Result};

/// Mount point of the primary user-data partition.
pub const DATA_MOUNT_POINT: &str = "/data";

/// Filesystems this crate knows how to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsType {
    /// ext4, formatted with mke2fs
    Ext4,
    /// F2FS, formatted with make_f2fs and grown with resize.f2fs
    F2fs,
    /// FAT, formatted with newfs_msdos
    Vfat,
}

impl FsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::F2fs => "f2fs",
            Self::Vfat => "vfat",
        }
    }
}

impl FromStr for FsType {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ext4" => Ok(Self::Ext4),
            "f2fs" => Ok(Self::F2fs),
            "vfat" => Ok(Self::Vfat),
            other => Err(FormatError::UnsupportedFilesystem(other.to_string())),
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// fs_mgr flags that influence formatting.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsMgrFlag {
    /// Enable F2FS compression
    FsCompress = 1 << 0,
    /// Enable ext4 metadata checksums
    ExtMetaCsum = 1 << 1,
}

impl FsMgrFlag {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "fs_compress" | "compress" => Some(Self::FsCompress),
            "ext_meta_csum" => Some(Self::ExtMetaCsum),
            _ => None,
        }
    }
}

/// Validated description of a partition to format or resize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub blk_device: PathBuf,
    pub mount_point: String,
    pub fs_type: FsType,
    /// Existing filesystem length in bytes; `0` means ask the device.
    pub length: u64,
    pub flags: BitFlags<FsMgrFlag>,
}

impl PartitionSpec {
    pub fn new(
        blk_device: impl Into<PathBuf>,
        mount_point: impl Into<String>,
        fs_type: FsType,
    ) -> Self {
        Self {
            blk_device: blk_device.into(),
            mount_point: mount_point.into(),
            fs_type,
            length: 0,
            flags: BitFlags::empty(),
        }
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    pub fn with_flags(mut self, flags: impl Into<BitFlags<FsMgrFlag>>) -> Self {
        self.flags = flags.into();
        self
    }

    pub fn is_data_partition(&self) -> bool {
        self.mount_point == DATA_MOUNT_POINT
    }
}

/// Partition entry as written in the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FstabEntry {
    pub blk_device: PathBuf,
    pub mount_point: String,
    pub fs_type: String,
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl FstabEntry {
    /// Convert into a [`PartitionSpec`].
    ///
    /// Unknown flag names are skipped; an unknown filesystem type is an error.
    pub fn to_spec(&self) -> Result<PartitionSpec> {
        let fs_type = self.fs_type.parse::<FsType>()?;

        let mut flags = BitFlags::empty();
        for name in &self.flags {
            match FsMgrFlag::from_name(name) {
                Some(flag) => flags |= flag,
                None => warn!("{}: ignoring fs_mgr flag '{}'", self.mount_point, name),
            }
        }

        Ok(PartitionSpec {
            blk_device: self.blk_device.clone(),
            mount_point: self.mount_point.clone(),
            fs_type,
            length: self.length,
            flags,
        })
    }
}
