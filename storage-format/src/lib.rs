// SPDX-License-Identifier: GPL-3.0-only

//! Partition format and resize dispatch
//!
//! Decides how to create or grow the filesystem on an fstab-managed
//! partition and hands the work to the platform tools:
//! - `mke2fs` + `e2fsdroid` for ext4
//! - `make_f2fs` / `resize.f2fs` for F2FS
//! - `newfs_msdos` for FAT
//!
//! The filesystem layout itself is entirely up to those tools. This crate
//! only sizes the target (accounting for a crypto footer), picks feature
//! flags, and reads the F2FS superblock to tell whether a resize is needed.

pub mod args;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod fstab;
pub mod runner;
pub mod superblock;

pub use args::ToolInvocation;
pub use config::{
    EnvProperties, FormatConfig, PropertyLookup, PropertyMap, Settings, ToolPaths,
};
pub use device::probe_size;
pub use dispatch::Dispatcher;
pub use error::{FormatError, Result};
pub use fstab::{FsMgrFlag, FsType, FstabEntry, PartitionSpec};
pub use runner::{DryRunRunner, ProcessRunner, ToolRunner};
pub use superblock::{SuperblockHeader, get_flash_fs_byte_size, read_signature};
