// SPDX-License-Identifier: GPL-3.0-only

//! Command lines for the external filesystem tools
//!
//! Pure functions: nothing here touches the device or spawns a process.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ToolPaths;

/// Block size used for every filesystem created here.
pub const FS_BLOCK_SIZE: u64 = 4096;

/// resize.f2fs takes its target size in 512-byte sectors.
pub const SECTOR_SIZE: u64 = 512;

/// One external program run with its full argument list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub capture_output: bool,
}

impl ToolInvocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            capture_output: false,
        }
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn device(self, device: &Path) -> Self {
        self.arg(device.to_string_lossy())
    }

    /// Program file name, used to label log output.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// ext4 feature switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ext4Options {
    pub needs_projid: bool,
    pub needs_metadata_csum: bool,
}

/// F2FS feature switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct F2fsOptions {
    pub needs_projid: bool,
    pub needs_casefold: bool,
    pub compress: bool,
}

fn blocks(size_bytes: u64) -> String {
    (size_bytes / FS_BLOCK_SIZE).to_string()
}

/// `mke2fs` for an ext4 filesystem of `size_bytes` on `device`.
pub fn mke2fs(
    tools: &ToolPaths,
    device: &Path,
    size_bytes: u64,
    opts: Ext4Options,
) -> ToolInvocation {
    let mut cmd = ToolInvocation::new(&tools.mke2fs).args(["-t", "ext4", "-b", "4096"]);

    // Project IDs need wider inodes. Quotas themselves are switched on later by tune2fs.
    if opts.needs_projid {
        cmd = cmd.args(["-I", "512"]);
    }

    // Extents let the tree be checksummed and 64bit gives full-width checksums.
    if opts.needs_metadata_csum {
        cmd = cmd.args(["-O", "metadata_csum", "-O", "64bit", "-O", "extent"]);
    }

    cmd.device(device).arg(blocks(size_bytes))
}

/// `e2fsdroid` seeding a freshly created ext4 filesystem for `mount_point`.
pub fn e2fsdroid(tools: &ToolPaths, mount_point: &str, device: &Path) -> ToolInvocation {
    ToolInvocation::new(&tools.e2fsdroid)
        .args(["-e", "-a", mount_point])
        .device(device)
}

/// `make_f2fs` for an F2FS filesystem of `size_bytes` on `device`.
pub fn make_f2fs(
    tools: &ToolPaths,
    device: &Path,
    size_bytes: u64,
    opts: F2fsOptions,
) -> ToolInvocation {
    let mut cmd = ToolInvocation::new(&tools.make_f2fs).args(["-g", "android"]);

    if opts.needs_projid {
        cmd = cmd.args(["-O", "project_quota,extra_attr"]);
    }
    if opts.needs_casefold {
        cmd = cmd.args(["-O", "casefold", "-C", "utf8"]);
    }
    // compression requires extra_attr
    if opts.compress {
        cmd = cmd.args(["-O", "compression", "-O", "extra_attr"]);
    }

    cmd.device(device).arg(blocks(size_bytes))
}

/// `resize.f2fs` growing the filesystem on `device` to `size_bytes`.
pub fn resize_f2fs(tools: &ToolPaths, device: &Path, size_bytes: u64) -> ToolInvocation {
    ToolInvocation::new(&tools.resize_f2fs)
        .arg("-t")
        .arg((size_bytes / SECTOR_SIZE).to_string())
        .device(device)
}

/// `newfs_msdos` for a FAT filesystem spanning `device`.
pub fn newfs_msdos(tools: &ToolPaths, device: &Path) -> ToolInvocation {
    ToolInvocation::new(&tools.newfs_msdos)
        .args(["-O", "android"])
        .device(device)
}
