// SPDX-License-Identifier: GPL-3.0-only

use tracing::{error, info};

use super::{Dispatcher, status};
use crate::args::{self, FS_BLOCK_SIZE, ToolInvocation};
use crate::error::{FormatError, Result};
use crate::fstab::{FsType, FstabEntry, PartitionSpec};
use crate::superblock::get_flash_fs_byte_size;

/// Growth below this many bytes is not worth a resize.
pub const RESIZE_MARGIN_BYTES: u64 = FS_BLOCK_SIZE * 1024;

/// Decide whether an F2FS filesystem of `current` bytes should grow to
/// `target` bytes. A `current` of zero means no filesystem was detected.
pub fn needs_resize(target: u64, current: u64) -> bool {
    current != 0 && target > current.saturating_add(RESIZE_MARGIN_BYTES)
}

impl Dispatcher<'_> {
    /// Tool invocations that [`Dispatcher::resize`] would run. Empty when
    /// no resize is needed.
    pub fn plan_resize(
        &self,
        spec: &PartitionSpec,
        crypt_footer: bool,
    ) -> Result<Vec<ToolInvocation>> {
        match spec.fs_type {
            FsType::F2fs => {}
            FsType::Ext4 | FsType::Vfat => {
                error!("File system type '{}' is not supported", spec.fs_type);
                return Err(FormatError::UnsupportedFilesystem(spec.fs_type.to_string()));
            }
        }

        let dev_sz = self.target_size(spec, crypt_footer)?;
        info!("dev_sz: {}", dev_sz);

        let f2fs_sz = get_flash_fs_byte_size(&spec.blk_device);
        info!("f2fs_sz: {}", f2fs_sz);

        if !needs_resize(dev_sz, f2fs_sz) {
            info!("no need resize");
            return Ok(Vec::new());
        }

        Ok(vec![args::resize_f2fs(&self.tools, &spec.blk_device, dev_sz)])
    }

    /// Grow an existing F2FS filesystem to fill the partition.
    pub fn resize(&self, spec: &PartitionSpec, crypt_footer: bool) -> Result<()> {
        info!("Resize {:?} as '{}'", spec.blk_device, spec.length);

        let plan = self.plan_resize(spec, crypt_footer)?;
        self.execute_all(&plan)
    }

    /// [`Dispatcher::resize`] reporting an integer status.
    pub fn do_resize(&self, spec: &PartitionSpec, crypt_footer: bool) -> i32 {
        status(self.resize(spec, crypt_footer))
    }

    /// Resize a raw settings entry. Unsupported types give `-EINVAL`
    /// without running anything.
    pub fn resize_entry(&self, entry: &FstabEntry, crypt_footer: bool) -> i32 {
        match entry.to_spec() {
            Ok(spec) => self.do_resize(&spec, crypt_footer),
            Err(e) => {
                error!("{}: {}", entry.mount_point, e);
                e.exit_code()
            }
        }
    }
}
