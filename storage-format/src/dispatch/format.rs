// SPDX-License-Identifier: GPL-3.0-only

use tracing::{error, info, warn};

use super::{Dispatcher, status};
use crate::args::{self, Ext4Options, F2fsOptions, ToolInvocation};
use crate::config::FormatConfig;
use crate::error::Result;
use crate::fstab::{FsMgrFlag, FsType, FstabEntry, PartitionSpec};
use crate::runner::is_executable;

impl Dispatcher<'_> {
    /// Tool invocations that [`Dispatcher::format`] would run, in order.
    pub fn plan_format(
        &self,
        spec: &PartitionSpec,
        crypt_footer: bool,
    ) -> Result<Vec<ToolInvocation>> {
        let config = FormatConfig::resolve(&spec.mount_point, self.properties);
        let device = spec.blk_device.as_path();

        let plan = match spec.fs_type {
            FsType::F2fs => {
                let size = self.target_size(spec, crypt_footer)?;
                let opts = F2fsOptions {
                    needs_projid: config.needs_projid,
                    needs_casefold: config.needs_casefold,
                    compress: spec.flags.contains(FsMgrFlag::FsCompress),
                };
                vec![args::make_f2fs(&self.tools, device, size, opts)]
            }
            FsType::Ext4 => {
                let size = self.target_size(spec, crypt_footer)?;
                // casefolding is enabled later by tune2fs
                let opts = Ext4Options {
                    needs_projid: config.needs_projid,
                    needs_metadata_csum: spec.flags.contains(FsMgrFlag::ExtMetaCsum),
                };
                vec![
                    args::mke2fs(&self.tools, device, size, opts),
                    args::e2fsdroid(&self.tools, &spec.mount_point, device),
                ]
            }
            FsType::Vfat => vec![args::newfs_msdos(&self.tools, device)],
        };

        Ok(plan)
    }

    /// Create a fresh filesystem on the partition.
    ///
    /// For ext4 the new filesystem is seeded by e2fsdroid once mke2fs
    /// succeeds. Nothing is rolled back if the seeding step fails.
    pub fn format(&self, spec: &PartitionSpec, crypt_footer: bool) -> Result<()> {
        info!("Format {:?} as '{}'", spec.blk_device, spec.fs_type);

        let plan = self.plan_format(spec, crypt_footer)?;

        if spec.fs_type == FsType::Vfat && !is_executable(&self.tools.newfs_msdos) {
            warn!("format vfat: no access to {:?}", self.tools.newfs_msdos);
        }

        self.execute_all(&plan)
    }

    /// [`Dispatcher::format`] reporting an integer status.
    pub fn do_format(&self, spec: &PartitionSpec, crypt_footer: bool) -> i32 {
        status(self.format(spec, crypt_footer))
    }

    /// Format a raw settings entry. Unsupported types give `-EINVAL`
    /// without running anything.
    pub fn format_entry(&self, entry: &FstabEntry, crypt_footer: bool) -> i32 {
        match entry.to_spec() {
            Ok(spec) => self.do_format(&spec, crypt_footer),
            Err(e) => {
                error!("{}: {}", entry.mount_point, e);
                e.exit_code()
            }
        }
    }
}
