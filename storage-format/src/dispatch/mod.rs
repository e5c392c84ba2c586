// SPDX-License-Identifier: GPL-3.0-only

//! Format and resize entry points
//!
//! A [`Dispatcher`] turns a [`PartitionSpec`] into one or more tool
//! invocations and runs them. Integer statuses follow the fs_mgr
//! convention: `0` on success, `-EINVAL` for an unsupported filesystem,
//! otherwise the failing tool's exit code.

mod format;
mod resize;

pub use resize::{RESIZE_MARGIN_BYTES, needs_resize};

use tracing::{error, warn};

use crate::args::ToolInvocation;
use crate::config::{CRYPT_FOOTER_OFFSET, PropertyLookup, ToolPaths};
use crate::device::probe_size;
use crate::error::{FormatError, Result};
use crate::fstab::PartitionSpec;
use crate::runner::ToolRunner;

/// Collapse a result into an fs_mgr style status code.
pub fn status(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.exit_code(),
    }
}

pub struct Dispatcher<'a> {
    runner: &'a dyn ToolRunner,
    properties: &'a dyn PropertyLookup,
    tools: ToolPaths,
    crypt_footer_bytes: u64,
}

impl<'a> Dispatcher<'a> {
    pub fn new(runner: &'a dyn ToolRunner, properties: &'a dyn PropertyLookup) -> Self {
        Self {
            runner,
            properties,
            tools: ToolPaths::default(),
            crypt_footer_bytes: CRYPT_FOOTER_OFFSET,
        }
    }

    pub fn with_tools(mut self, tools: ToolPaths) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_crypt_footer_bytes(mut self, bytes: u64) -> Self {
        self.crypt_footer_bytes = bytes;
        self
    }

    /// Bytes the new or resized filesystem may occupy.
    ///
    /// A nonzero declared length is trusted as-is; otherwise the device is
    /// asked. The crypto footer comes off exactly once.
    fn target_size(&self, spec: &PartitionSpec, crypt_footer: bool) -> Result<u64> {
        let dev_sz = if spec.length != 0 {
            spec.length
        } else {
            probe_size(&spec.blk_device)?
        };

        if !crypt_footer {
            return Ok(dev_sz);
        }

        if dev_sz < self.crypt_footer_bytes {
            warn!(
                "{:?}: {} bytes is smaller than the {} byte crypto footer",
                spec.blk_device, dev_sz, self.crypt_footer_bytes
            );
        }
        Ok(dev_sz.saturating_sub(self.crypt_footer_bytes))
    }

    fn execute(&self, invocation: &ToolInvocation) -> Result<()> {
        let code = self.runner.run(invocation)?;
        if code != 0 {
            let tool = invocation.tool_name();
            error!("{} returned {}", tool, code);
            return Err(FormatError::ToolFailure { tool, code });
        }
        Ok(())
    }

    fn execute_all(&self, plan: &[ToolInvocation]) -> Result<()> {
        plan.iter().try_for_each(|invocation| self.execute(invocation))
    }
}
