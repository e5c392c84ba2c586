// SPDX-License-Identifier: GPL-3.0-only

//! External process execution
//!
//! Tools run synchronously with no timeout. The caller blocks until the
//! child exits and gets its raw exit status back.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, ExitStatus};

use nix::unistd::{AccessFlags, access};
use tracing::{info, warn};

use crate::args::ToolInvocation;
use crate::error::{FormatError, Result};

/// Runs external tools on behalf of the dispatchers.
pub trait ToolRunner {
    /// Run `invocation` to completion and return its exit code.
    ///
    /// Only a failure to start the process is an `Err`; a nonzero exit is
    /// reported through the returned code.
    fn run(&self, invocation: &ToolInvocation) -> Result<i32>;
}

/// Whether `path` exists and is executable by this process.
pub fn is_executable(path: &Path) -> bool {
    access(path, AccessFlags::X_OK).is_ok()
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

fn forward_output(tool: &str, bytes: &[u8], stderr: bool) {
    for line in String::from_utf8_lossy(bytes).lines() {
        if stderr {
            warn!(tool, "{line}");
        } else {
            info!(tool, "{line}");
        }
    }
}

/// Spawns tools as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<i32> {
        let tool = invocation.tool_name();
        info!("Running {}", invocation);

        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);

        let spawn_error = |source: std::io::Error| FormatError::Spawn {
            tool: tool.clone(),
            source,
        };

        let status = if invocation.capture_output {
            let output = command.output().map_err(spawn_error)?;
            forward_output(&tool, &output.stdout, false);
            forward_output(&tool, &output.stderr, true);
            output.status
        } else {
            command.status().map_err(spawn_error)?
        };

        Ok(exit_code(status))
    }
}

/// Logs each invocation and reports success without running anything.
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner;

impl ToolRunner for DryRunRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<i32> {
        info!("[dry-run] {}", invocation);
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, capture_output: bool) -> ToolInvocation {
        ToolInvocation {
            program: "/bin/sh".into(),
            args: vec!["-c".to_string(), script.to_string()],
            capture_output,
        }
    }

    #[test]
    fn reports_success() {
        assert_eq!(ProcessRunner.run(&sh("exit 0", false)).unwrap(), 0);
    }

    #[test]
    fn propagates_raw_exit_code() {
        assert_eq!(ProcessRunner.run(&sh("exit 3", false)).unwrap(), 3);
    }

    #[test]
    fn captured_output_does_not_change_status() {
        let cmd = sh("echo formatting; echo warning >&2; exit 1", true);
        assert_eq!(ProcessRunner.run(&cmd).unwrap(), 1);
    }

    #[test]
    fn signal_death_maps_above_128() {
        assert_eq!(ProcessRunner.run(&sh("kill -9 $$", false)).unwrap(), 137);
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cmd = ToolInvocation::new(dir.path().join("make_f2fs"));

        let err = ProcessRunner.run(&cmd).unwrap_err();
        assert!(matches!(err, FormatError::Spawn { ref tool, .. } if tool == "make_f2fs"));
        assert_eq!(err.exit_code(), -libc::ENOENT);
    }

    #[test]
    fn dry_run_never_spawns() {
        let cmd = ToolInvocation::new("/nonexistent/mke2fs");
        assert_eq!(DryRunRunner.run(&cmd).unwrap(), 0);
    }

    #[test]
    fn executable_check() {
        assert!(is_executable(Path::new("/bin/sh")));

        let file = tempfile::NamedTempFile::new().expect("temp file");
        assert!(!is_executable(file.path()));
        assert!(!is_executable(Path::new("/nonexistent/newfs_msdos")));
    }
}
