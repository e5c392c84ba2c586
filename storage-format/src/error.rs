// SPDX-License-Identifier: GPL-3.0-only

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error types for format and resize operations
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("cannot open block device {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot get block device size of {path:?}: {source}")]
    Query {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("file system type '{0}' is not supported")]
    UnsupportedFilesystem(String),

    #[error("{tool} returned {code}")]
    ToolFailure { tool: String, code: i32 },

    #[error("failed to execute {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl FormatError {
    /// Status code reported to callers that expect an integer exit status.
    ///
    /// Tool failures propagate the tool's own exit code untouched.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Open { .. } | Self::Query { .. } => -1,
            Self::UnsupportedFilesystem(_) | Self::Config(_) => -libc::EINVAL,
            Self::ToolFailure { code, .. } => *code,
            Self::Spawn { source, .. } => -source.raw_os_error().unwrap_or(1),
        }
    }
}

/// Result type alias for format operations
pub type Result<T> = std::result::Result<T, FormatError>;
