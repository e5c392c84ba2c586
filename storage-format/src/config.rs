// SPDX-License-Identifier: GPL-3.0-only

//! Configuration inputs
//!
//! - [`PropertyLookup`]: boolean system properties that switch on optional
//!   filesystem features for the data partition
//! - [`ToolPaths`]: where the external formatters live
//! - [`Settings`]: the TOML settings file tying these together with the
//!   partition table

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use which::which;

use crate::error::{FormatError, Result};
use crate::fstab::{DATA_MOUNT_POINT, FstabEntry};

/// Property enabling casefolding on emulated external storage.
pub const PROP_CASEFOLD: &str = "external_storage.casefold.enabled";

/// Property enabling project quotas on emulated external storage.
pub const PROP_PROJID: &str = "external_storage.projid.enabled";

/// Bytes reserved at the end of an encrypted device for the crypto footer.
pub const CRYPT_FOOTER_OFFSET: u64 = 0x4000;

const DEFAULT_TOOL_DIR: &str = "/system/bin";

/// Read access to boolean system properties.
pub trait PropertyLookup {
    fn get_bool(&self, name: &str, default: bool) -> bool;
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "y" | "yes" | "on" | "true" => Some(true),
        "0" | "n" | "no" | "off" | "false" => Some(false),
        _ => None,
    }
}

/// In-memory property store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyMap(BTreeMap<String, bool>);

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: bool) {
        self.0.insert(name.into(), value);
    }
}

impl PropertyLookup for PropertyMap {
    fn get_bool(&self, name: &str, default: bool) -> bool {
        self.0.get(name).copied().unwrap_or(default)
    }
}

/// Properties read from the process environment.
///
/// `external_storage.projid.enabled` is looked up as
/// `EXTERNAL_STORAGE_PROJID_ENABLED`.
#[derive(Debug, Clone, Default)]
pub struct EnvProperties;

impl EnvProperties {
    pub fn var_name(property: &str) -> String {
        property.replace('.', "_").to_ascii_uppercase()
    }
}

impl PropertyLookup for EnvProperties {
    fn get_bool(&self, name: &str, default: bool) -> bool {
        std::env::var(Self::var_name(name))
            .ok()
            .and_then(|value| parse_bool(&value))
            .unwrap_or(default)
    }
}

/// Checks a first store and falls back to a second one.
pub struct Layered<'a> {
    pub upper: &'a dyn PropertyLookup,
    pub lower: &'a dyn PropertyLookup,
}

impl PropertyLookup for Layered<'_> {
    fn get_bool(&self, name: &str, default: bool) -> bool {
        let fallback = self.lower.get_bool(name, default);
        self.upper.get_bool(name, fallback)
    }
}

/// Feature switches resolved for a single format call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatConfig {
    pub needs_projid: bool,
    pub needs_casefold: bool,
}

impl FormatConfig {
    /// Only the data partition consults the property store.
    pub fn resolve(mount_point: &str, properties: &dyn PropertyLookup) -> Self {
        if mount_point != DATA_MOUNT_POINT {
            return Self::default();
        }

        Self {
            needs_casefold: properties.get_bool(PROP_CASEFOLD, false),
            needs_projid: properties.get_bool(PROP_PROJID, false),
        }
    }
}

/// Locations of the external filesystem tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub mke2fs: PathBuf,
    pub e2fsdroid: PathBuf,
    pub make_f2fs: PathBuf,
    pub resize_f2fs: PathBuf,
    pub newfs_msdos: PathBuf,
}

impl ToolPaths {
    const NAMES: [&'static str; 5] = [
        "mke2fs",
        "e2fsdroid",
        "make_f2fs",
        "resize.f2fs",
        "newfs_msdos",
    ];

    fn from_fn(mut locate: impl FnMut(&str) -> PathBuf) -> Self {
        let [mke2fs, e2fsdroid, make_f2fs, resize_f2fs, newfs_msdos] = Self::NAMES;
        Self {
            mke2fs: locate(mke2fs),
            e2fsdroid: locate(e2fsdroid),
            make_f2fs: locate(make_f2fs),
            resize_f2fs: locate(resize_f2fs),
            newfs_msdos: locate(newfs_msdos),
        }
    }

    /// All tools inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::from_fn(|name| dir.join(name))
    }

    /// Resolve each tool through `PATH`, keeping the default location for
    /// tools that are not found.
    pub fn from_search_path() -> Self {
        Self::from_fn(|name| match which(name) {
            Ok(path) => {
                debug!("Found {} at {:?}", name, path);
                path
            }
            Err(_) => Path::new(DEFAULT_TOOL_DIR).join(name),
        })
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self::in_dir(DEFAULT_TOOL_DIR)
    }
}

fn default_crypt_footer_bytes() -> u64 {
    CRYPT_FOOTER_OFFSET
}

/// Contents of the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_crypt_footer_bytes")]
    pub crypt_footer_bytes: u64,
    #[serde(default)]
    pub tool_dir: Option<PathBuf>,
    #[serde(default)]
    pub search_path: bool,
    #[serde(default)]
    pub properties: PropertyMap,
    #[serde(default, rename = "partition")]
    pub partitions: Vec<FstabEntry>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            crypt_footer_bytes: CRYPT_FOOTER_OFFSET,
            tool_dir: None,
            search_path: false,
            properties: PropertyMap::new(),
            partitions: Vec::new(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| FormatError::Config(format!("failed to read {:?}: {}", path, e)))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(raw).map_err(|e| FormatError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.partitions {
            if entry.blk_device.as_os_str().is_empty() {
                return Err(FormatError::Config(format!(
                    "partition '{}' has an empty blk_device",
                    entry.mount_point
                )));
            }
            if entry.mount_point.is_empty() {
                return Err(FormatError::Config(format!(
                    "partition {:?} has an empty mount_point",
                    entry.blk_device
                )));
            }
            if !seen.insert(entry.mount_point.as_str()) {
                return Err(FormatError::Config(format!(
                    "mount point '{}' is listed more than once",
                    entry.mount_point
                )));
            }
        }
        Ok(())
    }

    pub fn tool_paths(&self) -> ToolPaths {
        match (&self.tool_dir, self.search_path) {
            (Some(dir), _) => ToolPaths::in_dir(dir),
            (None, true) => ToolPaths::from_search_path(),
            (None, false) => ToolPaths::default(),
        }
    }

    pub fn partition(&self, mount_point: &str) -> Option<&FstabEntry> {
        self.partitions
            .iter()
            .find(|entry| entry.mount_point == mount_point)
    }
}
