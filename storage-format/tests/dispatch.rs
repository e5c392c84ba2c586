// SPDX-License-Identifier: GPL-3.0-only

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::{Path, PathBuf};

use storage_format::config::{CRYPT_FOOTER_OFFSET, PROP_CASEFOLD, PROP_PROJID};
use storage_format::dispatch::RESIZE_MARGIN_BYTES;
use storage_format::superblock::{F2FS_SUPER_MAGIC, F2FS_SUPER_OFFSET};
use storage_format::{
    Dispatcher, FsMgrFlag, FsType, FstabEntry, PartitionSpec, ProcessRunner, PropertyMap, Result,
    ToolInvocation, ToolPaths, ToolRunner,
};

const GIB: u64 = 1 << 30;

/// Records every invocation and answers with scripted exit codes.
#[derive(Default)]
struct RecordingRunner {
    calls: RefCell<Vec<ToolInvocation>>,
    codes: RefCell<VecDeque<i32>>,
}

impl RecordingRunner {
    fn with_codes(codes: &[i32]) -> Self {
        Self {
            calls: RefCell::default(),
            codes: RefCell::new(codes.iter().copied().collect()),
        }
    }

    fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.borrow().clone()
    }

    fn tool_names(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.tool_name()).collect()
    }
}

impl ToolRunner for RecordingRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<i32> {
        self.calls.borrow_mut().push(invocation.clone());
        Ok(self.codes.borrow_mut().pop_front().unwrap_or(0))
    }
}

fn image(len: u64) -> tempfile::NamedTempFile {
    let image = tempfile::NamedTempFile::new().expect("temp image");
    image.as_file().set_len(len).expect("resize image");
    image
}

fn f2fs_image(len: u64, block_count: u64) -> tempfile::NamedTempFile {
    let image = image(len);
    let mut header = [0u8; 44];
    header[0..4].copy_from_slice(&F2FS_SUPER_MAGIC.to_le_bytes());
    header[36..44].copy_from_slice(&block_count.to_le_bytes());
    image
        .as_file()
        .write_all_at(&header, F2FS_SUPER_OFFSET)
        .expect("write superblock");
    image
}

fn data_props(projid: bool, casefold: bool) -> PropertyMap {
    let mut props = PropertyMap::new();
    props.set(PROP_PROJID, projid);
    props.set(PROP_CASEFOLD, casefold);
    props
}

fn device_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn unsupported_type_is_einval_without_running_tools() {
    let runner = RecordingRunner::default();
    let props = PropertyMap::new();
    let dispatcher = Dispatcher::new(&runner, &props);

    let entry = FstabEntry {
        blk_device: PathBuf::from("/dev/block/sda9"),
        mount_point: "/data".to_string(),
        fs_type: "btrfs".to_string(),
        length: 0,
        flags: Vec::new(),
    };

    assert_eq!(dispatcher.format_entry(&entry, false), -libc::EINVAL);
    assert_eq!(dispatcher.resize_entry(&entry, false), -libc::EINVAL);
    assert!(runner.calls().is_empty());
}

#[test]
fn f2fs_size_from_probed_device() {
    let runner = RecordingRunner::default();
    let props = PropertyMap::new();
    let dispatcher = Dispatcher::new(&runner, &props);
    let dev = image(GIB);
    let spec = PartitionSpec::new(dev.path(), "/data", FsType::F2fs);

    assert_eq!(dispatcher.do_format(&spec, false), 0);

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, Path::new("/system/bin/make_f2fs"));
    assert_eq!(
        calls[0].args,
        [
            "-g".to_string(),
            "android".to_string(),
            device_arg(dev.path()),
            "262144".to_string(),
        ]
    );
}

#[test]
fn crypt_footer_reduces_block_count() {
    let runner = RecordingRunner::default();
    let props = PropertyMap::new();
    let dispatcher = Dispatcher::new(&runner, &props);
    let dev = image(GIB + 12_345);
    let spec = PartitionSpec::new(dev.path(), "/data", FsType::F2fs);

    assert_eq!(dispatcher.do_format(&spec, true), 0);
    assert_eq!(dispatcher.do_format(&spec, false), 0);

    let calls = runner.calls();
    let with_footer = ((GIB + 12_345 - CRYPT_FOOTER_OFFSET) / 4096).to_string();
    let without_footer = ((GIB + 12_345) / 4096).to_string();
    assert_eq!(calls[0].args.last(), Some(&with_footer));
    assert_eq!(calls[1].args.last(), Some(&without_footer));
}

#[test]
fn f2fs_features_follow_properties_and_flags() {
    let runner = RecordingRunner::default();
    let props = data_props(true, true);
    let dispatcher = Dispatcher::new(&runner, &props);
    let spec = PartitionSpec::new("/dev/block/by-name/userdata", "/data", FsType::F2fs)
        .with_length(GIB)
        .with_flags(FsMgrFlag::FsCompress);

    assert_eq!(dispatcher.do_format(&spec, false), 0);

    let calls = runner.calls();
    let args = &calls[0].args;
    let joined = args.join(" ");
    assert!(joined.contains("-O project_quota,extra_attr -O casefold -C utf8"));
    assert!(joined.contains("-O compression -O extra_attr"));
    assert!(joined.ends_with("/dev/block/by-name/userdata 262144"));
}

#[test]
fn properties_ignored_outside_data() {
    let runner = RecordingRunner::default();
    let props = data_props(true, true);
    let dispatcher = Dispatcher::new(&runner, &props);
    let spec =
        PartitionSpec::new("/dev/block/by-name/cache", "/cache", FsType::F2fs).with_length(GIB);

    dispatcher.format(&spec, false).unwrap();

    let calls = runner.calls();
    let args = &calls[0].args;
    assert!(!args.iter().any(|a| a.contains("project_quota")));
    assert!(!args.iter().any(|a| a == "casefold"));
}

#[test]
fn ext4_projid_without_checksums_then_seeds() {
    let runner = RecordingRunner::default();
    let props = data_props(true, false);
    let dispatcher = Dispatcher::new(&runner, &props);
    let dev = image(GIB);
    let spec = PartitionSpec::new(dev.path(), "/data", FsType::Ext4);

    assert_eq!(dispatcher.do_format(&spec, false), 0);

    let calls = runner.calls();
    assert_eq!(runner.tool_names(), ["mke2fs", "e2fsdroid"]);

    let mke2fs = &calls[0].args;
    assert!(mke2fs.windows(2).any(|w| w[0] == "-I" && w[1] == "512"));
    assert!(!mke2fs.iter().any(|a| a == "metadata_csum"));
    assert_eq!(mke2fs.last().map(String::as_str), Some("262144"));

    assert_eq!(
        calls[1].args,
        [
            "-e".to_string(),
            "-a".to_string(),
            "/data".to_string(),
            device_arg(dev.path()),
        ]
    );
}

#[test]
fn ext4_metadata_checksum_flag_orders_features() {
    let runner = RecordingRunner::default();
    let props = PropertyMap::new();
    let dispatcher = Dispatcher::new(&runner, &props);
    let spec = PartitionSpec::new("/dev/block/by-name/metadata", "/metadata", FsType::Ext4)
        .with_length(16 << 20)
        .with_flags(FsMgrFlag::ExtMetaCsum);

    dispatcher.format(&spec, false).unwrap();

    let calls = runner.calls();
    let args = &calls[0].args;
    let at = |name: &str| args.iter().position(|a| a == name).unwrap();
    assert!(at("metadata_csum") < at("64bit"));
    assert!(at("64bit") < at("extent"));
    assert!(!args.iter().any(|a| a == "-I"));
}

#[test]
fn mke2fs_failure_stops_before_seeding() {
    let runner = RecordingRunner::with_codes(&[8]);
    let props = PropertyMap::new();
    let dispatcher = Dispatcher::new(&runner, &props);
    let spec = PartitionSpec::new("/dev/block/sda5", "/cache", FsType::Ext4).with_length(GIB);

    assert_eq!(dispatcher.do_format(&spec, false), 8);
    assert_eq!(runner.tool_names(), ["mke2fs"]);
}

#[test]
fn seeding_failure_is_reported_after_format() {
    let runner = RecordingRunner::with_codes(&[0, 3]);
    let props = PropertyMap::new();
    let dispatcher = Dispatcher::new(&runner, &props);
    let spec = PartitionSpec::new("/dev/block/sda5", "/cache", FsType::Ext4).with_length(GIB);

    assert_eq!(dispatcher.do_format(&spec, false), 3);
    assert_eq!(runner.tool_names(), ["mke2fs", "e2fsdroid"]);
}

#[test]
fn vfat_runs_without_size_even_if_tool_missing() {
    let runner = RecordingRunner::default();
    let props = PropertyMap::new();
    let tools = tempfile::tempdir().expect("tool dir");
    let dispatcher =
        Dispatcher::new(&runner, &props).with_tools(ToolPaths::in_dir(tools.path()));
    let spec = PartitionSpec::new("/dev/block/mmcblk1p1", "/mnt/sdcard", FsType::Vfat);

    assert_eq!(dispatcher.do_format(&spec, true), 0);

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, tools.path().join("newfs_msdos"));
    assert_eq!(calls[0].args, ["-O", "android", "/dev/block/mmcblk1p1"]);
}

#[test]
fn missing_device_fails_before_any_tool() {
    let runner = RecordingRunner::default();
    let props = PropertyMap::new();
    let dispatcher = Dispatcher::new(&runner, &props);
    let spec = PartitionSpec::new("/nonexistent/userdata", "/data", FsType::F2fs);

    assert_eq!(dispatcher.do_format(&spec, false), -1);
    assert!(runner.calls().is_empty());
}

#[test]
fn resize_skipped_without_superblock() {
    let runner = RecordingRunner::default();
    let props = PropertyMap::new();
    let dispatcher = Dispatcher::new(&runner, &props);
    let dev = image(64 << 20);
    let spec = PartitionSpec::new(dev.path(), "/data", FsType::F2fs).with_length(GIB);

    assert_eq!(dispatcher.do_resize(&spec, false), 0);
    assert!(runner.calls().is_empty());
}

#[test]
fn resize_respects_margin_boundary() {
    let current = 64 << 20;
    let dev = f2fs_image(1 << 20, current / 4096);
    let props = PropertyMap::new();

    let runner = RecordingRunner::default();
    let dispatcher = Dispatcher::new(&runner, &props);
    let at_margin = PartitionSpec::new(dev.path(), "/data", FsType::F2fs)
        .with_length(current + RESIZE_MARGIN_BYTES);
    assert_eq!(dispatcher.do_resize(&at_margin, false), 0);
    assert!(runner.calls().is_empty());

    let target = current + RESIZE_MARGIN_BYTES + 1;
    let past_margin = at_margin.clone().with_length(target);
    assert_eq!(dispatcher.do_resize(&past_margin, false), 0);

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, Path::new("/system/bin/resize.f2fs"));
    assert_eq!(
        calls[0].args,
        ["-t".to_string(), (target / 512).to_string(), device_arg(dev.path())]
    );
}

#[test]
fn resize_accounts_for_footer_before_comparing() {
    let current = 64 << 20;
    let dev = f2fs_image(1 << 20, current / 4096);
    let props = PropertyMap::new();
    let runner = RecordingRunner::default();
    let dispatcher = Dispatcher::new(&runner, &props);

    let spec = PartitionSpec::new(dev.path(), "/data", FsType::F2fs)
        .with_length(current + RESIZE_MARGIN_BYTES + CRYPT_FOOTER_OFFSET);

    assert!(dispatcher.plan_resize(&spec, true).unwrap().is_empty());
    assert_eq!(dispatcher.plan_resize(&spec, false).unwrap().len(), 1);
}

#[test]
fn resize_propagates_tool_exit_code() {
    let dev = f2fs_image(1 << 20, 1024);
    let props = PropertyMap::new();
    let runner = RecordingRunner::with_codes(&[255]);
    let dispatcher = Dispatcher::new(&runner, &props);
    let spec = PartitionSpec::new(dev.path(), "/data", FsType::F2fs).with_length(GIB);

    assert_eq!(dispatcher.do_resize(&spec, false), 255);
}

#[test]
fn resize_rejects_other_filesystems() {
    let runner = RecordingRunner::default();
    let props = PropertyMap::new();
    let dispatcher = Dispatcher::new(&runner, &props);

    for fs_type in [FsType::Ext4, FsType::Vfat] {
        let spec = PartitionSpec::new("/dev/block/sda1", "/data", fs_type).with_length(GIB);
        assert_eq!(dispatcher.do_resize(&spec, false), -libc::EINVAL);
    }
    assert!(runner.calls().is_empty());
}

#[test]
fn plan_matches_what_format_runs() {
    let runner = RecordingRunner::default();
    let props = data_props(false, true);
    let dispatcher = Dispatcher::new(&runner, &props);
    let spec = PartitionSpec::new("/dev/block/sda3", "/data", FsType::Ext4).with_length(GIB);

    let plan = dispatcher.plan_format(&spec, true).unwrap();
    dispatcher.format(&spec, true).unwrap();

    assert_eq!(plan, runner.calls());
}

#[test]
fn process_runner_executes_configured_tool() {
    let tools = tempfile::tempdir().expect("tool dir");
    let script = tools.path().join("make_f2fs");
    fs::write(&script, "#!/bin/sh\necho \"$@\" > \"$0.args\"\n").expect("write tool");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod tool");

    let props = PropertyMap::new();
    let dispatcher =
        Dispatcher::new(&ProcessRunner, &props).with_tools(ToolPaths::in_dir(tools.path()));
    let spec = PartitionSpec::new("/dev/block/by-name/userdata", "/data", FsType::F2fs)
        .with_length(GIB);

    assert_eq!(dispatcher.do_format(&spec, false), 0);

    let recorded = fs::read_to_string(tools.path().join("make_f2fs.args")).expect("args file");
    assert_eq!(recorded.trim(), "-g android /dev/block/by-name/userdata 262144");
}

#[test]
fn process_runner_reports_missing_tool() {
    let tools = tempfile::tempdir().expect("tool dir");
    let props = PropertyMap::new();
    let dispatcher =
        Dispatcher::new(&ProcessRunner, &props).with_tools(ToolPaths::in_dir(tools.path()));
    let spec = PartitionSpec::new("/dev/block/sda5", "/cache", FsType::Ext4).with_length(GIB);

    assert_eq!(dispatcher.do_format(&spec, false), -libc::ENOENT);
}
