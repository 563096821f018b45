//! Stub engine executables for process tests.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use mufi_bridge::ExecutableLocator;
use tempfile::TempDir;

/// Write an executable shell script named `name` into `dir`.
pub fn stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Locator that only ever finds `explicit`, never anything installed.
pub fn locator(temp: &TempDir, explicit: &Path) -> ExecutableLocator {
    isolated(temp).with_explicit(explicit)
}

/// Locator with every search location pointing into an empty temp dir.
pub fn isolated(temp: &TempDir) -> ExecutableLocator {
    let empty = temp.path().join("empty");
    fs::create_dir_all(&empty).unwrap();
    ExecutableLocator::new("mufiz-stub")
        .with_search_path(Some(empty.clone().into_os_string()))
        .with_common_dirs(vec![empty.clone()])
        .with_dev_paths(vec![empty.join("mufiz-stub")])
}
