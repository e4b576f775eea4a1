/*
 * Tagdir
 * Copyright (C) 2021 The Tagdir authors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Data-carrying operations are the host filesystem's, reached through the
//! entity's real path.

mod common;

use common::{assert_errno, TestHelper, TestResult};
use fuse_shim::Filesystem;
use nix::errno::Errno::{ENOENT, EPERM};
use std::io::Read;
use std::os::unix::io::FromRawFd;
use std::path::Path;

fn open_fd(th: &TestHelper, path: &str, flags: i32) -> fuse_shim::FuseResult<i32> {
    let mut fi: fuse_shim::fuse_file_info = unsafe { std::mem::zeroed() };
    fi.flags = flags;
    th.fs.open(&th.req(), Path::new(path), &fi)
}

#[test]
fn test_open_and_read() -> TestResult {
    let th = TestHelper::new();
    let dir = th.scratch_dir("docs");
    std::fs::write(dir.join("inner.txt"), "through the looking glass")?;
    th.register("docs", &dir, &["docs"]);

    let fd = open_fd(&th, "/@docs/docs/inner.txt", libc::O_RDONLY)?;
    let mut file = unsafe { std::fs::File::from_raw_fd(fd) };
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    assert_eq!(content, "through the looking glass");
    Ok(())
}

#[test]
fn test_open_missing_file() -> TestResult {
    let th = TestHelper::new();
    let dir = th.scratch_dir("docs");
    th.register("docs", &dir, &["docs"]);

    assert_errno(open_fd(&th, "/@docs/docs/ghost.txt", libc::O_RDONLY), ENOENT);
    Ok(())
}

#[test]
fn test_create_makes_the_real_file() -> TestResult {
    let th = TestHelper::new();
    let dir = th.scratch_dir("docs");
    th.register("docs", &dir, &["docs"]);

    let fd = th
        .fs
        .create(&th.req(), Path::new("/@docs/docs/new.txt"), 0o644)?;
    drop(unsafe { std::fs::File::from_raw_fd(fd) });

    assert!(dir.join("new.txt").exists());
    Ok(())
}

#[test]
fn test_mkdir_and_rmdir_inside_entity() -> TestResult {
    let th = TestHelper::new();
    let dir = th.scratch_dir("docs");
    th.register("docs", &dir, &["docs"]);

    th.mkdir("/@docs/docs/sub")?;
    assert!(dir.join("sub").is_dir());

    th.rmdir("/@docs/docs/sub")?;
    assert!(!dir.join("sub").exists());
    Ok(())
}

#[test]
fn test_unlink_inside_entity() -> TestResult {
    let th = TestHelper::new();
    let dir = th.scratch_dir("docs");
    std::fs::write(dir.join("junk.txt"), "x")?;
    th.register("docs", &dir, &["docs"]);

    th.fs
        .unlink(&th.req(), Path::new("/@docs/docs/junk.txt"))?;
    assert!(!dir.join("junk.txt").exists());
    Ok(())
}

#[test]
fn test_unlink_of_the_entity_node_is_forbidden() -> TestResult {
    let th = TestHelper::new();
    let dir = th.scratch_dir("docs");
    th.register("docs", &dir, &["docs"]);

    assert_errno(th.fs.unlink(&th.req(), Path::new("/@docs/docs")), EPERM);
    Ok(())
}

#[test]
fn test_rename_within_entities() -> TestResult {
    let th = TestHelper::new();
    let dir = th.scratch_dir("docs");
    std::fs::write(dir.join("old.txt"), "contents")?;
    th.register("docs", &dir, &["docs"]);

    th.fs.rename(
        &th.req(),
        Path::new("/@docs/docs/old.txt"),
        Path::new("/@docs/docs/new.txt"),
    )?;

    assert!(!dir.join("old.txt").exists());
    assert_eq!(std::fs::read_to_string(dir.join("new.txt"))?, "contents");
    Ok(())
}

#[test]
fn test_rename_across_the_synthetic_boundary() -> TestResult {
    let th = TestHelper::new();
    let dir = th.scratch_dir("docs");
    std::fs::write(dir.join("file.txt"), "x")?;
    th.mkdir("/@home")?;
    th.register("docs", &dir, &["docs"]);

    // moving a tag, an entity node, or out of the tree entirely
    assert_errno(
        th.fs
            .rename(&th.req(), Path::new("/@docs"), Path::new("/@play")),
        EPERM,
    );
    assert_errno(
        th.fs.rename(
            &th.req(),
            Path::new("/@docs/docs"),
            Path::new("/@home/docs"),
        ),
        EPERM,
    );
    assert_errno(
        th.fs.rename(
            &th.req(),
            Path::new("/@docs/docs/file.txt"),
            Path::new("/@home"),
        ),
        EPERM,
    );
    Ok(())
}

#[test]
fn test_truncate_inside_entity() -> TestResult {
    let th = TestHelper::new();
    let dir = th.scratch_dir("docs");
    std::fs::write(dir.join("file.txt"), "0123456789")?;
    th.register("docs", &dir, &["docs"]);

    th.fs
        .truncate(&th.req(), Path::new("/@docs/docs/file.txt"), 4)?;
    assert_eq!(std::fs::read_to_string(dir.join("file.txt"))?, "0123");
    Ok(())
}

#[test]
fn test_statfs() -> TestResult {
    let th = TestHelper::new();
    let dir = th.scratch_dir("docs");
    th.register("docs", &dir, &["docs"]);

    // synthetic nodes report the make-believe volume
    let root_vfs = th.fs.statfs(&th.req(), Path::new("/"))?;
    assert_eq!(root_vfs.f_bsize, 4096);

    // entity paths report the host filesystem
    let host_vfs = th.fs.statfs(&th.req(), Path::new("/@docs/docs"))?;
    assert!(host_vfs.f_blocks > 0);
    Ok(())
}
