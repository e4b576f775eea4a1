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

//! getattr, readlink and the attr-mutating operations.

mod common;

use common::{assert_errno, TestHelper, TestResult};
use fuse_shim::{timespec, Filesystem};
use nix::errno::Errno::{EINVAL, ENOENT};
use std::path::{Path, PathBuf};

#[test]
fn test_root_is_a_directory() -> TestResult {
    let th = TestHelper::new();
    let st = th.getattr("/")?;
    assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFDIR);
    assert_eq!(st.st_uid, th.uid);
    assert_eq!(st.st_gid, th.gid);
    // the root attr row is always the first one
    assert_eq!(st.st_ino, 1);
    Ok(())
}

#[test]
fn test_reserved_file_is_regular() -> TestResult {
    let th = TestHelper::new();
    let st = th.getattr("/.tagdir_entinfo")?;
    assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFREG);
    Ok(())
}

#[test]
fn test_tag_attr() -> TestResult {
    let th = TestHelper::new();
    th.mkdir("/@work")?;
    let st = th.getattr("/@work")?;
    assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFDIR);
    assert_eq!(st.st_uid, th.uid);
    Ok(())
}

#[test]
fn test_chain_attr_requires_all_tags() -> TestResult {
    let th = TestHelper::new();
    th.mkdir("/@work")?;
    th.mkdir("/@urgent")?;
    th.getattr("/@work/@urgent")?;
    assert_errno(th.getattr("/@work/@missing"), ENOENT);
    Ok(())
}

#[test]
fn test_entity_attr() -> TestResult {
    let th = TestHelper::new();
    th.register("report", Path::new("/abs/report.txt"), &["work"]);
    let st = th.getattr("/@work/report")?;
    assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFDIR);
    Ok(())
}

#[test]
fn test_unknown_paths() {
    let th = TestHelper::new();
    assert_errno(th.getattr("/@ghost"), ENOENT);
    assert_errno(th.getattr("/ghost"), ENOENT);
}

#[test]
fn test_getattr_passes_through_inside_entity() -> TestResult {
    let th = TestHelper::new();
    let dir = th.scratch_dir("docs");
    std::fs::write(dir.join("inner.txt"), "hello world")?;
    th.register("docs", &dir, &["docs"]);

    let st = th.getattr("/@docs/docs/inner.txt")?;
    assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFREG);
    assert_eq!(st.st_size, "hello world".len() as i64);

    assert_errno(th.getattr("/@docs/docs/absent.txt"), ENOENT);
    Ok(())
}

#[test]
fn test_readlink_answers_the_real_path() -> TestResult {
    let th = TestHelper::new();
    th.register("report", Path::new("/abs/report.txt"), &["work"]);
    assert_eq!(
        th.readlink("/@work/report")?,
        PathBuf::from("/abs/report.txt")
    );
    Ok(())
}

#[test]
fn test_readlink_on_non_links() -> TestResult {
    let th = TestHelper::new();
    th.mkdir("/@work")?;
    assert_errno(th.readlink("/"), EINVAL);
    assert_errno(th.readlink("/@work"), EINVAL);
    assert_errno(th.readlink("/.tagdir_entinfo"), EINVAL);
    Ok(())
}

#[test]
fn test_chmod_updates_the_stored_attr() -> TestResult {
    let th = TestHelper::new();
    th.mkdir("/@work")?;

    th.fs.chmod(&th.req(), Path::new("/@work"), 0o750)?;

    let st = th.getattr("/@work")?;
    assert_eq!(st.st_mode & 0o7777, 0o750);
    // still a directory
    assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFDIR);
    Ok(())
}

#[test]
fn test_chown_updates_the_stored_attr() -> TestResult {
    let th = TestHelper::new();
    th.mkdir("/@work")?;

    th.fs
        .chown(&th.req(), Path::new("/@work"), th.uid, th.gid)?;

    let st = th.getattr("/@work")?;
    assert_eq!(st.st_uid, th.uid);
    assert_eq!(st.st_gid, th.gid);
    Ok(())
}

#[test]
fn test_utimens_updates_the_stored_attr() -> TestResult {
    let th = TestHelper::new();
    th.mkdir("/@work")?;

    let atime = timespec {
        tv_sec: 1_000_000,
        tv_nsec: 0,
    };
    let mtime = timespec {
        tv_sec: 2_000_000,
        tv_nsec: 0,
    };
    th.fs.utimens(&th.req(), Path::new("/@work"), atime, mtime)?;

    let st = th.getattr("/@work")?;
    assert_eq!(st.st_atim.tv_sec, 1_000_000);
    assert_eq!(st.st_mtim.tv_sec, 2_000_000);
    Ok(())
}

#[test]
fn test_attr_ops_on_unknown_nodes() {
    let th = TestHelper::new();
    assert_errno(th.fs.chmod(&th.req(), Path::new("/@ghost"), 0o755), ENOENT);
    assert_errno(
        th.fs.chown(&th.req(), Path::new("/ghost"), th.uid, th.gid),
        ENOENT,
    );
}
