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

//! Shared scaffolding: a throwaway store plus a live handler set, driven the
//! way the kernel would drive it, without an actual mount.

#![allow(dead_code)]

use fuse_shim::{Filesystem, FuseResult, Request};
use nix::errno::Errno;
use std::path::{Path, PathBuf};
use tagdir::fuse::TagdirFilesystem;
use tagdir::sql;
use tagdir::sql::tpool::ThreadConnPool;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub struct TestHelper {
    tmp: tempfile::TempDir,
    pub fs: TagdirFilesystem,
    pub uid: u32,
    pub gid: u32,
    pub db_path: PathBuf,
}

impl TestHelper {
    pub fn new() -> Self {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tagdir-");
        let tmp = builder.tempdir().unwrap();

        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };

        let db_path = tmp.path().join("test.db");
        let mut conn = rusqlite::Connection::open(&db_path).unwrap();
        sql::migrations::migrate(&mut conn, "0.1.0", uid, gid).unwrap();
        drop(conn);

        let fs = TagdirFilesystem::new(ThreadConnPool::new(db_path.clone()), None);

        Self {
            tmp,
            fs,
            uid,
            gid,
            db_path,
        }
    }

    pub fn req(&self) -> Request {
        Request {
            uid: self.uid,
            gid: self.gid,
            pid: 1,
            umask: 0o022,
        }
    }

    /// A scratch directory on the real filesystem to point entities at.
    pub fn scratch_dir(&self, name: &str) -> PathBuf {
        let dir = self.tmp.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn scratch_file(&self, name: &str, content: &str) -> PathBuf {
        let file = self.tmp.path().join(name);
        std::fs::write(&file, content).unwrap();
        file
    }

    pub fn mkdir(&self, path: &str) -> FuseResult<()> {
        self.fs.mkdir(&self.req(), Path::new(path), 0o755)
    }

    pub fn rmdir(&self, path: &str) -> FuseResult<()> {
        self.fs.rmdir(&self.req(), Path::new(path))
    }

    pub fn access(&self, path: &str) -> FuseResult<()> {
        self.fs.access(&self.req(), Path::new(path), 0)
    }

    pub fn getattr(&self, path: &str) -> FuseResult<fuse_shim::stat> {
        self.fs.getattr(&self.req(), Path::new(path))
    }

    pub fn readlink(&self, path: &str) -> FuseResult<PathBuf> {
        self.fs.readlink(&self.req(), Path::new(path))
    }

    /// The handler's own entries, sorted.  `.` and `..` ride on
    /// `readdir_common` and aren't part of this.
    pub fn readdir_names(&self, path: &str) -> FuseResult<Vec<String>> {
        let entries = self.fs.readdir(&self.req(), Path::new(path))?;
        let mut names: Vec<String> = entries.map(|entry| entry.name).collect();
        names.sort();
        Ok(names)
    }

    /// The full listing as the kernel assembles it: common entries first.
    pub fn readdir_full(&self, path: &str) -> FuseResult<Vec<String>> {
        let common = self.fs.readdir_common(&self.req(), Path::new(path))?;
        let entries = self.fs.readdir(&self.req(), Path::new(path))?;
        let mut names: Vec<String> = common.chain(entries).map(|entry| entry.name).collect();
        names.sort();
        Ok(names)
    }

    pub fn setx(&self, path: &str, name: &str, value: &[u8]) -> FuseResult<()> {
        self.fs
            .setxattr(&self.req(), Path::new(path), name, value, 0)
    }

    pub fn getx(&self, path: &str, name: &str) -> FuseResult<Vec<u8>> {
        self.fs.getxattr(&self.req(), Path::new(path), name)
    }

    pub fn listx(&self, path: &str) -> FuseResult<Vec<String>> {
        self.fs.listxattr(&self.req(), Path::new(path))
    }

    pub fn removex(&self, path: &str, name: &str) -> FuseResult<()> {
        self.fs.removexattr(&self.req(), Path::new(path), name)
    }

    /// Registers `name -> real` with `tags` through the side channel.
    pub fn register(&self, name: &str, real: &Path, tags: &[&str]) {
        let mut value = real.to_string_lossy().to_string();
        for tag in tags {
            value.push(',');
            value.push_str(tag);
        }
        self.setx("/.tagdir_entinfo", name, value.as_bytes())
            .unwrap();
    }

    /// The side-channel value for `name`, decoded as `(path, sorted tags)`.
    pub fn registration(&self, name: &str) -> FuseResult<(String, Vec<String>)> {
        let raw = self.getx("/.tagdir_entinfo", name)?;
        let text = String::from_utf8(raw).unwrap();
        let mut parts = text.split(',');
        let path = parts.next().unwrap().to_string();
        let mut tags: Vec<String> = parts.map(str::to_string).collect();
        tags.sort();
        Ok((path, tags))
    }
}

pub fn assert_errno<T: std::fmt::Debug>(res: FuseResult<T>, expected: Errno) {
    match res {
        Ok(val) => panic!("Expected {}, got success: {:?}", expected, val),
        Err(e) => assert_eq!(e.errno, expected, "expected {}, got {}", expected, e.errno),
    }
}
