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

use libc::{c_char, c_int, c_void};
use nix::errno::Errno::ENOSYS;
use parking_lot::Mutex;
use std::ffi::{CStr, CString, OsStr};
use std::mem::size_of;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{FromRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use log::{debug, error, info, trace, warn};

pub use bindings::*;

use crate::bindings::conf::FuseConfig;
use crate::bindings::fuse_get_context;
use crate::conf::MountConfig;
use crate::err::FuseErrno;
use std::fmt::{Debug, Error, Formatter};

mod bindings;
pub mod err;

type FuseOperations = fuse_operations;

pub type FuseResult<T> = Result<T, err::FuseErrno>;

const FUSEOP_TAG: &str = "fuse_op";
const FUSE_TAG: &str = "fuse";
const FS_TAG: &str = "fuse_fs";

/// The calling context of a single kernel request.
#[derive(Ord, PartialOrd, Eq, PartialEq, Hash, Clone, Debug)]
pub struct Request {
    pub uid: uid_t,
    pub gid: gid_t,
    pub pid: pid_t,
    pub umask: mode_t,
}

pub fn new_statvfs() -> statvfs {
    statvfs {
        // Filesystem block size
        f_bsize: 0,
        // Fragment size
        f_frsize: 0,
        // Size of fs in f_frsize units
        f_blocks: 0,
        // Number of free blocks
        f_bfree: 0,
        // Number of free blocks for unprivileged users
        f_bavail: 0,
        // Number of inodes
        f_files: 0,
        // Number of free inodes
        f_ffree: 0,
        // Number of free inodes for unprivileged users
        f_favail: 0,
        // Filesystem ID
        f_fsid: 0,
        // Mount flags
        f_flag: 0,
        // Maximum filename length
        f_namemax: 0,
        __f_spare: [0; 6usize],
    }
}

/// `FuseHandle` wraps the C handles we get back from fuse for controlling the
/// connection.  The fields are atomics because we're sharing them with
/// `MountHandle`, which needs them in `drop()` to tear down the connection.
pub struct FuseHandle {
    disabled: AtomicBool,
    handle_struct: AtomicPtr<fuse>,
    channel_struct: AtomicPtr<fuse_chan>,
}

impl FuseHandle {
    fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }
}

/// A `Filesystem` answers kernel requests by path.  Only the operations the
/// mounted filesystem actually dispatches are present; everything else is
/// left unwired and libfuse reports ENOSYS for it.
pub trait Filesystem {
    // none of the methods take &mut self: libfuse may process requests from
    // multiple threads, so implementors mutate through interior mutability

    fn init_request_id(&self);

    fn access(&self, req: &Request, path: &Path, mask: c_int) -> FuseResult<()>;
    fn getattr(&self, req: &Request, path: &Path) -> FuseResult<stat>;
    fn readdir(
        &self,
        req: &Request,
        path: &Path,
    ) -> FuseResult<Box<dyn Iterator<Item = FileEntry>>>;

    /// The entries every directory carries, emitted ahead of `readdir`'s.
    fn readdir_common(
        &self,
        _req: &Request,
        _path: &Path,
    ) -> FuseResult<Box<dyn Iterator<Item = FileEntry>>> {
        debug!(
            target: FS_TAG,
            "Calling default readdir_common implementation"
        );
        let mut common = vec![];
        common.push(FileEntry {
            name: ".".into(),
            mtime: chrono::Utc::now(),
        });
        common.push(FileEntry {
            name: "..".into(),
            mtime: chrono::Utc::now(),
        });
        Ok(Box::new(common.into_iter()))
    }

    fn readlink(&self, req: &Request, path: &Path) -> FuseResult<PathBuf>;
    fn mkdir(&self, req: &Request, path: &Path, mode: mode_t) -> FuseResult<()>;
    fn rmdir(&self, req: &Request, path: &Path) -> FuseResult<()>;
    fn unlink(&self, req: &Request, path: &Path) -> FuseResult<()>;
    fn rename(&self, req: &Request, src: &Path, dst: &Path) -> FuseResult<()>;
    fn chmod(&self, req: &Request, path: &Path, mode: mode_t) -> FuseResult<()>;
    fn chown(&self, req: &Request, path: &Path, uid: uid_t, gid: gid_t) -> FuseResult<()>;
    fn utimens(
        &self,
        req: &Request,
        path: &Path,
        atime: timespec,
        mtime: timespec,
    ) -> FuseResult<()>;
    fn truncate(&self, req: &Request, path: &Path, offset: off_t) -> FuseResult<()>;
    fn create(&self, req: &Request, path: &Path, mode: mode_t) -> FuseResult<RawFd>;
    fn open(&self, req: &Request, path: &Path, fi: *const fuse_file_info) -> FuseResult<RawFd>;
    fn statfs(&self, req: &Request, path: &Path) -> FuseResult<statvfs>;

    fn read(
        &self,
        _req: &Request,
        _path: &Path,
        buf: &mut [u8],
        offset: off_t,
        fi: *const fuse_file_info,
    ) -> FuseResult<usize> {
        unsafe {
            info!(
                target: FS_TAG,
                "Calling default read implementation on {} for {} bytes",
                (*fi).fh,
                buf.len()
            );

            let read = libc::pread(
                (*fi).fh as i32,
                buf.as_mut_ptr() as *mut ::std::os::raw::c_void,
                buf.len(),
                offset,
            );

            if read == -1 {
                Err(std::io::Error::last_os_error().into())
            } else {
                Ok(read as usize)
            }
        }
    }

    fn write(
        &self,
        _req: &Request,
        _path: &Path,
        data: &[u8],
        offset: off_t,
        fi: *const fuse_file_info,
    ) -> FuseResult<usize> {
        unsafe {
            info!(
                target: FS_TAG,
                "Calling default write implementation on {}",
                (*fi).fh
            );

            let written = libc::pwrite(
                (*fi).fh as i32,
                data.as_ptr() as *const ::std::os::raw::c_void,
                data.len(),
                offset,
            );

            if written == -1 {
                Err(std::io::Error::last_os_error().into())
            } else {
                Ok(written as usize)
            }
        }
    }

    fn flush(&self, _req: &Request, _path: &Path, fi: *const fuse_file_info) -> FuseResult<()> {
        unsafe {
            info!(
                target: FS_TAG,
                "Calling default (empty) flush implementation on {}",
                (*fi).fh
            );
        }
        Ok(())
    }

    fn fsync(
        &self,
        _req: &Request,
        _path: &Path,
        datasync: i32,
        fi: *const fuse_file_info,
    ) -> FuseResult<()> {
        unsafe {
            info!(
                target: FS_TAG,
                "Calling default fsync implementation on {}",
                (*fi).fh
            );

            let err = if datasync > 0 {
                libc::fdatasync((*fi).fh as i32)
            } else {
                libc::fsync((*fi).fh as i32)
            };

            if err == -1 {
                Err(std::io::Error::last_os_error().into())
            } else {
                Ok(())
            }
        }
    }

    fn release(&self, _req: &Request, _path: &Path, fi: *const fuse_file_info) -> FuseResult<()> {
        unsafe {
            info!(
                target: FS_TAG,
                "Calling default release implementation on {}",
                (*fi).fh
            );

            // collect our fd into a File object, so that it is dropped and
            // closed when it goes out of scope
            let mut _fh = std::fs::File::from_raw_fd((*fi).fh as RawFd);
        }
        Ok(())
    }

    fn setxattr(
        &self,
        _req: &Request,
        _path: &Path,
        _name: &str,
        _value: &[u8],
        _flags: i32,
    ) -> FuseResult<()> {
        Err(ENOSYS.into())
    }

    fn getxattr(&self, _req: &Request, _path: &Path, _name: &str) -> FuseResult<Vec<u8>> {
        Err(ENOSYS.into())
    }

    fn listxattr(&self, _req: &Request, _path: &Path) -> FuseResult<Vec<String>> {
        Err(ENOSYS.into())
    }

    fn removexattr(&self, _req: &Request, _path: &Path, _name: &str) -> FuseResult<()> {
        Err(ENOSYS.into())
    }
}

#[derive(Debug)]
pub struct FileEntry {
    pub name: String,
    pub mtime: chrono::DateTime<chrono::Utc>,
}

fn to_pathname(ptr: *const c_char) -> PathBuf {
    let slice = unsafe { CStr::from_ptr(ptr) };
    let osstr = OsStr::from_bytes(slice.to_bytes());
    let path: &Path = osstr.as_ref();
    path.to_owned()
}

/// Get the Filesystem trait object that we passed into mount
fn ops_from_ctx() -> (Request, &'static dyn Filesystem) {
    unsafe {
        let ctx = fuse_get_context();

        // umasks occasionally arrive as 0 from processes where they shouldn't be
        let umask = match (*ctx).umask {
            0 => 0o022,
            _ => (*ctx).umask,
        };

        let req = Request {
            uid: (*ctx).uid,
            gid: (*ctx).gid,
            pid: (*ctx).pid,
            umask,
        };
        trace!(target: FUSEOP_TAG, "{:?}", req);

        // (*ctx).private_data is a Box(&dyn Filesystem), see mount()
        let boxed = (*ctx).private_data as *const &dyn Filesystem;
        let fs_trait_ref = *boxed;
        fs_trait_ref.init_request_id();
        (req, fs_trait_ref)
    }
}

extern "C" fn readdir(
    arg1: *const ::std::os::raw::c_char,
    arg2: *mut ::std::os::raw::c_void,
    arg3: fuse_fill_dir_t,
    offset: off_t,
    _arg5: *mut fuse_file_info,
) -> ::std::os::raw::c_int {
    let name = to_pathname(arg1);

    let filler = arg3.unwrap();
    let (req, ops) = ops_from_ctx();

    info!(target: FUSEOP_TAG, "readdir {:?}", name);

    if offset == 0 {
        match ops.readdir_common(&req, &name) {
            Ok(entry_iter) => {
                for entry in entry_iter {
                    let entry_name = CString::new(entry.name).unwrap();
                    let done = unsafe { filler(arg2, entry_name.as_ptr(), ptr::null(), 0) };

                    // the fill buffer won't overflow on the handful of common
                    // entries, but handle it anyways
                    if done > 0 {
                        return 0;
                    }
                }
            }
            Err(num) => {
                error!(target: FUSEOP_TAG, "Error getting readdir_common {}", num);
                return num.into();
            }
        }
    }

    match ops.readdir(&req, &name) {
        Ok(entry_iter) => {
            for entry in entry_iter {
                let entry_name = CString::new(entry.name).unwrap();
                let done = unsafe { filler(arg2, entry_name.as_ptr(), ptr::null(), 0) };
                if done > 0 {
                    break;
                }
            }
            0
        }
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "readdir error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn opendir(
    arg1: *const ::std::os::raw::c_char,
    _arg2: *mut fuse_file_info,
) -> ::std::os::raw::c_int {
    let name = to_pathname(arg1);
    info!(target: FUSEOP_TAG, "opendir {:?}", name);
    0
}

extern "C" fn releasedir(
    arg1: *const ::std::os::raw::c_char,
    _arg2: *mut fuse_file_info,
) -> ::std::os::raw::c_int {
    let name = to_pathname(arg1);
    info!(target: FUSEOP_TAG, "releasedir {:?}", name);
    0
}

extern "C" fn readlink(
    arg1: *const ::std::os::raw::c_char,
    arg2: *mut ::std::os::raw::c_char,
    _arg3: usize,
) -> ::std::os::raw::c_int {
    let name = to_pathname(arg1);
    let (req, ops) = ops_from_ctx();
    info!(target: FUSEOP_TAG, "readlink {:?}", name);

    match ops.readlink(&req, &name) {
        Ok(link_path) => {
            // FIXME can fail if path has an interior null byte
            let link_str = CString::new(link_path.as_os_str().as_bytes()).unwrap();
            unsafe {
                ptr::copy(link_str.as_ptr(), arg2, link_str.as_bytes_with_nul().len());
            };
            0
        }
        Err(num) => {
            error!(target: FUSEOP_TAG, "readlink error {}", num);
            num.into()
        }
    }
}

extern "C" fn flush(
    arg1: *const ::std::os::raw::c_char,
    arg2: *mut fuse_file_info,
) -> ::std::os::raw::c_int {
    let name = to_pathname(arg1);
    let (req, ops) = ops_from_ctx();
    info!(target: FUSEOP_TAG, "flush {:?}", name);

    match ops.flush(&req, &name, arg2) {
        Ok(_) => 0,
        Err(num) => {
            error!(target: FUSEOP_TAG, "flush error {}", num,);
            num.into()
        }
    }
}

extern "C" fn getattr(
    arg1: *const ::std::os::raw::c_char,
    arg2: *mut stat,
) -> ::std::os::raw::c_int {
    let name = to_pathname(arg1);
    let (req, ops) = ops_from_ctx();
    info!(target: FUSEOP_TAG, "getattr {:?}", name);

    let maybe_file_stat = ops.getattr(&req, &name);
    match maybe_file_stat {
        Ok(file_stat) => {
            debug!(target: FUSEOP_TAG, "stat for {:?} is {:?}", name, file_stat);
            unsafe {
                let attr = &mut *arg2;
                *attr = file_stat;
            }
            0
        }
        Err(num) => {
            if num.errno == nix::errno::Errno::ENOENT {
                warn!(target: FUSEOP_TAG, "getattr ENOENT for {:?}", name);
            } else {
                error!(target: FUSEOP_TAG, "getattr error {:?} for {:?}", num, name);
            }
            num.into()
        }
    }
}

extern "C" fn access(
    arg1: *const ::std::os::raw::c_char,
    arg2: ::std::os::raw::c_int,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(target: FUSEOP_TAG, "access {:?} mask {}", name, arg2);

    match ops.access(&req, &name, arg2) {
        Ok(_) => 0,
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "access error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn rmdir(arg1: *const ::std::os::raw::c_char) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(target: FUSEOP_TAG, "rmdir {:?}", name);

    match ops.rmdir(&req, &name) {
        Ok(_) => 0,
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "rmdir error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn unlink(arg1: *const ::std::os::raw::c_char) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(target: FUSEOP_TAG, "unlink {:?}", name);

    match ops.unlink(&req, &name) {
        Ok(_) => 0,
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "unlink error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn mkdir(arg1: *const ::std::os::raw::c_char, arg2: mode_t) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(target: FUSEOP_TAG, "mkdir {:?}", name);

    match ops.mkdir(&req, &name, arg2) {
        Ok(_) => 0,
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "mkdir error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn rename(
    arg1: *const ::std::os::raw::c_char,
    arg2: *const ::std::os::raw::c_char,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let src = to_pathname(arg1);
    let dst = to_pathname(arg2);
    info!(target: FUSEOP_TAG, "rename {:?} to {:?}", src, dst);

    match ops.rename(&req, &src, &dst) {
        Ok(_) => 0,
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "rename error {} for {}",
                num,
                src.display()
            );
            num.into()
        }
    }
}

extern "C" fn write(
    arg1: *const ::std::os::raw::c_char,
    arg2: *const ::std::os::raw::c_char,
    arg3: usize,
    arg4: off_t,
    arg5: *mut fuse_file_info,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(
        target: FUSEOP_TAG,
        "write {} bytes to {:?} at offset {}", arg3, name, arg4
    );

    let data = unsafe {
        let tmp_slice = std::slice::from_raw_parts(arg2, arg3);
        &*(tmp_slice as *const _ as *const [u8])
    };
    match ops.write(&req, &name, data, arg4, arg5) {
        Ok(written) => {
            debug!(target: FUSEOP_TAG, "wrote {} bytes", written);
            written as i32
        }
        Err(num) => {
            error!(target: FUSEOP_TAG, "write error {}", num,);
            num.into()
        }
    }
}

extern "C" fn fsync(
    arg1: *const ::std::os::raw::c_char,
    arg2: ::std::os::raw::c_int,
    arg3: *mut fuse_file_info,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(target: FUSEOP_TAG, "fsync {:?}", name);

    match ops.fsync(&req, &name, arg2, arg3) {
        Ok(_) => 0,
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "fsync error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn truncate(arg1: *const ::std::os::raw::c_char, arg2: off_t) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(target: FUSEOP_TAG, "truncate {:?}", name);

    match ops.truncate(&req, &name, arg2) {
        Ok(_) => 0,
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "truncate error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn release(
    arg1: *const ::std::os::raw::c_char,
    arg2: *mut fuse_file_info,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(target: FUSEOP_TAG, "release {:?}", name);

    match ops.release(&req, &name, arg2) {
        Ok(_) => 0,
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "release error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn open(
    arg1: *const ::std::os::raw::c_char,
    arg2: *mut fuse_file_info,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(target: FUSEOP_TAG, "open {:?}", name);

    match ops.open(&req, &name, arg2) {
        Ok(fd) => {
            unsafe {
                (*arg2).fh = fd as u64;
                debug!(target: FUSEOP_TAG, "open made fd {}", fd);
            }
            0
        }
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "open error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn create(
    arg1: *const ::std::os::raw::c_char,
    mode: mode_t,
    arg3: *mut fuse_file_info,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(target: FUSEOP_TAG, "create {:?} with mode {}", name, mode);

    match ops.create(&req, &name, mode) {
        Ok(fd) => {
            unsafe {
                (*arg3).fh = fd as u64;
                debug!(target: FUSEOP_TAG, "create made fd {}", (*arg3).fh);
            }
            0
        }
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "create error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn read(
    arg1: *const ::std::os::raw::c_char,
    arg2: *mut ::std::os::raw::c_char,
    arg3: usize,
    arg4: off_t,
    arg5: *mut fuse_file_info,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(
        target: FUSEOP_TAG,
        "read desired {} bytes at offset {} for {:?} ", arg3, arg4, name
    );

    let buf = unsafe {
        let tmp_slice = std::slice::from_raw_parts(arg2, arg3);
        &mut *(tmp_slice as *const _ as *mut [u8])
    };

    match ops.read(&req, &name, buf, arg4, arg5) {
        Ok(read) => {
            debug!(target: FUSEOP_TAG, "read {} bytes", read);
            read as i32
        }
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "read error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn statfs(
    arg1: *const ::std::os::raw::c_char,
    arg2: *mut statvfs,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(target: FUSEOP_TAG, "statfs {:?}", name);

    match ops.statfs(&req, &name) {
        Ok(data) => unsafe {
            *arg2 = data;
            0
        },
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "statfs error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn chmod(arg1: *const ::std::os::raw::c_char, mode: mode_t) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(target: FUSEOP_TAG, "chmod {:?} with mode {}", name, mode);

    match ops.chmod(&req, &name, mode) {
        Ok(_) => 0,
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "chmod error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn chown(
    arg1: *const ::std::os::raw::c_char,
    uid: uid_t,
    gid: gid_t,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(
        target: FUSEOP_TAG,
        "chown {:?} with uid:gid {}:{}", name, uid, gid
    );

    match ops.chown(&req, &name, uid, gid) {
        Ok(_) => 0,
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "chown error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn utimens(
    arg1: *const ::std::os::raw::c_char,
    tv: *const timespec,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let name = to_pathname(arg1);
    info!(target: FUSEOP_TAG, "utimens {:?}", name);

    // tv is a two-element array: access time, then modification time
    if tv.is_null() {
        return FuseErrno::from(nix::errno::Errno::EINVAL).into();
    }
    let (atime, mtime) = unsafe { (*tv, *tv.offset(1)) };

    match ops.utimens(&req, &name, atime, mtime) {
        Ok(_) => 0,
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "utimens error {} for {}",
                num,
                name.display()
            );
            num.into()
        }
    }
}

extern "C" fn ftruncate(
    arg1: *const ::std::os::raw::c_char,
    arg2: off_t,
    _arg3: *mut fuse_file_info,
) -> ::std::os::raw::c_int {
    info!(target: FUSEOP_TAG, "ftruncate, delegating to truncate");
    truncate(arg1, arg2)
}

extern "C" fn setxattr(
    arg1: *const ::std::os::raw::c_char,
    arg2: *const ::std::os::raw::c_char,
    arg3: *const ::std::os::raw::c_char,
    arg4: usize,
    arg5: ::std::os::raw::c_int,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let path = to_pathname(arg1);

    let name = unsafe { CStr::from_ptr(arg2).to_string_lossy().into_owned() };
    let value =
        unsafe { std::slice::from_raw_parts(arg3 as *const ::std::os::raw::c_uchar, arg4) };

    info!(
        target: FUSEOP_TAG,
        "setxattr for {}, name {}, value {:?}, flags {}",
        path.display(),
        name,
        value,
        arg5,
    );

    match ops.setxattr(&req, &path, &name, value, arg5) {
        Ok(_) => 0,
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "setxattr error {} for {}",
                num,
                path.display()
            );
            num.into()
        }
    }
}

extern "C" fn listxattr(
    arg1: *const ::std::os::raw::c_char,
    buf: *mut ::std::os::raw::c_char,
    bufsize: usize,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let path = to_pathname(arg1);

    info!(
        target: FUSEOP_TAG,
        "listxattr {}, bufsize {}",
        path.display(),
        bufsize
    );

    let size_only = buf.is_null() || bufsize == 0;

    if size_only {
        debug!(
            target: FUSEOP_TAG,
            "Caller is interested in the size of the xattrs"
        );
    }

    match ops.listxattr(&req, &path) {
        Ok(names) => {
            let mut size = 0;
            unsafe {
                let mut offset = 0;
                for name in names {
                    let c_name = CString::new(name).unwrap().into_bytes_with_nul();
                    size += c_name.len();

                    if !size_only {
                        ptr::copy_nonoverlapping(
                            c_name.as_ptr() as *const i8,
                            buf.offset(offset),
                            c_name.len(),
                        );
                        trace!(
                            target: FUSEOP_TAG,
                            "Copying {:?} to offset {} with len {}",
                            c_name,
                            offset,
                            c_name.len()
                        );
                        offset += c_name.len() as isize;
                    }
                }
            }

            size as i32
        }
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "listxattr error {} for {}",
                num,
                path.display()
            );
            num.into()
        }
    }
}

extern "C" fn removexattr(
    arg1: *const ::std::os::raw::c_char,
    arg2: *const ::std::os::raw::c_char,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let path = to_pathname(arg1);
    let name = unsafe { CStr::from_ptr(arg2).to_string_lossy().into_owned() };

    info!(
        target: FUSEOP_TAG,
        "removexattr {} name {}",
        path.display(),
        name
    );
    match ops.removexattr(&req, &path, &name) {
        Ok(_) => 0,
        Err(num) => {
            error!(
                target: FUSEOP_TAG,
                "removexattr error {} for {}",
                num,
                path.display()
            );
            num.into()
        }
    }
}

extern "C" fn getxattr(
    arg1: *const ::std::os::raw::c_char,
    arg2: *const ::std::os::raw::c_char,
    arg3: *mut ::std::os::raw::c_char,
    bufsize: usize,
) -> ::std::os::raw::c_int {
    let (req, ops) = ops_from_ctx();
    let path = to_pathname(arg1);

    let name = unsafe { CStr::from_ptr(arg2) }
        .to_string_lossy()
        .into_owned();

    info!(target: FUSEOP_TAG, "getxattr for {:?}, name {}", path, name,);

    match ops.getxattr(&req, &path, &name) {
        Ok(value) => unsafe {
            // a zero size means the caller is asking how large a buffer to
            // call us again with
            if bufsize == 0 {
                value.len() as i32
            } else {
                let copied = std::cmp::min(value.len(), bufsize);
                ptr::copy(value.as_ptr(), arg3 as *mut u8, copied);
                copied as i32
            }
        },
        Err(num) => {
            error!(target: FUSEOP_TAG, "getxattr error {} for {:?}", num, path);
            num.into()
        }
    }
}

extern "C" fn fgetattr(
    arg1: *const ::std::os::raw::c_char,
    arg2: *mut stat,
    _arg3: *mut fuse_file_info,
) -> ::std::os::raw::c_int {
    let name = to_pathname(arg1);
    info!(
        target: FUSEOP_TAG,
        "fgetattr for {}, delegating to getattr",
        name.display()
    );

    getattr(arg1, arg2)
}

impl FuseOperations {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for FuseOperations {
    fn default() -> Self {
        Self {
            access: Some(access),
            bmap: None,
            chmod: Some(chmod),
            chown: Some(chown),
            create: Some(create),
            destroy: None,
            fallocate: None,
            fgetattr: Some(fgetattr),
            flock: None,
            flush: Some(flush),
            fsync: Some(fsync),
            fsyncdir: None,
            ftruncate: Some(ftruncate),
            getattr: Some(getattr),
            getdir: None,
            getxattr: Some(getxattr),
            init: None,
            ioctl: None,
            link: None,
            listxattr: Some(listxattr),
            lock: None,
            mkdir: Some(mkdir),
            mknod: None,
            open: Some(open),
            opendir: Some(opendir),
            poll: None,
            read: Some(read),
            read_buf: None,
            readdir: Some(readdir),
            readlink: Some(readlink),
            release: Some(release),
            releasedir: Some(releasedir),
            removexattr: Some(removexattr),
            rename: Some(rename),
            rmdir: Some(rmdir),
            setxattr: Some(setxattr),
            statfs: Some(statfs),
            symlink: None,
            truncate: Some(truncate),
            unlink: Some(unlink),
            utime: None,
            utimens: Some(utimens),
            write: Some(write),
            write_buf: None,

            _bitfield_1: Default::default(),
        }
    }
}

pub struct MountHandle {
    mountpoint: PathBuf,
    loop_join: Option<thread::JoinHandle<i32>>,
    handle: Arc<FuseHandle>,
    user_data: *const c_void,
}

impl MountHandle {
    fn new(
        mountpoint: &Path,
        handle: Arc<FuseHandle>,
        loop_join: thread::JoinHandle<i32>,
        user_data: *const c_void,
    ) -> Self {
        Self {
            mountpoint: mountpoint.to_owned(),
            handle,
            loop_join: Some(loop_join),
            user_data,
        }
    }

    /// Waits for the fuse_loop event loop to terminate.  This can block
    /// indefinitely if it is not part of the fuse shutdown process.  This
    /// consumes the thread's join handle, so it only ever runs once.
    pub fn wait(&mut self) -> Option<i32> {
        debug!(target: FUSE_TAG, "Waiting for fuse_loop to terminate...");
        // it may have been already consumed by a previous MountHandle::wait() call
        if self.loop_join.is_some() {
            let ret_val = self.loop_join.take().unwrap().join().ok();
            debug!(
                target: FUSE_TAG,
                "fuse_loop has terminated with {:?}", ret_val
            );
            ret_val
        } else {
            debug!(target: FUSE_TAG, "fuse_loop was already joined, skipping");
            None
        }
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        info!(target: FUSE_TAG, "Unmounting {:?}", self.mountpoint);
        let mount_char = CString::new(self.mountpoint.to_str().unwrap())
            .unwrap()
            .into_raw();

        self.handle.disable();

        // without the sleep we sometimes get a:
        //     fuse_kern_chan.c:67: fuse_kern_chan_send: Assertion `se != NULL' failed
        std::thread::sleep(std::time::Duration::from_millis(100));

        unsafe {
            debug!(target: FUSE_TAG, "Calling fuse_exit");
            // exits our fuse_loop
            fuse_exit(self.handle.handle_struct.load(Ordering::Relaxed));

            debug!(target: FUSE_TAG, "Calling fuse_unmount");
            // unmounts the file system and destroys the comm channel
            fuse_unmount(
                mount_char,
                self.handle.channel_struct.load(Ordering::Relaxed),
            );

            debug!(target: FUSE_TAG, "Joining on loop handle");
            self.wait();

            debug!(target: FUSE_TAG, "Calling fuse_destroy");
            // destroys the fuse handle
            fuse_destroy(self.handle.handle_struct.load(Ordering::Relaxed));

            // clean up some memory
            CString::from_raw(mount_char);

            // releases our leaked Filesystem memory
            let boxed = self.user_data as *mut &mut dyn Filesystem;
            let ops = Box::from_raw(*boxed);
            drop(ops);
        }
        info!(
            target: FUSE_TAG,
            "Done unmounting {}",
            self.mountpoint.display()
        );
    }
}

#[derive(Debug)]
pub enum MountError {
    BadFuseChannel,
    BadFuseHandle,
    LoopDied,
}

impl std::error::Error for MountError {}
impl std::fmt::Display for MountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{:?}", self) // just use Debug for now
    }
}

/// mount mounts the filesystem.
pub fn mount<T>(
    mountpoint: &Path,
    ops: T,
    serial_ops: bool,
    fuse_conf: FuseConfig,
    mount_conf: MountConfig,
) -> Result<Arc<Mutex<MountHandle>>, MountError>
where
    T: Filesystem + Send + Sync + 'static,
{
    let fuse_args_vec: Vec<String> = fuse_conf.into();
    debug!(target: FUSE_TAG, "Aggregating fuse args {:?}", fuse_args_vec);
    let mut fuse_argv: Vec<*mut c_char> = Vec::new();
    fuse_argv.push(CString::new("tagdir").expect("CString failed").into_raw() as *mut c_char);
    for arg in fuse_args_vec {
        fuse_argv.push(CString::new(arg).expect("CString failed").into_raw() as *mut c_char);
    }

    let mount_args: Vec<String> = mount_conf.into();
    debug!(target: FUSE_TAG, "Aggregating mount args {:?}", mount_args);
    let mut mount_argv: Vec<*mut c_char> = Vec::new();
    mount_argv.push(CString::new("tagdir").expect("CString failed").into_raw() as *mut c_char);
    for arg in mount_args {
        mount_argv.push(CString::new(arg).expect("CString failed").into_raw() as *mut c_char);
    }

    // `ops` has to outlive the fuse loop, and fuse only gives us a single
    // void pointer of user data to find it through.  A `&dyn Filesystem` is
    // two usizes (data + vtable), so we first move `ops` to the heap and leak
    // it to get a 'static trait reference, then box *that reference* to get a
    // single-usize pointer whose contents are never dropped.  mount() runs
    // once per process, so the leak is bounded; MountHandle::drop reclaims it.
    let trait_ref: &'static dyn Filesystem = Box::leak(Box::new(ops));
    let user_data = Box::into_raw(Box::new(trait_ref)) as *const c_void;

    let low_level_ops = FuseOperations::new();

    let mount_char = CString::new(mountpoint.to_str().unwrap())
        .unwrap()
        .into_raw();
    let fuse_args_struct = &mut fuse_args {
        argc: fuse_argv.len() as c_int,
        argv: fuse_argv.as_mut_ptr(),
        allocated: 0,
    } as *mut fuse_args;

    let mount_args_struct = &mut fuse_args {
        argc: mount_argv.len() as c_int,
        argv: mount_argv.as_mut_ptr(),
        allocated: 0,
    } as *mut fuse_args;

    debug!(target: FUSE_TAG, "Mounting {:?}", mountpoint);
    let chan = AtomicPtr::new(unsafe { fuse_mount(mount_char, mount_args_struct) });

    if chan.load(Ordering::Relaxed).is_null() {
        error!(target: FUSE_TAG, "fuse_chan was NULL!");
        return Err(MountError::BadFuseChannel);
    }

    debug!(target: FUSE_TAG, "Creating fuse handle");
    let handle = AtomicPtr::new(unsafe {
        fuse_new(
            chan.load(Ordering::Relaxed),
            fuse_args_struct,
            &low_level_ops,
            size_of::<FuseOperations>(),
            user_data as *mut c_void,
        )
    });

    if handle.load(Ordering::Relaxed).is_null() {
        error!(target: FUSE_TAG, "fuse handle was NULL!");
        unsafe {
            fuse_unmount(mount_char, chan.load(Ordering::Relaxed));
        }
        return Err(MountError::BadFuseHandle);
    }

    unsafe {
        debug!(target: FUSE_TAG, "Installing fuse signal handlers");
        let session_handle = fuse_get_session(handle.load(Ordering::Relaxed));
        let success = fuse_set_signal_handlers(session_handle);
        if success != 0 {
            error!(
                target: FUSE_TAG,
                "Unable to install signal handlers, continuing anyway"
            );
        }
    }

    let fuse_handle = Arc::new(FuseHandle {
        disabled: AtomicBool::new(false),
        handle_struct: handle,
        channel_struct: chan,
    });

    let (tx, rx) = mpsc::sync_channel(1);
    let join_handle: thread::JoinHandle<i32>;
    {
        let fuse_handle = fuse_handle.clone();
        debug!(target: FUSE_TAG, "Starting fuse_loop thread");
        join_handle = thread::Builder::new()
            .name("fuse_loop".to_string())
            .spawn(move || {
                let handle = {
                    if serial_ops {
                        // a single-threaded blocking event dispatch loop
                        let _ = tx.send(true);
                        unsafe { fuse_loop(fuse_handle.handle_struct.load(Ordering::Relaxed)) }
                    } else {
                        // still a blocking loop, but it may spin up a thread
                        // per request, so Filesystem implementors must be
                        // thread safe
                        let _ = tx.send(true);
                        unsafe { fuse_loop_mt(fuse_handle.handle_struct.load(Ordering::Relaxed)) }
                    }
                };
                debug!(target: FUSE_TAG, "Stopped fuse_loop thread");
                handle
            })
            .expect("Couldn't spawn join thread");
        debug!(
            target: FUSE_TAG,
            "Started fuse_loop thread with id {:?}",
            join_handle.thread().id()
        );
    }

    // give fuse_loop a moment to come up, otherwise we can non-deterministically
    // get "fuse_kern_chan_send: Assertion `se != NULL' failed"
    if let Err(mpsc::RecvError) = rx.recv() {
        return Err(MountError::LoopDied);
    }
    thread::sleep(std::time::Duration::from_millis(400));

    let mount_handle = Arc::new(Mutex::new(MountHandle::new(
        mountpoint,
        fuse_handle,
        join_handle,
        user_data,
    )));

    Ok(mount_handle)
}
